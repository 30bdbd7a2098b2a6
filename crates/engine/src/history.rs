//! The history store — an append-ordered conversation log with a
//! budget-driven trimming policy.
//!
//! Appends are cheap; all the care is in [`HistoryLog::trim`], which has to
//! shrink the log without breaking its meaning: the two most recent entries
//! are never content-trimmed, and a tool result is never left at the head
//! where its call is gone.

use tracing::debug;
use voxloop_core::history::{HistoryEntry, Role};

use crate::token::{TokenBudget, estimate_entries_tokens, estimate_entry_tokens, estimate_tokens};

/// Replaces attachment content during trimming. Attachments tokenize
/// unpredictably and carry no value for the model once the turn is past.
pub const ATTACHMENT_PLACEHOLDER: &str = "[attachment omitted]";

/// Characters removed per truncation step in the first trim pass.
const TRUNCATE_CHARS: usize = 10;

/// Upper bound on trim loop iterations. Guarantees termination even when
/// non-ASCII content tokenizes unpredictably under truncation.
const MAX_TRIM_ITERATIONS: usize = 5000;

/// The per-session conversation log.
///
/// Single-writer: one session owns its log, and the pipeline mutates it
/// through `&mut self` only.
#[derive(Debug, Default)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry in arrival order.
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    /// The full log, oldest first.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The window handed to the model: the log minus any dangling tool
    /// results at the head. A tool result without its preceding call is
    /// meaningless context.
    pub fn window(&self) -> &[HistoryEntry] {
        let start = self
            .entries
            .iter()
            .position(|e| e.role != Role::Tool)
            .unwrap_or(self.entries.len());
        &self.entries[start..]
    }

    /// Total tokens of the system prompt plus the current window.
    pub fn total_tokens(&self, system_prompt: &str) -> usize {
        estimate_tokens(system_prompt) + estimate_entries_tokens(self.window())
    }

    /// Shrink the log so `system_prompt + window` fits `budget.history_cap`.
    ///
    /// Two passes:
    /// 1. Every entry except the two most recent that exceeds its cap
    ///    (`per_function_cap` for tool results, `per_message_cap` otherwise)
    ///    is truncated from the tail in fixed decrements; attachment content
    ///    is replaced by a placeholder instead.
    /// 2. While the total still exceeds the cap, evict from the oldest entry
    ///    forward, never leaving a tool-role entry at the head. Eviction
    ///    stops when a single entry remains.
    ///
    /// Both passes are iteration-bounded.
    pub fn trim(&mut self, system_prompt: &str, budget: &TokenBudget) {
        // Pass one: per-entry truncation, sparing the two most recent.
        let spared_from = self.entries.len().saturating_sub(2);
        for entry in &mut self.entries[..spared_from] {
            if entry.has_attachment {
                entry.content = ATTACHMENT_PLACEHOLDER.to_string();
                entry.has_attachment = false;
                continue;
            }

            // Tool results get their own, usually tighter, cap.
            let cap = match entry.role {
                Role::Tool => budget.per_function_cap,
                _ => budget.per_message_cap,
            };
            let mut iterations = 0;
            while estimate_entry_tokens(entry) > cap && iterations < MAX_TRIM_ITERATIONS {
                truncate_tail(&mut entry.content);
                iterations += 1;
            }
        }

        // Pass two: oldest-first eviction until the window fits.
        let mut iterations = 0;
        self.drop_dangling_tool_head();
        while self.total_tokens(system_prompt) > budget.history_cap
            && self.entries.len() > 1
            && iterations < MAX_TRIM_ITERATIONS
        {
            let evicted = self.entries.remove(0);
            debug!(
                role = ?evicted.role,
                remaining = self.entries.len(),
                "evicted oldest history entry"
            );
            self.drop_dangling_tool_head();
            iterations += 1;
        }
    }

    fn drop_dangling_tool_head(&mut self) {
        while self
            .entries
            .first()
            .is_some_and(|e| e.role == Role::Tool)
        {
            let dropped = self.entries.remove(0);
            debug!(
                tool = dropped.tool_name.as_deref().unwrap_or(""),
                "dropped dangling tool result at history head"
            );
        }
    }
}

/// Remove up to [`TRUNCATE_CHARS`] characters from the tail. Operates on
/// chars, not bytes, so multi-byte content stays valid UTF-8.
fn truncate_tail(content: &mut String) {
    for _ in 0..TRUNCATE_CHARS {
        if content.pop().is_none() {
            break;
        }
    }
}
