//! Token accounting — estimation and budget arithmetic.
//!
//! Uses a character-based heuristic: ~4 characters per token. This
//! approximation is accurate within ~10% for BPE tokenizers (GPT-3.5,
//! GPT-4, Claude) on English text, and keeps the budget math deterministic
//! and testable without shipping a tokenizer.

use voxloop_core::error::BudgetError;
use voxloop_core::history::HistoryEntry;
use voxloop_core::tool::ToolSchema;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Estimate tokens for a single history entry including per-message
/// overhead.
///
/// Each entry costs ~4 tokens of overhead for role name, delimiters, and
/// formatting markers in the API wire format.
pub fn estimate_entry_tokens(entry: &HistoryEntry) -> usize {
    let overhead = 4;
    overhead + estimate_tokens(&entry.content)
}

/// Estimate tokens for a slice of history entries.
pub fn estimate_entries_tokens(entries: &[HistoryEntry]) -> usize {
    entries.iter().map(estimate_entry_tokens).sum()
}

/// Estimate tokens for one tool schema (serialized as JSON).
pub fn estimate_schema_tokens(schema: &ToolSchema) -> usize {
    let json = serde_json::to_string(schema).unwrap_or_default();
    estimate_tokens(&json)
}

/// Estimate tokens for a slice of tool schemas.
pub fn estimate_schemas_tokens(schemas: &[ToolSchema]) -> usize {
    schemas.iter().map(estimate_schema_tokens).sum()
}

/// A derived partition of one model's context window.
///
/// Built per turn by [`TokenBudget::partition`]: each consumer subtracts
/// from the remainder of the previous, and whatever is left belongs to
/// history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBudget {
    /// The model's full context window.
    pub context_window: usize,
    /// Headroom for the model's own reply.
    pub completion_reserve: usize,
    /// Maximum tokens one history entry may occupy after trimming.
    pub per_message_cap: usize,
    /// Maximum tokens one tool-result entry may occupy after trimming.
    pub per_function_cap: usize,
    /// Tokens available to conversation history (system prompt included).
    pub history_cap: usize,
}

impl TokenBudget {
    /// Partition a context window between its four competing consumers.
    ///
    /// Subtraction order: pending input, serialized tool schemas, completion
    /// reserve, anticipated tool-result reserve. The remainder is the
    /// history cap. Fails when the pending input alone cannot fit.
    pub fn partition(
        context_window: usize,
        input_tokens: usize,
        tool_tokens: usize,
        completion_reserve: usize,
        tool_result_reserve: usize,
        per_message_cap: usize,
        per_function_cap: usize,
    ) -> Result<Self, BudgetError> {
        let spoken_for = input_tokens + tool_tokens + completion_reserve + tool_result_reserve;
        let Some(history_cap) = context_window.checked_sub(spoken_for) else {
            let reserved_without_input = tool_tokens + completion_reserve + tool_result_reserve;
            return Err(BudgetError::Exhausted {
                input_tokens,
                available_tokens: context_window.saturating_sub(reserved_without_input),
                context_window,
            });
        };

        Ok(Self {
            context_window,
            completion_reserve,
            per_message_cap,
            per_function_cap,
            history_cap,
        })
    }
}
