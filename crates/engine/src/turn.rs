//! The turn context — the mutable unit of work flowing through the pipeline.
//!
//! One context is created per user utterance. A tool call does not mutate
//! the current context in place; it produces a *chained* context whose
//! synthetic input carries the tool result, and the pipeline keeps draining
//! chained contexts until the model answers with plain text.

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;
use voxloop_core::tool::{ToolCall, ToolDescriptor};

/// Default user for single-seat desktop installs.
pub const DEFAULT_USER: &str = "default_user";

/// Errors local to turn construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    /// The prompt was already finalized for dispatch; additions are frozen.
    #[error("prompt additions are immutable after dispatch")]
    ImmutablePrompt,
}

/// Insertion-ordered, duplicate-suppressing prompt fragments.
///
/// Two tiers: prioritized additions are prepended before the base prompt,
/// normal additions are appended after it. Once [`finalize`](Self::finalize)
/// has assembled the prompt for dispatch, further additions fail — mutating
/// the prompt after the model saw it is a known foot-gun.
#[derive(Debug, Clone, Default)]
pub struct PromptAdditions {
    normal: Vec<String>,
    prioritized: Vec<String>,
    finalized: bool,
}

impl PromptAdditions {
    /// Add a fragment. Duplicate text is silently ignored.
    pub fn add(&mut self, text: impl Into<String>) -> Result<(), TurnError> {
        self.add_inner(text.into(), false)
    }

    /// Add a fragment that must precede the base prompt.
    pub fn add_prioritized(&mut self, text: impl Into<String>) -> Result<(), TurnError> {
        self.add_inner(text.into(), true)
    }

    fn add_inner(&mut self, text: String, prioritize: bool) -> Result<(), TurnError> {
        if self.finalized {
            return Err(TurnError::ImmutablePrompt);
        }
        if text.is_empty() {
            return Ok(());
        }
        if self.normal.contains(&text) || self.prioritized.contains(&text) {
            return Ok(());
        }
        if prioritize {
            self.prioritized.push(text);
        } else {
            self.normal.push(text);
        }
        Ok(())
    }

    /// Assemble the prompt: prioritized fragments, base, normal fragments.
    pub fn assemble(&self, base_prompt: &str) -> String {
        let mut prompt = self.prioritized.join(" ").trim().to_string();
        if !prompt.is_empty() {
            prompt.push(' ');
        }
        prompt.push_str(base_prompt);
        let normal = self.normal.join(" ");
        let normal = normal.trim();
        if !normal.is_empty() {
            prompt.push(' ');
            prompt.push_str(normal);
        }
        prompt.trim().to_string()
    }

    /// Assemble for dispatch and freeze further additions.
    pub fn finalize(&mut self, base_prompt: &str) -> String {
        self.finalized = true;
        self.assemble(base_prompt)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

/// A tool result attached to a chained turn.
#[derive(Debug, Clone)]
pub struct ToolResultAttachment {
    pub call_id: String,
    pub tool_name: String,
    pub content: String,
}

/// The unit of work for one model exchange.
pub struct TurnContext {
    /// Unique turn ID.
    pub id: String,

    /// User identification for client-individual history.
    pub user_id: String,

    /// Caller text for this turn. On a chained turn this is the original
    /// user input carried forward so keyword matching still sees the words
    /// that started the request.
    pub input_text: Option<String>,

    /// The model's final text, once produced.
    pub output_text: Option<String>,

    /// A tool call the model requested and the coordinator has not yet run.
    pub pending_tool_call: Option<ToolCall>,

    /// The tool subset attached by the exposure selector, catalog order.
    pub exposed_tools: Vec<Arc<ToolDescriptor>>,

    /// Tool names hidden from this turn's exposure (e.g. the tool whose
    /// result this chained turn carries).
    pub excluded_tools: HashSet<String>,

    /// Result of the tool call that produced this chained turn.
    pub tool_result: Option<ToolResultAttachment>,

    /// Token reserve requested for an anticipated tool-result message.
    pub tool_result_reserve: usize,

    /// Synthetic follow-up turns do not re-read caller audio/text.
    pub skip_input_capture: bool,

    /// Suppress presenting this turn's output to the user.
    pub skip_output: bool,

    /// Prompt fragments accumulated for this turn.
    pub prompt_additions: PromptAdditions,

    /// Set once the local-time stamp has been appended to the prompt.
    pub local_time_added: bool,

    /// The follow-up turn to process after this one, if any.
    pub chained_turn: Option<Box<TurnContext>>,
}

impl TurnContext {
    /// Create a fresh context for a user utterance.
    pub fn new(user_id: impl Into<String>, input_text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            input_text: Some(input_text.into()),
            output_text: None,
            pending_tool_call: None,
            exposed_tools: Vec::new(),
            excluded_tools: HashSet::new(),
            tool_result: None,
            tool_result_reserve: 0,
            skip_input_capture: false,
            skip_output: false,
            prompt_additions: PromptAdditions::default(),
            local_time_added: false,
            chained_turn: None,
        }
    }

    /// Create a follow-up context chained onto this one.
    ///
    /// The chained turn inherits the user id, the original input text, the
    /// tool denylist, and output suppression; it never re-reads caller
    /// input, and optionally seeds a prompt addition.
    pub fn chain(&mut self, prompt_seed: Option<&str>) -> &mut TurnContext {
        let mut next = TurnContext::new(self.user_id.clone(), "");
        next.input_text = self.input_text.clone();
        next.excluded_tools = self.excluded_tools.clone();
        next.skip_output = self.skip_output;
        next.skip_input_capture = true;
        if let Some(seed) = prompt_seed {
            // The chained context is brand new, additions cannot be frozen.
            let _ = next.prompt_additions.add(seed);
        }
        self.chained_turn = Some(Box::new(next));
        self.chained_turn.as_mut().expect("just set")
    }

    /// Attach a tool result so the chained model call reacts to it instead
    /// of re-parsing the user's words. Also hides the tool from the next
    /// turn's exposure to stop the model re-issuing an answered call.
    pub fn attach_tool_result(
        &mut self,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) {
        let tool_name = tool_name.into();
        self.excluded_tools.insert(tool_name.clone());
        self.tool_result = Some(ToolResultAttachment {
            call_id: call_id.into(),
            tool_name,
            content: content.into(),
        });
    }

    /// Take the chained turn, draining the chain one link.
    pub fn take_chained(&mut self) -> Option<TurnContext> {
        self.chained_turn.take().map(|boxed| *boxed)
    }

    /// Add a prompt fragment through the accessor (idempotent; fails after
    /// the prompt has been finalized for dispatch).
    pub fn add_prompt_addition(&mut self, text: impl Into<String>) -> Result<(), TurnError> {
        self.prompt_additions.add(text)
    }
}
