//! The turn engine — the heart of Voxloop.
//!
//! A turn moves through a fixed sequence:
//!
//! 1. **Expose** the tool subset the model gets to see (keywords + decay)
//! 2. **Assemble** the system prompt (base + additions + local time)
//! 3. **Partition** the context window and trim history to fit
//! 4. **Call the model**; if it answers with text the turn is over
//! 5. **If it calls a tool**: execute it, chain a follow-up turn carrying
//!    the result, loop back to step 1
//!
//! The chain continues until the model answers in plain text or the link
//! limit cuts it off.

pub mod coordinator;
pub mod exposure;
pub mod history;
pub mod pipeline;
pub mod token;
pub mod turn;

pub use coordinator::{CallState, ExecutionReport, ToolCoordinator};
pub use exposure::{ExposeReason, Exposure, ExposureSelector, ExposureState};
pub use history::HistoryLog;
pub use pipeline::{Session, TurnOptions};
pub use token::{TokenBudget, estimate_entries_tokens, estimate_entry_tokens, estimate_tokens};
pub use turn::{PromptAdditions, ToolResultAttachment, TurnContext, TurnError};
