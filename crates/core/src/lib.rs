//! # Voxloop Core
//!
//! Domain types, traits, and error definitions for the Voxloop turn
//! orchestration engine. This crate has **zero framework dependencies** — it
//! defines the domain model that the engine and any host binding (audio, UI,
//! vendor SDKs) implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is defined as a trait here: the language model
//! backend ([`LanguageModel`]), the skill implementations ([`SkillHandler`]).
//! Implementations live with the host. This enables:
//! - Swapping model backends without touching orchestration logic
//! - Easy testing with mock models and mock skills
//! - A clean dependency graph (the engine depends inward on core)

pub mod cancel;
pub mod error;
pub mod event;
pub mod history;
pub mod model;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use cancel::CancelToken;
pub use error::{BudgetError, CatalogError, Error, ModelError, Result, ToolError};
pub use event::{EngineEvent, EventBus};
pub use history::{HistoryEntry, Role};
pub use model::{LanguageModel, ModelReply, ModelRequest};
pub use tool::{SkillHandler, ToolCall, ToolCatalog, ToolDescriptor, ToolSchema};
