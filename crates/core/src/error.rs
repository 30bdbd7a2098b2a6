//! Error types for the Voxloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant. Tool and model failures
//! are recoverable — they flow back into the conversation as natural-language
//! turns. Only catalog and configuration errors are fatal at startup.

use thiserror::Error;

/// The top-level error type for all Voxloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Catalog errors (fatal at startup) ---
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    // --- Tool errors (recovered into the conversation) ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Model errors (surfaced as a visible error turn) ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Budget errors (fatal to one turn only) ---
    #[error("Budget error: {0}")]
    Budget(#[from] BudgetError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Errors raised while building or querying the tool catalog.
///
/// These are configuration-time errors: a duplicate registration or a
/// reference to a tool that was never registered means the host wiring is
/// wrong, and startup must fail loudly rather than limp along.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Duplicate tool name: {0}")]
    DuplicateName(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    /// Arguments failed schema validation. The handler is never invoked.
    #[error("Invalid tool arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    /// The handler ran and returned an error.
    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },
}

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Model call timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The call was cut short by a cancellation signal before a complete
    /// reply was assembled.
    #[error("Model call interrupted: {0}")]
    Interrupted(String),
}

#[derive(Debug, Clone, Error)]
pub enum BudgetError {
    /// History cannot be trimmed enough to fit even the pending user input.
    /// The turn is dropped; the session continues.
    #[error(
        "Context budget exhausted: input needs {input_tokens} tokens but only \
         {available_tokens} remain of a {context_window}-token window"
    )]
    Exhausted {
        input_tokens: usize,
        available_tokens: usize,
        context_window: usize,
    },
}
