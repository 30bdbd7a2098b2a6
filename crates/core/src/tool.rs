//! Tool descriptors, the skill handler trait, and the catalog.
//!
//! A tool is what gives the assistant the ability to act in the world:
//! query a calendar, switch a light, look up the weather. The descriptor is
//! the static metadata the model sees; the [`SkillHandler`] is the
//! implementation the coordinator invokes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{CatalogError, ToolError};

/// Static description of a tool, immutable after registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name (e.g. "weather_lookup", "calendar_add").
    pub name: String,

    /// Description of what the tool does (sent to the LLM).
    pub description: String,

    /// JSON Schema describing the tool's parameters.
    pub parameter_schema: serde_json::Value,

    /// Keywords that trigger exposure of this tool. `*` is a wildcard.
    /// An empty list means the tool is always exposed.
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Prompt snippet added when the tool is exposed.
    #[serde(default)]
    pub init_prompt: String,

    /// Prompt snippet added after a successful execution.
    #[serde(default)]
    pub success_prompt: String,

    /// Prompt snippet added after a failed execution.
    #[serde(default)]
    pub fail_prompt: String,

    /// The skill module this descriptor came from.
    #[serde(default)]
    pub source_module: String,

    /// Token headroom to reserve for the model's answer after this tool runs.
    #[serde(default)]
    pub tokens_for_answer: usize,

    /// Token headroom to reserve for this tool's result message.
    #[serde(default)]
    pub tokens_for_result: usize,
}

impl ToolDescriptor {
    /// Start building a descriptor for the given name.
    pub fn builder(name: impl Into<String>) -> ToolDescriptorBuilder {
        ToolDescriptorBuilder::new(name)
    }

    /// The wire form sent to the model: name, description, schema.
    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameter_schema.clone(),
        }
    }
}

/// Builder for [`ToolDescriptor`]. Budget hints and prompts are explicit
/// fields set here, not annotations discovered at runtime.
#[derive(Debug, Clone)]
pub struct ToolDescriptorBuilder {
    descriptor: ToolDescriptor,
}

impl ToolDescriptorBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: name.into(),
                description: String::new(),
                parameter_schema: serde_json::json!({ "type": "object", "properties": {} }),
                keywords: Vec::new(),
                init_prompt: String::new(),
                success_prompt: String::new(),
                fail_prompt: String::new(),
                source_module: String::new(),
                tokens_for_answer: 0,
                tokens_for_result: 0,
            },
        }
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.descriptor.description = text.into();
        self
    }

    pub fn parameter_schema(mut self, schema: serde_json::Value) -> Self {
        self.descriptor.parameter_schema = schema;
        self
    }

    pub fn keywords<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor.keywords = words.into_iter().map(Into::into).collect();
        self
    }

    pub fn init_prompt(mut self, text: impl Into<String>) -> Self {
        self.descriptor.init_prompt = text.into();
        self
    }

    pub fn success_prompt(mut self, text: impl Into<String>) -> Self {
        self.descriptor.success_prompt = text.into();
        self
    }

    pub fn fail_prompt(mut self, text: impl Into<String>) -> Self {
        self.descriptor.fail_prompt = text.into();
        self
    }

    pub fn source_module(mut self, name: impl Into<String>) -> Self {
        self.descriptor.source_module = name.into();
        self
    }

    pub fn tokens_for_answer(mut self, tokens: usize) -> Self {
        self.descriptor.tokens_for_answer = tokens;
        self
    }

    pub fn tokens_for_result(mut self, tokens: usize) -> Self {
        self.descriptor.tokens_for_result = tokens;
        self
    }

    pub fn build(self) -> ToolDescriptor {
        self.descriptor
    }
}

/// A tool definition in the model client's wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A tool call as emitted by the model.
///
/// `arguments` is a JSON-encoded string, not a nested object — this matches
/// the function-calling convention of the model clients bit for bit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON-encoded string
    pub arguments: String,
}

/// The skill implementation trait.
///
/// Handlers receive arguments that already passed schema validation and
/// return either an optional result string (`None` is reported to the model
/// as the literal `"success"`) or an error. Handlers must not block
/// indefinitely; the coordinator enforces a timeout around the call.
#[async_trait]
pub trait SkillHandler: Send + Sync {
    async fn invoke(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<Option<String>, ToolError>;
}

/// One registered tool: its descriptor plus its implementation.
#[derive(Clone)]
pub struct CatalogEntry {
    pub descriptor: Arc<ToolDescriptor>,
    pub handler: Arc<dyn SkillHandler>,
}

/// The tool catalog.
///
/// Built once at startup by explicit registration calls from each skill
/// module's initializer — no runtime discovery, no ambient globals. After
/// startup it is read-only and safe for unsynchronized concurrent reads
/// (share it behind an `Arc`).
#[derive(Default)]
pub struct ToolCatalog {
    entries: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if a tool with the same name already exists.
    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn SkillHandler>,
    ) -> std::result::Result<(), CatalogError> {
        if self.index.contains_key(&descriptor.name) {
            return Err(CatalogError::DuplicateName(descriptor.name));
        }
        debug!(
            tool = %descriptor.name,
            keywords = descriptor.keywords.len(),
            "registered tool"
        );
        self.index.insert(descriptor.name.clone(), self.entries.len());
        self.entries.push(CatalogEntry {
            descriptor: Arc::new(descriptor),
            handler,
        });
        Ok(())
    }

    /// Look up a tool by name.
    pub fn lookup(&self, name: &str) -> Option<&CatalogEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// All entries in registration order. The order is stable so prompt
    /// construction is deterministic.
    pub fn all(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
