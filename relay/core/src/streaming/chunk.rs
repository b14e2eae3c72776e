//! Provider chunk payloads
//!
//! Shape of one OpenAI-compatible streaming chunk. Every field is optional
//! because providers omit or null out whatever a given chunk doesn't carry.

use serde::{Deserialize, Deserializer};

/// One decoded streaming chunk
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ProviderChunk {
    /// Choice deltas; only the first is used
    #[serde(default)]
    pub choices: Option<Vec<ChunkChoice>>,
    /// Token counters, usually only on the last chunk
    #[serde(default)]
    pub usage: Option<ChunkUsage>,
}

impl ProviderChunk {
    /// Delta of the first choice, if any
    #[must_use]
    pub fn delta(&self) -> Option<&ChunkDelta> {
        self.choices
            .as_deref()
            .and_then(<[ChunkChoice]>::first)
            .and_then(|choice| choice.delta.as_ref())
    }
}

/// One choice of a chunk
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ChunkChoice {
    /// Incremental content
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
}

/// Incremental content of a choice
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ChunkDelta {
    /// Answer text
    #[serde(default)]
    pub content: Option<String>,
    /// Reasoning text
    #[serde(default)]
    pub reasoning_content: Option<String>,
    /// Tool invocations
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// One tool invocation fragment
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ToolCallDelta {
    /// Function being called
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

impl ToolCallDelta {
    /// Display form: `Tool: <name>` plus ` - Args: <arguments>` when present
    #[must_use]
    pub fn describe(&self) -> String {
        let name = self
            .function
            .as_ref()
            .and_then(|f| f.name.as_deref())
            .unwrap_or_default();
        let arguments = self
            .function
            .as_ref()
            .and_then(|f| f.arguments.as_deref())
            .unwrap_or_default();

        if arguments.is_empty() {
            format!("Tool: {name}")
        } else {
            format!("Tool: {name} - Args: {arguments}")
        }
    }
}

/// Function name and argument payload
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct FunctionDelta {
    /// Function name
    #[serde(default)]
    pub name: Option<String>,
    /// Raw argument payload
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Token counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ChunkUsage {
    /// Prompt tokens
    #[serde(default, deserialize_with = "null_as_zero")]
    pub prompt_tokens: u64,
    /// Generated tokens
    #[serde(default, deserialize_with = "null_as_zero")]
    pub completion_tokens: u64,
    /// Sum of both
    #[serde(default, deserialize_with = "null_as_zero")]
    pub total_tokens: u64,
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<u64>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl ChunkUsage {
    /// Display form used by the usage stage
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "Tokens: {} prompt, {} completion, {} total",
            self.prompt_tokens, self.completion_tokens, self.total_tokens
        )
    }
}
