//! Client wire formats
//!
//! JSON shapes spoken by browser clients. Stage names on the wire keep the
//! names existing clients already switch on (`thinking`, `streaming`, ...)
//! rather than the core's stage names.

use std::str::FromStr;

use relay_core::{SessionId, Stage, StageEvent};
use serde::{Deserialize, Serialize};

/// Inbound message type that triggers a request
pub const USER_MESSAGE: &str = "user_message";

/// Outbound message type for every stage event
pub const AI_RESPONSE: &str = "ai_response";

/// Wire name of a stage
#[must_use]
pub const fn wire_stage(stage: Stage) -> &'static str {
    match stage {
        Stage::Reasoning => "thinking",
        Stage::ReasoningComplete => "thinking_complete",
        Stage::Answer => "streaming",
        Stage::ToolCall => "tool_call",
        Stage::Usage => "usage",
        Stage::Complete => "complete",
        Stage::Error => "error",
    }
}

/// Inbound WebSocket message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientMessage {
    /// Message type; only `user_message` is acted on
    #[serde(rename = "type")]
    pub kind: String,
    /// Prompt text, possibly ending in a directive
    #[serde(default)]
    pub content: String,
}

impl ClientMessage {
    /// Whether this message should start a request
    #[must_use]
    pub fn is_user_message(&self) -> bool {
        self.kind == USER_MESSAGE
    }
}

/// Outbound WebSocket message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerEnvelope {
    /// Always `ai_response`
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Wire stage name
    pub stage: &'static str,
    /// Stage text
    pub content: String,
    /// Session the event belongs to
    pub session_id: String,
    /// Whether this is the session's last event
    pub terminal: bool,
}

impl From<StageEvent> for ServerEnvelope {
    fn from(event: StageEvent) -> Self {
        Self {
            kind: AI_RESPONSE,
            stage: wire_stage(event.stage()),
            session_id: event.session_id().to_string(),
            terminal: event.is_terminal(),
            content: event.into_text(),
        }
    }
}

/// Reasoning selection for the HTTP chat endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatMode {
    /// Always reason
    Thinking,
    /// Never reason
    Regular,
    /// Reason when the model supports it
    #[default]
    Auto,
}

impl ChatMode {
    /// Reasoning default for this mode
    #[must_use]
    pub const fn reasoning(self, model_supports_reasoning: bool) -> bool {
        match self {
            Self::Thinking => true,
            Self::Regular => false,
            Self::Auto => model_supports_reasoning,
        }
    }
}

/// Rejected `mode` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidMode(pub String);

impl std::fmt::Display for InvalidMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid mode: {:?}", self.0)
    }
}

impl FromStr for ChatMode {
    type Err = InvalidMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "thinking" => Ok(Self::Thinking),
            "regular" => Ok(Self::Regular),
            "auto" | "" => Ok(Self::Auto),
            _ => Err(InvalidMode(s.to_string())),
        }
    }
}

/// Body of `POST /chat` and `POST /chat/complete`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatBody {
    /// Prompt text
    pub message: String,
    /// `thinking`, `regular` or `auto`; missing means `auto`
    #[serde(default)]
    pub mode: String,
}

/// One line of the `POST /chat` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatLine {
    /// Wire stage name
    pub stage: &'static str,
    /// Stage text
    pub content: String,
    /// Whether this is the last line
    pub complete: bool,
    /// Session the line belongs to
    pub session_id: String,
}

impl From<StageEvent> for ChatLine {
    fn from(event: StageEvent) -> Self {
        Self {
            stage: wire_stage(event.stage()),
            complete: event.is_terminal(),
            session_id: event.session_id().to_string(),
            content: event.into_text(),
        }
    }
}

impl ChatLine {
    /// Closing line for a session whose reader fell behind the stream
    #[must_use]
    pub fn truncated(session_id: SessionId) -> Self {
        Self {
            stage: wire_stage(Stage::Error),
            content: "stream truncated: client read too slowly".to_string(),
            complete: true,
            session_id: session_id.to_string(),
        }
    }

    /// Serialize as one NDJSON line, newline included
    #[must_use]
    pub fn to_ndjson(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }
}

/// Body of a `POST /chat/complete` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompleteBody {
    /// Full reasoning text
    pub reasoning_content: String,
    /// Full answer text
    pub answer_content: String,
    /// Whether the stream ended gracefully
    pub is_complete: bool,
}
