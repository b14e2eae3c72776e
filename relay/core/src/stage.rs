//! Stage Events
//!
//! A [`StageEvent`] is one typed step of a streamed model response. Events
//! are immutable once built and are only built by the stage decoder, so the
//! ordering rules the decoder enforces cannot be bypassed by consumers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phase of a streamed response an event belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Incremental reasoning text
    Reasoning,
    /// Marker between reasoning and answer, carries no text
    ReasoningComplete,
    /// Incremental answer text
    Answer,
    /// A tool invocation requested by the model
    ToolCall,
    /// Token usage summary
    Usage,
    /// Graceful end, carries the full answer
    Complete,
    /// Failed end, carries the error message
    Error,
}

impl Stage {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::ReasoningComplete => "reasoning_complete",
            Self::Answer => "answer",
            Self::ToolCall => "tool_call",
            Self::Usage => "usage",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// Whether this stage ends a session
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of one request session
///
/// Several sessions may stream to the same connection at once; the id lets
/// the consumer tell their events apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Generate a fresh random id
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess-{}", self.0.simple())
    }
}

/// One typed step of a streamed response
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StageEvent {
    session_id: SessionId,
    stage: Stage,
    text: String,
    terminal: bool,
}

impl StageEvent {
    pub(crate) fn new(session_id: SessionId, stage: Stage, text: impl Into<String>) -> Self {
        Self {
            session_id,
            stage,
            text: text.into(),
            terminal: stage.is_terminal(),
        }
    }

    /// Session this event belongs to
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Stage of this event
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Text payload, possibly empty
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// True for `Complete` and `Error`
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Consume the event, returning its text
    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_flag_follows_stage() {
        let sid = SessionId::new();
        for stage in [
            Stage::Reasoning,
            Stage::ReasoningComplete,
            Stage::Answer,
            Stage::ToolCall,
            Stage::Usage,
        ] {
            assert!(!StageEvent::new(sid, stage, "").is_terminal(), "{stage}");
        }
        assert!(StageEvent::new(sid, Stage::Complete, "x").is_terminal());
        assert!(StageEvent::new(sid, Stage::Error, "x").is_terminal());
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::ReasoningComplete).unwrap();
        assert_eq!(json, "\"reasoning_complete\"");
        assert_eq!(Stage::ToolCall.to_string(), "tool_call");
    }

    #[test]
    fn test_session_id_display() {
        let sid = SessionId::new();
        let shown = sid.to_string();
        assert!(shown.starts_with("sess-"));
        assert_eq!(shown.len(), "sess-".len() + 32);
        assert_ne!(sid, SessionId::new());
    }

    #[test]
    fn test_event_serializes_all_fields() {
        let sid = SessionId::new();
        let event = StageEvent::new(sid, Stage::Answer, "hi");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["stage"], "answer");
        assert_eq!(value["text"], "hi");
        assert_eq!(value["terminal"], false);
    }
}
