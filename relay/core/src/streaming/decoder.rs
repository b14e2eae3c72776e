//! Stage Decoder
//!
//! Turns the raw chunks of one request into ordered [`StageEvent`]s and owns
//! the reasoning to answering transition. The decoder guarantees, per
//! session:
//!
//! - at most one `ReasoningComplete`, after every `Reasoning` and before the
//!   first `Answer`
//! - exactly one terminal event (`Complete` or `Error`), and nothing after it
//!
//! It does no I/O and is driven entirely by its caller.

use super::chunk::ProviderChunk;
use crate::stage::{SessionId, Stage, StageEvent};

/// Per-request decoding state
#[derive(Debug)]
pub struct StageDecoder {
    session_id: SessionId,
    reasoning_enabled: bool,
    reasoning: String,
    answer: String,
    answering: bool,
    terminated: bool,
}

impl StageDecoder {
    /// Start decoding a new session
    #[must_use]
    pub fn new(session_id: SessionId, reasoning_enabled: bool) -> Self {
        Self {
            session_id,
            reasoning_enabled,
            reasoning: String::new(),
            answer: String::new(),
            answering: false,
            terminated: false,
        }
    }

    /// Session being decoded
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Reasoning mode the request was opened with
    #[must_use]
    pub const fn reasoning_enabled(&self) -> bool {
        self.reasoning_enabled
    }

    /// Reasoning text accumulated so far
    #[must_use]
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// Answer text accumulated so far
    #[must_use]
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Whether the answer phase has begun
    #[must_use]
    pub const fn is_answering(&self) -> bool {
        self.answering
    }

    /// Whether a terminal event has been emitted
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Decode one raw data frame
    ///
    /// Payloads that don't parse as a chunk are skipped.
    pub fn decode_frame(&mut self, payload: &str) -> Vec<StageEvent> {
        if self.terminated {
            return Vec::new();
        }
        match serde_json::from_str::<ProviderChunk>(payload) {
            Ok(chunk) => self.decode_chunk(&chunk),
            Err(e) => {
                tracing::debug!(
                    session_id = %self.session_id,
                    error = %e,
                    "Skipping malformed chunk"
                );
                Vec::new()
            }
        }
    }

    /// Decode one parsed chunk
    pub fn decode_chunk(&mut self, chunk: &ProviderChunk) -> Vec<StageEvent> {
        let mut events = Vec::new();
        if self.terminated {
            return events;
        }

        if let Some(delta) = chunk.delta() {
            if let Some(text) = delta.reasoning_content.as_deref().filter(|t| !t.is_empty()) {
                if self.answering {
                    tracing::trace!(
                        session_id = %self.session_id,
                        len = text.len(),
                        "Dropping reasoning text after answer began"
                    );
                } else {
                    self.reasoning.push_str(text);
                    events.push(self.event(Stage::Reasoning, text));
                }
            }

            if let Some(text) = delta.content.as_deref().filter(|t| !t.is_empty()) {
                if !self.answering {
                    self.answering = true;
                    events.push(self.event(Stage::ReasoningComplete, ""));
                }
                self.answer.push_str(text);
                events.push(self.event(Stage::Answer, text));
            }

            for call in delta.tool_calls.iter().flatten() {
                events.push(self.event(Stage::ToolCall, call.describe()));
            }
        }

        if let Some(usage) = &chunk.usage {
            events.push(self.event(Stage::Usage, usage.describe()));
        }

        events
    }

    /// Graceful end of stream
    ///
    /// Returns `Complete` carrying the full answer, or `None` if the session
    /// already ended.
    pub fn finish(&mut self) -> Option<StageEvent> {
        if self.terminated {
            return None;
        }
        self.terminated = true;
        Some(self.event(Stage::Complete, self.answer.clone()))
    }

    /// Failed end of stream
    ///
    /// Returns `Error` carrying `message`, or `None` if the session already
    /// ended.
    pub fn fail(&mut self, message: impl Into<String>) -> Option<StageEvent> {
        if self.terminated {
            return None;
        }
        self.terminated = true;
        Some(self.event(Stage::Error, message))
    }

    fn event(&self, stage: Stage, text: impl Into<String>) -> StageEvent {
        StageEvent::new(self.session_id, stage, text)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn reasoning(text: &str) -> String {
        json!({"choices": [{"delta": {"reasoning_content": text}}]}).to_string()
    }

    fn answer(text: &str) -> String {
        json!({"choices": [{"delta": {"content": text}}]}).to_string()
    }

    fn tool(name: &str, args: &str) -> String {
        json!({"choices": [{"delta": {"tool_calls": [{"function": {"name": name, "arguments": args}}]}}]})
            .to_string()
    }

    fn usage() -> String {
        json!({"choices": [], "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}})
            .to_string()
    }

    fn stages(events: &[StageEvent]) -> Vec<(Stage, String)> {
        events
            .iter()
            .map(|e| (e.stage(), e.text().to_string()))
            .collect()
    }

    fn run(frames: &[String]) -> Vec<StageEvent> {
        let mut decoder = StageDecoder::new(SessionId::new(), true);
        let mut events: Vec<_> = frames
            .iter()
            .flat_map(|frame| decoder.decode_frame(frame))
            .collect();
        events.extend(decoder.finish());
        events
    }

    #[test]
    fn test_reasoning_then_answer() {
        let events = run(&[
            reasoning("step1"),
            reasoning("step2"),
            answer("ans1"),
            answer("ans2"),
        ]);

        assert_eq!(
            stages(&events),
            vec![
                (Stage::Reasoning, "step1".to_string()),
                (Stage::Reasoning, "step2".to_string()),
                (Stage::ReasoningComplete, String::new()),
                (Stage::Answer, "ans1".to_string()),
                (Stage::Answer, "ans2".to_string()),
                (Stage::Complete, "ans1ans2".to_string()),
            ]
        );
    }

    #[test]
    fn test_answer_only_still_marks_reasoning_complete() {
        let events = run(&[answer("hi")]);
        assert_eq!(
            stages(&events),
            vec![
                (Stage::ReasoningComplete, String::new()),
                (Stage::Answer, "hi".to_string()),
                (Stage::Complete, "hi".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_stream_completes_empty() {
        let events = run(&[]);
        assert_eq!(stages(&events), vec![(Stage::Complete, String::new())]);
    }

    #[test]
    fn test_tool_call_and_usage() {
        let events = run(&[
            tool("search", r#"{"q":"rust"}"#),
            tool("clock", ""),
            answer("done"),
            usage(),
        ]);
        assert_eq!(
            stages(&events),
            vec![
                (Stage::ToolCall, r#"Tool: search - Args: {"q":"rust"}"#.to_string()),
                (Stage::ToolCall, "Tool: clock".to_string()),
                (Stage::ReasoningComplete, String::new()),
                (Stage::Answer, "done".to_string()),
                (Stage::Usage, "Tokens: 5 prompt, 7 completion, 12 total".to_string()),
                (Stage::Complete, "done".to_string()),
            ]
        );
    }

    #[test]
    fn test_reasoning_and_answer_in_one_chunk() {
        let both = json!({"choices": [{"delta": {"reasoning_content": "r", "content": "a"}}]})
            .to_string();
        let events = run(&[both]);
        assert_eq!(
            stages(&events),
            vec![
                (Stage::Reasoning, "r".to_string()),
                (Stage::ReasoningComplete, String::new()),
                (Stage::Answer, "a".to_string()),
                (Stage::Complete, "a".to_string()),
            ]
        );
    }

    #[test]
    fn test_late_reasoning_dropped() {
        let mut decoder = StageDecoder::new(SessionId::new(), true);
        decoder.decode_frame(&answer("a"));
        assert!(decoder.decode_frame(&reasoning("late")).is_empty());
        assert_eq!(decoder.reasoning(), "");
    }

    #[test]
    fn test_malformed_and_empty_deltas_skipped() {
        let events = run(&[
            "not json".to_string(),
            r#"{"choices": "wrong type"}"#.to_string(),
            answer(""),
            reasoning(""),
            answer("ok"),
        ]);
        assert_eq!(
            stages(&events),
            vec![
                (Stage::ReasoningComplete, String::new()),
                (Stage::Answer, "ok".to_string()),
                (Stage::Complete, "ok".to_string()),
            ]
        );
    }

    #[test]
    fn test_nothing_after_terminal() {
        let mut decoder = StageDecoder::new(SessionId::new(), false);
        decoder.decode_frame(&answer("partial"));

        let error = decoder.fail("connection reset").unwrap();
        assert_eq!(error.stage(), Stage::Error);
        assert_eq!(error.text(), "connection reset");
        assert!(error.is_terminal());

        assert!(decoder.decode_frame(&answer("more")).is_empty());
        assert!(decoder.finish().is_none());
        assert!(decoder.fail("again").is_none());
        assert_eq!(decoder.answer(), "partial");
    }

    #[test]
    fn test_events_carry_session_id() {
        let sid = SessionId::new();
        let mut decoder = StageDecoder::new(sid, true);
        let mut events = decoder.decode_frame(&reasoning("x"));
        events.extend(decoder.finish());
        assert!(events.iter().all(|e| e.session_id() == sid));
    }

    #[derive(Clone, Copy, Debug)]
    enum Input {
        Reasoning,
        Answer,
        Tool,
        Usage,
        End,
        Fail,
    }

    const INPUTS: [Input; 6] = [
        Input::Reasoning,
        Input::Answer,
        Input::Tool,
        Input::Usage,
        Input::End,
        Input::Fail,
    ];

    fn check_invariants(sequence: &[Input]) {
        let mut decoder = StageDecoder::new(SessionId::new(), true);
        let mut events = Vec::new();
        for input in sequence {
            match input {
                Input::Reasoning => events.extend(decoder.decode_frame(&reasoning("r"))),
                Input::Answer => events.extend(decoder.decode_frame(&answer("a"))),
                Input::Tool => events.extend(decoder.decode_frame(&tool("t", ""))),
                Input::Usage => events.extend(decoder.decode_frame(&usage())),
                Input::End => events.extend(decoder.finish()),
                Input::Fail => events.extend(decoder.fail("boom")),
            }
        }
        events.extend(decoder.finish());

        let position = |stage: Stage| events.iter().position(|e| e.stage() == stage);
        let last_reasoning = events.iter().rposition(|e| e.stage() == Stage::Reasoning);
        let first_answer = position(Stage::Answer);
        let complete_markers = events
            .iter()
            .filter(|e| e.stage() == Stage::ReasoningComplete)
            .count();

        assert!(complete_markers <= 1, "{sequence:?}");
        if let Some(marker) = position(Stage::ReasoningComplete) {
            if let Some(r) = last_reasoning {
                assert!(r < marker, "{sequence:?}");
            }
        }
        if let Some(a) = first_answer {
            let marker = position(Stage::ReasoningComplete);
            assert!(marker.is_some_and(|m| m < a), "{sequence:?}");
        }

        let terminals: Vec<_> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_terminal())
            .collect();
        assert_eq!(terminals.len(), 1, "{sequence:?}");
        assert_eq!(terminals[0].0, events.len() - 1, "{sequence:?}");
    }

    #[test]
    fn test_invariants_over_all_short_sequences() {
        let mut sequences: Vec<Vec<Input>> = vec![Vec::new()];
        for _ in 0..5 {
            let mut next = Vec::new();
            for sequence in &sequences {
                check_invariants(sequence);
                for input in INPUTS {
                    let mut longer = sequence.clone();
                    longer.push(input);
                    next.push(longer);
                }
            }
            sequences = next;
        }
        for sequence in &sequences {
            check_invariants(sequence);
        }
    }
}
