//! Server-Sent Events framing
//!
//! OpenAI-compatible endpoints stream `data: <json>` lines terminated by a
//! `data: [DONE]` marker. Body chunks can split a line (or a multi-byte
//! character) anywhere, so bytes are buffered until a full line is
//! available and only then decoded.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use futures::{Stream, StreamExt};

use super::traits::{BackendError, UpstreamFrame, UpstreamStream};

const DONE_MARKER: &str = "[DONE]";

/// Line buffer turning raw body bytes into frames
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed body bytes, returning every frame completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<UpstreamFrame> {
        self.pending.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(frame) = parse_line(&String::from_utf8_lossy(&line)) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a final line that had no trailing newline
    pub fn finish(&mut self) -> Option<UpstreamFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        parse_line(&String::from_utf8_lossy(&line))
    }
}

fn parse_line(line: &str) -> Option<UpstreamFrame> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    // event:, id: and retry: lines carry nothing the relay uses
    let payload = line.strip_prefix("data:")?.trim_start();
    if payload == DONE_MARKER {
        return Some(UpstreamFrame::Done);
    }
    if payload.is_empty() {
        return None;
    }
    Some(UpstreamFrame::Data(payload.to_string()))
}

struct SseState<S> {
    body: Pin<Box<S>>,
    lines: SseLineBuffer,
    ready: VecDeque<UpstreamFrame>,
    exhausted: bool,
}

/// Frame an HTTP body stream as SSE
///
/// Nothing is spawned: the body is polled only while the returned stream is
/// polled, and dropping it drops the body.
pub fn sse_frames<S, B, E>(body: S) -> UpstreamStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = SseState {
        body: Box::pin(body),
        lines: SseLineBuffer::new(),
        ready: VecDeque::new(),
        exhausted: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.ready.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.exhausted {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let frames = state.lines.push(bytes.as_ref());
                    state.ready.extend(frames);
                }
                Some(Err(e)) => {
                    state.exhausted = true;
                    return Some((Err(BackendError::Read(e.to_string())), state));
                }
                None => {
                    state.exhausted = true;
                    state.ready.extend(state.lines.finish());
                }
            }
        }
    })
    .boxed()
}
