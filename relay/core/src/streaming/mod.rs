//! Stage Streaming
//!
//! Decoding of raw provider chunks into typed stages, and the driver that
//! pumps one upstream call through the decoder into a sink.
//!
//! # Architecture
//!
//! ```text
//!  LlmBackend::open_stream ──► UpstreamFrame ──► StageDecoder ──► StageEvent
//!                                                                    │
//!                               StreamDriver::run ◄──────────────────┘
//!                                      │
//!                                      ▼
//!                               StageSink::deliver ──► hub queue / channel / Vec
//! ```
//!
//! # Example
//!
//! ```ignore
//! use relay_core::streaming::StreamDriver;
//!
//! let driver = StreamDriver::new(backend, params);
//! let mut events = Vec::new();
//! let report = driver.run_prompt("Why is the sky blue? /think", Vec::new(), &mut events).await;
//! ```

mod chunk;
mod decoder;
mod driver;

pub use chunk::{ChunkChoice, ChunkDelta, ChunkUsage, FunctionDelta, ProviderChunk, ToolCallDelta};
pub use decoder::StageDecoder;
pub use driver::{
    CallbackSink, Delivery, RelayError, StageSink, StreamDriver, StreamOutcome, StreamReport,
    ThinkingResponse,
};
