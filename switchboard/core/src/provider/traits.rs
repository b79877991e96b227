//! Completion Provider Traits
//!
//! The capability every backend exposes to the router. The router holds an
//! ordered list of `Arc<dyn CompletionProvider>` and never sees concrete types.
//!
//! # Design Philosophy
//!
//! The CompletionProvider trait provides a common interface for:
//! - A cheap liveness probe
//! - Single-shot and streaming completion
//! - Listing the models a provider can serve
//!
//! Implementations handle provider-specific details (API formats, auth, etc.)
//! and report failures as opaque errors. They never retry on their own.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::{CompletionRequest, CompletionResponse, ModelDetail, StreamChunk};

/// Buffer size of provider stream channels
pub const STREAM_CHANNEL_CAPACITY: usize = 100;

/// Events on a provider's stream channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// Next chunk of the answer
    Chunk(StreamChunk),
    /// Stream finished cleanly
    Done,
    /// Producer failed; chunks already sent still count
    Error(String),
}

/// Receiving half of a provider stream.
///
/// A channel that closes without `Done` or `Error` is a clean finish.
pub type StreamReceiver = mpsc::Receiver<StreamEvent>;

/// Completion provider trait
///
/// Implement this trait to put another backend behind the router.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Stable unique name; also the quota key (e.g., "Gemini", "Ollama")
    fn name(&self) -> &str;

    /// Model used when the caller asks for `"auto"`
    fn default_model(&self) -> &str;

    /// Check whether the provider is worth trying right now
    async fn is_available(&self) -> bool;

    /// Send a request and wait for the complete answer
    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionResponse>;

    /// Send a request and get a streaming answer
    ///
    /// Returns a channel receiver that yields chunks as they arrive. Failures
    /// after the stream opened arrive as [`StreamEvent::Error`].
    async fn complete_stream(&self, request: &CompletionRequest) -> anyhow::Result<StreamReceiver>;

    /// List available models
    async fn list_models(&self) -> anyhow::Result<Vec<ModelDetail>> {
        Ok(Vec::new())
    }
}
