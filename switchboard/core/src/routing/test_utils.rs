//! Router Test Utilities
//!
//! Mock infrastructure for testing failover routing without real providers.
//! [`MockProvider`] records every request it receives and can be scripted to
//! be unavailable, to fail, or to stream a list of deltas and then fail.
//!
//! # Usage
//!
//! ```ignore
//! use switchboard_core::routing::test_utils::MockProvider;
//!
//! let provider = MockProvider::new("A");
//! provider.stream_deltas(&["Hel", "lo"]);
//! provider.fail_stream_after_deltas("connection reset");
//!
//! // After test, verify what the provider was sent
//! assert_eq!(provider.request_count(), 1);
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::router::{RoutedStream, RouterError};
use crate::provider::{CompletionProvider, StreamEvent, StreamReceiver, STREAM_CHANNEL_CAPACITY};
use crate::types::{CompletionRequest, CompletionResponse, StreamChunk};

// ============================================================================
// Stream Script
// ============================================================================

/// How a mock stream behaves once opened
#[derive(Clone, Debug, Default)]
struct StreamScript {
    /// Deltas sent in order
    deltas: Vec<String>,
    /// Error sent after the deltas
    fail_after: Option<String>,
    /// Error returned instead of opening the stream
    fail_open: Option<String>,
    /// Keep the stream open after the deltas
    hold_open: bool,
}

// ============================================================================
// Mock Provider
// ============================================================================

/// Scriptable provider for router tests
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    default_model: String,
    available: AtomicBool,
    /// Error returned from `complete`
    failure: Mutex<Option<String>>,
    script: Mutex<StreamScript>,
    /// Request history for verification
    requests: Mutex<Vec<CompletionRequest>>,
    availability_checks: AtomicUsize,
}

impl MockProvider {
    /// Available provider answering "Response from <name>"
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            default_model: format!("default-{name}"),
            name,
            available: AtomicBool::new(true),
            failure: Mutex::new(None),
            script: Mutex::new(StreamScript::default()),
            requests: Mutex::new(Vec::new()),
            availability_checks: AtomicUsize::new(0),
        }
    }

    /// Set the model used for `"auto"`
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Toggle the liveness probe result
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make `complete` fail with `message`
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    /// Deltas streamed by `complete_stream`
    pub fn stream_deltas(&self, deltas: &[&str]) {
        self.script.lock().deltas = deltas.iter().map(|d| (*d).to_string()).collect();
    }

    /// Fail the stream once all deltas are sent
    pub fn fail_stream_after_deltas(&self, message: impl Into<String>) {
        self.script.lock().fail_after = Some(message.into());
    }

    /// Fail `complete_stream` before any chunk
    pub fn fail_stream_open(&self, message: impl Into<String>) {
        self.script.lock().fail_open = Some(message.into());
    }

    /// Never finish the stream after the deltas
    pub fn hold_stream_open(&self) {
        self.script.lock().hold_open = true;
    }

    /// Requests received, oldest first
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    /// Number of completion calls (streaming or not)
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of liveness probes
    pub fn availability_checks(&self) -> usize {
        self.availability_checks.load(Ordering::SeqCst)
    }

    fn record(&self, request: &CompletionRequest) {
        self.requests.lock().push(request.clone());
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn is_available(&self) -> bool {
        self.availability_checks.fetch_add(1, Ordering::SeqCst);
        self.available.load(Ordering::SeqCst)
    }

    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionResponse> {
        self.record(request);
        if let Some(message) = self.failure.lock().clone() {
            anyhow::bail!(message);
        }
        Ok(CompletionResponse::single(
            format!("mock-{}", self.name),
            request.model.clone(),
            format!("Response from {}", self.name),
        ))
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> anyhow::Result<StreamReceiver> {
        self.record(request);
        let script = self.script.lock().clone();
        if let Some(message) = script.fail_open {
            anyhow::bail!(message);
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let id = format!("mock-{}", self.name);
        let model = request.model.clone();

        tokio::spawn(async move {
            for delta in script.deltas {
                let chunk = StreamChunk::delta(&id, &model, delta);
                if tx.send(StreamEvent::Chunk(chunk)).await.is_err() {
                    return;
                }
            }
            if let Some(message) = script.fail_after {
                let _ = tx.send(StreamEvent::Error(message)).await;
            } else if script.hold_open {
                // Hold the sender until the receiver goes away
                tx.closed().await;
            } else {
                let _ = tx.send(StreamEvent::Done).await;
            }
        });

        Ok(rx)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Drain a routed stream into its concatenated text and terminal error
pub async fn collect_stream(mut rx: RoutedStream) -> (String, Option<RouterError>) {
    let mut text = String::new();
    let mut error = None;
    while let Some(item) = rx.recv().await {
        match item {
            Ok(chunk) => text.push_str(chunk.content()),
            Err(e) => error = Some(e),
        }
    }
    (text, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[tokio::test]
    async fn test_mock_records_requests() {
        let provider = MockProvider::new("A");
        let request = CompletionRequest::new("m", vec![ChatMessage::user("hi")]);

        let response = provider.complete(&request).await.unwrap();
        assert_eq!(response.content(), "Response from A");
        assert_eq!(provider.requests(), vec![request]);
        assert_eq!(provider.default_model(), "default-A");
    }

    #[tokio::test]
    async fn test_mock_stream_script() {
        let provider = MockProvider::new("A");
        provider.stream_deltas(&["a", "b"]);
        provider.fail_stream_after_deltas("bang");

        let mut rx = provider
            .complete_stream(&CompletionRequest::new("m", vec![]))
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], StreamEvent::Error("bang".to_string()));
    }
}
