//! Failover Router
//!
//! The main entry point for routing requests to providers. Tries every
//! registered provider strictly in registration order, one at a time:
//!
//! ```text
//! SelectNext -> CheckQuota -> CheckAvailability -> Attempt -> Success
//!      ^                                               |
//!      +------------------- Failure -------------------+
//! ```
//!
//! Skips and failures are swallowed here and written to the [`OutcomeLog`];
//! the caller only ever sees [`RouterError::AllProvidersExhausted`].
//!
//! Streaming requests fail over with content stitching: text already
//! forwarded to the caller is replayed to the next provider as a trailing
//! assistant message so it continues the answer instead of restarting it.
//!
//! # Usage
//!
//! ```ignore
//! let mut router = Router::new(Arc::new(QuotaTracker::new()));
//! router.add_provider(Arc::new(OllamaProvider::default()));
//!
//! let response = router.route(&request).await?;
//! let mut chunks = router.route_stream(request);
//! ```

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;

use super::outcome::{OutcomeLog, OutcomeRecord, OutcomeStatus, OutcomeUsage};
use super::quota::QuotaTracker;
use crate::config::GatewayConfig;
use crate::provider::{self, CompletionProvider, StreamEvent, STREAM_CHANNEL_CAPACITY};
use crate::types::{CompletionRequest, CompletionResponse, StreamChunk};

/// Error text recorded when the caller drops a stream
const CALLER_DISCONNECTED: &str = "Caller disconnected";

// ============================================================================
// Errors
// ============================================================================

/// Routing failures
///
/// Only [`RouterError::AllProvidersExhausted`] is ever returned to callers;
/// the other variants describe why a single provider was passed over.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    /// No provider could serve the request
    #[error("All providers failed or are rate-limited.")]
    AllProvidersExhausted,

    /// Provider skipped because its quota is used up
    #[error("Quota exceeded for {0}")]
    QuotaExceeded(String),

    /// Provider skipped because its liveness probe failed
    #[error("{0} reported unavailable")]
    BackendUnavailable(String),

    /// Provider attempt failed
    #[error("{provider} failed: {message}")]
    BackendError {
        /// Provider name
        provider: String,
        /// Failure text
        message: String,
    },
}

/// Items on a routed stream: chunks, then at most one terminal error
pub type RoutedStream = mpsc::Receiver<Result<StreamChunk, RouterError>>;

// ============================================================================
// Router
// ============================================================================

/// Quota-aware failover router
///
/// Cheap to clone; clones share providers, quota and outcome log.
#[derive(Clone)]
pub struct Router {
    /// Providers in priority order
    providers: Vec<Arc<dyn CompletionProvider>>,
    /// Shared quota tracker
    quota: Arc<QuotaTracker>,
    /// Shared outcome log
    outcomes: Arc<OutcomeLog>,
}

impl Router {
    /// Create a router with no providers and a default-sized outcome log
    #[must_use]
    pub fn new(quota: Arc<QuotaTracker>) -> Self {
        Self::with_outcome_log(quota, Arc::new(OutcomeLog::default()))
    }

    /// Create a router with explicit shared state
    #[must_use]
    pub fn with_outcome_log(quota: Arc<QuotaTracker>, outcomes: Arc<OutcomeLog>) -> Self {
        Self {
            providers: Vec::new(),
            quota,
            outcomes,
        }
    }

    /// Build providers, quotas and outcome log from configuration
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        let quota = Arc::new(QuotaTracker::new());
        let outcomes = Arc::new(OutcomeLog::new(config.server.outcome_log_capacity));
        let mut router = Self::with_outcome_log(quota, outcomes);

        for settings in config.enabled_providers() {
            if let Some(limits) = settings.quota {
                router.quota.set_quota(settings.kind.name(), limits);
            }
            router.add_provider(provider::from_settings(settings));
        }

        router
    }

    /// Register a provider at the lowest priority
    pub fn add_provider(&mut self, provider: Arc<dyn CompletionProvider>) {
        tracing::info!(
            provider = %provider.name(),
            default_model = %provider.default_model(),
            priority = self.providers.len(),
            "Registered provider"
        );
        self.providers.push(provider);
    }

    /// Registered providers, highest priority first
    #[must_use]
    pub fn providers(&self) -> &[Arc<dyn CompletionProvider>] {
        &self.providers
    }

    /// Shared quota tracker
    #[must_use]
    pub fn quota(&self) -> &Arc<QuotaTracker> {
        &self.quota
    }

    /// Shared outcome log
    #[must_use]
    pub fn outcomes(&self) -> &Arc<OutcomeLog> {
        &self.outcomes
    }

    /// Gate one provider; returns the effective model when it should be tried
    async fn admit(
        &self,
        provider: &dyn CompletionProvider,
        request: &CompletionRequest,
        request_id: &str,
    ) -> Option<String> {
        let name = provider.name();
        let model = request.resolve_model(provider.default_model());

        if !self.quota.check_quota(name) {
            let skip = RouterError::QuotaExceeded(name.to_string());
            tracing::warn!(request_id = %request_id, provider = %name, reason = %skip, "Skipping provider");
            self.outcomes.record(
                OutcomeRecord::new(request_id, name, model, OutcomeStatus::RateLimited)
                    .with_error("Quota exceeded"),
            );
            return None;
        }

        if !provider.is_available().await {
            let skip = RouterError::BackendUnavailable(name.to_string());
            tracing::warn!(request_id = %request_id, provider = %name, reason = %skip, "Skipping provider");
            return None;
        }

        Some(model)
    }

    /// Route a request and wait for one complete answer
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::AllProvidersExhausted`] when every provider was
    /// skipped or failed.
    pub async fn route(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, RouterError> {
        let request_id = new_request_id();
        let started = Instant::now();

        for provider in &self.providers {
            let name = provider.name();
            let Some(model) = self.admit(provider.as_ref(), request, &request_id).await else {
                continue;
            };

            tracing::info!(request_id = %request_id, provider = %name, model = %model, "Routing request");

            match provider.complete(&request.for_model(&model)).await {
                Ok(response) => {
                    self.quota.increment_usage(name);
                    self.outcomes.record(
                        OutcomeRecord::new(&request_id, name, &model, OutcomeStatus::Success)
                            .with_duration(started.elapsed())
                            .with_usage(response.usage.as_ref().map(OutcomeUsage::from)),
                    );
                    tracing::info!(
                        request_id = %request_id,
                        provider = %name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Request served"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    let failure = RouterError::BackendError {
                        provider: name.to_string(),
                        message: message.clone(),
                    };
                    tracing::error!(request_id = %request_id, error = %failure, "Provider failed, trying next");
                    self.outcomes.record(
                        OutcomeRecord::new(&request_id, name, &model, OutcomeStatus::Error)
                            .with_duration(started.elapsed())
                            .with_error(message),
                    );
                }
            }
        }

        tracing::error!(request_id = %request_id, "All providers exhausted");
        Err(RouterError::AllProvidersExhausted)
    }

    /// Route a request as a stream
    ///
    /// Every chunk from every attempted provider is forwarded unchanged, so
    /// the receiver sees one logical stream. Exhaustion arrives as a final
    /// `Err` item, possibly after partial chunks. Dropping the receiver stops
    /// the current provider attempt.
    #[must_use]
    pub fn route_stream(&self, request: CompletionRequest) -> RoutedStream {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let router = self.clone();

        tokio::spawn(async move {
            router.run_stream(request, tx).await;
        });

        rx
    }

    async fn run_stream(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<Result<StreamChunk, RouterError>>,
    ) {
        let request_id = new_request_id();
        let started = Instant::now();
        // Survives across attempts
        let mut accumulated = String::new();

        for provider in &self.providers {
            let name = provider.name();
            if tx.is_closed() {
                tracing::info!(request_id = %request_id, provider = %name, "Caller gone before attempt");
                return;
            }
            let Some(model) = self.admit(provider.as_ref(), &request, &request_id).await else {
                continue;
            };

            if !accumulated.is_empty() {
                tracing::debug!(
                    request_id = %request_id,
                    provider = %name,
                    stitched_chars = accumulated.chars().count(),
                    "Stitching partial answer"
                );
            }
            let attempt = request.stitched(&model, &accumulated);

            tracing::info!(request_id = %request_id, provider = %name, model = %model, "Routing stream");
            self.quota.increment_usage(name);

            let mut chars: u64 = 0;
            let result = match provider.complete_stream(&attempt).await {
                Err(e) => Err(format!("{e:#}")),
                Ok(mut events) => loop {
                    let event = tokio::select! {
                        biased;
                        () = tx.closed() => break Err(CALLER_DISCONNECTED.to_string()),
                        event = events.recv() => event,
                    };

                    match event {
                        Some(StreamEvent::Chunk(chunk)) => {
                            let content = chunk.content();
                            accumulated.push_str(content);
                            chars += content.chars().count() as u64;
                            if tx.send(Ok(chunk)).await.is_err() {
                                break Err(CALLER_DISCONNECTED.to_string());
                            }
                        }
                        Some(StreamEvent::Done) | None => break Ok(()),
                        Some(StreamEvent::Error(message)) => break Err(message),
                    }
                },
            };

            let outcome = match &result {
                Ok(()) => OutcomeRecord::new(&request_id, name, &model, OutcomeStatus::Success),
                Err(message) => OutcomeRecord::new(&request_id, name, &model, OutcomeStatus::Error)
                    .with_error(message.clone()),
            };
            self.outcomes.record(
                outcome
                    .with_duration(started.elapsed())
                    .with_usage(Some(OutcomeUsage::chars(chars))),
            );

            match result {
                Ok(()) => {
                    tracing::info!(request_id = %request_id, provider = %name, chars, "Stream served");
                    return;
                }
                Err(message) if message == CALLER_DISCONNECTED => {
                    tracing::info!(request_id = %request_id, provider = %name, chars, "Caller went away mid-stream");
                    return;
                }
                Err(message) => {
                    let failure = RouterError::BackendError {
                        provider: name.to_string(),
                        message,
                    };
                    tracing::error!(request_id = %request_id, error = %failure, chars, "Stream failed, trying next");
                }
            }
        }

        tracing::error!(request_id = %request_id, "All providers exhausted");
        let _ = tx.send(Err(RouterError::AllProvidersExhausted)).await;
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("outcomes", &self.outcomes.len())
            .finish_non_exhaustive()
    }
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::quota::{ManualClock, Quota};
    use crate::routing::test_utils::{collect_stream, MockProvider};
    use crate::types::{ChatMessage, AUTO_MODEL};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn request(model: &str) -> CompletionRequest {
        CompletionRequest::new(model, vec![ChatMessage::user("Say hello")])
    }

    const NOON: u64 = 1_700_049_600_000;

    fn router_with(providers: &[Arc<MockProvider>]) -> Router {
        let clock = Arc::new(ManualClock::new(NOON));
        let mut router = Router::new(Arc::new(QuotaTracker::with_clock(clock)));
        for p in providers {
            router.add_provider(p.clone());
        }
        router
    }

    fn statuses(router: &Router) -> Vec<(String, OutcomeStatus)> {
        let mut records = router.outcomes().recent();
        records.reverse();
        records.into_iter().map(|r| (r.provider, r.status)).collect()
    }

    // ------------------------------------------------------------------------
    // Non-streaming
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_first_provider_serves() {
        let a = Arc::new(MockProvider::new("A"));
        let b = Arc::new(MockProvider::new("B"));
        let router = router_with(&[a.clone(), b.clone()]);

        let response = router.route(&request("m")).await.unwrap();

        assert_eq!(response.content(), "Response from A");
        assert_eq!(b.request_count(), 0);
        assert_eq!(statuses(&router), vec![("A".to_string(), OutcomeStatus::Success)]);
        assert_eq!(router.quota().usage("A").map(|u| u.minute_count), Some(1));
    }

    #[tokio::test]
    async fn test_unavailable_provider_is_skipped_silently() {
        let a = Arc::new(MockProvider::new("A"));
        a.set_available(false);
        let b = Arc::new(MockProvider::new("B"));
        let router = router_with(&[a.clone(), b.clone()]);

        let response = router.route(&request("m")).await.unwrap();

        assert_eq!(response.content(), "Response from B");
        assert_eq!(a.request_count(), 0);
        assert_eq!(statuses(&router), vec![("B".to_string(), OutcomeStatus::Success)]);
        // Skipping does not consume quota
        assert!(router.quota().usage("A").is_none());
    }

    #[tokio::test]
    async fn test_failing_provider_falls_over() {
        let a = Arc::new(MockProvider::new("A"));
        a.fail_with("upstream 500");
        let b = Arc::new(MockProvider::new("B"));
        let router = router_with(&[a.clone(), b.clone()]);

        let response = router.route(&request("m")).await.unwrap();
        assert_eq!(response.content(), "Response from B");

        let records = router.outcomes().recent();
        let failed = records.iter().find(|r| r.provider == "A").unwrap();
        assert_eq!(failed.status, OutcomeStatus::Error);
        assert_eq!(failed.error.as_deref(), Some("upstream 500"));
        assert!(failed.duration.is_some());
        // Both attempts belong to one caller request
        assert_eq!(records[0].request_id, records[1].request_id);
        // Failed non-streaming attempts are not charged
        assert!(router.quota().usage("A").is_none());
    }

    #[tokio::test]
    async fn test_exhaustion_is_generic() {
        let a = Arc::new(MockProvider::new("A"));
        a.set_available(false);
        let b = Arc::new(MockProvider::new("B"));
        b.fail_with("boom");
        let router = router_with(&[a, b]);

        let err = router.route(&request("m")).await.unwrap_err();

        assert_eq!(err, RouterError::AllProvidersExhausted);
        assert_eq!(err.to_string(), "All providers failed or are rate-limited.");
        assert!(router
            .outcomes()
            .recent()
            .iter()
            .all(|r| r.status != OutcomeStatus::Success));
    }

    #[tokio::test]
    async fn test_no_providers_is_exhaustion() {
        let router = Router::new(Arc::new(QuotaTracker::new()));
        assert_eq!(
            router.route(&request("m")).await.unwrap_err(),
            RouterError::AllProvidersExhausted
        );
        assert!(router.outcomes().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_provider_is_never_called() {
        let a = Arc::new(MockProvider::new("A"));
        let b = Arc::new(MockProvider::new("B"));
        let router = router_with(&[a.clone(), b.clone()]);
        router.quota().set_quota("A", Quota::new(1, 100));
        router.quota().increment_usage("A");

        let response = router.route(&request("m")).await.unwrap();

        assert_eq!(response.content(), "Response from B");
        assert_eq!(a.request_count(), 0);
        assert_eq!(a.availability_checks(), 0);

        let limited = &router.outcomes().recent()[1];
        assert_eq!(limited.provider, "A");
        assert_eq!(limited.status, OutcomeStatus::RateLimited);
        assert_eq!(limited.error.as_deref(), Some("Quota exceeded"));
    }

    #[tokio::test]
    async fn test_quota_recovers_next_minute() {
        let clock = Arc::new(ManualClock::new(NOON));
        let quota = Arc::new(QuotaTracker::with_clock(clock.clone()));
        quota.set_quota("A", Quota::new(2, 100));

        let a = Arc::new(MockProvider::new("A"));
        let mut router = Router::new(quota);
        router.add_provider(a.clone());

        router.route(&request("m")).await.unwrap();
        router.route(&request("m")).await.unwrap();
        tokio_test::assert_err!(router.route(&request("m")).await);

        clock.advance(Duration::from_secs(60));
        tokio_test::assert_ok!(router.route(&request("m")).await);
        assert_eq!(a.request_count(), 3);
    }

    #[tokio::test]
    async fn test_auto_model_resolves_per_provider() {
        let a = Arc::new(MockProvider::new("A").with_default_model("X"));
        a.fail_with("nope");
        let b = Arc::new(MockProvider::new("B").with_default_model("Y"));
        let router = router_with(&[a.clone(), b.clone()]);

        let response = router.route(&request(AUTO_MODEL)).await.unwrap();

        assert_eq!(response.model, "Y");
        assert_eq!(a.requests()[0].model, "X");
        assert_eq!(b.requests()[0].model, "Y");
        let models: Vec<_> = router.outcomes().recent().into_iter().map(|r| r.model).collect();
        assert_eq!(models, vec!["Y", "X"]);
    }

    #[tokio::test]
    async fn test_explicit_model_passes_through() {
        let a = Arc::new(MockProvider::new("A").with_default_model("X"));
        let router = router_with(&[a.clone()]);

        router.route(&request("llama3")).await.unwrap();
        assert_eq!(a.requests()[0].model, "llama3");
        assert_eq!(router.outcomes().recent()[0].model, "llama3");
    }

    #[tokio::test]
    async fn test_caller_request_is_not_mutated() {
        let a = Arc::new(MockProvider::new("A").with_default_model("X"));
        let router = router_with(&[a]);
        let original = request(AUTO_MODEL);
        let copy = original.clone();

        router.route(&original).await.unwrap();
        assert_eq!(original, copy);
    }

    // ------------------------------------------------------------------------
    // Streaming
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_stream_stitches_after_mid_stream_failure() {
        let a = Arc::new(MockProvider::new("A"));
        a.stream_deltas(&["Hel", "lo"]);
        a.fail_stream_after_deltas("connection reset");
        let b = Arc::new(MockProvider::new("B"));
        b.stream_deltas(&[" World"]);
        let router = router_with(&[a.clone(), b.clone()]);

        let (text, error) = collect_stream(router.route_stream(request("m").with_stream(true))).await;

        assert_eq!(text, "Hello World");
        assert_eq!(error, None);

        let sent = b.requests();
        assert_eq!(
            sent[0].messages.last(),
            Some(&ChatMessage::assistant("Hello"))
        );
        assert_eq!(sent[0].messages.len(), 2);

        let records = router.outcomes().recent();
        assert_eq!(records[1].provider, "A");
        assert_eq!(records[1].status, OutcomeStatus::Error);
        assert_eq!(records[1].error.as_deref(), Some("connection reset"));
        assert_eq!(records[1].usage, Some(OutcomeUsage::chars(5)));
        assert_eq!(records[0].provider, "B");
        assert_eq!(records[0].status, OutcomeStatus::Success);
        assert_eq!(records[0].usage, Some(OutcomeUsage::chars(6)));
    }

    #[tokio::test]
    async fn test_stream_zero_chunk_failure_sends_original_messages() {
        let a = Arc::new(MockProvider::new("A"));
        a.fail_stream_open("refused");
        let b = Arc::new(MockProvider::new("B"));
        b.stream_deltas(&["Hi"]);
        let router = router_with(&[a.clone(), b.clone()]);
        let original = request("m");

        let (text, _) = collect_stream(router.route_stream(original.clone())).await;

        assert_eq!(text, "Hi");
        assert_eq!(b.requests()[0].messages, original.messages);
        // Streaming attempts are charged up front, even when they fail
        assert_eq!(router.quota().usage("A").map(|u| u.minute_count), Some(1));
        assert_eq!(router.quota().usage("B").map(|u| u.minute_count), Some(1));
    }

    #[tokio::test]
    async fn test_stream_success_stops_routing() {
        let a = Arc::new(MockProvider::new("A"));
        a.stream_deltas(&["done"]);
        let b = Arc::new(MockProvider::new("B"));
        let router = router_with(&[a, b.clone()]);

        let (text, error) = collect_stream(router.route_stream(request("m"))).await;
        assert_eq!(text, "done");
        assert_eq!(error, None);
        assert_eq!(b.request_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_exhaustion_after_partial_output() {
        let a = Arc::new(MockProvider::new("A"));
        a.stream_deltas(&["par"]);
        a.fail_stream_after_deltas("cut");
        let b = Arc::new(MockProvider::new("B"));
        b.stream_deltas(&["tial"]);
        b.fail_stream_after_deltas("cut again");
        let router = router_with(&[a, b.clone()]);

        let (text, error) = collect_stream(router.route_stream(request("m"))).await;

        assert_eq!(text, "partial");
        assert_eq!(error, Some(RouterError::AllProvidersExhausted));
        assert_eq!(
            b.requests()[0].messages.last(),
            Some(&ChatMessage::assistant("par"))
        );
    }

    #[tokio::test]
    async fn test_stream_stitching_accumulates_across_attempts() {
        let a = Arc::new(MockProvider::new("A"));
        a.stream_deltas(&["one "]);
        a.fail_stream_after_deltas("x");
        let b = Arc::new(MockProvider::new("B"));
        b.stream_deltas(&["two "]);
        b.fail_stream_after_deltas("y");
        let c = Arc::new(MockProvider::new("C"));
        c.stream_deltas(&["three"]);
        let router = router_with(&[a, b, c.clone()]);

        let (text, _) = collect_stream(router.route_stream(request("m"))).await;

        assert_eq!(text, "one two three");
        let messages = &c.requests()[0].messages;
        // One synthetic message carrying everything so far
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], ChatMessage::assistant("one two "));
    }

    #[tokio::test]
    async fn test_stream_skips_rate_limited_and_unavailable() {
        let a = Arc::new(MockProvider::new("A"));
        let b = Arc::new(MockProvider::new("B"));
        b.set_available(false);
        let c = Arc::new(MockProvider::new("C").with_default_model("Z"));
        c.stream_deltas(&["ok"]);
        let router = router_with(&[a.clone(), b, c]);
        router.quota().set_quota("A", Quota::new(0, 0));

        let (text, _) = collect_stream(router.route_stream(request(AUTO_MODEL))).await;

        assert_eq!(text, "ok");
        assert_eq!(a.request_count(), 0);
        assert_eq!(
            statuses(&router),
            vec![
                ("A".to_string(), OutcomeStatus::RateLimited),
                ("C".to_string(), OutcomeStatus::Success),
            ]
        );
        assert_eq!(router.outcomes().recent()[0].model, "Z");
    }

    #[tokio::test]
    async fn test_dropped_receiver_stops_attempt() {
        let a = Arc::new(MockProvider::new("A"));
        a.stream_deltas(&["Hello"]);
        a.hold_stream_open();
        let b = Arc::new(MockProvider::new("B"));
        let router = router_with(&[a, b.clone()]);

        let mut rx = router.route_stream(request("m"));
        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.content(), "Hello");
        drop(rx);

        let mut record = None;
        for _ in 0..100 {
            if let Some(r) = router.outcomes().recent().into_iter().next() {
                record = Some(r);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let record = record.expect("outcome recorded after disconnect");
        assert_eq!(record.status, OutcomeStatus::Error);
        assert_eq!(record.error.as_deref(), Some(CALLER_DISCONNECTED));
        assert_eq!(record.usage, Some(OutcomeUsage::chars(5)));
        assert_eq!(b.request_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_caller_charges_no_further_provider() {
        let a = Arc::new(MockProvider::new("A"));
        a.fail_stream_open("refused");
        let b = Arc::new(MockProvider::new("B"));
        let router = router_with(&[a.clone(), b.clone()]);

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        drop(rx);
        router.run_stream(request("m"), tx).await;

        assert_eq!(a.request_count(), 0);
        assert_eq!(b.request_count(), 0);
        assert_eq!(router.quota().usage("A"), None);
        assert_eq!(router.quota().usage("B"), None);
        assert!(router.outcomes().is_empty());
    }

    /// Fails to open only after the test lets it
    struct GatedFailure {
        entered: Arc<tokio::sync::Notify>,
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait::async_trait]
    impl CompletionProvider for GatedFailure {
        fn name(&self) -> &str {
            "Gated"
        }

        fn default_model(&self) -> &str {
            "gated-1"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn complete(&self, _: &CompletionRequest) -> anyhow::Result<CompletionResponse> {
            anyhow::bail!("unused")
        }

        async fn complete_stream(
            &self,
            _: &CompletionRequest,
        ) -> anyhow::Result<crate::provider::StreamReceiver> {
            self.entered.notify_one();
            self.release.notified().await;
            anyhow::bail!("refused")
        }
    }

    #[tokio::test]
    async fn test_caller_leaving_during_failed_open_stops_routing() {
        let entered = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let b = Arc::new(MockProvider::new("B"));
        b.stream_deltas(&["late"]);

        let mut router = Router::new(Arc::new(QuotaTracker::new()));
        router.add_provider(Arc::new(GatedFailure {
            entered: entered.clone(),
            release: release.clone(),
        }));
        router.add_provider(b.clone());

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let task = {
            let router = router.clone();
            tokio::spawn(async move { router.run_stream(request("m"), tx).await })
        };

        entered.notified().await;
        drop(rx);
        release.notify_one();
        task.await.unwrap();

        assert_eq!(b.request_count(), 0);
        assert_eq!(router.quota().usage("B"), None);
        assert_eq!(
            statuses(&router),
            vec![("Gated".to_string(), OutcomeStatus::Error)]
        );
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_quota() {
        let a = Arc::new(MockProvider::new("A"));
        let b = Arc::new(MockProvider::new("B"));
        let router = router_with(&[a.clone(), b.clone()]);
        router.quota().set_quota("A", Quota::new(5, 100));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let router = router.clone();
                tokio::spawn(async move { router.route(&request("m")).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(a.request_count() + b.request_count(), 20);
        assert!(a.request_count() >= 5);
        assert_eq!(
            router.quota().usage("A").map(|u| u.minute_count),
            Some(a.request_count() as u64)
        );
    }
}
