//! Routing Outcome Log
//!
//! Bounded, append-only record of every provider attempt. This is operator
//! data (served by the dashboard), separate from process logging: the caller
//! only ever sees a generic exhaustion error, while the full per-attempt trail
//! lives here.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::Usage;

/// Records retained when no capacity is configured
pub const DEFAULT_OUTCOME_CAPACITY: usize = 100;

/// Result of one provider attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The provider answered (or finished its stream)
    Success,
    /// The provider failed; routing moved on
    Error,
    /// Skipped because the provider's quota was exhausted
    RateLimited,
}

/// Usage attached to an outcome
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeUsage {
    /// Prompt tokens reported by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    /// Completion tokens reported by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    /// Total tokens reported by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
    /// Characters streamed during the attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chars: Option<u64>,
}

impl OutcomeUsage {
    /// Usage for a streaming attempt
    #[must_use]
    pub fn chars(chars: u64) -> Self {
        Self {
            chars: Some(chars),
            ..Self::default()
        }
    }
}

impl From<&Usage> for OutcomeUsage {
    fn from(usage: &Usage) -> Self {
        Self {
            prompt_tokens: Some(usage.prompt_tokens),
            completion_tokens: Some(usage.completion_tokens),
            total_tokens: Some(usage.total_tokens),
            chars: None,
        }
    }
}

/// One provider attempt for one caller request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    /// Random record id
    pub id: String,
    /// Groups every attempt of one caller request
    pub request_id: String,
    /// RFC 3339 time the record was created
    pub timestamp: String,
    /// Provider name
    pub provider: String,
    /// Effective model sent to the provider
    pub model: String,
    /// Attempt result
    pub status: OutcomeStatus,
    /// Milliseconds since the caller request started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Failure text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Token or character counts, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<OutcomeUsage>,
}

impl OutcomeRecord {
    /// Create a record stamped with a fresh id and the current time
    pub fn new(
        request_id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        status: OutcomeStatus,
    ) -> Self {
        Self {
            id: short_id(),
            request_id: request_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            provider: provider.into(),
            model: model.into(),
            status,
            duration: None,
            error: None,
            usage: None,
        }
    }

    /// Set elapsed time
    #[must_use]
    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Set failure text
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Set usage
    #[must_use]
    pub fn with_usage(mut self, usage: Option<OutcomeUsage>) -> Self {
        self.usage = usage;
        self
    }
}

fn short_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Ring of the most recent outcomes, oldest evicted first
#[derive(Debug)]
pub struct OutcomeLog {
    /// Newest at the front
    records: Mutex<VecDeque<OutcomeRecord>>,
    capacity: usize,
}

impl Default for OutcomeLog {
    fn default() -> Self {
        Self::new(DEFAULT_OUTCOME_CAPACITY)
    }
}

impl OutcomeLog {
    /// Create a log holding at most `capacity` records (minimum one)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a record, evicting the oldest when full
    pub fn record(&self, record: OutcomeRecord) {
        let mut records = self.records.lock();
        records.push_front(record);
        records.truncate(self.capacity);
    }

    /// All retained records, newest first
    #[must_use]
    pub fn recent(&self) -> Vec<OutcomeRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// At most `limit` records, newest first
    #[must_use]
    pub fn recent_n(&self, limit: usize) -> Vec<OutcomeRecord> {
        self.records.lock().iter().take(limit).cloned().collect()
    }

    /// Retained records of one caller request, newest first
    #[must_use]
    pub fn for_request(&self, request_id: &str) -> Vec<OutcomeRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.request_id == request_id)
            .cloned()
            .collect()
    }

    /// Number of retained records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Maximum retained records
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
