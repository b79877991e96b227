//! Per-Provider Quota Tracking
//!
//! Counts requests per provider in fixed wall-clock windows (one minute and one
//! day) and compares them against configured limits.
//!
//! # Design
//!
//! - Windows are bucket-based, not sliding: bucket = `floor(now / 60s)` for the
//!   minute window and `floor(now / 86400s)` for the day window
//! - Counters reset lazily the first time they are touched in a new bucket,
//!   on both check and increment
//! - Minute and day windows are independent; a request must fit both
//! - A provider without a registered quota is unlimited
//!
//! A provider can burst up to twice its per-minute limit across a bucket
//! boundary. That approximation is accepted.
//!
//! # Usage
//!
//! ```
//! use switchboard_core::routing::quota::{Quota, QuotaTracker};
//!
//! let tracker = QuotaTracker::new();
//! tracker.set_quota("Gemini", Quota::new(10, 1000));
//!
//! assert!(tracker.check_quota("Gemini"));
//! tracker.increment_usage("Gemini");
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

const MINUTE_MILLIS: u64 = 60_000;
const DAY_MILLIS: u64 = 86_400_000;

// =============================================================================
// Clock
// =============================================================================

/// Wall-clock source for bucket computation
pub trait Clock: Send + Sync + fmt::Debug {
    /// Milliseconds since the unix epoch
    fn now_millis(&self) -> u64;
}

/// The real system clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Start at the given epoch milliseconds
    #[must_use]
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Jump to an absolute time
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Move forward
    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Quota and usage windows
// =============================================================================

/// Request limits for one provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    /// Requests allowed per wall-clock minute
    pub requests_per_minute: u64,
    /// Requests allowed per wall-clock day (UTC)
    pub requests_per_day: u64,
}

impl Quota {
    /// Create a quota
    #[must_use]
    pub fn new(requests_per_minute: u64, requests_per_day: u64) -> Self {
        Self {
            requests_per_minute,
            requests_per_day,
        }
    }
}

/// Minute and day bucket numbers for one instant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Buckets {
    minute: u64,
    day: u64,
}

impl Buckets {
    fn at(millis: u64) -> Self {
        Self {
            minute: millis / MINUTE_MILLIS,
            day: millis / DAY_MILLIS,
        }
    }
}

/// Request counters for one provider
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UsageWindow {
    /// Requests in the current minute bucket
    pub minute_count: u64,
    /// Requests in the current day bucket
    pub day_count: u64,
    /// Minute bucket the counter belongs to
    pub last_minute_bucket: u64,
    /// Day bucket the counter belongs to
    pub last_day_bucket: u64,
}

impl UsageWindow {
    fn starting_at(buckets: Buckets) -> Self {
        Self {
            minute_count: 0,
            day_count: 0,
            last_minute_bucket: buckets.minute,
            last_day_bucket: buckets.day,
        }
    }

    /// Zero any counter whose bucket has moved. Idempotent for a given `now`.
    fn roll_over(&mut self, now: Buckets) {
        if self.last_minute_bucket != now.minute {
            self.minute_count = 0;
            self.last_minute_bucket = now.minute;
        }
        if self.last_day_bucket != now.day {
            self.day_count = 0;
            self.last_day_bucket = now.day;
        }
    }
}

/// Snapshot row returned by [`QuotaTracker::stats`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct QuotaStats {
    /// Requests in the current minute bucket (as last recorded)
    pub minute: u64,
    /// Requests in the current day bucket (as last recorded)
    pub day: u64,
    /// Configured limit, `None` when unlimited
    pub quota: Option<Quota>,
}

// =============================================================================
// Tracker
// =============================================================================

/// Shared quota state for every provider
///
/// Safe to use from many in-flight requests at once: each provider's counter
/// pair is updated under its own map-shard lock, so increments are never lost.
pub struct QuotaTracker {
    /// Configured limits (`provider` -> quota)
    quotas: RwLock<HashMap<String, Quota>>,
    /// Usage counters, created on first check or increment
    windows: DashMap<String, UsageWindow>,
    /// Time source
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for QuotaTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaTracker")
            .field("quotas", &self.quotas.read().len())
            .field("windows", &self.windows.len())
            .field("clock", &self.clock)
            .finish()
    }
}

impl Default for QuotaTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl QuotaTracker {
    /// Create a tracker on the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a tracker on a custom clock
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            quotas: RwLock::new(HashMap::new()),
            windows: DashMap::new(),
            clock,
        }
    }

    /// Register or replace the limit for a provider. Usage counters are untouched.
    pub fn set_quota(&self, provider: impl Into<String>, quota: Quota) {
        self.quotas.write().insert(provider.into(), quota);
    }

    /// Configured limit for a provider
    #[must_use]
    pub fn quota(&self, provider: &str) -> Option<Quota> {
        self.quotas.read().get(provider).copied()
    }

    /// Whether the provider may take another request right now.
    ///
    /// Rolls stale windows over before comparing; never increments.
    pub fn check_quota(&self, provider: &str) -> bool {
        let Some(quota) = self.quota(provider) else {
            return true;
        };

        let now = Buckets::at(self.clock.now_millis());
        let window = {
            let mut entry = self
                .windows
                .entry(provider.to_string())
                .or_insert_with(|| UsageWindow::starting_at(now));
            entry.roll_over(now);
            *entry
        };

        if window.minute_count >= quota.requests_per_minute {
            tracing::debug!(
                provider,
                current = window.minute_count,
                limit = quota.requests_per_minute,
                "Minute quota exhausted"
            );
            return false;
        }

        if window.day_count >= quota.requests_per_day {
            tracing::debug!(
                provider,
                current = window.day_count,
                limit = quota.requests_per_day,
                "Daily quota exhausted"
            );
            return false;
        }

        true
    }

    /// Charge one request to the provider's current windows
    pub fn increment_usage(&self, provider: &str) {
        let now = Buckets::at(self.clock.now_millis());
        let mut entry = self
            .windows
            .entry(provider.to_string())
            .or_insert_with(|| UsageWindow::starting_at(now));
        entry.roll_over(now);
        entry.minute_count += 1;
        entry.day_count += 1;
    }

    /// Raw counters for a provider, as last recorded
    #[must_use]
    pub fn usage(&self, provider: &str) -> Option<UsageWindow> {
        self.windows.get(provider).map(|entry| *entry)
    }

    /// Snapshot over every provider that has a quota or recorded usage
    #[must_use]
    pub fn stats(&self) -> BTreeMap<String, QuotaStats> {
        let quotas = self.quotas.read().clone();
        let mut stats: BTreeMap<String, QuotaStats> = quotas
            .iter()
            .map(|(name, quota)| {
                (
                    name.clone(),
                    QuotaStats {
                        minute: 0,
                        day: 0,
                        quota: Some(*quota),
                    },
                )
            })
            .collect();

        for entry in &self.windows {
            let row = stats.entry(entry.key().clone()).or_insert(QuotaStats {
                minute: 0,
                day: 0,
                quota: None,
            });
            row.minute = entry.minute_count;
            row.day = entry.day_count;
        }

        stats
    }
}
