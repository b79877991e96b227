//! Quota-Aware Failover Routing
//!
//! Delivers each request to exactly one provider, moving down a fixed
//! priority list when a provider is over quota, unavailable, or fails.
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |      Router      |  <-- Entry point: route() / route_stream()
//! +--------+---------+
//!          |
//!    +-----+-------------+
//!    |                   |
//!    v                   v
//! +--------------+  +--------------+
//! | QuotaTracker |  |  OutcomeLog  |  <-- Shared, injected state
//! +--------------+  +--------------+
//!          |
//!          v
//! +------------------+
//! | CompletionProvider|  <-- Gemini, HuggingFace, OpenRouter, Ollama
//! +------------------+
//! ```
//!
//! # Design Principles
//!
//! 1. **Positional Priority**: providers are tried in registration order, never reordered
//! 2. **One at a Time**: a request never races several providers
//! 3. **Charge Attempts**: quota protects the provider's rate limit, not the caller's success rate
//! 4. **Generic Failure**: callers see one exhaustion error; the outcome log keeps the detail

pub mod outcome;
pub mod quota;
pub mod router;

#[cfg(test)]
pub mod test_utils;

pub use outcome::{OutcomeLog, OutcomeRecord, OutcomeStatus, OutcomeUsage, DEFAULT_OUTCOME_CAPACITY};
pub use quota::{Clock, ManualClock, Quota, QuotaStats, QuotaTracker, SystemClock, UsageWindow};
pub use router::{RoutedStream, Router, RouterError};
