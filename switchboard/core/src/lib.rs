//! Switchboard Core - Quota-Aware Failover for Chat Completions
//!
//! This crate accepts an OpenAI-style chat-completion request and delivers it
//! to exactly one of several interchangeable backends, moving on to the next
//! one when the current backend is over quota, unavailable, or fails, even
//! in the middle of a streamed answer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     HTTP front door (daemon)                  │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ route() / route_stream()
//! ┌──────────────────────────────┼───────────────────────────────┐
//! │                       SWITCHBOARD CORE                        │
//! │  ┌───────────────────────────┴─────────────────────────────┐ │
//! │  │                         Router                          │ │
//! │  │  ┌──────────────┐  ┌──────────────┐  ┌───────────────┐  │ │
//! │  │  │ QuotaTracker │  │  OutcomeLog  │  │   Providers   │  │ │
//! │  │  │ (minute/day) │  │ (bounded)    │  │ (priority)    │  │ │
//! │  │  └──────────────┘  └──────────────┘  └───────┬───────┘  │ │
//! │  └──────────────────────────────────────────────┼──────────┘ │
//! └─────────────────────────────────────────────────┼────────────┘
//!                                                   │
//!           Gemini ─ HuggingFace ─ OpenRouter ─ Ollama
//! ```
//!
//! # Key Types
//!
//! - [`Router`]: Tries providers in order, stitches failed streams together
//! - [`QuotaTracker`]: Per-provider request counts in minute/day buckets
//! - [`OutcomeLog`]: Bounded record of every provider attempt
//! - [`CompletionProvider`]: The capability every backend implements
//! - [`GatewayConfig`]: File/env/CLI layered configuration
//!
//! # Quick Start
//!
//! ```ignore
//! use switchboard_core::{load_config, ChatMessage, CompletionRequest, Router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let router = Router::from_config(&config);
//!
//!     let request = CompletionRequest::new("auto", vec![ChatMessage::user("Hello!")]);
//!     let response = router.route(&request).await?;
//!     println!("{}", response.content());
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`types`]: Request, response and chunk shapes (OpenAI wire format)
//! - [`routing`]: Router, quota tracker and outcome log
//! - [`provider`]: Provider trait and the concrete HTTP adapters
//! - [`config`]: TOML configuration with env and CLI overrides
//! - [`leaderboard`]: Arena scores for model listings

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod leaderboard;
pub mod provider;
pub mod routing;
pub mod types;

// Routing exports
pub use routing::{
    OutcomeLog, OutcomeRecord, OutcomeStatus, OutcomeUsage, Quota, QuotaStats, QuotaTracker,
    RoutedStream, Router, RouterError,
};

// Provider exports
pub use provider::{
    CompletionProvider, GeminiProvider, OllamaProvider, OpenAiCompatProvider, StreamEvent,
    StreamReceiver,
};

// Type exports
pub use types::{
    ChatMessage, CompletionRequest, CompletionResponse, ModelDetail, StreamChunk, Usage,
    AUTO_MODEL,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, GatewayConfig, ProviderKind, ProviderSettings, ServerSettings,
};
