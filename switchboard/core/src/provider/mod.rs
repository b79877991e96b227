//! Completion Providers
//!
//! Abstracted access to chat-completion backends through the
//! [`CompletionProvider`] trait. The router only ever sees
//! `Arc<dyn CompletionProvider>`.
//!
//! # Available Providers
//!
//! - **Gemini**: Google Generative Language REST API
//! - **HuggingFace**: inference router (OpenAI-compatible)
//! - **OpenRouter**: OpenAI-compatible aggregator
//! - **Ollama**: Local LLM server
//!
//! # Usage
//!
//! ```ignore
//! use switchboard_core::provider::{CompletionProvider, OllamaProvider};
//! use switchboard_core::types::{ChatMessage, CompletionRequest};
//!
//! let provider = OllamaProvider::default();
//! let request = CompletionRequest::new("llama2", vec![ChatMessage::user("Hello!")]);
//! let rx = provider.complete_stream(&request).await?;
//! ```

mod gemini;
mod ollama;
mod openai_compat;
pub mod stream;
mod traits;

use std::sync::Arc;
use std::time::Duration;

pub use gemini::{flatten_prompt, GeminiProvider, GEMINI_BASE_URL};
pub use ollama::OllamaProvider;
pub use openai_compat::{
    ModelCatalog, OpenAiCompatProvider, HUGGINGFACE_BASE_URL, OPENROUTER_BASE_URL,
};
pub use traits::{CompletionProvider, StreamEvent, StreamReceiver, STREAM_CHANNEL_CAPACITY};

use crate::config::{ProviderKind, ProviderSettings};

/// Shared HTTP client settings for every adapter
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Turn a non-2xx response into an error carrying status and body
pub(crate) async fn ensure_success(
    provider: &str,
    response: reqwest::Response,
) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!("{provider} returned {status}: {body}")
}

/// Response/chunk id such as `ollama-1718000000000`
pub(crate) fn response_id(prefix: &str) -> String {
    format!("{prefix}-{}", chrono::Utc::now().timestamp_millis())
}

/// Build the adapter described by `settings`
pub fn from_settings(settings: &ProviderSettings) -> Arc<dyn CompletionProvider> {
    let api_key = settings.api_key.clone();
    let model = settings.default_model.clone();

    match settings.kind {
        ProviderKind::Gemini => {
            let provider = GeminiProvider::new(api_key, model);
            match &settings.base_url {
                Some(url) => Arc::new(provider.with_base_url(url)),
                None => Arc::new(provider),
            }
        }
        ProviderKind::HuggingFace => {
            let provider = OpenAiCompatProvider::huggingface(api_key, model);
            match &settings.base_url {
                Some(url) => Arc::new(provider.with_base_url(url)),
                None => Arc::new(provider),
            }
        }
        ProviderKind::OpenRouter => {
            let provider = OpenAiCompatProvider::openrouter(api_key, model);
            match &settings.base_url {
                Some(url) => Arc::new(provider.with_base_url(url)),
                None => Arc::new(provider),
            }
        }
        ProviderKind::Ollama => {
            let base_url = settings
                .base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string());
            Arc::new(OllamaProvider::new(base_url, model))
        }
    }
}
