//! OpenAI-Compatible Providers
//!
//! OpenRouter and the HuggingFace inference router both speak the OpenAI
//! chat-completions dialect: `POST {base}/chat/completions` with bearer auth,
//! and an SSE stream of `data: {...}` lines ending with `data: [DONE]`.
//! One client covers both; they differ only in base URL, headers and how the
//! model catalog is obtained.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::stream::{spawn_line_stream, LineAction, LineDecoder};
use super::traits::{CompletionProvider, StreamReceiver};
use super::{ensure_success, http_client};
use crate::types::{CompletionRequest, CompletionResponse, ModelDetail, StreamChunk};

/// OpenRouter API root
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// HuggingFace inference router API root
pub const HUGGINGFACE_BASE_URL: &str = "https://router.huggingface.co/v1";

/// Where the model list comes from
#[derive(Clone, Debug)]
pub enum ModelCatalog {
    /// `GET {base}/models`
    Remote,
    /// A fixed list
    Fixed(Vec<ModelDetail>),
}

/// Client for an OpenAI-compatible chat-completions API
#[derive(Clone)]
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    catalog: ModelCatalog,
    headers: Vec<(&'static str, String)>,
    max_tokens: Option<u32>,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ModelsReply {
    #[serde(default)]
    data: Vec<ModelDetail>,
}

impl OpenAiCompatProvider {
    /// Create a client for any OpenAI-compatible endpoint
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.is_empty()),
            default_model: default_model.into(),
            catalog: ModelCatalog::Remote,
            headers: Vec::new(),
            max_tokens: None,
            http_client: http_client(),
        }
    }

    /// OpenRouter with its remote model catalog
    pub fn openrouter(api_key: Option<String>, default_model: impl Into<String>) -> Self {
        Self::new("OpenRouter", OPENROUTER_BASE_URL, api_key, default_model)
            .with_header("HTTP-Referer", "https://github.com/switchboard-llm/switchboard")
            .with_header("X-Title", "switchboard")
    }

    /// HuggingFace router with a curated model list
    pub fn huggingface(api_key: Option<String>, default_model: impl Into<String>) -> Self {
        Self::new("HuggingFace", HUGGINGFACE_BASE_URL, api_key, default_model)
            .with_catalog(ModelCatalog::Fixed(huggingface_models()))
            .with_max_tokens(1024)
    }

    /// Point at a different API root
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Replace the model catalog
    #[must_use]
    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Send an extra header on every completion request
    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Cap generated tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn model_for<'a>(&'a self, request: &'a CompletionRequest) -> &'a str {
        if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        }
    }

    fn post(&self, request: &CompletionRequest, stream: bool) -> reqwest::RequestBuilder {
        let mut body = serde_json::json!({
            "model": self.model_for(request),
            "messages": request.messages,
        });
        if stream {
            body["stream"] = serde_json::Value::Bool(true);
        }
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::Value::from(max_tokens);
        }

        let mut builder = self.http_client.post(self.completions_url()).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        for (name, value) in &self.headers {
            builder = builder.header(*name, value);
        }
        builder
    }

    fn fallback_models(&self) -> Vec<ModelDetail> {
        vec![ModelDetail::new(self.default_model.clone())
            .with_name(format!("Default {} Model", self.name))]
    }
}

fn huggingface_models() -> Vec<ModelDetail> {
    [
        (
            "microsoft/Phi-3-mini-4k-instruct",
            "Phi-3 Mini",
            "Lightweight, state-of-the-art open model by Microsoft",
        ),
        (
            "mistralai/Mistral-7B-Instruct-v0.3",
            "Mistral 7B v0.3",
            "Powerful 7B model for chat and code",
        ),
        (
            "HuggingFaceH4/zephyr-7b-beta",
            "Zephyr 7B Beta",
            "Fine-tuned version of Mistral 7B, great for chat",
        ),
        (
            "google/gemma-7b-it",
            "Gemma 7B IT",
            "Google open model, instruction tuned",
        ),
        (
            "meta-llama/Meta-Llama-3-8B-Instruct",
            "Llama 3 8B",
            "Meta latest 8B model, high performance",
        ),
    ]
    .into_iter()
    .map(|(id, name, description)| {
        ModelDetail::new(id)
            .with_name(name)
            .with_description(description)
    })
    .collect()
}

/// Decodes `data: ` SSE lines
struct SseLines {
    model: String,
}

impl LineDecoder for SseLines {
    fn decode(&mut self, line: &str) -> LineAction {
        let Some(data) = line.strip_prefix("data:") else {
            // Comments (": keep-alive") and other SSE fields
            return LineAction::Skip;
        };
        let data = data.trim();
        if data == "[DONE]" {
            return LineAction::Finish;
        }

        match serde_json::from_str::<StreamChunk>(data) {
            Ok(mut chunk) => {
                if chunk.model.is_empty() {
                    chunk.model = self.model.clone();
                }
                LineAction::Emit(chunk)
            }
            Err(_) => LineAction::Skip,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionResponse> {
        let response = self.post(request, false).send().await?;
        let response = ensure_success(&self.name, response).await?;

        let mut completion: CompletionResponse = response.json().await?;
        if completion.model.is_empty() {
            completion.model = self.model_for(request).to_string();
        }
        Ok(completion)
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> anyhow::Result<StreamReceiver> {
        let response = self.post(request, true).send().await?;
        let response = ensure_success(&self.name, response).await?;

        Ok(spawn_line_stream(
            response,
            SseLines {
                model: self.model_for(request).to_string(),
            },
        ))
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelDetail>> {
        match &self.catalog {
            ModelCatalog::Fixed(models) => Ok(models.clone()),
            ModelCatalog::Remote => {
                let fetched = async {
                    let response = self
                        .http_client
                        .get(format!("{}/models", self.base_url))
                        .timeout(Duration::from_secs(10))
                        .send()
                        .await?;
                    let response = ensure_success(&self.name, response).await?;
                    anyhow::Ok(response.json::<ModelsReply>().await?.data)
                }
                .await;

                match fetched {
                    Ok(models) => Ok(models),
                    Err(e) => {
                        tracing::warn!(provider = %self.name, error = %e, "Failed to list models");
                        Ok(self.fallback_models())
                    }
                }
            }
        }
    }
}
