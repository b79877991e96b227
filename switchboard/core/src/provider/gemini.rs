//! Gemini Provider
//!
//! Google's Generative Language REST API:
//! - `POST /models/{model}:generateContent` for single answers
//! - `POST /models/{model}:streamGenerateContent?alt=sse` for streams
//! - `GET /models` for the catalog
//!
//! The conversation is flattened into one `role: content` prompt.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::stream::{spawn_line_stream, LineAction, LineDecoder};
use super::traits::{CompletionProvider, StreamReceiver};
use super::{ensure_success, http_client, response_id};
use crate::types::{
    ChatMessage, CompletionRequest, CompletionResponse, ModelDetail, StreamChunk, Usage,
};

/// Generative Language API root
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini provider client
#[derive(Clone)]
pub struct GeminiProvider {
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateReply {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct ModelsReply {
    #[serde(default)]
    models: Vec<GeminiModel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiModel {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

impl GenerateReply {
    /// Concatenated text of the first candidate
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Join the conversation into a single prompt
pub fn flatten_prompt(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

impl GeminiProvider {
    /// Create a Gemini client
    pub fn new(api_key: Option<String>, default_model: impl Into<String>) -> Self {
        Self {
            base_url: GEMINI_BASE_URL.to_string(),
            api_key: api_key.filter(|key| !key.is_empty()),
            default_model: default_model.into(),
            http_client: http_client(),
        }
    }

    /// Point at a different API root
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn model_for<'a>(&'a self, request: &'a CompletionRequest) -> &'a str {
        if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        }
    }

    fn key(&self) -> anyhow::Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Gemini API key is not configured"))
    }

    fn body(request: &CompletionRequest) -> serde_json::Value {
        serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": flatten_prompt(&request.messages) }]
            }]
        })
    }
}

/// Decodes `data: ` SSE lines carrying partial `GenerateReply` objects
struct GeminiLines {
    model: String,
}

impl LineDecoder for GeminiLines {
    fn decode(&mut self, line: &str) -> LineAction {
        let Some(data) = line.strip_prefix("data:") else {
            return LineAction::Skip;
        };
        match serde_json::from_str::<GenerateReply>(data.trim()) {
            Ok(reply) => {
                LineAction::Emit(StreamChunk::delta(response_id("gemini"), &self.model, reply.text()))
            }
            Err(_) => LineAction::Skip,
        }
    }

    fn finish(&mut self) -> Option<StreamChunk> {
        Some(StreamChunk::stop(response_id("gemini"), &self.model))
    }
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    fn name(&self) -> &str {
        "Gemini"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionResponse> {
        let model = self.model_for(request).to_string();
        let response = self
            .http_client
            .post(format!("{}/models/{model}:generateContent", self.base_url))
            .query(&[("key", self.key()?)])
            .json(&Self::body(request))
            .send()
            .await?;
        let response = ensure_success(self.name(), response).await?;

        let reply: GenerateReply = response.json().await?;
        let mut completion = CompletionResponse::single(response_id("gemini"), model, reply.text());
        if let Some(meta) = reply.usage_metadata {
            completion = completion.with_usage(Usage::new(
                meta.prompt_token_count,
                meta.candidates_token_count,
            ));
        }
        Ok(completion)
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> anyhow::Result<StreamReceiver> {
        let model = self.model_for(request).to_string();
        let response = self
            .http_client
            .post(format!("{}/models/{model}:streamGenerateContent", self.base_url))
            .query(&[("alt", "sse"), ("key", self.key()?)])
            .json(&Self::body(request))
            .send()
            .await?;
        let response = ensure_success(self.name(), response).await?;

        Ok(spawn_line_stream(response, GeminiLines { model }))
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelDetail>> {
        let Ok(key) = self.key() else {
            return Ok(Vec::new());
        };

        let fetched = async {
            let response = self
                .http_client
                .get(format!("{}/models", self.base_url))
                .query(&[("key", key)])
                .timeout(Duration::from_secs(10))
                .send()
                .await?;
            let response = ensure_success(self.name(), response).await?;
            anyhow::Ok(response.json::<ModelsReply>().await?.models)
        }
        .await;

        match fetched {
            Ok(models) => Ok(models
                .into_iter()
                .filter(|m| {
                    m.supported_generation_methods
                        .iter()
                        .any(|method| method == "generateContent")
                })
                .map(|m| {
                    let id = m.name.strip_prefix("models/").unwrap_or(&m.name).to_string();
                    let mut detail = ModelDetail::new(id);
                    detail.name = m.display_name;
                    detail.description = m.description;
                    detail
                })
                .collect()),
            Err(e) => {
                tracing::warn!(provider = "Gemini", error = %e, "Failed to list models");
                Ok(vec![ModelDetail::new(self.default_model.clone())
                    .with_name("Default Gemini Model")])
            }
        }
    }
}
