//! Ollama Provider Implementation
//!
//! Completion provider for Ollama (local LLM server).
//!
//! # Ollama API
//!
//! Ollama provides a REST API for:
//! - `/api/chat` - Chat completions with message history
//! - `/api/tags` - List available models
//!
//! Streaming responses are newline-delimited JSON; each line carries a
//! `message.content` fragment and a `done` flag.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::stream::{spawn_line_stream, LineAction, LineDecoder};
use super::traits::{CompletionProvider, StreamReceiver};
use super::{ensure_success, http_client, response_id};
use crate::types::{
    ChatMessage, CompletionRequest, CompletionResponse, ModelDetail, StreamChunk, Usage,
};

/// Ollama provider client
#[derive(Clone)]
pub struct OllamaProvider {
    /// Base URL, e.g. `http://localhost:11434`
    base_url: String,
    /// Model used for `"auto"`
    default_model: String,
    /// HTTP client
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TagsReply {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
    #[serde(default)]
    details: Option<TagDetails>,
}

#[derive(Debug, Deserialize)]
struct TagDetails {
    #[serde(default)]
    parameter_size: Option<String>,
    #[serde(default)]
    quantization_level: Option<String>,
}

impl OllamaProvider {
    /// Create a new Ollama provider
    pub fn new(base_url: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
            http_client: http_client(),
        }
    }

    /// Create from host and port
    pub fn from_host(host: &str, port: u16, default_model: impl Into<String>) -> Self {
        Self::new(format!("http://{host}:{port}"), default_model)
    }

    /// Get chat endpoint URL
    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    /// Get tags endpoint URL
    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }

    fn model_for<'a>(&'a self, request: &'a CompletionRequest) -> &'a str {
        if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        }
    }

    fn chat_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model_for(request),
            "messages": request.messages,
            "stream": stream,
        })
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::from_host("localhost", 11434, "llama2")
    }
}

/// Turns NDJSON chat lines into chunks
struct OllamaLines {
    model: String,
}

impl LineDecoder for OllamaLines {
    fn decode(&mut self, line: &str) -> LineAction {
        let Ok(reply) = serde_json::from_str::<ChatReply>(line) else {
            return LineAction::Skip;
        };

        let content = reply.message.map(|m| m.content).unwrap_or_default();
        let chunk = StreamChunk::delta(response_id("ollama"), &self.model, content);

        if reply.done {
            LineAction::EmitAndFinish(chunk.finished())
        } else {
            LineAction::Emit(chunk)
        }
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    fn name(&self) -> &str {
        "Ollama"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn is_available(&self) -> bool {
        matches!(
            self.http_client
                .get(self.tags_url())
                .timeout(Duration::from_secs(5))
                .send()
                .await,
            Ok(response) if response.status().is_success()
        )
    }

    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionResponse> {
        let model = self.model_for(request).to_string();
        let response = self
            .http_client
            .post(self.chat_url())
            .json(&self.chat_body(request, false))
            .send()
            .await?;
        let response = ensure_success(self.name(), response).await?;

        let reply: ChatReply = response.json().await?;
        let content = reply.message.map(|m| m.content).unwrap_or_default();

        let mut completion = CompletionResponse::single(response_id("ollama"), model, content);
        if reply.prompt_eval_count.is_some() || reply.eval_count.is_some() {
            completion = completion.with_usage(Usage::new(
                reply.prompt_eval_count.unwrap_or(0),
                reply.eval_count.unwrap_or(0),
            ));
        }
        Ok(completion)
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> anyhow::Result<StreamReceiver> {
        let response = self
            .http_client
            .post(self.chat_url())
            .json(&self.chat_body(request, true))
            .send()
            .await?;
        let response = ensure_success(self.name(), response).await?;

        Ok(spawn_line_stream(
            response,
            OllamaLines {
                model: self.model_for(request).to_string(),
            },
        ))
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelDetail>> {
        let response = self
            .http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        let response = ensure_success(self.name(), response).await?;

        let tags: TagsReply = response.json().await?;
        Ok(tags
            .models
            .into_iter()
            .map(|m| {
                let description = match m.details {
                    Some(TagDetails {
                        parameter_size: Some(params),
                        quantization_level: Some(quant),
                    }) => format!("{params} parameters, {quant} quant"),
                    _ => "Local Ollama Model".to_string(),
                };
                ModelDetail::new(m.name.clone())
                    .with_name(m.name)
                    .with_description(description)
            })
            .collect())
    }
}
