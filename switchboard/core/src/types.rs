//! Completion Data Model
//!
//! Uniform request/response shapes shared by the router and every provider
//! adapter. They serialize to the OpenAI chat-completions JSON layout, which is
//! also what the HTTP front door speaks.

use serde::{Deserialize, Deserializer, Serialize};

/// Model sentinel meaning "let the provider pick its default model"
pub const AUTO_MODEL: &str = "auto";

/// Role used for the synthetic continuation message during stitching
pub const ASSISTANT_ROLE: &str = "assistant";

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_finish_reason() -> String {
    "stop".to_string()
}

/// Current unix time in seconds
#[must_use]
pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}

// ============================================================================
// Request
// ============================================================================

/// One conversation message. Roles are passed through unvalidated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker role ("system", "user", "assistant", ...)
    pub role: String,
    /// Message text
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
}

impl ChatMessage {
    /// Create a message with an arbitrary role
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ASSISTANT_ROLE, content)
    }
}

/// A chat-completion request as received from the caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier, or [`AUTO_MODEL`]
    pub model: String,
    /// Ordered conversation
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Whether the caller wants an incremental response
    #[serde(default)]
    pub stream: bool,
}

impl CompletionRequest {
    /// Create a non-streaming request
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: false,
        }
    }

    /// Set streaming mode
    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Whether the caller left model choice to the provider
    #[must_use]
    pub fn is_auto(&self) -> bool {
        self.model == AUTO_MODEL
    }

    /// Model to send to a provider whose default is `default_model`
    #[must_use]
    pub fn resolve_model(&self, default_model: &str) -> String {
        if self.is_auto() {
            default_model.to_string()
        } else {
            self.model.clone()
        }
    }

    /// Derived copy targeting `model`; the original is left untouched
    #[must_use]
    pub fn for_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }

    /// Derived copy targeting `model` that carries previously streamed text
    /// as a trailing assistant message, so the provider continues the answer.
    ///
    /// With empty `partial` this is identical to [`Self::for_model`].
    #[must_use]
    pub fn stitched(&self, model: &str, partial: &str) -> Self {
        let mut derived = self.for_model(model);
        if !partial.is_empty() {
            derived.messages.push(ChatMessage::assistant(partial));
        }
        derived
    }
}

// ============================================================================
// Non-streaming response
// ============================================================================

/// Token accounting reported by a provider
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Completion tokens
    #[serde(default)]
    pub completion_tokens: u32,
    /// Sum of both
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Build usage from prompt and completion counts
    #[must_use]
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// A single answer choice
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    /// Choice index
    #[serde(default)]
    pub index: u32,
    /// Terminal message
    pub message: ChatMessage,
    /// Why generation stopped
    #[serde(default = "default_finish_reason", deserialize_with = "finish_or_stop")]
    pub finish_reason: String,
}

fn finish_or_stop<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_finish_reason))
}

/// A complete, single-shot answer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Response id
    #[serde(default)]
    pub id: String,
    /// Object type, "chat.completion"
    #[serde(default = "completion_object")]
    pub object: String,
    /// Creation time (unix seconds)
    #[serde(default)]
    pub created: u64,
    /// Model that produced the answer
    #[serde(default)]
    pub model: String,
    /// Answer choices (normally exactly one)
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// Token usage, when the provider reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

fn completion_object() -> String {
    "chat.completion".to_string()
}

fn chunk_object() -> String {
    "chat.completion.chunk".to_string()
}

impl CompletionResponse {
    /// Build a response carrying one assistant message
    pub fn single(
        id: impl Into<String>,
        model: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            object: completion_object(),
            created: unix_now(),
            model: model.into(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::assistant(content),
                finish_reason: default_finish_reason(),
            }],
            usage: None,
        }
    }

    /// Attach token usage
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Text of the first choice, or "" when there is none
    #[must_use]
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .map_or("", |choice| choice.message.content.as_str())
    }
}

// ============================================================================
// Streaming chunks
// ============================================================================

/// Incremental part of a message
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    /// Role, usually only on the first chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Choice inside a stream chunk
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Choice index
    #[serde(default)]
    pub index: u32,
    /// Incremental delta
    #[serde(default)]
    pub delta: Delta,
    /// "stop" on the terminal chunk, null while streaming
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// One incremental unit of a streaming answer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Chunk id
    #[serde(default)]
    pub id: String,
    /// Object type, "chat.completion.chunk"
    #[serde(default = "chunk_object")]
    pub object: String,
    /// Creation time (unix seconds)
    #[serde(default)]
    pub created: u64,
    /// Model producing the stream
    #[serde(default)]
    pub model: String,
    /// Chunk choices
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

impl StreamChunk {
    /// Chunk carrying a content fragment
    pub fn delta(
        id: impl Into<String>,
        model: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::with_choice(
            id,
            model,
            Delta {
                role: None,
                content: Some(content.into()),
            },
            None,
        )
    }

    /// Terminal chunk with an empty delta
    pub fn stop(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_choice(id, model, Delta::default(), Some(default_finish_reason()))
    }

    fn with_choice(
        id: impl Into<String>,
        model: impl Into<String>,
        delta: Delta,
        finish_reason: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            object: chunk_object(),
            created: unix_now(),
            model: model.into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }

    /// Mark this chunk as the terminal one
    #[must_use]
    pub fn finished(mut self) -> Self {
        if let Some(choice) = self.choices.first_mut() {
            choice.finish_reason = Some(default_finish_reason());
        }
        self
    }

    /// Content fragment of the first choice, or "" when absent
    #[must_use]
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
            .unwrap_or("")
    }

    /// Finish reason of the first choice
    #[must_use]
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.finish_reason.as_deref())
    }
}

// ============================================================================
// Model catalog
// ============================================================================

/// A model a provider can serve
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDetail {
    /// Model identifier
    pub id: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Short description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Arena leaderboard score, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
}

impl ModelDetail {
    /// Create a bare model entry
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            score: None,
        }
    }

    /// Set display name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
