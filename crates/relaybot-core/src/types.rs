use serde::{Deserialize, Serialize};

/// Message role in a chat completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

/// Reason the LLM stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    Error,
}

/// A single message in a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Parsed completion from the model endpoint.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
}

/// Sampling parameters sent with every completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
}

/// Where an inbound event came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSource {
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub room_id: Option<String>,
}

impl EventSource {
    /// Best identifier for logging: group, then room, then user.
    pub fn chat_id(&self) -> &str {
        self.group_id
            .as_deref()
            .or(self.room_id.as_deref())
            .or(self.user_id.as_deref())
            .unwrap_or("unknown")
    }
}

/// A webhook event the relay knows how to handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    TextMessage {
        reply_token: Option<String>,
        source: EventSource,
        text: String,
    },
    Postback {
        reply_token: Option<String>,
        source: EventSource,
        data: String,
    },
    MemberJoined {
        reply_token: Option<String>,
        source: EventSource,
        /// User ids of the members who joined, in payload order. A member
        /// the platform sent without a user id is `None`.
        members: Vec<Option<String>>,
    },
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::TextMessage { .. } => "text message",
            InboundEvent::Postback { .. } => "postback",
            InboundEvent::MemberJoined { .. } => "member joined",
        }
    }

    pub fn reply_token(&self) -> Option<&str> {
        match self {
            InboundEvent::TextMessage { reply_token, .. }
            | InboundEvent::Postback { reply_token, .. }
            | InboundEvent::MemberJoined { reply_token, .. } => reply_token.as_deref(),
        }
    }

    pub fn source(&self) -> &EventSource {
        match self {
            InboundEvent::TextMessage { source, .. }
            | InboundEvent::Postback { source, .. }
            | InboundEvent::MemberJoined { source, .. } => source,
        }
    }
}
