//! Conversational-video provider integration
//!
//! [`VideoProvider`] is the seam to the remote provider; [`VideoGateway`]
//! wraps it and substitutes a local fallback asset whenever the provider is
//! unconfigured or failing.

mod fallback;
mod tavus;

pub use fallback::{StartedConversation, VideoGateway};
pub use tavus::TavusClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("Video provider not configured")]
    NotConfigured,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRequest {
    pub conversation_name: String,
    pub persona_id: String,
    pub replica_id: Option<String>,
    pub max_duration_minutes: u32,
    pub recording_enabled: bool,
    pub transcription_enabled: bool,
}

/// A live conversation created by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub conversation_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Ended,
    /// Any provider status this service does not act on
    Other(String),
}

impl ConversationStatus {
    pub fn from_provider(status: &str) -> Self {
        match status {
            "active" => ConversationStatus::Active,
            "ended" => ConversationStatus::Ended,
            other => ConversationStatus::Other(other.to_string()),
        }
    }
}

#[async_trait]
pub trait VideoProvider: Send + Sync {
    async fn create_conversation(
        &self,
        request: &ConversationRequest,
    ) -> Result<Conversation, VideoError>;

    async fn end_conversation(&self, conversation_id: &str) -> Result<(), VideoError>;

    async fn get_conversation_status(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationStatus, VideoError>;
}
