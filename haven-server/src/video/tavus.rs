//! HTTP client for the Tavus conversational-video API

use super::{Conversation, ConversationRequest, ConversationStatus, VideoError, VideoProvider};
use crate::config::VideoSettings;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const USER_AGENT: &str = concat!("haven-server/", env!("CARGO_PKG_VERSION"));

pub struct TavusClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

impl TavusClient {
    pub fn new(settings: &VideoSettings) -> Result<Self, VideoError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()
            .map_err(|e| VideoError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.trim().to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/conversations{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, VideoError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_text = response.text().await.unwrap_or_default();
        Err(VideoError::Api(status.as_u16(), error_text))
    }
}

#[async_trait]
impl VideoProvider for TavusClient {
    async fn create_conversation(
        &self,
        request: &ConversationRequest,
    ) -> Result<Conversation, VideoError> {
        let mut body = json!({
            "persona_id": request.persona_id,
            "conversation_name": request.conversation_name,
            "properties": {
                "max_call_duration": request.max_duration_minutes * 60,
                "enable_recording": request.recording_enabled,
                "enable_transcription": request.transcription_enabled,
            },
        });
        if let Some(replica_id) = &request.replica_id {
            body["replica_id"] = json!(replica_id);
        }

        tracing::debug!(name = %request.conversation_name, "Creating video conversation");

        let response = self
            .http_client
            .post(self.url(""))
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VideoError::Network(e.to_string()))?;

        let conversation: Conversation = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| VideoError::Parse(e.to_string()))?;

        tracing::info!(
            conversation_id = %conversation.conversation_id,
            "Created video conversation"
        );

        Ok(conversation)
    }

    async fn end_conversation(&self, conversation_id: &str) -> Result<(), VideoError> {
        let response = self
            .http_client
            .post(self.url(&format!("/{}/end", conversation_id)))
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| VideoError::Network(e.to_string()))?;

        Self::check(response).await?;
        tracing::debug!(conversation_id = %conversation_id, "Ended video conversation");
        Ok(())
    }

    async fn get_conversation_status(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationStatus, VideoError> {
        let response = self
            .http_client
            .get(self.url(&format!("/{}", conversation_id)))
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| VideoError::Network(e.to_string()))?;

        let status: StatusResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| VideoError::Parse(e.to_string()))?;

        Ok(ConversationStatus::from_provider(&status.status))
    }
}
