//! Provider wrapper that degrades to a local asset

use super::{ConversationRequest, ConversationStatus, TavusClient, VideoError, VideoProvider};
use crate::config::VideoSettings;
use haven_common::events::{EventBus, HavenEvent};
use haven_common::Clock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const FALLBACK_ID_PREFIX: &str = "fallback-";

/// Conversation handed to a session, live or substituted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartedConversation {
    pub conversation_id: String,
    pub conversation_url: String,
    pub fallback_mode: bool,
}

pub struct VideoGateway {
    provider: Option<Arc<dyn VideoProvider>>,
    settings: VideoSettings,
    events: EventBus,
    clock: Arc<dyn Clock>,
}

impl VideoGateway {
    pub fn new(
        provider: Option<Arc<dyn VideoProvider>>,
        settings: VideoSettings,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            settings,
            events,
            clock,
        }
    }

    /// Build the live client when a usable key is configured
    pub fn from_settings(settings: VideoSettings, events: EventBus, clock: Arc<dyn Clock>) -> Self {
        let provider: Option<Arc<dyn VideoProvider>> = if settings.has_usable_api_key() {
            match TavusClient::new(&settings) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    warn!("Video client could not be built, using fallback asset: {}", e);
                    None
                }
            }
        } else {
            warn!("No video API key configured, sessions will use the fallback asset");
            None
        };

        Self::new(provider, settings, events, clock)
    }

    pub fn max_duration_minutes(&self) -> u32 {
        self.settings.max_duration_minutes
    }

    pub fn is_live(&self) -> bool {
        self.provider.is_some()
    }

    /// Create a conversation for `session_id`
    ///
    /// Never fails: a missing provider or any provider error yields the
    /// fallback asset with a synthetic id.
    pub async fn start_conversation(&self, session_id: Uuid, name: &str) -> StartedConversation {
        let Some(provider) = &self.provider else {
            return self.fallback(session_id, VideoError::NotConfigured.to_string());
        };

        let request = ConversationRequest {
            conversation_name: name.to_string(),
            persona_id: self.settings.persona_id.clone(),
            replica_id: self.settings.replica_id.clone(),
            max_duration_minutes: self.settings.max_duration_minutes,
            recording_enabled: self.settings.recording_enabled,
            transcription_enabled: self.settings.transcription_enabled,
        };

        match provider.create_conversation(&request).await {
            Ok(conversation) => {
                info!(
                    session_id = %session_id,
                    conversation_id = %conversation.conversation_id,
                    "Video conversation ready"
                );
                StartedConversation {
                    conversation_id: conversation.conversation_id,
                    conversation_url: conversation.conversation_url,
                    fallback_mode: false,
                }
            }
            Err(e) => self.fallback(session_id, e.to_string()),
        }
    }

    fn fallback(&self, session_id: Uuid, reason: String) -> StartedConversation {
        warn!(session_id = %session_id, reason = %reason, "Video provider unavailable, serving fallback asset");
        self.events.emit_lossy(HavenEvent::VideoFallbackUsed {
            session_id,
            reason,
            timestamp: self.clock.now(),
        });

        StartedConversation {
            conversation_id: format!("{}{}", FALLBACK_ID_PREFIX, Uuid::new_v4()),
            conversation_url: self.settings.fallback_asset_url.clone(),
            fallback_mode: true,
        }
    }

    /// Release a live conversation; fallback ids need no release
    pub async fn end_conversation(&self, conversation_id: &str) -> Result<(), VideoError> {
        if is_fallback_id(conversation_id) {
            return Ok(());
        }
        match &self.provider {
            Some(provider) => provider.end_conversation(conversation_id).await,
            None => Err(VideoError::NotConfigured),
        }
    }

    pub async fn conversation_status(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationStatus, VideoError> {
        if is_fallback_id(conversation_id) {
            return Ok(ConversationStatus::Other("fallback".to_string()));
        }
        match &self.provider {
            Some(provider) => provider.get_conversation_status(conversation_id).await,
            None => Err(VideoError::NotConfigured),
        }
    }
}

pub fn is_fallback_id(conversation_id: &str) -> bool {
    conversation_id.starts_with(FALLBACK_ID_PREFIX)
}
