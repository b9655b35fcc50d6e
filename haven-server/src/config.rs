//! haven-server configuration
//!
//! Settings come from `<root>/haven.toml`; every key is optional and falls
//! back to the compiled default. Command-line and environment overrides are
//! applied by `main` after loading.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

/// Key values that mean "no key was configured"
const PLACEHOLDER_KEYS: [&str; 4] = ["", "your_tavus_api_key", "changeme", "placeholder"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerSettings,
    pub video: VideoSettings,
    pub sessions: SessionSettings,
    pub cleanup: CleanupSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
    pub port: u16,
    /// Broadcast buffer for the SSE event bus
    pub event_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 5780,
            event_capacity: 256,
        }
    }
}

/// Conversational-video provider settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub api_key: String,
    pub base_url: String,
    pub persona_id: String,
    pub replica_id: Option<String>,
    /// Served in place of a live conversation when the provider is unavailable
    pub fallback_asset_url: String,
    pub max_duration_minutes: u32,
    pub recording_enabled: bool,
    pub transcription_enabled: bool,
    pub request_timeout_ms: u64,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://tavusapi.com".to_string(),
            persona_id: "p_haven_reflection".to_string(),
            replica_id: None,
            fallback_asset_url: "/assets/video/reflection-fallback.mp4".to_string(),
            max_duration_minutes: 30,
            recording_enabled: false,
            transcription_enabled: true,
            request_timeout_ms: 15_000,
        }
    }
}

impl VideoSettings {
    /// Whether the API key is missing or a template placeholder
    pub fn has_usable_api_key(&self) -> bool {
        let key = self.api_key.trim();
        !PLACEHOLDER_KEYS
            .iter()
            .any(|placeholder| key.eq_ignore_ascii_case(placeholder))
            && !key.to_ascii_lowercase().starts_with("your_")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub invite_ttl_hours: i64,
    /// Minutes a user must have left to open a new conversation
    pub min_minutes_to_start: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            invite_ttl_hours: 24,
            min_minutes_to_start: 1,
        }
    }
}

/// Best-effort background release queue
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupSettings {
    pub deadline_ms: u64,
    pub queue_capacity: usize,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            deadline_ms: 3_000,
            queue_capacity: 128,
        }
    }
}

impl ServiceConfig {
    /// Load from a TOML file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                "Settings file {} not found, using compiled defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded settings from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid settings file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.video.max_duration_minutes == 0 {
            return Err(Error::Config(
                "video.max_duration_minutes must be at least 1".to_string(),
            ));
        }
        if self.sessions.invite_ttl_hours <= 0 {
            return Err(Error::Config(
                "sessions.invite_ttl_hours must be positive".to_string(),
            ));
        }
        if self.cleanup.queue_capacity == 0 {
            return Err(Error::Config(
                "cleanup.queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
