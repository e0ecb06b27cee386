use crate::model::{ConnectionMode, MusicProvider};
use serde::{Deserialize, Serialize};

fn default_schema_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigIntervals {
    pub file_watch_poll_ms: u64,
}

impl Default for ConfigIntervals {
    fn default() -> Self {
        Self {
            file_watch_poll_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    pub subject_id: String,
    pub connection_mode: ConnectionMode,
    pub poll_interval_ms: u64,
    pub socket_url: String,
    pub api_base: String,
    pub reconnect_delay_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            subject_id: String::new(),
            connection_mode: ConnectionMode::WebSocket,
            poll_interval_ms: 2_000,
            socket_url: "wss://api.lanyard.rest/socket".to_string(),
            api_base: "https://api.lanyard.rest".to_string(),
            reconnect_delay_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamingConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expires_at_ms: i64,
    pub code_verifier: String,
    pub poll_interval_ms: u64,
    pub api_base: String,
    pub accounts_base: String,
    pub scope: String,
}

impl StreamingConfig {
    pub fn is_authorized(&self) -> bool {
        !self.access_token.trim().is_empty()
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            redirect_uri: "http://127.0.0.1:8888/callback".to_string(),
            access_token: String::new(),
            refresh_token: String::new(),
            token_expires_at_ms: 0,
            code_verifier: String::new(),
            poll_interval_ms: 5_000,
            api_base: "https://api.spotify.com/v1".to_string(),
            accounts_base: "https://accounts.spotify.com".to_string(),
            scope: "user-read-currently-playing".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransitionConfig {
    pub exit_ms: u64,
    pub enter_ms: u64,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            exit_ms: 600,
            enter_ms: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub provider: Option<MusicProvider>,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub transition: TransitionConfig,
    #[serde(default)]
    pub intervals: ConfigIntervals,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    pub fn feed(&self) -> FeedConfig {
        FeedConfig {
            provider: self.provider,
            relay: self.relay.clone(),
            streaming: self.streaming.clone(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            log_level: default_log_level(),
            provider: Some(MusicProvider::Relay),
            relay: RelayConfig::default(),
            streaming: StreamingConfig::default(),
            transition: TransitionConfig::default(),
            intervals: ConfigIntervals::default(),
        }
    }
}

/// The read-only slice of settings the presence feed consumes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedConfig {
    pub provider: Option<MusicProvider>,
    pub relay: RelayConfig,
    pub streaming: StreamingConfig,
}

/// Identity of an active client. Any change tears the client down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedKey {
    Idle,
    Relay {
        subject_id: String,
        connection_mode: ConnectionMode,
        poll_interval_ms: u64,
    },
    Streaming {
        client_id: String,
        poll_interval_ms: u64,
    },
}

impl FeedConfig {
    pub fn key(&self) -> FeedKey {
        match self.provider {
            Some(MusicProvider::Relay) if !self.relay.subject_id.trim().is_empty() => {
                FeedKey::Relay {
                    subject_id: self.relay.subject_id.trim().to_string(),
                    connection_mode: self.relay.connection_mode,
                    poll_interval_ms: self.relay.poll_interval_ms,
                }
            }
            Some(MusicProvider::Streaming) if self.streaming.is_authorized() => {
                FeedKey::Streaming {
                    client_id: self.streaming.client_id.clone(),
                    poll_interval_ms: self.streaming.poll_interval_ms,
                }
            }
            _ => FeedKey::Idle,
        }
    }
}
