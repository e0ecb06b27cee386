use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MusicProvider {
    Relay,
    Streaming,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    #[default]
    #[serde(rename = "websocket")]
    WebSocket,
    Polling,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// Provider-agnostic "now playing" value.
///
/// `track_id` is the change-detection key; `None` means the upstream could not
/// identify the track (local files, some relay payloads).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NowPlayingTrack {
    pub track_id: Option<String>,
    pub title: String,
    pub artist_names: String,
    pub album_name: String,
    pub artwork_url: String,
    pub start_timestamp_ms: i64,
    pub end_timestamp_ms: i64,
}

impl NowPlayingTrack {
    /// Keeps everything but the playback window, which moves on every refresh.
    pub fn merge_timestamps(&mut self, other: &NowPlayingTrack) {
        self.start_timestamp_ms = other.start_timestamp_ms;
        self.end_timestamp_ms = other.end_timestamp_ms;
    }

    pub fn duration_ms(&self) -> i64 {
        (self.end_timestamp_ms - self.start_timestamp_ms).max(0)
    }

    pub fn progress_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.start_timestamp_ms).clamp(0, self.duration_ms())
    }

    pub fn same_track(&self, other: &NowPlayingTrack) -> bool {
        self.track_id == other.track_id
    }
}

/// Joins artist names into one display string.
///
/// Accepts either pre-split names or a single `;`-separated string, which is
/// how relay payloads encode multiple artists.
pub fn join_artists<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for name in names {
        for part in name.as_ref().split(';') {
            let part = part.trim();
            if !part.is_empty() {
                out.push(part.to_string());
            }
        }
    }
    out.join(", ")
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PresenceFeedState {
    pub current: Option<NowPlayingTrack>,
    pub is_playing: bool,
    pub connection_status: ConnectionStatus,
    pub last_error: Option<String>,
}

impl PresenceFeedState {
    pub fn disconnected() -> Self {
        Self {
            current: None,
            is_playing: false,
            connection_status: ConnectionStatus::Disconnected,
            last_error: None,
        }
    }

    pub fn connecting() -> Self {
        Self {
            connection_status: ConnectionStatus::Connecting,
            ..Self::disconnected()
        }
    }

    /// Overwrites the track fields in one step, keeping `current` empty
    /// whenever nothing is playing.
    pub fn set_playback(&mut self, track: Option<NowPlayingTrack>, is_playing: bool) {
        self.is_playing = is_playing && track.is_some();
        self.current = if self.is_playing { track } else { None };
    }
}

impl Default for PresenceFeedState {
    fn default() -> Self {
        Self::disconnected()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenUpdate {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at_ms: i64,
}

impl TokenUpdate {
    /// Wipes all stored credentials, forcing re-authorization.
    pub fn cleared() -> Self {
        Self {
            access_token: String::new(),
            refresh_token: String::new(),
            expires_at_ms: 0,
        }
    }

    pub fn is_cleared(&self) -> bool {
        self.access_token.is_empty() && self.refresh_token.is_empty()
    }
}

/// Write side of the settings store, as far as the feed is concerned.
pub trait CredentialStore: Send + Sync {
    fn persist_tokens(&self, update: TokenUpdate);
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
