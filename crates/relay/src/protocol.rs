//! Relay wire protocol: JSON frames over the push socket and the pull
//! endpoint's response envelope.

use cobalt_core::{join_artists, FeedError, NowPlayingTrack};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub const OP_EVENT: u8 = 0;
pub const OP_HELLO: u8 = 1;
pub const OP_INITIALIZE: u8 = 2;
pub const OP_HEARTBEAT: u8 = 3;

pub const EVENT_INIT_STATE: &str = "INIT_STATE";
pub const EVENT_PRESENCE_UPDATE: &str = "PRESENCE_UPDATE";

#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    pub op: u8,
    #[serde(default)]
    pub t: Option<String>,
    #[serde(default)]
    pub d: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct HelloData {
    heartbeat_interval: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
pub struct RelayTimestamps {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
pub struct RelayTrack {
    #[serde(default)]
    pub track_id: Option<String>,
    #[serde(default)]
    pub song: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub album_art_url: String,
    #[serde(default)]
    pub timestamps: Option<RelayTimestamps>,
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub end: Option<i64>,
}

impl RelayTrack {
    pub fn normalize(&self) -> NowPlayingTrack {
        let nested = self.timestamps.clone().unwrap_or_default();
        let start = nested.start.or(self.start).unwrap_or(0);
        let end = nested.end.or(self.end).unwrap_or(start);
        NowPlayingTrack {
            track_id: self.track_id.clone().filter(|id| !id.is_empty()),
            title: self.song.clone(),
            artist_names: join_artists([self.artist.as_str()]),
            album_name: self.album.clone(),
            artwork_url: self.album_art_url.clone(),
            start_timestamp_ms: start,
            end_timestamp_ms: end,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
pub struct RelayPresence {
    #[serde(default)]
    pub spotify: Option<RelayTrack>,
    #[serde(default)]
    pub listening_to_spotify: bool,
}

impl RelayPresence {
    pub fn track(&self) -> Option<NowPlayingTrack> {
        self.spotify.as_ref().map(RelayTrack::normalize)
    }
}

#[derive(Debug, Deserialize)]
pub struct PullResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<RelayPresence>,
}

/// Reads a presence payload in either of the two shapes the relay emits: the
/// fields directly under `d`, or `d` keyed by subject id first.
pub fn parse_presence(d: &Value, subject_id: &str) -> Result<RelayPresence, FeedError> {
    let obj = d
        .as_object()
        .ok_or_else(|| FeedError::Protocol("presence payload is not an object".to_string()))?;

    let body = if obj.contains_key("spotify") || obj.contains_key("listening_to_spotify") {
        d
    } else if let Some(keyed) = obj.get(subject_id) {
        keyed
    } else {
        return Err(FeedError::Protocol(format!(
            "presence payload carries neither fields nor subject {subject_id}"
        )));
    };

    serde_json::from_value(body.clone()).map_err(|err| FeedError::Protocol(err.to_string()))
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Hello(Duration),
    Presence(RelayPresence),
    Ignored,
}

/// Sans-io half of the push connection: frame building and parsing.
#[derive(Debug, Clone)]
pub struct PushSession {
    subject_id: String,
}

impl PushSession {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn subscribe_frame(&self) -> String {
        json!({ "op": OP_INITIALIZE, "d": { "subscribe_to_id": self.subject_id } }).to_string()
    }

    pub fn heartbeat_frame() -> String {
        json!({ "op": OP_HEARTBEAT }).to_string()
    }

    pub fn on_text(&self, text: &str) -> Result<PushEvent, FeedError> {
        let frame: InboundFrame =
            serde_json::from_str(text).map_err(|err| FeedError::Protocol(err.to_string()))?;

        match frame.op {
            OP_HELLO => {
                let d = frame
                    .d
                    .ok_or_else(|| FeedError::Protocol("hello without payload".to_string()))?;
                let hello: HelloData = serde_json::from_value(d)
                    .map_err(|err| FeedError::Protocol(err.to_string()))?;
                if hello.heartbeat_interval == 0 {
                    return Err(FeedError::Protocol("zero heartbeat interval".to_string()));
                }
                Ok(PushEvent::Hello(Duration::from_millis(hello.heartbeat_interval)))
            }
            OP_EVENT => match frame.t.as_deref() {
                Some(EVENT_INIT_STATE) | Some(EVENT_PRESENCE_UPDATE) => {
                    let d = frame
                        .d
                        .ok_or_else(|| FeedError::Protocol("event without payload".to_string()))?;
                    parse_presence(&d, &self.subject_id).map(PushEvent::Presence)
                }
                _ => Ok(PushEvent::Ignored),
            },
            _ => Ok(PushEvent::Ignored),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PushEvent, PushSession};
    use cobalt_core::FeedError;
    use serde_json::Value;
    use std::time::Duration;

    const SUBJECT: &str = "94490510688792576";

    fn session() -> PushSession {
        PushSession::new(SUBJECT)
    }

    #[test]
    fn builds_subscribe_and_heartbeat_frames() {
        let sub: Value = serde_json::from_str(&session().subscribe_frame()).unwrap();
        assert_eq!(sub["op"], 2);
        assert_eq!(sub["d"]["subscribe_to_id"], SUBJECT);

        let hb: Value = serde_json::from_str(&PushSession::heartbeat_frame()).unwrap();
        assert_eq!(hb, serde_json::json!({ "op": 3 }));
    }

    #[test]
    fn hello_carries_heartbeat_interval() {
        let event = session()
            .on_text(r#"{"op":1,"d":{"heartbeat_interval":30000}}"#)
            .unwrap();
        assert_eq!(event, PushEvent::Hello(Duration::from_secs(30)));

        let zero = session().on_text(r#"{"op":1,"d":{"heartbeat_interval":0}}"#);
        assert!(matches!(zero, Err(FeedError::Protocol(_))));
    }

    #[test]
    fn parses_flat_presence_update() {
        let raw = r#"{"op":0,"t":"PRESENCE_UPDATE","d":{
            "spotify":{"track_id":"A","song":"X","artist":"One; Two","album":"Al",
                       "album_art_url":"https://i/a.jpg","timestamps":{"start":1000,"end":181000}},
            "listening_to_spotify":true}}"#;
        let PushEvent::Presence(presence) = session().on_text(raw).unwrap() else {
            panic!("expected presence");
        };
        assert!(presence.listening_to_spotify);
        let track = presence.track().unwrap();
        assert_eq!(track.track_id.as_deref(), Some("A"));
        assert_eq!(track.artist_names, "One, Two");
        assert_eq!(track.end_timestamp_ms, 181_000);
    }

    #[test]
    fn parses_subject_keyed_init_state() {
        let raw = format!(
            r#"{{"op":0,"t":"INIT_STATE","d":{{"{SUBJECT}":{{"spotify":{{"track_id":"B","song":"Y","start":5,"end":10}},"listening_to_spotify":true}}}}}}"#
        );
        let PushEvent::Presence(presence) = session().on_text(&raw).unwrap() else {
            panic!("expected presence");
        };
        let track = presence.track().unwrap();
        assert_eq!(track.track_id.as_deref(), Some("B"));
        assert_eq!(track.start_timestamp_ms, 5);
    }

    #[test]
    fn null_spotify_means_nothing_playing() {
        let raw = r#"{"op":0,"t":"PRESENCE_UPDATE","d":{"spotify":null,"listening_to_spotify":false}}"#;
        let PushEvent::Presence(presence) = session().on_text(raw).unwrap() else {
            panic!("expected presence");
        };
        assert!(presence.track().is_none());
    }

    #[test]
    fn malformed_frames_are_protocol_errors() {
        assert!(matches!(session().on_text("not json"), Err(FeedError::Protocol(_))));
        assert!(matches!(
            session().on_text(r#"{"op":0,"t":"INIT_STATE","d":{"someone_else":{}}}"#),
            Err(FeedError::Protocol(_))
        ));
        assert_eq!(
            session().on_text(r#"{"op":0,"t":"TYPING_START","d":{}}"#).unwrap(),
            PushEvent::Ignored
        );
    }
}
