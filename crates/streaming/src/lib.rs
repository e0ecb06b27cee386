//! Direct streaming-service client: bearer-token polling of the
//! currently-playing endpoint with proactive token refresh.

use async_trait::async_trait;
use cobalt_core::{join_artists, urls, FeedError, NowPlayingTrack, StreamingConfig};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

pub mod pkce;
pub mod poller;

pub use poller::{run_streaming, Credentials, StreamingPoller, TickOutcome};

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3_600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub api_base: String,
    pub accounts_base: String,
    pub client_id: String,
    pub redirect_uri: String,
}

impl Endpoints {
    pub fn from_config(cfg: &StreamingConfig) -> Self {
        Self {
            api_base: cfg.api_base.clone(),
            accounts_base: cfg.accounts_base.clone(),
            client_id: cfg.client_id.clone(),
            redirect_uri: cfg.redirect_uri.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl TokenGrant {
    pub fn expires_at_ms(&self, now_ms: i64) -> i64 {
        let secs = self.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let lifetime_ms = i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1_000);
        now_ms.saturating_add(lifetime_ms)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ApiImage {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
pub struct ApiAlbum {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub images: Vec<ApiImage>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ApiArtist {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ApiTrack {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artists: Vec<ApiArtist>,
    #[serde(default)]
    pub album: ApiAlbum,
    #[serde(default)]
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CurrentlyPlaying {
    #[serde(default)]
    pub item: Option<ApiTrack>,
    #[serde(default)]
    pub progress_ms: Option<u64>,
    #[serde(default)]
    pub is_playing: bool,
}

impl CurrentlyPlaying {
    /// Normalizes the payload; `None` when there is no track item (ads,
    /// unsupported content types).
    pub fn normalize(&self, now_ms: i64) -> Option<NowPlayingTrack> {
        let item = self.item.as_ref()?;
        let start = now_ms - self.progress_ms.unwrap_or(0) as i64;
        Some(NowPlayingTrack {
            track_id: item.id.clone(),
            title: item.name.clone(),
            artist_names: join_artists(item.artists.iter().map(|a| a.name.as_str())),
            album_name: item.album.name.clone(),
            artwork_url: item
                .album
                .images
                .first()
                .map(|img| img.url.clone())
                .unwrap_or_default(),
            start_timestamp_ms: start,
            end_timestamp_ms: start + item.duration_ms as i64,
        })
    }
}

#[async_trait]
pub trait StreamingApi: Send + Sync {
    async fn refresh(&self, ep: &Endpoints, refresh_token: &str) -> Result<TokenGrant, FeedError>;

    async fn exchange_code(
        &self,
        ep: &Endpoints,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenGrant, FeedError>;

    /// `Ok(None)` is the normal "nothing playing" answer (204 or any error status).
    async fn currently_playing(
        &self,
        ep: &Endpoints,
        access_token: &str,
    ) -> Result<Option<CurrentlyPlaying>, FeedError>;
}

#[derive(Clone, Default)]
pub struct WebStreamingApi {
    client: reqwest::Client,
}

impl WebStreamingApi {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn token_request(
        &self,
        ep: &Endpoints,
        params: &[(&str, &str)],
    ) -> Result<TokenGrant, FeedError> {
        let response = self
            .client
            .post(urls::token_url(&ep.accounts_base))
            .form(params)
            .send()
            .await
            .map_err(|err| FeedError::AuthExpired(format!("token request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::AuthExpired(format!("token endpoint returned {status}: {body}")));
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|err| FeedError::AuthExpired(format!("unreadable token response: {err}")))
    }
}

#[async_trait]
impl StreamingApi for WebStreamingApi {
    async fn refresh(&self, ep: &Endpoints, refresh_token: &str) -> Result<TokenGrant, FeedError> {
        self.token_request(
            ep,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", ep.client_id.as_str()),
            ],
        )
        .await
    }

    async fn exchange_code(
        &self,
        ep: &Endpoints,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenGrant, FeedError> {
        self.token_request(
            ep,
            &[
                ("client_id", ep.client_id.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", ep.redirect_uri.as_str()),
                ("code_verifier", code_verifier),
            ],
        )
        .await
    }

    async fn currently_playing(
        &self,
        ep: &Endpoints,
        access_token: &str,
    ) -> Result<Option<CurrentlyPlaying>, FeedError> {
        let response = self
            .client
            .get(urls::currently_playing_url(&ep.api_base))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| FeedError::TransientNetwork(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT || status.is_client_error() || status.is_server_error() {
            debug!(%status, "nothing playing");
            return Ok(None);
        }

        response
            .json::<CurrentlyPlaying>()
            .await
            .map(Some)
            .map_err(|err| FeedError::Protocol(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::{CurrentlyPlaying, Endpoints, StreamingApi, TokenGrant, WebStreamingApi};
    use cobalt_core::FeedError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    const PAYLOAD: &str = r#"{
        "is_playing": true,
        "progress_ms": 30000,
        "item": {
            "id": "4uLU6hMCjMI75M1A2tKUQC",
            "name": "Never Gonna Give You Up",
            "duration_ms": 213000,
            "artists": [{"name": "Rick Astley"}, {"name": "Guest"}],
            "album": {"name": "Whenever You Need Somebody",
                      "images": [{"url": "https://i.scdn.co/large.jpg"}, {"url": "https://i.scdn.co/small.jpg"}]}
        }
    }"#;

    #[test]
    fn normalizes_currently_playing() {
        let payload: CurrentlyPlaying = serde_json::from_str(PAYLOAD).unwrap();
        let track = payload.normalize(1_000_000).unwrap();

        assert_eq!(track.track_id.as_deref(), Some("4uLU6hMCjMI75M1A2tKUQC"));
        assert_eq!(track.artist_names, "Rick Astley, Guest");
        assert_eq!(track.artwork_url, "https://i.scdn.co/large.jpg");
        assert_eq!(track.start_timestamp_ms, 970_000);
        assert_eq!(track.end_timestamp_ms, 1_183_000);
    }

    #[test]
    fn missing_item_is_nothing_playing() {
        let payload: CurrentlyPlaying =
            serde_json::from_str(r#"{"is_playing": true, "currently_playing_type": "ad"}"#).unwrap();
        assert!(payload.normalize(0).is_none());
    }

    #[test]
    fn grant_defaults_to_one_hour() {
        let grant: TokenGrant = serde_json::from_str(r#"{"access_token":"a"}"#).unwrap();
        assert_eq!(grant.expires_at_ms(10), 10 + 3_600_000);
        assert!(grant.refresh_token.is_none());
    }

    #[test]
    fn absurd_lifetime_saturates() {
        let grant = TokenGrant {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_in: Some(u64::MAX),
        };
        assert_eq!(grant.expires_at_ms(1_000), i64::MAX);
    }

    async fn read_request(tcp: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = tcp.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).into_owned();
            let Some(end) = text.find("\r\n\r\n") else { continue };
            let body_len = text[..end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                break;
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// One-shot HTTP responder; resolves to the full request it received.
    async fn respond_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut tcp, _) = listener.accept().await.unwrap();
            let request = read_request(&mut tcp).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            tcp.write_all(response.as_bytes()).await.unwrap();
            let _ = tcp.shutdown().await;
            request
        });
        (base, handle)
    }

    fn endpoints(base: &str) -> Endpoints {
        Endpoints {
            api_base: base.to_string(),
            accounts_base: base.to_string(),
            client_id: "cid".to_string(),
            redirect_uri: "http://127.0.0.1:8888/callback".to_string(),
        }
    }

    #[tokio::test]
    async fn currently_playing_sends_bearer_and_parses_item() {
        let (base, server) = respond_once("200 OK", PAYLOAD).await;

        let payload = WebStreamingApi::new()
            .currently_playing(&endpoints(&base), "tok")
            .await
            .unwrap()
            .unwrap();

        assert!(payload.is_playing);
        assert_eq!(payload.progress_ms, Some(30_000));
        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("get /me/player/currently-playing "));
        assert!(request.contains("authorization: bearer tok"));
    }

    #[tokio::test]
    async fn no_content_is_nothing_playing() {
        let (base, _server) = respond_once("204 No Content", "").await;
        let res = WebStreamingApi::new().currently_playing(&endpoints(&base), "tok").await;
        assert_eq!(res, Ok(None));
    }

    #[tokio::test]
    async fn error_statuses_are_nothing_playing() {
        for status in ["401 Unauthorized", "429 Too Many Requests", "503 Service Unavailable"] {
            let (base, _server) = respond_once(status, r#"{"error":{"status":0}}"#).await;
            let res = WebStreamingApi::new().currently_playing(&endpoints(&base), "tok").await;
            assert_eq!(res, Ok(None), "{status}");
        }
    }

    #[tokio::test]
    async fn garbled_payload_is_a_protocol_error() {
        let (base, _server) = respond_once("200 OK", "not json").await;
        let res = WebStreamingApi::new().currently_playing(&endpoints(&base), "tok").await;
        assert!(matches!(res, Err(FeedError::Protocol(_))));
    }

    #[tokio::test]
    async fn refresh_posts_form_and_reads_grant() {
        let (base, server) = respond_once(
            "200 OK",
            r#"{"access_token":"a2","token_type":"Bearer","expires_in":3600,"refresh_token":"r2"}"#,
        )
        .await;

        let grant = WebStreamingApi::new().refresh(&endpoints(&base), "r1").await.unwrap();

        assert_eq!(grant.access_token, "a2");
        assert_eq!(grant.refresh_token.as_deref(), Some("r2"));
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/token "));
        assert!(request.contains("grant_type=refresh_token"));
        assert!(request.contains("refresh_token=r1"));
        assert!(request.contains("client_id=cid"));
    }

    #[tokio::test]
    async fn rejected_refresh_is_auth_expired() {
        let (base, _server) =
            respond_once("400 Bad Request", r#"{"error":"invalid_grant"}"#).await;
        let err = WebStreamingApi::new().refresh(&endpoints(&base), "r1").await.unwrap_err();
        assert!(matches!(err, FeedError::AuthExpired(_)));
    }
}
