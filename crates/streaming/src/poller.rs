use crate::{Endpoints, StreamingApi};
use cobalt_core::{
    now_ms, ConnectionStatus, CredentialStore, FeedError, FeedWriter, NowPlayingTrack,
    StreamingConfig, TokenUpdate,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at_ms: i64,
}

impl Credentials {
    pub fn from_config(cfg: &StreamingConfig) -> Self {
        Self {
            access_token: cfg.access_token.clone(),
            refresh_token: cfg.refresh_token.clone(),
            expires_at_ms: cfg.token_expires_at_ms,
        }
    }

    pub fn needs_refresh(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Playback {
        track: Option<NowPlayingTrack>,
        is_playing: bool,
    },
    Transient(FeedError),
    AuthExpired(FeedError),
    /// Credentials were revoked earlier in this session.
    Skipped,
}

pub struct StreamingPoller {
    endpoints: Endpoints,
    creds: Credentials,
    api: Arc<dyn StreamingApi>,
    store: Arc<dyn CredentialStore>,
    reissued: Option<watch::Receiver<Credentials>>,
    revoked: bool,
}

impl StreamingPoller {
    pub fn new(
        cfg: &StreamingConfig,
        api: Arc<dyn StreamingApi>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            endpoints: Endpoints::from_config(cfg),
            creds: Credentials::from_config(cfg),
            api,
            store,
            reissued: None,
            revoked: false,
        }
    }

    /// Credentials sent on `rx` (a new login, or a rotation written by
    /// another process) replace the held pair before the next tick.
    pub fn follow_credentials(mut self, rx: watch::Receiver<Credentials>) -> Self {
        self.reissued = Some(rx);
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.creds
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    pub async fn tick(&mut self, now_ms: i64) -> TickOutcome {
        self.adopt_reissued();
        if self.revoked {
            return TickOutcome::Skipped;
        }

        if self.creds.needs_refresh(now_ms) {
            if let Err(err) = self.refresh(now_ms).await {
                error!(error = %err, "streaming token refresh failed; credentials cleared");
                self.revoked = true;
                self.store.persist_tokens(TokenUpdate::cleared());
                return TickOutcome::AuthExpired(err);
            }
        }

        match self
            .api
            .currently_playing(&self.endpoints, &self.creds.access_token)
            .await
        {
            Ok(Some(payload)) => TickOutcome::Playback {
                track: payload.normalize(now_ms),
                is_playing: payload.is_playing,
            },
            Ok(None) => TickOutcome::Playback {
                track: None,
                is_playing: false,
            },
            Err(err) => TickOutcome::Transient(err),
        }
    }

    fn adopt_reissued(&mut self) {
        let Some(rx) = self.reissued.as_mut() else {
            return;
        };
        if !rx.has_changed().unwrap_or(false) {
            return;
        }
        let creds = rx.borrow_and_update().clone();
        if creds == self.creds || creds.access_token.is_empty() {
            return;
        }
        info!(expires_at_ms = creds.expires_at_ms, "streaming credentials re-issued");
        self.creds = creds;
        self.revoked = false;
    }

    async fn refresh(&mut self, now_ms: i64) -> Result<(), FeedError> {
        if self.creds.refresh_token.is_empty() {
            return Err(FeedError::AuthExpired("no refresh token stored".to_string()));
        }

        let grant = self
            .api
            .refresh(&self.endpoints, &self.creds.refresh_token)
            .await?;

        self.creds = Credentials {
            expires_at_ms: grant.expires_at_ms(now_ms),
            refresh_token: grant
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| self.creds.refresh_token.clone()),
            access_token: grant.access_token,
        };
        info!(expires_at_ms = self.creds.expires_at_ms, "streaming token refreshed");

        self.store.persist_tokens(TokenUpdate {
            access_token: self.creds.access_token.clone(),
            refresh_token: self.creds.refresh_token.clone(),
            expires_at_ms: self.creds.expires_at_ms,
        });
        Ok(())
    }
}

pub fn apply_outcome(outcome: TickOutcome, writer: &FeedWriter) {
    match outcome {
        TickOutcome::Playback { track, is_playing } => {
            writer.update(|state| {
                state.set_playback(track, is_playing);
                state.connection_status = ConnectionStatus::Connected;
                state.last_error = None;
            });
        }
        TickOutcome::Transient(err) => {
            warn!(error = %err, "streaming poll failed");
            // A blip keeps the still-valid previous track on screen.
            writer.update(|state| state.last_error = Some(err.to_string()));
        }
        TickOutcome::AuthExpired(err) => {
            writer.update(|state| {
                state.set_playback(None, false);
                state.connection_status = ConnectionStatus::Error;
                state.last_error = Some(format!("Streaming connection expired. Please reconnect. ({err})"));
            });
        }
        TickOutcome::Skipped => {}
    }
}

/// Ticks on a fixed interval until cancelled. Ticks run one after another
/// because a refresh rewrites the credentials the next tick reads.
pub async fn run_streaming(
    mut poller: StreamingPoller,
    interval: Duration,
    writer: FeedWriter,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_ms = interval.as_millis() as u64, "streaming client starting");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = poller.tick(now_ms()) => outcome,
                };
                apply_outcome(outcome, &writer);
            }
        }
    }

    debug!("streaming client stopped");
}
