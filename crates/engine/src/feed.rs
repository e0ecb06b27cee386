use cobalt_core::{
    ConnectionStatus, CredentialStore, FeedBoard, FeedConfig, FeedKey, PresenceFeedState,
};
use cobalt_relay::{run_relay, RelayApi};
use cobalt_streaming::{run_streaming, Credentials, StreamingApi, StreamingPoller};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Upstream transports and the settings write-back, injected once.
#[derive(Clone)]
pub struct FeedServices {
    pub relay_api: Arc<dyn RelayApi>,
    pub streaming_api: Arc<dyn StreamingApi>,
    pub credentials: Arc<dyn CredentialStore>,
}

/// Socket, timers and in-flight requests of one client, released together.
struct ActiveClient {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    credentials: Option<watch::Sender<Credentials>>,
}

impl ActiveClient {
    fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ActiveClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Provider selector: keeps exactly one upstream client alive for the
/// current configuration and exposes the unified feed state.
pub struct PresenceFeed {
    services: FeedServices,
    board: FeedBoard,
    key: FeedKey,
    active: Option<ActiveClient>,
}

impl PresenceFeed {
    pub fn new(services: FeedServices) -> Self {
        Self {
            services,
            board: FeedBoard::new(),
            key: FeedKey::Idle,
            active: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PresenceFeedState> {
        self.board.subscribe()
    }

    pub fn state(&self) -> PresenceFeedState {
        self.board.snapshot()
    }

    pub fn key(&self) -> &FeedKey {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Reconciles the running client with `cfg`. Returns true when the
    /// previous client was replaced. Must run inside a tokio runtime.
    pub fn apply(&mut self, cfg: &FeedConfig) -> bool {
        let key = cfg.key();
        if key == self.key {
            self.reissue_credentials(cfg);
            return false;
        }

        self.teardown();
        info!(from = ?self.key, to = ?key, "switching presence provider");
        let previous = std::mem::replace(&mut self.key, key);

        if self.key == FeedKey::Idle {
            debug!("feed not configured; staying disconnected");
            let mut reset = PresenceFeedState::disconnected();
            // Revoked credentials land here; keep the reason on screen.
            let last = self.board.snapshot();
            if matches!(previous, FeedKey::Streaming { .. })
                && last.connection_status == ConnectionStatus::Error
            {
                reset.last_error = last.last_error;
            }
            self.board.invalidate(reset);
            return true;
        }

        self.board.invalidate(PresenceFeedState::connecting());
        let writer = self.board.writer();
        let cancel = CancellationToken::new();

        let mut credentials = None;
        let task = match &self.key {
            FeedKey::Relay { .. } => tokio::spawn(run_relay(
                cfg.relay.clone(),
                Arc::clone(&self.services.relay_api),
                writer,
                cancel.clone(),
            )),
            FeedKey::Streaming {
                poll_interval_ms, ..
            } => {
                let (tx, rx) = watch::channel(Credentials::from_config(&cfg.streaming));
                credentials = Some(tx);
                let poller = StreamingPoller::new(
                    &cfg.streaming,
                    Arc::clone(&self.services.streaming_api),
                    Arc::clone(&self.services.credentials),
                )
                .follow_credentials(rx);
                let interval = Duration::from_millis((*poll_interval_ms).max(1_000));
                tokio::spawn(run_streaming(poller, interval, writer, cancel.clone()))
            }
            FeedKey::Idle => return true,
        };

        self.active = Some(ActiveClient {
            cancel,
            task: Some(task),
            credentials,
        });
        true
    }

    /// Stops the active client and resets the feed. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        self.teardown();
        self.key = FeedKey::Idle;
        self.board.invalidate(PresenceFeedState::disconnected());
    }

    /// Same streaming identity, different token pair: hand the pair to the
    /// running poller instead of restarting it.
    fn reissue_credentials(&self, cfg: &FeedConfig) {
        let Some(tx) = self.active.as_ref().and_then(|c| c.credentials.as_ref()) else {
            return;
        };
        let creds = Credentials::from_config(&cfg.streaming);
        let sent = tx.send_if_modified(|held| {
            if *held == creds {
                return false;
            }
            *held = creds;
            true
        });
        if sent {
            debug!("forwarded re-issued streaming credentials");
        }
    }

    fn teardown(&mut self) {
        if let Some(mut client) = self.active.take() {
            client.shutdown();
        }
    }
}

impl Drop for PresenceFeed {
    fn drop(&mut self) {
        self.teardown();
    }
}
