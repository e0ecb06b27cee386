use crate::RelayApi;
use cobalt_core::{ConnectionStatus, FeedWriter};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PullConfig {
    pub api_base: String,
    pub subject_id: String,
    pub interval: Duration,
}

/// Polls on a wall-clock interval. Each tick runs as its own task, so a slow
/// response never holds back the next tick. In-flight requests are aborted
/// when the loop exits.
pub async fn run_pull(
    cfg: PullConfig,
    api: Arc<dyn RelayApi>,
    writer: FeedWriter,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(cfg.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut inflight = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let api = Arc::clone(&api);
                let writer = writer.clone();
                let cfg = cfg.clone();
                inflight.spawn(async move { poll_once(&cfg, api.as_ref(), &writer).await });
            }
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(err) = joined {
                    if err.is_panic() {
                        warn!(error = %err, "relay poll task panicked");
                    }
                }
            }
        }
    }

    inflight.abort_all();
}

pub async fn poll_once(cfg: &PullConfig, api: &dyn RelayApi, writer: &FeedWriter) {
    match api.fetch_presence(&cfg.api_base, &cfg.subject_id).await {
        Ok(presence) => {
            debug!(listening = presence.listening_to_spotify, "relay poll ok");
            writer.update(|state| {
                state.set_playback(presence.track(), presence.listening_to_spotify);
                state.connection_status = ConnectionStatus::Connected;
                state.last_error = None;
            });
        }
        Err(err) => {
            warn!(error = %err, "relay poll failed");
            // Keep the last known track; one failed poll is not "nothing playing".
            writer.update(|state| {
                state.connection_status = ConnectionStatus::Disconnected;
                state.last_error = Some(err.to_string());
            });
        }
    }
}
