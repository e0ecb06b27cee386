//! Presence relay client: follows one subject's listening status either over
//! the relay's push socket or by polling its REST endpoint.

use async_trait::async_trait;
use cobalt_core::{urls, ConnectionMode, FeedError, FeedWriter, RelayConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub mod protocol;
pub mod pull;
pub mod push;

pub use protocol::{PushEvent, PushSession, RelayPresence, RelayTrack};

/// Pull-mode transport. Injected so the feed can run against a fake.
#[async_trait]
pub trait RelayApi: Send + Sync {
    async fn fetch_presence(&self, api_base: &str, subject_id: &str)
        -> Result<RelayPresence, FeedError>;
}

#[derive(Clone, Default)]
pub struct HttpRelayApi {
    client: reqwest::Client,
}

impl HttpRelayApi {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RelayApi for HttpRelayApi {
    async fn fetch_presence(
        &self,
        api_base: &str,
        subject_id: &str,
    ) -> Result<RelayPresence, FeedError> {
        let url = urls::relay_presence_url(api_base, subject_id);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|err| FeedError::TransientNetwork(err.to_string()))?;

        let status = response.status();
        let body: protocol::PullResponse = response
            .json()
            .await
            .map_err(|err| FeedError::TransientNetwork(format!("status {status}: {err}")))?;

        match body {
            protocol::PullResponse {
                success: true,
                data: Some(data),
            } => Ok(data),
            _ => Err(FeedError::TransientNetwork(format!(
                "relay refused presence for {subject_id} (status {status})"
            ))),
        }
    }
}

/// Runs the relay client in the configured mode until `cancel` fires.
pub async fn run_relay(
    cfg: RelayConfig,
    api: Arc<dyn RelayApi>,
    writer: FeedWriter,
    cancel: CancellationToken,
) {
    let subject_id = cfg.subject_id.trim().to_string();
    info!(subject = %subject_id, mode = ?cfg.connection_mode, "relay client starting");

    match cfg.connection_mode {
        ConnectionMode::WebSocket => {
            let push_cfg = push::PushConfig::from_relay_config(&cfg);
            push::run_push(push_cfg, PushSession::new(subject_id), writer, cancel).await;
        }
        ConnectionMode::Polling => {
            let pull_cfg = pull::PullConfig {
                api_base: cfg.api_base.clone(),
                subject_id,
                interval: Duration::from_millis(cfg.poll_interval_ms.max(250)),
            };
            pull::run_pull(pull_cfg, api, writer, cancel).await;
        }
    }

    debug!("relay client stopped");
}
