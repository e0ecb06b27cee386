use crate::protocol::{PushEvent, PushSession};
use cobalt_core::{ConnectionStatus, FeedError, FeedWriter, RelayConfig};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

pub const MIN_RECONNECT_DELAY_MS: u64 = 3_000;
pub const MAX_RECONNECT_DELAY_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub socket_url: String,
    pub reconnect_delay: Duration,
}

impl PushConfig {
    /// The configured backoff is held to 3..=5 s; a failing relay never
    /// gets immediate retries.
    pub fn from_relay_config(cfg: &RelayConfig) -> Self {
        let delay_ms = cfg
            .reconnect_delay_ms
            .clamp(MIN_RECONNECT_DELAY_MS, MAX_RECONNECT_DELAY_MS);
        Self {
            socket_url: cfg.socket_url.clone(),
            reconnect_delay: Duration::from_millis(delay_ms),
        }
    }
}

enum Closed {
    Cancelled,
    Lost(FeedError),
}

/// Connect, subscribe, follow updates; after every close wait
/// `reconnect_delay` once and try again with the same subject.
pub async fn run_push(
    cfg: PushConfig,
    session: PushSession,
    writer: FeedWriter,
    cancel: CancellationToken,
) {
    let url = match Url::parse(&cfg.socket_url) {
        Ok(url) => url,
        Err(err) => {
            warn!(error = %err, url = %cfg.socket_url, "invalid relay socket url");
            writer.update(|state| {
                state.connection_status = ConnectionStatus::Error;
                state.last_error = Some(format!("invalid relay socket url: {err}"));
            });
            return;
        }
    };

    loop {
        writer.update(|state| state.connection_status = ConnectionStatus::Connecting);

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            res = connect_async(url.as_str()) => res,
        };

        let reason = match connected {
            Ok((ws, _)) => {
                info!(subject = %session.subject_id(), "relay socket connected");
                drive_connection(ws, &session, &writer, &cancel).await
            }
            Err(err) => Closed::Lost(FeedError::ConnectionLost(err.to_string())),
        };

        match reason {
            Closed::Cancelled => return,
            Closed::Lost(err) => {
                warn!(error = %err, delay_ms = cfg.reconnect_delay.as_millis() as u64, "relay socket closed; reconnecting");
                writer.update(|state| {
                    state.connection_status = ConnectionStatus::Disconnected;
                    state.last_error = Some(err.to_string());
                });
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(cfg.reconnect_delay) => {}
        }
    }
}

/// One connection's lifetime. The heartbeat timer lives here and is dropped
/// with the socket on every exit path.
async fn drive_connection<S>(
    ws: S,
    session: &PushSession,
    writer: &FeedWriter,
    cancel: &CancellationToken,
) -> Closed
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let mut heartbeat: Option<Interval> = None;

    if let Err(err) = sink.send(Message::Text(session.subscribe_frame())).await {
        return Closed::Lost(FeedError::ConnectionLost(err.to_string()));
    }
    writer.update(|state| {
        state.connection_status = ConnectionStatus::Connected;
        state.last_error = None;
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Closed::Cancelled;
            }
            _ = next_heartbeat(&mut heartbeat) => {
                if let Err(err) = sink.send(Message::Text(PushSession::heartbeat_frame())).await {
                    return Closed::Lost(FeedError::ConnectionLost(err.to_string()));
                }
            }
            msg = stream.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bin))) => match String::from_utf8(bin) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("relay sent non-utf8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let why = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                        return Closed::Lost(FeedError::ConnectionLost(format!("server closed: {why}")));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return Closed::Lost(FeedError::ConnectionLost(err.to_string())),
                    None => return Closed::Lost(FeedError::ConnectionLost("stream ended".to_string())),
                };

                match session.on_text(&text) {
                    Ok(PushEvent::Hello(every)) => {
                        debug!(interval_ms = every.as_millis() as u64, "relay hello");
                        let mut timer = tokio::time::interval_at(Instant::now() + every, every);
                        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        heartbeat = Some(timer);
                    }
                    Ok(PushEvent::Presence(presence)) => {
                        writer.update(|state| {
                            state.set_playback(presence.track(), presence.listening_to_spotify);
                            state.connection_status = ConnectionStatus::Connected;
                            state.last_error = None;
                        });
                    }
                    Ok(PushEvent::Ignored) => {}
                    Err(err) => warn!(error = %err, "ignoring relay frame"),
                }
            }
        }
    }
}

async fn next_heartbeat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
