use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cobalt_core::{now_ms, AppConfig, CredentialStore, MusicProvider, PresenceFeedState, TokenUpdate};
use cobalt_engine::{run_sequencer, DisplayState, FeedServices, PresenceFeed, SequencerConfig};
use cobalt_relay::{HttpRelayApi, RelayApi};
use cobalt_streaming::{pkce, Endpoints, StreamingApi, StreamingPoller, TickOutcome, WebStreamingApi};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod settings;

use settings::{load_or_default, SettingsStore};

#[derive(Parser, Debug)]
#[command(
    name = "cobalt",
    about = "Now playing for the smart display: relay or streaming API -> presence feed"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run,
    Status {
        #[arg(long)]
        json: bool,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Init,
}

#[derive(Subcommand, Debug)]
enum AuthAction {
    /// Print the authorization URL and remember the PKCE verifier.
    Url,
    /// Trade the `code` from the redirect for a token pair.
    Exchange {
        #[arg(long)]
        code: String,
    },
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cmd = cli.command.unwrap_or(Commands::Run);
    let cfg_path = cli.config.unwrap_or_else(default_config_path);

    match cmd {
        Commands::Config {
            action: ConfigAction::Init,
        } => {
            settings::save(&cfg_path, &AppConfig::default())?;
            println!("Initialized config at {}", cfg_path.display());
            Ok(())
        }
        Commands::Auth { action } => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            auth(SettingsStore::new(cfg_path, cfg), action).await
        }
        Commands::Status { json } => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            status(SettingsStore::new(cfg_path, cfg), json).await
        }
        Commands::Run => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            run(cfg, cfg_path).await
        }
    }
}

async fn run(cfg: AppConfig, cfg_path: PathBuf) -> Result<()> {
    let store = Arc::new(SettingsStore::new(cfg_path.clone(), cfg.clone()));
    let mut feed = PresenceFeed::new(FeedServices {
        relay_api: Arc::new(HttpRelayApi::new()),
        streaming_api: Arc::new(WebStreamingApi::new()),
        credentials: store.clone(),
    });
    feed.apply(&cfg.feed());
    info!(provider = ?cfg.provider, key = ?feed.key(), "cobalt started");

    let (display_tx, mut display_rx) = watch::channel(DisplayState::default());
    let sequencer_cancel = CancellationToken::new();
    let sequencer = tokio::spawn(run_sequencer(
        feed.subscribe(),
        display_tx,
        SequencerConfig::from_transition_config(&cfg.transition),
        sequencer_cancel.clone(),
    ));

    let mut feed_rx = feed.subscribe();
    let (reload_tx, mut reload_rx) = mpsc::channel::<()>(4);
    spawn_reload_watchers(cfg_path.clone(), cfg.intervals.file_watch_poll_ms, reload_tx);

    loop {
        tokio::select! {
            changed = display_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let shown = display_rx.borrow_and_update().clone();
                log_display(&shown);
            }
            changed = feed_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = feed_rx.borrow_and_update().clone();
                log_feed(&state);
            }
            msg = reload_rx.recv() => {
                if msg.is_some() {
                    match load_or_default(&cfg_path) {
                        Ok(new_cfg) => {
                            if new_cfg.transition != store.get().transition {
                                warn!("transition timings change on restart");
                            }
                            store.replace(new_cfg.clone());
                            if feed.apply(&new_cfg.feed()) {
                                info!(key = ?feed.key(), "configuration reloaded; feed restarted");
                            }
                        }
                        Err(err) => {
                            error!(error=%err, "failed to reload config");
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c; shutting down");
                break;
            }
        }
    }

    feed.shutdown();
    sequencer_cancel.cancel();
    let _ = sequencer.await;
    Ok(())
}

fn log_display(shown: &DisplayState) {
    match &shown.track {
        Some(track) => info!(
            phase = ?shown.phase,
            playing = shown.is_playing,
            title = %track.title,
            artists = %track.artist_names,
            album = %track.album_name,
            "display"
        ),
        None => info!(phase = ?shown.phase, "display: nothing playing"),
    }
}

fn log_feed(state: &PresenceFeedState) {
    match &state.last_error {
        Some(err) => warn!(status = ?state.connection_status, error = %err, "feed"),
        None => info!(status = ?state.connection_status, playing = state.is_playing, "feed"),
    }
}

async fn status(store: SettingsStore, json: bool) -> Result<()> {
    let cfg = store.get();
    let mut state = PresenceFeedState::disconnected();

    match cfg.provider {
        Some(MusicProvider::Relay) if !cfg.relay.subject_id.trim().is_empty() => {
            let api = HttpRelayApi::new();
            match api.fetch_presence(&cfg.relay.api_base, &cfg.relay.subject_id).await {
                Ok(presence) => {
                    state.set_playback(presence.track(), presence.listening_to_spotify);
                    state.connection_status = cobalt_core::ConnectionStatus::Connected;
                }
                Err(err) => state.last_error = Some(err.to_string()),
            }
        }
        Some(MusicProvider::Streaming) if cfg.streaming.is_authorized() => {
            let store = Arc::new(store);
            let mut poller =
                StreamingPoller::new(&cfg.streaming, Arc::new(WebStreamingApi::new()), store);
            match poller.tick(now_ms()).await {
                TickOutcome::Playback { track, is_playing } => {
                    state.set_playback(track, is_playing);
                    state.connection_status = cobalt_core::ConnectionStatus::Connected;
                }
                TickOutcome::Transient(err) | TickOutcome::AuthExpired(err) => {
                    state.last_error = Some(err.to_string());
                }
                TickOutcome::Skipped => {}
            }
        }
        _ => state.last_error = Some("no provider configured".to_string()),
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!("provider: {:?}", cfg.provider);
    println!("status: {:?}", state.connection_status);
    match &state.current {
        Some(track) => {
            println!("track: {} - {}", track.artist_names, track.title);
            if !track.album_name.is_empty() {
                println!("album: {}", track.album_name);
            }
            let now = now_ms();
            println!(
                "position: {}s / {}s",
                track.progress_ms(now) / 1_000,
                track.duration_ms() / 1_000
            );
        }
        None => println!("track: <none>"),
    }
    if let Some(err) = state.last_error {
        println!("error: {err}");
    }
    Ok(())
}

async fn auth(store: SettingsStore, action: AuthAction) -> Result<()> {
    let cfg = store.get();
    match action {
        AuthAction::Url => {
            if cfg.streaming.client_id.trim().is_empty() {
                bail!("set streaming.client_id in the config first");
            }
            let verifier = pkce::generate_verifier();
            let url = pkce::authorize_url(&cfg.streaming, &verifier);
            store.update(|c| c.streaming.code_verifier = verifier.clone())?;
            println!("Open this URL, approve, then run `cobalt auth exchange --code <code>`:");
            println!("{url}");
        }
        AuthAction::Exchange { code } => {
            if cfg.streaming.code_verifier.is_empty() {
                bail!("no PKCE verifier stored; run `cobalt auth url` first");
            }
            let api = WebStreamingApi::new();
            let grant = api
                .exchange_code(
                    &Endpoints::from_config(&cfg.streaming),
                    code.trim(),
                    &cfg.streaming.code_verifier,
                )
                .await
                .context("token exchange failed")?;
            let expires_at_ms = grant.expires_at_ms(now_ms());
            store.update(|c| {
                c.provider = Some(MusicProvider::Streaming);
                c.streaming.access_token = grant.access_token.clone();
                c.streaming.refresh_token = grant.refresh_token.clone().unwrap_or_default();
                c.streaming.token_expires_at_ms = expires_at_ms;
                c.streaming.code_verifier.clear();
            })?;
            println!("Streaming account connected.");
        }
        AuthAction::Logout => {
            store.persist_tokens(TokenUpdate::cleared());
            println!("Streaming credentials removed.");
        }
    }
    Ok(())
}

fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("cobalt").join("config.toml")
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();
}

fn spawn_reload_watchers(path: PathBuf, poll_ms: u64, tx: mpsc::Sender<()>) {
    let tx_poll = tx.clone();
    tokio::spawn(async move {
        let mut known_mtime = file_mtime(&path);
        let sleep = Duration::from_millis(poll_ms.max(1_000));
        loop {
            tokio::time::sleep(sleep).await;
            let current = file_mtime(&path);
            if current.is_some() && current != known_mtime {
                known_mtime = current;
                let _ = tx_poll.send(()).await;
            }
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let tx_hup = tx.clone();
        tokio::spawn(async move {
            if let Ok(mut sig) = signal(SignalKind::hangup()) {
                while sig.recv().await.is_some() {
                    let _ = tx_hup.send(()).await;
                }
            }
        });
    }
}

fn file_mtime(path: &Path) -> Option<std::time::SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}
