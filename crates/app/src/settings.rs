use anyhow::{Context, Result};
use cobalt_core::{AppConfig, CredentialStore, MusicProvider, TokenUpdate};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{error, info};

/// The single persisted configuration blob. The feed only ever reaches it
/// through `CredentialStore`.
pub struct SettingsStore {
    path: PathBuf,
    current: Mutex<AppConfig>,
}

impl SettingsStore {
    pub fn new(path: PathBuf, cfg: AppConfig) -> Self {
        Self {
            path,
            current: Mutex::new(cfg),
        }
    }

    pub fn get(&self) -> AppConfig {
        self.lock().clone()
    }

    /// Replaces the cached copy after an external edit, without writing.
    pub fn replace(&self, cfg: AppConfig) {
        *self.lock() = cfg;
    }

    /// Applies `patch` to the cached copy and to the file as it is on disk,
    /// so values injected through the environment never get written back.
    pub fn update<F>(&self, patch: F) -> Result<AppConfig>
    where
        F: Fn(&mut AppConfig),
    {
        let mut cfg = self.lock();
        off_runtime(|| -> Result<()> {
            let mut on_disk = read_file(&self.path)?;
            patch(&mut on_disk);
            save(&self.path, &on_disk)
        })?;
        patch(&mut cfg);
        Ok(cfg.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AppConfig> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialStore for SettingsStore {
    fn persist_tokens(&self, update: TokenUpdate) {
        let cleared = update.is_cleared();
        let res = self.update(|cfg| {
            cfg.streaming.access_token = update.access_token.clone();
            cfg.streaming.refresh_token = update.refresh_token.clone();
            cfg.streaming.token_expires_at_ms = update.expires_at_ms;
        });
        match res {
            Ok(_) if cleared => info!("streaming credentials cleared; run `cobalt auth url` to reconnect"),
            Ok(_) => info!("streaming credentials saved"),
            Err(err) => error!(error = %err, "failed to persist streaming credentials"),
        }
    }
}

pub fn save(path: &Path, cfg: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    let toml = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(())
}

pub fn load_or_default(path: &Path) -> Result<AppConfig> {
    let mut cfg = read_file(path)?;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

fn read_file(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

/// Token writes arrive from the poller task; keep the file I/O off the
/// async workers when the runtime allows it.
fn off_runtime<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

fn apply_env_overrides(cfg: &mut AppConfig) {
    if let Ok(v) = std::env::var("COBALT_LOG_LEVEL") {
        if !v.trim().is_empty() {
            cfg.log_level = v;
        }
    }
    if let Ok(v) = std::env::var("COBALT_PROVIDER") {
        match v.trim() {
            "relay" => cfg.provider = Some(MusicProvider::Relay),
            "streaming" => cfg.provider = Some(MusicProvider::Streaming),
            "none" => cfg.provider = None,
            _ => {}
        }
    }
    if let Ok(v) = std::env::var("COBALT_RELAY_SUBJECT_ID") {
        if !v.trim().is_empty() {
            cfg.relay.subject_id = v.trim().to_string();
        }
    }
}
