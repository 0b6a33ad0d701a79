use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};

use serde::Deserialize;

use crate::{
    media::types::{CodecFamily, HardwareAcceleration},
    pool::DEFAULT_MAX_SESSIONS,
    session::runner::SessionSettings,
};

pub const CONFIG_ENV: &str = "NVR_LIVE_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// WebSocket endpoint serving raw camera streams.
    pub gateway_url: String,
    pub listen: String,
    pub max_sessions: usize,
    pub warmup_ms: u64,
    pub fade_in_ms: u64,
    pub hardware_acceleration: HardwareAcceleration,
    /// Codec assumed until the stream reveals its own.
    pub default_codec: Option<CodecFamily>,
    /// Latest-frame JPEGs are written here when set.
    pub snapshot_dir: Option<PathBuf>,
    pub snapshot_interval_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            gateway_url: "ws://127.0.0.1:8000/api/miot/ws/video_stream".to_string(),
            listen: "0.0.0.0:8080".to_string(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            warmup_ms: 100,
            fade_in_ms: 300,
            hardware_acceleration: HardwareAcceleration::PreferHardware,
            default_codec: None,
            snapshot_dir: None,
            snapshot_interval_ms: 500,
        }
    }
}

impl LiveConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read config {}: {}", path.display(), e))?;
        let config: LiveConfig = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parse config {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.max_sessions == 0 {
            anyhow::bail!("max_sessions must be at least 1");
        }
        if self.gateway_url.is_empty() {
            anyhow::bail!("gateway_url is required");
        }
        Ok(())
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            warmup: Duration::from_millis(self.warmup_ms),
            fade_in: Duration::from_millis(self.fade_in_ms),
            hardware_acceleration: self.hardware_acceleration,
        }
    }
}

static CONFIG: OnceLock<LiveConfig> = OnceLock::new();

/// Loads the configuration once: `path`, else `$NVR_LIVE_CONFIG`, else defaults.
pub fn init(path: Option<&Path>) -> anyhow::Result<&'static LiveConfig> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    let config = match path {
        Some(path) => LiveConfig::from_file(&path)?,
        None => LiveConfig::default(),
    };
    if CONFIG.set(config).is_err() {
        log::warn!("configuration already initialized");
    }
    Ok(CONFIG.get_or_init(LiveConfig::default))
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
