//! Server configuration.
//!
//! Stored as TOML at `$SUREROUTE_CONFIG`, or `~/.config/sureroute/server.toml`
//! when that variable is unset. A missing file is created with defaults.
//! `SIMULATOR_URL` overrides `simulator_url` from the file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const CONFIG_ENV: &str = "SUREROUTE_CONFIG";
const SIMULATOR_ENV: &str = "SIMULATOR_URL";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address of the transfer HTTP API.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// WebSocket event channel port (0 = auto-assign).
    #[serde(default = "default_events_port")]
    pub events_port: u16,

    /// Root for state records, chunk blobs and assembled files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the link simulator. Unset = ideal link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulator_url: Option<String>,

    /// How long fetched link conditions are reused.
    #[serde(default = "default_conditions_ttl_ms")]
    pub conditions_ttl_ms: u64,

    /// Largest accepted request body.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,

    /// Seconds without activity after which an unfinished high-priority
    /// transfer stops tightening the medium and low limits.
    #[serde(default = "default_high_priority_idle_secs")]
    pub high_priority_idle_secs: u64,
}

fn default_listen_addr() -> SocketAddr {
    ([0, 0, 0, 0], 4000).into()
}

fn default_events_port() -> u16 {
    4001
}

fn default_data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("sureroute")
}

fn default_conditions_ttl_ms() -> u64 {
    500
}

fn default_max_chunk_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_high_priority_idle_secs() -> u64 {
    sureroute_ingest::HIGH_PRIORITY_IDLE.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            events_port: default_events_port(),
            data_dir: default_data_dir(),
            simulator_url: None,
            conditions_ttl_ms: default_conditions_ttl_ms(),
            max_chunk_bytes: default_max_chunk_bytes(),
            high_priority_idle_secs: default_high_priority_idle_secs(),
        }
    }
}

impl Config {
    /// Loads configuration from the default location and applies env overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&config_path())?;
        if let Ok(url) = std::env::var(SIMULATOR_ENV) {
            if !url.trim().is_empty() {
                config.simulator_url = Some(url);
            }
        }
        Ok(config)
    }

    /// Loads configuration from `path`, creating it with defaults if absent.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn conditions_ttl(&self) -> Duration {
        Duration::from_millis(self.conditions_ttl_ms)
    }

    pub fn high_priority_idle(&self) -> Duration {
        Duration::from_secs(self.high_priority_idle_secs)
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".into()))
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    match std::env::var(CONFIG_ENV) {
        Ok(p) if !p.is_empty() => PathBuf::from(p),
        _ => home_dir()
            .join(".config")
            .join("sureroute")
            .join("server.toml"),
    }
}
