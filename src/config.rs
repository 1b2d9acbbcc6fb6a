use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::info;

use super::{DEFAULT_INSTRUMENT_KEY, UPSTOX_API, UPSTOX_CONFIG, upstox_dir};
use crate::creds::TOKEN_FILE;

const HISTORY_FILE: &str = "option_chain_history.jsonl";
const LATEST_FILE: &str = "option_chain_latest.json";
const MIN_POLL_SECONDS: u64 = 2;
const MAX_POLL_SECONDS: u64 = 600;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub instrument_key: String,
    pub poll_seconds: u64,
    pub history_file: PathBuf,
    pub latest_file: PathBuf,
    pub token_file: PathBuf,
    /// Manual expiry; when unset the nearest listed expiry is used.
    pub expiry: Option<NaiveDate>,
}

impl Default for Config {
    fn default() -> Self {
        let dir = upstox_dir();
        Self {
            base_url: UPSTOX_API.to_string(),
            instrument_key: DEFAULT_INSTRUMENT_KEY.to_string(),
            poll_seconds: 10,
            history_file: dir.join(HISTORY_FILE),
            latest_file: dir.join(LATEST_FILE),
            token_file: dir.join(TOKEN_FILE),
            expiry: None,
        }
    }
}

impl Config {
    /// Reads `~/.upstox/config.toml`.
    pub async fn new() -> Result<Config> {
        Self::from_path(&upstox_config_path()).await
    }

    /// A missing file means defaults; a malformed one is an error.
    pub async fn from_path(path: &Path) -> Result<Config> {
        info!("finding config in {path:?}");
        let data = match fs::read_to_string(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("no config at {path:?}, using defaults");
                return Ok(Config::default());
            }
            Err(e) => return Err(e).with_context(|| format!("reading config {path:?}")),
        };

        Self::from_str(data.as_str()).with_context(|| format!("parsing config {path:?}"))
    }

    fn from_str(data: &str) -> Result<Config> {
        Ok(toml::from_str::<Config>(data)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_seconds.clamp(MIN_POLL_SECONDS, MAX_POLL_SECONDS))
    }
}

fn upstox_config_path() -> PathBuf {
    upstox_dir().join(UPSTOX_CONFIG)
}
