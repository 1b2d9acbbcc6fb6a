pub mod bitwarden;
pub mod chain;
pub mod config;
pub mod creds;
pub mod error;
pub mod expiry;
pub mod fields;
pub mod poller;
pub mod store;
pub mod table;
pub mod upstox;

const UPSTOX_DIR: &str = ".upstox";
const UPSTOX_CONFIG: &str = "config.toml";
const UPSTOX_API: &str = "https://api.upstox.com";
const DEFAULT_INSTRUMENT_KEY: &str = "NSE_INDEX|Nifty 50";

/// `~/.upstox`, or `.upstox` relative to the working directory when there is no home.
pub fn upstox_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(UPSTOX_DIR)
}
