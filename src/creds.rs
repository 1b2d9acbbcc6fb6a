use crate::bitwarden::Bitwarden;

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

const BW_SECRET_NAME: &str = "upstox_access_token";
pub const TOKEN_FILE: &str = "access_token.txt";

/// Bearer token for the Upstox API, loaded once and never refreshed.
pub struct Creds {
    token: Option<String>,
}

impl Creds {
    pub fn new() -> Creds {
        Creds { token: None }
    }

    pub fn with_token(token: impl Into<String>) -> Creds {
        Creds {
            token: Some(token.into()),
        }
    }

    /// Secrets manager first, then the plain-text token file.
    pub async fn load(token_file: &Path) -> Creds {
        match load_creds_from_secrets().await {
            Ok(token) => {
                info!("Loaded access token from bitwarden");
                return Creds::with_token(token);
            }
            Err(e) => debug!("No token from bitwarden: {e:#}"),
        }

        match load_creds_from_file(token_file) {
            Ok(token) => {
                info!("Loaded access token from {token_file:?}");
                Creds::with_token(token)
            }
            Err(e) => {
                warn!("No access token available: {e:#}");
                Creds::new()
            }
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

impl Default for Creds {
    fn default() -> Self {
        Self::new()
    }
}

async fn load_creds_from_secrets() -> Result<String> {
    let bw = Bitwarden::new().await?;
    let (token, _note) = bw.get_secret(BW_SECRET_NAME).await?;

    non_empty(token)
}

fn load_creds_from_file(path: &Path) -> Result<String> {
    let data =
        fs::read_to_string(path).with_context(|| format!("reading token file {path:?}"))?;

    non_empty(data)
}

fn non_empty(token: String) -> Result<String> {
    let token = token.trim();
    if token.is_empty() {
        bail!("access token is empty");
    }

    Ok(token.to_string())
}
