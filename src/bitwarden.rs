use anyhow::{Result, bail};
use bitwarden::secrets_manager::secrets::{
    SecretGetRequest, SecretIdentifiersRequest, SecretResponse,
};
use bitwarden::{Client, auth::login::AccessTokenLoginRequest, secrets_manager::ClientSecretsExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

const BITWARDEN_CONFIG: &str = ".bw.json";

/// Machine-account login material kept in `~/.bw.json`.
#[derive(Deserialize)]
struct BitwardenCreds {
    access_token: String,
    org_id: Uuid,
}

pub struct Bitwarden {
    client: Client,
    org_id: Uuid,
}

impl Bitwarden {
    pub async fn new() -> Result<Bitwarden> {
        let creds = load_bw_creds_from_file()?;
        let bw_client = Client::new(None);
        let token = AccessTokenLoginRequest {
            access_token: creds.access_token,
            state_file: None,
        };
        bw_client.auth().login_access_token(&token).await?;

        Ok(Bitwarden {
            client: bw_client,
            org_id: creds.org_id,
        })
    }

    async fn list_secrets(&self) -> Result<HashMap<String, Uuid>> {
        let res = self
            .client
            .secrets()
            .list(&SecretIdentifiersRequest {
                organization_id: self.org_id,
            })
            .await?;
        debug!("Listed {} bitwarden secrets", res.data.len());

        let secrets: HashMap<String, Uuid> = res
            .data
            .iter()
            .map(|secret| (secret.key.clone(), secret.id))
            .collect();

        Ok(secrets)
    }

    /// Returns the `(value, note)` pair stored under `key`.
    pub async fn get_secret(&self, key: &str) -> Result<(String, String)> {
        let secrets_md = self.list_secrets().await?;
        let id = match secrets_md.get(key) {
            Some(id) => *id,
            None => bail!("Secret key <{key}> does not exist in bitwarden"),
        };

        let res: SecretResponse = self.client.secrets().get(&SecretGetRequest { id }).await?;
        debug!("Fetched bitwarden secret <{key}>");

        Ok((res.value, res.note))
    }
}

fn bw_config_path() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(BITWARDEN_CONFIG)
}

fn load_bw_creds_from_file() -> Result<BitwardenCreds> {
    let bitwarden_data = fs::read_to_string(bw_config_path())?;
    let config: BitwardenCreds = serde_json::from_str(&bitwarden_data)?;
    Ok(config)
}
