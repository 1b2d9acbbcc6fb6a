use crate::creds::Creds;
use crate::error::ChainError;

use chrono::NaiveDate;
use reqwest::{
    Client, Response, StatusCode, Url,
    header::{ACCEPT, AUTHORIZATION},
};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

const CONTRACTS_TIMEOUT: Duration = Duration::from_secs(15);
const CHAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Read-only client for the Upstox option endpoints.
///
/// Every response that arrives is turned into JSON: a non-2xx status or an
/// unparsable body yields a payload with an `error` key rather than an `Err`.
/// Only transport failures (timeouts, refused connections) are errors.
pub struct UpstoxClient {
    client: Client,
    base_url: Url,
    creds: Creds,
}

impl UpstoxClient {
    pub fn new(base_url: &str, creds: Creds) -> Result<Self, ChainError> {
        let base_url = base_url.parse().map_err(|_| ChainError::InvalidUri)?;

        Ok(Self {
            client: Client::new(),
            base_url,
            creds,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.creds.access_token().is_some()
    }

    fn make_uri(&self, path: &str) -> Result<Url, ChainError> {
        self.base_url.join(path).map_err(|_| ChainError::InvalidUri)
    }

    /// Makes an authenticated GET request to the specified endpoint
    async fn get(
        &self,
        path: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Response, ChainError> {
        let token = self
            .creds
            .access_token()
            .ok_or(ChainError::MissingCredentials)?;
        let uri = self.make_uri(path)?;

        self.client
            .get(uri)
            .query(query)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ChainError::Http(e.to_string()))
    }

    pub async fn get_contracts(&self, instrument_key: &str) -> Result<Value, ChainError> {
        let res = self
            .get(
                "/v2/option/contract",
                &[("instrument_key", instrument_key)],
                CONTRACTS_TIMEOUT,
            )
            .await?;

        handle_response("contracts", res).await
    }

    pub async fn get_option_chain(
        &self,
        instrument_key: &str,
        expiry: NaiveDate,
    ) -> Result<Value, ChainError> {
        let expiry = expiry.format("%Y-%m-%d").to_string();
        let res = self
            .get(
                "/v2/option/chain",
                &[("instrument_key", instrument_key), ("expiry_date", expiry.as_str())],
                CHAIN_TIMEOUT,
            )
            .await?;

        handle_response("chain", res).await
    }
}

pub async fn handle_response(endpoint: &str, response: Response) -> Result<Value, ChainError> {
    debug!("{endpoint} response: <{response:?}>");

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ChainError::Http(e.to_string()))?;

    Ok(payload_from_body(endpoint, status, &body))
}

/// Builds the JSON handed downstream from a raw status and body.
///
/// Invalid JSON becomes `{"error": "Invalid JSON from <endpoint> endpoint (status N)"}`.
/// A non-2xx status adds `"error": "HTTP N"` unless the body already names an error.
pub fn payload_from_body(endpoint: &str, status: StatusCode, body: &str) -> Value {
    let code = status.as_u16();
    let mut payload = match serde_json::from_str::<Value>(body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("{endpoint} endpoint returned invalid JSON (status {code}): {e}");
            json!({ "error": format!("Invalid JSON from {endpoint} endpoint (status {code})") })
        }
    };

    if !status.is_success() {
        warn!("{endpoint} endpoint returned HTTP {code}");
        let http_error = json!(format!("HTTP {code}"));
        match payload.as_object_mut() {
            Some(obj) => {
                obj.entry("error").or_insert(http_error);
            }
            None => payload = json!({ "error": http_error, "body": payload }),
        }
    }

    payload
}
