use crate::config::OneMapConfig;
use crate::constants::{ONEMAP_TOKEN_URL, TOKEN_EXPIRY_MARGIN_SECS};
use crate::error::{PipelineError, Result};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UnverifiedClaims {
    exp: Option<i64>,
}

/// Obtains and caches the bearer token for the geocoding service.
///
/// The cached token's expiry is read from its unverified claims; any
/// malformed token is treated as expired and refreshed, never as an error.
pub struct TokenManager {
    client: reqwest::Client,
    token_url: String,
    token_path: PathBuf,
    email: String,
    password: String,
}

impl TokenManager {
    pub fn new(config: &OneMapConfig, data_root: &Path) -> Result<Self> {
        let email = std::env::var(&config.email_env).map_err(|_| {
            PipelineError::Auth(format!("credential env var {} not set", config.email_env))
        })?;
        let password = std::env::var(&config.password_env).map_err(|_| {
            PipelineError::Auth(format!("credential env var {} not set", config.password_env))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            token_url: ONEMAP_TOKEN_URL.to_string(),
            token_path: data_root.join("onemap_token"),
            email,
            password,
        })
    }

    /// Points the manager at a different credential-exchange endpoint, for
    /// exercising the refresh path against a local server.
    pub fn with_endpoint(mut self, url: &str) -> Self {
        self.token_url = url.to_string();
        self
    }

    /// Returns a token whose expiry is comfortably in the future, refreshing
    /// against the credential-exchange endpoint when needed.
    pub async fn valid_token(&self) -> Result<String> {
        if let Some(cached) = self.cached_token() {
            if !token_expired(&cached) {
                debug!("using cached geocoding token");
                return Ok(cached);
            }
            debug!("cached geocoding token expired or unreadable");
        }
        self.refresh().await
    }

    fn cached_token(&self) -> Option<String> {
        let raw = fs::read_to_string(&self.token_path).ok()?;
        let token = raw.trim().to_string();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    }

    async fn refresh(&self) -> Result<String> {
        info!("requesting new geocoding token");
        let body = serde_json::json!({
            "email": self.email,
            "password": self.password,
        });
        let resp = self
            .client
            .post(&self.token_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Auth(format!("token request failed: {}", e)))?;
        if !resp.status().is_success() {
            return Err(PipelineError::Auth(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }
        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::Auth(format!("token response unreadable: {}", e)))?;

        // Persist for later runs; a write failure is not fatal, the token is
        // still usable for this run.
        if let Err(e) = write_token(&self.token_path, &parsed.access_token) {
            warn!(error = %e, "could not persist refreshed token");
        }
        Ok(parsed.access_token)
    }
}

fn write_token(path: &Path, token: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, token)
}

/// Reads the expiry timestamp from a token's unverified claims.
///
/// The signature is not checked; only the self-reported expiry is used to
/// decide whether a refresh is due. Returns `None` for any structural or
/// decode problem.
pub fn claims_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    // Token payloads are unpadded; restore padding before decoding.
    let mut padded = payload.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    let bytes = URL_SAFE.decode(padded).ok()?;
    let claims: UnverifiedClaims = serde_json::from_slice(&bytes).ok()?;
    claims.exp
}

/// A token with an unreadable or missing expiry counts as expired.
pub fn token_expired(token: &str) -> bool {
    match claims_expiry(token) {
        Some(exp) => exp - TOKEN_EXPIRY_MARGIN_SECS <= chrono::Utc::now().timestamp(),
        None => true,
    }
}
