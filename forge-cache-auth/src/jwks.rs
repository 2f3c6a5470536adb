use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::JwkSet;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

const WELL_KNOWN_URL: &str =
    "https://token.actions.githubusercontent.com/.well-known/openid-configuration";
const REFRESH_INTERVAL: chrono::Duration = chrono::Duration::hours(24);

#[derive(Debug, Deserialize)]
struct WellKnownDocument {
    #[serde(rename = "id_token_signing_alg_values_supported")]
    signature_types: Vec<String>,
    jwks_uri: String,
}

struct Cached {
    well_known: WellKnownDocument,
    jwks: JwkSet,
    fetched_at: DateTime<Utc>,
}

/// Lazily-refreshed cache of the GitHub OIDC issuer's signing keys.
///
/// Both the well-known document and the JWKS document are re-fetched
/// together once `REFRESH_INTERVAL` has elapsed since the last successful
/// fetch; a concurrent validation occurring during the refresh blocks on
/// the write lock rather than racing a second fetch.
pub struct JwksCache {
    http: reqwest::Client,
    state: RwLock<Option<Cached>>,
}

impl JwksCache {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(2))
                .user_agent("forge-cache-server/1.0")
                .build()
                .expect("static client configuration is valid"),
            state: RwLock::new(None),
        }
    }

    /// Returns the signing algorithms the issuer currently advertises.
    pub async fn signature_types(&self) -> anyhow::Result<Vec<String>> {
        self.ensure_fresh().await?;
        let guard = self.state.read().await;
        Ok(guard
            .as_ref()
            .expect("ensure_fresh populates state")
            .well_known
            .signature_types
            .clone())
    }

    /// Looks up the JWK whose `x5t` (X.509 certificate SHA-1 thumbprint)
    /// matches `key_id`, refreshing the cache first if stale.
    pub async fn lookup_key(&self, key_id: &str) -> anyhow::Result<jsonwebtoken::jwk::Jwk> {
        self.ensure_fresh().await?;
        let guard = self.state.read().await;
        let cached = guard.as_ref().expect("ensure_fresh populates state");

        cached
            .jwks
            .keys
            .iter()
            .find(|jwk| {
                jwk.common
                    .x509_sha1_fingerprint
                    .as_deref()
                    .map(|fp| fp == key_id)
                    .unwrap_or(false)
            })
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("signing key {key_id} not found in JWKS"))
    }

    async fn ensure_fresh(&self) -> anyhow::Result<()> {
        {
            let guard = self.state.read().await;
            if let Some(cached) = guard.as_ref() {
                if Utc::now() - cached.fetched_at < REFRESH_INTERVAL {
                    return Ok(());
                }
            }
        }

        let mut guard = self.state.write().await;
        if let Some(cached) = guard.as_ref() {
            if Utc::now() - cached.fetched_at < REFRESH_INTERVAL {
                return Ok(());
            }
        }

        debug!("refreshing GitHub OIDC well-known and JWKS documents");
        let well_known: WellKnownDocument = self
            .http
            .get(WELL_KNOWN_URL)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let jwks: JwkSet = self
            .http
            .get(&well_known.jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        *guard = Some(Cached {
            well_known,
            jwks,
            fetched_at: Utc::now(),
        });
        Ok(())
    }
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}
