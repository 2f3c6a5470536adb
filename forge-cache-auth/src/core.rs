use forge_cache_core::model::Scope;
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};

use crate::claims::parse_scopes;
use crate::jwks::JwksCache;

/// Validates `Authorization: Bearer <JWT>` headers against the GitHub
/// Actions OIDC issuer and extracts the caller's scope list.
///
/// When `debug` is set, expiry/issuer/audience claim validation is skipped
/// (signature verification still runs) — a test-only escape hatch mirroring
/// the original's `SkipClaimsValidation`.
pub struct AuthValidator {
    jwks: JwksCache,
    debug: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,
    #[error("invalid Authorization header")]
    MalformedHeader,
    #[error("failed to validate token: {0}")]
    InvalidToken(#[source] anyhow::Error),
}

impl AuthValidator {
    pub fn new(debug: bool) -> Self {
        Self {
            jwks: JwksCache::new(),
            debug,
        }
    }

    /// `header` is the raw `Authorization` header value, if present.
    pub async fn validate(&self, header: Option<&str>) -> Result<Vec<Scope>, AuthError> {
        let header = header.ok_or(AuthError::MissingHeader)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::MalformedHeader)?;

        let scopes = self
            .validate_token(token)
            .await
            .map_err(AuthError::InvalidToken)?;

        Ok(scopes)
    }

    async fn validate_token(&self, token: &str) -> anyhow::Result<Vec<Scope>> {
        let header = decode_header(token)?;

        let signature_types = self.jwks.signature_types().await?;
        let alg_name = format!("{:?}", header.alg);
        if !signature_types.iter().any(|a| a == &alg_name) {
            anyhow::bail!("signature type {alg_name} is not accepted by the issuer");
        }

        let key_id = header
            .x5t
            .ok_or_else(|| anyhow::anyhow!("token header is missing x5t"))?;
        let jwk = self.jwks.lookup_key(&key_id).await?;
        let decoding_key = DecodingKey::from_jwk(&jwk)?;

        let mut validation = Validation::new(header.alg);
        if self.debug {
            validation.validate_exp = false;
            validation.validate_nbf = false;
            validation.required_spec_claims.clear();
        }
        validation.algorithms = vec![header.alg];

        let decoded = decode::<serde_json::Value>(token, &decoding_key, &validation)
            .map_err(|e| anyhow::anyhow!(e))?;

        parse_scopes(&decoded.claims)
    }
}
