use forge_cache_core::model::Scope;
use serde::Deserialize;
use serde_json::Value;

/// The subset of the access token's claims this service cares about. The
/// `ac` claim is itself a JSON-encoded string (not a nested object) whose
/// decoded value is the scope array.
#[derive(Debug, Deserialize)]
pub struct AccessClaims {
    pub ac: String,
}

/// Decodes the `ac` claim's inner JSON string into the caller's scope list.
pub fn parse_scopes(claims: &Value) -> anyhow::Result<Vec<Scope>> {
    let access: AccessClaims = serde_json::from_value(claims.clone())?;
    let scopes: Vec<Scope> = serde_json::from_str(&access.ac)?;
    if scopes.is_empty() {
        anyhow::bail!("token carries no scopes");
    }
    Ok(scopes)
}
