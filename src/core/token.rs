//! Stateless session tokens.
//!
//! A token is `base64url(claims json) "." base64url(hmac-sha256(payload))`.
//! Nothing is stored server side; the user id, credential version and
//! expiry travel inside the signed payload.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::core::errors::AuthTokenError;
use crate::models::models::TokenClaims;

type HmacSha256 = Hmac<Sha256>;

const MAX_TOKEN_LEN: usize = 2048;

pub fn issue_token(
    user_id: &str,
    credential_version: u32,
    secret: &[u8],
    ttl_hours: i64,
) -> anyhow::Result<String> {
    let now = chrono::Utc::now().timestamp();
    let claims = TokenClaims {
        sub: user_id.to_string(),
        ver: credential_version,
        iat: now,
        exp: now + ttl_hours * 3600,
    };
    encode_claims(&claims, secret)
}

pub fn encode_claims(claims: &TokenClaims, secret: &[u8]) -> anyhow::Result<String> {
    let payload_part = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| anyhow::anyhow!("invalid token secret: {}", e))?;
    mac.update(payload_part.as_bytes());
    let sig_part = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{}.{}", payload_part, sig_part))
}

/// Checks the signature, then the expiry. Does not look the user up.
pub fn decode_token(token: &str, secret: &[u8]) -> Result<TokenClaims, AuthTokenError> {
    if token.is_empty() {
        return Err(AuthTokenError::NoToken);
    }
    if token.len() > MAX_TOKEN_LEN {
        return Err(AuthTokenError::Invalid);
    }
    let (payload_part, sig_part) = token.split_once('.').ok_or(AuthTokenError::Invalid)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| AuthTokenError::Invalid)?;
    mac.update(payload_part.as_bytes());
    let signature = URL_SAFE_NO_PAD
        .decode(sig_part)
        .map_err(|_| AuthTokenError::Invalid)?;
    mac.verify_slice(&signature)
        .map_err(|_| AuthTokenError::Invalid)?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload_part)
        .map_err(|_| AuthTokenError::Invalid)?;
    let claims: TokenClaims =
        serde_json::from_slice(&payload).map_err(|_| AuthTokenError::Invalid)?;

    if claims.exp <= chrono::Utc::now().timestamp() {
        return Err(AuthTokenError::Expired);
    }
    Ok(claims)
}
