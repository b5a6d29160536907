//! Request authentication.
//!
//! Two credentials exist:
//!
//! - the **cron secret**, a shared bearer credential that gates the
//!   ingestion trigger;
//! - **user session tokens** of the form `user_id|expiry_unix|signature`,
//!   where the signature is hex HMAC-SHA256 of `user_id|expiry_unix` under
//!   the session secret. Identity is issued elsewhere; this module only
//!   verifies it (and mints tokens for local use).
//!
//! An unset secret rejects everything it guards.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tracing::debug;

use crate::error::DigestError;

type HmacSha256 = Hmac<Sha256>;

/// The bearer token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Checks the ingestion trigger credential.
pub fn check_cron(presented: Option<&str>, secret: Option<&str>) -> Result<(), DigestError> {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return Err(DigestError::Auth("cron secret is not configured".into()));
    };
    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), secret.as_bytes()) => Ok(()),
        Some(_) => Err(DigestError::Auth("invalid cron credential".into())),
        None => Err(DigestError::Auth("missing bearer token".into())),
    }
}

fn mac_for(secret: &str, payload: &str) -> Result<HmacSha256, DigestError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| DigestError::Auth(format!("bad session secret: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// Mints a session token for `user_id` valid for `ttl` from `now_unix`.
pub fn issue_token(
    secret: &str,
    user_id: &str,
    ttl: Duration,
    now_unix: i64,
) -> Result<String, DigestError> {
    if secret.is_empty() {
        return Err(DigestError::Auth("session secret is not configured".into()));
    }
    if user_id.is_empty() || user_id.contains('|') {
        return Err(DigestError::Auth(format!("invalid user id: {user_id:?}")));
    }

    let expiry = now_unix + ttl.as_secs() as i64;
    let payload = format!("{user_id}|{expiry}");
    let signature = hex::encode(mac_for(secret, &payload)?.finalize().into_bytes());
    Ok(format!("{payload}|{signature}"))
}

/// Verifies a session token and returns its user id.
pub fn verify_token(secret: &str, token: &str, now_unix: i64) -> Result<String, DigestError> {
    if secret.is_empty() {
        return Err(DigestError::Auth("session secret is not configured".into()));
    }

    let mut parts = token.rsplitn(3, '|');
    let (Some(signature), Some(expiry), Some(user_id)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(DigestError::Auth("malformed session token".into()));
    };
    if user_id.is_empty() {
        return Err(DigestError::Auth("malformed session token".into()));
    }

    let signature =
        hex::decode(signature).map_err(|_| DigestError::Auth("malformed signature".into()))?;
    mac_for(secret, &format!("{user_id}|{expiry}"))?
        .verify_slice(&signature)
        .map_err(|_| DigestError::Auth("bad signature".into()))?;

    let expiry: i64 = expiry
        .parse()
        .map_err(|_| DigestError::Auth("malformed expiry".into()))?;
    if now_unix > expiry {
        return Err(DigestError::Auth("session expired".into()));
    }

    Ok(user_id.to_string())
}

/// Session signing key, pulled from router state.
#[derive(Clone, Default)]
pub struct SessionKey(pub Option<Arc<str>>);

impl SessionKey {
    pub fn new(secret: Option<&str>) -> Self {
        Self(secret.filter(|s| !s.is_empty()).map(Arc::from))
    }

    fn verify(&self, headers: &HeaderMap) -> Result<String, DigestError> {
        let secret = self
            .0
            .as_deref()
            .ok_or_else(|| DigestError::Auth("session secret is not configured".into()))?;
        let token =
            bearer_token(headers).ok_or_else(|| DigestError::Auth("missing bearer token".into()))?;
        verify_token(secret, token, chrono::Utc::now().timestamp())
    }
}

/// 401 with a JSON `{ "error": ... }` body.
pub struct Unauthorized(pub String);

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": self.0 }))).into_response()
    }
}

impl From<DigestError> for Unauthorized {
    fn from(err: DigestError) -> Self {
        Unauthorized(err.to_string())
    }
}

/// An identified caller. Rejects with 401 when absent or invalid.
#[derive(Debug, Clone, PartialEq)]
pub struct UserSession {
    pub user_id: String,
}

impl<S> FromRequestParts<S> for UserSession
where
    SessionKey: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Unauthorized;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user_id = SessionKey::from_ref(state).verify(&parts.headers)?;
        Ok(UserSession { user_id })
    }
}

/// A caller that may or may not be identified. Bad tokens count as
/// anonymous.
#[derive(Debug, Clone, PartialEq)]
pub struct MaybeUser(pub Option<UserSession>);

impl<S> FromRequestParts<S> for MaybeUser
where
    SessionKey: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if bearer_token(&parts.headers).is_none() {
            return Ok(MaybeUser(None));
        }
        match SessionKey::from_ref(state).verify(&parts.headers) {
            Ok(user_id) => Ok(MaybeUser(Some(UserSession { user_id }))),
            Err(e) => {
                debug!(error = %e, "ignoring invalid session token");
                Ok(MaybeUser(None))
            }
        }
    }
}
