//! Bearer token cache
//!
//! Holds a single process-lifetime `{token, expires_at}` slot. The expiry is
//! derived from the JWT `exp` claim minus a safety margin; tokens that are
//! not decodable JWTs get a fixed fallback lifetime instead. On a miss or an
//! expired slot a fresh token is fetched from the configured upstream
//! endpoint. Two concurrent misses may both fetch; the duplicate fetch is
//! benign and not mitigated.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::TokenConfig;
use crate::{Error, Result};

/// A cached bearer token with its invalidation deadline
#[derive(Debug, Clone)]
pub struct CachedToken {
    /// The bearer token value
    pub token: String,
    /// Unix timestamp after which the token must not be served
    pub expires_at: u64,
}

impl CachedToken {
    /// Whether the deadline has passed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        now_secs() >= self.expires_at
    }
}

/// Process-lifetime bearer token cache
#[derive(Debug)]
pub struct TokenCache {
    /// Upstream token-issuing endpoint
    endpoint: String,
    /// JSON field holding the token in the endpoint response
    field: String,
    /// Subtracted from the JWT `exp` claim
    safety_margin: Duration,
    /// Lifetime for tokens without a decodable `exp`
    fallback_ttl: Duration,
    /// Static headers sent on the fetch
    headers: HeaderMap,
    /// HTTP client for token requests
    client: reqwest::Client,
    /// The single mutable slot
    slot: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    /// Create a token cache from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if no endpoint is configured or a static header is
    /// invalid.
    pub fn from_config(config: &TokenConfig, client: reqwest::Client) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| Error::Config("token.endpoint is required".to_string()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Config(format!("Invalid token header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("Invalid token header value for {name}: {e}")))?;
            headers.insert(name, value);
        }

        Ok(Self {
            endpoint,
            field: config.field.clone(),
            safety_margin: config.safety_margin,
            fallback_ttl: config.fallback_ttl,
            headers,
            client,
            slot: RwLock::new(None),
        })
    }

    /// Get a valid bearer token, fetching a fresh one if the slot is empty
    /// or expired. A cached, unexpired token is returned without network I/O.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] if the endpoint responds non-2xx or the
    /// response lacks the configured token field.
    pub async fn bearer(&self) -> Result<String> {
        {
            let slot = self.slot.read();
            if let Some(ref cached) = *slot {
                if !cached.is_expired() {
                    return Ok(cached.token.clone());
                }
            }
        }

        // Slot empty or expired. No lock is held across the fetch, so two
        // concurrent misses may both fetch; last writer wins.
        let fresh = self.fetch().await?;
        let token = fresh.token.clone();
        *self.slot.write() = Some(fresh);
        Ok(token)
    }

    /// Snapshot of the current slot (diagnostics and tests)
    #[must_use]
    pub fn peek(&self) -> Option<CachedToken> {
        self.slot.read().clone()
    }

    /// Fetch a fresh token from the upstream endpoint
    async fn fetch(&self) -> Result<CachedToken> {
        debug!(endpoint = %self.endpoint, "Fetching fresh bearer token");

        let response = self
            .client
            .get(&self.endpoint)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| Error::Token(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Token(format!(
                "Token endpoint returned HTTP {status}: {body}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Token(format!("Failed to parse token response: {e}")))?;

        let token = body
            .get(&self.field)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Token(format!("Token response has no string field {:?}", self.field))
            })?
            .to_string();

        let expires_at = expiry_deadline(&token, self.safety_margin, self.fallback_ttl);
        debug!(expires_at, "Cached bearer token");

        Ok(CachedToken { token, expires_at })
    }
}

/// Compute the cache deadline for a token: JWT `exp` minus the safety
/// margin, or `now + fallback_ttl` when the token is not a decodable JWT.
pub(crate) fn expiry_deadline(token: &str, safety_margin: Duration, fallback_ttl: Duration) -> u64 {
    match jwt_expiry(token) {
        Some(exp) => exp.saturating_sub(safety_margin.as_secs()),
        None => {
            warn!("Token is not a decodable JWT, using fallback TTL");
            now_secs() + fallback_ttl.as_secs()
        }
    }
}

/// Read the `exp` claim from an unverified JWT payload.
/// Returns `None` for anything that is not a three-part token with a
/// base64url JSON payload carrying a numeric `exp`.
fn jwt_expiry(token: &str) -> Option<u64> {
    let mut parts = token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;
    parts.next()?;

    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    claims.get("exp")?.as_u64()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
