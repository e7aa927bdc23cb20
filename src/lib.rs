//! dexgate library
//!
//! Development gateway for Kubernetes/ML dashboard stacks:
//!
//! - **Reverse proxy**: path-prefix routes to multiple backend origins with
//!   prefix stripping/rewriting
//! - **Token cache**: process-lifetime bearer token slot with JWT-expiry-aware
//!   invalidation, injected on marked routes
//! - **Embed rewrites**: strips `X-Frame-Options`, rewrites CSP to
//!   `frame-ancestors *`, injects permissive CORS
//! - **Login handshake**: drives the Dex OIDC flow (state → request token →
//!   credentials → approval → code → session cookie) as a diagnostic

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handshake;
pub mod routes;
pub mod token;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
