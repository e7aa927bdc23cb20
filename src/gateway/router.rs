//! HTTP router and the forwarding handler

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, warn};

use super::embed;
use crate::config::{Config, EmbedConfig};
use crate::routes::RouteTable;
use crate::token::TokenCache;
use crate::{Error, Result};

/// Headers that are connection-scoped and must not be forwarded either way
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name) || name.as_str() == "keep-alive"
}

/// Shared application state
#[derive(Debug)]
pub struct AppState {
    /// Compiled route table
    pub routes: RouteTable,
    /// Bearer token cache, present when a route injects tokens
    pub token_cache: Option<Arc<TokenCache>>,
    /// Upstream HTTP client (redirects pass through to the browser)
    pub client: reqwest::Client,
    /// Response rewrite settings
    pub embed: EmbedConfig,
    /// Maximum buffered request body size
    pub max_body_size: usize,
}

impl AppState {
    /// Build application state from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the route table fails to compile, the HTTP client
    /// cannot be built, or a route injects tokens without a configured token
    /// endpoint.
    pub fn from_config(config: &Config) -> Result<Self> {
        let routes = RouteTable::from_config(&config.routes)?;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.server.request_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;

        let token_cache = if config.needs_token_cache() {
            Some(Arc::new(TokenCache::from_config(
                &config.token,
                client.clone(),
            )?))
        } else {
            None
        };

        Ok(Self {
            routes,
            token_cache,
            client,
            embed: config.embed.clone(),
            max_body_size: config.server.max_body_size,
        })
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .fallback(proxy_handler)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /healthz handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "routes": state.routes.len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Fallback handler: resolve the route and forward the request upstream
async fn proxy_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    let Some((route, rewritten)) = state.routes.resolve(&path) else {
        debug!(%path, "No route matched");
        return error_response(
            StatusCode::NOT_FOUND,
            format!("No route for path: {path}"),
        );
    };

    // Preflights are answered locally, never forwarded
    let cors_request_headers = req
        .headers()
        .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned();
    if state.embed.cors && req.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        embed::apply_cors(response.headers_mut(), cors_request_headers.as_ref());
        return response;
    }

    let method = req.method().clone();
    let mut upstream_headers = HeaderMap::new();
    for (name, value) in req.headers() {
        if is_hop_by_hop(name) || *name == header::HOST {
            continue;
        }
        if route.strip_cookies && *name == header::COOKIE {
            continue;
        }
        upstream_headers.append(name.clone(), value.clone());
    }
    for (name, value) in &route.headers {
        upstream_headers.insert(name.clone(), value.clone());
    }

    if route.inject_token {
        // Validated at startup; a missing cache here is a bug, not a 500 worth hiding
        let Some(cache) = state.token_cache.as_ref() else {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Token injection enabled without a token cache",
            );
        };
        match cache.bearer().await {
            Ok(token) => match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(value) => {
                    upstream_headers.insert(header::AUTHORIZATION, value);
                }
                Err(e) => {
                    return error_response(
                        StatusCode::BAD_GATEWAY,
                        format!("Token is not a valid header value: {e}"),
                    );
                }
            },
            Err(e) => {
                warn!(prefix = %route.prefix, error = %e, "Bearer token unavailable");
                return error_response(StatusCode::BAD_GATEWAY, e.to_string());
            }
        }
    }

    let mut upstream_url = route.target.clone();
    let base = upstream_url.path().trim_end_matches('/').to_string();
    upstream_url.set_path(&format!("{base}{rewritten}"));
    upstream_url.set_query(query.as_deref());

    let body: Bytes = match axum::body::to_bytes(req.into_body(), state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("Failed to buffer request body: {e}"),
            );
        }
    };

    debug!(%path, upstream = %upstream_url, "Forwarding");

    let result = state
        .client
        .request(method, upstream_url.clone())
        .headers(upstream_headers)
        .body(body)
        .send()
        .await;

    let upstream_response = match result {
        Ok(response) => response,
        Err(e) => {
            warn!(prefix = %route.prefix, upstream = %upstream_url, error = %e, "Upstream request failed");
            return error_response(StatusCode::BAD_GATEWAY, format!("Upstream error: {e}"));
        }
    };

    let status = upstream_response.status();
    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream_response.headers() {
        // Content-length is recomputed after the body is buffered
        if is_hop_by_hop(name) || *name == header::CONTENT_LENGTH {
            continue;
        }
        response_headers.append(name.clone(), value.clone());
    }
    embed::scrub_response(
        &mut response_headers,
        &state.embed,
        cors_request_headers.as_ref(),
    );

    let bytes = match upstream_response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(prefix = %route.prefix, error = %e, "Failed to read upstream body");
            return error_response(StatusCode::BAD_GATEWAY, format!("Upstream error: {e}"));
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

/// JSON error body with the proxy's status mapping
fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_recognized() {
        assert!(is_hop_by_hop(&header::CONNECTION));
        assert!(is_hop_by_hop(&header::TRANSFER_ENCODING));
        assert!(is_hop_by_hop(&HeaderName::from_static("keep-alive")));
        assert!(!is_hop_by_hop(&header::AUTHORIZATION));
        assert!(!is_hop_by_hop(&header::COOKIE));
    }

    #[test]
    fn state_from_config_rejects_token_routes_without_endpoint() {
        let yaml = r"
routes:
  - prefix: /api
    target: http://localhost:30080
    inject_token: true
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = AppState::from_config(&config).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn state_from_config_skips_cache_when_unused() {
        let yaml = r"
routes:
  - prefix: /dex
    target: http://localhost:5556
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let state = AppState::from_config(&config).unwrap();
        assert!(state.token_cache.is_none());
        assert_eq!(state.routes.len(), 1);
    }
}
