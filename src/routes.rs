//! Proxy route table
//!
//! Compiles the configured path-prefix routes into a table resolved per
//! request: longest matching prefix wins, and the matched prefix is either
//! stripped or substituted before the request is forwarded upstream.

use axum::http::{HeaderName, HeaderValue};
use url::Url;

use crate::config::RouteConfig;
use crate::{Error, Result};

/// A compiled proxy route
#[derive(Debug, Clone)]
pub struct Route {
    /// Path prefix this route matches
    pub prefix: String,
    /// Backend origin requests are forwarded to
    pub target: Url,
    /// Remove the matched prefix before forwarding
    pub strip_prefix: bool,
    /// Replace the matched prefix with this one
    pub rewrite_to: Option<String>,
    /// Attach the cached bearer token
    pub inject_token: bool,
    /// Drop the `Cookie` request header
    pub strip_cookies: bool,
    /// Extra request headers, pre-parsed
    pub headers: Vec<(HeaderName, HeaderValue)>,
}

impl Route {
    fn from_config(config: &RouteConfig) -> Result<Self> {
        let prefix = config.prefix.trim_end_matches('/').to_string();
        if !prefix.starts_with('/') {
            return Err(Error::Config(format!(
                "Route prefix must start with '/': {}",
                config.prefix
            )));
        }

        let target = Url::parse(&config.target)
            .map_err(|e| Error::Config(format!("Invalid route target {}: {e}", config.target)))?;

        let mut headers = Vec::with_capacity(config.headers.len());
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Config(format!("Invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("Invalid header value for {name}: {e}")))?;
            headers.push((name, value));
        }

        Ok(Self {
            prefix,
            target,
            strip_prefix: config.strip_prefix,
            rewrite_to: config.rewrite_to.clone(),
            inject_token: config.inject_token,
            strip_cookies: config.strip_cookies,
            headers,
        })
    }

    /// Whether this route matches the path (segment-aware)
    fn matches(&self, path: &str) -> bool {
        path == self.prefix
            || path
                .strip_prefix(self.prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Rewrite the matched path for forwarding
    fn rewrite(&self, path: &str) -> String {
        let rest = &path[self.prefix.len()..];

        if let Some(ref replacement) = self.rewrite_to {
            let replacement = replacement.trim_end_matches('/');
            return format!("{replacement}{rest}");
        }

        if self.strip_prefix {
            if rest.is_empty() {
                return "/".to_string();
            }
            return rest.to_string();
        }

        path.to_string()
    }
}

/// Route table resolved per request
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    /// Routes sorted by prefix length, longest first
    routes: Vec<Route>,
}

impl RouteTable {
    /// Compile a route table from configuration
    ///
    /// # Errors
    ///
    /// Returns an error on an unparseable target URL, a prefix that does not
    /// start with `/`, or an invalid extra header.
    pub fn from_config(configs: &[RouteConfig]) -> Result<Self> {
        let mut routes = configs
            .iter()
            .map(Route::from_config)
            .collect::<Result<Vec<_>>>()?;
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(Self { routes })
    }

    /// Resolve a request path to its route and rewritten upstream path.
    /// Longest matching prefix wins.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<(&Route, String)> {
        let route = self.routes.iter().find(|r| r.matches(path))?;
        Some((route, route.rewrite(path)))
    }

    /// Number of routes in the table
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Iterate over the compiled routes
    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn route(prefix: &str, target: &str) -> RouteConfig {
        RouteConfig {
            prefix: prefix.to_string(),
            target: target.to_string(),
            strip_prefix: false,
            rewrite_to: None,
            inject_token: false,
            strip_cookies: false,
            headers: HashMap::new(),
        }
    }

    #[test]
    fn prefix_match_is_segment_aware() {
        let table = RouteTable::from_config(&[route("/api", "http://localhost:30080")]).unwrap();

        assert!(table.resolve("/api").is_some());
        assert!(table.resolve("/api/v1/pods").is_some());
        assert!(table.resolve("/apiarist").is_none());
        assert!(table.resolve("/other").is_none());
    }

    #[test]
    fn longest_prefix_wins() {
        let table = RouteTable::from_config(&[
            route("/api", "http://short.example"),
            route("/api/pipelines", "http://long.example"),
        ])
        .unwrap();

        let (matched, _) = table.resolve("/api/pipelines/runs").unwrap();
        assert_eq!(matched.target.host_str(), Some("long.example"));

        let (matched, _) = table.resolve("/api/other").unwrap();
        assert_eq!(matched.target.host_str(), Some("short.example"));
    }

    #[test]
    fn strip_prefix_removes_matched_prefix() {
        let mut config = route("/api", "http://localhost:30080");
        config.strip_prefix = true;
        let table = RouteTable::from_config(&[config]).unwrap();

        let (_, rewritten) = table.resolve("/api/v1/pods").unwrap();
        assert_eq!(rewritten, "/v1/pods");
    }

    #[test]
    fn strip_prefix_of_exact_match_yields_root() {
        let mut config = route("/api", "http://localhost:30080");
        config.strip_prefix = true;
        let table = RouteTable::from_config(&[config]).unwrap();

        let (_, rewritten) = table.resolve("/api").unwrap();
        assert_eq!(rewritten, "/");
    }

    #[test]
    fn rewrite_to_substitutes_prefix() {
        let mut config = route("/iframe-pipelines", "http://localhost:8888");
        config.rewrite_to = Some("/pipeline".to_string());
        let table = RouteTable::from_config(&[config]).unwrap();

        let (_, rewritten) = table.resolve("/iframe-pipelines/runs/42").unwrap();
        assert_eq!(rewritten, "/pipeline/runs/42");
    }

    #[test]
    fn no_flags_keeps_path_verbatim() {
        let table = RouteTable::from_config(&[route("/dex", "http://localhost:5556")]).unwrap();

        let (_, rewritten) = table.resolve("/dex/auth/local").unwrap();
        assert_eq!(rewritten, "/dex/auth/local");
    }

    #[test]
    fn well_known_prefix_matches_discovery_path() {
        let table =
            RouteTable::from_config(&[route("/.well-known", "http://localhost:5556")]).unwrap();

        let (_, rewritten) = table.resolve("/.well-known/openid-configuration").unwrap();
        assert_eq!(rewritten, "/.well-known/openid-configuration");
    }

    #[test]
    fn invalid_target_is_a_config_error() {
        let err = RouteTable::from_config(&[route("/api", "not a url")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn prefix_without_leading_slash_is_rejected() {
        let err = RouteTable::from_config(&[route("api", "http://localhost:1")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn extra_headers_are_parsed() {
        let mut config = route("/api", "http://localhost:30080");
        config
            .headers
            .insert("x-forwarded-proto".to_string(), "https".to_string());
        let table = RouteTable::from_config(&[config]).unwrap();

        let (matched, _) = table.resolve("/api/x").unwrap();
        assert_eq!(matched.headers.len(), 1);
        assert_eq!(matched.headers[0].0.as_str(), "x-forwarded-proto");
    }
}
