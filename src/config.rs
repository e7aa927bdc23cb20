//! Configuration management

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `${VAR}` resolution.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Proxy route table, matched in longest-prefix order
    pub routes: Vec<RouteConfig>,
    /// Bearer token cache configuration
    pub token: TokenConfig,
    /// Dex login handshake configuration
    pub dex: DexConfig,
    /// Iframe-embedding response rewrites
    pub embed: EmbedConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Upstream request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8402,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// A single proxy route: path prefix to backend origin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Path prefix to match (segment-aware, e.g. `/api` does not match `/apiarist`)
    pub prefix: String,

    /// Backend origin to forward to, e.g. `http://localhost:30080`
    pub target: String,

    /// Remove the matched prefix before forwarding
    #[serde(default)]
    pub strip_prefix: bool,

    /// Replace the matched prefix with this one before forwarding
    #[serde(default)]
    pub rewrite_to: Option<String>,

    /// Attach the cached bearer token as `Authorization: Bearer <token>`
    #[serde(default)]
    pub inject_token: bool,

    /// Drop the `Cookie` request header before forwarding
    #[serde(default)]
    pub strip_cookies: bool,

    /// Extra request headers; values support `${VAR}` / `${VAR:-default}`
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Bearer token cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Upstream token-issuing endpoint (GET, JSON response).
    /// Required when any route sets `inject_token`.
    pub endpoint: Option<String>,

    /// JSON field holding the token in the endpoint response
    pub field: String,

    /// Invalidate this long before the JWT `exp` claim
    #[serde(with = "humantime_serde")]
    pub safety_margin: Duration,

    /// Cache lifetime when the token is not a decodable JWT
    #[serde(with = "humantime_serde")]
    pub fallback_ttl: Duration,

    /// Static headers sent on the token fetch; values support `${VAR}`
    pub headers: HashMap<String, String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            field: "token".to_string(),
            safety_margin: Duration::from_secs(300),
            fallback_ttl: Duration::from_secs(600),
            headers: HashMap::new(),
        }
    }
}

/// Dex login handshake configuration (used by `dexgate login`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct DexConfig {
    /// Dex issuer base URL, e.g. `http://localhost:5556/dex`
    pub issuer: String,

    /// Protected URL that triggers the AuthService redirect into Dex
    pub start_url: String,

    /// Static-password username (supports `env:VAR_NAME`)
    pub username: String,

    /// Static-password password (supports `env:VAR_NAME`)
    pub password: String,
}

impl DexConfig {
    /// Resolve the username (expand `env:VAR_NAME` indirection)
    #[must_use]
    pub fn resolve_username(&self) -> String {
        resolve_env_ref(&self.username)
    }

    /// Resolve the password (expand `env:VAR_NAME` indirection)
    #[must_use]
    pub fn resolve_password(&self) -> String {
        resolve_env_ref(&self.password)
    }
}

fn resolve_env_ref(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix("env:") {
        env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

/// Iframe-embedding response rewrites
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Strip `X-Frame-Options` and rewrite CSP to `frame-ancestors *`
    pub allow_framing: bool,
    /// Inject permissive CORS headers and answer preflights
    pub cors: bool,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            allow_framing: true,
            cors: true,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (DEXGATE_ prefix)
        figment = figment.merge(Env::prefixed("DEXGATE_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        // Expand ${VAR} in route targets and header values
        config.expand_env_vars();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) {
        // Pattern: ${VAR} or ${VAR:-default}
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();

        for route in &mut self.routes {
            route.target = Self::expand_string(&re, &route.target);
            for value in route.headers.values_mut() {
                *value = Self::expand_string(&re, value);
            }
        }

        if let Some(ref endpoint) = self.token.endpoint {
            self.token.endpoint = Some(Self::expand_string(&re, endpoint));
        }
        for value in self.token.headers.values_mut() {
            *value = Self::expand_string(&re, value);
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Whether any route wants the cached bearer token
    #[must_use]
    pub fn needs_token_cache(&self) -> bool {
        self.routes.iter().any(|r| r.inject_token)
    }
}
