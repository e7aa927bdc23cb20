//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::router::{AppState, create_router};
use crate::config::Config;
use crate::{Error, Result};

/// dexgate server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared application state
    state: Arc<AppState>,
}

impl Gateway {
    /// Create a new gateway from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the route table or HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let state = Arc::new(AppState::from_config(&config)?);

        for route in state.routes.iter() {
            info!(prefix = %route.prefix, target = %route.target, "Registered route");
        }

        Ok(Self { config, state })
    }

    /// The gateway's router (exposed for integration tests)
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Run the gateway until shutdown
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address is invalid or serving fails.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = self.router();
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("DEXGATE v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = self.config.server.port, "Listening");
        info!(routes = self.state.routes.len(), "Routes compiled");

        if self.state.routes.is_empty() {
            warn!("Route table is empty - every request will 404");
        }
        for route in self.state.routes.iter() {
            info!("  {} -> {}", route.prefix, route.target);
        }

        if self.state.token_cache.is_some() {
            info!("TOKEN CACHE enabled (bearer injection on marked routes)");
        } else {
            info!("Token cache disabled - no route injects a bearer token");
        }
        if self.config.embed.allow_framing {
            info!("EMBED rewrites enabled (X-Frame-Options stripped, frame-ancestors *)");
        }
        info!("============================================================");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
