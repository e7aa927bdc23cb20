//! dexgate - token-cached reverse proxy with Dex OIDC session bridging

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use dexgate::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    handshake::HandshakeDriver,
    routes::RouteTable,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // Load configuration with CLI overrides
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Login {
            start_url,
            username,
            password,
        }) => run_login(config, start_url, username, password).await,
        Some(Command::Routes) => run_routes(&config),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Run the proxy server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        routes = config.routes.len(),
        "Starting dexgate"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}

/// Run the Dex login handshake diagnostic
async fn run_login(
    config: Config,
    start_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
) -> ExitCode {
    let mut dex = config.dex;
    if let Some(url) = start_url {
        dex.start_url = url;
    }
    if let Some(user) = username {
        dex.username = user;
    }
    if let Some(pass) = password {
        dex.password = pass;
    }

    let driver = match HandshakeDriver::new(&dex) {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to create handshake driver: {e}");
            return ExitCode::FAILURE;
        }
    };

    match driver.login().await {
        Ok(session) => {
            info!(code = %session.code, "Handshake complete");
            println!("authservice_session={}", session.cookie);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Handshake failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Print the compiled route table
fn run_routes(config: &Config) -> ExitCode {
    let table = match RouteTable::from_config(&config.routes) {
        Ok(t) => t,
        Err(e) => {
            error!("Invalid route table: {e}");
            return ExitCode::FAILURE;
        }
    };

    if table.is_empty() {
        println!("Route table is empty.");
        return ExitCode::SUCCESS;
    }

    println!("{} route(s):\n", table.len());
    for route in table.iter() {
        let mut flags = Vec::new();
        if route.strip_prefix {
            flags.push("strip-prefix".to_string());
        }
        if let Some(ref rewrite) = route.rewrite_to {
            flags.push(format!("rewrite-to={rewrite}"));
        }
        if route.inject_token {
            flags.push("inject-token".to_string());
        }
        if route.strip_cookies {
            flags.push("strip-cookies".to_string());
        }
        let suffix = if flags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", flags.join(", "))
        };
        println!("  {} -> {}{}", route.prefix, route.target, suffix);
    }

    ExitCode::SUCCESS
}
