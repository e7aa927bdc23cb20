//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Token-cached reverse proxy bridging Dex OIDC logins for embedded dashboards
#[derive(Parser, Debug)]
#[command(name = "dexgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "DEXGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "DEXGATE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "DEXGATE_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DEXGATE_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "DEXGATE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the proxy server (default)
    Serve,

    /// Run the Dex login handshake end to end and print the session cookie
    Login {
        /// Protected URL that triggers the AuthService redirect
        #[arg(long)]
        start_url: Option<String>,

        /// Static-password username
        #[arg(short, long)]
        username: Option<String>,

        /// Static-password password (prefer `env:VAR` in the config file)
        #[arg(long)]
        password: Option<String>,
    },

    /// Print the compiled route table
    Routes,
}
