//! vnc-gate daemon
//!
//! Accepts VNC viewers, terminates VeNCrypt TLS, authenticates them and
//! relays each one to its own Xvnc session.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vg_core::config::{self, GatewayConfig};
use vg_core::Username;
use vg_gateway::auth::{self, hash_password, UsersFile};
use vg_gateway::bootstrap;
use vg_gateway::session::XvncSessionBroker;
use vg_gateway::{GatewayServer, GatewayState, TlsUpgrader};

#[derive(Parser)]
#[command(name = "vnc-gate")]
#[command(about = "TLS-terminating VNC gateway for per-user Xvnc sessions")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file
    #[arg(short, long, env = "VNC_GATE_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address (overrides config and RFB_HOST/RFB_PORT)
    #[arg(short, long)]
    bind: Option<String>,

    /// TLS certificate chain (overrides config and RFB_CERT)
    #[arg(long)]
    cert: Option<PathBuf>,

    /// TLS private key (overrides config and RFB_KEY)
    #[arg(long)]
    key: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "VNC_GATE_LOG")]
    log_level: String,
}

#[derive(Subcommand)]
enum Command {
    /// Read a password from stdin and print a users-file entry for it
    HashPassword {
        /// Login name the entry is for
        username: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(Command::HashPassword { username }) = &args.command {
        return print_user_entry(username);
    }

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("vnc-gate starting...");

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                GatewayConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            GatewayConfig::default()
        }
    };

    config
        .apply_env()
        .context("Invalid RFB_* environment override")?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(cert) = args.cert {
        config.tls.cert_path = Some(cert);
    }
    if let Some(key) = args.key {
        config.tls.key_path = Some(key);
    }
    config.validate().context("Invalid configuration")?;

    bootstrap::check_environment(&config)?;

    let cert_path = config
        .tls
        .cert_path
        .as_deref()
        .context("TLS certificate path is not configured")?;
    let key_path = config
        .tls
        .key_path
        .as_deref()
        .context("TLS private key path is not configured")?;
    let tls = TlsUpgrader::from_files(cert_path, key_path)?;
    tracing::info!("Loaded TLS certificate from {:?}", cert_path);

    let credentials = auth::build_gate(&config.auth).context(
        "No usable credential backend (build with --features pam, or set \
         auth.backend = \"static\" with auth.users_file)",
    )?;
    tracing::info!("Using {:?} credential backend", config.auth.backend);

    let broker = Arc::new(XvncSessionBroker::new(config.backend.clone()));
    let bind_addr = config.bind_address.clone();
    let state = Arc::new(GatewayState::new(
        config,
        tls,
        credentials,
        broker.clone(),
    ));

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    let server = GatewayServer::new(state, cancel.clone());

    tracing::info!("Starting gateway on {}", bind_addr);
    let result = server.run(&bind_addr).await;

    broker.shutdown().await;
    tracing::info!("vnc-gate shutdown complete");
    result
}

/// `vnc-gate hash-password <user>`
fn print_user_entry(username: &str) -> Result<()> {
    let username = Username::parse(username)
        .with_context(|| format!("{:?} is not a valid user name", username))?;

    let mut password = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut password)
        .context("Failed to read password from stdin")?;
    let password = password.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        anyhow::bail!("Empty password");
    }

    let mut users = UsersFile::default();
    users.insert(username.as_str(), hash_password(password));
    let entry = toml::to_string_pretty(&users).context("Failed to render users-file entry")?;
    print!("{}", entry);
    Ok(())
}
