//! SFTP server binary
//!
//! NIST 800-53: AU-2 (Audit Events), AU-9 (Protection of Audit Information), AU-12 (Audit Generation)
//! Implementation: Loads configuration and the users file, installs
//! structured logging (JSON for SIEM ingestion or plain text) and runs
//! the server.
//!
//! Run with: cargo run --bin driftgate-server

use clap::Parser;
use driftgate::{Config, LogFormat, MemoryUserStore, Server};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Host key path
    #[arg(long)]
    host_key: Option<PathBuf>,

    /// JSON users file loaded at startup
    #[arg(short, long)]
    users_file: Option<PathBuf>,

    /// Verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// Log format (json or text)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Log file path
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        match Config::from_file(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host_key) = args.host_key {
        config.host_key_path = host_key;
    }
    if let Some(users_file) = args.users_file {
        config.users_file = Some(users_file);
    }
    if let Some(log_format) = args.log_format {
        config.logging.format = log_format;
    }
    if let Some(log_file) = args.log_file {
        config.logging.file = Some(log_file);
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }

    // NIST 800-53 AU-9, AU-12: structured audit log generation
    let _log_guard = init_logging(&mut config);

    info!(
        event = "server_starting",
        version = env!("CARGO_PKG_VERSION"),
        "Starting driftgate SFTP server"
    );

    if let Err(e) = config.validate() {
        error!(event = "configuration_invalid", error = %e, "Configuration validation failed");
        std::process::exit(1);
    }

    let store = match &config.users_file {
        Some(users_file) => match MemoryUserStore::load_from_file(users_file) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!(event = "users_file_invalid", error = %e, "Could not load users file");
                std::process::exit(1);
            }
        },
        None => Arc::new(MemoryUserStore::new()),
    };

    info!(
        event = "server_configuration",
        bind_address = %config.bind_address,
        port = config.port,
        host_key = ?config.host_key_path,
        users_file = ?config.users_file,
        idle_timeout_secs = config.idle_timeout_secs,
        max_auth_failures = config.max_auth_failures,
        hook_actions = ?config.actions.execute_on,
        "Server configuration"
    );

    let server = match Server::new(config, store).await {
        Ok(server) => server,
        Err(e) => {
            error!(event = "server_creation_failed", error = %e, "Failed to create server");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!(event = "server_error", error = %e, "Server encountered an error");
        std::process::exit(1);
    }
}

fn init_logging(config: &mut Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    if let Some(log_file) = config.logging.file.clone() {
        if let Some(parent) = log_file.parent() {
            if !parent.exists() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    eprintln!("Warning: failed to create log directory: {}", e);
                    eprintln!("Falling back to stderr logging");
                    config.logging.file = None;
                }
            }
        }

        if config.logging.file.is_some() {
            let directory = log_file
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            let file_name = log_file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "driftgate.log".to_string());
            let file_appender = tracing_appender::rolling::daily(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            match config.logging.format {
                LogFormat::Json => {
                    tracing_subscriber::fmt()
                        .json()
                        .with_env_filter(EnvFilter::new(config.logging.level.clone()))
                        .with_writer(non_blocking)
                        .init();
                }
                LogFormat::Text => {
                    tracing_subscriber::fmt()
                        .with_env_filter(EnvFilter::new(config.logging.level.clone()))
                        .with_writer(non_blocking)
                        .init();
                }
            }
            return Some(guard);
        }
    }

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(EnvFilter::new(config.logging.level.clone()))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new(config.logging.level.clone()))
                .init();
        }
    }
    None
}
