//! wp-gateway: WhatsApp Pairing Gateway Main Binary
//!
//! Usage:
//!   wp-gateway                   - Start the server (HTTP API + WebSocket)
//!   wp-gateway --config <path>   - Start with a TOML config file
//!   wp-gateway --help            - Show help

use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use wp_core::Config;
use wp_link::PairingService;

/// Run mode
#[derive(Debug, PartialEq, Eq)]
enum RunMode {
    /// Server mode, optionally with an explicit config file
    Server { config_path: Option<String> },
    /// Show help
    Help,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let mode = parse_args(std::env::args().skip(1))?;

    let config_path = match mode {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("wp-gateway {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        RunMode::Server { config_path } => config_path,
    };

    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = match &config_path {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            Config::from_toml_file(path)
        }
        None => Config::load(),
    }
    .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    tracing::info!("Starting wp-gateway...");
    tracing::info!("Session directory: {}", config.session.data_dir);
    tracing::info!(
        "Bridge command: {} {}",
        config.bridge.command,
        config.bridge.args.join(" ")
    );

    run_server(config).await
}

/// Parse command line arguments
fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<RunMode> {
    let mut config_path = None;
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(RunMode::Help),
            "--version" | "-v" => return Ok(RunMode::Version),
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                config_path = Some(path);
            }
            other => anyhow::bail!("Unknown argument: {} (see --help)", other),
        }
    }

    Ok(RunMode::Server { config_path })
}

/// Print help message
fn print_help() {
    println!("wp-gateway - WhatsApp Pairing Gateway");
    println!();
    println!("Usage:");
    println!("  wp-gateway                   Start the server (HTTP API + WebSocket)");
    println!("  wp-gateway --config <path>   Load settings from a TOML file");
    println!("  wp-gateway --help            Show this help message");
    println!("  wp-gateway --version         Show version");
    println!();
    println!("Without --config, wp-gateway.toml is read if present.");
    println!();
    println!("Environment Variables:");
    println!("  PORT / API_PORT              HTTP port (default: 3000)");
    println!("  SERVER_HOST                  Bind address (default: 0.0.0.0)");
    println!("  STATIC_DIR                   Browser client directory (default: static, empty disables)");
    println!("  API_KEY                      Bearer token for /api, /pair and /ws");
    println!("  API_ALLOWED_ORIGINS          Comma-separated CORS origins");
    println!("  RATE_LIMIT_PER_MINUTE        Session creations per client (default: 30)");
    println!("  SESSION_TIMEOUT_SECS         Session lifetime (default: 1800)");
    println!("  SESSION_RETENTION_SECS       Keep completed sessions on disk (default: 600)");
    println!("  SESSION_DIR                  Auth-state directory (default: session)");
    println!("  PAIRING_DELAY_MS             Delay before requesting the code (default: 2000)");
    println!("  MAX_RECONNECTS               Reconnects after a disconnect (default: 1)");
    println!("  BRIDGE_COMMAND / BRIDGE_ARGS Messaging bridge process (default: node wa-bridge.mjs)");
    println!("  SEND_CREDENTIALS             Message credentials to the user (default: true)");
    println!("  LOGOUT_AFTER_DELIVERY        Unlink after delivery (default: false)");
    println!("  RUST_LOG                     Log filter (default: info)");
}

/// Run server mode
async fn run_server(config: Config) -> anyhow::Result<()> {
    let service = PairingService::with_bridge(config);

    let sweeper = spawn_sweeper(service.clone());

    tracing::info!("wp-gateway initialized successfully");
    tracing::info!("Press Ctrl+C to exit");

    let result = wp_api::start_server(service.clone(), shutdown_signal()).await;

    tracing::info!("Shutting down...");
    sweeper.abort();
    service.shutdown().await;

    result?;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Periodically expire sessions and prune the session directory
fn spawn_sweeper(service: PairingService) -> JoinHandle<()> {
    let period = service.config().session.sweep_interval();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match service.sweep(chrono::Utc::now()).await {
                Ok(report) if !report.is_empty() => tracing::info!(
                    "Sweep: {} session(s) expired, {} session dir(s) removed",
                    report.expired.len(),
                    report.removed_dirs.len()
                ),
                Ok(_) => {}
                Err(e) => tracing::warn!("Session sweep failed: {}", e),
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args_default() {
        assert_eq!(
            parse_args(args(&[])).unwrap(),
            RunMode::Server { config_path: None }
        );
    }

    #[test]
    fn test_parse_args_config() {
        assert_eq!(
            parse_args(args(&["--config", "gw.toml"])).unwrap(),
            RunMode::Server {
                config_path: Some("gw.toml".to_string())
            }
        );
        assert!(parse_args(args(&["--config"])).is_err());
    }

    #[test]
    fn test_parse_args_help_and_version() {
        assert_eq!(parse_args(args(&["-h"])).unwrap(), RunMode::Help);
        assert_eq!(parse_args(args(&["--version"])).unwrap(), RunMode::Version);
        assert!(parse_args(args(&["--cli"])).is_err());
    }
}
