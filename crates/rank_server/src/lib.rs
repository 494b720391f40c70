//! # Rank Server - Main Entry Point
//!
//! Runs the rank system as a standalone process next to a host server.
//! The host reports players, signs and admin commands as JSON lines on
//! stdin; the server answers with session effects, sign text and replies
//! as JSON lines on stdout. Logs go to stderr.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (creates ranks.toml if missing)
//! rank_server
//!
//! # Specify custom configuration
//! rank_server --config production.toml
//!
//! # Override specific settings
//! rank_server --backend mysql --log-level debug --json-logs
//! ```
//!
//! ## Signal Handling
//!
//! SIGINT and SIGTERM (Ctrl+C on Windows) trigger a graceful shutdown that
//! releases every session before storage closes. A second signal exits
//! immediately.

use tracing::error;

pub mod app;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Parses the CLI, sets up logging and runs the application to completion.
///
/// Called from an async context; exits the process with status 1 on a
/// startup or runtime failure.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();
    let config = Application::apply_overrides(config, &args);

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use bridge::{Bridge, HostCommand, HostEvent, HostWorld, Outbox};
pub use config::{LoggingSettings, ServerSettings};
