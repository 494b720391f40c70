//! Application lifecycle: startup, steady state and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use rank_core::{main_context, RankSystem, ShutdownState, SystemClock};
use rank_storage::Backend;
use tokio::io::BufReader;
use tracing::{error, info, warn};

use crate::bridge::{write_commands, Bridge, HostWorld, Outbox};
use crate::cli::CliArgs;
use crate::config::AppConfig;
use crate::logging::display_banner;
use crate::signals::{wait_for_shutdown, wait_for_signal};

/// Owns the merged configuration and runs the server.
pub struct Application {
    config: AppConfig,
}

impl Application {
    /// Loads the configuration file, applies CLI overrides and validates
    /// the result.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let config = AppConfig::load_from_file(&args.config_path).await?;
        let config = Self::apply_overrides(config, &args);

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();
        Ok(Self { config })
    }

    pub fn apply_overrides(mut config: AppConfig, args: &CliArgs) -> AppConfig {
        if let Some(log_level) = &args.log_level {
            config.logging.level = log_level.clone();
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if let Some(backend) = &args.backend {
            config.database.backend = backend.clone();
        }
        config
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Runs until SIGINT/SIGTERM, then shuts down in order: stop intake,
    /// release sessions, close storage, stop the main context.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        self.log_configuration_summary();
        let config = self.config;

        let gateway = rank_storage::connect(&config.database).await?;

        // Intake (timers, host events) stops first; the main context keeps
        // serving until sessions have been released.
        let shutdown = ShutdownState::new();
        let main_shutdown = ShutdownState::new();
        let (main, main_loop) = main_context();
        let main_task = tokio::spawn(main_loop.run(main_shutdown.clone(), config.tick_interval()));

        let (outbox, commands) = Outbox::channel();
        let writer_task = tokio::spawn(async move {
            if let Err(e) = write_commands(commands, tokio::io::stdout()).await {
                error!("❌ Host command stream failed: {}", e);
            }
        });

        let host = Arc::new(HostWorld::new(outbox));
        let system = Arc::new(RankSystem::new(
            &config.rank_settings(),
            gateway,
            host.clone(),
            host.clone(),
            Arc::new(SystemClock),
            main,
        ));

        let report = system.start(Vec::new()).await;
        if !report.groups_loaded {
            warn!("⚠️ Groups could not be loaded - running on the default group only");
        }
        if !report.signs_loaded {
            warn!("⚠️ Info signs could not be loaded");
        }

        let timers = system.spawn_timers(config.timer_settings(), shutdown.clone());

        let bridge = Bridge::new(Arc::clone(&system), Arc::clone(&host), &config.display);
        let bridge_shutdown = shutdown.clone();
        let bridge_task = tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            if let Err(e) = bridge.run(stdin, bridge_shutdown).await {
                error!("❌ Host event stream failed: {}", e);
            }
        });

        info!("✅ Rank server is now running");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        wait_for_shutdown(&shutdown).await?;

        tokio::spawn(async move {
            if let Err(e) = wait_for_signal().await {
                error!("Failed to set up second shutdown signal handler: {e}");
                return;
            }
            warn!("Shutdown signal received again! Exiting immediately.");
            std::process::exit(1);
        });

        info!("📡 Phase 1: Stopping timers and host event intake...");
        bridge_task.abort();
        for timer in timers {
            timer.abort();
        }

        info!("👋 Phase 2: Releasing sessions and closing storage...");
        system.shutdown().await;
        drop(system);
        drop(host);

        info!("🧹 Phase 3: Stopping the main context...");
        main_shutdown.initiate_shutdown();
        if tokio::time::timeout(Duration::from_secs(5), main_task).await.is_err() {
            warn!("⏰ Main context did not stop within 5s");
        }
        if tokio::time::timeout(Duration::from_secs(1), writer_task).await.is_err() {
            warn!("⏰ Host command stream did not drain within 1s");
        }

        shutdown.complete_shutdown();
        info!("✅ Rank server shutdown complete");
        Ok(())
    }

    fn log_configuration_summary(&self) {
        let config = &self.config;
        info!("📋 Configuration Summary:");
        info!(
            "  💾 Storage: {}",
            Backend::from_name(&config.database.backend)
        );
        info!("  🏷️ Default group: {}", config.groups.default_group);
        info!(
            "  ⏳ Expiry sweep every {}ms",
            config.server.sweep_interval_ms
        );
        info!(
            "  🪧 Info signs: {}",
            if config.display.signs_enabled { "enabled" } else { "disabled" }
        );
        info!(
            "  📊 Tab list: {} | Sidebar: {}",
            config.display.tablist_enabled, config.display.sidebar_enabled
        );
    }
}
