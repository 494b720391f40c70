//! Signal handling for graceful server shutdown.

use rank_core::ShutdownState;
use tokio::signal;
use tracing::info;

/// Waits for SIGINT/SIGTERM (Ctrl+C on Windows), then initiates shutdown on
/// `shutdown`.
pub async fn wait_for_shutdown(shutdown: &ShutdownState) -> Result<(), Box<dyn std::error::Error>> {
    wait_for_signal().await?;
    info!("📡 Received shutdown signal - initiating graceful shutdown");
    shutdown.initiate_shutdown();
    Ok(())
}

pub async fn wait_for_signal() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => ()
        }
    }

    #[cfg(windows)]
    signal::ctrl_c().await?;

    Ok(())
}
