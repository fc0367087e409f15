//! Graceful Shutdown Handler
//!
//! Waits for OS signals (or any other trigger) and shuts the container down.

use crate::di::Container;
use crate::error::Result;
use std::future::Future;
use tokio::signal;

/// Handles graceful shutdown of a container
///
/// ShutdownHandler listens for OS signals (SIGTERM, SIGINT) and runs
/// [`Container::shutdown`] when one arrives: `Stop` is published, then every
/// constructed singleton is torn down in reverse construction order.
///
/// # Example
///
/// ```rust,no_run
/// use beanstalk::di::Container;
/// use beanstalk::lifecycle::ShutdownHandler;
///
/// # async fn run() -> beanstalk::Result<()> {
/// let container = Container::boot(Vec::new())?;
/// let handler = ShutdownHandler::new(container.clone());
///
/// tokio::spawn(async move {
///     if let Err(e) = handler.wait_for_shutdown().await {
///         tracing::error!("Shutdown finished with errors: {}", e);
///     }
/// });
/// # Ok(())
/// # }
/// ```
pub struct ShutdownHandler {
    container: Container,
}

impl ShutdownHandler {
    pub fn new(container: Container) -> Self {
        Self { container }
    }

    /// Wait for Ctrl+C or SIGTERM, then shut the container down.
    pub async fn wait_for_shutdown(&self) -> Result<()> {
        self.shutdown_on(shutdown_signal()).await
    }

    /// Wait for `trigger` to complete, then shut the container down.
    pub async fn shutdown_on<F>(&self, trigger: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        trigger.await;
        tracing::info!("Starting graceful shutdown of '{}'...", self.container.name());

        let result = self.container.shutdown();
        match &result {
            Ok(()) => tracing::info!("Graceful shutdown complete"),
            Err(e) => tracing::error!("Error during container shutdown: {}", e),
        }
        result
    }
}

/// Create a future that completes when a shutdown signal is received
///
/// A signal handler that cannot be installed is logged and treated as never
/// firing, so the other signal can still trigger shutdown.
///
/// # Example
///
/// ```rust,ignore
/// use beanstalk::lifecycle::shutdown_signal;
///
/// tokio::select! {
///     _ = shutdown_signal() => {
///         println!("Shutdown signal received");
///     }
///     _ = worker.run() => {}
/// }
/// ```
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
