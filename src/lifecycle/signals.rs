//! OS signal handling.

/// Resolve when SIGINT (Ctrl+C) arrives.
///
/// If the handler cannot be installed the error is logged and the future
/// never resolves, so callers should race it against their own exit path.
pub async fn interrupt() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Interrupt signal received"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}
