use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Wait for termination signals (Ctrl+C, SIGTERM)
pub async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = signal::ctrl_c() => {
                res?;
                tracing::info!("Received Ctrl+C signal");
            }
            _ = terminate.recv() => tracing::info!("Received SIGTERM signal"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C signal");
    }

    Ok(())
}

/// Token cancelled on the first termination signal.
///
/// Must be called inside a tokio runtime. If the signal handlers cannot be
/// installed the error is logged and the token stays live.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(()) => child.cancel(),
            Err(e) => tracing::error!(error = %e, "failed to install shutdown signal handlers"),
        }
    });
    token
}
