use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is
/// received. In-flight runs end as aborted; jobs already submitted keep
/// running on the query service.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, abandoning in-flight runs");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, abandoning in-flight runs");
            }
        }

        token_clone.cancel();
    });

    Ok(token)
}
