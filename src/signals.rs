//! Bridges SIGINT and SIGTERM onto a single cancellation token.

use std::io;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Returns a token cancelled by the first SIGINT (ctrl-c) or SIGTERM.
///
/// Must be called from inside a tokio runtime. The handlers stay installed for
/// the rest of the process, so later signals are swallowed rather than killing
/// it. A hung shutdown is bounded by the shutdown deadline, not by a second
/// ctrl-c.
pub fn termination_token() -> io::Result<CancellationToken> {
    let token = CancellationToken::new();
    bridge(token.clone())?;
    Ok(token)
}

/// Cancels `token` on the first SIGINT or SIGTERM.
pub fn bridge(token: CancellationToken) -> io::Result<()> {
    #[cfg(unix)]
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async move {
            sigterm.recv().await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();
        tokio::pin!(terminate);

        let received = tokio::select! {
            result = signal::ctrl_c() => match result {
                Ok(()) => "SIGINT",
                Err(err) => {
                    warn!(error = %err, "Failed to listen for Ctrl+C, waiting for SIGTERM only");
                    (&mut terminate).await;
                    "SIGTERM"
                }
            },
            _ = &mut terminate => "SIGTERM",
            _ = token.cancelled() => return,
        };

        info!(signal = received, "Shutdown signal received. Closing server gracefully...");
        token.cancel();
    });

    Ok(())
}
