//! Graceful-shutdown plumbing shared by the server and the bots.

use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Returns a token that is cancelled when the process receives ctrl-c.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let tc = token.clone();
    //spawn once to listen for ctrl-c
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install ctrl-c handler");
            return;
        }
        tc.cancel();
    });
    token
}
