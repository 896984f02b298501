//! Graceful shutdown wiring.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Turns SIGTERM/SIGINT into a [`CancellationToken`] the server loop can
/// await on. In-flight settlements run to completion; only the accept loop
/// stops, so a broadcast transaction is never abandoned mid-confirmation.
pub struct SigDown {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl SigDown {
    /// Registers the signal handlers. Fails only if the runtime refuses
    /// signal registration.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let trigger = token.clone();
        tracker.spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = sigint.recv() => tracing::info!("received SIGINT"),
            }
            trigger.cancel();
        });
        tracker.close();
        Ok(Self { tracker, token })
    }

    /// Token to hand to the axum graceful-shutdown future.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Waits for a shutdown signal and for the handler task to finish.
    pub async fn recv(&self) {
        self.token.cancelled().await;
        self.tracker.wait().await;
    }
}
