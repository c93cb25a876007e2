//! Cancellation for long-running writes.
//!
//! Ctrl+C (or SIGTERM) flips a watch flag that the retry controller checks
//! between rounds, so an interrupted `put` still reports what was written.

use tokio::sync::watch;
use tracing::{info, warn};

pub struct CancelSignal {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    pub fn cancel(&self) {
        info!("cancel requested");
        let _ = self.tx.send(true);
    }

    /// Wait for SIGINT/SIGTERM, then cancel.
    pub async fn wait_for_signal(&self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let (mut sigint, mut sigterm) = match (
                signal(SignalKind::interrupt()),
                signal(SignalKind::terminate()),
            ) {
                (Ok(i), Ok(t)) => (i, t),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("signal handler registration failed: {e}");
                    return;
                }
            };

            tokio::select! {
                _ = sigint.recv() => info!("SIGINT received"),
                _ = sigterm.recv() => info!("SIGTERM received"),
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Ctrl+C handler registration failed: {e}");
                return;
            }
            info!("Ctrl+C received");
        }

        self.cancel();
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
