//! Process shutdown signaling.
//!
//! The gateway stops on SIGINT or SIGTERM: the HTTP server drains its
//! connections and the reconciler cancels every namespace watcher. One
//! [`Shutdown`] handle is cloned into each long-running task; any clone can
//! request shutdown and every clone observes it.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Cloneable shutdown handle backed by a single watch channel.
#[derive(Clone)]
pub struct Shutdown {
    requester: Arc<watch::Sender<bool>>,
    observer: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (requester, observer) = watch::channel(false);
        Self {
            requester: Arc::new(requester),
            observer,
        }
    }

    /// Request shutdown. Later calls are no-ops.
    pub fn trigger(&self) {
        let first = self.requester.send_if_modified(|stopping| {
            if *stopping {
                false
            } else {
                *stopping = true;
                true
            }
        });
        if first {
            info!("shutdown requested");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.observer.borrow()
    }

    /// Completes once shutdown has been requested. Suitable for `select!`
    /// arms and as a graceful-shutdown future for the HTTP server.
    pub async fn triggered(&self) {
        let mut observer = self.observer.clone();
        // wait_for only fails when every sender is gone, and each handle
        // holds one.
        let _ = observer.wait_for(|stopping| *stopping).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Listen for the process exit signals and trigger shutdown on the first
/// one. Spawned once at startup.
#[cfg(unix)]
pub async fn listen_for_signals(shutdown: Shutdown) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            error!(error = %err, "cannot install SIGTERM handler");
            return;
        }
    };
    tokio::select! {
        _ = term.recv() => info!(signal = "SIGTERM", "exit signal received"),
        _ = tokio::signal::ctrl_c() => info!(signal = "SIGINT", "exit signal received"),
    }
    shutdown.trigger();
}

#[cfg(not(unix))]
pub async fn listen_for_signals(shutdown: Shutdown) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!(signal = "ctrl-c", "exit signal received");
    }
    shutdown.trigger();
}
