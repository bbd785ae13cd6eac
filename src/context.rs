//! Per-request context carried through router views into backend I/O.
//!
//! Cancelling a request's context aborts any network I/O performed on its
//! behalf. Cache probes and buffer copies are not cancellation points; they
//! complete in bounded time.

use tokio_util::sync::CancellationToken;

/// Context attached to one in-flight request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel all I/O running under this context.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the context is cancelled. For use in `select!`.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}
