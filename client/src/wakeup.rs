//! Cross-thread wakeup for the poll thread.
//!
//! Turns "work pending" or "stop requested" on any thread into readiness the
//! poll thread observes in the same syscall it uses for the protocol socket.
//! `mio::Waker` is the platform face of the classic self-pipe: eventfd on
//! Linux, a pipe or kqueue user event elsewhere. Wake tokens are consumed by
//! the poll's readiness delivery, so there is nothing to drain by hand.

use std::{io, sync::Arc};

use mio::{Registry, Token, Waker};
use tracing::warn;

#[derive(Debug, Clone)]
pub(crate) struct WakeChannel {
    waker: Arc<Waker>,
}

impl WakeChannel {
    pub fn new(registry: &Registry, token: Token) -> io::Result<WakeChannel> {
        Ok(WakeChannel {
            waker: Arc::new(Waker::new(registry, token)?),
        })
    }

    /// Non-blocking and idempotent: waking an already-woken poll is a no-op.
    pub fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            // Nothing to recover here; the poll thread will still notice a
            // stop flag on its next natural wakeup.
            warn!(error = %e, "failed to wake poll thread");
        }
    }
}
