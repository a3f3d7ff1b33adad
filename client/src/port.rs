//! Cross-thread completion delivery.
//!
//! The poll thread hands results back to the host scheduler by posting typed
//! payloads to a port. The port is the only thing the native regime knows
//! about the host side: an opaque handle that accepts messages from any
//! thread and delivers them to a listener task on the host scheduler.

use tokio::sync::mpsc;
use tracing::trace;

use crate::{error::Error, reply::Reply, CommandId};

/// A payload posted across the thread boundary.
#[derive(Debug)]
pub(crate) enum Posted {
    /// The event loop is gone; posted exactly once per event-loop lifetime.
    Disconnected,

    /// Outcome of one submitted command.
    Completion {
        id:     CommandId,
        result: Result<Reply, Error>,
    },
}

/// Sending half of a host port. Cheap to clone; every command node carries
/// one so the reply callback knows where its completion goes.
#[derive(Debug, Clone)]
pub(crate) struct Port {
    tx: mpsc::UnboundedSender<Posted>,
}

impl Port {
    pub fn channel() -> (Port, mpsc::UnboundedReceiver<Posted>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Port { tx }, rx)
    }

    pub fn post(&self, message: Posted) {
        // A closed receiver means the host listener is gone; late
        // completions are dropped, matching the unknown-id rule.
        if self.tx.send(message).is_err() {
            trace!("host port closed; message dropped");
        }
    }

    pub fn post_completion(&self, id: CommandId, result: Result<Reply, Error>) {
        self.post(Posted::Completion { id, result });
    }

    pub fn post_disconnect(&self) { self.post(Posted::Disconnected); }
}
