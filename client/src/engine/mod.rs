//! The protocol engine seam.
//!
//! The dispatch core never talks to a socket directly; it drives a
//! [`ProtocolEngine`], the non-blocking Redis protocol state machine that
//! formats commands, parses replies and owns the connection. The engine is
//! passed in explicitly at connect time, which keeps the core free of global
//! state and lets tests substitute a scripted engine.
//!
//! Every method is called on the poll thread only, under the context mutex.

use std::{io, os::unix::io::RawFd};

use bytes::Bytes;

mod resp;
pub use resp::{ProtocolError, RespEngine};

/// A reply as parsed by the protocol engine.
///
/// The engine owns this tree only until the reply callback returns; anything
/// that must outlive the callback is copied into a [`crate::Reply`] first.
#[derive(Debug, Clone, PartialEq)]
pub enum RawReply {
    Nil,
    Status(Bytes),
    Error(Bytes),
    Integer(i64),
    Double(Bytes),
    Bool(bool),
    BigNumber(Bytes),
    Verbatim(Bytes),
    Bulk(Bytes),
    Array(Vec<RawReply>),
    Map(Vec<RawReply>),
    Set(Vec<RawReply>),
    Push(Vec<RawReply>),
}

/// Callback registered with a submitted command.
///
/// Ephemeral callbacks are consumed by the engine after their single reply.
/// Persistent callbacks (pub/sub) stay registered and receive every
/// subsequent reply routed to them; they are released only when the engine
/// itself is torn down.
pub struct ReplyCallback {
    persistent: bool,
    handler:    Box<dyn FnMut(Option<&RawReply>) + Send>,
}

impl ReplyCallback {
    pub fn new(handler: impl FnMut(Option<&RawReply>) + Send + 'static) -> Self {
        ReplyCallback {
            persistent: false,
            handler:    Box::new(handler),
        }
    }

    pub fn persistent(handler: impl FnMut(Option<&RawReply>) + Send + 'static) -> Self {
        ReplyCallback {
            persistent: true,
            handler:    Box::new(handler),
        }
    }

    pub const fn is_persistent(&self) -> bool { self.persistent }

    /// Invokes the callback. `None` means the connection died before a reply
    /// arrived.
    pub fn invoke(&mut self, reply: Option<&RawReply>) { (self.handler)(reply) }
}

impl std::fmt::Debug for ReplyCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyCallback")
            .field("persistent", &self.persistent)
            .finish_non_exhaustive()
    }
}

/// Non-blocking Redis protocol state machine.
///
/// `submit` only formats into the output buffer and registers the callback;
/// it performs no I/O. `on_readable` may invoke registered callbacks
/// synchronously, one per completed reply.
pub trait ProtocolEngine: Send {
    /// The socket to multiplex on.
    fn fd(&self) -> RawFd;

    /// `false` once the connection is closed, lost or in a fatal state.
    fn is_connected(&self) -> bool;

    /// `true` while formatted output is waiting to be written.
    fn wants_write(&self) -> bool;

    /// Formats `args` into the output buffer and registers `callback` for
    /// the resulting reply. On error the callback is dropped without being
    /// invoked; the caller reports the failure.
    fn submit(&mut self, args: &[Bytes], callback: ReplyCallback) -> io::Result<()>;

    /// Drives the socket read side; parses and dispatches completed replies.
    fn on_readable(&mut self) -> io::Result<()>;

    /// Drives the socket write side.
    fn on_writable(&mut self) -> io::Result<()>;

    /// Initiates shutdown of the underlying connection.
    fn disconnect(&mut self);
}
