//! Per-connection coordination between the host scheduler and the socket.
//!
//! The event loop owns the command queue, the wakeup channel and the
//! protocol context, and runs one dedicated OS thread, the poll thread,
//! which is the sole user of the protocol context for the life of the
//! connection. The thread alternates between submitting queued commands and
//! advancing the protocol's read/write I/O, blocking in a single
//! multiplex-wait per iteration; there is no busy-polling anywhere.

use std::{io,
          sync::{atomic::{AtomicBool,
                          Ordering::{Acquire, Release}},
                 Arc, Mutex},
          thread::{self, JoinHandle}};

use mio::{unix::SourceFd, Events, Interest, Poll, Token};
use tracing::{debug, error, trace};

use crate::{engine::{ProtocolEngine, RawReply, ReplyCallback},
            error::{Error, Result},
            port::Port,
            queue::{CommandNode, CommandQueue},
            reply::Reply,
            wakeup::WakeChannel,
            CommandId};

const SOCKET: Token = Token(0);
const WAKEUP: Token = Token(1);

/// Per-command record attached to a submission so the reply callback knows
/// where its completion goes.
///
/// Ephemeral infos are consumed together with their callback after one
/// reply; persistent ones (pub/sub) live until the engine is torn down.
#[derive(Debug, Clone)]
struct CallbackInfo {
    port:       Port,
    command_id: CommandId,
    persistent: bool,
}

impl CallbackInfo {
    /// Serializes the native reply on the poll thread and posts the owned
    /// result. No reply data escapes this thread in borrowed form.
    fn dispatch(&self, raw: Option<&RawReply>) {
        match raw {
            None => self.port.post_completion(self.command_id, Err(Error::NullReply)),
            Some(raw) => {
                self.port
                    .post_completion(self.command_id, Ok(Reply::from_raw(raw)));
            },
        }
    }

    fn into_callback(self) -> ReplyCallback {
        if self.persistent {
            ReplyCallback::persistent(move |raw| self.dispatch(raw))
        } else {
            ReplyCallback::new(move |raw| self.dispatch(raw))
        }
    }
}

/// Owns every piece of per-connection native state.
///
/// Lifecycle: constructed → running (thread spawned) → stopping (stop flag
/// set) → destroyed. The protocol context is only released after the poll
/// thread has been joined; it can never be freed while the thread might
/// still touch it.
pub(crate) struct EventLoop {
    queue: CommandQueue,
    stop:  AtomicBool,
    wake:  WakeChannel,

    // Context mutex: serializes submission against the I/O handlers. Both
    // run on the poll thread today, so the lock is uncontended; it stays as
    // the barrier that keeps direct host-side submission a possible future.
    engine: Mutex<Box<dyn ProtocolEngine>>,

    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    /// Registers the protocol socket and the wakeup channel with a fresh
    /// poll and spawns the poll thread.
    pub fn start(engine: Box<dyn ProtocolEngine>, port: Port) -> Result<Arc<EventLoop>> {
        let poll = Poll::new()?;
        let wake = WakeChannel::new(poll.registry(), WAKEUP)?;
        let fd = engine.fd();
        poll.registry()
            .register(&mut SourceFd(&fd), SOCKET, Interest::READABLE)?;

        let event_loop = Arc::new(EventLoop {
            queue: CommandQueue::new(),
            stop: AtomicBool::new(false),
            wake,
            engine: Mutex::new(engine),
            thread: Mutex::new(None),
        });

        let handle = thread::Builder::new()
            .name("redis-bridge-poll".to_string())
            .spawn({
                let event_loop = Arc::clone(&event_loop);
                move || poll_loop(poll, &event_loop, &port)
            })
            .map_err(|e| Error::ConnectionFailed(format!("failed to spawn poll thread: {e}")))?;
        *event_loop.thread.lock().unwrap() = Some(handle);

        Ok(event_loop)
    }

    /// Enqueues a command node. Callable from any thread; does not wake the
    /// poll thread by itself.
    pub fn push(&self, node: CommandNode) { self.queue.push(node); }

    /// Wakes the poll thread so it drains the queue.
    pub fn wake(&self) { self.wake.wake(); }

    /// Stops and joins the poll thread, then tears the native state down.
    ///
    /// Idempotent. Commands still queued at this point are never submitted;
    /// the caller fails their completions.
    pub fn shutdown(&self) {
        self.stop.store(true, Release);
        self.wake.wake();

        let handle = self.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("poll thread panicked during shutdown");
            }
        }

        // The thread is gone; nothing else can hold the context now.
        if let Ok(mut engine) = self.engine.lock() {
            engine.disconnect();
        }

        let leftover = self.queue.drain_all();
        if !leftover.is_empty() {
            debug!(count = leftover.len(), "discarding commands queued at shutdown");
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) { self.shutdown(); }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("stopped", &self.stop.load(Acquire))
            .finish_non_exhaustive()
    }
}

/// The poll thread main loop.
fn poll_loop(mut poll: Poll, event_loop: &EventLoop, port: &Port) {
    let fd = event_loop.engine.lock().unwrap().fd();
    let mut events = Events::with_capacity(64);
    let mut armed_write = false;

    loop {
        if event_loop.stop.load(Acquire) {
            debug!("stop requested; poll thread exiting");
            break;
        }
        {
            let engine = event_loop.engine.lock().unwrap();
            if !engine.is_connected() {
                debug!("connection invalid; poll thread exiting");
                break;
            }
        }

        let drained = event_loop.queue.drain_all();
        if !drained.is_empty() {
            trace!(count = drained.len(), "submitting drained commands");
            let mut engine = event_loop.engine.lock().unwrap();
            for node in drained {
                let info = CallbackInfo {
                    port:       node.port.clone(),
                    command_id: node.command_id,
                    persistent: node.persistent,
                };
                if let Err(e) = engine.submit(&node.args, info.into_callback()) {
                    // The callback never ran and is gone; fail the slot from
                    // here instead.
                    node.port
                        .post_completion(node.command_id, Err(Error::SubmissionFailed(e.to_string())));
                }
            }
        }

        let wants_write = event_loop.engine.lock().unwrap().wants_write();
        if wants_write != armed_write {
            let interest = if wants_write {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            if let Err(e) = poll.registry().reregister(&mut SourceFd(&fd), SOCKET, interest) {
                error!(error = %e, "failed to update socket interest; exiting");
                break;
            }
            armed_write = wants_write;
        }

        trace!("waiting on socket and wakeup channel");
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            error!(error = %e, "multiplex wait failed; exiting");
            break;
        }

        let mut readable = false;
        let mut writable = false;
        for event in events.iter() {
            match event.token() {
                SOCKET => {
                    readable |= event.is_readable() || event.is_read_closed() || event.is_error();
                    writable |= event.is_writable();
                },
                // Wake tokens carry no payload; readiness delivery consumed
                // them already.
                WAKEUP => trace!("woken"),
                _ => {},
            }
        }

        if readable || writable {
            let mut engine = event_loop.engine.lock().unwrap();
            if writable {
                if let Err(e) = engine.on_writable() {
                    debug!(error = %e, "write handler failed");
                }
            }
            if readable {
                if let Err(e) = engine.on_readable() {
                    debug!(error = %e, "read handler failed");
                }
            }
        }
    }

    // One sentinel per event-loop lifetime, whichever way the loop ended.
    port.post_disconnect();
    debug!("poll thread done");
}
