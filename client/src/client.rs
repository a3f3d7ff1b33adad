//! Minimal Redis client implementation
//!
//! Provides an async connect and methods for issuing the supported commands.
//!
//! The client is the host-scheduler face of the connection. Submitting a
//! command records a one-shot completion slot, pushes a node onto the
//! lock-free queue and schedules a single end-of-turn flush; the poll thread
//! does the rest and posts completions back through the host port.

use std::{collections::HashMap,
          future::Future,
          net::{SocketAddr, ToSocketAddrs},
          sync::{atomic::{AtomicBool, AtomicI64,
                          Ordering::{AcqRel, Acquire, Relaxed, Release}},
                 Arc, Mutex}};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::{cmd::Command,
            engine::{ProtocolEngine, RespEngine},
            error::{Error, Result},
            event_loop::EventLoop,
            port::{Port, Posted},
            queue::CommandNode,
            reply::Reply,
            CommandId};

mod commands;
mod pubsub;

pub use pubsub::{PubSubMessage, Subscription};

/// Establish a connection with the Redis server located at `addr`.
///
/// # Examples
///
/// ```no_run
/// use redis_bridge::client;
///
/// #[tokio::main]
/// async fn main() {
///     let client = match client::connect("localhost:6379").await {
///         Ok(client) => client,
///         Err(_) => panic!("failed to establish connection"),
///     };
/// # drop(client);
/// }
/// ```
pub async fn connect(addr: impl ToSocketAddrs) -> Result<Client> {
    let addrs: Vec<SocketAddr> = addr.to_socket_addrs()?.collect();
    if addrs.is_empty() {
        return Err(Error::ConnectionFailed(
            "address resolved to no socket addresses".to_string(),
        ));
    }
    let engine = RespEngine::connect(&addrs[..])?;
    Client::start(Box::new(engine), Some(addrs))
}

/// Established connection with a Redis server.
///
/// Requests are issued using the various methods of `Client`. Completion
/// futures may be held concurrently; commands issued within a single
/// scheduler turn are written to the socket as one pipeline.
#[derive(Debug)]
pub struct Client {
    shared: Arc<Shared>,
}

struct Shared {
    event_loop: Arc<EventLoop>,
    port:       Port,

    /// Remote address, kept so subscriptions can open their own dedicated
    /// connection to the same server. Absent for custom engines.
    addrs: Option<Vec<SocketAddr>>,

    /// Pending completion table: one slot per in-flight command.
    pending: Mutex<HashMap<CommandId, oneshot::Sender<Result<Reply>>>>,

    next_id:         AtomicI64,
    closed:          AtomicBool,
    flush_scheduled: AtomicBool,
}

impl Client {
    /// Builds a client around an already-connected protocol engine.
    ///
    /// This is the seam the tests use to substitute a scripted engine; it is
    /// equally the way to plug in an alternative transport. Must be called
    /// from within a Tokio runtime.
    pub fn connect_with(engine: Box<dyn ProtocolEngine>) -> Result<Client> {
        Client::start(engine, None)
    }

    fn start(engine: Box<dyn ProtocolEngine>, addrs: Option<Vec<SocketAddr>>) -> Result<Client> {
        let (port, rx) = Port::channel();
        let event_loop = EventLoop::start(engine, port.clone())?;
        let shared = Arc::new(Shared {
            event_loop,
            port,
            addrs,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            closed: AtomicBool::new(false),
            flush_scheduled: AtomicBool::new(false),
        });
        tokio::spawn(deliver_completions(rx, Arc::clone(&shared)));
        Ok(Client { shared })
    }

    /// Issues a raw command.
    ///
    /// The command is enqueued synchronously, before this function returns,
    /// and the returned future resolves once the reply arrives. Issuing many
    /// commands and awaiting them together therefore pipelines them onto the
    /// socket in one batch.
    pub fn command(&self, command: Command) -> impl Future<Output = Result<Reply>> + Send + 'static {
        let submitted = self.submit(command.into_args());
        async move {
            match submitted {
                Ok(rx) => match rx.await {
                    Ok(result) => result,
                    // The slot was dropped without a completion; only
                    // teardown does that.
                    Err(_) => Err(Error::ClientClosed),
                },
                Err(e) => Err(e),
            }
        }
    }

    fn submit(&self, args: Vec<Bytes>) -> Result<oneshot::Receiver<Result<Reply>>> {
        if self.shared.closed.load(Acquire) {
            return Err(Error::ClientClosed);
        }
        if args.is_empty() {
            return Err(Error::EmptyCommand);
        }

        let id = self.shared.next_id.fetch_add(1, Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().insert(id, tx);

        // Close may have raced the insert above; its sweep of the pending
        // table happens after the flag flips, so re-checking here means the
        // slot cannot be stranded.
        if self.shared.closed.load(Acquire) {
            self.shared.pending.lock().unwrap().remove(&id);
            return Err(Error::ClientClosed);
        }

        self.shared.event_loop.push(CommandNode {
            port:       self.shared.port.clone(),
            command_id: id,
            args,
            persistent: false,
        });
        self.schedule_flush();
        Ok(rx)
    }

    /// Schedules at most one end-of-turn flush.
    ///
    /// Submitting does not wake the poll thread directly. The first command
    /// of a scheduler turn spawns a microtask; every further command in the
    /// same turn sees the flag already set. When the microtask runs (after
    /// the issuing task yields) it wakes the poll thread exactly once, so
    /// the whole turn's worth of commands is formatted as one pipeline.
    fn schedule_flush(&self) {
        if !self.shared.flush_scheduled.swap(true, AcqRel) {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                shared.flush_scheduled.store(false, Release);
                shared.event_loop.wake();
            });
        }
    }

    pub(crate) fn remote_addrs(&self) -> Option<Vec<SocketAddr>> { self.shared.addrs.clone() }

    /// Closes the connection.
    ///
    /// Stops and joins the poll thread, releases the protocol context and
    /// fails every still-pending completion with [`Error::ClientClosed`].
    /// Idempotent; called automatically on drop. Blocks briefly while the
    /// poll thread winds down.
    pub fn close(&self) {
        if self.shared.closed.swap(true, AcqRel) {
            return;
        }
        debug!("closing client");
        self.shared.event_loop.shutdown();
        self.shared.fail_all_pending(|| Error::ClientClosed);
    }
}

impl Drop for Client {
    fn drop(&mut self) { self.close(); }
}

impl Shared {
    fn fail_all_pending(&self, make_error: impl Fn() -> Error) {
        let slots: Vec<_> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().map(|(_, tx)| tx).collect()
        };
        for tx in slots {
            let _ = tx.send(Err(make_error()));
        }
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("closed", &self.closed.load(Acquire))
            .finish_non_exhaustive()
    }
}

/// Host-side reply listener.
///
/// Runs as a task on the host scheduler. Every inbound message is either the
/// disconnect sentinel, which fails everything still pending, or a completion for
/// a known command id. Completions for unknown ids belong to commands whose
/// futures were dropped or already failed; they are discarded.
async fn deliver_completions(mut rx: mpsc::UnboundedReceiver<Posted>, shared: Arc<Shared>) {
    while let Some(message) = rx.recv().await {
        match message {
            Posted::Completion { id, result } => {
                let slot = shared.pending.lock().unwrap().remove(&id);
                match slot {
                    Some(tx) => {
                        let result = result.and_then(|reply| match reply {
                            Reply::Error(message) => Err(Error::ReplyError(message)),
                            reply => Ok(reply),
                        });
                        let _ = tx.send(result);
                    },
                    None => trace!(id, "completion for unknown command id; dropped"),
                }
            },
            Posted::Disconnected => {
                debug!("event loop disconnected");
                // Further submissions would hang on a dead loop.
                shared.closed.store(true, Release);
                shared.fail_all_pending(|| Error::ConnectionLost);
                break;
            },
        }
    }
}
