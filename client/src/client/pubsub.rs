//! Pub/sub subscriptions.
//!
//! A subscription runs on its own dedicated connection: a Redis connection
//! in subscribe mode accepts only subscription-management commands, so
//! mixing it with ordinary traffic is a mode error the API rules out by
//! construction. SUBSCRIBE/PSUBSCRIBE are submitted with *persistent* reply
//! callbacks (the callback fires for every matching message instead of
//! being consumed by the first reply) and decoded messages are handed to
//! the observer as a lazy sequence.

use std::net::ToSocketAddrs;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::Client;
use crate::{engine::{ProtocolEngine, RespEngine},
            error::{Error, Result},
            event_loop::EventLoop,
            port::{Port, Posted},
            queue::CommandNode,
            reply::Reply};

use std::sync::Arc;

/// One decoded pub/sub delivery.
///
/// `pattern` is set when the message matched a PSUBSCRIBE pattern rather
/// than a plain channel subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct PubSubMessage {
    pub channel: String,
    pub pattern: Option<String>,
    pub payload: Bytes,
}

/// Subscription-management event, consumed internally.
#[derive(Debug, PartialEq)]
enum PubSubEvent {
    Message(PubSubMessage),
    Confirmation {
        kind:    String,
        subject: String,
        count:   i64,
    },
}

impl Client {
    /// Opens a subscription to `channels` and `patterns` over a dedicated
    /// connection to the same server.
    pub async fn subscribe(&self, channels: &[&str], patterns: &[&str]) -> Result<Subscription> {
        let addrs = self.remote_addrs().ok_or_else(|| {
            Error::ConnectionFailed(
                "client has no remote address to open a subscription connection".to_string(),
            )
        })?;
        Subscription::connect(&addrs[..], channels, patterns).await
    }
}

/// A live subscription: a lazy sequence of [`PubSubMessage`]s backed by its
/// own event loop. Dropping it (or calling [`Subscription::close`]) tears
/// the dedicated connection down.
#[derive(Debug)]
pub struct Subscription {
    event_loop: Arc<EventLoop>,
    messages:   mpsc::UnboundedReceiver<PubSubMessage>,
}

impl Subscription {
    /// Connects and subscribes. At least one channel or pattern is required.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        channels: &[&str],
        patterns: &[&str],
    ) -> Result<Subscription> {
        if channels.is_empty() && patterns.is_empty() {
            return Err(Error::EmptySubscription);
        }
        let engine = RespEngine::connect(addr)?;
        Subscription::start(Box::new(engine), channels, patterns)
    }

    /// Subscribes over an already-connected protocol engine.
    pub fn connect_with(
        engine: Box<dyn ProtocolEngine>,
        channels: &[&str],
        patterns: &[&str],
    ) -> Result<Subscription> {
        if channels.is_empty() && patterns.is_empty() {
            return Err(Error::EmptySubscription);
        }
        Subscription::start(engine, channels, patterns)
    }

    fn start(
        engine: Box<dyn ProtocolEngine>,
        channels: &[&str],
        patterns: &[&str],
    ) -> Result<Subscription> {
        let (port, rx) = Port::channel();
        let event_loop = EventLoop::start(engine, port.clone())?;

        let mut next_id = 0;
        for (name, subjects) in [("SUBSCRIBE", channels), ("PSUBSCRIBE", patterns)] {
            if subjects.is_empty() {
                continue;
            }
            let mut args = Vec::with_capacity(subjects.len() + 1);
            args.push(Bytes::from_static(name.as_bytes()));
            args.extend(subjects.iter().map(|s| Bytes::copy_from_slice(s.as_bytes())));
            next_id += 1;
            event_loop.push(CommandNode {
                port: port.clone(),
                command_id: next_id,
                args,
                persistent: true,
            });
        }
        // Subscriptions have no turn batching to preserve; wake immediately.
        event_loop.wake();

        let (message_tx, messages) = mpsc::unbounded_channel();
        tokio::spawn(deliver_messages(rx, message_tx));

        Ok(Subscription { event_loop, messages })
    }

    /// The next message, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<PubSubMessage> { self.messages.recv().await }

    /// Adapts the subscription into a `futures::Stream`.
    pub fn into_stream(mut self) -> impl Stream<Item = PubSubMessage> {
        async_stream::stream! {
            while let Some(message) = self.next().await {
                yield message;
            }
        }
    }

    /// Tears the dedicated event loop down. Idempotent; also runs on drop.
    pub fn close(&self) { self.event_loop.shutdown(); }
}

impl Drop for Subscription {
    fn drop(&mut self) { self.close(); }
}

/// Host-side listener for the subscription's port.
///
/// Forwards decoded `message`/`pmessage` deliveries to the observer;
/// subscription-management confirmations are consumed here.
async fn deliver_messages(
    mut rx: mpsc::UnboundedReceiver<Posted>,
    tx: mpsc::UnboundedSender<PubSubMessage>,
) {
    while let Some(posted) = rx.recv().await {
        match posted {
            Posted::Completion { result: Ok(Reply::Error(message)), .. } => {
                warn!(%message, "subscription command rejected by server");
            },
            Posted::Completion { result: Ok(reply), .. } => match decode_event(&reply) {
                Ok(PubSubEvent::Message(message)) => {
                    if tx.send(message).is_err() {
                        // Observer detached; the Subscription's drop will
                        // stop the loop.
                        break;
                    }
                },
                Ok(PubSubEvent::Confirmation { kind, subject, count }) => {
                    debug!(kind = %kind, subject = %subject, count, "subscription state changed");
                },
                Err(e) => warn!(error = %e, "undecodable pub/sub reply; dropped"),
            },
            Posted::Completion { result: Err(e), .. } => {
                warn!(error = %e, "subscription command failed");
            },
            Posted::Disconnected => break,
        }
    }
    // Dropping `tx` ends the observer's sequence.
}

/// Decodes one pub/sub reply.
///
/// The reply is an array whose first element is the type tag; exactly six
/// kinds exist. Dispatch is by tag: `message` and the four confirmations
/// share a length, so length alone cannot discriminate.
fn decode_event(reply: &Reply) -> Result<PubSubEvent> {
    let items = match reply {
        Reply::Array(items) | Reply::Push(items) => items,
        other => {
            return Err(Error::UnexpectedReply {
                expected: "a pub/sub array",
                actual:   other.kind(),
            })
        },
    };
    let tag = items.first().and_then(Reply::as_str).ok_or(Error::UnexpectedReply {
        expected: "a pub/sub type tag",
        actual:   "missing first element",
    })?;

    match tag {
        "message" => {
            debug_assert_eq!(items.len(), 3);
            Ok(PubSubEvent::Message(PubSubMessage {
                channel: text(items.get(1))?,
                pattern: None,
                payload: payload(items.get(2))?,
            }))
        },
        "pmessage" => {
            debug_assert_eq!(items.len(), 4);
            Ok(PubSubEvent::Message(PubSubMessage {
                pattern: Some(text(items.get(1))?),
                channel: text(items.get(2))?,
                payload: payload(items.get(3))?,
            }))
        },
        "subscribe" | "psubscribe" | "unsubscribe" | "punsubscribe" => {
            debug_assert_eq!(items.len(), 3);
            Ok(PubSubEvent::Confirmation {
                kind:    tag.to_string(),
                subject: text(items.get(1))?,
                count:   items.get(2).and_then(|r| r.as_integer()).unwrap_or(0),
            })
        },
        _ => Err(Error::UnexpectedReply {
            expected: "a known pub/sub kind",
            actual:   "unrecognized tag",
        }),
    }
}

fn text(reply: Option<&Reply>) -> Result<String> {
    match reply {
        Some(Reply::Bulk(b)) => Ok(String::from_utf8_lossy(b).into_owned()),
        Some(Reply::Status(s)) => Ok(s.clone()),
        _ => Err(Error::UnexpectedReply {
            expected: "a textual element",
            actual:   "missing or non-text element",
        }),
    }
}

fn payload(reply: Option<&Reply>) -> Result<Bytes> {
    match reply {
        Some(Reply::Bulk(b)) => Ok(b.clone()),
        Some(Reply::Status(s)) => Ok(Bytes::copy_from_slice(s.as_bytes())),
        _ => Err(Error::UnexpectedReply {
            expected: "a message payload",
            actual:   "missing or non-bulk element",
        }),
    }
}
