#![warn(
    // missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]
#![deny(clippy::all)]
// #![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![deny(clippy::nursery)]
#![allow(clippy::use_self)]

//! Asynchronous Redis client with a dedicated native poll thread.
//!
//! Commands are issued from Tokio tasks and complete as futures; pub/sub
//! subscriptions arrive as lazy message sequences. Underneath, every
//! connection runs one OS thread that has exclusive use of the non-blocking
//! protocol engine: submissions travel to it over a lock-free queue, replies
//! travel back as owned values over the host port. Commands issued within a
//! single scheduler turn are written to the socket as one pipeline.

pub mod client;
pub mod cmd;
pub mod engine;
mod error;
mod event_loop;
mod port;
mod queue;
pub mod reply;
mod wakeup;

/// Command identifier, allocated per client, monotonically increasing.
pub type CommandId = i64;

pub use client::{connect, Client, PubSubMessage, Subscription};
pub use cmd::{Command, ToArg};
pub use engine::{ProtocolEngine, ProtocolError, RawReply, ReplyCallback, RespEngine};
pub use error::{Error, Result};
pub use reply::Reply;

pub mod prelude {
    #[doc(hidden)]
    pub use crate::{client::*, cmd::*, engine::*, reply::*, CommandId, Error, Result};
}
