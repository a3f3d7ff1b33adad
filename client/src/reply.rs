//! Host-owned reply values.
//!
//! The protocol engine parses replies into a native tree whose storage it
//! owns and reclaims once the reply callback returns. `Reply` is the
//! value-typed copy of that tree: it owns every byte it points at, so the
//! host side can inspect it at any later time, on any thread, without locks.

use bytes::Bytes;

use crate::engine::RawReply;

/// A fully-owned Redis reply.
///
/// Mirrors the RESP2/RESP3 reply shapes. Aggregates are plain vectors;
/// `Map` keeps the flattened key/value layout of the wire encoding (even
/// length, keys at even indices).
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Status(String),
    Error(String),
    Integer(i64),
    Double(String),
    Bool(bool),
    BigNumber(String),
    Verbatim(String),
    Bulk(Bytes),
    Array(Vec<Reply>),
    Map(Vec<Reply>),
    Set(Vec<Reply>),
    Push(Vec<Reply>),
}

impl Reply {
    /// Serializes a native reply into an owned `Reply`.
    ///
    /// Depth-first copy: byte-string variants are copied into detached
    /// buffers, scalars are copied by value, aggregates recurse. After this
    /// returns, freeing the native reply never invalidates the result.
    pub fn from_raw(raw: &RawReply) -> Reply {
        match raw {
            RawReply::Nil => Reply::Nil,
            RawReply::Status(s) => Reply::Status(lossy(s)),
            RawReply::Error(s) => Reply::Error(lossy(s)),
            RawReply::Integer(v) => Reply::Integer(*v),
            RawReply::Double(s) => Reply::Double(lossy(s)),
            RawReply::Bool(b) => Reply::Bool(*b),
            RawReply::BigNumber(s) => Reply::BigNumber(lossy(s)),
            RawReply::Verbatim(s) => Reply::Verbatim(lossy(s)),
            RawReply::Bulk(b) => Reply::Bulk(Bytes::copy_from_slice(b)),
            RawReply::Array(items) => Reply::Array(copy_items(items)),
            RawReply::Map(items) => {
                debug_assert!(items.len() % 2 == 0, "map reply must be flattened key/value");
                Reply::Map(copy_items(items))
            },
            RawReply::Set(items) => Reply::Set(copy_items(items)),
            RawReply::Push(items) => Reply::Push(copy_items(items)),
        }
    }

    /// Short type tag used in error messages.
    pub const fn kind(&self) -> &'static str {
        match self {
            Reply::Nil => "nil",
            Reply::Status(_) => "status",
            Reply::Error(_) => "error",
            Reply::Integer(_) => "integer",
            Reply::Double(_) => "double",
            Reply::Bool(_) => "bool",
            Reply::BigNumber(_) => "big number",
            Reply::Verbatim(_) => "verbatim string",
            Reply::Bulk(_) => "bulk string",
            Reply::Array(_) => "array",
            Reply::Map(_) => "map",
            Reply::Set(_) => "set",
            Reply::Push(_) => "push",
        }
    }

    pub const fn is_nil(&self) -> bool { matches!(self, Reply::Nil) }

    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Reply::Bulk(b) => Some(b),
            _ => None,
        }
    }

    /// Textual view of status, bulk, verbatim and double replies.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Status(s) | Reply::Verbatim(s) | Reply::Double(s) => Some(s),
            Reply::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Consumes an aggregate reply, yielding its elements.
    pub fn into_items(self) -> Option<Vec<Reply>> {
        match self {
            Reply::Array(items) | Reply::Map(items) | Reply::Set(items) | Reply::Push(items) => {
                Some(items)
            },
            _ => None,
        }
    }
}

fn lossy(bytes: &Bytes) -> String { String::from_utf8_lossy(bytes).into_owned() }

fn copy_items(items: &[RawReply]) -> Vec<Reply> { items.iter().map(Reply::from_raw).collect() }
