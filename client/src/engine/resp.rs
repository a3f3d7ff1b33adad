//! Non-blocking RESP protocol engine.
//!
//! Speaks RESP2 plus the RESP3 reply types over a non-blocking `TcpStream`.
//! Commands are formatted into a write buffer at submission time; reply
//! bytes accumulate in a read buffer until a full reply can be parsed.
//!
//! Parsing is two-phase: `check` scans the buffered data to decide whether a
//! complete reply is present (cheap, no allocation), and only then `parse`
//! builds the reply tree. Data left in the buffer after a parse is kept for
//! the next round.

use std::{collections::VecDeque,
          io::{self, Cursor, Read, Write},
          net::{Shutdown, TcpStream, ToSocketAddrs},
          os::unix::io::{AsRawFd, RawFd}};

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

use super::{ProtocolEngine, RawReply, ReplyCallback};
use crate::error::{Error, Result};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("not enough data is available to parse a reply")]
    Incomplete,

    #[error("invalid reply type byte: {0:#04x}")]
    BadType(u8),

    #[error("invalid length prefix: '{0}'")]
    BadLength(String),

    #[error("protocol error; invalid reply format")]
    BadFormat,
}

/// Redis protocol state machine over a non-blocking TCP connection.
pub struct RespEngine {
    stream: TcpStream,

    // Reply bytes read off the socket but not yet parsed.
    read_buf: BytesMut,

    // Formatted commands not yet written to the socket.
    write_buf: BytesMut,

    // Callbacks in submission order. Replies arrive in the same order, so
    // completion pops from the front. A persistent callback stays at the
    // front and receives every subsequent reply (subscribe mode).
    pending: VecDeque<ReplyCallback>,

    connected: bool,
}

impl RespEngine {
    /// Establishes a TCP connection and puts it in non-blocking mode.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<RespEngine> {
        let stream =
            TcpStream::connect(addr).map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        stream
            .set_nonblocking(true)
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        Ok(RespEngine::from_stream(stream))
    }

    fn from_stream(stream: TcpStream) -> RespEngine {
        RespEngine {
            stream,
            read_buf: BytesMut::with_capacity(32 * 1024),
            write_buf: BytesMut::with_capacity(8 * 1024),
            pending: VecDeque::new(),
            connected: true,
        }
    }

    /// Routes one completed reply to the callback at the front of the
    /// pending queue. Unsolicited replies are dropped.
    fn dispatch(&mut self, reply: &RawReply) {
        match self.pending.front_mut() {
            Some(front) => {
                front.invoke(Some(reply));
                if !front.is_persistent() {
                    self.pending.pop_front();
                }
            },
            None => trace!("reply arrived with no registered callback; dropped"),
        }
    }

    /// Parses and dispatches every complete reply currently buffered.
    fn drain_replies(&mut self) -> io::Result<()> {
        loop {
            match parse_reply(&mut self.read_buf) {
                Ok(Some(reply)) => self.dispatch(&reply),
                Ok(None) => return Ok(()),
                Err(e) => {
                    self.connected = false;
                    self.fail_pending();
                    return Err(io::Error::new(io::ErrorKind::InvalidData, e));
                },
            }
        }
    }

    /// Invokes every remaining callback with "no reply". Used when the
    /// connection dies with commands still awaiting their replies.
    fn fail_pending(&mut self) {
        for mut callback in self.pending.drain(..) {
            callback.invoke(None);
        }
    }
}

impl ProtocolEngine for RespEngine {
    fn fd(&self) -> RawFd { self.stream.as_raw_fd() }

    fn is_connected(&self) -> bool { self.connected }

    fn wants_write(&self) -> bool { !self.write_buf.is_empty() }

    fn submit(&mut self, args: &[Bytes], callback: ReplyCallback) -> io::Result<()> {
        if args.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "a command requires at least one token",
            ));
        }
        if !self.connected {
            return Err(io::ErrorKind::NotConnected.into());
        }
        format_command(&mut self.write_buf, args);
        self.pending.push_back(callback);
        Ok(())
    }

    fn on_readable(&mut self) -> io::Result<()> {
        let mut eof = false;
        let mut chunk = [0u8; 16 * 1024];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    eof = true;
                    break;
                },
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.connected = false;
                    self.fail_pending();
                    return Err(e);
                },
            }
        }

        // Deliver whatever arrived before acting on the close.
        self.drain_replies()?;

        if eof {
            trace!("peer closed the connection");
            self.connected = false;
            self.fail_pending();
        }
        Ok(())
    }

    fn on_writable(&mut self) -> io::Result<()> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => {
                    self.connected = false;
                    return Err(io::ErrorKind::WriteZero.into());
                },
                Ok(n) => self.write_buf.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.connected = false;
                    self.fail_pending();
                    return Err(e);
                },
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        self.connected = false;
    }
}

impl std::fmt::Debug for RespEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RespEngine")
            .field("fd", &self.stream.as_raw_fd())
            .field("connected", &self.connected)
            .field("pending", &self.pending.len())
            .field("buffered_out", &self.write_buf.len())
            .finish()
    }
}

/// Formats a command as a RESP array of bulk strings. Binary-safe.
pub(crate) fn format_command(out: &mut BytesMut, args: &[Bytes]) {
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Tries to parse one reply from the buffer. Returns `Ok(None)` when the
/// buffered data does not yet hold a complete reply.
pub(crate) fn parse_reply(buf: &mut BytesMut) -> std::result::Result<Option<RawReply>, ProtocolError> {
    let mut cursor = Cursor::new(&buf[..]);
    match check(&mut cursor) {
        Ok(()) => {
            // `check` advanced the cursor to the end of the reply; that
            // position is the number of bytes to discard after parsing.
            let len = cursor.position() as usize;
            cursor.set_position(0);
            let reply = parse(&mut cursor)?;
            buf.advance(len);
            Ok(Some(reply))
        },
        Err(ProtocolError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Checks whether a full reply can be decoded from `src`, advancing the
/// cursor past it. Much cheaper than `parse`: no allocation, single scan.
fn check(src: &mut Cursor<&[u8]>) -> std::result::Result<(), ProtocolError> {
    match get_u8(src)? {
        b'+' | b'-' | b':' | b',' | b'(' | b'#' | b'_' => {
            get_line(src)?;
            Ok(())
        },
        b'$' | b'=' => {
            let len = get_int(src)?;
            if len < 0 {
                // Null bulk string.
                return Ok(());
            }
            skip(src, len as usize + 2)
        },
        kind @ (b'*' | b'%' | b'~' | b'>') => {
            let n = get_int(src)?;
            if n < 0 {
                // Null aggregate.
                return Ok(());
            }
            let count = if kind == b'%' { n as usize * 2 } else { n as usize };
            for _ in 0..count {
                check(src)?;
            }
            Ok(())
        },
        other => Err(ProtocolError::BadType(other)),
    }
}

/// Parses a reply already validated by `check`.
fn parse(src: &mut Cursor<&[u8]>) -> std::result::Result<RawReply, ProtocolError> {
    match get_u8(src)? {
        b'+' => Ok(RawReply::Status(copy_line(src)?)),
        b'-' => Ok(RawReply::Error(copy_line(src)?)),
        b':' => Ok(RawReply::Integer(parse_int(get_line(src)?)?)),
        b',' => Ok(RawReply::Double(copy_line(src)?)),
        b'(' => Ok(RawReply::BigNumber(copy_line(src)?)),
        b'#' => {
            let line = get_line(src)?;
            if line == b"t" {
                Ok(RawReply::Bool(true))
            } else if line == b"f" {
                Ok(RawReply::Bool(false))
            } else {
                Err(ProtocolError::BadFormat)
            }
        },
        b'_' => {
            get_line(src)?;
            Ok(RawReply::Nil)
        },
        b'$' => match get_blob(src)? {
            Some(data) => Ok(RawReply::Bulk(data)),
            None => Ok(RawReply::Nil),
        },
        b'=' => match get_blob(src)? {
            // The payload starts with a three-character format and a colon
            // ("txt:..."); only the text is surfaced.
            Some(data) if data.len() >= 4 => Ok(RawReply::Verbatim(data.slice(4..))),
            Some(data) => Ok(RawReply::Verbatim(data)),
            None => Ok(RawReply::Nil),
        },
        kind @ (b'*' | b'%' | b'~' | b'>') => {
            let n = get_int(src)?;
            if n < 0 {
                return Ok(RawReply::Nil);
            }
            let count = if kind == b'%' { n as usize * 2 } else { n as usize };
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(parse(src)?);
            }
            Ok(match kind {
                b'%' => RawReply::Map(items),
                b'~' => RawReply::Set(items),
                b'>' => RawReply::Push(items),
                _ => RawReply::Array(items),
            })
        },
        other => Err(ProtocolError::BadType(other)),
    }
}

fn get_u8(src: &mut Cursor<&[u8]>) -> std::result::Result<u8, ProtocolError> {
    if !src.has_remaining() {
        return Err(ProtocolError::Incomplete);
    }
    Ok(src.get_u8())
}

/// Finds a CRLF-terminated line, advancing the cursor past the terminator.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> std::result::Result<&'a [u8], ProtocolError> {
    let start = src.position() as usize;
    let data = *src.get_ref();
    let end = data.len();
    if end > 0 {
        for i in start..end - 1 {
            if data[i] == b'\r' && data[i + 1] == b'\n' {
                src.set_position((i + 2) as u64);
                return Ok(&data[start..i]);
            }
        }
    }
    Err(ProtocolError::Incomplete)
}

fn copy_line(src: &mut Cursor<&[u8]>) -> std::result::Result<Bytes, ProtocolError> {
    Ok(Bytes::copy_from_slice(get_line(src)?))
}

fn get_int(src: &mut Cursor<&[u8]>) -> std::result::Result<i64, ProtocolError> {
    parse_int(get_line(src)?)
}

fn parse_int(line: &[u8]) -> std::result::Result<i64, ProtocolError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ProtocolError::BadLength(String::from_utf8_lossy(line).into_owned()))
}

/// Reads a length-prefixed blob (`$`/`=` payload). `None` is the RESP2 null.
fn get_blob(src: &mut Cursor<&[u8]>) -> std::result::Result<Option<Bytes>, ProtocolError> {
    let len = get_int(src)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    if src.remaining() < len + 2 {
        return Err(ProtocolError::Incomplete);
    }
    let start = src.position() as usize;
    let data = Bytes::copy_from_slice(&src.get_ref()[start..start + len]);
    src.advance(len);
    let terminator = [get_u8(src)?, get_u8(src)?];
    if terminator != *b"\r\n" {
        return Err(ProtocolError::BadFormat);
    }
    Ok(Some(data))
}

fn skip(src: &mut Cursor<&[u8]>, n: usize) -> std::result::Result<(), ProtocolError> {
    if src.remaining() < n {
        return Err(ProtocolError::Incomplete);
    }
    src.advance(n);
    Ok(())
}
