//! A scripted protocol engine.
//!
//! Stands in for the RESP engine so the dispatch core can be exercised
//! without a server. One end of a socketpair is handed to the poll thread
//! for multiplexing; the test side signals readability by writing a byte,
//! at which point the engine delivers whatever replies were scripted.

use std::{collections::VecDeque,
          io::{self, Read, Write},
          net::Shutdown,
          os::unix::{io::{AsRawFd, RawFd},
                     net::UnixStream},
          sync::{atomic::{AtomicBool, AtomicUsize, Ordering::Relaxed},
                 Arc, Mutex},
          time::Duration};

use bytes::Bytes;
use redis_bridge::{Client, ProtocolEngine, RawReply, ReplyCallback};

pub struct MockEngine {
    sock:       UnixStream,
    signal:     UnixStream,
    state:      Arc<MockState>,
    pending:    VecDeque<ReplyCallback>,
    has_output: bool,
    connected:  bool,
    auto_reply: bool,
}

#[derive(Default)]
pub struct MockState {
    scripted:       Mutex<VecDeque<RawReply>>,
    submits:        AtomicUsize,
    write_batches:  AtomicUsize,
    reject_submits: AtomicBool,
}

pub struct MockHandle {
    state:  Arc<MockState>,
    signal: UnixStream,
}

/// With `auto_reply`, every submission immediately scripts an echo of its
/// last argv token, so ordering is observable without hand-fed replies.
pub fn mock_engine(auto_reply: bool) -> (MockEngine, MockHandle) {
    let (sock, peer) = UnixStream::pair().unwrap();
    sock.set_nonblocking(true).unwrap();
    let state = Arc::new(MockState::default());
    let engine = MockEngine {
        signal: peer.try_clone().unwrap(),
        sock,
        state: Arc::clone(&state),
        pending: VecDeque::new(),
        has_output: false,
        connected: true,
        auto_reply,
    };
    (engine, MockHandle { state, signal: peer })
}

pub fn mock_client(auto_reply: bool) -> (Client, MockHandle) {
    let (engine, handle) = mock_engine(auto_reply);
    let client = Client::connect_with(Box::new(engine)).unwrap();
    (client, handle)
}

impl MockHandle {
    pub fn submits(&self) -> usize { self.state.submits.load(Relaxed) }

    pub fn write_batches(&self) -> usize { self.state.write_batches.load(Relaxed) }

    pub fn reject_submits(&self, reject: bool) {
        self.state.reject_submits.store(reject, Relaxed);
    }

    /// Scripts a reply and signals the poll thread to deliver it.
    pub fn reply(&mut self, reply: RawReply) {
        self.state.scripted.lock().unwrap().push_back(reply);
        self.signal.write_all(&[1]).unwrap();
    }

    /// Simulates the server dropping the connection.
    pub fn hangup(&self) {
        let _ = self.signal.shutdown(Shutdown::Write);
    }

    pub async fn wait_for_submits(&self, n: usize) {
        for _ in 0..500 {
            if self.submits() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("mock engine never saw {n} submissions");
    }
}

impl ProtocolEngine for MockEngine {
    fn fd(&self) -> RawFd { self.sock.as_raw_fd() }

    fn is_connected(&self) -> bool { self.connected }

    fn wants_write(&self) -> bool { self.has_output }

    fn submit(&mut self, args: &[Bytes], callback: ReplyCallback) -> io::Result<()> {
        if self.state.reject_submits.load(Relaxed) {
            return Err(io::Error::new(io::ErrorKind::Other, "scripted submit failure"));
        }
        self.state.submits.fetch_add(1, Relaxed);
        self.pending.push_back(callback);
        self.has_output = true;
        if self.auto_reply {
            let echo = args.last().cloned().unwrap_or_default();
            self.state
                .scripted
                .lock()
                .unwrap()
                .push_back(RawReply::Bulk(echo));
            self.signal.write_all(&[1])?;
        }
        Ok(())
    }

    fn on_readable(&mut self) -> io::Result<()> {
        let mut buf = [0u8; 256];
        loop {
            match self.sock.read(&mut buf) {
                Ok(0) => {
                    self.connected = false;
                    break;
                },
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.connected = false;
                    return Err(e);
                },
            }
        }
        loop {
            let next = self.state.scripted.lock().unwrap().pop_front();
            match next {
                Some(reply) => self.dispatch(&reply),
                None => break,
            }
        }
        Ok(())
    }

    fn on_writable(&mut self) -> io::Result<()> {
        if self.has_output {
            self.state.write_batches.fetch_add(1, Relaxed);
            self.has_output = false;
        }
        Ok(())
    }

    fn disconnect(&mut self) { self.connected = false; }
}

impl MockEngine {
    fn dispatch(&mut self, reply: &RawReply) {
        if let Some(front) = self.pending.front_mut() {
            front.invoke(Some(reply));
            if !front.is_persistent() {
                self.pending.pop_front();
            }
        }
    }
}
