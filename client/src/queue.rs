//! Lock-free multi-producer single-consumer command intake.
//!
//! Producers are host tasks on arbitrary threads; the single consumer is the
//! poll thread. Nodes are pushed onto an atomically-swapped LIFO chain and
//! reversed on drain, which yields FIFO order per producer and a consistent
//! interleaving across producers.

#![allow(unsafe_code)]

use std::{ptr,
          sync::atomic::{AtomicPtr,
                         Ordering::{AcqRel, Acquire, Relaxed}}};

use bytes::Bytes;
use crossbeam::utils::Backoff;

use crate::{port::Port, CommandId};

/// One queued command submission.
///
/// Owns its argument bytes: they are copied in at enqueue time so the
/// producer does not need to keep them alive. Consumed exactly once by the
/// poll thread.
#[derive(Debug)]
pub(crate) struct CommandNode {
    pub port:       Port,
    pub command_id: CommandId,
    pub args:       Vec<Bytes>,
    /// Submit with a persistent reply callback (SUBSCRIBE/PSUBSCRIBE).
    pub persistent: bool,
}

struct Link {
    next: *mut Link,
    node: CommandNode,
}

/// Unbounded MPSC queue.
///
/// `push` is callable from any thread; `drain_all` only from the consumer.
pub(crate) struct CommandQueue {
    tail: AtomicPtr<Link>,
}

// The raw links are owned exclusively by the queue: a pushed link is only
// reachable through `tail` and is taken out exactly once by `drain_all`.
unsafe impl Send for CommandQueue {}
unsafe impl Sync for CommandQueue {}

impl CommandQueue {
    pub fn new() -> CommandQueue {
        CommandQueue {
            tail: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Enqueues a node. Non-blocking and lock-free.
    pub fn push(&self, node: CommandNode) {
        let link = Box::into_raw(Box::new(Link {
            next: ptr::null_mut(),
            node,
        }));
        let backoff = Backoff::new();
        let mut tail = self.tail.load(Relaxed);
        loop {
            // Publishing the link's contents happens on the release half of
            // the compare-exchange below.
            unsafe { (*link).next = tail };
            match self.tail.compare_exchange_weak(tail, link, AcqRel, Acquire) {
                Ok(_) => return,
                Err(current) => {
                    tail = current;
                    backoff.spin();
                },
            }
        }
    }

    /// Atomically takes every pending node, in FIFO-by-producer order.
    ///
    /// Consumer-side only. Draining an empty queue returns an empty vector
    /// and has no side effects. A push that races with a drain lands either
    /// in this batch or the next, never in both.
    pub fn drain_all(&self) -> Vec<CommandNode> {
        let mut head = self.tail.swap(ptr::null_mut(), AcqRel);
        if head.is_null() {
            return Vec::new();
        }
        let mut out = Vec::new();
        while !head.is_null() {
            // The swap above made this chain unreachable from producers, so
            // the queue holds the only pointers into it.
            let link = unsafe { Box::from_raw(head) };
            head = link.next;
            out.push(link.node);
        }
        out.reverse();
        out
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        // Free nodes that were pushed but never drained.
        let leftover = self.drain_all();
        if !leftover.is_empty() {
            tracing::debug!(count = leftover.len(), "dropping undrained command nodes");
        }
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue").finish_non_exhaustive()
    }
}
