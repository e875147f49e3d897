//! Receive buffers.
//!
//! A session picks one [`Delivery`] at construction and every stream it
//! creates gets a buffer of that kind. Reset frames never reach a buffer;
//! the stream handles them before calling [`RecvBuffer::push`].
use std::collections::{BTreeMap, VecDeque};

use bytes::{Buf, Bytes};
use shroud_core::frame::{Closing, Frame};

/// What a pushed frame did to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pushed {
    /// Payload buffered, possibly not yet readable.
    Buffered,
    /// The sender's graceful close has been reached.
    Closed,
    /// Duplicate or stale frame, dropped.
    Ignored,
}

pub trait RecvBuffer: Send {
    fn push(&mut self, frame: Frame) -> Pushed;
    /// Copy readable bytes into `buf`, returning how many were copied.
    fn read(&mut self, buf: &mut [u8]) -> usize;
    /// Number of bytes currently readable.
    fn readable(&self) -> usize;
    /// Drop everything, readable or held.
    fn clear(&mut self);
}

/// Delivery semantics shared by every stream of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Reassemble by sequence number.
    Ordered,
    /// Deliver in arrival order.
    Unordered,
}

impl Delivery {
    pub fn from_unordered(unordered: bool) -> Self {
        if unordered {
            Delivery::Unordered
        } else {
            Delivery::Ordered
        }
    }

    pub fn new_buffer(self) -> Box<dyn RecvBuffer> {
        match self {
            Delivery::Ordered => Box::new(OrderedBuffer::default()),
            Delivery::Unordered => Box::new(UnorderedBuffer::default()),
        }
    }
}

/// Payloads ready to be read, in delivery order.
#[derive(Debug, Default)]
struct ReadyQueue {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl ReadyQueue {
    fn push(&mut self, payload: Bytes) {
        if payload.is_empty() {
            return;
        }
        self.len += payload.len();
        self.chunks.push_back(payload);
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < buf.len() {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let n = front.len().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&front[..n]);
            front.advance(n);
            copied += n;
            if front.is_empty() {
                self.chunks.pop_front();
            }
        }
        self.len -= copied;
        copied
    }

    fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}

/// Holds out-of-order frames until every lower sequence number has arrived.
#[derive(Debug, Default)]
pub struct OrderedBuffer {
    next_seq: u64,
    pending: BTreeMap<u64, Frame>,
    ready: ReadyQueue,
    closed: bool,
}

impl OrderedBuffer {
    /// Number of frames waiting for a gap to fill.
    pub fn held(&self) -> usize {
        self.pending.len()
    }
}

impl RecvBuffer for OrderedBuffer {
    fn push(&mut self, frame: Frame) -> Pushed {
        let seq = frame.seq.value();
        if self.closed || seq < self.next_seq || self.pending.contains_key(&seq) {
            return Pushed::Ignored;
        }
        self.pending.insert(seq, frame);

        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() != self.next_seq {
                break;
            }
            let frame = entry.remove();
            self.next_seq += 1;
            match frame.closing {
                Closing::Graceful => {
                    self.ready.push(frame.payload);
                    self.closed = true;
                    self.pending.clear();
                    return Pushed::Closed;
                }
                _ => self.ready.push(frame.payload),
            }
        }
        Pushed::Buffered
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        self.ready.read(buf)
    }

    fn readable(&self) -> usize {
        self.ready.len
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.ready.clear();
    }
}

/// Plain arrival-order queue.
#[derive(Debug, Default)]
pub struct UnorderedBuffer {
    ready: ReadyQueue,
    closed: bool,
}

impl RecvBuffer for UnorderedBuffer {
    fn push(&mut self, frame: Frame) -> Pushed {
        if self.closed {
            return Pushed::Ignored;
        }
        self.ready.push(frame.payload);
        if frame.closing.is_graceful() {
            self.closed = true;
            return Pushed::Closed;
        }
        Pushed::Buffered
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        self.ready.read(buf)
    }

    fn readable(&self) -> usize {
        self.ready.len
    }

    fn clear(&mut self) {
        self.ready.clear();
    }
}
