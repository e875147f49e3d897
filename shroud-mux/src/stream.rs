use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{ready, Context, Poll, Waker};

use bytes::Bytes;
use futures::future::BoxFuture;
use shroud_core::connection::SessionId;
use shroud_core::error::{MuxError, Result};
use shroud_core::frame::{Closing, Frame};
use shroud_core::stream::{Seq, StreamId};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::buffer::{Pushed, RecvBuffer};
use crate::session::SessionInner;

/// What an inbound frame did to a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivered {
    Data,
    RemoteClosed,
    Reset,
    Dropped,
}

struct RecvState {
    buffer: Box<dyn RecvBuffer>,
    /// No more data will be buffered. Reads drain, then fail.
    closed: bool,
    /// Buffered data was discarded. Reads fail immediately.
    reset: bool,
    wakers: Vec<Waker>,
}

/// State of one logical stream, shared by the session table, the reader
/// workers and every handle of the stream.
pub(crate) struct StreamShared {
    id: StreamId,
    session_id: SessionId,
    session: Weak<SessionInner>,
    /// Exclusive write section. Holds the next sequence number to assign.
    send_seq: tokio::sync::Mutex<Seq>,
    recv: Mutex<RecvState>,
    local_closed: AtomicBool,
    remote_closed: AtomicBool,
}

impl StreamShared {
    pub fn new(
        id: StreamId,
        session_id: SessionId,
        session: Weak<SessionInner>,
        buffer: Box<dyn RecvBuffer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            session_id,
            session,
            send_seq: tokio::sync::Mutex::new(Seq(0)),
            recv: Mutex::new(RecvState {
                buffer,
                closed: false,
                reset: false,
                wakers: Vec::new(),
            }),
            local_closed: AtomicBool::new(false),
            remote_closed: AtomicBool::new(false),
        })
    }

    fn recv(&self) -> MutexGuard<'_, RecvState> {
        match self.recv.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Update the receive side under its lock, then wake pending readers.
    fn update_recv<R>(&self, f: impl FnOnce(&mut RecvState) -> R) -> R {
        let mut recv = self.recv();
        let result = f(&mut recv);
        let wakers = std::mem::take(&mut recv.wakers);
        drop(recv);
        for waker in wakers {
            waker.wake();
        }
        result
    }

    pub fn is_closed(&self) -> bool {
        self.local_closed.load(Ordering::SeqCst) || self.remote_closed.load(Ordering::SeqCst)
    }

    pub fn is_reset(&self) -> bool {
        self.recv().reset
    }

    pub fn has_residual(&self) -> bool {
        self.is_closed() && self.recv().buffer.readable() > 0
    }

    /// Route one inbound frame into the receive buffer.
    pub fn push(&self, frame: Frame) -> Delivered {
        self.update_recv(|recv| {
            if recv.closed {
                return Delivered::Dropped;
            }
            if frame.closing.is_reset() {
                recv.buffer.clear();
                recv.reset = true;
                recv.closed = true;
                self.remote_closed.store(true, Ordering::SeqCst);
                return Delivered::Reset;
            }
            match recv.buffer.push(frame) {
                Pushed::Buffered => Delivered::Data,
                Pushed::Closed => {
                    recv.closed = true;
                    self.remote_closed.store(true, Ordering::SeqCst);
                    Delivered::RemoteClosed
                }
                Pushed::Ignored => Delivered::Dropped,
            }
        })
    }

    pub fn poll_read(&self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let mut recv = self.recv();
        if recv.reset {
            return Poll::Ready(Err(MuxError::BrokenStream));
        }
        let n = recv.buffer.read(buf);
        if n > 0 {
            return Poll::Ready(Ok(n));
        }
        if recv.closed {
            return Poll::Ready(Err(MuxError::BrokenStream));
        }
        if !recv.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            recv.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }

    fn close_recv(&self) {
        self.update_recv(|recv| recv.closed = true);
    }

    fn discard_recv(&self) {
        self.update_recv(|recv| {
            recv.buffer.clear();
            recv.reset = true;
            recv.closed = true;
        });
    }

    /// Closed by the owning session. Nothing is sent; residual data stays readable.
    pub fn close_by_session(&self) {
        self.local_closed.store(true, Ordering::SeqCst);
        self.close_recv();
    }

    pub async fn write(&self, data: Bytes) -> Result<usize> {
        let session = self.session.upgrade().ok_or(MuxError::BrokenStream)?;
        let mut seq = self.send_seq.lock().await;
        if self.is_closed() || session.is_closed() {
            return Err(MuxError::BrokenStream);
        }
        let total = data.len();
        let max = session.max_frame_payload();
        let mut offset = 0;
        while offset < total {
            let end = (offset + max).min(total);
            let frame = Frame::builder()
                .with_stream_id(self.id)
                .with_seq(seq.fetch_add(1))
                .with_payload(data.slice(offset..end))
                .build();
            session.send_frame(&frame).await?;
            offset = end;
        }
        Ok(total)
    }

    /// Close or reset the local side. Both take the write section, so the
    /// control frame is numbered after every write that finished before.
    async fn finish(&self, closing: Closing) -> Result<()> {
        let mut seq = self.send_seq.lock().await;
        if self.local_closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let session = self.session.upgrade();
        if let Some(session) = &session {
            session.forget_stream(self.id);
        }
        if closing.is_reset() {
            self.discard_recv();
        } else {
            self.close_recv();
        }
        tracing::debug!("Stream {} closed locally ({:?})", self.id, closing);

        let Some(session) = session else {
            return Ok(());
        };
        if session.is_closed() || self.remote_closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let frame = Frame::builder()
            .with_stream_id(self.id)
            .with_seq(seq.fetch_add(1))
            .with_closing(closing)
            .build();
        match session.send_frame(&frame).await {
            Ok(()) | Err(MuxError::NoConnection) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn close(&self) -> Result<()> {
        self.finish(Closing::Graceful).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.finish(Closing::Reset).await
    }
}

/// A logical bidirectional byte pipe multiplexed over a session.
///
/// Handles are cheap to clone and all clones refer to the same stream.
/// A handle is `Sync`, so it can also be shared by reference across tasks.
pub struct Stream {
    shared: Arc<StreamShared>,
    // Only touched through `&mut self`, so the locks are never contended.
    write_fut: Mutex<Option<BoxFuture<'static, Result<usize>>>>,
    shutdown_fut: Mutex<Option<BoxFuture<'static, Result<()>>>>,
}

fn slot<T>(slot: &mut Mutex<T>) -> &mut T {
    match slot.get_mut() {
        Ok(inner) => inner,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Stream {
    pub(crate) fn new(shared: Arc<StreamShared>) -> Self {
        Self {
            shared,
            write_fut: Mutex::new(None),
            shutdown_fut: Mutex::new(None),
        }
    }
    /// Get the stream id
    pub fn id(&self) -> StreamId {
        self.shared.id
    }
    /// Get the session id
    pub fn session_id(&self) -> SessionId {
        self.shared.session_id
    }
    /// Closed locally, by the peer, or by the session.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
    /// Reset by either side. Buffered data is gone.
    pub fn is_reset(&self) -> bool {
        self.shared.is_reset()
    }
    /// Closed, but buffered data is still waiting to be read.
    pub fn has_residual(&self) -> bool {
        self.shared.has_residual()
    }

    /// Read buffered bytes, waiting for data if the buffer is empty and the
    /// stream open. An empty `buf` returns 0 without touching the buffer.
    /// Fails with [`MuxError::BrokenStream`] once closed and drained, or reset.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        std::future::poll_fn(|cx| self.shared.poll_read(cx, buf)).await
    }

    /// Send `data`, split into frames of bounded size.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        self.shared.write(Bytes::copy_from_slice(data)).await
    }

    pub async fn write_bytes(&self, data: Bytes) -> Result<usize> {
        self.shared.write(data).await
    }

    /// Gracefully close the stream. It leaves the session table before this
    /// returns; data already received can still be read. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.shared.close().await
    }

    /// Abruptly reset the stream, discarding buffered data on both sides.
    pub async fn reset(&self) -> Result<()> {
        self.shared.reset().await
    }
}

impl Clone for Stream {
    fn clone(&self) -> Self {
        Stream::new(self.shared.clone())
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("session_id", &self.shared.session_id)
            .field("stream_id", &self.shared.id)
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let dst = buf.initialize_unfilled();
        match ready!(self.shared.poll_read(cx, dst)) {
            Ok(n) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            // Drained after a graceful close: end of stream.
            Err(MuxError::BrokenStream) if !self.shared.is_reset() => Poll::Ready(Ok(())),
            Err(MuxError::BrokenStream) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "stream reset",
            ))),
            Err(e) => Poll::Ready(Err(e.into())),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        let shared = &this.shared;
        let pending = slot(&mut this.write_fut);
        let fut = pending.get_or_insert_with(|| {
            let shared = shared.clone();
            let data = Bytes::copy_from_slice(buf);
            Box::pin(async move { shared.write(data).await })
        });
        let result = ready!(fut.as_mut().poll(cx));
        *pending = None;
        Poll::Ready(result.map_err(io::Error::from))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Frames are handed to a connection before poll_write completes.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let shared = &this.shared;
        let pending = slot(&mut this.shutdown_fut);
        let fut = pending.get_or_insert_with(|| {
            let shared = shared.clone();
            Box::pin(async move { shared.close().await })
        });
        let result = ready!(fut.as_mut().poll(cx));
        *pending = None;
        Poll::Ready(result.map_err(io::Error::from))
    }
}
