use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::StreamExt;
use shroud_core::codec::FrameCodec;
use shroud_core::connection::{ConnectionId, SessionId, SessionSide};
use shroud_core::error::{MuxError, Result};
use shroud_core::frame::Frame;
use shroud_core::stream::StreamId;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use crate::buffer::Delivery;
use crate::config::SessionConfig;
use crate::stream::{Delivered, Stream, StreamShared};
use crate::switchboard::Switchboard;
use crate::table::{Lookup, StreamTable};
use crate::valve::Valve;

/// Session lifecycle
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SessionState {
    Open = 0,
    /// Close has started; no stream can be opened or accepted.
    Closing = 1,
    Closed = 2,
}

impl From<u8> for SessionState {
    fn from(value: u8) -> Self {
        match value {
            0 => SessionState::Open,
            1 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

pub(crate) struct SessionInner {
    session_id: SessionId,
    config: SessionConfig,
    delivery: Delivery,
    state: AtomicU8,
    /// Live streams. An entry leaves the table the moment its stream closes.
    streams: StreamTable,
    /// next_stream_id is the next stream we should open.
    /// Odd for clients, even for servers.
    next_stream_id: AtomicU32,
    switchboard: Switchboard,
    /// Sends new remotely-initiated streams to `accept`
    accept_sender: Mutex<Option<Sender<Stream>>>,
    accept_receiver: tokio::sync::Mutex<Receiver<Stream>>,
    /// Cancelled when the session starts closing. Parent of every
    /// connection reader token.
    cancel: CancellationToken,
    weak_self: Weak<SessionInner>,
}

impl SessionInner {
    pub fn is_closed(&self) -> bool {
        self.state() != SessionState::Open
    }

    fn state(&self) -> SessionState {
        SessionState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn max_frame_payload(&self) -> usize {
        self.config.max_frame_payload
    }

    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.switchboard.send(frame).await
    }

    /// Drop a stream from the table. Peer-assigned ids are retired so late
    /// frames for them are not taken for a new stream.
    pub fn forget_stream(&self, id: StreamId) {
        let retire = !self.config.side.owns(id);
        if self.streams.remove(id, retire).is_some() {
            tracing::debug!("Stream {} removed from session {}", id, self.session_id);
        }
    }

    fn accept_sender(&self) -> MutexGuard<'_, Option<Sender<Stream>>> {
        match self.accept_sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn new_stream(&self, id: StreamId) -> Arc<StreamShared> {
        StreamShared::new(id, self.session_id, self.weak_self.clone(), self.delivery.new_buffer())
    }

    /// Route one inbound frame to its stream, creating the stream on first
    /// sight of a peer-assigned id. A stream whose first frame already closes
    /// it with an empty payload is retired without being offered to `accept`.
    async fn dispatch(&self, frame: Frame) {
        let id = frame.stream_id;
        let lookup = self.streams.get_or_create(id, || {
            if self.is_closed() || self.config.side.owns(id) {
                None
            } else {
                Some(self.new_stream(id))
            }
        });
        let (stream, created) = match lookup {
            Lookup::Existing(stream) => (stream, false),
            Lookup::Created(stream) => (stream, true),
            Lookup::Refused => {
                tracing::trace!("Dropping frame {} for closed stream {}", frame.seq, id);
                return;
            }
        };

        match stream.push(frame) {
            Delivered::RemoteClosed => {
                tracing::debug!("Stream {} closed by peer", id);
                self.forget_stream(id);
            }
            Delivered::Reset => {
                tracing::debug!("Stream {} reset by peer", id);
                self.forget_stream(id);
            }
            Delivered::Data | Delivered::Dropped => {}
        }

        if !created || (stream.is_closed() && !stream.has_residual()) {
            return;
        }
        let sender = self.accept_sender().clone();
        if let Some(sender) = sender {
            tracing::debug!("New stream accepted: {}", id);
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                result = sender.send(Stream::new(stream)) => {
                    if result.is_err() {
                        tracing::trace!("Accept queue gone, stream {} not surfaced", id);
                    }
                }
            }
        }
    }

    /// Open → Closing. Only the first caller wins.
    fn begin_close(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Open as u8,
                SessionState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    async fn shutdown(&self) {
        tracing::info!("Session {} shutting down", self.session_id);
        self.cancel.cancel();
        self.accept_sender().take();

        let streams = self.streams.drain();
        for stream in &streams {
            stream.close_by_session();
        }
        tracing::debug!("Session {}: {} logical streams closed", self.session_id, streams.len());

        self.switchboard.close_all().await;
        self.state.store(SessionState::Closed as u8, Ordering::SeqCst);
        tracing::info!("Session {} closed", self.session_id);
    }

    async fn connection_lost(&self, id: ConnectionId) {
        let remaining = self.switchboard.detach(id);
        tracing::debug!("Session {}: connection {} gone, {} left", self.session_id, id, remaining);
        if remaining == 0 && self.begin_close() {
            tracing::warn!("Session {} lost its last connection", self.session_id);
            self.shutdown().await;
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Inbound worker of one physical connection.
async fn read_loop<R>(
    session: Weak<SessionInner>,
    id: ConnectionId,
    mut reader: FramedRead<R, FrameCodec>,
    cancel: CancellationToken,
    valve: Arc<dyn Valve>,
) where
    R: AsyncRead + Unpin + Send,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = reader.next() => next,
        };
        match next {
            Some(Ok(frame)) => {
                let len = frame.len();
                let wait = valve.rx_wait(len);
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
                valve.add_rx(len as i64);
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.dispatch(frame).await;
            }
            Some(Err(e)) => {
                tracing::warn!("Connection {} dropped: {}", id, e);
                break;
            }
            None => {
                tracing::debug!("Connection {} reached EOF", id);
                break;
            }
        }
    }
    if let Some(session) = session.upgrade() {
        session.connection_lost(id).await;
    }
}

/// The session
///
/// Cheap to clone; every clone drives the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create an empty session. No physical connection is attached yet.
    pub fn new(session_id: SessionId, config: SessionConfig) -> Self {
        let config = config.normalized();
        let (accept_sender, accept_receiver) = mpsc::channel(config.accept_backlog);
        let delivery = config.delivery();
        let cancel = CancellationToken::new();
        let switchboard = Switchboard::new(
            config.obfuscator.clone(),
            config.valve.clone(),
            cancel.child_token(),
        );
        let next_stream_id = config.side.initial_stream_id();
        let inner = Arc::new_cyclic(|weak_self| SessionInner {
            session_id,
            config,
            delivery,
            state: AtomicU8::new(SessionState::Open as u8),
            streams: StreamTable::new(),
            next_stream_id: AtomicU32::new(next_stream_id.0),
            switchboard,
            accept_sender: Mutex::new(Some(accept_sender)),
            accept_receiver: tokio::sync::Mutex::new(accept_receiver),
            cancel,
            weak_self: weak_self.clone(),
        });
        tracing::info!("Session {} created ({:?})", session_id, delivery);
        Session { inner }
    }

    /// Attach a physical connection and start its reader worker.
    /// Must be called from within a tokio runtime.
    pub fn add_connection<T>(&self, conn: T) -> Result<ConnectionId>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if self.inner.is_closed() {
            return Err(MuxError::SessionClosed);
        }
        let cancel = self.inner.cancel.child_token();
        let (id, reader) = self.inner.switchboard.attach(conn, cancel.clone());
        if self.inner.is_closed() {
            self.inner.switchboard.detach(id);
            return Err(MuxError::SessionClosed);
        }
        tokio::spawn(read_loop(
            Arc::downgrade(&self.inner),
            id,
            reader,
            cancel,
            self.inner.config.valve.clone(),
        ));
        tracing::debug!("Session {}: connection {} attached", self.inner.session_id, id);
        Ok(id)
    }

    /// Open a new outbound stream with a fresh local id.
    pub fn open_stream(&self) -> Result<Stream> {
        loop {
            if self.inner.is_closed() {
                return Err(MuxError::SessionClosed);
            }
            let id = StreamId(self.inner.next_stream_id.fetch_add(2, Ordering::SeqCst));
            let shared = self.inner.new_stream(id);
            if self.inner.streams.insert(id, shared.clone(), || !self.inner.is_closed()) {
                tracing::debug!("New stream opened: {}", id);
                return Ok(Stream::new(shared));
            }
        }
    }

    /// Wait for the next remotely-initiated stream.
    pub async fn accept(&self) -> Result<Stream> {
        if self.inner.is_closed() {
            return Err(MuxError::SessionClosed);
        }
        let mut receiver = self.inner.accept_receiver.lock().await;
        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(MuxError::SessionClosed),
            stream = receiver.recv() => stream.ok_or(MuxError::SessionClosed),
        }
    }

    /// Close every stream and every physical connection. Residual data of
    /// live streams stays readable. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.inner.begin_close() {
            self.inner.shutdown().await;
        }
        Ok(())
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.session_id
    }
    pub fn side(&self) -> SessionSide {
        self.inner.config.side
    }
    pub fn is_unordered(&self) -> bool {
        self.inner.delivery == Delivery::Unordered
    }
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
    /// Number of streams in the table.
    pub fn stream_count(&self) -> usize {
        self.inner.streams.len()
    }
    pub fn contains_stream(&self, id: StreamId) -> bool {
        self.inner.streams.contains(id)
    }
    /// Ids of the streams in the table, sorted.
    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.inner.streams.ids()
    }
    pub fn connection_count(&self) -> usize {
        self.inner.switchboard.len()
    }
    pub fn valve(&self) -> Arc<dyn Valve> {
        self.inner.config.valve.clone()
    }
}
