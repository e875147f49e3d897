use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::SinkExt;
use shroud_core::codec::FrameCodec;
use shroud_core::connection::ConnectionId;
use shroud_core::default::DEFAULT_CLOSE_TIMEOUT;
use shroud_core::error::{MuxError, Result};
use shroud_core::frame::Frame;
use shroud_core::obfs::Obfuscator;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::valve::Valve;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Outbound half of one physical connection.
struct Connection {
    id: ConnectionId,
    writer: Mutex<FramedWrite<BoxedWriter, FrameCodec>>,
    /// Stops the inbound reader of this connection
    cancel: CancellationToken,
}

/// Pool of physical connections shared by every stream of a session.
///
/// Outbound frames go round-robin over the pool. The choice ignores stream
/// id and sequence number; receivers restore order per stream.
pub(crate) struct Switchboard {
    connections: RwLock<Vec<Arc<Connection>>>,
    cursor: AtomicUsize,
    next_id: AtomicU64,
    obfuscator: Arc<dyn Obfuscator>,
    valve: Arc<dyn Valve>,
    /// Cancelled when the session closes. Aborts every pending send.
    cancel: CancellationToken,
}

impl Switchboard {
    pub fn new(obfuscator: Arc<dyn Obfuscator>, valve: Arc<dyn Valve>, cancel: CancellationToken) -> Self {
        Self {
            connections: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            obfuscator,
            valve,
            cancel,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Connection>>> {
        match self.connections.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<Connection>>> {
        match self.connections.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Put a physical connection into the pool and hand back its framed
    /// inbound half, to be driven by a reader worker.
    pub fn attach<T>(
        &self,
        conn: T,
        cancel: CancellationToken,
    ) -> (ConnectionId, FramedRead<ReadHalf<T>, FrameCodec>)
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(conn);
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let writer: BoxedWriter = Box::new(write_half);
        let connection = Arc::new(Connection {
            id,
            writer: Mutex::new(FramedWrite::new(writer, FrameCodec::new(self.obfuscator.clone()))),
            cancel,
        });
        self.write().push(connection);
        let reader = FramedRead::new(read_half, FrameCodec::new(self.obfuscator.clone()));
        (id, reader)
    }

    /// Remove a connection from the pool and stop its reader.
    /// Returns the number of connections left.
    pub fn detach(&self, id: ConnectionId) -> usize {
        let mut connections = self.write();
        if let Some(pos) = connections.iter().position(|c| c.id == id) {
            let connection = connections.remove(pos);
            connection.cancel.cancel();
        }
        connections.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    fn pick(&self) -> Option<Arc<Connection>> {
        let connections = self.read();
        if connections.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % connections.len();
        Some(connections[index].clone())
    }

    /// Write one frame to some healthy connection. A connection whose
    /// transport fails the write is dropped from the pool and the next one
    /// is tried. Fails with [`MuxError::BrokenStream`] once the session
    /// closes, even while stuck on a backpressured connection.
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(MuxError::BrokenStream),
            result = self.send_to_pool(frame) => result,
        }
    }

    async fn send_to_pool(&self, frame: &Frame) -> Result<()> {
        let len = frame.len();
        let wait = self.valve.tx_wait(len);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        loop {
            let connection = self.pick().ok_or(MuxError::NoConnection)?;
            let result = {
                let mut writer = connection.writer.lock().await;
                writer.send(frame).await
            };
            match result {
                Ok(()) => {
                    self.valve.add_tx(len as i64);
                    return Ok(());
                }
                Err(MuxError::Io(e)) => {
                    tracing::warn!("Write to connection {} failed, dropping it: {}", connection.id, e);
                    self.detach(connection.id);
                }
                // The frame itself could not be encoded.
                Err(e) => return Err(e),
            }
        }
    }

    /// Empty the pool, flushing and shutting down every outbound half.
    pub async fn close_all(&self) {
        let connections = std::mem::take(&mut *self.write());
        for connection in connections {
            connection.cancel.cancel();
            let closed = tokio::time::timeout(DEFAULT_CLOSE_TIMEOUT, async {
                let mut writer = connection.writer.lock().await;
                // Left over by a send aborted mid-record. The peer could
                // never decode it and may not be reading at all.
                if !writer.write_buffer().is_empty() {
                    writer.write_buffer_mut().clear();
                }
                SinkExt::<Frame>::close(&mut *writer).await
            })
            .await;
            match closed {
                Ok(Ok(())) => tracing::debug!("Connection {} closed", connection.id),
                Ok(Err(e)) => tracing::debug!("Error while closing connection {}: {}", connection.id, e),
                Err(_) => tracing::warn!("Timed out closing connection {}", connection.id),
            }
        }
    }
}
