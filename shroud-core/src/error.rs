use std::io;

/// Errors produced by the frame codec, the obfuscators and the multiplexer.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// A record on one physical connection could not be decoded.
    /// Fatal to that connection only.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    /// The stream is closed and drained, or was reset.
    #[error("broken stream")]
    BrokenStream,
    /// The session has finished closing.
    #[error("session closed")]
    SessionClosed,
    /// Every physical connection of the session is gone.
    #[error("no physical connection available")]
    NoConnection,
    /// Key setup or sealing failed.
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl MuxError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        MuxError::MalformedFrame(reason.into())
    }
}

impl From<MuxError> for io::Error {
    fn from(err: MuxError) -> Self {
        match err {
            MuxError::Io(e) => e,
            MuxError::MalformedFrame(_) => io::Error::new(io::ErrorKind::InvalidData, err),
            MuxError::BrokenStream => io::Error::new(io::ErrorKind::BrokenPipe, err),
            MuxError::SessionClosed | MuxError::NoConnection => {
                io::Error::new(io::ErrorKind::NotConnected, err)
            }
            MuxError::Crypto(_) => io::Error::new(io::ErrorKind::Other, err),
        }
    }
}

pub type Result<T, E = MuxError> = std::result::Result<T, E>;
