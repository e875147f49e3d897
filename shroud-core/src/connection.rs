use std::fmt;

use crate::stream::StreamId;

/// Opaque session identifier, used for correlation with the transport layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub u32);

impl SessionId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one physical connection attached to a session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl nohash_hasher::IsEnabled for ConnectionId {}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session side, client or server
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum SessionSide {
    /// Opens odd stream ids
    Client,
    /// Opens even stream ids
    Server,
}

impl SessionSide {
    /// If this is a client type
    pub fn is_client(self) -> bool {
        self == SessionSide::Client
    }

    /// If this is a server type
    pub fn is_server(self) -> bool {
        self == SessionSide::Server
    }

    /// First stream id this side assigns when opening streams.
    pub fn initial_stream_id(self) -> StreamId {
        match self {
            SessionSide::Client => StreamId(1),
            SessionSide::Server => StreamId(2),
        }
    }

    /// Check if `id` belongs to the id space this side assigns.
    pub fn owns(self, id: StreamId) -> bool {
        match self {
            SessionSide::Client => id.is_odd(),
            SessionSide::Server => !id.is_odd(),
        }
    }
}

impl Default for SessionSide {
    fn default() -> Self {
        SessionSide::Client
    }
}
