//! Stream multiplexing over a pool of obfuscated physical connections.
//!
//! A [`Session`] owns any number of physical duplex byte connections and
//! carries many independent [`Stream`]s over them. Frames of one stream may
//! travel over different connections; every frame carries a per-stream
//! sequence number and the receiving side restores order from it (or
//! delivers in arrival order for unordered sessions).

// Receive buffers, ordered and unordered
pub mod buffer;
// Session configuration
pub mod config;
// Session module
pub mod session;
// Stream module
pub mod stream;
// Flow-control valves
pub mod valve;

mod switchboard;
mod table;

pub use shroud_core::connection::{ConnectionId, SessionId, SessionSide};
pub use shroud_core::error::{MuxError, Result};
pub use shroud_core::stream::StreamId;

pub use crate::{
    buffer::Delivery,
    config::SessionConfig,
    session::{Session, SessionState},
    stream::Stream,
    valve::{LimitedValve, UnlimitedValve, Valve},
};
