use std::fmt;
use std::sync::Arc;

use shroud_core::connection::SessionSide;
use shroud_core::default;
use shroud_core::obfs::{Obfuscator, PlainObfuscator};

use crate::buffer::Delivery;
use crate::valve::{UnlimitedValve, Valve};

/// Session settings, fixed for the lifetime of a session.
#[derive(Clone)]
pub struct SessionConfig {
    /// Decides the parity of locally opened stream ids
    pub side: SessionSide,
    /// Arrival-order delivery instead of sequence reassembly
    pub unordered: bool,
    pub obfuscator: Arc<dyn Obfuscator>,
    pub valve: Arc<dyn Valve>,
    /// Largest payload carried by one data frame
    pub max_frame_payload: usize,
    /// Inbound streams that may wait for `accept`
    pub accept_backlog: usize,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_side(mut self, side: SessionSide) -> Self {
        self.side = side;
        self
    }
    pub fn with_unordered(mut self, unordered: bool) -> Self {
        self.unordered = unordered;
        self
    }
    pub fn with_obfuscator(mut self, obfuscator: Arc<dyn Obfuscator>) -> Self {
        self.obfuscator = obfuscator;
        self
    }
    pub fn with_valve(mut self, valve: Arc<dyn Valve>) -> Self {
        self.valve = valve;
        self
    }
    pub fn with_max_frame_payload(mut self, max_frame_payload: usize) -> Self {
        self.max_frame_payload = clamp_frame_payload(max_frame_payload);
        self
    }
    pub fn with_accept_backlog(mut self, accept_backlog: usize) -> Self {
        self.accept_backlog = accept_backlog.max(1);
        self
    }
    /// Bring limits set directly on the public fields back into range.
    pub fn normalized(self) -> Self {
        let max_frame_payload = self.max_frame_payload;
        let accept_backlog = self.accept_backlog;
        self.with_max_frame_payload(max_frame_payload)
            .with_accept_backlog(accept_backlog)
    }
    pub fn delivery(&self) -> Delivery {
        Delivery::from_unordered(self.unordered)
    }
}

fn clamp_frame_payload(max_frame_payload: usize) -> usize {
    max_frame_payload.clamp(default::MIN_MAX_FRAME_PAYLOAD, default::MAX_RECORD_LEN / 2)
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            side: SessionSide::Client,
            unordered: false,
            obfuscator: Arc::new(PlainObfuscator),
            valve: Arc::new(UnlimitedValve::default()),
            max_frame_payload: default::DEFAULT_MAX_FRAME_PAYLOAD,
            accept_backlog: default::DEFAULT_ACCEPT_BACKLOG,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("side", &self.side)
            .field("unordered", &self.unordered)
            .field("max_frame_payload", &self.max_frame_payload)
            .field("accept_backlog", &self.accept_backlog)
            .finish_non_exhaustive()
    }
}
