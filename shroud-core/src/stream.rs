use std::fmt;

/// Identifier of a logical stream within a session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl StreamId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
    pub fn id(&self) -> u32 {
        self.0
    }
    /// Check if the id has the parity of ids opened by a client side.
    pub fn is_odd(&self) -> bool {
        self.0 % 2 == 1
    }
}

impl nohash_hasher::IsEnabled for StreamId {}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for StreamId {
    fn from(id: u32) -> Self {
        StreamId(id)
    }
}

/// Per-stream sequence number assigned by the sender.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Seq(pub u64);

impl Seq {
    pub fn new(seq: u64) -> Self {
        Self(seq)
    }
    pub fn value(&self) -> u64 {
        self.0
    }
    /// Adds to the current value, returning the previous value.
    pub fn fetch_add(&mut self, n: u64) -> Self {
        let old = self.0;
        self.0 = self.0.wrapping_add(n);
        Seq(old)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
