//! Flow-control valves.
//!
//! The switchboard consults the valve before writing each frame and the
//! connection readers consult it before dispatching each decoded frame.
//! Credits count plain frame bytes moved in each direction.
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

pub trait Valve: Send + Sync {
    /// How long to hold `n` inbound bytes before admitting them.
    fn rx_wait(&self, n: usize) -> Duration;
    /// How long to hold `n` outbound bytes before writing them.
    fn tx_wait(&self, n: usize) -> Duration;
    fn add_rx(&self, n: i64);
    fn add_tx(&self, n: i64);
    fn rx_credit(&self) -> i64;
    fn tx_credit(&self) -> i64;
}

/// Never delays traffic, only counts it.
#[derive(Debug, Default)]
pub struct UnlimitedValve {
    rx: AtomicI64,
    tx: AtomicI64,
}

impl UnlimitedValve {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Valve for UnlimitedValve {
    fn rx_wait(&self, _n: usize) -> Duration {
        Duration::ZERO
    }
    fn tx_wait(&self, _n: usize) -> Duration {
        Duration::ZERO
    }
    fn add_rx(&self, n: i64) {
        self.rx.fetch_add(n, Ordering::Relaxed);
    }
    fn add_tx(&self, n: i64) {
        self.tx.fetch_add(n, Ordering::Relaxed);
    }
    fn rx_credit(&self) -> i64 {
        self.rx.load(Ordering::Relaxed)
    }
    fn tx_credit(&self) -> i64 {
        self.tx.load(Ordering::Relaxed)
    }
}

/// Token-bucket rate limit per direction, in bytes per second.
/// A rate of zero leaves that direction unlimited.
#[derive(Debug)]
pub struct LimitedValve {
    rx_bucket: TokenBucket,
    tx_bucket: TokenBucket,
    counters: UnlimitedValve,
}

impl LimitedValve {
    pub fn new(rx_rate: u64, tx_rate: u64) -> Self {
        Self {
            rx_bucket: TokenBucket::new(rx_rate),
            tx_bucket: TokenBucket::new(tx_rate),
            counters: UnlimitedValve::default(),
        }
    }
}

impl Valve for LimitedValve {
    fn rx_wait(&self, n: usize) -> Duration {
        self.rx_bucket.take(n)
    }
    fn tx_wait(&self, n: usize) -> Duration {
        self.tx_bucket.take(n)
    }
    fn add_rx(&self, n: i64) {
        self.counters.add_rx(n);
    }
    fn add_tx(&self, n: i64) {
        self.counters.add_tx(n);
    }
    fn rx_credit(&self) -> i64 {
        self.counters.rx_credit()
    }
    fn tx_credit(&self) -> i64 {
        self.counters.tx_credit()
    }
}

#[derive(Debug)]
struct TokenBucket {
    rate: u64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    fn new(rate: u64) -> Self {
        Self {
            rate,
            state: Mutex::new(BucketState {
                tokens: rate as f64,
                last: Instant::now(),
            }),
        }
    }

    /// Take `n` tokens, going into debt if needed, and return how long the
    /// caller has to wait for the debt to be repaid.
    fn take(&self, n: usize) -> Duration {
        if self.rate == 0 {
            return Duration::ZERO;
        }
        let rate = self.rate as f64;
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last).as_secs_f64();
        state.last = now;
        state.tokens = (state.tokens + elapsed * rate).min(rate);
        state.tokens -= n as f64;
        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / rate)
        }
    }
}
