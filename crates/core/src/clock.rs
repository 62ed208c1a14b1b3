use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Longest single sleep inside `Ticker::wait`, bounding cancellation latency.
const WAIT_SLICE: Duration = Duration::from_millis(100);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        thread::sleep(d);
    }
}

/// Virtual time. `sleep` advances the clock instead of blocking.
pub struct FakeClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self { origin: Instant::now(), offset: Mutex::new(Duration::ZERO) }
    }

    pub fn advance(&self, d: Duration) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) += d;
    }

    /// Virtual time since construction.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
        // let other threads observe the new time
        thread::yield_now();
    }
}

/// Cooperative cancellation flag shared between a loop and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Loop cadence on top of a `Clock`, observing a `CancelToken`.
#[derive(Clone)]
pub struct Ticker {
    clock: Arc<dyn Clock>,
    token: CancelToken,
}

impl Ticker {
    pub fn new(clock: Arc<dyn Clock>, token: CancelToken) -> Self {
        Self { clock, token }
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for `d`, waking early on cancellation. Returns false if cancelled.
    pub fn wait(&self, d: Duration) -> bool {
        let deadline = self.clock.now() + d;
        loop {
            if self.token.is_cancelled() {
                return false;
            }
            let now = self.clock.now();
            if now >= deadline {
                return true;
            }
            self.clock.sleep((deadline - now).min(WAIT_SLICE));
        }
    }
}
