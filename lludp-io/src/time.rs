//! Time utilities for the LLUDP transport
//!
//! Provides the clock abstraction used for resend and idle bookkeeping and
//! the per-connection periodic timer that drives ACK flushes and resends.

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Source of monotonic time
///
/// The transport never calls `Instant::now()` directly so that resend and
/// idle timeouts can be driven deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Clock backed by the operating system's monotonic clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        ManualClock {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    /// Move the clock forward by a number of milliseconds
    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Periodic timer running on its own thread
///
/// Calls the tick closure every `interval` until cancelled. Once
/// [`cancel`](TickTimer::cancel) returns no new tick starts; when cancelled
/// from another thread it also waits for an in-flight tick to finish.
pub struct TickTimer {
    cancelled: Arc<AtomicBool>,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TickTimer {
    /// Spawn a named timer thread
    pub fn spawn<F>(name: impl Into<String>, interval: Duration, mut on_tick: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);
        let ticker = channel::tick(interval);

        let flag = cancelled.clone();
        let handle = thread::Builder::new().name(name.into()).spawn(move || loop {
            crossbeam::select! {
                recv(shutdown_rx) -> _ => break,
                recv(ticker) -> _ => {
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    on_tick();
                }
            }
        })?;

        Ok(TickTimer {
            cancelled,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stop the timer
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        // Dropping the sender disconnects the shutdown channel
        drop(self.shutdown.take());

        if let Some(handle) = self.handle.take() {
            // A tick that removes its own connection cannot join itself
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for TickTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
