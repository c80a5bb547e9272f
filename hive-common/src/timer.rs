//! # Timers
//!
//! Purpose: Give the cache a pluggable clock so expiration can run against
//! wall time in production and virtual time in tests.
//!
//! ## Variants
//!
//! - [`WallClock`] reads Unix time on every call.
//! - [`Monotonic`] reads the process monotonic clock; cheaper and immune to
//!   wall-clock adjustments, but readings are only meaningful within one
//!   process.
//! - [`MonotonicEpoch`] anchors the monotonic clock to a caller epoch.
//! - [`CachedTimer`] refreshes a stored reading on a background thread for
//!   hot paths that tolerate coarse granularity.
//! - [`TimerFn`] wraps any closure, which is how tests inject virtual time.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of the current time in nanoseconds.
pub trait Timer: Send + Sync {
    /// Current time in nanoseconds. The domain (wall vs monotonic) is the
    /// implementation's; expiry deadlines must come from the same domain.
    fn now(&self) -> i64;
}

/// Wall-clock timer reading Unix time on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl Timer for WallClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos() as i64
    }
}

fn process_epoch() -> Instant {
    static EPOCH: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Monotonic timer measuring nanoseconds since first use in this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct Monotonic;

impl Timer for Monotonic {
    fn now(&self) -> i64 {
        process_epoch().elapsed().as_nanos() as i64
    }
}

/// Monotonic timer offset by a caller-provided epoch.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicEpoch(pub i64);

impl Timer for MonotonicEpoch {
    fn now(&self) -> i64 {
        self.0.saturating_add(Monotonic.now())
    }
}

/// Closure-backed timer.
pub struct TimerFn<F>(pub F);

impl<F> Timer for TimerFn<F>
where
    F: Fn() -> i64 + Send + Sync,
{
    fn now(&self) -> i64 {
        (self.0)()
    }
}

/// Timer that serves a periodically refreshed reading.
///
/// A background thread samples the source at the configured granularity.
/// Call [`CachedTimer::stop`] to join the thread; dropping without stopping
/// leaks it until process exit.
pub struct CachedTimer {
    now: Arc<AtomicI64>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl CachedTimer {
    /// Starts the refresh thread over `source` at `granularity`.
    pub fn new(source: Arc<dyn Timer>, granularity: Duration) -> Self {
        let granularity = if granularity.is_zero() {
            Duration::from_millis(1)
        } else {
            granularity
        };

        let now = Arc::new(AtomicI64::new(source.now()));
        let stop = Arc::new(AtomicBool::new(false));
        let now_thread = Arc::clone(&now);
        let stop_thread = Arc::clone(&stop);

        let join = std::thread::spawn(move || {
            while !stop_thread.load(Ordering::Acquire) {
                std::thread::sleep(granularity);
                now_thread.store(source.now(), Ordering::Release);
            }
        });

        CachedTimer {
            now,
            stop,
            join: Some(join),
        }
    }

    /// Stops the refresh thread and waits for it to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Timer for CachedTimer {
    fn now(&self) -> i64 {
        self.now.load(Ordering::Acquire)
    }
}
