//! # Singleflight
//!
//! Coalesces concurrent calls by key: the first caller starts the work as
//! a detached task, everyone else waits on the same gate and observes the
//! identical result. Because the work is detached, a caller that goes away
//! (drops its future) never cancels the flight for the rest.
//!
//! The flight table's mutex doubles as the engine's serialization point:
//! [`FlightGroup::lock`] runs a closure while holding it, which is how
//! cache mutations are kept from racing a flight's populate step.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::watch;

use hive_common::error::{CacheError, CacheResult};

type Gate<T> = watch::Receiver<Option<CacheResult<T>>>;

struct Flight<T> {
    gate: Gate<T>,
    /// Callers beyond the one that started the flight.
    dups: Arc<AtomicU64>,
}

/// Per-key call coalescer.
pub struct FlightGroup<T> {
    flights: Arc<Mutex<HashMap<String, Flight<T>, RandomState>>>,
}

impl<T> Default for FlightGroup<T> {
    fn default() -> Self {
        FlightGroup {
            flights: Arc::new(Mutex::new(HashMap::with_hasher(RandomState::new()))),
        }
    }
}

impl<T> FlightGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `start`'s future for `key`, or joins the flight already in
    /// progress. Returns the shared result and whether it was observed by
    /// more than one caller.
    ///
    /// `start` is only invoked when this call becomes the flight owner.
    /// The flight runs as a spawned task; dropping the returned future
    /// abandons the wait, not the flight.
    pub async fn work<F, Fut>(&self, key: &str, start: F) -> (CacheResult<T>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        let (mut gate, dups, owner_send) = {
            let mut flights = self.flights.lock();
            if let Some(flight) = flights.get(key) {
                flight.dups.fetch_add(1, Ordering::Relaxed);
                (flight.gate.clone(), Arc::clone(&flight.dups), None)
            } else {
                let (tx, rx) = watch::channel(None);
                let dups = Arc::new(AtomicU64::new(0));
                flights.insert(
                    key.to_string(),
                    Flight {
                        gate: rx.clone(),
                        dups: Arc::clone(&dups),
                    },
                );
                (rx, dups, Some(tx))
            }
        };

        if let Some(tx) = owner_send {
            let flights = Arc::clone(&self.flights);
            let flight_key = key.to_string();
            let fut = start();
            tokio::spawn(async move {
                let result = fut.await;
                // Deregister before broadcasting; late callers start a
                // fresh flight while existing waiters still hold the gate.
                flights.lock().remove(&flight_key);
                let _ = tx.send(Some(result));
            });
        }

        let result = loop {
            if let Some(result) = gate.borrow_and_update().clone() {
                break result;
            }
            if gate.changed().await.is_err() {
                // The flight task died without publishing (panic).
                break Err(CacheError::FlightAborted);
            }
        };

        let shared = dups.load(Ordering::Relaxed) > 0;
        (result, shared)
    }

    /// Runs `f` while holding the flight-table mutex, excluding flight
    /// registration, deregistration, and populate steps routed through
    /// this same lock. `f` must not block.
    pub fn lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.flights.lock();
        f()
    }
}
