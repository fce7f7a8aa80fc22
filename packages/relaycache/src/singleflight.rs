//! Per-key coordination of concurrent cache misses.
//!
//! When several callers miss on the same fingerprint at once, only one of
//! them (the leader) runs the computation; the rest (waiters) block until
//! the leader resolves and then share its outcome, success or error alike.
//! Slots are type-erased over the *encoded* value bytes so one coordinator
//! serves computations of any result type.
//!
//! Two coordinators cover the two calling surfaces:
//!
//! - [`Singleflight`]: blocking, for threaded callers
//! - [`AsyncSingleflight`]: cooperative, for async callers
//!
//! The coordinator lock is only ever held to join or resolve a flight,
//! never across the user computation or a backend call. A leader that goes
//! away without resolving (cancellation, panic) wakes its waiters, which
//! retry and elect a new leader; a cancelled waiter just withdraws.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::instrument;

use crate::error::Result;

/// The shared outcome of one in-flight computation.
type Flight = Result<Vec<u8>>;

/// Cooperative singleflight coordinator.
#[derive(Debug, Default)]
pub struct AsyncSingleflight {
    slots: Mutex<HashMap<String, watch::Sender<Option<Flight>>>>,
}

impl AsyncSingleflight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`, running `leader` only if no flight is in
    /// progress. Every caller of the same flight receives the same outcome.
    #[instrument(name = "AsyncSingleflight::run", skip(self, leader))]
    pub async fn run<F, Fut>(&self, key: &str, leader: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>>>,
    {
        let mut leader = Some(leader);
        loop {
            let waiter = {
                let mut slots = lock(&self.slots);
                match slots.get(key) {
                    Some(sender) => Some(sender.subscribe()),
                    None => {
                        let (sender, _) = watch::channel(None);
                        slots.insert(key.to_string(), sender);
                        None
                    }
                }
            };

            let Some(mut rx) = waiter else {
                let Some(compute) = leader.take() else {
                    unreachable!("singleflight leader branch entered twice");
                };
                let guard = LeaderGuard {
                    slots: &self.slots,
                    key,
                    resolved: false,
                };
                let flight = compute().await;
                guard.resolve(flight.clone());
                return flight;
            };

            loop {
                if let Some(flight) = rx.borrow().clone() {
                    return flight;
                }
                if rx.changed().await.is_err() {
                    // The sender is gone. Either the leader resolved (the
                    // final value is still readable) or it was dropped
                    // mid-flight, in which case we retry and may lead.
                    if let Some(flight) = rx.borrow().clone() {
                        return flight;
                    }
                    break;
                }
            }
        }
    }
}

/// Removes the slot on drop so an abandoned leader never strands waiters.
struct LeaderGuard<'a> {
    slots: &'a Mutex<HashMap<String, watch::Sender<Option<Flight>>>>,
    key: &'a str,
    resolved: bool,
}

impl LeaderGuard<'_> {
    fn resolve(mut self, flight: Flight) {
        let mut slots = lock(self.slots);
        if let Some(sender) = slots.remove(self.key) {
            // The slot is out of the map, so no new waiter can join; the
            // existing ones read this final value.
            sender.send_replace(Some(flight));
        }
        self.resolved = true;
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        // Dropping the sender errors every waiter's `changed()`, which is
        // their signal to retry.
        lock(self.slots).remove(self.key);
    }
}

/// Blocking singleflight coordinator.
#[derive(Debug, Default)]
pub struct Singleflight {
    slots: Mutex<HashMap<String, Arc<SyncSlot>>>,
}

#[derive(Debug, Default)]
struct SyncSlot {
    state: Mutex<SlotState>,
    cv: Condvar,
}

#[derive(Debug, Default)]
struct SlotState {
    outcome: Option<Flight>,
    abandoned: bool,
}

impl Singleflight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocking variant of [`AsyncSingleflight::run`].
    #[instrument(name = "Singleflight::run", skip(self, leader))]
    pub fn run<F>(&self, key: &str, leader: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let mut leader = Some(leader);
        loop {
            let slot = {
                let mut slots = lock(&self.slots);
                match slots.get(key) {
                    Some(slot) => Some(Arc::clone(slot)),
                    None => {
                        slots.insert(key.to_string(), Arc::new(SyncSlot::default()));
                        None
                    }
                }
            };

            let Some(slot) = slot else {
                let Some(compute) = leader.take() else {
                    unreachable!("singleflight leader branch entered twice");
                };
                let guard = SyncLeaderGuard {
                    flight: self,
                    key,
                    resolved: false,
                };
                let flight = compute();
                guard.resolve(flight.clone());
                return flight;
            };

            let mut state = lock(&slot.state);
            while state.outcome.is_none() && !state.abandoned {
                state = slot
                    .cv
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if let Some(flight) = state.outcome.clone() {
                return flight;
            }
            // Abandoned: drop the stale slot handle and retry.
        }
    }

    fn take_slot(&self, key: &str) -> Option<Arc<SyncSlot>> {
        lock(&self.slots).remove(key)
    }
}

struct SyncLeaderGuard<'a> {
    flight: &'a Singleflight,
    key: &'a str,
    resolved: bool,
}

impl SyncLeaderGuard<'_> {
    fn resolve(mut self, flight: Flight) {
        if let Some(slot) = self.flight.take_slot(self.key) {
            let mut state = lock(&slot.state);
            state.outcome = Some(flight);
            slot.cv.notify_all();
        }
        self.resolved = true;
    }
}

impl Drop for SyncLeaderGuard<'_> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        // The leader panicked; wake the waiters so they can retry.
        if let Some(slot) = self.flight.take_slot(self.key) {
            let mut state = lock(&slot.state);
            state.abandoned = true;
            slot.cv.notify_all();
        }
    }
}

/// A poisoned coordinator mutex means some holder panicked between two map
/// operations; the map itself stays structurally sound, so keep going.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
