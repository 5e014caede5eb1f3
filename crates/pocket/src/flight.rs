//! In-flight registry: one computation per fingerprint at a time.
//!
//! Forcers get-or-insert a shared slot keyed by fingerprint. Exactly one of
//! them runs the computation; everyone else awaits the slot and observes the
//! same success or the same error. Slots are removed once their outcome is
//! delivered, so a failed computation is retried by the next force rather
//! than being observable as a cached error.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use pocket_core::{Fingerprint, PocketError, Value};

/// A shared one-shot slot: pending, then a success or an error.
pub(crate) type FlightSlot = OnceCell<Result<Value, PocketError>>;

/// Concurrent map from fingerprint to in-flight slot.
///
/// Distinct fingerprints never contend beyond the map shard; computations
/// for different keys proceed in parallel.
#[derive(Debug, Default)]
pub(crate) struct FlightRegistry {
    slots: DashMap<Fingerprint, Arc<FlightSlot>>,
}

impl FlightRegistry {
    /// Atomically get-or-insert the slot for a fingerprint.
    pub(crate) fn acquire(&self, fp: Fingerprint) -> Arc<FlightSlot> {
        self.slots.entry(fp).or_default().clone()
    }

    /// Drop the slot once its outcome has been delivered.
    ///
    /// Guarded by pointer identity so a late finisher never removes a newer
    /// slot installed by a subsequent force.
    pub(crate) fn release(&self, fp: &Fingerprint, slot: &Arc<FlightSlot>) {
        self.slots.remove_if(fp, |_, current| Arc::ptr_eq(current, slot));
    }

    /// Number of keys currently in flight. Diagnostic only.
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
