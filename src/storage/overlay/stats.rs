//! Write-path counters for the overlay.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Point-in-time copy of [`OverlayStats`].
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayStatsSnapshot {
    /// Times the dirty slot was folded into a rebuilt clean node.
    pub clean_merges: u64,
    /// Times the dirty node was rewritten because an append did not fit.
    pub dirty_rebuilds: u64,
    /// Puts written into the dirty node's reserved space.
    pub in_place_appends: u64,
    /// Entries tombstoned by deletes or overwrites.
    pub tombstones: u64,
}

/// Counters describing which write path the overlay took.
#[derive(Default, Debug)]
pub struct OverlayStats {
    clean_merges: AtomicU64,
    dirty_rebuilds: AtomicU64,
    in_place_appends: AtomicU64,
    tombstones: AtomicU64,
}

impl OverlayStats {
    /// Returns the number of clean merges.
    pub fn clean_merges(&self) -> u64 {
        self.clean_merges.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of dirty rebuilds.
    pub fn dirty_rebuilds(&self) -> u64 {
        self.dirty_rebuilds.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of in-place appends.
    pub fn in_place_appends(&self) -> u64 {
        self.in_place_appends.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of tombstoned entries.
    pub fn tombstones(&self) -> u64 {
        self.tombstones.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn inc_clean_merges(&self) {
        self.clean_merges.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_dirty_rebuilds(&self) {
        self.dirty_rebuilds.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_in_place_appends(&self) {
        self.in_place_appends.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_tombstones(&self) {
        self.tombstones.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Creates a snapshot of all counters.
    pub fn snapshot(&self) -> OverlayStatsSnapshot {
        OverlayStatsSnapshot {
            clean_merges: self.clean_merges(),
            dirty_rebuilds: self.dirty_rebuilds(),
            in_place_appends: self.in_place_appends(),
            tombstones: self.tombstones(),
        }
    }

    /// Emits current counters to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "kvnode::overlay",
            clean_merges = snapshot.clean_merges,
            dirty_rebuilds = snapshot.dirty_rebuilds,
            in_place_appends = snapshot.in_place_appends,
            tombstones = snapshot.tombstones,
            "overlay stats snapshot"
        );
    }
}
