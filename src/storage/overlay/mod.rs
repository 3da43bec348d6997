//! Mutable key-value map layered over two immutable nodes.
//!
//! `clean` is sorted and indexed; `dirty` is an unsorted, unindexed write buffer with
//! reserved trailing space. Reads consult `clean` first, then `dirty`.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::storage::node::{build, BuildOptions, NodeEntry, NodeSlot};
use crate::types::{NodeError, Result};

mod stats;

pub use stats::{OverlayStats, OverlayStatsSnapshot};


/// Lowest accepted dirty-entry threshold.
pub const MIN_DIRTY_LEN: usize = 10;
/// Dirty-entry threshold used when none is configured.
pub const DEFAULT_MAX_DIRTY_LEN: usize = 100;
/// Free space reserved in each rebuilt dirty node.
pub const DEFAULT_DIRTY_RESERVE_BYTES: usize = 4096;

/// Tuning knobs for an [`Overlay`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayOptions {
    /// Dirty entries tolerated before the next put merges into `clean`.
    pub max_dirty_len: usize,
    /// Align index and block sections of rebuilt nodes to 8 bytes.
    pub use_padding: bool,
    /// Zero bytes reserved after a rebuilt dirty node for in-place appends.
    pub dirty_reserve_bytes: usize,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            max_dirty_len: DEFAULT_MAX_DIRTY_LEN,
            use_padding: false,
            dirty_reserve_bytes: DEFAULT_DIRTY_RESERVE_BYTES,
        }
    }
}

impl OverlayOptions {
    /// Sets the dirty-entry threshold (floored at [`MIN_DIRTY_LEN`] when applied).
    pub fn max_dirty_len(mut self, len: usize) -> Self {
        self.max_dirty_len = len;
        self
    }

    /// Enables 8-byte alignment in rebuilt nodes.
    pub fn use_padding(mut self, padded: bool) -> Self {
        self.use_padding = padded;
        self
    }

    /// Sets the dirty node's reserved space.
    pub fn dirty_reserve_bytes(mut self, bytes: usize) -> Self {
        self.dirty_reserve_bytes = bytes;
        self
    }

    /// Threshold after applying the floor.
    pub fn effective_max_dirty_len(&self) -> usize {
        self.max_dirty_len.max(MIN_DIRTY_LEN)
    }
}

/// A clean node plus an optional dirty node, mutated by rebuilding or appending.
///
/// Not safe for concurrent mutation; wrap it in a lock when sharing writers.
#[derive(Debug)]
pub struct Overlay {
    clean: NodeSlot,
    dirty: Option<NodeSlot>,
    options: OverlayOptions,
    stats: OverlayStats,
}

impl Overlay {
    /// Creates an overlay over an empty clean node.
    pub fn new(options: OverlayOptions) -> Result<Self> {
        let clean = NodeSlot::build(
            Vec::<(Vec<u8>, Vec<u8>)>::new(),
            &BuildOptions::default().use_padding(options.use_padding),
        )?;
        Ok(Self::from_slots(clean, None, options))
    }

    /// Parses serialized slots with default options.
    pub fn parse(clean: Vec<u8>, dirty: Option<Vec<u8>>) -> Result<Self> {
        Self::parse_with(clean, dirty, OverlayOptions::default())
    }

    /// Parses serialized slots.
    ///
    /// `clean` must be sorted and carry an offset index; `dirty` must be unsorted and
    /// carry none.
    pub fn parse_with(
        clean: Vec<u8>,
        dirty: Option<Vec<u8>>,
        options: OverlayOptions,
    ) -> Result<Self> {
        let clean = NodeSlot::parse(clean)?;
        let flags = clean.node().layout().flags;
        if !flags.sorted || !flags.indexed {
            return Err(NodeError::Invalid("clean node must be sorted and indexed"));
        }
        let dirty = match dirty {
            Some(bytes) => {
                let slot = NodeSlot::parse(bytes)?;
                let flags = slot.node().layout().flags;
                if flags.sorted || flags.indexed {
                    return Err(NodeError::Invalid(
                        "dirty node must be unsorted and unindexed",
                    ));
                }
                Some(slot)
            }
            None => None,
        };
        Ok(Self::from_slots(clean, dirty, options))
    }

    fn from_slots(clean: NodeSlot, dirty: Option<NodeSlot>, options: OverlayOptions) -> Self {
        Self {
            clean,
            dirty,
            options,
            stats: OverlayStats::default(),
        }
    }

    /// Dirty-entry threshold after the floor.
    pub fn max_dirty_len(&self) -> usize {
        self.options.effective_max_dirty_len()
    }

    /// Updates the dirty-entry threshold; values below [`MIN_DIRTY_LEN`] are raised to it.
    pub fn set_max_dirty_len(&mut self, len: usize) {
        self.options.max_dirty_len = len.max(MIN_DIRTY_LEN);
    }

    /// Active options.
    pub fn options(&self) -> &OverlayOptions {
        &self.options
    }

    /// Write-path counters.
    pub fn stats(&self) -> &OverlayStats {
        &self.stats
    }

    /// The clean slot.
    pub fn clean_slot(&self) -> &NodeSlot {
        &self.clean
    }

    /// The dirty slot, if one has been written.
    pub fn dirty_slot(&self) -> Option<&NodeSlot> {
        self.dirty.as_ref()
    }

    /// Looks up `key`, consulting `clean` before `dirty`.
    pub fn get_value(&self, key: &[u8]) -> Result<Option<&[u8]>> {
        if let Some(value) = self.clean.get_value(key)? {
            return Ok(Some(value));
        }
        match &self.dirty {
            Some(dirty) => dirty.get_value(key),
            None => Ok(None),
        }
    }

    /// Tombstones every live occurrence of `key`, returning whether any existed.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let mut removed = 0u64;
        while self.clean.delete(key)? {
            removed += 1;
        }
        if let Some(dirty) = self.dirty.as_mut() {
            while dirty.delete(key)? {
                removed += 1;
            }
        }
        for _ in 0..removed {
            self.stats.inc_tombstones();
        }
        Ok(removed > 0)
    }

    /// Inserts or replaces `key`.
    ///
    /// Any existing occurrence is tombstoned first. Once the dirty node holds more than
    /// [`Overlay::max_dirty_len`] entries the next put rebuilds `clean` from both slots;
    /// otherwise the entry is appended to `dirty` in place, rebuilding `dirty` when it
    /// has no room left.
    pub fn put_value(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.delete(key)?;
        let max = self.max_dirty_len();
        let overflowing = self
            .dirty
            .as_ref()
            .is_some_and(|dirty| dirty.entry_count() > max);
        if overflowing {
            return self.merge(Some((key, value)));
        }
        if let Some(dirty) = self.dirty.as_mut() {
            match dirty.append(key, value) {
                Ok(()) => {
                    self.stats.inc_in_place_appends();
                    return Ok(());
                }
                Err(err) if err.is_capacity() => {}
                Err(err) => return Err(err),
            }
        }
        self.rebuild_dirty(key, value)
    }

    /// Live entries across both slots.
    pub fn len(&self) -> usize {
        self.clean
            .len()
            .saturating_add(self.dirty.as_ref().map_or(0, NodeSlot::len))
    }

    /// Returns true when neither slot holds a live entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live entries, `clean` first and then `dirty`, each in storage order.
    pub fn iter(&self) -> impl Iterator<Item = Result<NodeEntry<'_>>> + '_ {
        self.clean
            .iter()
            .chain(self.dirty.iter().flat_map(|dirty| dirty.iter()))
    }

    /// Collects live keys, `clean` first.
    pub fn list_keys(&self) -> Result<Vec<Cow<'_, [u8]>>> {
        self.iter().map(|entry| entry.map(|e| e.key)).collect()
    }

    /// Collects live entries, `clean` first.
    pub fn list_entries(&self) -> Result<Vec<(Cow<'_, [u8]>, &[u8])>> {
        self.iter()
            .map(|entry| entry.map(|e| (e.key, e.value)))
            .collect()
    }

    /// Folds `dirty` and all tombstones into a freshly built `clean`.
    pub fn compact(&mut self) -> Result<()> {
        self.merge(None)
    }

    /// Returns the serialized slots with tombstoned entries removed.
    pub fn into_buffers(self) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let clean = self.clean.into_bytes()?;
        let dirty = self.dirty.map(NodeSlot::into_bytes).transpose()?;
        Ok((clean, dirty))
    }

    fn rebuild_dirty(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let options = BuildOptions::default()
            .endian(self.clean.node().endian())
            .keep_entry_order(true)
            .skip_offset_index(true)
            .use_padding(self.options.use_padding)
            .reserve_bytes(self.options.dirty_reserve_bytes);
        let bytes = {
            let mut entries = match &self.dirty {
                Some(dirty) => dirty.list_entries()?,
                None => Vec::new(),
            };
            entries.push((Cow::Borrowed(key), value));
            build(entries, &options)?
        };
        let slot = NodeSlot::parse(bytes)?;
        tracing::debug!(
            target: "kvnode::overlay",
            key = %hex::encode(key),
            entries = slot.entry_count(),
            free = slot.free_space(),
            "rebuilt dirty node"
        );
        self.dirty = Some(slot);
        self.stats.inc_dirty_rebuilds();
        Ok(())
    }

    fn merge(&mut self, extra: Option<(&[u8], &[u8])>) -> Result<()> {
        let node = self.clean.node();
        let mut options = BuildOptions::default()
            .endian(node.endian())
            .use_padding(self.options.use_padding)
            .compress_keys(node.layout().flags.compressed);
        if let Some(custom) = node.custom_data() {
            options = options.custom_data(custom);
        }
        let bytes = {
            let mut entries = self.clean.list_entries()?;
            if let Some(dirty) = &self.dirty {
                entries.extend(dirty.list_entries()?);
            }
            if let Some((key, value)) = extra {
                entries.push((Cow::Borrowed(key), value));
            }
            build(entries, &options)?
        };
        let merged = NodeSlot::parse(bytes)?;
        tracing::debug!(
            target: "kvnode::overlay",
            entries = merged.entry_count(),
            dirty_entries = self.dirty.as_ref().map_or(0, NodeSlot::entry_count),
            bytes = merged.as_bytes().len(),
            "merged dirty node into clean"
        );
        self.clean = merged;
        self.dirty = None;
        self.stats.inc_clean_merges();
        Ok(())
    }
}
