//! Owned node buffers with tombstones and in-place appends.

use std::borrow::Cow;

use rustc_hash::FxHashSet;

use super::header::{preamble, SORTED_BIT};
use super::{block, build, BuildOptions, Node, NodeEntry, NodeLayout};
use crate::primitives::bytes::buf::Writer;
use crate::primitives::bytes::var;
use crate::types::{NodeError, Result};

/// An owned node buffer that accepts tombstones and in-place appends.
///
/// Deleted entries stay physically present; their storage indices are kept in a
/// side set that every read consults.
#[derive(Clone, Debug)]
pub struct NodeSlot {
    bytes: Vec<u8>,
    layout: NodeLayout,
    tombstones: FxHashSet<usize>,
}

impl NodeSlot {
    /// Validates and takes ownership of an encoded node.
    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        let layout = NodeLayout::parse(&bytes)?;
        Ok(Self {
            bytes,
            layout,
            tombstones: FxHashSet::default(),
        })
    }

    /// Builds a node from `entries` and wraps it.
    pub fn build<I, K, V>(entries: I, options: &BuildOptions) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        Self::parse(build(entries, options)?)
    }

    /// Read-only view of the current bytes (tombstones are not applied).
    pub fn node(&self) -> Node<'_> {
        Node::with_layout(&self.bytes, self.layout)
    }

    /// Current encoded bytes, including tombstoned entries.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Stored entries, live or not.
    pub fn entry_count(&self) -> usize {
        self.layout.entry_count
    }

    /// Live entries.
    pub fn len(&self) -> usize {
        self.layout.entry_count.saturating_sub(self.tombstones.len())
    }

    /// Returns true when no live entries remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tombstoned entries.
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Reserved bytes still available for appends.
    pub fn free_space(&self) -> usize {
        self.node().free_space()
    }

    /// Looks up the live value for `key`.
    pub fn get_value(&self, key: &[u8]) -> Result<Option<&[u8]>> {
        let entry = self
            .node()
            .find(key, |idx| self.tombstones.contains(&idx))?;
        Ok(entry.map(|e| e.value))
    }

    /// Tombstones the live entry for `key`, returning whether one existed.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let found = self
            .node()
            .locate(key, |idx| self.tombstones.contains(&idx))?;
        let Some(index) = found else {
            return Ok(false);
        };
        self.tombstones.insert(index);
        tracing::trace!(
            target: "kvnode::overlay",
            key = %hex::encode(key),
            index,
            "tombstoned entry"
        );
        Ok(true)
    }

    /// Writes one entry into the reserved trailing space without rewriting the node.
    ///
    /// Fails with [`NodeError::Capacity`] when the entry does not fit and with
    /// [`NodeError::Unsupported`] when the node carries an offset index.
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let layout = self.layout;
        if layout.index.is_some() {
            return Err(NodeError::Unsupported("append into a node with an offset index"));
        }
        let node = self.node();
        let stored = node
            .strip(key)
            .ok_or(NodeError::Capacity("key outside the node's compression affixes"))?;
        let block_layout = layout.block;
        if !block_layout.key_code.fits(stored.len() as u64)
            || !block_layout.value_code.fits(value.len() as u64)
        {
            return Err(NodeError::Capacity(
                "entry length not representable by the node's length codes",
            ));
        }
        let needed = block::entry_len(
            block_layout.key_code,
            block_layout.value_code,
            stored,
            value,
        );
        if needed > node.free_space() {
            return Err(NodeError::Capacity("not enough reserved space"));
        }
        let new_count = layout
            .entry_count
            .checked_add(1)
            .ok_or(NodeError::Capacity("entry count cannot grow"))? as u64;
        let new_len = (block_layout.len + needed) as u64;
        if var::encoded_len(new_count) > layout.count_field.width
            || var::encoded_len(new_len) > block_layout.len_field.width
        {
            return Err(NodeError::Capacity("header length fields cannot grow in place"));
        }
        let breaks_order =
            layout.flags.sorted && self.last_stored_key()?.is_some_and(|last| stored < last);

        let mut writer = Writer::with_capacity(needed, layout.endian);
        block::encode_entry(
            &mut writer,
            block_layout.key_code,
            block_layout.value_code,
            stored,
            value,
        )?;
        let encoded = writer.into_inner();
        let at = block_layout.end();
        self.bytes[at..at + encoded.len()].copy_from_slice(&encoded);
        var::encode_u64_padded(new_count, &mut self.bytes[layout.count_field.range()]);
        var::encode_u64_padded(new_len, &mut self.bytes[block_layout.len_field.range()]);
        if breaks_order {
            self.bytes[preamble::OPTIONS] &= !SORTED_BIT;
        }
        self.layout = NodeLayout::parse(&self.bytes)?;
        tracing::trace!(
            target: "kvnode::overlay",
            key = %hex::encode(key),
            bytes = encoded.len(),
            free = self.free_space(),
            "appended entry in place"
        );
        Ok(())
    }

    /// Live entries in storage order.
    pub fn iter(&self) -> impl Iterator<Item = Result<NodeEntry<'_>>> + '_ {
        self.node().iter().filter(move |entry| match entry {
            Ok(entry) => !self.tombstones.contains(&entry.index),
            Err(_) => true,
        })
    }

    /// Collects live keys in storage order.
    pub fn list_keys(&self) -> Result<Vec<Cow<'_, [u8]>>> {
        self.iter().map(|entry| entry.map(|e| e.key)).collect()
    }

    /// Collects live entries in storage order.
    pub fn list_entries(&self) -> Result<Vec<(Cow<'_, [u8]>, &[u8])>> {
        self.iter()
            .map(|entry| entry.map(|e| (e.key, e.value)))
            .collect()
    }

    /// Returns the node bytes with tombstoned entries removed.
    ///
    /// Without tombstones the buffer is returned as is; otherwise the live entries are
    /// rebuilt with the node's own byte order, custom data, ordering, index, padding,
    /// compression and reserved space.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if self.tombstones.is_empty() {
            return Ok(self.bytes);
        }
        self.compacted_bytes()
    }

    /// Rebuilds the node without tombstoned entries, leaving `self` untouched.
    pub fn compacted_bytes(&self) -> Result<Vec<u8>> {
        let options = self.rebuild_options();
        let live = self.list_entries()?;
        build(live, &options)
    }

    fn rebuild_options(&self) -> BuildOptions {
        let node = self.node();
        let flags = self.layout.flags;
        BuildOptions {
            endian: self.layout.endian,
            custom_data: node.custom_data().map(<[u8]>::to_vec),
            keep_entry_order: !flags.sorted,
            skip_offset_index: Some(!flags.indexed),
            use_padding: self.layout.block.padded,
            compact_lengths: false,
            compress_keys: flags.compressed,
            reserve_bytes: node.free_space(),
        }
    }

    fn last_stored_key(&self) -> Result<Option<&[u8]>> {
        let mut last = None;
        for entry in self.node().raw_entries() {
            last = Some(entry?.key);
        }
        Ok(last)
    }
}
