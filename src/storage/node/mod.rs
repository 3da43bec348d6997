#![forbid(unsafe_code)]

//! Immutable sorted key-value node: wire format, lookup and builder.
//!
//! ```text
//! tag[3] | version/endian | options | count:var | custom? | prefix/postfix? |
//! offset index? | kv descriptor | kv consts? | kv length:var | pad? | kv block | free
//! ```

use std::borrow::Cow;
use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::primitives::bytes::buf::{Endian, Reader, Writer};
use crate::primitives::bytes::var;
use crate::types::{NodeError, Result};

/// Key-value block codec.
pub mod block;
/// Fixed preamble and option flags.
pub mod header;
/// Per-field length encodings.
pub mod length;
/// Entry offset index.
pub mod offsets;
mod owned;

pub use block::{KvBlock, RawEntry};
pub use header::NodeFlags;
pub use length::LengthCode;
pub use offsets::OffsetIndex;
pub use owned::NodeSlot;

use block::{BlockLayout, RawEntries};
use header::{preamble, VarField};
use offsets::OffsetIndexLayout;


/// Half-open byte range inside a node buffer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Span {
    /// First byte.
    pub start: usize,
    /// Number of bytes.
    pub len: usize,
}

impl Span {
    fn of(start: usize, bytes: &[u8]) -> Self {
        Self {
            start,
            len: bytes.len(),
        }
    }

    fn slice<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.start..self.start + self.len]
    }
}

/// Everything [`Node::parse`] learns about a buffer, without borrowing it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NodeLayout {
    /// Minimum reader version declared by the node.
    pub version: u8,
    /// Byte order of fixed-width fields.
    pub endian: Endian,
    /// Decoded options byte.
    pub flags: NodeFlags,
    /// Number of stored entries.
    pub entry_count: usize,
    /// Location of the entry-count varint.
    pub count_field: VarField,
    /// Custom data, when present.
    pub custom: Option<Span>,
    /// Shared key prefix (empty when absent).
    pub prefix: Span,
    /// Shared key postfix (empty when absent).
    pub postfix: Span,
    /// Offset index, when present.
    pub index: Option<OffsetIndexLayout>,
    /// Key-value block.
    pub block: BlockLayout,
}

impl NodeLayout {
    /// Validates `buf` and records the position of every section.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let (version, endian) = header::check_preamble(buf)?;
        let flags = NodeFlags::from_byte(buf[preamble::OPTIONS])?;
        let mut reader = Reader::new(buf, endian);
        reader.goto(preamble::COUNT)?;
        let entry_count = reader.read_var_usize()?;
        let count_field = VarField {
            pos: preamble::COUNT,
            width: reader.pos() - preamble::COUNT,
        };
        let custom = if flags.custom_data {
            let data = reader.take_prefixed()?;
            Some(Span::of(reader.pos() - data.len(), data))
        } else {
            None
        };
        let (prefix, postfix) = if flags.compressed {
            let prefix = reader.take_prefixed()?;
            let prefix_span = Span::of(reader.pos() - prefix.len(), prefix);
            let postfix = reader.take_prefixed()?;
            let postfix_span = Span::of(reader.pos() - postfix.len(), postfix);
            (prefix_span, postfix_span)
        } else {
            (Span::default(), Span::default())
        };
        let index = if flags.indexed {
            Some(OffsetIndexLayout::parse(&mut reader, entry_count)?)
        } else {
            None
        };
        let block = BlockLayout::parse(&mut reader)?;
        let min_entry = block
            .key_code
            .min_field_len()
            .saturating_add(block.value_code.min_field_len());
        if min_entry > 0 && entry_count as u64 > block.len as u64 / min_entry {
            return Err(NodeError::Format("entry count exceeds the key-value block"));
        }
        Ok(Self {
            version,
            endian,
            flags,
            entry_count,
            count_field,
            custom,
            prefix,
            postfix,
            index,
            block,
        })
    }
}

/// A zero-copy view over an encoded node.
#[derive(Clone, Copy, Debug)]
pub struct Node<'a> {
    buf: &'a [u8],
    layout: NodeLayout,
}

impl<'a> Node<'a> {
    /// Validates the header of `buf` and wraps it without copying.
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        let layout = NodeLayout::parse(buf)?;
        tracing::trace!(
            target: "kvnode::node",
            entries = layout.entry_count,
            sorted = layout.flags.sorted,
            indexed = layout.flags.indexed,
            block_len = layout.block.len,
            "parsed node"
        );
        Ok(Self { buf, layout })
    }

    /// Pairs a buffer with a layout previously parsed from it.
    pub(crate) fn with_layout(buf: &'a [u8], layout: NodeLayout) -> Self {
        Self { buf, layout }
    }

    /// Parsed section positions.
    pub fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    /// The underlying buffer.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.buf
    }

    /// Byte order of fixed-width fields.
    pub fn endian(&self) -> Endian {
        self.layout.endian
    }

    /// Whether stored keys are in non-decreasing order.
    pub fn is_sorted(&self) -> bool {
        self.layout.flags.sorted
    }

    /// Opaque custom data attached at build time.
    pub fn custom_data(&self) -> Option<&'a [u8]> {
        self.layout.custom.map(|span| span.slice(self.buf))
    }

    /// Prefix stripped from every stored key.
    pub fn prefix(&self) -> &'a [u8] {
        self.layout.prefix.slice(self.buf)
    }

    /// Postfix stripped from every stored key.
    pub fn postfix(&self) -> &'a [u8] {
        self.layout.postfix.slice(self.buf)
    }

    /// Number of stored entries, taken from the header.
    pub fn len(&self) -> usize {
        self.layout.entry_count
    }

    /// Returns true when the node stores no entries.
    pub fn is_empty(&self) -> bool {
        self.layout.entry_count == 0
    }

    /// Bytes reserved after the key-value block for in-place appends.
    pub fn free_space(&self) -> usize {
        self.buf.len() - self.layout.block.end()
    }

    /// The offset index, when present.
    pub fn offset_index(&self) -> Option<OffsetIndex<'a>> {
        self.layout
            .index
            .map(|index| index.view(self.buf, self.layout.endian))
    }

    /// The key-value block.
    pub fn block(&self) -> KvBlock<'a> {
        self.layout.block.view(self.buf, self.layout.endian)
    }

    /// Looks up `key`, returning its value bytes without copying.
    pub fn get_value(&self, key: &[u8]) -> Result<Option<&'a [u8]>> {
        Ok(self.find(key, |_| false)?.map(|entry| entry.value))
    }

    /// Finds the first entry for `key` whose storage index `is_dead` rejects.
    pub fn find<F>(&self, key: &[u8], is_dead: F) -> Result<Option<RawEntry<'a>>>
    where
        F: Fn(usize) -> bool,
    {
        let Some(stored) = self.strip(key) else {
            return Ok(None);
        };
        match self.offset_index() {
            Some(index) if self.is_sorted() => self.search_indexed(&index, stored, &is_dead),
            _ => self.scan(stored, &is_dead),
        }
    }

    /// Storage index of the first live entry for `key`.
    pub fn locate<F>(&self, key: &[u8], is_dead: F) -> Result<Option<usize>>
    where
        F: Fn(usize) -> bool,
    {
        Ok(self.find(key, is_dead)?.map(|entry| entry.index))
    }

    /// Strips the compression prefix/postfix, or `None` when `key` lies outside them.
    pub fn strip<'k>(&self, key: &'k [u8]) -> Option<&'k [u8]> {
        let prefix = self.prefix();
        let postfix = self.postfix();
        if key.len() < prefix.len() + postfix.len() {
            return None;
        }
        if !key.starts_with(prefix) || !key.ends_with(postfix) {
            return None;
        }
        Some(&key[prefix.len()..key.len() - postfix.len()])
    }

    /// Rebuilds the logical key for a stored key, borrowing when nothing was stripped.
    pub fn logical_key(&self, stored: &'a [u8]) -> Cow<'a, [u8]> {
        let prefix = self.prefix();
        let postfix = self.postfix();
        if prefix.is_empty() && postfix.is_empty() {
            return Cow::Borrowed(stored);
        }
        let mut key = Vec::with_capacity(prefix.len() + stored.len() + postfix.len());
        key.extend_from_slice(prefix);
        key.extend_from_slice(stored);
        key.extend_from_slice(postfix);
        Cow::Owned(key)
    }

    /// Stored entries in storage order.
    pub fn raw_entries(&self) -> RawEntries<'a> {
        self.block().entries(self.layout.entry_count)
    }

    /// Logical entries in storage order, decoded in one forward pass.
    pub fn iter(&self) -> NodeIter<'a> {
        NodeIter {
            node: *self,
            raw: self.raw_entries(),
        }
    }

    /// Collects every logical key in storage order.
    pub fn list_keys(&self) -> Result<Vec<Cow<'a, [u8]>>> {
        self.iter().map(|entry| entry.map(|e| e.key)).collect()
    }

    /// Collects every logical entry in storage order.
    pub fn list_entries(&self) -> Result<Vec<(Cow<'a, [u8]>, &'a [u8])>> {
        self.iter()
            .map(|entry| entry.map(|e| (e.key, e.value)))
            .collect()
    }

    fn search_indexed(
        &self,
        index: &OffsetIndex<'a>,
        stored: &[u8],
        is_dead: &dyn Fn(usize) -> bool,
    ) -> Result<Option<RawEntry<'a>>> {
        let block = self.block();
        let mut lo = 0usize;
        let mut hi = index.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let offset = index.at(mid)?;
            let (candidate, mut reader) = block.key_at(offset)?;
            match stored.cmp(candidate) {
                Ordering::Equal => {
                    if !is_dead(mid) {
                        let value = block.value_from(&mut reader)?;
                        return Ok(Some(RawEntry {
                            index: mid,
                            offset,
                            key: candidate,
                            value,
                        }));
                    }
                    return self.search_equal_run(index, mid, stored, is_dead);
                }
                Ordering::Less => hi = mid,
                Ordering::Greater => lo = mid + 1,
            }
        }
        Ok(None)
    }

    /// Resolves duplicates around a tombstoned hit.
    fn search_equal_run(
        &self,
        index: &OffsetIndex<'a>,
        hit: usize,
        stored: &[u8],
        is_dead: &dyn Fn(usize) -> bool,
    ) -> Result<Option<RawEntry<'a>>> {
        if let Some(entry) = self.first_live(index, (0..hit).rev(), stored, is_dead)? {
            return Ok(Some(entry));
        }
        self.first_live(index, hit + 1..index.len(), stored, is_dead)
    }

    fn first_live(
        &self,
        index: &OffsetIndex<'a>,
        run: impl Iterator<Item = usize>,
        stored: &[u8],
        is_dead: &dyn Fn(usize) -> bool,
    ) -> Result<Option<RawEntry<'a>>> {
        let block = self.block();
        for idx in run {
            let entry = block.entry_at(idx, index.at(idx)?)?;
            if entry.key != stored {
                break;
            }
            if !is_dead(idx) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    fn scan(
        &self,
        stored: &[u8],
        is_dead: &dyn Fn(usize) -> bool,
    ) -> Result<Option<RawEntry<'a>>> {
        let sorted = self.is_sorted();
        for entry in self.raw_entries() {
            let entry = entry?;
            match stored.cmp(entry.key) {
                Ordering::Equal if !is_dead(entry.index) => return Ok(Some(entry)),
                Ordering::Less if sorted => break,
                _ => {}
            }
        }
        Ok(None)
    }
}

/// A logical entry produced by [`Node::iter`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeEntry<'a> {
    /// Storage position.
    pub index: usize,
    /// Full key including any prefix/postfix.
    pub key: Cow<'a, [u8]>,
    /// Value bytes.
    pub value: &'a [u8],
}

/// Iterator over logical entries in storage order.
#[derive(Debug)]
pub struct NodeIter<'a> {
    node: Node<'a>,
    raw: RawEntries<'a>,
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = Result<NodeEntry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.raw.next()?;
        Some(raw.map(|entry| NodeEntry {
            index: entry.index,
            key: self.node.logical_key(entry.key),
            value: entry.value,
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.raw.size_hint()
    }
}

/// Largest trailing free space [`build`] will reserve.
pub const MAX_RESERVE_BYTES: usize = 1 << 30;

/// Options accepted by [`build`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Byte order of fixed-width fields.
    pub endian: Endian,
    /// Opaque bytes stored in the header.
    pub custom_data: Option<Vec<u8>>,
    /// Keep entries in input order instead of sorting by key.
    pub keep_entry_order: bool,
    /// Omit the offset index; defaults to `keep_entry_order`.
    pub skip_offset_index: Option<bool>,
    /// Align the offset index and key-value block to 8 bytes.
    pub use_padding: bool,
    /// Allow constant and varint length codes when they are smaller.
    pub compact_lengths: bool,
    /// Strip the common key prefix and postfix.
    pub compress_keys: bool,
    /// Zero bytes reserved after the block for in-place appends.
    pub reserve_bytes: usize,
}

impl BuildOptions {
    /// Sets the byte order.
    pub fn endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// Attaches custom data.
    pub fn custom_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.custom_data = Some(data.into());
        self
    }

    /// Keeps input order (also skips the offset index unless overridden).
    pub fn keep_entry_order(mut self, keep: bool) -> Self {
        self.keep_entry_order = keep;
        self
    }

    /// Forces the offset index on or off.
    pub fn skip_offset_index(mut self, skip: bool) -> Self {
        self.skip_offset_index = Some(skip);
        self
    }

    /// Enables 8-byte alignment of the index and block.
    pub fn use_padding(mut self, padded: bool) -> Self {
        self.use_padding = padded;
        self
    }

    /// Enables constant/varint length selection.
    pub fn compact_lengths(mut self, enabled: bool) -> Self {
        self.compact_lengths = enabled;
        self
    }

    /// Enables prefix/postfix key compression.
    pub fn compress_keys(mut self, enabled: bool) -> Self {
        self.compress_keys = enabled;
        self
    }

    /// Reserves trailing free space.
    pub fn reserve_bytes(mut self, bytes: usize) -> Self {
        self.reserve_bytes = bytes;
        self
    }

    /// Whether the offset index is omitted.
    pub fn skips_offset_index(&self) -> bool {
        self.skip_offset_index.unwrap_or(self.keep_entry_order)
    }
}

/// Serializes `entries` into a fresh node buffer.
///
/// Entries are sorted by key unless `keep_entry_order` is set; duplicate keys are
/// stored as given.
pub fn build<I, K, V>(entries: I, options: &BuildOptions) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let owned: Vec<(K, V)> = entries.into_iter().collect();
    let mut refs: Vec<(&[u8], &[u8])> = owned
        .iter()
        .map(|(k, v)| (k.as_ref(), v.as_ref()))
        .collect();
    build_entries(&mut refs, options)
}

pub(crate) fn build_entries(
    entries: &mut [(&[u8], &[u8])],
    options: &BuildOptions,
) -> Result<Vec<u8>> {
    let endian = options.endian;
    let (prefix, postfix) = if options.compress_keys {
        common_affixes(entries)
    } else {
        (&[][..], &[][..])
    };
    let (strip_front, strip_back) = (prefix.len(), postfix.len());
    if !options.keep_entry_order {
        entries.sort_by(|a, b| {
            let left = stored_key(a.0, strip_front, strip_back);
            let right = stored_key(b.0, strip_front, strip_back);
            left.cmp(right)
        });
    }

    let key_lens: Vec<u64> = entries
        .iter()
        .map(|(k, _)| stored_key(k, strip_front, strip_back).len() as u64)
        .collect();
    let value_lens: Vec<u64> = entries.iter().map(|(_, v)| v.len() as u64).collect();
    let (key_code, value_code) = if options.compact_lengths {
        (
            LengthCode::select_compact(&key_lens, endian),
            LengthCode::select_compact(&value_lens, endian),
        )
    } else {
        (
            LengthCode::select_for_build(key_lens.iter().copied()),
            LengthCode::select_for_build(value_lens.iter().copied()),
        )
    };

    let indexed = !options.skips_offset_index();
    let mut kv = Writer::new(endian);
    let mut entry_offsets = Vec::with_capacity(if indexed { entries.len() } else { 0 });
    for (key, value) in entries.iter() {
        if indexed {
            entry_offsets.push(kv.pos() as u64);
        }
        let key = stored_key(key, strip_front, strip_back);
        block::encode_entry(&mut kv, key_code, value_code, key, value)?;
    }
    let kv = kv.into_inner();

    let count = u64::try_from(entries.len())
        .map_err(|_| NodeError::Invalid("entry count exceeds u64"))?;
    let block_len =
        u64::try_from(kv.len()).map_err(|_| NodeError::Invalid("block length exceeds u64"))?;
    let reserve = options.reserve_bytes;
    if reserve > MAX_RESERVE_BYTES {
        return Err(NodeError::Invalid("reserve_bytes exceeds MAX_RESERVE_BYTES"));
    }
    let growth = reserve as u64;
    let flags = NodeFlags {
        custom_data: options.custom_data.is_some(),
        sorted: !options.keep_entry_order,
        compressed: !prefix.is_empty() || !postfix.is_empty(),
        indexed,
    };

    let capacity = entry_offsets
        .len()
        .checked_mul(8)
        .and_then(|index| index.checked_add(kv.len()))
        .and_then(|len| len.checked_add(prefix.len() + postfix.len()))
        .and_then(|len| len.checked_add(64 + reserve))
        .ok_or(NodeError::Invalid("node size exceeds usize"))?;
    let mut out = Writer::try_with_capacity(capacity, endian)?;
    out.put_bytes(&header::FORMAT_TAG);
    out.put_u8(header::version_byte(endian));
    out.put_u8(flags.to_byte());
    if reserve > 0 {
        out.put_var_u64_padded(count, var::encoded_len(count.saturating_add(growth)))?;
    } else {
        out.put_var_u64(count);
    }
    if let Some(custom) = &options.custom_data {
        out.put_prefixed(custom)?;
    }
    if flags.compressed {
        out.put_prefixed(prefix)?;
        out.put_prefixed(postfix)?;
    }
    if indexed {
        offsets::encode(&mut out, &entry_offsets, entries.len(), options.use_padding)?;
    }
    let len_width = (reserve > 0).then(|| var::encoded_len(block_len.saturating_add(growth)));
    block::write_header(
        &mut out,
        key_code,
        value_code,
        block_len,
        options.use_padding,
        len_width,
    )?;
    out.put_bytes(&kv);
    out.put_zeros(reserve);
    let bytes = out.into_inner();
    tracing::trace!(
        target: "kvnode::node",
        entries = entries.len(),
        sorted = flags.sorted,
        indexed,
        key_code = key_code.code(),
        value_code = value_code.code(),
        prefix = %hex::encode(prefix),
        postfix = %hex::encode(postfix),
        bytes = bytes.len(),
        "built node"
    );
    Ok(bytes)
}

fn stored_key(key: &[u8], strip_front: usize, strip_back: usize) -> &[u8] {
    &key[strip_front..key.len() - strip_back]
}

/// Longest common prefix of all keys, then longest common suffix of what remains.
fn common_affixes<'a>(entries: &[(&'a [u8], &[u8])]) -> (&'a [u8], &'a [u8]) {
    let Some(&(first, _)) = entries.first() else {
        return (&[], &[]);
    };
    let mut prefix_len = first.len();
    for (key, _) in &entries[1..] {
        prefix_len = first[..prefix_len]
            .iter()
            .zip(key.iter())
            .take_while(|(a, b)| a == b)
            .count();
        if prefix_len == 0 {
            break;
        }
    }
    let rest = &first[prefix_len..];
    let mut suffix_len = rest.len();
    for (key, _) in entries {
        let other = &key[prefix_len..];
        suffix_len = rest[rest.len() - suffix_len..]
            .iter()
            .rev()
            .zip(other.iter().rev())
            .take_while(|(a, b)| a == b)
            .count();
        if suffix_len == 0 {
            break;
        }
    }
    (&first[..prefix_len], &rest[rest.len() - suffix_len..])
}
