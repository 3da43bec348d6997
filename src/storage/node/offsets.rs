//! Offset index: packed entry offsets that make binary search O(log n).

use crate::primitives::bytes::buf::{read_uint_at, Endian, IntWidth, Reader, Writer};
use crate::types::{NodeError, Result};

const WIDTH_MASK: u8 = 0b0000_0011;
const COUNT_PRESENT: u8 = 0b0000_0100;
const PADDED: u8 = 0b0000_1000;
const SPARSE_MASK: u8 = 0b1111_0000;

/// Position of a parsed offset index inside its node buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OffsetIndexLayout {
    /// Width of each packed offset.
    pub width: IntWidth,
    /// Number of packed offsets.
    pub count: usize,
    /// Absolute position of the first packed offset.
    pub start: usize,
    /// Whether the packed array was aligned to 8 bytes.
    pub padded: bool,
}

impl OffsetIndexLayout {
    /// Parses the descriptor and validates that the packed array fits the buffer.
    ///
    /// `entry_count` is the node's count, used unless the descriptor carries its own.
    pub fn parse(reader: &mut Reader<'_>, entry_count: usize) -> Result<Self> {
        let desc = reader.read_u8()?;
        if desc & SPARSE_MASK != 0 {
            return Err(NodeError::Unsupported("sparse offset index"));
        }
        let width = IntWidth::from_code(desc & WIDTH_MASK);
        let count = if desc & COUNT_PRESENT != 0 {
            reader.read_var_usize()?
        } else {
            entry_count
        };
        let padded = desc & PADDED != 0;
        if padded {
            reader.skip_padding8()?;
        }
        let len = count
            .checked_mul(width.bytes())
            .ok_or(NodeError::Format("offset index length overflow"))?;
        let start = reader.pos();
        reader
            .take(len)
            .map_err(|_| NodeError::Format("offset index truncated"))?;
        Ok(Self {
            width,
            count,
            start,
            padded,
        })
    }

    /// Borrows the packed offsets out of the node buffer.
    pub fn view<'a>(&self, node: &'a [u8], endian: Endian) -> OffsetIndex<'a> {
        let end = self.start + self.count * self.width.bytes();
        OffsetIndex {
            data: &node[self.start..end],
            width: self.width,
            endian,
            count: self.count,
        }
    }
}

/// Emits an offset index for `offsets` (entry start positions within the block).
///
/// The explicit count is only written when it differs from `entry_count`.
pub fn encode(
    writer: &mut Writer,
    offsets: &[u64],
    entry_count: usize,
    padded: bool,
) -> Result<IntWidth> {
    let width = IntWidth::for_max(offsets.iter().copied().max().unwrap_or(0));
    let explicit = offsets.len() != entry_count;
    let mut desc = width.code();
    if explicit {
        desc |= COUNT_PRESENT;
    }
    if padded {
        desc |= PADDED;
    }
    writer.put_u8(desc);
    if explicit {
        let count = u64::try_from(offsets.len())
            .map_err(|_| NodeError::Invalid("offset count exceeds u64"))?;
        writer.put_var_u64(count);
    }
    if padded {
        writer.pad8();
    }
    for &offset in offsets {
        writer.put_uint(width, offset)?;
    }
    Ok(width)
}

/// Read-only view mapping entry position to its byte offset in the key-value block.
#[derive(Clone, Copy, Debug)]
pub struct OffsetIndex<'a> {
    data: &'a [u8],
    width: IntWidth,
    endian: Endian,
    count: usize,
}

impl<'a> OffsetIndex<'a> {
    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Width of each packed offset.
    pub fn width(&self) -> IntWidth {
        self.width
    }

    /// Offset of entry `idx` within the key-value block.
    pub fn at(&self, idx: usize) -> Result<usize> {
        if idx >= self.count {
            return Err(NodeError::Invalid("offset index position out of range"));
        }
        let raw = read_uint_at(self.data, idx * self.width.bytes(), self.width, self.endian)?;
        usize::try_from(raw).map_err(|_| NodeError::Format("offset exceeds usize"))
    }

    /// Iterates every offset in index order.
    pub fn iter(&self) -> impl Iterator<Item = Result<usize>> + 'a {
        let view = *self;
        (0..view.count).map(move |idx| view.at(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(offsets: &[u64], entry_count: usize, padded: bool, endian: Endian) -> Vec<u8> {
        let mut writer = Writer::new(endian);
        // A leading byte keeps padding observable.
        writer.put_u8(0xaa);
        encode(&mut writer, offsets, entry_count, padded).expect("encode offsets");
        writer.into_inner()
    }

    fn parsed(buf: &[u8], entry_count: usize, endian: Endian) -> Result<OffsetIndexLayout> {
        let mut reader = Reader::new(buf, endian);
        reader.read_u8()?;
        OffsetIndexLayout::parse(&mut reader, entry_count)
    }

    #[test]
    fn small_offsets_pack_into_single_bytes() -> Result<()> {
        let buf = encoded(&[0, 5, 200], 3, false, Endian::Little);
        assert_eq!(buf, vec![0xaa, 0x00, 0, 5, 200]);
        let layout = parsed(&buf, 3, Endian::Little)?;
        let index = layout.view(&buf, Endian::Little);
        assert_eq!(index.width(), IntWidth::U8);
        assert_eq!(index.iter().collect::<Result<Vec<_>>>()?, vec![0, 5, 200]);
        Ok(())
    }

    #[test]
    fn wide_offsets_select_wider_width() -> Result<()> {
        for endian in [Endian::Little, Endian::Big] {
            let buf = encoded(&[0, 256, 70_000], 3, false, endian);
            let layout = parsed(&buf, 3, endian)?;
            assert_eq!(layout.width, IntWidth::U32);
            let index = layout.view(&buf, endian);
            assert_eq!(index.at(1)?, 256);
            assert_eq!(index.at(2)?, 70_000);
            assert!(matches!(index.at(3), Err(NodeError::Invalid(_))));
        }
        Ok(())
    }

    #[test]
    fn padded_array_starts_aligned() -> Result<()> {
        let buf = encoded(&[1, 2], 2, true, Endian::Little);
        let layout = parsed(&buf, 2, Endian::Little)?;
        assert!(layout.padded);
        assert_eq!(layout.start % 8, 0);
        assert_eq!(layout.view(&buf, Endian::Little).at(1)?, 2);
        Ok(())
    }

    #[test]
    fn explicit_count_overrides_entry_count() -> Result<()> {
        let buf = encoded(&[0, 9], 5, false, Endian::Little);
        assert_eq!(buf[1] & COUNT_PRESENT, COUNT_PRESENT);
        let layout = parsed(&buf, 5, Endian::Little)?;
        assert_eq!(layout.count, 2);
        Ok(())
    }

    #[test]
    fn sparse_bits_are_unsupported() {
        let buf = [0xaa, 0x10, 0];
        let err = parsed(&buf, 1, Endian::Little).unwrap_err();
        assert!(matches!(err, NodeError::Unsupported(_)));
    }

    #[test]
    fn truncated_array_is_malformed() {
        let buf = [0xaa, 0x01, 0, 0, 0];
        let err = parsed(&buf, 2, Endian::Little).unwrap_err();
        assert!(matches!(err, NodeError::Format(_)));
    }
}
