//! Key-value block descriptor, entry encoding and forward decoding.

use crate::primitives::bytes::buf::{Endian, Reader, Writer};
use crate::storage::node::header::VarField;
use crate::storage::node::length::{LengthCode, CODE_MASK};
use crate::types::{NodeError, Result};

const VALUE_SHIFT: u8 = 3;
const PADDED: u8 = 0b0100_0000;
const RESERVED: u8 = 0b1000_0000;

/// Position and encoding of a key-value block inside its node buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockLayout {
    /// Encoding of key lengths.
    pub key_code: LengthCode,
    /// Encoding of value lengths.
    pub value_code: LengthCode,
    /// Location of the total-length varint.
    pub len_field: VarField,
    /// Absolute position of the first entry byte.
    pub start: usize,
    /// Declared byte length of the block.
    pub len: usize,
    /// Whether the block start was aligned to 8 bytes.
    pub padded: bool,
}

impl BlockLayout {
    /// Parses the block descriptor and takes a view of the declared length.
    pub fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let desc = reader.read_u8()?;
        if desc & RESERVED != 0 {
            return Err(NodeError::Format("reserved key-value descriptor bit set"));
        }
        let key_code = LengthCode::decode_header(desc & CODE_MASK, reader)?;
        let value_code = LengthCode::decode_header((desc >> VALUE_SHIFT) & CODE_MASK, reader)?;
        let len_pos = reader.pos();
        let len = reader.read_var_usize()?;
        let len_field = VarField {
            pos: len_pos,
            width: reader.pos() - len_pos,
        };
        let padded = desc & PADDED != 0;
        if padded {
            reader.skip_padding8()?;
        }
        let start = reader.pos();
        reader
            .take(len)
            .map_err(|_| NodeError::Format("key-value block truncated"))?;
        Ok(Self {
            key_code,
            value_code,
            len_field,
            start,
            len,
            padded,
        })
    }

    /// Absolute position one past the last block byte.
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    /// Borrows the block out of the node buffer.
    pub fn view<'a>(&self, node: &'a [u8], endian: Endian) -> KvBlock<'a> {
        KvBlock {
            data: &node[self.start..self.end()],
            key_code: self.key_code,
            value_code: self.value_code,
            endian,
        }
    }
}

/// Writes the block descriptor, inline constants, total length and optional padding.
///
/// With `len_width` set, the length is written as a padded varint of that width so it
/// can later be rewritten in place.
pub fn write_header(
    writer: &mut Writer,
    key_code: LengthCode,
    value_code: LengthCode,
    block_len: u64,
    padded: bool,
    len_width: Option<usize>,
) -> Result<VarField> {
    let mut desc = key_code.code() | (value_code.code() << VALUE_SHIFT);
    if padded {
        desc |= PADDED;
    }
    writer.put_u8(desc);
    key_code.write_header(writer);
    value_code.write_header(writer);
    let pos = writer.pos();
    match len_width {
        Some(width) => writer.put_var_u64_padded(block_len, width)?,
        None => writer.put_var_u64(block_len),
    }
    let field = VarField {
        pos,
        width: writer.pos() - pos,
    };
    if padded {
        writer.pad8();
    }
    Ok(field)
}

/// Appends one entry using the given length codes.
pub fn encode_entry(
    writer: &mut Writer,
    key_code: LengthCode,
    value_code: LengthCode,
    key: &[u8],
    value: &[u8],
) -> Result<()> {
    let key_len =
        u64::try_from(key.len()).map_err(|_| NodeError::Invalid("key length exceeds u64"))?;
    let value_len =
        u64::try_from(value.len()).map_err(|_| NodeError::Invalid("value length exceeds u64"))?;
    if !key_code.fits(key_len) {
        return Err(NodeError::Invalid("key length not representable by length code"));
    }
    if !value_code.fits(value_len) {
        return Err(NodeError::Invalid(
            "value length not representable by length code",
        ));
    }
    key_code.write_length(writer, key_len)?;
    writer.put_bytes(key);
    value_code.write_length(writer, value_len)?;
    writer.put_bytes(value);
    Ok(())
}

/// Encoded size of one entry.
pub fn entry_len(key_code: LengthCode, value_code: LengthCode, key: &[u8], value: &[u8]) -> usize {
    key_code.prefix_len(key.len() as u64)
        + key.len()
        + value_code.prefix_len(value.len() as u64)
        + value.len()
}

/// One decoded entry, borrowed from the node buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RawEntry<'a> {
    /// Storage position of the entry.
    pub index: usize,
    /// Byte offset of the entry within the block.
    pub offset: usize,
    /// Stored (compressed) key.
    pub key: &'a [u8],
    /// Value bytes.
    pub value: &'a [u8],
}

/// Zero-copy view over the concatenated entries.
#[derive(Clone, Copy, Debug)]
pub struct KvBlock<'a> {
    data: &'a [u8],
    key_code: LengthCode,
    value_code: LengthCode,
    endian: Endian,
}

impl<'a> KvBlock<'a> {
    /// Block bytes.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Decodes the key starting at `offset`, returning a reader positioned at its value.
    #[inline]
    pub fn key_at(&self, offset: usize) -> Result<(&'a [u8], Reader<'a>)> {
        let mut reader = Reader::new(self.data, self.endian);
        reader.goto(offset)?;
        let key_len = self.key_code.read_length(&mut reader)?;
        let key = reader.take(key_len)?;
        Ok((key, reader))
    }

    /// Decodes the value that follows a key read by [`KvBlock::key_at`].
    #[inline]
    pub fn value_from(&self, reader: &mut Reader<'a>) -> Result<&'a [u8]> {
        let value_len = self.value_code.read_length(reader)?;
        reader.take(value_len)
    }

    /// Decodes the whole entry at `offset`.
    pub fn entry_at(&self, index: usize, offset: usize) -> Result<RawEntry<'a>> {
        let (key, mut reader) = self.key_at(offset)?;
        let value = self.value_from(&mut reader)?;
        Ok(RawEntry {
            index,
            offset,
            key,
            value,
        })
    }

    /// Walks `count` entries from the start of the block in one forward pass.
    pub fn entries(&self, count: usize) -> RawEntries<'a> {
        RawEntries {
            block: *self,
            reader: Reader::new(self.data, self.endian),
            index: 0,
            count,
        }
    }
}

/// Forward iterator over [`RawEntry`] values.
#[derive(Debug)]
pub struct RawEntries<'a> {
    block: KvBlock<'a>,
    reader: Reader<'a>,
    index: usize,
    count: usize,
}

impl<'a> RawEntries<'a> {
    fn decode_next(&mut self) -> Result<RawEntry<'a>> {
        let offset = self.reader.pos();
        let key_len = self.block.key_code.read_length(&mut self.reader)?;
        let key = self.reader.take(key_len)?;
        let value = self.block.value_from(&mut self.reader)?;
        Ok(RawEntry {
            index: self.index,
            offset,
            key,
            value,
        })
    }
}

impl<'a> Iterator for RawEntries<'a> {
    type Item = Result<RawEntry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }
        match self.decode_next() {
            Ok(entry) => {
                self.index += 1;
                Some(Ok(entry))
            }
            Err(err) => {
                self.count = self.index;
                Some(Err(err))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.count - self.index;
        (0, Some(left))
    }
}
