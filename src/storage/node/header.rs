//! Fixed node preamble: format tag, version/endianness byte and option flags.

use core::ops::Range;

use crate::primitives::bytes::buf::Endian;
use crate::types::{NodeError, Result};

/// Content tag identifying a key-value node.
pub const FORMAT_TAG: [u8; 3] = [0xab, 0xf4, 0x70];
/// Highest minimum-reader version this implementation understands.
pub const FORMAT_VERSION: u8 = 0;

/// Byte ranges of the fixed preamble.
pub mod preamble {
    use core::ops::Range;

    /// Format tag.
    pub const TAG: Range<usize> = 0..3;
    /// Version and endianness.
    pub const VERSION: usize = 3;
    /// Option flags.
    pub const OPTIONS: usize = 4;
    /// First byte of the entry-count varint.
    pub const COUNT: usize = 5;
}

const VERSION_MASK: u8 = 0x7f;
const BIG_ENDIAN: u8 = 0x80;

const OPT_CUSTOM: u8 = 0b0000_0001;
const OPT_SORTED: u8 = 0b0000_0010;
const OPT_COMPRESSED: u8 = 0b0000_0100;
const OPT_INDEXED: u8 = 0b0000_1000;
const OPT_RESERVED: u8 = 0b1111_0000;

/// Sorted flag as it appears in the options byte.
pub const SORTED_BIT: u8 = OPT_SORTED;

/// Location of a varint field that may be rewritten in place.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VarField {
    /// Absolute position of the first byte.
    pub pos: usize,
    /// Encoded width in bytes.
    pub width: usize,
}

impl VarField {
    /// Byte range covered by the field.
    pub fn range(&self) -> Range<usize> {
        self.pos..self.pos + self.width
    }
}

/// Decoded options byte.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NodeFlags {
    /// Custom data follows the entry count.
    pub custom_data: bool,
    /// Stored keys are in non-decreasing order.
    pub sorted: bool,
    /// A key prefix/postfix pair is present.
    pub compressed: bool,
    /// An offset index precedes the key-value block.
    pub indexed: bool,
}

impl NodeFlags {
    /// Parses the options byte, rejecting reserved bits.
    pub fn from_byte(byte: u8) -> Result<Self> {
        if byte & OPT_RESERVED != 0 {
            return Err(NodeError::Format("reserved option bits set"));
        }
        Ok(Self {
            custom_data: byte & OPT_CUSTOM != 0,
            sorted: byte & OPT_SORTED != 0,
            compressed: byte & OPT_COMPRESSED != 0,
            indexed: byte & OPT_INDEXED != 0,
        })
    }

    /// Encodes the options byte.
    pub fn to_byte(self) -> u8 {
        let mut byte = 0;
        if self.custom_data {
            byte |= OPT_CUSTOM;
        }
        if self.sorted {
            byte |= OPT_SORTED;
        }
        if self.compressed {
            byte |= OPT_COMPRESSED;
        }
        if self.indexed {
            byte |= OPT_INDEXED;
        }
        byte
    }
}

/// Encodes the version/endianness byte.
pub fn version_byte(endian: Endian) -> u8 {
    let mut byte = FORMAT_VERSION & VERSION_MASK;
    if endian.is_big() {
        byte |= BIG_ENDIAN;
    }
    byte
}

/// Validates the tag and version byte, returning the declared version and byte order.
pub fn check_preamble(buf: &[u8]) -> Result<(u8, Endian)> {
    if buf.len() < preamble::COUNT {
        return Err(NodeError::Format("node shorter than preamble"));
    }
    if buf[preamble::TAG] != FORMAT_TAG {
        return Err(NodeError::Format("invalid node format tag"));
    }
    let byte = buf[preamble::VERSION];
    let version = byte & VERSION_MASK;
    if version > FORMAT_VERSION {
        return Err(NodeError::Format("unsupported node version"));
    }
    let endian = if byte & BIG_ENDIAN != 0 {
        Endian::Big
    } else {
        Endian::Little
    };
    Ok((version, endian))
}
