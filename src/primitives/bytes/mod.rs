#![forbid(unsafe_code)]
//! Varint codec and endian-aware byte cursors shared by the node format.

pub mod var {
    //! Unsigned LEB128 varints (7 payload bits per byte, continuation in the high bit).

    use crate::types::{NodeError, Result};

    /// Longest encoding of a `u64`.
    pub const MAX_LEN: usize = 10;

    /// Encodes a u64 as a minimal unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Encodes `v` into exactly `dst.len()` bytes using a non-minimal form.
    ///
    /// Returns `false` (leaving `dst` untouched) when `v` does not fit.
    pub fn encode_u64_padded(v: u64, dst: &mut [u8]) -> bool {
        let width = dst.len();
        if width == 0 || width > MAX_LEN || encoded_len(v) > width {
            return false;
        }
        let mut rest = v;
        for (i, slot) in dst.iter_mut().enumerate() {
            let mut byte = (rest & 0x7f) as u8;
            rest >>= 7;
            if i + 1 < width {
                byte |= 0x80;
            }
            *slot = byte;
        }
        true
    }

    /// Number of bytes the minimal encoding of `v` occupies.
    pub fn encoded_len(mut v: u64) -> usize {
        let mut len = 1;
        while v >= 0x80 {
            v >>= 7;
            len += 1;
        }
        len
    }

    /// Decodes a varint from `src` at `*off`, advancing the offset.
    ///
    /// Non-minimal encodings are accepted; anything longer than ten bytes or
    /// overflowing 64 bits is rejected.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..MAX_LEN {
            let byte = *src
                .get(*off)
                .ok_or(NodeError::Format("varint truncated"))?;
            *off += 1;
            let payload = u64::from(byte & 0x7f);
            if i == MAX_LEN - 1 && payload > 1 {
                return Err(NodeError::Format("varint overflows 64 bits"));
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(NodeError::Format("varint longer than 10 bytes"))
    }
}

pub mod buf {
    //! Slice-backed reader and vector-backed writer with a selectable byte order.

    use core::fmt;

    use serde::{Deserialize, Serialize};

    use super::var;
    use crate::types::{NodeError, Result};

    /// Alignment used for padded sections.
    pub const ALIGN: usize = 8;

    /// Byte order applied to every fixed-width integer of a node.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Endian {
        /// Least significant byte first.
        Little,
        /// Most significant byte first.
        Big,
    }

    impl Endian {
        /// Byte order of the host.
        pub const fn native() -> Self {
            if cfg!(target_endian = "big") {
                Endian::Big
            } else {
                Endian::Little
            }
        }

        /// Returns true for big-endian.
        pub const fn is_big(self) -> bool {
            matches!(self, Endian::Big)
        }
    }

    impl Default for Endian {
        fn default() -> Self {
            Endian::native()
        }
    }

    /// Width of a fixed-size unsigned integer field, selected by a 2-bit code.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
    pub enum IntWidth {
        /// One byte.
        U8 = 0,
        /// Two bytes.
        U16 = 1,
        /// Four bytes.
        U32 = 2,
        /// Eight bytes.
        U64 = 3,
    }

    impl IntWidth {
        /// Decodes the low two bits of `code`.
        pub const fn from_code(code: u8) -> Self {
            match code & 0b11 {
                0 => IntWidth::U8,
                1 => IntWidth::U16,
                2 => IntWidth::U32,
                _ => IntWidth::U64,
            }
        }

        /// Wire code of this width.
        pub const fn code(self) -> u8 {
            self as u8
        }

        /// Number of bytes occupied by one value.
        pub const fn bytes(self) -> usize {
            1 << (self as usize)
        }

        /// Largest value representable at this width.
        pub const fn max_value(self) -> u64 {
            match self {
                IntWidth::U8 => 0xff,
                IntWidth::U16 => 0xffff,
                IntWidth::U32 => 0xffff_ffff,
                IntWidth::U64 => u64::MAX,
            }
        }

        /// Narrowest width covering `max`.
        pub const fn for_max(max: u64) -> Self {
            if max <= 0xff {
                IntWidth::U8
            } else if max <= 0xffff {
                IntWidth::U16
            } else if max <= 0xffff_ffff {
                IntWidth::U32
            } else {
                IntWidth::U64
            }
        }
    }

    /// Reads a `width`-byte unsigned integer stored at `pos` in `src`.
    pub fn read_uint_at(src: &[u8], pos: usize, width: IntWidth, endian: Endian) -> Result<u64> {
        let end = pos
            .checked_add(width.bytes())
            .ok_or(NodeError::Format("integer offset overflow"))?;
        let bytes = src
            .get(pos..end)
            .ok_or(NodeError::Format("integer read past end of buffer"))?;
        let mut raw = [0u8; 8];
        let value = match endian {
            Endian::Little => {
                raw[..bytes.len()].copy_from_slice(bytes);
                u64::from_le_bytes(raw)
            }
            Endian::Big => {
                raw[8 - bytes.len()..].copy_from_slice(bytes);
                u64::from_be_bytes(raw)
            }
        };
        Ok(value)
    }

    /// Sequential reader over a borrowed buffer.
    #[derive(Clone, Copy)]
    pub struct Reader<'a> {
        buf: &'a [u8],
        pos: usize,
        endian: Endian,
    }

    impl<'a> Reader<'a> {
        /// Creates a reader positioned at offset 0.
        pub fn new(buf: &'a [u8], endian: Endian) -> Self {
            Self {
                buf,
                pos: 0,
                endian,
            }
        }

        /// Current offset from the start of the buffer.
        pub fn pos(&self) -> usize {
            self.pos
        }

        /// Number of unread bytes.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.pos)
        }

        /// Byte order used for fixed-width reads.
        pub fn endian(&self) -> Endian {
            self.endian
        }

        /// Moves the cursor to an absolute offset (the end of the buffer is allowed).
        pub fn goto(&mut self, offset: usize) -> Result<()> {
            if offset > self.buf.len() {
                return Err(NodeError::Format("seek past end of buffer"));
            }
            self.pos = offset;
            Ok(())
        }

        /// Reads one byte.
        pub fn read_u8(&mut self) -> Result<u8> {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or(NodeError::Format("read past end of buffer"))?;
            self.pos += 1;
            Ok(byte)
        }

        /// Reads a two-byte integer.
        pub fn read_u16(&mut self) -> Result<u16> {
            self.read_uint(IntWidth::U16).map(|v| v as u16)
        }

        /// Reads a four-byte integer.
        pub fn read_u32(&mut self) -> Result<u32> {
            self.read_uint(IntWidth::U32).map(|v| v as u32)
        }

        /// Reads an eight-byte integer.
        pub fn read_u64(&mut self) -> Result<u64> {
            self.read_uint(IntWidth::U64)
        }

        /// Reads an integer of the given width.
        pub fn read_uint(&mut self, width: IntWidth) -> Result<u64> {
            let value = read_uint_at(self.buf, self.pos, width, self.endian)?;
            self.pos += width.bytes();
            Ok(value)
        }

        /// Reads an unsigned varint.
        pub fn read_var_u64(&mut self) -> Result<u64> {
            var::decode_u64(self.buf, &mut self.pos)
        }

        /// Reads a varint that must fit in `usize`.
        pub fn read_var_usize(&mut self) -> Result<usize> {
            let raw = self.read_var_u64()?;
            usize::try_from(raw).map_err(|_| NodeError::Format("length exceeds usize"))
        }

        /// Takes the next `n` bytes without copying.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .pos
                .checked_add(n)
                .ok_or(NodeError::Format("length overflow"))?;
            let slice = self
                .buf
                .get(self.pos..end)
                .ok_or(NodeError::Format("slice read past end of buffer"))?;
            self.pos = end;
            Ok(slice)
        }

        /// Reads a varint length followed by that many bytes.
        pub fn take_prefixed(&mut self) -> Result<&'a [u8]> {
            let len = self.read_var_usize()?;
            self.take(len)
        }

        /// Advances to the next multiple of [`ALIGN`], requiring zero padding bytes.
        pub fn skip_padding8(&mut self) -> Result<()> {
            while self.pos % ALIGN != 0 {
                if self.read_u8()? != 0 {
                    return Err(NodeError::Format("non-zero alignment padding"));
                }
            }
            Ok(())
        }
    }

    impl fmt::Debug for Reader<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Reader")
                .field("pos", &self.pos)
                .field("remaining", &self.remaining())
                .field("endian", &self.endian)
                .finish()
        }
    }

    /// Growable writer mirroring [`Reader`].
    #[derive(Debug)]
    pub struct Writer {
        buf: Vec<u8>,
        endian: Endian,
    }

    impl Writer {
        /// Creates an empty writer.
        pub fn new(endian: Endian) -> Self {
            Self::with_capacity(0, endian)
        }

        /// Creates an empty writer with preallocated capacity.
        pub fn with_capacity(capacity: usize, endian: Endian) -> Self {
            Self {
                buf: Vec::with_capacity(capacity),
                endian,
            }
        }

        /// Like [`Writer::with_capacity`], but reports allocation failure instead of aborting.
        pub fn try_with_capacity(capacity: usize, endian: Endian) -> Result<Self> {
            let mut buf = Vec::new();
            buf.try_reserve_exact(capacity)
                .map_err(|_| NodeError::Invalid("node buffer allocation failed"))?;
            Ok(Self { buf, endian })
        }

        /// Number of bytes written so far.
        pub fn pos(&self) -> usize {
            self.buf.len()
        }

        /// Byte order used for fixed-width writes.
        pub fn endian(&self) -> Endian {
            self.endian
        }

        /// Appends one byte.
        pub fn put_u8(&mut self, v: u8) {
            self.buf.push(v);
        }

        /// Appends `v` using `width` bytes; `v` must fit.
        pub fn put_uint(&mut self, width: IntWidth, v: u64) -> Result<()> {
            if v > width.max_value() {
                return Err(NodeError::Invalid("value does not fit fixed width"));
            }
            let n = width.bytes();
            match self.endian {
                Endian::Little => self.buf.extend_from_slice(&v.to_le_bytes()[..n]),
                Endian::Big => self.buf.extend_from_slice(&v.to_be_bytes()[8 - n..]),
            }
            Ok(())
        }

        /// Appends a minimal varint.
        pub fn put_var_u64(&mut self, v: u64) {
            var::encode_u64(v, &mut self.buf);
        }

        /// Appends a varint occupying exactly `width` bytes.
        pub fn put_var_u64_padded(&mut self, v: u64, width: usize) -> Result<()> {
            let start = self.buf.len();
            self.buf.resize(start + width, 0);
            if !var::encode_u64_padded(v, &mut self.buf[start..]) {
                self.buf.truncate(start);
                return Err(NodeError::Invalid("varint does not fit padded width"));
            }
            Ok(())
        }

        /// Appends raw bytes.
        pub fn put_bytes(&mut self, bytes: &[u8]) {
            self.buf.extend_from_slice(bytes);
        }

        /// Appends a varint length followed by `bytes`.
        pub fn put_prefixed(&mut self, bytes: &[u8]) -> Result<()> {
            let len = u64::try_from(bytes.len())
                .map_err(|_| NodeError::Invalid("byte string length exceeds u64"))?;
            self.put_var_u64(len);
            self.put_bytes(bytes);
            Ok(())
        }

        /// Appends `n` zero bytes.
        pub fn put_zeros(&mut self, n: usize) {
            self.buf.resize(self.buf.len() + n, 0);
        }

        /// Emits zero bytes up to the next multiple of [`ALIGN`].
        pub fn pad8(&mut self) {
            let rem = self.buf.len() % ALIGN;
            if rem != 0 {
                self.put_zeros(ALIGN - rem);
            }
        }

        /// Consumes the writer, returning the bytes.
        pub fn into_inner(self) -> Vec<u8> {
            self.buf
        }
    }
}
