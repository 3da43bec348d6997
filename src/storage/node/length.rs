//! Length Codes: how key and value lengths are encoded inside a key-value block.

use crate::primitives::bytes::buf::{Endian, IntWidth, Reader, Writer};
use crate::primitives::bytes::var;
use crate::types::{NodeError, Result};

/// Wire code for the variable-length encoding.
pub const CODE_VAR: u8 = 4;
/// Wire code for a single constant length shared by every entry.
pub const CODE_CONST: u8 = 7;
/// Mask selecting one 3-bit length code.
pub const CODE_MASK: u8 = 0b111;

/// How the length of one field class (keys or values) is encoded.
///
/// Resolved once per node; per-entry decoding dispatches on this tag only.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LengthCode {
    /// Fixed-width unsigned integer prefix (codes 0-3).
    Fixed(IntWidth),
    /// Unsigned varint prefix (code 4).
    Var,
    /// No prefix; every entry has this length (code 7).
    Const(u64),
}

impl LengthCode {
    /// Narrowest fixed width covering the largest of `lengths`.
    pub fn select_for_build<I>(lengths: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        let max = lengths.into_iter().max().unwrap_or(0);
        LengthCode::Fixed(IntWidth::for_max(max))
    }

    /// Smallest encoding among constant, varint and fixed widths.
    ///
    /// Varints are never chosen for big-endian nodes.
    pub fn select_compact(lengths: &[u64], endian: Endian) -> Self {
        let Some(&first) = lengths.first() else {
            return LengthCode::Fixed(IntWidth::U8);
        };
        if lengths.iter().all(|&len| len == first) {
            return LengthCode::Const(first);
        }
        let fixed = Self::select_for_build(lengths.iter().copied());
        if endian.is_big() {
            return fixed;
        }
        let fixed_total = lengths.len().saturating_mul(fixed.prefix_len(0));
        let var_total: usize = lengths.iter().map(|&len| var::encoded_len(len)).sum();
        if var_total < fixed_total {
            LengthCode::Var
        } else {
            fixed
        }
    }

    /// Parses a 3-bit code, reading the inline constant for code 7.
    pub fn decode_header(code: u8, reader: &mut Reader<'_>) -> Result<Self> {
        match code & CODE_MASK {
            c @ 0..=3 => Ok(LengthCode::Fixed(IntWidth::from_code(c))),
            CODE_VAR => {
                if reader.endian().is_big() {
                    return Err(NodeError::Unsupported(
                        "variable-length lengths in a big-endian node",
                    ));
                }
                Ok(LengthCode::Var)
            }
            CODE_CONST => Ok(LengthCode::Const(reader.read_var_u64()?)),
            _ => Err(NodeError::Unsupported("reserved length code")),
        }
    }

    /// Wire code of this variant.
    pub const fn code(self) -> u8 {
        match self {
            LengthCode::Fixed(width) => width.code(),
            LengthCode::Var => CODE_VAR,
            LengthCode::Const(_) => CODE_CONST,
        }
    }

    /// Writes the inline constant that follows the descriptor, if any.
    pub fn write_header(self, writer: &mut Writer) {
        if let LengthCode::Const(len) = self {
            writer.put_var_u64(len);
        }
    }

    /// Decodes one length, consuming nothing for the constant variant.
    #[inline]
    pub fn read_length(self, reader: &mut Reader<'_>) -> Result<usize> {
        let raw = match self {
            LengthCode::Fixed(width) => reader.read_uint(width)?,
            LengthCode::Var => reader.read_var_u64()?,
            LengthCode::Const(len) => len,
        };
        usize::try_from(raw).map_err(|_| NodeError::Format("field length exceeds usize"))
    }

    /// Encodes one length prefix. The constant variant writes nothing and trusts the caller.
    pub fn write_length(self, writer: &mut Writer, len: u64) -> Result<()> {
        match self {
            LengthCode::Fixed(width) => writer.put_uint(width, len),
            LengthCode::Var => {
                writer.put_var_u64(len);
                Ok(())
            }
            LengthCode::Const(_) => Ok(()),
        }
    }

    /// Returns true when a field of `len` bytes can be encoded without changing the code.
    pub fn fits(self, len: u64) -> bool {
        match self {
            LengthCode::Fixed(width) => len <= width.max_value(),
            LengthCode::Var => true,
            LengthCode::Const(expected) => len == expected,
        }
    }

    /// Fewest bytes one field can occupy, prefix and payload together.
    pub fn min_field_len(self) -> u64 {
        match self {
            LengthCode::Fixed(width) => width.bytes() as u64,
            LengthCode::Var => 1,
            LengthCode::Const(len) => len,
        }
    }

    /// Bytes occupied by the prefix for a field of `len` bytes.
    pub fn prefix_len(self, len: u64) -> usize {
        match self {
            LengthCode::Fixed(width) => width.bytes(),
            LengthCode::Var => var::encoded_len(len),
            LengthCode::Const(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(code: u8, tail: &[u8], endian: Endian) -> Result<LengthCode> {
        let mut reader = Reader::new(tail, endian);
        LengthCode::decode_header(code, &mut reader)
    }

    #[test]
    fn build_selection_uses_narrowest_fixed_width() {
        assert_eq!(
            LengthCode::select_for_build([1, 2, 255]),
            LengthCode::Fixed(IntWidth::U8)
        );
        assert_eq!(
            LengthCode::select_for_build([256]),
            LengthCode::Fixed(IntWidth::U16)
        );
        assert_eq!(
            LengthCode::select_for_build(std::iter::empty()),
            LengthCode::Fixed(IntWidth::U8)
        );
        assert_eq!(
            LengthCode::select_for_build([0x1_0000_0000]),
            LengthCode::Fixed(IntWidth::U64)
        );
    }

    #[test]
    fn compact_selection_prefers_const_then_var() {
        assert_eq!(
            LengthCode::select_compact(&[8, 8, 8], Endian::Little),
            LengthCode::Const(8)
        );
        // 100 one-byte varints beat 100 two-byte fixed prefixes.
        let mut lens = vec![3u64; 99];
        lens.push(300);
        assert_eq!(
            LengthCode::select_compact(&lens, Endian::Little),
            LengthCode::Var
        );
        assert_eq!(
            LengthCode::select_compact(&lens, Endian::Big),
            LengthCode::Fixed(IntWidth::U16)
        );
        assert_eq!(
            LengthCode::select_compact(&[1, 2], Endian::Little),
            LengthCode::Fixed(IntWidth::U8)
        );
    }

    #[test]
    fn header_codes_decode() -> Result<()> {
        assert_eq!(
            decode(2, &[], Endian::Little)?,
            LengthCode::Fixed(IntWidth::U32)
        );
        assert_eq!(decode(4, &[], Endian::Little)?, LengthCode::Var);
        assert_eq!(decode(7, &[0x81, 0x01], Endian::Little)?, LengthCode::Const(129));
        Ok(())
    }

    #[test]
    fn reserved_codes_are_unsupported_not_malformed() {
        for code in [5u8, 6] {
            let err = decode(code, &[], Endian::Little).unwrap_err();
            assert!(matches!(err, NodeError::Unsupported(_)), "code {code}");
        }
        let err = decode(CODE_VAR, &[], Endian::Big).unwrap_err();
        assert!(matches!(err, NodeError::Unsupported(_)));
        let err = decode(CODE_CONST, &[], Endian::Little).unwrap_err();
        assert!(matches!(err, NodeError::Format(_)));
    }

    #[test]
    fn const_lengths_consume_nothing() -> Result<()> {
        let code = LengthCode::Const(3);
        let mut writer = Writer::new(Endian::Little);
        code.write_length(&mut writer, 3)?;
        assert_eq!(writer.pos(), 0);
        let mut reader = Reader::new(&[], Endian::Little);
        assert_eq!(code.read_length(&mut reader)?, 3);
        assert!(code.fits(3));
        assert!(!code.fits(4));
        Ok(())
    }

    #[test]
    fn fixed_and_var_lengths_roundtrip() -> Result<()> {
        for code in [
            LengthCode::Fixed(IntWidth::U8),
            LengthCode::Fixed(IntWidth::U16),
            LengthCode::Var,
        ] {
            let mut writer = Writer::new(Endian::Little);
            code.write_length(&mut writer, 200)?;
            assert_eq!(writer.pos(), code.prefix_len(200));
            let bytes = writer.into_inner();
            let mut reader = Reader::new(&bytes, Endian::Little);
            assert_eq!(code.read_length(&mut reader)?, 200);
        }
        Ok(())
    }
}
