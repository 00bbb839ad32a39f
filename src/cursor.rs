//! Bounded byte reader over a decoded instruction stream or module section.
//!
//! The cursor exposes the two read primitives the binary format is built
//! from: fixed-width little-endian values and LEB128 variable-length
//! integers. Running off the end of the input is a recoverable
//! [`DecodeError::UnexpectedEof`]; it is the caller that decides whether that
//! is a hard error (module decoding) or impossible (validated code).

use core::fmt;
use wasmint_core::LittleEndianConvert;

/// An error raised while decoding bytes.
///
/// Decode errors can only surface while parsing; validated code never
/// produces them at execution time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The input ended in the middle of a value.
    UnexpectedEof,
    /// A LEB128 sequence used more groups than its bit width permits.
    InvalidInt,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEof => write!(f, "unexpected end of input"),
            DecodeError::InvalidInt => write!(f, "invalid LEB128 integer"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}

/// A cursor over a byte slice.
///
/// Reads advance the position; branches reposition it with [`set_pos`].
///
/// [`set_pos`]: struct.Cursor.html#method.set_pos
#[derive(Debug)]
pub struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Creates a cursor at the start of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    /// Returns the current byte position.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Repositions the cursor to `pos`.
    ///
    /// Positions beyond the end of the input are permitted and surface as
    /// [`DecodeError::UnexpectedEof`] on the next read.
    #[inline]
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Advances the cursor by `n` bytes without interpreting them.
    #[inline]
    pub fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    /// Returns `true` if every byte of the input has been consumed.
    #[inline]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Reads one byte.
    #[inline]
    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    /// Reads a fixed-width little-endian value.
    pub fn read<T>(&mut self) -> Result<T, DecodeError>
    where
        T: LittleEndianConvert,
    {
        let mut bytes = T::Bytes::default();
        let len = bytes.as_ref().len();
        let slice = self
            .bytes
            .get(self.pos..self.pos + len)
            .ok_or(DecodeError::UnexpectedEof)?;
        bytes.as_mut().copy_from_slice(slice);
        self.pos += len;
        Ok(T::from_le_bytes(bytes))
    }

    /// Reads a LEB128 unsigned 32-bit integer.
    pub fn read_var_u32(&mut self) -> Result<u32, DecodeError> {
        self.read_var_unsigned(32).map(|value| value as u32)
    }

    /// Reads a LEB128 unsigned 64-bit integer.
    pub fn read_var_u64(&mut self) -> Result<u64, DecodeError> {
        self.read_var_unsigned(64)
    }

    /// Reads a LEB128 signed 32-bit integer.
    pub fn read_var_i32(&mut self) -> Result<i32, DecodeError> {
        self.read_var_signed(32).map(|value| value as u32 as i32)
    }

    /// Reads a LEB128 signed 64-bit integer.
    pub fn read_var_i64(&mut self) -> Result<i64, DecodeError> {
        self.read_var_signed(64).map(|value| value as i64)
    }

    // Each byte contributes 7 low bits; the high bit is a continuation flag.
    // Overlong encodings are tolerated, and a terminating group whose payload
    // does not fit the remaining width contributes nothing. Only exhausting
    // the input or exceeding ceil(bits / 7) groups is an error.
    fn read_var_unsigned(&mut self, bits: u32) -> Result<u64, DecodeError> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            if shift >= bits {
                return Err(DecodeError::InvalidInt);
            }
            let byte = self.read_byte()?;
            let content = u64::from(byte & 0x7f);
            let remaining = bits - shift;
            if remaining >= 7 || content < (1u64 << remaining) {
                result |= content << shift;
            }
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    // Accumulates with wrapping shifts and sign-extends from the sign bit of
    // the terminating group; the caller truncates to the requested width.
    fn read_var_signed(&mut self, bits: u32) -> Result<u64, DecodeError> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            if shift >= bits {
                return Err(DecodeError::InvalidInt);
            }
            let byte = self.read_byte()?;
            result |= u64::from(byte & 0x7f).wrapping_shl(shift);
            if byte & 0x80 == 0 {
                let used = shift + 7;
                if used < bits && byte & 0x40 != 0 {
                    result |= u64::MAX << used;
                }
                return Ok(result);
            }
            shift += 7;
        }
    }
}
