//! Canonical byte codec for everything that is hashed, signed, or persisted.
//!
//! The format follows XDR conventions: big-endian fixed-width integers,
//! fixed-length opaques, and `u32` length-prefixed variable vectors. Every
//! wire type implements [`Xdr`]; the canonical bytes of a value are produced
//! by [`Xdr::to_xdr_bytes`] and are the only bytes ever fed to a hash or a
//! signature. `serde` derives on the same structs exist purely for
//! diagnostics and are never canonical.

use thiserror::Error;

/// Decoding failures for canonical bytes.
#[derive(Debug, Error)]
pub enum WireError {
    /// Input ended before the value was complete.
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),

    /// Input had bytes left over after the value was complete.
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    /// A union discriminant did not name a known arm.
    #[error("invalid discriminant {0}")]
    InvalidDiscriminant(u32),

    /// A length prefix exceeded the protocol bound for that vector.
    #[error("vector length {got} exceeds bound {bound}")]
    LengthOutOfBounds {
        /// Decoded length prefix.
        got: u32,
        /// Maximum permitted element count.
        bound: u32,
    },

    /// A field value violated a structural constraint.
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
}

/// A read cursor over canonical bytes.
pub struct XdrCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> XdrCursor<'a> {
    /// Wrap a byte slice for decoding.
    pub fn new(buf: &'a [u8]) -> Self {
        XdrCursor { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::UnexpectedEof(self.pos));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Read a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a big-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read a big-endian `i64`.
    pub fn read_i64(&mut self) -> Result<i64, WireError> {
        Ok(self.read_u64()? as i64)
    }

    /// Read a fixed-length opaque.
    pub fn read_bytes<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let b = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(b);
        Ok(out)
    }

    /// Read a `u32` length prefix, enforcing `bound`.
    pub fn read_len(&mut self, bound: u32) -> Result<usize, WireError> {
        let len = self.read_u32()?;
        if len > bound {
            return Err(WireError::LengthOutOfBounds { got: len, bound });
        }
        Ok(len as usize)
    }
}

/// Canonical serialization to and from XDR-style bytes.
pub trait Xdr: Sized {
    /// Append the canonical encoding of `self` to `out`.
    fn write_xdr(&self, out: &mut Vec<u8>);

    /// Decode one value from the cursor.
    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError>;

    /// The canonical bytes of `self`.
    fn to_xdr_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_xdr(&mut out);
        out
    }

    /// Decode a value that must consume the whole input.
    fn from_xdr_bytes(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = XdrCursor::new(buf);
        let v = Self::read_xdr(&mut cur)?;
        if cur.remaining() != 0 {
            return Err(WireError::TrailingBytes(cur.remaining()));
        }
        Ok(v)
    }
}

impl Xdr for u32 {
    fn write_xdr(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }

    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError> {
        cur.read_u32()
    }
}

impl Xdr for u64 {
    fn write_xdr(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }

    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError> {
        cur.read_u64()
    }
}

impl Xdr for i64 {
    fn write_xdr(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }

    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError> {
        cur.read_i64()
    }
}

impl<const N: usize> Xdr for [u8; N] {
    fn write_xdr(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }

    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError> {
        cur.read_bytes::<N>()
    }
}

/// Encode a variable vector with its `u32` length prefix.
pub fn write_vec<T: Xdr>(items: &[T], out: &mut Vec<u8>) {
    (items.len() as u32).write_xdr(out);
    for item in items {
        item.write_xdr(out);
    }
}

/// Decode a variable vector, enforcing an element-count bound.
pub fn read_vec<T: Xdr>(cur: &mut XdrCursor<'_>, bound: u32) -> Result<Vec<T>, WireError> {
    let len = cur.read_len(bound)?;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(T::read_xdr(cur)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u64_big_endian() {
        let bytes = 0x0102_0304_0506_0708u64.to_xdr_bytes();
        assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = 7u32.to_xdr_bytes();
        bytes.push(0);
        assert!(matches!(
            u32::from_xdr_bytes(&bytes),
            Err(WireError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_short_input_rejected() {
        assert!(matches!(
            u64::from_xdr_bytes(&[0u8; 7]),
            Err(WireError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn test_vec_bound_enforced() {
        let mut bytes = Vec::new();
        write_vec(&[1u32, 2, 3], &mut bytes);
        let mut cur = XdrCursor::new(&bytes);
        assert!(matches!(
            read_vec::<u32>(&mut cur, 2),
            Err(WireError::LengthOutOfBounds { got: 3, bound: 2 })
        ));
    }
}
