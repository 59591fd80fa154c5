//! Bit buffers: the value representation shared by specialization and abstraction.
//!
//! Bits are stored MSB-first in a byte vector; trailing bits of the last byte
//! beyond `len` are always zero so equality and hashing work on the raw storage.

use std::fmt;

/// An owned, random-access sequence of bits.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Bits {
    bytes: Vec<u8>,
    len: usize,
}

impl Bits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Bits {
            bytes: bytes.to_vec(),
            len: bytes.len() * 8,
        }
    }

    /// `n` zero bits.
    pub fn zeros(n: usize) -> Self {
        Bits {
            bytes: vec![0; n.div_ceil(8)],
            len: n,
        }
    }

    /// The low `width` bits of `value`, most significant first.
    pub fn from_u64(value: u64, width: usize) -> Self {
        let mut out = Bits::zeros(width);
        for i in 0..width {
            let shift = width - 1 - i;
            if shift < 64 && (value >> shift) & 1 == 1 {
                out.set(i, true);
            }
        }
        out
    }

    pub fn from_bools(bits: &[bool]) -> Self {
        let mut out = Bits::zeros(bits.len());
        for (i, b) in bits.iter().enumerate() {
            if *b {
                out.set(i, true);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of bytes needed to hold the bits (last byte zero-padded).
    pub fn byte_len(&self) -> usize {
        self.len.div_ceil(8)
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.len % 8 == 0
    }

    pub fn bit(&self, index: usize) -> Option<bool> {
        if index >= self.len {
            return None;
        }
        Some(self.bytes[index / 8] & (0x80 >> (index % 8)) != 0)
    }

    fn set(&mut self, index: usize, on: bool) {
        let mask = 0x80 >> (index % 8);
        if on {
            self.bytes[index / 8] |= mask;
        } else {
            self.bytes[index / 8] &= !mask;
        }
    }

    pub fn push(&mut self, on: bool) {
        if self.len % 8 == 0 {
            self.bytes.push(0);
        }
        self.len += 1;
        self.set(self.len - 1, on);
    }

    pub fn extend(&mut self, other: &Bits) {
        if self.is_byte_aligned() {
            self.bytes.extend_from_slice(&other.bytes);
            self.len += other.len;
            return;
        }
        for i in 0..other.len {
            self.push(other.bytes[i / 8] & (0x80 >> (i % 8)) != 0);
        }
    }

    /// Concatenation of `parts`, in order.
    pub fn concat<'a, I>(parts: I) -> Bits
    where
        I: IntoIterator<Item = &'a Bits>,
    {
        let mut out = Bits::new();
        for part in parts {
            out.extend(part);
        }
        out
    }

    /// Bits `[start, end)`. Out-of-range bounds are clamped to the buffer.
    pub fn slice(&self, start: usize, end: usize) -> Bits {
        let end = end.min(self.len);
        let start = start.min(end);
        if start % 8 == 0 {
            let mut bytes = self.bytes[start / 8..(end.div_ceil(8))].to_vec();
            let len = end - start;
            if len % 8 != 0 {
                if let Some(last) = bytes.last_mut() {
                    *last &= 0xffu8 << (8 - len % 8);
                }
            }
            return Bits { bytes, len };
        }
        let mut out = Bits::zeros(end - start);
        for i in start..end {
            if self.bytes[i / 8] & (0x80 >> (i % 8)) != 0 {
                out.set(i - start, true);
            }
        }
        out
    }

    /// True when `needle` occurs at bit `offset` of `self`.
    pub fn matches_at(&self, offset: usize, needle: &Bits) -> bool {
        if offset + needle.len > self.len {
            return false;
        }
        if offset % 8 == 0 && needle.is_byte_aligned() {
            let start = offset / 8;
            return self.bytes[start..start + needle.bytes.len()] == needle.bytes[..];
        }
        self.slice(offset, offset + needle.len) == *needle
    }

    /// The bits packed into bytes; a partial last byte is zero-padded on the right.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        if self.is_byte_aligned() {
            Some(&self.bytes)
        } else {
            None
        }
    }

    /// Unsigned big-endian interpretation; `None` above 64 bits.
    pub fn to_u64(&self) -> Option<u64> {
        if self.len > 64 {
            return None;
        }
        let mut v = 0u64;
        for i in 0..self.len {
            v = (v << 1) | u64::from(self.bytes[i / 8] & (0x80 >> (i % 8)) != 0);
        }
        Some(v)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s.trim()).map(Bits::from)
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| self.bytes[i / 8] & (0x80 >> (i % 8)) != 0)
    }
}

impl From<&[u8]> for Bits {
    fn from(bytes: &[u8]) -> Self {
        Bits::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for Bits {
    fn from(bytes: Vec<u8>) -> Self {
        let len = bytes.len() * 8;
        Bits { bytes, len }
    }
}

impl<const N: usize> From<&[u8; N]> for Bits {
    fn from(bytes: &[u8; N]) -> Self {
        Bits::from_bytes(bytes)
    }
}

impl From<&str> for Bits {
    fn from(s: &str) -> Self {
        Bits::from_bytes(s.as_bytes())
    }
}

impl fmt::Debug for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_byte_aligned() {
            write!(f, "Bits(0x{})", self.to_hex())
        } else {
            let s: String = self.iter().map(|b| if b { '1' } else { '0' }).collect();
            write!(f, "Bits(0b{})", s)
        }
    }
}

impl fmt::Display for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_byte_aligned() {
            write!(f, "{}", self.to_hex())
        } else {
            let s: String = self.iter().map(|b| if b { '1' } else { '0' }).collect();
            write!(f, "0b{}", s)
        }
    }
}
