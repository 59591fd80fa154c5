//! Leaf value types: size bounds, generation rules and format predicates.
//!
//! Integers go through `byteorder` with configurable endianness; raw, ASCII and
//! bit-array leaves are handled directly on [`Bits`].

use crate::value::Bits;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use rand::Rng;
use std::fmt;

/// Upper length used when a variable-length type is declared without bounds.
pub const DEFAULT_MAX_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

/// Fixed-width integer with an optional inclusive interval constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerType {
    /// Width in bits: 8, 16, 32 or 64.
    pub width: usize,
    pub signed: bool,
    pub endianness: Endianness,
    pub interval: Option<(i128, i128)>,
}

/// Integer widths the codec can encode.
pub const INTEGER_WIDTHS: [usize; 4] = [8, 16, 32, 64];

impl IntegerType {
    pub fn has_supported_width(&self) -> bool {
        INTEGER_WIDTHS.contains(&self.width)
    }

    /// Empty (`lo > hi`) for unsupported widths.
    fn type_range(&self) -> (i128, i128) {
        if !self.has_supported_width() {
            return (0, -1);
        }
        if self.signed {
            let half = 1i128 << (self.width - 1);
            (-half, half - 1)
        } else {
            (0, (1i128 << self.width) - 1)
        }
    }

    /// Inclusive range of admissible values: the interval clipped to the type range.
    pub fn bounds(&self) -> (i128, i128) {
        let (lo, hi) = self.type_range();
        match self.interval {
            Some((a, b)) => (a.max(lo), b.min(hi)),
            None => (lo, hi),
        }
    }

    pub fn encode(&self, value: i128) -> Option<Bits> {
        let (lo, hi) = self.bounds();
        if value < lo || value > hi {
            return None;
        }
        let nbytes = self.width / 8;
        let mask = if self.width == 64 { u64::MAX } else { (1u64 << self.width) - 1 };
        let raw = (value as i64 as u64) & mask;
        let mut buf = [0u8; 8];
        match self.endianness {
            Endianness::Big => BigEndian::write_uint(&mut buf, raw, nbytes),
            Endianness::Little => LittleEndian::write_uint(&mut buf, raw, nbytes),
        }
        Some(Bits::from_bytes(&buf[..nbytes]))
    }

    pub fn decode(&self, bits: &Bits) -> Option<i128> {
        if bits.len() != self.width || !self.has_supported_width() {
            return None;
        }
        let bytes = bits.as_bytes()?;
        let nbytes = self.width / 8;
        let raw = match self.endianness {
            Endianness::Big => BigEndian::read_uint(bytes, nbytes),
            Endianness::Little => LittleEndian::read_uint(bytes, nbytes),
        };
        if self.signed {
            let shift = 64 - self.width as u32;
            Some((((raw << shift) as i64) >> shift) as i128)
        } else {
            Some(raw as i128)
        }
    }
}

/// Type descriptor of a Data leaf or of a relation's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    /// Arbitrary bytes, optionally restricted to an alphabet.
    Raw {
        min_bytes: usize,
        max_bytes: usize,
        alphabet: Option<Vec<u8>>,
    },
    /// Printable ASCII (or an explicit charset).
    Ascii {
        min_chars: usize,
        max_chars: usize,
        charset: Option<Vec<u8>>,
    },
    Integer(IntegerType),
    /// Bit-granular field; the only type parsed with a 1-bit step.
    BitArray { min_bits: usize, max_bits: usize },
}

fn is_printable(b: u8) -> bool {
    (0x20..=0x7e).contains(&b) || b == b'\t' || b == b'\n' || b == b'\r'
}

impl DataType {
    pub fn raw(min_bytes: usize, max_bytes: usize) -> Self {
        DataType::Raw {
            min_bytes,
            max_bytes,
            alphabet: None,
        }
    }

    pub fn raw_fixed(n: usize) -> Self {
        DataType::raw(n, n)
    }

    pub fn ascii(min_chars: usize, max_chars: usize) -> Self {
        DataType::Ascii {
            min_chars,
            max_chars,
            charset: None,
        }
    }

    pub fn bits(min_bits: usize, max_bits: usize) -> Self {
        DataType::BitArray { min_bits, max_bits }
    }

    pub fn integer(width: usize, signed: bool, endianness: Endianness) -> Self {
        DataType::Integer(IntegerType {
            width,
            signed,
            endianness,
            interval: None,
        })
    }

    pub fn uint8() -> Self {
        DataType::integer(8, false, Endianness::Big)
    }

    pub fn uint16(endianness: Endianness) -> Self {
        DataType::integer(16, false, endianness)
    }

    pub fn uint32(endianness: Endianness) -> Self {
        DataType::integer(32, false, endianness)
    }

    /// Restrict an integer type to `lo..=hi`; no effect on other types.
    pub fn with_interval(self, lo: i128, hi: i128) -> Self {
        match self {
            DataType::Integer(mut t) => {
                t.interval = Some((lo, hi));
                DataType::Integer(t)
            }
            other => other,
        }
    }

    /// Restrict raw bytes to `alphabet` or ASCII characters to `charset`.
    pub fn with_alphabet(self, set: &[u8]) -> Self {
        match self {
            DataType::Raw {
                min_bytes, max_bytes, ..
            } => DataType::Raw {
                min_bytes,
                max_bytes,
                alphabet: Some(set.to_vec()),
            },
            DataType::Ascii {
                min_chars, max_chars, ..
            } => DataType::Ascii {
                min_chars,
                max_chars,
                charset: Some(set.to_vec()),
            },
            other => other,
        }
    }

    /// Reject descriptors whose language is empty or that the codec cannot encode.
    pub fn validate(&self) -> Result<(), String> {
        let (lo, hi) = self.bit_bounds();
        if lo > hi {
            return Err("minimum length above maximum".into());
        }
        match self {
            DataType::Integer(t) if !t.has_supported_width() => {
                Err(format!("unsupported integer width {}", t.width))
            }
            DataType::Integer(t) => {
                let (a, b) = t.bounds();
                if a > b {
                    return Err(format!("no {} value lies in its interval", self));
                }
                Ok(())
            }
            DataType::Raw {
                min_bytes: n,
                alphabet: Some(set),
                ..
            }
            | DataType::Ascii {
                min_chars: n,
                charset: Some(set),
                ..
            } if set.is_empty() && *n > 0 => Err("empty character set".into()),
            _ => Ok(()),
        }
    }

    /// Minimal and maximal length in bits.
    pub fn bit_bounds(&self) -> (usize, usize) {
        match self {
            DataType::Raw {
                min_bytes, max_bytes, ..
            } => (min_bytes * 8, max_bytes * 8),
            DataType::Ascii {
                min_chars, max_chars, ..
            } => (min_chars * 8, max_chars * 8),
            DataType::Integer(t) => (t.width, t.width),
            DataType::BitArray { min_bits, max_bits } => (*min_bits, *max_bits),
        }
    }

    /// Length granularity when probing candidate sizes.
    pub fn unit_bits(&self) -> usize {
        match self {
            DataType::BitArray { .. } => 1,
            _ => 8,
        }
    }

    pub fn is_fixed_size(&self) -> bool {
        let (lo, hi) = self.bit_bounds();
        lo == hi
    }

    /// Format predicate: does `bits` belong to this type's language?
    pub fn accepts(&self, bits: &Bits) -> bool {
        let (lo, hi) = self.bit_bounds();
        if bits.len() < lo || bits.len() > hi || bits.len() % self.unit_bits() != 0 {
            return false;
        }
        match self {
            DataType::Raw { alphabet, .. } => match (alphabet, bits.as_bytes()) {
                (Some(set), Some(bytes)) => bytes.iter().all(|b| set.contains(b)),
                (None, Some(_)) => true,
                (_, None) => false,
            },
            DataType::Ascii { charset, .. } => match bits.as_bytes() {
                Some(bytes) => match charset {
                    Some(set) => bytes.iter().all(|b| set.contains(b)),
                    None => bytes.iter().all(|b| is_printable(*b)),
                },
                None => false,
            },
            DataType::Integer(t) => t.decode(bits).is_some_and(|v| {
                let (lo, hi) = t.bounds();
                v >= lo && v <= hi
            }),
            DataType::BitArray { .. } => true,
        }
    }

    /// Draw a uniformly random member of the type's language, or `None` when
    /// the language is empty (see [`DataType::validate`]).
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Bits> {
        let (lo, hi) = self.bit_bounds();
        if lo > hi {
            return None;
        }
        match self {
            DataType::Raw {
                min_bytes,
                max_bytes,
                alphabet: Some(set),
            }
            | DataType::Ascii {
                min_chars: min_bytes,
                max_chars: max_bytes,
                charset: Some(set),
            } => {
                if set.is_empty() {
                    return (*min_bytes == 0).then(Bits::new);
                }
                let n = rng.gen_range(*min_bytes..=*max_bytes);
                let bytes: Vec<u8> = (0..n).map(|_| set[rng.gen_range(0..set.len())]).collect();
                Some(Bits::from(bytes))
            }
            DataType::Raw {
                min_bytes, max_bytes, ..
            } => {
                let n = rng.gen_range(*min_bytes..=*max_bytes);
                let bytes: Vec<u8> = (0..n).map(|_| rng.gen()).collect();
                Some(Bits::from(bytes))
            }
            DataType::Ascii {
                min_chars, max_chars, ..
            } => {
                let n = rng.gen_range(*min_chars..=*max_chars);
                let bytes: Vec<u8> = (0..n).map(|_| rng.gen_range(0x20u8..=0x7e)).collect();
                Some(Bits::from(bytes))
            }
            DataType::Integer(t) => {
                let (lo, hi) = t.bounds();
                if lo > hi {
                    return None;
                }
                t.encode(rng.gen_range(lo..=hi))
            }
            DataType::BitArray { min_bits, max_bits } => {
                let n = rng.gen_range(*min_bits..=*max_bits);
                let bools: Vec<bool> = (0..n).map(|_| rng.gen()).collect();
                Some(Bits::from_bools(&bools))
            }
        }
    }

    /// Encode a non-negative integer into this fixed-size type (relation outputs).
    /// `None` when the type is variable-length or the value does not fit.
    pub fn encode_unsigned(&self, value: u64) -> Option<Bits> {
        if !self.is_fixed_size() {
            return None;
        }
        let encoded = match self {
            DataType::Integer(t) => t.encode(value as i128)?,
            _ => {
                let width = self.bit_bounds().0;
                if width < 64 && value >> width != 0 {
                    return None;
                }
                Bits::from_u64(value, width)
            }
        };
        self.accepts(&encoded).then_some(encoded)
    }

    /// Inverse of [`DataType::encode_unsigned`].
    pub fn decode_unsigned(&self, bits: &Bits) -> Option<u64> {
        match self {
            DataType::Integer(t) => t.decode(bits).and_then(|v| u64::try_from(v).ok()),
            _ => bits.to_u64(),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Raw {
                min_bytes, max_bytes, ..
            } => write!(f, "raw({}..{})", min_bytes, max_bytes),
            DataType::Ascii {
                min_chars, max_chars, ..
            } => write!(f, "ascii({}..{})", min_chars, max_chars),
            DataType::Integer(t) => {
                let sign = if t.signed { "int" } else { "uint" };
                let end = match t.endianness {
                    Endianness::Big => "be",
                    Endianness::Little => "le",
                };
                write!(f, "{}{} {}", sign, t.width, end)?;
                if let Some((lo, hi)) = t.interval {
                    write!(f, " [{}..{}]", lo, hi)?;
                }
                Ok(())
            }
            DataType::BitArray { min_bits, max_bits } => write!(f, "bits({}..{})", min_bits, max_bits),
        }
    }
}
