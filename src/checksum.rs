//! Checksum algorithms backing the Checksum and CRC relations.

/// RFC 1071 internet checksum over big-endian 16-bit words.
/// An odd trailing byte is padded with a zero low byte.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in data.chunks(2) {
        let word = match chunk {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [hi] => u16::from_be_bytes([*hi, 0]),
            _ => 0,
        };
        sum += u32::from(word);
        sum = (sum & 0xffff) + (sum >> 16);
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Parameters of a CRC in the usual Rocksoft model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcAlgorithm {
    pub name: &'static str,
    /// Register width in bits, 8..=64.
    pub width: u32,
    pub poly: u64,
    pub init: u64,
    pub reflect_in: bool,
    pub reflect_out: bool,
    pub xor_out: u64,
}

/// zlib / PNG / Ethernet CRC-32.
pub const CRC32_ISO_HDLC: CrcAlgorithm = CrcAlgorithm {
    name: "crc32",
    width: 32,
    poly: 0x04c1_1db7,
    init: 0xffff_ffff,
    reflect_in: true,
    reflect_out: true,
    xor_out: 0xffff_ffff,
};

pub const CRC16_ARC: CrcAlgorithm = CrcAlgorithm {
    name: "crc16",
    width: 16,
    poly: 0x8005,
    init: 0,
    reflect_in: true,
    reflect_out: true,
    xor_out: 0,
};

pub const CRC16_CCITT_FALSE: CrcAlgorithm = CrcAlgorithm {
    name: "crc16_ccitt",
    width: 16,
    poly: 0x1021,
    init: 0xffff,
    reflect_in: false,
    reflect_out: false,
    xor_out: 0,
};

impl CrcAlgorithm {
    pub fn by_name(name: &str) -> Option<CrcAlgorithm> {
        [CRC32_ISO_HDLC, CRC16_ARC, CRC16_CCITT_FALSE]
            .into_iter()
            .find(|a| a.name == name)
    }

    fn mask(&self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    pub fn checksum(&self, data: &[u8]) -> u64 {
        let mask = self.mask();
        let top = 1u64 << (self.width - 1);
        let mut crc = self.init & mask;
        for &byte in data {
            let b = if self.reflect_in { byte.reverse_bits() } else { byte };
            crc ^= u64::from(b) << (self.width - 8);
            for _ in 0..8 {
                crc = if crc & top != 0 {
                    ((crc << 1) ^ self.poly) & mask
                } else {
                    (crc << 1) & mask
                };
            }
        }
        if self.reflect_out {
            crc = crc.reverse_bits() >> (64 - self.width);
        }
        (crc ^ self.xor_out) & mask
    }
}
