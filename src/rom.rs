use crate::crc::crc7_verify;
use core::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Family code burned into every DS18B20
pub const DS18B20_FAMILY: u8 = 0x28;

/// 64-bit device identifier, `[crc:8][serial:48][family:8]` from MSB to LSB.
///
/// Bit 0 is the first bit on the wire, so the family code occupies the low byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct RomCode(u64);

impl From<u64> for RomCode {
    fn from(raw: u64) -> Self {
        RomCode(raw)
    }
}

impl From<RomCode> for u64 {
    fn from(rom: RomCode) -> u64 {
        rom.0
    }
}

impl From<[u8; RomCode::BYTES as usize]> for RomCode {
    fn from(bytes: [u8; RomCode::BYTES as usize]) -> Self {
        RomCode::from_bytes(bytes)
    }
}

impl RomCode {
    /// The length of a ROM code in bytes
    pub const BYTES: u8 = 8;

    /// The length of a ROM code in bits
    pub const BITS: u8 = Self::BYTES * 8;

    pub const fn new(raw: u64) -> Self {
        RomCode(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }

    pub const fn from_bytes(bytes: [u8; Self::BYTES as usize]) -> Self {
        RomCode(u64::from_le_bytes(bytes))
    }

    /// Bytes in wire order: family first, CRC last
    pub fn to_bytes(&self) -> [u8; Self::BYTES as usize] {
        self.0.to_le_bytes()
    }

    pub fn family_code(&self) -> u8 {
        self.0 as u8
    }

    /// The 48-bit serial number
    pub fn serial(&self) -> u64 {
        (self.0 >> 8) & 0xffff_ffff_ffff
    }

    pub fn crc(&self) -> u8 {
        (self.0 >> 56) as u8
    }

    pub fn bit(&self, index: u8) -> bool {
        self.0 & (1 << index) != 0
    }

    pub(crate) fn set_bit(&mut self, index: u8, value: bool) {
        if value {
            self.0 |= 1 << index;
        } else {
            self.0 &= !(1 << index);
        }
    }

    /// Does the CRC byte match the first seven bytes?
    pub fn has_valid_crc(&self) -> bool {
        let bytes = self.to_bytes();
        crc7_verify(&bytes[..7], bytes[7])
    }
}

/// Error type
#[derive(Debug, PartialEq, Eq)]
pub enum RomCodeError {
    NotEnough,
    Invalid,
}

impl FromStr for RomCode {
    type Err = RomCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; Self::BYTES as usize];
        let mut digits = s.chars().filter(|c| !c.is_whitespace() && *c != ':');

        for byte in bytes.iter_mut() {
            match (digits.next(), digits.next()) {
                (Some(h), Some(l)) => match (h.to_digit(16), l.to_digit(16)) {
                    (Some(h), Some(l)) => *byte = ((h << 4) | l) as u8,
                    _ => return Err(RomCodeError::Invalid),
                },
                _ => return Err(RomCodeError::NotEnough),
            }
        }
        if digits.next().is_some() {
            return Err(RomCodeError::Invalid);
        }

        Ok(RomCode::from(bytes))
    }
}

impl Display for RomCode {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let b = self.to_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        )
    }
}
