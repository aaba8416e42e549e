use crate::RomCode;
use core::fmt::Write;
use heapless::{String, Vec};

/// One enumerated device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceEntry {
    pub minor: u8,
    pub rom: RomCode,
}

impl DeviceEntry {
    /// Deterministic per-device node name, `device_DS18B20_<minor>`
    pub fn node_name(&self) -> String<20> {
        let mut name = String::new();
        // 15 bytes of prefix plus at most 3 digits always fit
        let written = write!(name, "device_DS18B20_{}", self.minor);
        debug_assert!(written.is_ok());
        name
    }
}

/// Devices found by the last ROM search, in enumeration order.
///
/// Minors are dense and start at 0. Holds at most `N` devices.
#[derive(Debug, Clone, Default)]
pub struct Registry<const N: usize> {
    entries: Vec<DeviceEntry, N>,
}

impl<const N: usize> Registry<N> {
    pub const fn new() -> Self {
        Registry {
            entries: Vec::new(),
        }
    }

    /// Appends `rom` under the next free minor and returns that minor.
    ///
    /// Hands `rom` back if the registry is full.
    pub fn push(&mut self, rom: RomCode) -> Result<u8, RomCode> {
        let minor = u8::try_from(self.entries.len()).map_err(|_| rom)?;
        self.entries
            .push(DeviceEntry { minor, rom })
            .map_err(|entry| entry.rom)?;
        Ok(minor)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, minor: u8) -> Option<&DeviceEntry> {
        self.entries.get(minor as usize)
    }

    /// ROM code bound to `minor`
    pub fn rom(&self, minor: u8) -> Option<RomCode> {
        self.get(minor).map(|entry| entry.rom)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceEntry> {
        self.entries.iter()
    }
}
