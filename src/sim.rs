use crate::{crc::crc7, Bus, IoWire, RomCode, DS18B20_FAMILY};
use core::convert::Infallible;
use embedded_hal::delay::DelayNs;
use std::{cell::RefCell, rc::Rc, vec::Vec};

const RESET_NS: u64 = 480_000;
const WRITE_ZERO_NS: u64 = 30_000;
const WRITE_ONE_NS: u64 = 5_000;
const SLOT_NS: u64 = 60_000;
const PRESENCE_NS: u64 = 240_000;

pub fn rom_with_crc(bytes: [u8; 7]) -> RomCode {
    let mut full = [0u8; 8];
    full[..7].copy_from_slice(&bytes);
    full[7] = crc7(&bytes);
    RomCode::from(full)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    /// Deselected until the next reset
    Idle,
    RomCommand,
    Search { bit: u8, step: u8 },
    Match { bit: u8 },
    FunctionCommand,
    Converting,
    ReadScratchpad { bit: u8 },
    WriteScratchpad { bit: u8 },
}

#[derive(Debug, Clone)]
pub struct SimDevice {
    rom: RomCode,
    scratchpad: [u8; 9],
    outgoing: [u8; 9],
    conversion_slots: u32,
    busy_slots: u32,
    corrupt_reads: u32,
    frozen_config: bool,
    phase: Phase,
    incoming: u32,
    incoming_bits: u8,
    scratchpad_reads: usize,
    scratchpad_writes: usize,
    copies: usize,
}

impl SimDevice {
    /// A DS18B20 with the given 48-bit serial and a valid ROM CRC
    pub fn new(serial: u64) -> Self {
        let s = serial.to_le_bytes();
        Self::with_rom(rom_with_crc([
            DS18B20_FAMILY,
            s[0],
            s[1],
            s[2],
            s[3],
            s[4],
            s[5],
        ]))
    }

    /// A device answering with `rom` as is, CRC and family included
    pub fn with_rom(rom: RomCode) -> Self {
        let mut device = SimDevice {
            rom,
            // power-on state: +85 °C, TH 75, TL 70, 12 bit
            scratchpad: [0x50, 0x05, 0x4B, 0x46, 0x7F, 0xFF, 0x0C, 0x10, 0x00],
            outgoing: [0; 9],
            conversion_slots: 3,
            busy_slots: 0,
            corrupt_reads: 0,
            frozen_config: false,
            phase: Phase::Idle,
            incoming: 0,
            incoming_bits: 0,
            scratchpad_reads: 0,
            scratchpad_writes: 0,
            copies: 0,
        };
        device.update_crc();
        device
    }

    pub fn rom(&self) -> RomCode {
        self.rom
    }

    pub fn temperature(mut self, lsb: u8, msb: u8) -> Self {
        self.scratchpad[0] = lsb;
        self.scratchpad[1] = msb;
        self.update_crc();
        self
    }

    /// Raw configuration register
    pub fn config(mut self, config: u8) -> Self {
        self.scratchpad[4] = config;
        self.update_crc();
        self
    }

    /// Read slots the line stays low after Convert; `u32::MAX` never finishes
    pub fn conversion_slots(mut self, slots: u32) -> Self {
        self.conversion_slots = slots;
        self
    }

    /// Scratchpad reads sent with a broken CRC; `u32::MAX` breaks all of them
    pub fn corrupt_reads(mut self, reads: u32) -> Self {
        self.corrupt_reads = reads;
        self
    }

    /// Accepts scratchpad writes without storing them
    pub fn frozen_config(mut self) -> Self {
        self.frozen_config = true;
        self
    }

    fn update_crc(&mut self) {
        self.scratchpad[8] = crc7(&self.scratchpad[..8]);
    }

    fn on_reset(&mut self) {
        self.phase = Phase::RomCommand;
        self.incoming = 0;
        self.incoming_bits = 0;
    }

    /// Shifts in one bit; returns the byte once eight have arrived
    fn shift_in(&mut self, bit: bool) -> Option<u8> {
        self.incoming |= (bit as u32) << self.incoming_bits;
        self.incoming_bits += 1;
        if self.incoming_bits == 8 {
            let byte = self.incoming as u8;
            self.incoming = 0;
            self.incoming_bits = 0;
            Some(byte)
        } else {
            None
        }
    }

    fn on_write(&mut self, value: bool) {
        self.phase = match self.phase {
            Phase::RomCommand => match self.shift_in(value) {
                None => Phase::RomCommand,
                Some(0xF0) => Phase::Search { bit: 0, step: 0 },
                Some(0x55) => Phase::Match { bit: 0 },
                Some(_) => Phase::Idle,
            },
            Phase::Search { bit, step: 2 } => {
                if value != self.rom.bit(bit) || bit == RomCode::BITS - 1 {
                    Phase::Idle
                } else {
                    Phase::Search {
                        bit: bit + 1,
                        step: 0,
                    }
                }
            }
            Phase::Search { .. } => Phase::Idle,
            Phase::Match { bit } => {
                if value != self.rom.bit(bit) {
                    Phase::Idle
                } else if bit == RomCode::BITS - 1 {
                    Phase::FunctionCommand
                } else {
                    Phase::Match { bit: bit + 1 }
                }
            }
            Phase::FunctionCommand => match self.shift_in(value) {
                None => Phase::FunctionCommand,
                Some(0x44) => {
                    self.busy_slots = self.conversion_slots;
                    Phase::Converting
                }
                Some(0xBE) => {
                    self.scratchpad_reads += 1;
                    self.outgoing = self.scratchpad;
                    if self.corrupt_reads > 0 {
                        self.outgoing[8] ^= 0xFF;
                        if self.corrupt_reads != u32::MAX {
                            self.corrupt_reads -= 1;
                        }
                    }
                    Phase::ReadScratchpad { bit: 0 }
                }
                Some(0x4E) => Phase::WriteScratchpad { bit: 0 },
                Some(0x48) => {
                    self.copies += 1;
                    Phase::Idle
                }
                Some(_) => Phase::Idle,
            },
            Phase::WriteScratchpad { bit } => {
                self.incoming |= (value as u32) << bit;
                if bit < 23 {
                    Phase::WriteScratchpad { bit: bit + 1 }
                } else {
                    let [th, tl, config, _] = self.incoming.to_le_bytes();
                    self.incoming = 0;
                    self.scratchpad_writes += 1;
                    if !self.frozen_config {
                        self.scratchpad[2] = th;
                        self.scratchpad[3] = tl;
                        self.scratchpad[4] = (config & 0x60) | 0x1F;
                        self.update_crc();
                    }
                    Phase::Idle
                }
            }
            phase => phase,
        };
    }

    /// Level this device leaves on the line during a read slot
    fn on_read(&mut self) -> bool {
        match self.phase {
            Phase::Search { bit, step: 0 } => {
                self.phase = Phase::Search { bit, step: 1 };
                self.rom.bit(bit)
            }
            Phase::Search { bit, step: 1 } => {
                self.phase = Phase::Search { bit, step: 2 };
                !self.rom.bit(bit)
            }
            Phase::Converting if self.busy_slots > 0 => {
                if self.busy_slots != u32::MAX {
                    self.busy_slots -= 1;
                }
                false
            }
            Phase::ReadScratchpad { bit } => {
                let level = self.outgoing[bit as usize / 8] & (1 << (bit % 8)) != 0;
                self.phase = if bit == 71 {
                    Phase::Idle
                } else {
                    Phase::ReadScratchpad { bit: bit + 1 }
                };
                level
            }
            _ => true,
        }
    }
}

struct SimState {
    now_ns: u64,
    low_since: Option<u64>,
    /// Start and level of the current read slot
    slot: Option<(u64, bool)>,
    presence_until: u64,
    devices: Vec<SimDevice>,
    resets: usize,
    search_commands: usize,
    written: Vec<bool>,
    bits_since_reset: u32,
    first_byte: u8,
}

impl SimState {
    fn on_release(&mut self) {
        let Some(start) = self.low_since.take() else {
            return;
        };
        let low = self.now_ns - start;
        if low >= RESET_NS {
            self.resets += 1;
            self.bits_since_reset = 0;
            self.first_byte = 0;
            self.devices.iter_mut().for_each(SimDevice::on_reset);
            if !self.devices.is_empty() {
                self.presence_until = self.now_ns + PRESENCE_NS;
            }
        } else if low >= WRITE_ZERO_NS {
            self.on_write(false);
        } else if low >= WRITE_ONE_NS {
            self.on_write(true);
        } else {
            let mut level = true;
            for device in self.devices.iter_mut() {
                level &= device.on_read();
            }
            self.slot = Some((start, level));
        }
    }

    fn on_write(&mut self, bit: bool) {
        self.written.push(bit);
        self.devices.iter_mut().for_each(|d| d.on_write(bit));
        if self.bits_since_reset < 8 {
            self.first_byte |= (bit as u8) << self.bits_since_reset;
            self.bits_since_reset += 1;
            if self.bits_since_reset == 8 && self.first_byte == 0xF0 {
                self.search_commands += 1;
            }
        }
    }

    fn level(&self) -> bool {
        if self.low_since.is_some() {
            return false;
        }
        match self.slot {
            Some((start, level)) if self.now_ns - start < SLOT_NS => level,
            _ => self.now_ns >= self.presence_until,
        }
    }
}

/// Shared handle on a simulated bus: DS18B20 devices behind a wired-AND
/// line, driven by the same `IoWire`/`DelayNs` calls as real hardware.
///
/// Slots are decoded by how long the line was held low: 480µs or more is a
/// reset, 30µs or more writes a 0, 5µs or more writes a 1, anything shorter
/// is a read slot.
#[derive(Clone)]
pub struct SimBus {
    state: Rc<RefCell<SimState>>,
}

pub struct SimLine {
    state: Rc<RefCell<SimState>>,
}

pub struct SimDelay {
    state: Rc<RefCell<SimState>>,
}

impl SimBus {
    pub fn new(devices: &[SimDevice]) -> Self {
        SimBus {
            state: Rc::new(RefCell::new(SimState {
                now_ns: 0,
                low_since: None,
                slot: None,
                presence_until: 0,
                devices: devices.to_vec(),
                resets: 0,
                search_commands: 0,
                written: Vec::new(),
                bits_since_reset: 0,
                first_byte: 0,
            })),
        }
    }

    pub fn line(&self) -> SimLine {
        SimLine {
            state: self.state.clone(),
        }
    }

    pub fn delay(&self) -> SimDelay {
        SimDelay {
            state: self.state.clone(),
        }
    }

    pub fn parts(&self) -> (Bus<SimLine>, SimDelay) {
        (Bus::new(self.line()), self.delay())
    }

    pub fn device_rom(&self, index: usize) -> RomCode {
        self.state.borrow().devices[index].rom
    }

    pub fn now_us(&self) -> u64 {
        self.state.borrow().now_ns / 1000
    }

    pub fn resets(&self) -> usize {
        self.state.borrow().resets
    }

    /// Search ROM commands sent right after a reset
    pub fn search_commands(&self) -> usize {
        self.state.borrow().search_commands
    }

    /// Every bit written since the bus was created
    pub fn written_bits(&self) -> Vec<bool> {
        self.state.borrow().written.clone()
    }

    pub fn scratchpad_reads(&self) -> usize {
        self.state.borrow().devices.iter().map(|d| d.scratchpad_reads).sum()
    }

    pub fn scratchpad_writes(&self) -> usize {
        self.state.borrow().devices.iter().map(|d| d.scratchpad_writes).sum()
    }

    pub fn copies(&self) -> usize {
        self.state.borrow().devices.iter().map(|d| d.copies).sum()
    }
}

impl IoWire for SimLine {
    type Error = Infallible;

    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.state.borrow().level())
    }

    fn drive_low(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        if state.low_since.is_none() {
            state.low_since = Some(state.now_ns);
        }
        state.slot = None;
        Ok(())
    }

    fn release(&mut self) -> Result<(), Self::Error> {
        self.state.borrow_mut().on_release();
        Ok(())
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.state.borrow_mut().now_ns += ns as u64;
    }

    fn delay_us(&mut self, us: u32) {
        self.state.borrow_mut().now_ns += us as u64 * 1_000;
    }

    fn delay_ms(&mut self, ms: u32) {
        self.state.borrow_mut().now_ns += ms as u64 * 1_000_000;
    }
}
