use crate::{Command, Error, IoWire, OpCode, RomCode};
use embedded_hal::delay::DelayNs;

// All timings in microseconds. A slot is roughly 60µs plus recovery.
const RESET_LOW_US: u32 = 480;
const PRESENCE_SAMPLE_US: u32 = 70;
const RESET_TAIL_US: u32 = RESET_LOW_US - PRESENCE_SAMPLE_US;
const SLOT_US: u32 = 60;
const WRITE_ONE_LOW_US: u32 = 15;
const RECOVERY_US: u32 = 2;
const READ_LOW_US: u32 = 1;
const READ_SAMPLE_US: u32 = 10;
const READ_TAIL_US: u32 = SLOT_US - READ_LOW_US - READ_SAMPLE_US;

/// Bit-banged bus engine.
///
/// Every method is a busy-wait sequence; the caller must not be preempted
/// for more than a few microseconds while one runs.
pub struct Bus<W: IoWire> {
    io_wire: W,
}

impl<W: IoWire> Bus<W> {
    pub fn new(io_wire: W) -> Self {
        Bus { io_wire }
    }

    /// Gives the line back
    pub fn free(self) -> W {
        self.io_wire
    }

    /// Sends a reset pulse and reports whether any device answered with a
    /// presence pulse.
    ///
    /// The line is free again 480µs after release, whatever the answer.
    pub fn reset(&mut self, delay: &mut impl DelayNs) -> Result<bool, W::Error> {
        self.io_wire.drive_low()?;
        delay.delay_us(RESET_LOW_US);
        self.io_wire.release()?;
        delay.delay_us(PRESENCE_SAMPLE_US);
        let presence = self.io_wire.is_low()?;
        delay.delay_us(RESET_TAIL_US);
        Ok(presence)
    }

    /// Addresses one device: Match ROM followed by its 64-bit code
    pub fn select(&mut self, delay: &mut impl DelayNs, rom: &RomCode) -> Result<(), W::Error> {
        self.write_command(delay, Command::MatchRom)?;
        self.write_rom(delay, rom)
    }

    /// Resets, then selects `rom`. Presence is not checked here; a missing
    /// device shows up as a CRC failure on the readback.
    pub fn reset_select(
        &mut self,
        delay: &mut impl DelayNs,
        rom: &RomCode,
    ) -> Result<(), W::Error> {
        if !self.reset(delay)? {
            log::debug!("no presence pulse before selecting {}", rom);
        }
        self.select(delay, rom)
    }

    /// Issues read slots until the line reads high, meaning the addressed
    /// sensor finished converting. Returns the number of slots it stayed low.
    pub fn wait_for_conversion(
        &mut self,
        delay: &mut impl DelayNs,
        max_slots: u32,
    ) -> Result<u32, Error<W::Error>> {
        for slot in 0..max_slots.max(1) {
            if self.read_bit(delay)? {
                return Ok(slot);
            }
        }
        Err(Error::ConversionTimeout)
    }

    pub fn write_command(
        &mut self,
        delay: &mut impl DelayNs,
        cmd: impl OpCode,
    ) -> Result<(), W::Error> {
        self.write_byte(delay, cmd.op_code())
    }

    pub fn write_bytes(&mut self, delay: &mut impl DelayNs, bytes: &[u8]) -> Result<(), W::Error> {
        for b in bytes {
            self.write_byte(delay, *b)?;
        }
        Ok(())
    }

    /// Writes eight bits, least significant first
    pub fn write_byte(&mut self, delay: &mut impl DelayNs, byte: u8) -> Result<(), W::Error> {
        let mut byte = byte;
        for _ in 0..8 {
            self.write_bit(delay, (byte & 0x01) == 0x01)?;
            byte >>= 1;
        }
        Ok(())
    }

    /// Writes all 64 bits of `rom`, least significant first
    pub fn write_rom(&mut self, delay: &mut impl DelayNs, rom: &RomCode) -> Result<(), W::Error> {
        for i in 0..RomCode::BITS {
            self.write_bit(delay, rom.bit(i))?;
        }
        Ok(())
    }

    pub fn write_bit(&mut self, delay: &mut impl DelayNs, high: bool) -> Result<(), W::Error> {
        self.io_wire.drive_low()?;
        delay.delay_us(if high { WRITE_ONE_LOW_US } else { SLOT_US });
        self.io_wire.release()?;
        delay.delay_us(if high {
            SLOT_US - WRITE_ONE_LOW_US
        } else {
            RECOVERY_US
        });
        Ok(())
    }

    pub fn read_bytes(&mut self, delay: &mut impl DelayNs, dst: &mut [u8]) -> Result<(), W::Error> {
        for d in dst {
            *d = self.read_byte(delay)?;
        }
        Ok(())
    }

    pub fn read_byte(&mut self, delay: &mut impl DelayNs) -> Result<u8, W::Error> {
        let mut byte = 0_u8;
        for _ in 0..8 {
            byte >>= 1;
            if self.read_bit(delay)? {
                byte |= 0x80;
            }
        }
        Ok(byte)
    }

    pub fn read_bit(&mut self, delay: &mut impl DelayNs) -> Result<bool, W::Error> {
        self.io_wire.drive_low()?;
        delay.delay_us(READ_LOW_US);
        self.io_wire.release()?;
        delay.delay_us(READ_SAMPLE_US);
        let val = self.io_wire.is_high();
        delay.delay_us(READ_TAIL_US);
        val
    }
}
