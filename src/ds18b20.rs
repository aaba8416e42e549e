use byteorder::{ByteOrder, LittleEndian};
use core::{
    fmt::{Display, Formatter, Result as FmtResult, Write},
    str::FromStr,
};
use embedded_hal::delay::DelayNs;

use crate::{crc::crc7, Bus, Config, Error, IoWire, OpCode, RomCode};

/// Function commands, valid after the device has been selected
#[derive(Clone, Copy, Debug)]
#[repr(u8)]
pub enum Command {
    Convert = 0x44,
    WriteScratchpad = 0x4e,
    ReadScratchpad = 0xBE,
    CopyScratchpad = 0x48,
}

impl OpCode for Command {
    fn op_code(&self) -> u8 {
        *self as _
    }
}

/// EEPROM write time after Copy Scratchpad
const COPY_SCRATCHPAD_MS: u32 = 10;

/// Fraction bits of the LSB and the thousandths of a degree they stand for
const FRACTION_WEIGHTS: [(u8, u16); 4] = [(0x01, 63), (0x02, 125), (0x04, 250), (0x08, 500)];

/// Conversion resolution, stored as the configuration register pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Resolution {
    Bits9 = 0b0001_1111,
    Bits10 = 0b0011_1111,
    Bits11 = 0b0101_1111,
    Bits12 = 0b0111_1111,
}

/// Requested resolution is not 9, 10, 11 or 12 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionError;

impl Resolution {
    pub fn bits(&self) -> u8 {
        match self {
            Resolution::Bits9 => 9,
            Resolution::Bits10 => 10,
            Resolution::Bits11 => 11,
            Resolution::Bits12 => 12,
        }
    }

    pub fn config_byte(&self) -> u8 {
        *self as u8
    }

    /// Decodes scratchpad byte 4; only the four exact patterns are accepted
    pub fn from_config_byte(byte: u8) -> Option<Self> {
        match byte {
            0b0001_1111 => Some(Resolution::Bits9),
            0b0011_1111 => Some(Resolution::Bits10),
            0b0101_1111 => Some(Resolution::Bits11),
            0b0111_1111 => Some(Resolution::Bits12),
            _ => None,
        }
    }

    /// Worst-case wait after the line goes idle, with margin over the datasheet figures
    pub fn conversion_delay_ms(&self) -> u32 {
        match self {
            Resolution::Bits9 => 150,
            Resolution::Bits10 => 200,
            Resolution::Bits11 => 400,
            Resolution::Bits12 => 800,
        }
    }

    /// LSB fraction bits that are defined at this resolution
    fn fraction_mask(&self) -> u8 {
        match self {
            Resolution::Bits9 => 0b1000,
            Resolution::Bits10 => 0b1100,
            Resolution::Bits11 => 0b1110,
            Resolution::Bits12 => 0b1111,
        }
    }
}

impl TryFrom<u8> for Resolution {
    type Error = ResolutionError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            9 => Ok(Resolution::Bits9),
            10 => Ok(Resolution::Bits10),
            11 => Ok(Resolution::Bits11),
            12 => Ok(Resolution::Bits12),
            _ => Err(ResolutionError),
        }
    }
}

/// Parses an ASCII bit count such as `"11\n"`
impl FromStr for Resolution {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bits: u8 = s.trim().parse().map_err(|_| ResolutionError)?;
        Resolution::try_from(bits)
    }
}

/// Raw 9-byte scratchpad, CRC last
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scratchpad([u8; Scratchpad::BYTES]);

impl From<[u8; Scratchpad::BYTES]> for Scratchpad {
    fn from(bytes: [u8; Scratchpad::BYTES]) -> Self {
        Scratchpad(bytes)
    }
}

impl Scratchpad {
    pub const BYTES: usize = 9;

    pub fn ensure_correct_crc<E: core::fmt::Debug>(&self) -> Result<(), Error<E>> {
        let computed = crc7(&self.0[..8]);
        if computed != self.0[8] {
            Err(Error::CrcMismatch(computed, self.0[8]))
        } else {
            Ok(())
        }
    }

    pub fn temperature_lsb(&self) -> u8 {
        self.0[0]
    }

    pub fn temperature_msb(&self) -> u8 {
        self.0[1]
    }

    /// Configuration register
    pub fn config(&self) -> u8 {
        self.0[4]
    }

    pub fn resolution<E: core::fmt::Debug>(&self) -> Result<Resolution, Error<E>> {
        Resolution::from_config_byte(self.config()).ok_or(Error::UnknownResolution(self.config()))
    }

    pub fn temperature(&self, resolution: Resolution) -> Temperature {
        Temperature::decode(self.temperature_lsb(), self.temperature_msb(), resolution)
    }
}

/// Decoded temperature: sign, whole degrees and thousandths of a degree.
///
/// Thousandths come from fixed per-bit weights, so 1/16 °C reads as 0.063.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Temperature {
    negative: bool,
    whole: u8,
    millis: u16,
}

impl Temperature {
    /// Decodes the two temperature bytes of the scratchpad.
    ///
    /// Fraction bits beyond `resolution` are undefined on the wire and are
    /// cleared from the raw word first. A non-zero high nibble in `msb` then
    /// marks a negative reading, whose magnitude is taken from the two's
    /// complement before the bit weights apply.
    pub fn decode(lsb: u8, msb: u8, resolution: Resolution) -> Self {
        let lsb = lsb & (0xf0 | resolution.fraction_mask());
        let raw = LittleEndian::read_i16(&[lsb, msb]);
        let negative = raw < 0;
        let magnitude = raw.unsigned_abs();
        let (lsb, msb) = (magnitude as u8, (magnitude >> 8) as u8);

        let whole = (lsb >> 4) | ((msb & 0x07) << 4);
        let fraction = lsb & 0x0f;
        let millis: u16 = FRACTION_WEIGHTS
            .iter()
            .filter(|(bit, _)| fraction & bit != 0)
            .map(|(_, weight)| weight)
            .sum();

        Temperature {
            negative,
            whole,
            millis,
        }
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Signed whole degrees, truncated toward zero
    pub fn whole_degrees(&self) -> i16 {
        if self.negative {
            -(self.whole as i16)
        } else {
            self.whole as i16
        }
    }

    /// Unsigned fractional part in thousandths
    pub fn fraction_millis(&self) -> u16 {
        self.millis
    }

    pub fn millidegrees(&self) -> i32 {
        let magnitude = self.whole as i32 * 1000 + self.millis as i32;
        if self.negative {
            -magnitude
        } else {
            magnitude
        }
    }
}

/// Sign, whole degrees and one fractional digit, e.g. `-10.1 °C`
impl Display for Temperature {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let sign = if self.negative { '-' } else { '+' };
        write!(f, "{}{}.{} °C", sign, self.whole, self.millis / 100)
    }
}

/// Result of a temperature read: the value and the resolution read back with it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub temperature: Temperature,
    pub resolution: Resolution,
}

impl Reading {
    /// The reading as one line of text
    pub fn to_text(&self) -> heapless::String<16> {
        let mut text = heapless::String::new();
        // "+127.9 °C\n" is 11 bytes
        let written = writeln!(text, "{}", self.temperature);
        debug_assert!(written.is_ok());
        text
    }
}

impl Display for Reading {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        self.temperature.fmt(f)
    }
}

/// One sensor on the bus and the resolution last read from it
#[derive(Debug, Clone, Copy)]
pub struct Ds18b20 {
    rom: RomCode,
    resolution: Resolution,
}

impl From<Ds18b20> for RomCode {
    fn from(device: Ds18b20) -> Self {
        device.rom
    }
}

impl Ds18b20 {
    pub fn new(rom: RomCode, resolution: Resolution) -> Self {
        Ds18b20 { rom, resolution }
    }

    pub fn rom(&self) -> &RomCode {
        &self.rom
    }

    /// Cached resolution, refreshed by every successful read or write
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn start_conversion<W: IoWire>(
        &self,
        bus: &mut Bus<W>,
        delay: &mut impl DelayNs,
    ) -> Result<(), Error<W::Error>> {
        bus.reset_select(delay, &self.rom)?;
        bus.write_command(delay, Command::Convert)?;
        Ok(())
    }

    /// Converts, waits for the result and reads it back.
    ///
    /// The conversion wait is the line polling followed by the worst-case delay
    /// of the cached resolution. On success the cached resolution becomes the
    /// one read from the device.
    pub fn read_temperature<W: IoWire>(
        &mut self,
        bus: &mut Bus<W>,
        delay: &mut impl DelayNs,
        config: &Config,
    ) -> Result<Reading, Error<W::Error>> {
        log::debug!("{}: converting", self.rom);
        self.start_conversion(bus, delay)?;
        let busy = bus.wait_for_conversion(delay, config.conversion_poll_slots)?;
        delay.delay_ms(self.resolution.conversion_delay_ms());
        log::debug!("{}: conversion done after {} busy slots", self.rom, busy);

        let scratchpad = self.read_scratchpad(bus, delay, config)?;
        let resolution = scratchpad.resolution::<W::Error>().map_err(|e| {
            log::error!("{}: undecodable config {:#04x}", self.rom, scratchpad.config());
            e
        })?;
        self.resolution = resolution;

        let reading = Reading {
            temperature: scratchpad.temperature(resolution),
            resolution,
        };
        log::info!(
            "{}: {} at {} bit",
            self.rom,
            reading.temperature,
            resolution.bits()
        );
        Ok(reading)
    }

    /// Reads the scratchpad until its CRC checks out, at most
    /// `config.max_attempts` times with `config.error_backoff_ms` in between.
    pub fn read_scratchpad<W: IoWire>(
        &self,
        bus: &mut Bus<W>,
        delay: &mut impl DelayNs,
        config: &Config,
    ) -> Result<Scratchpad, Error<W::Error>> {
        let attempts = config.attempts();
        let mut attempt = 1;
        loop {
            let mut bytes = [0u8; Scratchpad::BYTES];
            bus.reset_select(delay, &self.rom)?;
            bus.write_command(delay, Command::ReadScratchpad)?;
            bus.read_bytes(delay, &mut bytes)?;

            let scratchpad = Scratchpad::from(bytes);
            match scratchpad.ensure_correct_crc() {
                Ok(()) => return Ok(scratchpad),
                Err(e) if attempt < attempts => {
                    log::warn!(
                        "{}: scratchpad attempt {}/{}: {:?}",
                        self.rom,
                        attempt,
                        attempts,
                        e
                    );
                    delay.delay_ms(config.error_backoff_ms);
                    attempt += 1;
                }
                Err(e) => {
                    log::error!("{}: scratchpad unreadable after {} attempts", self.rom, attempts);
                    return Err(e);
                }
            }
        }
    }

    /// Writes `resolution` to the configuration register and reads it back.
    ///
    /// A CRC failure or a mismatching readback repeats the whole write,
    /// at most `config.max_attempts` times.
    pub fn set_resolution<W: IoWire>(
        &mut self,
        bus: &mut Bus<W>,
        delay: &mut impl DelayNs,
        config: &Config,
        resolution: Resolution,
    ) -> Result<(), Error<W::Error>> {
        let attempts = config.attempts();
        let mut attempt = 1;
        loop {
            match self.write_and_verify(bus, delay, config, resolution) {
                Ok(()) => break,
                Err(e)
                    if attempt < attempts
                        && matches!(
                            e,
                            Error::CrcMismatch(..) | Error::ResolutionMismatch { .. }
                        ) =>
                {
                    log::warn!(
                        "{}: resolution write attempt {}/{}: {:?}",
                        self.rom,
                        attempt,
                        attempts,
                        e
                    );
                    delay.delay_ms(config.error_backoff_ms);
                    attempt += 1;
                }
                Err(e) => {
                    log::error!(
                        "{}: could not set {} bit resolution: {:?}",
                        self.rom,
                        resolution.bits(),
                        e
                    );
                    return Err(e);
                }
            }
        }

        if config.persist_resolution {
            self.copy_scratchpad(bus, delay)?;
        }
        self.resolution = resolution;
        log::info!("{}: resolution set to {} bit", self.rom, resolution.bits());
        Ok(())
    }

    fn write_and_verify<W: IoWire>(
        &self,
        bus: &mut Bus<W>,
        delay: &mut impl DelayNs,
        config: &Config,
        resolution: Resolution,
    ) -> Result<(), Error<W::Error>> {
        bus.reset_select(delay, &self.rom)?;
        bus.write_command(delay, Command::WriteScratchpad)?;
        // alarm thresholds are unused
        bus.write_bytes(delay, &[0x00, 0x00, resolution.config_byte()])?;
        delay.delay_ms(config.settle_ms);

        let scratchpad = self.read_scratchpad(bus, delay, config)?;
        if scratchpad.config() == resolution.config_byte() {
            Ok(())
        } else {
            Err(Error::ResolutionMismatch {
                requested: resolution.bits(),
                config: scratchpad.config(),
            })
        }
    }

    /// Copies the scratchpad configuration into EEPROM
    pub fn copy_scratchpad<W: IoWire>(
        &self,
        bus: &mut Bus<W>,
        delay: &mut impl DelayNs,
    ) -> Result<(), Error<W::Error>> {
        bus.reset_select(delay, &self.rom)?;
        bus.write_command(delay, Command::CopyScratchpad)?;
        delay.delay_ms(COPY_SCRATCHPAD_MS);
        Ok(())
    }
}
