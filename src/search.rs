use crate::{
    crc::crc7, Bus, Command, Config, Error, IoWire, Registry, RomCode, DS18B20_FAMILY,
};
use embedded_hal::delay::DelayNs;

/// Progress of a Search ROM enumeration, carried from one walk to the next.
#[derive(Debug, Clone, Default)]
pub struct DeviceSearch {
    rom: RomCode,
    /// Highest conflict position where the last walk took the 0-branch
    last_discrepancy: Option<u8>,
    /// Leading bits written from `rom` regardless of what the devices answer
    forced_bits: u8,
    done: bool,
}

impl DeviceSearch {
    pub fn new() -> DeviceSearch {
        DeviceSearch::default()
    }

    /// Only walks the subtree of devices whose family code is `family`;
    /// other devices drop out during the first byte.
    pub fn for_family(family: u8) -> DeviceSearch {
        DeviceSearch {
            rom: RomCode::new(family as u64),
            forced_bits: 8,
            ..DeviceSearch::default()
        }
    }

    pub fn last_discrepancy(&self) -> Option<u8> {
        self.last_discrepancy
    }

    /// No unexplored branch is left
    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl<W: IoWire> Bus<W> {
    /// Walks the search tree once and returns the device at the end of the
    /// walk, or `None` once every branch has been visited.
    ///
    /// Conflicts below the last discrepancy replay the previous walk, the
    /// last discrepancy itself now takes the 1-branch, and new conflicts
    /// above it take the 0-branch first.
    pub fn search_next(
        &mut self,
        search: &mut DeviceSearch,
        delay: &mut impl DelayNs,
    ) -> Result<Option<RomCode>, Error<W::Error>> {
        if search.done {
            return Ok(None);
        }

        if !self.reset(delay)? {
            return Err(Error::NoResponse { bit: 0 });
        }
        self.write_command(delay, Command::SearchRom)?;

        let mut last_zero = None;
        for i in 0..RomCode::BITS {
            let bit0 = self.read_bit(delay)?; // normal bit
            let bit1 = self.read_bit(delay)?; // complement

            let direction = match (bit0, bit1) {
                (true, true) => return Err(Error::NoResponse { bit: i }),
                _ if i < search.forced_bits => search.rom.bit(i),
                (false, false) => {
                    let direction = match search.last_discrepancy {
                        Some(last) if i < last => search.rom.bit(i),
                        Some(last) => i == last,
                        None => false,
                    };
                    if !direction {
                        last_zero = Some(i);
                    }
                    direction
                }
                (bit0, _) => bit0,
            };

            search.rom.set_bit(i, direction);
            self.write_bit(delay, direction)?;
        }

        let rom = search.rom;
        if !rom.has_valid_crc() {
            let bytes = rom.to_bytes();
            return Err(Error::CrcMismatch(crc7(&bytes[..7]), bytes[7]));
        }

        search.last_discrepancy = last_zero;
        search.done = last_zero.is_none();
        Ok(Some(rom))
    }
}

/// Enumerates every DS18B20 on the bus into `registry`.
///
/// A failed walk throws away everything found so far and starts over, up to
/// `config.max_attempts` times. Running out of attempts is not an error: the
/// registry is left empty and zero is returned. Pin errors are never retried.
pub fn search_devices<W: IoWire, const N: usize>(
    bus: &mut Bus<W>,
    delay: &mut impl DelayNs,
    registry: &mut Registry<N>,
    config: &Config,
) -> Result<usize, Error<W::Error>> {
    let attempts = config.attempts();
    for attempt in 1..=attempts {
        registry.clear();
        match walk_all(bus, delay, registry) {
            Ok(()) => {
                log::info!("ROM search found {} device(s)", registry.len());
                return Ok(registry.len());
            }
            Err(e) if e.is_search_retryable() => {
                log::warn!("ROM search attempt {}/{} failed: {:?}", attempt, attempts, e);
                if attempt < attempts {
                    delay.delay_ms(config.error_backoff_ms);
                }
            }
            Err(e) => {
                registry.clear();
                return Err(e);
            }
        }
    }

    registry.clear();
    log::error!("ROM search gave up after {} attempts", attempts);
    Ok(0)
}

fn walk_all<W: IoWire, const N: usize>(
    bus: &mut Bus<W>,
    delay: &mut impl DelayNs,
    registry: &mut Registry<N>,
) -> Result<(), Error<W::Error>> {
    let mut search = DeviceSearch::for_family(DS18B20_FAMILY);
    while let Some(rom) = bus.search_next(&mut search, delay)? {
        let minor = registry.push(rom).map_err(|_| Error::RegistryFull)?;
        log::debug!("device {} at {}", minor, rom);
    }
    Ok(())
}
