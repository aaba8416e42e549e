use crate::{
    search::search_devices, Bus, Config, Ds18b20, Error, IoWire, Reading, Registry, Resolution,
    RomCode,
};
use embassy_sync::{
    blocking_mutex::raw::RawMutex,
    mutex::{Mutex, MutexGuard},
};
use embedded_hal::delay::DelayNs;

/// Everything a transaction touches, behind the bus lock
struct Context<W: IoWire, D, const N: usize> {
    bus: Bus<W>,
    delay: D,
    /// Device the next transaction addresses
    bound: Option<(u8, RomCode)>,
    /// Last known resolution per minor
    resolutions: [Resolution; N],
}

/// The driver context: registry, configuration and the bus lock.
///
/// The bus is one electrical resource, so a single lock covers it whole. An
/// open [`Session`] on any device blocks sessions on every other device until
/// it is dropped, even though the devices share no state.
pub struct Hub<M: RawMutex, W: IoWire, D, const N: usize> {
    registry: Registry<N>,
    config: Config,
    context: Mutex<M, Context<W, D, N>>,
}

impl<M: RawMutex, W: IoWire, D: DelayNs, const N: usize> Hub<M, W, D, N> {
    /// Takes over the line and enumerates the bus.
    ///
    /// Fails with [`Error::NoDevicesFound`] if the search comes back empty.
    pub fn new(io_wire: W, mut delay: D, config: Config) -> Result<Self, Error<W::Error>> {
        let mut bus = Bus::new(io_wire);
        let mut registry = Registry::new();
        let count = search_devices(&mut bus, &mut delay, &mut registry, &config)?;
        if count == 0 {
            log::error!("no DS18B20 on the bus");
            return Err(Error::NoDevicesFound);
        }
        for entry in registry.iter() {
            log::info!("{}: {}", entry.node_name(), entry.rom);
        }

        Ok(Hub {
            registry,
            config,
            context: Mutex::new(Context {
                bus,
                delay,
                bound: None,
                resolutions: [config.initial_resolution; N],
            }),
        })
    }

    pub fn registry(&self) -> &Registry<N> {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn device_count(&self) -> usize {
        self.registry.len()
    }

    pub fn rom(&self, minor: u8) -> Option<RomCode> {
        self.registry.rom(minor)
    }

    /// Waits for the bus and opens a session on `minor`
    pub async fn open(&self, minor: u8) -> Result<Session<'_, M, W, D, N>, Error<W::Error>> {
        let context = self.context.lock().await;
        self.bind(context, minor)
    }

    /// Opens a session on `minor` if the bus is free
    pub fn try_open(&self, minor: u8) -> Result<Session<'_, M, W, D, N>, Error<W::Error>> {
        let context = self.context.try_lock().map_err(|_| Error::Busy)?;
        self.bind(context, minor)
    }

    /// Hands back the line and the delay
    pub fn release(self) -> (W, D) {
        let context = self.context.into_inner();
        (context.bus.free(), context.delay)
    }

    fn bind<'a>(
        &'a self,
        mut context: MutexGuard<'a, M, Context<W, D, N>>,
        minor: u8,
    ) -> Result<Session<'a, M, W, D, N>, Error<W::Error>> {
        let bound = context.bound;
        let rom = match bound {
            Some((bound, rom)) if bound == minor => rom,
            _ => {
                let rom = self.registry.rom(minor).ok_or(Error::NoSuchDevice(minor))?;
                log::debug!("binding {} to {}", minor, rom);
                context.bound = Some((minor, rom));
                rom
            }
        };
        Ok(Session {
            config: &self.config,
            minor,
            rom,
            context,
        })
    }
}

/// Exclusive use of the bus on behalf of one device. Dropping it frees the bus.
pub struct Session<'a, M: RawMutex, W: IoWire, D, const N: usize> {
    config: &'a Config,
    minor: u8,
    rom: RomCode,
    context: MutexGuard<'a, M, Context<W, D, N>>,
}

impl<M: RawMutex, W: IoWire, D: DelayNs, const N: usize> Session<'_, M, W, D, N> {
    pub fn minor(&self) -> u8 {
        self.minor
    }

    pub fn rom(&self) -> RomCode {
        self.rom
    }

    /// Last resolution read from or written to this device
    pub fn resolution(&self) -> Resolution {
        self.context.resolutions[self.minor as usize]
    }

    pub fn read_temperature(&mut self) -> Result<Reading, Error<W::Error>> {
        let config = self.config;
        let context = &mut *self.context;
        let slot = self.minor as usize;

        let mut sensor = Ds18b20::new(self.rom, context.resolutions[slot]);
        let result = sensor.read_temperature(&mut context.bus, &mut context.delay, config);
        context.resolutions[slot] = sensor.resolution();
        result
    }

    pub fn set_resolution(&mut self, resolution: Resolution) -> Result<(), Error<W::Error>> {
        let config = self.config;
        let context = &mut *self.context;
        let slot = self.minor as usize;

        let mut sensor = Ds18b20::new(self.rom, context.resolutions[slot]);
        let result =
            sensor.set_resolution(&mut context.bus, &mut context.delay, config, resolution);
        context.resolutions[slot] = sensor.resolution();
        result
    }

    /// Reads the temperature and writes it to `buf` as text, e.g. `+21.5 °C\n`.
    ///
    /// Returns the number of bytes written; the text is cut short if `buf` is.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error<W::Error>> {
        let text = self.read_temperature()?.to_text();
        let len = text.len().min(buf.len());
        buf[..len].copy_from_slice(&text.as_bytes()[..len]);
        Ok(len)
    }

    /// Takes an ASCII resolution in bits (`9` to `12`, surrounding whitespace
    /// allowed) and applies it. Returns the number of bytes accepted.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, Error<W::Error>> {
        let resolution = core::str::from_utf8(buf)
            .ok()
            .and_then(|text| text.parse().ok())
            .ok_or(Error::InvalidResolution)?;
        self.set_resolution(resolution)?;
        Ok(buf.len())
    }
}

impl<M: RawMutex, W: IoWire, D, const N: usize> Drop for Session<'_, M, W, D, N> {
    fn drop(&mut self) {
        log::debug!("releasing bus held for {}", self.minor);
    }
}
