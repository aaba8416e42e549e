use core::fmt::Debug;

/// Error type
#[derive(Debug, PartialEq, Eq)]
pub enum Error<E: Sized + Debug> {
    /// Nobody answered a search slot (both the bit and its complement read 1)
    NoResponse { bit: u8 },
    /// CRC computed over the received bytes differs from the received CRC
    CrcMismatch(u8, u8),
    /// Scratchpad configuration byte matches no known resolution
    UnknownResolution(u8),
    /// Resolution request is not one of 9, 10, 11 or 12 bits
    InvalidResolution,
    /// The written resolution did not read back
    ResolutionMismatch { requested: u8, config: u8 },
    /// Sensor still held the line low after the poll limit
    ConversionTimeout,
    /// ROM search found nothing
    NoDevicesFound,
    RegistryFull,
    NoSuchDevice(u8),
    /// Another session holds the bus
    Busy,
    PortError(E),
}

impl<E: Sized + Debug> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Error::PortError(e)
    }
}

impl<E: Sized + Debug> Error<E> {
    /// Failures worth repeating the whole ROM search for
    pub(crate) fn is_search_retryable(&self) -> bool {
        matches!(self, Error::NoResponse { .. } | Error::CrcMismatch(..))
    }
}
