use crate::Resolution;

/// Retry, delay and startup settings shared by every transaction on a bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Config {
    /// Attempts per CRC-checked read, per resolution write, and per ROM search.
    pub max_attempts: u8,
    /// Wait between failed attempts, in milliseconds.
    pub error_backoff_ms: u32,
    /// Wait after writing the scratchpad before verifying it, in milliseconds.
    pub settle_ms: u32,
    /// Read slots to poll while a conversion holds the line low.
    pub conversion_poll_slots: u32,
    /// Resolution assumed for each device until it is read back.
    pub initial_resolution: Resolution,
    /// Copy a verified resolution into the sensor's EEPROM.
    pub persist_resolution: bool,
}

impl Config {
    /// Sets the number of attempts before a failure is reported.
    ///
    /// Zero is treated as one.
    pub fn max_attempts(mut self, attempts: u8) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the backoff between failed attempts.
    pub fn error_backoff_ms(mut self, ms: u32) -> Self {
        self.error_backoff_ms = ms;
        self
    }

    /// Sets the delay between a scratchpad write and its verification.
    pub fn settle_ms(mut self, ms: u32) -> Self {
        self.settle_ms = ms;
        self
    }

    /// Sets the upper bound on conversion polling, in read slots (about 65µs each).
    pub fn conversion_poll_slots(mut self, slots: u32) -> Self {
        self.conversion_poll_slots = slots;
        self
    }

    /// Sets the resolution cached for every device at startup.
    pub fn initial_resolution(mut self, resolution: Resolution) -> Self {
        self.initial_resolution = resolution;
        self
    }

    /// Enables copying the scratchpad to EEPROM after a resolution change.
    pub fn persist_resolution(mut self, persist: bool) -> Self {
        self.persist_resolution = persist;
        self
    }

    pub(crate) fn attempts(&self) -> u8 {
        self.max_attempts.max(1)
    }
}

impl Default for Config {
    /// Five attempts 500ms apart, a 2s settle delay, 12 bit resolution,
    /// and roughly 1.3s of conversion polling.
    fn default() -> Config {
        Config {
            max_attempts: 5,
            error_backoff_ms: 500,
            settle_ms: 2000,
            conversion_poll_slots: 20_000,
            initial_resolution: Resolution::Bits12,
            persist_resolution: false,
        }
    }
}
