#![cfg_attr(not(test), no_std)]
#![doc = include_str!("../README.md")]

mod bus;
mod command;
mod config;
pub mod crc;
pub mod ds18b20;
mod hub;
mod iowire;
mod registry;
mod result;
mod rom;
mod search;
#[cfg(test)]
mod sim;

pub use bus::Bus;
pub use command::{Command, OpCode};
pub use config::Config;
pub use ds18b20::{Ds18b20, Reading, Resolution, Temperature};
pub use hub::{Hub, Session};
pub use iowire::{Inverted, IoWire};
pub use registry::{DeviceEntry, Registry};
pub use result::Error;
pub use rom::{RomCode, RomCodeError, DS18B20_FAMILY};
pub use search::{search_devices, DeviceSearch};
