//! Device selection by bus location or vendor/product ID

use crate::{Error, Result};
use std::fmt;
use usbrc::{Device, Provider};

/// Which device a command operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelector {
    /// `BUS:ADDR`, both decimal as printed by `lsusb`
    Location { bus_number: u8, address: u8 },
    /// `VID:PID`, hex with optional `0x` prefix; the first match wins
    Id { vendor_id: u16, product_id: u16 },
}

impl DeviceSelector {
    pub fn parse_location(s: &str) -> Result<Self> {
        let (bus, address) = split_pair(s, "BUS:ADDR")?;
        let parse = |part: &str, name: &str| {
            part.parse::<u8>()
                .map_err(|_| Error::Selector(format!("invalid {} '{}' in '{}'", name, part, s)))
        };
        Ok(Self::Location {
            bus_number: parse(bus, "bus number")?,
            address: parse(address, "address")?,
        })
    }

    pub fn parse_id(s: &str) -> Result<Self> {
        let (vid, pid) = split_pair(s, "VID:PID")?;
        Ok(Self::Id {
            vendor_id: parse_hex_id(vid, "VID")?,
            product_id: parse_hex_id(pid, "PID")?,
        })
    }

    pub fn matches<P: Provider>(&self, device: &Device<P>) -> usbrc::Result<bool> {
        match *self {
            Self::Location {
                bus_number,
                address,
            } => Ok(device.bus_number()? == bus_number && device.address()? == address),
            Self::Id {
                vendor_id,
                product_id,
            } => {
                let desc = device.device_descriptor()?;
                Ok(desc.vendor_id == vendor_id && desc.product_id == product_id)
            }
        }
    }

    /// First device in `devices` that matches
    ///
    /// Devices whose descriptor cannot be read are skipped.
    pub fn find<P: Provider>(&self, devices: &[Device<P>]) -> Result<Device<P>> {
        devices
            .iter()
            .find(|device| self.matches(device).unwrap_or(false))
            .cloned()
            .ok_or_else(|| Error::NoDevice(self.to_string()))
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Location {
                bus_number,
                address,
            } => write!(f, "{:03}:{:03}", bus_number, address),
            Self::Id {
                vendor_id,
                product_id,
            } => write!(f, "{:04x}:{:04x}", vendor_id, product_id),
        }
    }
}

fn split_pair<'a>(s: &'a str, format: &str) -> Result<(&'a str, &'a str)> {
    s.split_once(':')
        .ok_or_else(|| Error::Selector(format!("'{}' is not of the form {}", s, format)))
}

/// Parse a 1-4 digit hex ID, with or without a `0x` prefix
pub fn parse_hex_id(id: &str, name: &str) -> Result<u16> {
    let hex_part = id
        .strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .unwrap_or(id);

    if hex_part.is_empty() || hex_part.len() > 4 {
        return Err(Error::Selector(format!(
            "invalid {} '{}', hex part must be 1-4 digits",
            name, id
        )));
    }

    u16::from_str_radix(hex_part, 16)
        .map_err(|_| Error::Selector(format!("invalid {} '{}', not a valid hex number", name, id)))
}
