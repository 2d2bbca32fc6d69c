//! Reference-counted resource handling over libusb
//!
//! Every native resource is owned by a cloneable wrapper and released exactly
//! once, when its last clone drops:
//!
//! - [`Context`]: one library session
//! - [`Device`]: a device reference obtained by enumeration
//! - [`Handle`]: an open device, optionally with one claimed interface
//! - [`ConfigurationDescriptor`]: a configuration descriptor read from a device
//!
//! Derived resources keep their parents alive, so a device or handle stays
//! usable after the context it came from has been dropped by the caller.
//! Failures from the native library become [`Error::Provider`] values naming
//! the failed operation and its code.
//!
//! All native calls go through the [`Provider`] trait. [`LibusbProvider`]
//! talks to the system libusb; [`test_utils::FakeProvider`] simulates devices
//! in memory.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! let context = usbrc::init(0)?;
//! for device in context.device_list()? {
//!     let desc = device.device_descriptor()?;
//!     if desc.vendor_id == 0x1209 {
//!         let handle = device.open()?;
//!         handle.claim_interface(0)?;
//!         let mut buf = [0u8; 64];
//!         let n = handle.bulk_transfer(0x81, &mut buf, Duration::from_secs(1))?;
//!         println!("read {} bytes", n);
//!     }
//! }
//! # Ok::<(), usbrc::Error>(())
//! ```

pub mod context;
pub mod descriptor;
pub mod device;
mod display;
pub mod error;
pub mod handle;
pub mod libusb;
pub mod provider;
pub mod test_utils;
pub mod transfer;

pub use context::{Context, init};
pub use descriptor::{
    ConfigDescriptor, ConfigurationDescriptor, DEFAULT_CONFIGURATION_VALUE, DeviceDescriptor,
    EndpointDescriptor, Interface, InterfaceDescriptor,
};
pub use device::Device;
pub use error::{Error, ProviderError, Result, error_name};
pub use handle::{Handle, ReleasePolicy};
pub use libusb::LibusbProvider;
pub use provider::{Provider, RawCode};
pub use transfer::{ControlRequest, Direction, Recipient, RequestType, request_type};
