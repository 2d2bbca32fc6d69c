//! The capability provider seam
//!
//! [`Provider`] names every native operation the core needs, in libusb's own
//! terms: raw resources are opaque `Copy` tokens, and fallible calls report a
//! negative [`RawCode`] on failure. The ownership wrappers in this crate are the
//! only callers; they guarantee each raw resource is released exactly once.
//!
//! Implementations:
//! - [`crate::libusb::LibusbProvider`] talks to libusb through `rusb::ffi`
//! - [`crate::test_utils::FakeProvider`] is an in-memory device tree with a call log

use crate::descriptor::{ConfigDescriptor, DeviceDescriptor};
use std::fmt::Debug;

/// libusb-style result code: negative on failure
pub type RawCode = i32;

pub trait Provider: Send + Sync + 'static {
    /// An initialized library session
    type Context: Copy + Debug + Send + Sync;
    /// A device reference; each one carries a provider-side reference count
    type Device: Copy + Debug + Send + Sync;
    /// An open device handle
    type Handle: Copy + Debug + Send + Sync;
    /// A configuration descriptor allocated by the provider
    type Config: Debug + Send + Sync;
    /// The container returned by device enumeration
    type DeviceList;

    fn init(&self) -> Result<Self::Context, RawCode>;

    /// Best-effort; the caller logs a failure and carries on
    fn set_log_level(&self, context: Self::Context, level: i32) -> RawCode;

    fn exit(&self, context: Self::Context);

    /// Each entry of a successful list holds one device reference
    fn get_device_list(&self, context: Self::Context) -> Result<Self::DeviceList, RawCode>;

    fn device_list_entries<'a>(&self, list: &'a Self::DeviceList) -> &'a [Self::Device];

    /// Free the container; with `unref_devices == false` the entries' references
    /// are left to whoever copied them out
    fn free_device_list(&self, list: Self::DeviceList, unref_devices: bool);

    fn unref_device(&self, device: Self::Device);

    fn get_device_descriptor(&self, device: Self::Device) -> Result<DeviceDescriptor, RawCode>;

    fn get_device_address(&self, device: Self::Device) -> u8;

    fn get_bus_number(&self, device: Self::Device) -> u8;

    fn open(&self, device: Self::Device) -> Result<Self::Handle, RawCode>;

    fn close(&self, handle: Self::Handle);

    /// The device behind an open handle, `None` if it cannot be resolved
    fn get_device(&self, handle: Self::Handle) -> Option<Self::Device>;

    fn claim_interface(&self, handle: Self::Handle, interface_number: u8) -> RawCode;

    fn release_interface(&self, handle: Self::Handle, interface_number: u8) -> RawCode;

    fn get_config_descriptor_by_value(
        &self,
        device: Self::Device,
        value: u8,
    ) -> Result<Self::Config, RawCode>;

    /// Decode a raw configuration descriptor into plain data
    fn describe_config(&self, config: &Self::Config) -> ConfigDescriptor;

    fn free_config_descriptor(&self, config: Self::Config);

    /// Max packet size of `endpoint`, or a negative code
    fn get_max_packet_size(&self, device: Self::Device, endpoint: u8) -> RawCode;

    /// Bytes transferred, or a negative code. `data.len()` is the `wLength` field.
    #[allow(clippy::too_many_arguments)]
    fn control_transfer(
        &self,
        handle: Self::Handle,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &mut [u8],
        timeout_ms: u32,
    ) -> RawCode;

    /// Actual transferred length on success, which may be shorter than `data`
    fn bulk_transfer(
        &self,
        handle: Self::Handle,
        endpoint: u8,
        data: &mut [u8],
        timeout_ms: u32,
    ) -> Result<usize, RawCode>;

    /// Length of the ASCII string written into `data`, or a negative code
    fn get_string_descriptor_ascii(
        &self,
        handle: Self::Handle,
        index: u8,
        data: &mut [u8],
    ) -> RawCode;

    fn error_name(&self, code: RawCode) -> &'static str {
        crate::error::error_name(code)
    }
}
