//! [`Provider`] backed by libusb-1.0
//!
//! All FFI lives here. Raw pointers are wrapped in `NonNull` newtypes; the
//! ownership wrappers decide when each one is released.

use crate::descriptor::{
    ConfigDescriptor, DeviceDescriptor, EndpointDescriptor, Interface, InterfaceDescriptor,
};
use crate::provider::{Provider, RawCode};
use rusb::ffi::constants::{LIBUSB_ERROR_OTHER, LIBUSB_OPTION_LOG_LEVEL};
use rusb::ffi::{
    libusb_bulk_transfer, libusb_claim_interface, libusb_close, libusb_config_descriptor,
    libusb_context, libusb_control_transfer, libusb_device, libusb_device_descriptor,
    libusb_device_handle, libusb_endpoint_descriptor, libusb_error_name, libusb_exit,
    libusb_free_config_descriptor, libusb_free_device_list, libusb_get_bus_number,
    libusb_get_config_descriptor_by_value, libusb_get_device, libusb_get_device_address,
    libusb_get_device_descriptor, libusb_get_device_list, libusb_get_max_packet_size,
    libusb_get_string_descriptor_ascii, libusb_init, libusb_interface_descriptor, libusb_open,
    libusb_release_interface, libusb_set_option, libusb_unref_device,
};
use std::ffi::{CStr, c_int};
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::slice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawContext(NonNull<libusb_context>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDevice(NonNull<libusb_device>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHandle(NonNull<libusb_device_handle>);

#[derive(Debug)]
pub struct RawConfig(NonNull<libusb_config_descriptor>);

pub struct RawDeviceList {
    list: *const *mut libusb_device,
    entries: Vec<RawDevice>,
}

// SAFETY: libusb contexts, devices, handles and descriptors may be used from
// any thread; libusb serializes internally where it needs to.
unsafe impl Send for RawContext {}
unsafe impl Sync for RawContext {}
unsafe impl Send for RawDevice {}
unsafe impl Sync for RawDevice {}
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}
unsafe impl Send for RawConfig {}
unsafe impl Sync for RawConfig {}

/// The system libusb
#[derive(Debug, Clone, Copy, Default)]
pub struct LibusbProvider;

/// View `len` values at `ptr` as a slice; null or empty gives `&[]`
///
/// # Safety
/// A non-null `ptr` must point to `len` initialized values that outlive `'a`.
unsafe fn raw_slice<'a, T>(ptr: *const T, len: usize) -> &'a [T] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        unsafe { slice::from_raw_parts(ptr, len) }
    }
}

fn describe_endpoint(endpoint: &libusb_endpoint_descriptor) -> EndpointDescriptor {
    EndpointDescriptor {
        address: endpoint.bEndpointAddress,
        attributes: endpoint.bmAttributes,
        max_packet_size: endpoint.wMaxPacketSize,
        interval: endpoint.bInterval,
    }
}

fn describe_interface(alt: &libusb_interface_descriptor) -> InterfaceDescriptor {
    // SAFETY: `endpoint` holds `bNumEndpoints` entries owned by the config descriptor
    let endpoints = unsafe { raw_slice(alt.endpoint, usize::from(alt.bNumEndpoints)) };
    InterfaceDescriptor {
        interface_number: alt.bInterfaceNumber,
        alternate_setting: alt.bAlternateSetting,
        class_code: alt.bInterfaceClass,
        sub_class_code: alt.bInterfaceSubClass,
        protocol_code: alt.bInterfaceProtocol,
        interface_string_index: alt.iInterface,
        endpoints: endpoints.iter().map(describe_endpoint).collect(),
    }
}

impl Provider for LibusbProvider {
    type Context = RawContext;
    type Device = RawDevice;
    type Handle = RawHandle;
    type Config = RawConfig;
    type DeviceList = RawDeviceList;

    fn init(&self) -> Result<RawContext, RawCode> {
        let mut context: *mut libusb_context = ptr::null_mut();
        let rc = unsafe { libusb_init(&mut context) };
        if rc < 0 {
            return Err(rc);
        }
        NonNull::new(context)
            .map(RawContext)
            .ok_or(LIBUSB_ERROR_OTHER)
    }

    fn set_log_level(&self, context: RawContext, level: i32) -> RawCode {
        unsafe { libusb_set_option(context.0.as_ptr(), LIBUSB_OPTION_LOG_LEVEL, level as c_int) }
    }

    fn exit(&self, context: RawContext) {
        unsafe { libusb_exit(context.0.as_ptr()) }
    }

    fn get_device_list(&self, context: RawContext) -> Result<RawDeviceList, RawCode> {
        let mut list: *const *mut libusb_device = ptr::null();
        let size = unsafe { libusb_get_device_list(context.0.as_ptr(), &mut list) };
        if size < 0 {
            return Err(RawCode::try_from(size).unwrap_or(LIBUSB_ERROR_OTHER));
        }

        // SAFETY: libusb returned `size` entries (plus a null terminator)
        let entries = unsafe { raw_slice(list, size as usize) }
            .iter()
            .filter_map(|&device| NonNull::new(device).map(RawDevice))
            .collect();
        Ok(RawDeviceList { list, entries })
    }

    fn device_list_entries<'a>(&self, list: &'a RawDeviceList) -> &'a [RawDevice] {
        &list.entries
    }

    fn free_device_list(&self, list: RawDeviceList, unref_devices: bool) {
        if !list.list.is_null() {
            unsafe { libusb_free_device_list(list.list, c_int::from(unref_devices)) }
        }
    }

    fn unref_device(&self, device: RawDevice) {
        unsafe { libusb_unref_device(device.0.as_ptr()) }
    }

    fn get_device_descriptor(&self, device: RawDevice) -> Result<DeviceDescriptor, RawCode> {
        let mut raw = MaybeUninit::<libusb_device_descriptor>::uninit();
        let rc = unsafe { libusb_get_device_descriptor(device.0.as_ptr(), raw.as_mut_ptr()) };
        if rc < 0 {
            return Err(rc);
        }

        // SAFETY: libusb filled the descriptor on success
        let raw = unsafe { raw.assume_init() };
        Ok(DeviceDescriptor {
            length: raw.bLength,
            descriptor_type: raw.bDescriptorType,
            usb_version: raw.bcdUSB,
            class_code: raw.bDeviceClass,
            sub_class_code: raw.bDeviceSubClass,
            protocol_code: raw.bDeviceProtocol,
            max_packet_size_0: raw.bMaxPacketSize0,
            vendor_id: raw.idVendor,
            product_id: raw.idProduct,
            device_version: raw.bcdDevice,
            manufacturer_string_index: raw.iManufacturer,
            product_string_index: raw.iProduct,
            serial_number_string_index: raw.iSerialNumber,
            num_configurations: raw.bNumConfigurations,
        })
    }

    fn get_device_address(&self, device: RawDevice) -> u8 {
        unsafe { libusb_get_device_address(device.0.as_ptr()) }
    }

    fn get_bus_number(&self, device: RawDevice) -> u8 {
        unsafe { libusb_get_bus_number(device.0.as_ptr()) }
    }

    fn open(&self, device: RawDevice) -> Result<RawHandle, RawCode> {
        let mut handle: *mut libusb_device_handle = ptr::null_mut();
        let rc = unsafe { libusb_open(device.0.as_ptr(), &mut handle) };
        if rc < 0 {
            return Err(rc);
        }
        NonNull::new(handle).map(RawHandle).ok_or(LIBUSB_ERROR_OTHER)
    }

    fn close(&self, handle: RawHandle) {
        unsafe { libusb_close(handle.0.as_ptr()) }
    }

    fn get_device(&self, handle: RawHandle) -> Option<RawDevice> {
        NonNull::new(unsafe { libusb_get_device(handle.0.as_ptr()) }).map(RawDevice)
    }

    fn claim_interface(&self, handle: RawHandle, interface_number: u8) -> RawCode {
        unsafe { libusb_claim_interface(handle.0.as_ptr(), c_int::from(interface_number)) }
    }

    fn release_interface(&self, handle: RawHandle, interface_number: u8) -> RawCode {
        unsafe { libusb_release_interface(handle.0.as_ptr(), c_int::from(interface_number)) }
    }

    fn get_config_descriptor_by_value(
        &self,
        device: RawDevice,
        value: u8,
    ) -> Result<RawConfig, RawCode> {
        let mut config: *const libusb_config_descriptor = ptr::null();
        let rc =
            unsafe { libusb_get_config_descriptor_by_value(device.0.as_ptr(), value, &mut config) };
        if rc < 0 {
            return Err(rc);
        }
        NonNull::new(config.cast_mut())
            .map(RawConfig)
            .ok_or(LIBUSB_ERROR_OTHER)
    }

    fn describe_config(&self, config: &RawConfig) -> ConfigDescriptor {
        // SAFETY: the descriptor stays allocated until free_config_descriptor
        let raw = unsafe { config.0.as_ref() };
        let interfaces = unsafe { raw_slice(raw.interface, usize::from(raw.bNumInterfaces)) };

        ConfigDescriptor {
            configuration_value: raw.bConfigurationValue,
            total_length: raw.wTotalLength,
            attributes: raw.bmAttributes,
            max_power: raw.bMaxPower,
            configuration_string_index: raw.iConfiguration,
            interfaces: interfaces
                .iter()
                .map(|interface| {
                    let count = usize::try_from(interface.num_altsetting).unwrap_or(0);
                    let alt_settings = unsafe { raw_slice(interface.altsetting, count) };
                    Interface {
                        alt_settings: alt_settings.iter().map(describe_interface).collect(),
                    }
                })
                .collect(),
        }
    }

    fn free_config_descriptor(&self, config: RawConfig) {
        unsafe { libusb_free_config_descriptor(config.0.as_ptr()) }
    }

    fn get_max_packet_size(&self, device: RawDevice, endpoint: u8) -> RawCode {
        unsafe { libusb_get_max_packet_size(device.0.as_ptr(), endpoint) }
    }

    fn control_transfer(
        &self,
        handle: RawHandle,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &mut [u8],
        timeout_ms: u32,
    ) -> RawCode {
        let length = u16::try_from(data.len()).unwrap_or(u16::MAX);
        unsafe {
            libusb_control_transfer(
                handle.0.as_ptr(),
                request_type,
                request,
                value,
                index,
                data.as_mut_ptr(),
                length,
                timeout_ms,
            )
        }
    }

    fn bulk_transfer(
        &self,
        handle: RawHandle,
        endpoint: u8,
        data: &mut [u8],
        timeout_ms: u32,
    ) -> Result<usize, RawCode> {
        let length = c_int::try_from(data.len()).unwrap_or(c_int::MAX);
        let mut transferred: c_int = 0;
        let rc = unsafe {
            libusb_bulk_transfer(
                handle.0.as_ptr(),
                endpoint,
                data.as_mut_ptr(),
                length,
                &mut transferred,
                timeout_ms,
            )
        };
        if rc < 0 {
            return Err(rc);
        }
        Ok(usize::try_from(transferred).unwrap_or(0))
    }

    fn get_string_descriptor_ascii(&self, handle: RawHandle, index: u8, data: &mut [u8]) -> RawCode {
        let length = c_int::try_from(data.len()).unwrap_or(c_int::MAX);
        unsafe {
            libusb_get_string_descriptor_ascii(handle.0.as_ptr(), index, data.as_mut_ptr(), length)
        }
    }

    fn error_name(&self, code: RawCode) -> &'static str {
        // SAFETY: libusb returns pointers to static, nul-terminated strings
        let name = unsafe { CStr::from_ptr(libusb_error_name(code)) };
        name.to_str().unwrap_or("**UNKNOWN**")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names_match_libusb() {
        for code in [-1, -2, -3, -4, -5, -6, -7, -8, -9, -10, -11, -12, -99] {
            assert_eq!(
                LibusbProvider.error_name(code),
                crate::error::error_name(code),
                "code {}",
                code
            );
        }
        assert_eq!(LibusbProvider.error_name(-42), "**UNKNOWN**");
    }

    #[test]
    fn test_raw_slice_of_null_is_empty() {
        let empty: &[u8] = unsafe { raw_slice(ptr::null(), 4) };
        assert!(empty.is_empty());
    }
}
