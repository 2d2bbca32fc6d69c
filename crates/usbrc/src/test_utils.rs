//! Test utilities for usbrc
//!
//! [`FakeProvider`] is an in-memory [`Provider`]: a small device tree, an
//! ordered log of every provider call, failure injection per operation, and
//! counters for outstanding references so tests can assert that each resource
//! is released exactly once.
//!
//! # Example
//!
//! ```
//! use usbrc::Context;
//! use usbrc::test_utils::{Call, FakeDevice, FakeProvider};
//!
//! let fake = FakeProvider::with_devices(vec![FakeDevice::new(0x1209, 0x0001)]);
//! let context = Context::init(fake.clone(), 0).unwrap();
//! let handle = context.device_list().unwrap()[0].open().unwrap();
//! drop(handle);
//! assert_eq!(fake.count(|c| matches!(c, Call::Close(_))), 1);
//! ```

use crate::descriptor::{
    ConfigDescriptor, DeviceDescriptor, EndpointDescriptor, Interface, InterfaceDescriptor,
};
use crate::provider::{Provider, RawCode};
use rusb::ffi::constants::{
    LIBUSB_ERROR_INVALID_PARAM, LIBUSB_ERROR_NOT_FOUND, LIBUSB_ERROR_PIPE,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Init,
    SetLogLevel(i32),
    Exit,
    GetDeviceList,
    FreeDeviceList {
        unref_devices: bool,
    },
    UnrefDevice(u32),
    GetDeviceDescriptor(u32),
    GetDeviceAddress(u32),
    GetBusNumber(u32),
    Open(u32),
    Close(u32),
    GetDevice(u32),
    ClaimInterface(u32, u8),
    ReleaseInterface(u32, u8),
    GetConfigDescriptor(u32, u8),
    FreeConfigDescriptor(u32, u8),
    GetMaxPacketSize(u32, u8),
    ControlTransfer {
        handle: u32,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        length: usize,
        timeout_ms: u32,
    },
    BulkTransfer {
        handle: u32,
        endpoint: u8,
        length: usize,
        timeout_ms: u32,
    },
    GetStringDescriptor(u32, u8),
}

/// Operations that can be made to fail with [`FakeProvider::fail`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    Init,
    SetLogLevel,
    GetDeviceList,
    GetDeviceDescriptor,
    Open,
    /// Makes `get_device` report an unresolvable handle; the code is ignored
    GetDevice,
    ClaimInterface,
    ReleaseInterface,
    GetConfigDescriptor,
    GetMaxPacketSize,
    ControlTransfer,
    BulkTransfer,
    GetStringDescriptor,
}

/// A simulated device
#[derive(Debug, Clone)]
pub struct FakeDevice {
    descriptor: DeviceDescriptor,
    bus_number: u8,
    address: u8,
    configs: Vec<ConfigDescriptor>,
    max_packet_sizes: HashMap<u8, u16>,
    strings: HashMap<u8, String>,
}

impl FakeDevice {
    /// A vendor-specific device with configuration 1: interface 0 with bulk
    /// endpoints 0x81 and 0x02
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            descriptor: DeviceDescriptor {
                length: 18,
                descriptor_type: 1,
                usb_version: 0x0200,
                class_code: 0xff,
                max_packet_size_0: 64,
                vendor_id,
                product_id,
                num_configurations: 1,
                ..Default::default()
            },
            bus_number: 1,
            address: 1,
            configs: vec![bulk_config(1)],
            max_packet_sizes: HashMap::new(),
            strings: HashMap::new(),
        }
    }

    pub fn with_location(mut self, bus_number: u8, address: u8) -> Self {
        self.bus_number = bus_number;
        self.address = address;
        self
    }

    pub fn with_max_packet_size(mut self, endpoint: u8, size: u16) -> Self {
        self.max_packet_sizes.insert(endpoint, size);
        self
    }

    /// Add string descriptor `index`; sets the serial number index if unset
    pub fn with_string(mut self, index: u8, value: &str) -> Self {
        if self.descriptor.serial_number_string_index == 0 {
            self.descriptor.serial_number_string_index = index;
        }
        self.strings.insert(index, value.to_string());
        self
    }

    pub fn with_config(mut self, config: ConfigDescriptor) -> Self {
        self.configs.push(config);
        self.descriptor.num_configurations = self.configs.len() as u8;
        self
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }
}

fn bulk_config(value: u8) -> ConfigDescriptor {
    let endpoint = |address| EndpointDescriptor {
        address,
        attributes: 0x02,
        max_packet_size: 512,
        interval: 0,
    };
    ConfigDescriptor {
        configuration_value: value,
        total_length: 32,
        attributes: 0x80,
        max_power: 50,
        configuration_string_index: 0,
        interfaces: vec![Interface {
            alt_settings: vec![InterfaceDescriptor {
                interface_number: 0,
                alternate_setting: 0,
                class_code: 0xff,
                sub_class_code: 0,
                protocol_code: 0,
                interface_string_index: 0,
                endpoints: vec![endpoint(0x81), endpoint(0x02)],
            }],
        }],
    }
}

/// Raw configuration descriptor handed out by [`FakeProvider`]
#[derive(Debug, PartialEq, Eq)]
pub struct FakeConfig {
    device: u32,
    value: u8,
}

#[derive(Debug, Default)]
struct FakeState {
    devices: Vec<FakeDevice>,
    device_refs: Vec<usize>,
    calls: Vec<Call>,
    failures: HashMap<FakeOp, RawCode>,
    next_context: u32,
    live_contexts: usize,
    next_handle: u32,
    handles: HashMap<u32, u32>,
    live_configs: usize,
    bulk_actual_length: Option<usize>,
    last_bulk_out: Vec<u8>,
    control_response: Option<Vec<u8>>,
    last_control_out: Vec<u8>,
}

impl FakeState {
    fn failure(&self, op: FakeOp) -> Option<RawCode> {
        self.failures.get(&op).copied()
    }
}

/// Cloneable handle on a shared fake device tree
#[derive(Debug, Clone, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<FakeDevice>) -> Self {
        let fake = Self::new();
        for device in devices {
            fake.add_device(device);
        }
        fake
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_device(&self, device: FakeDevice) {
        let mut state = self.state();
        state.devices.push(device);
        state.device_refs.push(0);
    }

    /// Make `op` fail with `code` until [`FakeProvider::clear_failure`]
    pub fn fail(&self, op: FakeOp, code: RawCode) {
        self.state().failures.insert(op, code);
    }

    pub fn clear_failure(&self, op: FakeOp) {
        self.state().failures.remove(&op);
    }

    /// Report at most `length` bytes per bulk transfer
    pub fn set_bulk_actual_length(&self, length: usize) {
        self.state().bulk_actual_length = Some(length);
    }

    /// Reply sent to IN control requests
    pub fn set_control_response(&self, data: &[u8]) {
        self.state().control_response = Some(data.to_vec());
    }

    pub fn last_bulk_out(&self) -> Vec<u8> {
        self.state().last_bulk_out.clone()
    }

    pub fn last_control_out(&self) -> Vec<u8> {
        self.state().last_control_out.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|call| predicate(call)).count()
    }

    pub fn outstanding_device_refs(&self) -> usize {
        self.state().device_refs.iter().sum()
    }

    pub fn open_handles(&self) -> usize {
        self.state().handles.len()
    }

    pub fn outstanding_configs(&self) -> usize {
        self.state().live_configs
    }

    pub fn live_contexts(&self) -> usize {
        self.state().live_contexts
    }

    fn record(&self, call: Call) -> MutexGuard<'_, FakeState> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }
}

impl Provider for FakeProvider {
    type Context = u32;
    type Device = u32;
    type Handle = u32;
    type Config = FakeConfig;
    type DeviceList = Vec<u32>;

    fn init(&self) -> Result<u32, RawCode> {
        let mut state = self.record(Call::Init);
        if let Some(code) = state.failure(FakeOp::Init) {
            return Err(code);
        }
        let context = state.next_context;
        state.next_context += 1;
        state.live_contexts += 1;
        Ok(context)
    }

    fn set_log_level(&self, _context: u32, level: i32) -> RawCode {
        let state = self.record(Call::SetLogLevel(level));
        state.failure(FakeOp::SetLogLevel).unwrap_or(0)
    }

    fn exit(&self, _context: u32) {
        let mut state = self.record(Call::Exit);
        assert!(state.live_contexts > 0, "context torn down twice");
        state.live_contexts -= 1;
    }

    fn get_device_list(&self, _context: u32) -> Result<Vec<u32>, RawCode> {
        let mut state = self.record(Call::GetDeviceList);
        if let Some(code) = state.failure(FakeOp::GetDeviceList) {
            return Err(code);
        }
        for refs in state.device_refs.iter_mut() {
            *refs += 1;
        }
        Ok((0..state.devices.len() as u32).collect())
    }

    fn device_list_entries<'a>(&self, list: &'a Vec<u32>) -> &'a [u32] {
        list
    }

    fn free_device_list(&self, list: Vec<u32>, unref_devices: bool) {
        let mut state = self.record(Call::FreeDeviceList { unref_devices });
        if unref_devices {
            for device in list {
                state.device_refs[device as usize] -= 1;
            }
        }
    }

    fn unref_device(&self, device: u32) {
        let mut state = self.record(Call::UnrefDevice(device));
        let refs = &mut state.device_refs[device as usize];
        assert!(*refs > 0, "device {} unreferenced too often", device);
        *refs -= 1;
    }

    fn get_device_descriptor(&self, device: u32) -> Result<DeviceDescriptor, RawCode> {
        let state = self.record(Call::GetDeviceDescriptor(device));
        if let Some(code) = state.failure(FakeOp::GetDeviceDescriptor) {
            return Err(code);
        }
        Ok(state.devices[device as usize].descriptor)
    }

    fn get_device_address(&self, device: u32) -> u8 {
        let state = self.record(Call::GetDeviceAddress(device));
        state.devices[device as usize].address
    }

    fn get_bus_number(&self, device: u32) -> u8 {
        let state = self.record(Call::GetBusNumber(device));
        state.devices[device as usize].bus_number
    }

    fn open(&self, device: u32) -> Result<u32, RawCode> {
        let mut state = self.record(Call::Open(device));
        if let Some(code) = state.failure(FakeOp::Open) {
            return Err(code);
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        state.handles.insert(handle, device);
        Ok(handle)
    }

    fn close(&self, handle: u32) {
        let mut state = self.record(Call::Close(handle));
        assert!(
            state.handles.remove(&handle).is_some(),
            "handle {} closed twice",
            handle
        );
    }

    fn get_device(&self, handle: u32) -> Option<u32> {
        let state = self.record(Call::GetDevice(handle));
        if state.failure(FakeOp::GetDevice).is_some() {
            return None;
        }
        state.handles.get(&handle).copied()
    }

    fn claim_interface(&self, handle: u32, interface_number: u8) -> RawCode {
        let state = self.record(Call::ClaimInterface(handle, interface_number));
        state.failure(FakeOp::ClaimInterface).unwrap_or(0)
    }

    fn release_interface(&self, handle: u32, interface_number: u8) -> RawCode {
        let state = self.record(Call::ReleaseInterface(handle, interface_number));
        state.failure(FakeOp::ReleaseInterface).unwrap_or(0)
    }

    fn get_config_descriptor_by_value(&self, device: u32, value: u8) -> Result<FakeConfig, RawCode> {
        let mut state = self.record(Call::GetConfigDescriptor(device, value));
        if let Some(code) = state.failure(FakeOp::GetConfigDescriptor) {
            return Err(code);
        }
        let exists = state.devices[device as usize]
            .configs
            .iter()
            .any(|config| config.configuration_value == value);
        if !exists {
            return Err(LIBUSB_ERROR_NOT_FOUND);
        }
        state.live_configs += 1;
        Ok(FakeConfig { device, value })
    }

    fn describe_config(&self, config: &FakeConfig) -> ConfigDescriptor {
        let state = self.state();
        state.devices[config.device as usize]
            .configs
            .iter()
            .find(|c| c.configuration_value == config.value)
            .cloned()
            .unwrap_or_default()
    }

    fn free_config_descriptor(&self, config: FakeConfig) {
        let mut state = self.record(Call::FreeConfigDescriptor(config.device, config.value));
        assert!(state.live_configs > 0, "configuration descriptor freed twice");
        state.live_configs -= 1;
    }

    fn get_max_packet_size(&self, device: u32, endpoint: u8) -> RawCode {
        let state = self.record(Call::GetMaxPacketSize(device, endpoint));
        if let Some(code) = state.failure(FakeOp::GetMaxPacketSize) {
            return code;
        }
        state.devices[device as usize]
            .max_packet_sizes
            .get(&endpoint)
            .map_or(LIBUSB_ERROR_NOT_FOUND, |&size| RawCode::from(size))
    }

    fn control_transfer(
        &self,
        handle: u32,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &mut [u8],
        timeout_ms: u32,
    ) -> RawCode {
        let mut state = self.record(Call::ControlTransfer {
            handle,
            request_type,
            request,
            value,
            index,
            length: data.len(),
            timeout_ms,
        });
        if let Some(code) = state.failure(FakeOp::ControlTransfer) {
            return code;
        }

        if request_type & 0x80 != 0 {
            let response = state.control_response.clone().unwrap_or_default();
            let len = response.len().min(data.len());
            data[..len].copy_from_slice(&response[..len]);
            len as RawCode
        } else {
            state.last_control_out = data.to_vec();
            data.len() as RawCode
        }
    }

    fn bulk_transfer(
        &self,
        handle: u32,
        endpoint: u8,
        data: &mut [u8],
        timeout_ms: u32,
    ) -> Result<usize, RawCode> {
        let mut state = self.record(Call::BulkTransfer {
            handle,
            endpoint,
            length: data.len(),
            timeout_ms,
        });
        if let Some(code) = state.failure(FakeOp::BulkTransfer) {
            return Err(code);
        }

        let actual = state
            .bulk_actual_length
            .map_or(data.len(), |limit| limit.min(data.len()));
        if endpoint & 0x80 != 0 {
            for (i, byte) in data[..actual].iter_mut().enumerate() {
                *byte = i as u8;
            }
        } else {
            state.last_bulk_out = data[..actual].to_vec();
        }
        Ok(actual)
    }

    fn get_string_descriptor_ascii(&self, handle: u32, index: u8, data: &mut [u8]) -> RawCode {
        let state = self.record(Call::GetStringDescriptor(handle, index));
        if let Some(code) = state.failure(FakeOp::GetStringDescriptor) {
            return code;
        }
        let Some(&device) = state.handles.get(&handle) else {
            return LIBUSB_ERROR_INVALID_PARAM;
        };
        match state.devices[device as usize].strings.get(&index) {
            Some(value) => {
                let len = value.len().min(data.len());
                data[..len].copy_from_slice(&value.as_bytes()[..len]);
                len as RawCode
            }
            None => LIBUSB_ERROR_PIPE,
        }
    }
}
