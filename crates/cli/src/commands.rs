//! Subcommand implementations
//!
//! Every command takes the context it runs on and the writer it prints to, so
//! the same code runs against libusb and against the in-memory provider.

use anyhow::{Context as _, Result, bail};
use common::DeviceSelector;
use serde::Serialize;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, info, warn};
use usbrc::{
    Context, ControlRequest, DEFAULT_CONFIGURATION_VALUE, Device, DeviceDescriptor, Handle,
    Provider,
};

/// One line of `usbrc list`
#[derive(Debug, Serialize)]
pub struct DeviceSummary {
    pub bus_number: u8,
    pub address: u8,
    pub descriptor: DeviceDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl DeviceSummary {
    fn read<P: Provider>(device: &Device<P>) -> usbrc::Result<Self> {
        let descriptor = device.device_descriptor()?;
        let serial_number = descriptor
            .serial_number_string_index()
            .and_then(|index| match read_string(device, index) {
                Ok(serial) => Some(serial),
                Err(e) => {
                    debug!("No serial number for {:?}: {}", device, e);
                    None
                }
            });

        Ok(Self {
            bus_number: device.bus_number()?,
            address: device.address()?,
            descriptor,
            serial_number,
        })
    }
}

fn read_string<P: Provider>(device: &Device<P>, index: u8) -> usbrc::Result<String> {
    device.open()?.string_descriptor_ascii(index)
}

/// Hex bytes separated by spaces
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn find_device<P: Provider>(context: &Context<P>, selector: &DeviceSelector) -> Result<Device<P>> {
    let devices = context
        .device_list()
        .context("Failed to enumerate USB devices")?;
    Ok(selector.find(&devices)?)
}

fn open_device<P: Provider>(
    context: &Context<P>,
    selector: &DeviceSelector,
    interface: Option<u8>,
) -> Result<Handle<P>> {
    let device = find_device(context, selector)?;
    let handle = device
        .open()
        .with_context(|| format!("Failed to open device {}", selector))?;

    if let Some(interface) = interface {
        handle
            .claim_interface(interface)
            .with_context(|| format!("Failed to claim interface {} on {}", interface, selector))?;
    }
    Ok(handle)
}

/// Print every attached device
///
/// A device whose descriptor cannot be read is logged and skipped.
pub fn list<P: Provider>(
    context: &Context<P>,
    json: bool,
    verbose: bool,
    out: &mut impl Write,
) -> Result<()> {
    let devices = context
        .device_list()
        .context("Failed to enumerate USB devices")?;

    let mut summaries = Vec::with_capacity(devices.len());
    for device in &devices {
        match DeviceSummary::read(device) {
            Ok(summary) => summaries.push((device, summary)),
            Err(e) => warn!("Skipping device {:?}: {}", device, e),
        }
    }

    if json {
        let list: Vec<&DeviceSummary> = summaries.iter().map(|(_, summary)| summary).collect();
        serde_json::to_writer_pretty(&mut *out, &list).context("Failed to write JSON")?;
        writeln!(out)?;
        return Ok(());
    }

    for (device, summary) in &summaries {
        write!(
            out,
            "Bus {:03} Device {:03}: {}",
            summary.bus_number, summary.address, summary.descriptor
        )?;
        if let Some(serial) = &summary.serial_number {
            write!(out, ", serial={}", serial)?;
        }
        writeln!(out)?;

        if verbose {
            match device.config_descriptor(DEFAULT_CONFIGURATION_VALUE) {
                Ok(config) => write!(out, "{}", config)?,
                Err(e) => warn!("No configuration for {:?}: {}", device, e),
            }
        }
    }
    Ok(())
}

/// Print the configuration whose `bConfigurationValue` is `value`
pub fn show_config<P: Provider>(
    context: &Context<P>,
    selector: &DeviceSelector,
    value: u8,
    out: &mut impl Write,
) -> Result<()> {
    let device = find_device(context, selector)?;
    let config = device
        .config_descriptor(value)
        .with_context(|| format!("Failed to read configuration {} of {}", value, selector))?;
    write!(out, "{}", config)?;
    Ok(())
}

/// Setup stage and payload of `usbrc control`
#[derive(Debug, Clone)]
pub struct ControlParams {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    /// Interface to claim first, if any
    pub interface: Option<u8>,
    /// Bytes to send on OUT requests
    pub data: Vec<u8>,
    /// Bytes to read on IN requests
    pub length: u16,
}

pub fn control<P: Provider>(
    context: &Context<P>,
    selector: &DeviceSelector,
    params: &ControlParams,
    timeout: Duration,
    out: &mut impl Write,
) -> Result<()> {
    let handle = open_device(context, selector, params.interface)?;

    let is_in = params.request_type & 0x80 != 0;
    let mut buffer = if is_in {
        vec![0u8; usize::from(params.length)]
    } else {
        params.data.clone()
    };

    let mut request = ControlRequest::new(
        params.request_type,
        params.request,
        params.value,
        params.index,
        &mut buffer,
    );
    let transferred = handle
        .control_transfer(&mut request, timeout)
        .context("Control transfer failed")?;

    if is_in {
        writeln!(out, "{}", format_hex(&buffer[..transferred]))?;
    } else {
        writeln!(out, "{} bytes sent", transferred)?;
    }
    Ok(())
}

/// Direction and payload of `usbrc bulk`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOp {
    Read(usize),
    Write(Vec<u8>),
}

pub fn bulk<P: Provider>(
    context: &Context<P>,
    selector: &DeviceSelector,
    interface: u8,
    endpoint: u8,
    op: &BulkOp,
    timeout: Duration,
    out: &mut impl Write,
) -> Result<()> {
    let is_in = endpoint & 0x80 != 0;
    match op {
        BulkOp::Read(_) if !is_in => bail!("Endpoint {:#04x} is not an IN endpoint", endpoint),
        BulkOp::Write(_) if is_in => bail!("Endpoint {:#04x} is not an OUT endpoint", endpoint),
        _ => {}
    }

    let handle = open_device(context, selector, Some(interface))?;

    match op {
        BulkOp::Read(length) => {
            let mut buffer = vec![0u8; *length];
            let transferred = handle
                .bulk_transfer(endpoint, &mut buffer, timeout)
                .context("Bulk read failed")?;
            info!("Read {} of {} bytes from {:#04x}", transferred, length, endpoint);
            writeln!(out, "{}", format_hex(&buffer[..transferred]))?;
        }
        BulkOp::Write(data) => {
            let mut buffer = data.clone();
            let transferred = handle
                .bulk_transfer(endpoint, &mut buffer, timeout)
                .context("Bulk write failed")?;
            if transferred < data.len() {
                warn!("Short write: {} of {} bytes", transferred, data.len());
            }
            writeln!(out, "{} bytes sent", transferred)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use usbrc::test_utils::{Call, FakeDevice, FakeOp, FakeProvider};

    fn setup(devices: Vec<FakeDevice>) -> (FakeProvider, Context<FakeProvider>) {
        let fake = FakeProvider::with_devices(devices);
        let context = Context::init(fake.clone(), 0).unwrap();
        (fake, context)
    }

    fn run(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn selector() -> DeviceSelector {
        DeviceSelector::parse_id("1209:0001").unwrap()
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0x12, 0x01, 0xff]), "12 01 ff");
        assert_eq!(format_hex(&[]), "");
    }

    #[test]
    fn test_list_text() {
        let (fake, context) = setup(vec![
            FakeDevice::new(0x1209, 0x0001)
                .with_location(1, 4)
                .with_string(3, "SN-1"),
            FakeDevice::new(0x046d, 0xc52b).with_location(2, 7),
        ]);

        let output = run(|out| list(&context, false, false, out));
        assert_eq!(
            output,
            "Bus 001 Device 004: dev: cls=0xff, subcls=0x0, proto=0x0, vid=0x1209, pid=0x0001, serial=SN-1\n\
             Bus 002 Device 007: dev: cls=0xff, subcls=0x0, proto=0x0, vid=0x046d, pid=0xc52b\n"
        );
        assert_eq!(fake.open_handles(), 0);
    }

    #[test]
    fn test_list_survives_unreadable_serial() {
        let (fake, context) = setup(vec![FakeDevice::new(0x1209, 0x0001).with_string(3, "SN-1")]);
        fake.fail(FakeOp::Open, -3);

        let output = run(|out| list(&context, false, false, out));
        assert!(output.ends_with("pid=0x0001\n"));
    }

    #[test]
    fn test_list_skips_unreadable_devices() {
        let (fake, context) = setup(vec![FakeDevice::new(0x1209, 0x0001)]);
        fake.fail(FakeOp::GetDeviceDescriptor, -1);

        let output = run(|out| list(&context, false, false, out));
        assert!(output.is_empty());
    }

    #[test]
    fn test_list_json() {
        let (_fake, context) = setup(vec![FakeDevice::new(0x1209, 0x0001).with_location(3, 9)]);

        let output = run(|out| list(&context, true, false, out));
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value[0]["bus_number"], 3);
        assert_eq!(value[0]["address"], 9);
        assert_eq!(value[0]["descriptor"]["vendor_id"], 0x1209);
        assert!(value[0].get("serial_number").is_none());
    }

    #[test]
    fn test_list_verbose_prints_configuration() {
        let (fake, context) = setup(vec![FakeDevice::new(0x1209, 0x0001)]);

        let output = run(|out| list(&context, false, true, out));
        assert!(output.contains("config: val=1, len=32\n"));
        assert!(output.contains("ep: address=0x81, attrib=0x2, mps=512\n"));
        assert_eq!(fake.outstanding_configs(), 0);
    }

    #[test]
    fn test_show_config_unknown_value() {
        let (_fake, context) = setup(vec![FakeDevice::new(0x1209, 0x0001)]);
        let mut out = Vec::new();

        let err = show_config(&context, &selector(), 7, &mut out).unwrap_err();
        assert!(format!("{:#}", err).contains("LIBUSB_ERROR_NOT_FOUND"));
    }

    #[test]
    fn test_control_in() {
        let (fake, context) = setup(vec![FakeDevice::new(0x1209, 0x0001)]);
        fake.set_control_response(&[0x12, 0x01]);

        let params = ControlParams {
            request_type: 0x80,
            request: 0x06,
            value: 0x0100,
            index: 0,
            interface: None,
            data: Vec::new(),
            length: 18,
        };
        let output = run(|out| control(&context, &selector(), &params, Duration::ZERO, out));
        assert_eq!(output, "12 01\n");
        assert_eq!(fake.count(|c| matches!(c, Call::ClaimInterface(..))), 0);
    }

    #[test]
    fn test_control_out_claims_interface() {
        let (fake, context) = setup(vec![FakeDevice::new(0x1209, 0x0001)]);

        let params = ControlParams {
            request_type: 0x41,
            request: 0x01,
            value: 0,
            index: 0,
            interface: Some(0),
            data: vec![1, 2, 3],
            length: 0,
        };
        let output = run(|out| control(&context, &selector(), &params, Duration::ZERO, out));
        assert_eq!(output, "3 bytes sent\n");
        assert_eq!(fake.last_control_out(), vec![1, 2, 3]);
        assert_eq!(fake.count(|c| matches!(c, Call::ReleaseInterface(_, 0))), 1);
    }

    #[test]
    fn test_bulk_read() {
        let (fake, context) = setup(vec![FakeDevice::new(0x1209, 0x0001)]);
        fake.set_bulk_actual_length(4);

        let output = run(|out| {
            bulk(
                &context,
                &selector(),
                0,
                0x81,
                &BulkOp::Read(64),
                Duration::from_millis(100),
                out,
            )
        });
        assert_eq!(output, "00 01 02 03\n");
        assert_eq!(fake.open_handles(), 0);
    }

    #[test]
    fn test_bulk_direction_mismatch() {
        let (fake, context) = setup(vec![FakeDevice::new(0x1209, 0x0001)]);
        fake.clear_calls();
        let mut out = Vec::new();

        let result = bulk(
            &context,
            &selector(),
            0,
            0x02,
            &BulkOp::Read(8),
            Duration::ZERO,
            &mut out,
        );
        assert!(result.is_err());
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn test_missing_device() {
        let (_fake, context) = setup(vec![FakeDevice::new(0x1209, 0x0001)]);
        let selector = DeviceSelector::parse_location("9:9").unwrap();
        let mut out = Vec::new();

        let err = show_config(&context, &selector, 1, &mut out).unwrap_err();
        assert_eq!(err.to_string(), "No device matches 009:009");
    }
}
