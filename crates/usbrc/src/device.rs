//! Device enumeration and descriptor queries

use crate::context::{Context, ContextInner};
use crate::descriptor::{ConfigurationDescriptor, DeviceDescriptor};
use crate::error::{self, Error, Result};
use crate::provider::Provider;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub(crate) struct DeviceInner<P: Provider> {
    context: Arc<ContextInner<P>>,
    raw: P::Device,
}

impl<P: Provider> DeviceInner<P> {
    pub(crate) fn provider(&self) -> &P {
        self.context.provider()
    }

    pub(crate) fn raw(&self) -> P::Device {
        self.raw
    }
}

impl<P: Provider> Drop for DeviceInner<P> {
    fn drop(&mut self) {
        self.context.provider().unref_device(self.raw);
    }
}

/// Shared reference to a USB device that is not necessarily open
///
/// Every clone keeps the device, and the context it was enumerated from, alive.
/// `Device::default()` is a null reference.
pub struct Device<P: Provider> {
    inner: Option<Arc<DeviceInner<P>>>,
}

impl<P: Provider> Context<P> {
    /// Enumerate the devices currently attached, in provider order
    ///
    /// Each call returns fresh references; earlier ones stay valid.
    pub fn device_list(&self) -> Result<Vec<Device<P>>> {
        let context = self.inner()?;
        let provider = context.provider();

        let list = provider
            .get_device_list(context.raw())
            .map_err(|code| error::translate(provider, "libusb_get_device_list", code))?;

        // The list's reference on each entry moves into the wrapper
        let devices: Vec<Device<P>> = provider
            .device_list_entries(&list)
            .iter()
            .map(|&raw| Device {
                inner: Some(Arc::new(DeviceInner {
                    context: Arc::clone(context),
                    raw,
                })),
            })
            .collect();
        provider.free_device_list(list, false);

        debug!("Enumerated {} USB devices", devices.len());
        Ok(devices)
    }
}

impl<P: Provider> Device<P> {
    pub fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    pub(crate) fn inner(&self) -> Result<&Arc<DeviceInner<P>>> {
        self.inner
            .as_ref()
            .ok_or_else(|| Error::invalid("invalid reference to a device"))
    }

    pub(crate) fn from_inner(inner: Arc<DeviceInner<P>>) -> Self {
        Self { inner: Some(inner) }
    }

    /// The context this device was enumerated from
    pub fn context(&self) -> Context<P> {
        match &self.inner {
            Some(inner) => Context::from_inner(Arc::clone(&inner.context)),
            None => Context::default(),
        }
    }

    pub fn device_descriptor(&self) -> Result<DeviceDescriptor> {
        let device = self.inner()?;
        let provider = device.provider();
        provider
            .get_device_descriptor(device.raw)
            .map_err(|code| error::translate(provider, "libusb_get_device_descriptor", code))
    }

    pub fn vendor_id(&self) -> Result<u16> {
        Ok(self.device_descriptor()?.vendor_id)
    }

    pub fn product_id(&self) -> Result<u16> {
        Ok(self.device_descriptor()?.product_id)
    }

    /// Address on the bus; only fails for a null reference
    pub fn address(&self) -> Result<u8> {
        let device = self.inner()?;
        Ok(device.provider().get_device_address(device.raw))
    }

    pub fn bus_number(&self) -> Result<u8> {
        let device = self.inner()?;
        Ok(device.provider().get_bus_number(device.raw))
    }

    /// Look up a configuration by its `bConfigurationValue` (not its index)
    pub fn config_descriptor(&self, value: u8) -> Result<ConfigurationDescriptor<P>> {
        let device = self.inner()?;
        let provider = device.provider();
        let raw = provider
            .get_config_descriptor_by_value(device.raw, value)
            .map_err(|code| {
                error::translate(provider, "libusb_get_config_descriptor_by_value", code)
            })?;
        Ok(ConfigurationDescriptor::new(Arc::clone(device), raw))
    }

    /// Max packet size of `endpoint` in the active configuration
    pub fn max_packet_size(&self, endpoint: u8) -> Result<u32> {
        let device = self.inner()?;
        max_packet_size(device.provider(), device.raw, endpoint)
    }
}

pub(crate) fn max_packet_size<P: Provider>(
    provider: &P,
    device: P::Device,
    endpoint: u8,
) -> Result<u32> {
    let rc = provider.get_max_packet_size(device, endpoint);
    error::check(provider, "libusb_get_max_packet_size", rc)
}

impl<P: Provider> Clone for Device<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Provider> Default for Device<P> {
    fn default() -> Self {
        Self { inner: None }
    }
}

impl<P: Provider> fmt::Debug for Device<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f.debug_tuple("Device").field(&inner.raw).finish(),
            None => f.write_str("Device(null)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Call, FakeDevice, FakeOp, FakeProvider};

    fn context_with(devices: Vec<FakeDevice>) -> (FakeProvider, Context<FakeProvider>) {
        let fake = FakeProvider::with_devices(devices);
        let context = Context::init(fake.clone(), 0).unwrap();
        fake.clear_calls();
        (fake, context)
    }

    #[test]
    fn test_device_list_preserves_order() {
        let (_fake, context) = context_with(vec![
            FakeDevice::new(0x1234, 0x0001),
            FakeDevice::new(0x1234, 0x0002),
            FakeDevice::new(0xabcd, 0x0003),
        ]);

        let devices = context.device_list().unwrap();
        let ids: Vec<(u16, u16)> = devices
            .iter()
            .map(|d| (d.vendor_id().unwrap(), d.product_id().unwrap()))
            .collect();
        assert_eq!(
            ids,
            vec![(0x1234, 0x0001), (0x1234, 0x0002), (0xabcd, 0x0003)]
        );
    }

    #[test]
    fn test_device_list_frees_list_without_unref() {
        let (fake, context) = context_with(vec![FakeDevice::new(1, 1), FakeDevice::new(1, 2)]);

        let devices = context.device_list().unwrap();
        assert_eq!(
            fake.calls(),
            vec![
                Call::GetDeviceList,
                Call::FreeDeviceList {
                    unref_devices: false
                }
            ]
        );
        assert_eq!(fake.outstanding_device_refs(), 2);

        drop(devices);
        assert_eq!(fake.outstanding_device_refs(), 0);
        assert_eq!(fake.count(|c| matches!(c, Call::UnrefDevice(_))), 2);
    }

    #[test]
    fn test_device_list_failure() {
        let (fake, context) = context_with(vec![FakeDevice::new(1, 1)]);
        fake.fail(FakeOp::GetDeviceList, -11);

        let err = context.device_list().unwrap_err();
        assert_eq!(
            err.to_string(),
            "libusb_get_device_list: failed with -11 (LIBUSB_ERROR_NO_MEM)"
        );
        assert_eq!(fake.outstanding_device_refs(), 0);
    }

    #[test]
    fn test_device_list_on_null_context() {
        let context = Context::<FakeProvider>::default();
        assert!(matches!(
            context.device_list(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_address_and_bus() {
        let (_fake, context) =
            context_with(vec![FakeDevice::new(1, 1).with_location(3, 17)]);
        let device = &context.device_list().unwrap()[0];
        assert_eq!(device.bus_number().unwrap(), 3);
        assert_eq!(device.address().unwrap(), 17);
    }

    #[test]
    fn test_vendor_id_uses_descriptor_call() {
        let (fake, context) = context_with(vec![FakeDevice::new(0x046d, 0xc52b)]);
        let device = context.device_list().unwrap().remove(0);
        fake.clear_calls();

        assert_eq!(device.vendor_id().unwrap(), 0x046d);
        assert_eq!(fake.calls(), vec![Call::GetDeviceDescriptor(0)]);
    }

    #[test]
    fn test_descriptor_failure() {
        let (fake, context) = context_with(vec![FakeDevice::new(1, 1)]);
        let device = context.device_list().unwrap().remove(0);
        fake.fail(FakeOp::GetDeviceDescriptor, -4);

        let err = device.product_id().unwrap_err();
        assert_eq!(
            err.provider_error().map(|e| e.kind()),
            Some(rusb::Error::NoDevice)
        );
    }

    #[test]
    fn test_max_packet_size_translates_errors() {
        let (fake, context) =
            context_with(vec![FakeDevice::new(1, 1).with_max_packet_size(0x81, 512)]);
        let device = context.device_list().unwrap().remove(0);

        assert_eq!(device.max_packet_size(0x81).unwrap(), 512);

        let err = device.max_packet_size(0x02).unwrap_err();
        assert_eq!(
            err.to_string(),
            "libusb_get_max_packet_size: failed with -5 (LIBUSB_ERROR_NOT_FOUND)"
        );
        assert_eq!(fake.count(|c| matches!(c, Call::GetMaxPacketSize(..))), 2);
    }

    #[test]
    fn test_null_device_makes_no_provider_calls() {
        let (fake, _context) = context_with(vec![FakeDevice::new(1, 1)]);
        let device = Device::<FakeProvider>::default();

        assert!(device.is_null());
        assert!(matches!(
            device.device_descriptor(),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(device.address(), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            device.config_descriptor(1),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            device.max_packet_size(0x81),
            Err(Error::InvalidArgument(_))
        ));
        assert!(device.context().is_null());
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn test_config_descriptor_freed_once() {
        let (fake, context) = context_with(vec![FakeDevice::new(1, 1)]);
        let device = context.device_list().unwrap().remove(0);

        let config = device.config_descriptor(1).unwrap();
        assert_eq!(config.configuration_value, 1);
        assert_eq!(fake.outstanding_configs(), 1);

        drop(config);
        assert_eq!(fake.outstanding_configs(), 0);
        assert_eq!(
            fake.count(|c| matches!(c, Call::FreeConfigDescriptor(..))),
            1
        );
    }

    #[test]
    fn test_config_descriptor_by_value_not_index() {
        let (fake, context) = context_with(vec![FakeDevice::new(1, 1)]);
        let device = context.device_list().unwrap().remove(0);

        let err = device.config_descriptor(2).unwrap_err();
        assert_eq!(
            err.provider_error().map(|e| e.name()),
            Some("LIBUSB_ERROR_NOT_FOUND")
        );
        assert_eq!(fake.outstanding_configs(), 0);
    }
}
