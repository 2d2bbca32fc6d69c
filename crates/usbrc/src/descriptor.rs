//! USB descriptor types
//!
//! Plain-data snapshots of what the provider reports. The owned
//! [`ConfigurationDescriptor`] wrapper keeps the provider's raw descriptor alive
//! next to its decoded topology and frees it on drop.

use crate::device::DeviceInner;
use crate::provider::Provider;
use serde::Serialize;
use std::ops::Deref;
use std::sync::Arc;
use tracing::debug;

/// The configuration value most devices expose first
pub const DEFAULT_CONFIGURATION_VALUE: u8 = 1;

/// Standard device descriptor (USB 2.0 §9.6.1)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    /// BCD-encoded USB specification release
    pub usb_version: u16,
    pub class_code: u8,
    pub sub_class_code: u8,
    pub protocol_code: u8,
    /// Max packet size of endpoint zero
    pub max_packet_size_0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// BCD-encoded device release
    pub device_version: u16,
    pub manufacturer_string_index: u8,
    pub product_string_index: u8,
    pub serial_number_string_index: u8,
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    pub fn manufacturer_string_index(&self) -> Option<u8> {
        non_zero(self.manufacturer_string_index)
    }

    pub fn product_string_index(&self) -> Option<u8> {
        non_zero(self.product_string_index)
    }

    pub fn serial_number_string_index(&self) -> Option<u8> {
        non_zero(self.serial_number_string_index)
    }
}

fn non_zero(index: u8) -> Option<u8> {
    (index != 0).then_some(index)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EndpointDescriptor {
    pub address: u8,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    /// Endpoint number without the direction bit
    pub fn number(&self) -> u8 {
        self.address & 0x0f
    }

    pub fn direction(&self) -> rusb::Direction {
        if self.address & 0x80 != 0 {
            rusb::Direction::In
        } else {
            rusb::Direction::Out
        }
    }

    pub fn transfer_type(&self) -> rusb::TransferType {
        match self.attributes & 0x03 {
            0 => rusb::TransferType::Control,
            1 => rusb::TransferType::Isochronous,
            2 => rusb::TransferType::Bulk,
            _ => rusb::TransferType::Interrupt,
        }
    }
}

/// One alternate setting of an interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceDescriptor {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub class_code: u8,
    pub sub_class_code: u8,
    pub protocol_code: u8,
    pub interface_string_index: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// An interface and all of its alternate settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub alt_settings: Vec<InterfaceDescriptor>,
}

impl Interface {
    /// Interface number, taken from the first alternate setting
    pub fn number(&self) -> Option<u8> {
        self.alt_settings.first().map(|alt| alt.interface_number)
    }
}

/// Decoded configuration topology: interfaces → alt-settings → endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigDescriptor {
    pub configuration_value: u8,
    pub total_length: u16,
    pub attributes: u8,
    /// In units of 2 mA (high speed) or 8 mA (super speed)
    pub max_power: u8,
    pub configuration_string_index: u8,
    pub interfaces: Vec<Interface>,
}

impl ConfigDescriptor {
    pub fn num_interfaces(&self) -> usize {
        self.interfaces.len()
    }

    /// Every endpoint of every alternate setting
    pub fn endpoints(&self) -> impl Iterator<Item = &EndpointDescriptor> {
        self.interfaces
            .iter()
            .flat_map(|interface| interface.alt_settings.iter())
            .flat_map(|alt| alt.endpoints.iter())
    }
}

/// A configuration descriptor owned by the caller
///
/// Dereferences to the decoded [`ConfigDescriptor`]. The raw provider descriptor
/// is freed exactly once, when this value drops.
pub struct ConfigurationDescriptor<P: Provider> {
    device: Arc<DeviceInner<P>>,
    raw: Option<P::Config>,
    descriptor: ConfigDescriptor,
}

impl<P: Provider> ConfigurationDescriptor<P> {
    pub(crate) fn new(device: Arc<DeviceInner<P>>, raw: P::Config) -> Self {
        let descriptor = device.provider().describe_config(&raw);
        Self {
            device,
            raw: Some(raw),
            descriptor,
        }
    }

    pub fn descriptor(&self) -> &ConfigDescriptor {
        &self.descriptor
    }
}

impl<P: Provider> Deref for ConfigurationDescriptor<P> {
    type Target = ConfigDescriptor;

    fn deref(&self) -> &ConfigDescriptor {
        &self.descriptor
    }
}

impl<P: Provider> std::fmt::Debug for ConfigurationDescriptor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationDescriptor")
            .field("raw", &self.raw)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl<P: Provider> Drop for ConfigurationDescriptor<P> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            debug!(
                "Freeing configuration descriptor {}",
                self.descriptor.configuration_value
            );
            self.device.provider().free_config_descriptor(raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(address: u8, attributes: u8) -> EndpointDescriptor {
        EndpointDescriptor {
            address,
            attributes,
            max_packet_size: 64,
            interval: 0,
        }
    }

    #[test]
    fn test_endpoint_direction_and_type() {
        let ep = endpoint(0x81, 0x02);
        assert_eq!(ep.direction(), rusb::Direction::In);
        assert_eq!(ep.transfer_type(), rusb::TransferType::Bulk);
        assert_eq!(ep.number(), 1);

        let ep = endpoint(0x02, 0x03);
        assert_eq!(ep.direction(), rusb::Direction::Out);
        assert_eq!(ep.transfer_type(), rusb::TransferType::Interrupt);
    }

    #[test]
    fn test_string_indexes() {
        let desc = DeviceDescriptor {
            manufacturer_string_index: 1,
            serial_number_string_index: 3,
            ..Default::default()
        };
        assert_eq!(desc.manufacturer_string_index(), Some(1));
        assert_eq!(desc.product_string_index(), None);
        assert_eq!(desc.serial_number_string_index(), Some(3));
    }

    #[test]
    fn test_config_endpoints_walk_all_alt_settings() {
        let config = ConfigDescriptor {
            configuration_value: 1,
            interfaces: vec![
                Interface {
                    alt_settings: vec![
                        InterfaceDescriptor {
                            interface_number: 0,
                            endpoints: vec![endpoint(0x81, 0x03)],
                            ..Default::default()
                        },
                        InterfaceDescriptor {
                            interface_number: 0,
                            alternate_setting: 1,
                            endpoints: vec![endpoint(0x81, 0x03), endpoint(0x02, 0x03)],
                            ..Default::default()
                        },
                    ],
                },
                Interface::default(),
            ],
            ..Default::default()
        };

        assert_eq!(config.num_interfaces(), 2);
        assert_eq!(config.endpoints().count(), 3);
        assert_eq!(config.interfaces[0].number(), Some(0));
        assert_eq!(config.interfaces[1].number(), None);
    }

    #[test]
    fn test_serialized_field_names() {
        let config = ConfigDescriptor {
            configuration_value: 2,
            interfaces: vec![Interface {
                alt_settings: vec![InterfaceDescriptor {
                    endpoints: vec![endpoint(0x81, 0x02)],
                    ..Default::default()
                }],
            }],
            ..Default::default()
        };

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["configuration_value"], 2);
        assert_eq!(
            value["interfaces"][0]["alt_settings"][0]["endpoints"][0]["address"],
            0x81
        );
    }
}
