//! Human-readable descriptor output
//!
//! One line per device, endpoint and configuration header; interfaces list
//! their endpoints underneath.

use crate::descriptor::{
    ConfigDescriptor, ConfigurationDescriptor, DeviceDescriptor, EndpointDescriptor, Interface,
    InterfaceDescriptor,
};
use crate::provider::Provider;
use std::fmt;

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dev: cls=0x{:x}, subcls=0x{:x}, proto=0x{:x}, vid=0x{:04x}, pid=0x{:04x}",
            self.class_code, self.sub_class_code, self.protocol_code, self.vendor_id, self.product_id
        )
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ep: address=0x{:x}, attrib=0x{:x}, mps={}",
            self.address, self.attributes, self.max_packet_size
        )
    }
}

impl fmt::Display for InterfaceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "if: num={}, altset={}, cls=0x{:x}, subcls=0x{:x}, proto=0x{:x}",
            self.interface_number,
            self.alternate_setting,
            self.class_code,
            self.sub_class_code,
            self.protocol_code
        )?;
        for endpoint in &self.endpoints {
            writeln!(f, "{}", endpoint)?;
        }
        Ok(())
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for alt in &self.alt_settings {
            write!(f, "{}", alt)?;
        }
        Ok(())
    }
}

impl fmt::Display for ConfigDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "config: val={}, len={}",
            self.configuration_value, self.total_length
        )?;
        for interface in &self.interfaces {
            write!(f, "{}", interface)?;
        }
        Ok(())
    }
}

impl<P: Provider> fmt::Display for ConfigurationDescriptor<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.descriptor(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_descriptor_line() {
        let desc = DeviceDescriptor {
            class_code: 0xef,
            sub_class_code: 0x02,
            protocol_code: 0x01,
            vendor_id: 0x046d,
            product_id: 0xc52b,
            ..Default::default()
        };
        assert_eq!(
            desc.to_string(),
            "dev: cls=0xef, subcls=0x2, proto=0x1, vid=0x046d, pid=0xc52b"
        );
    }

    #[test]
    fn test_config_tree() {
        let config = ConfigDescriptor {
            configuration_value: 1,
            total_length: 32,
            interfaces: vec![Interface {
                alt_settings: vec![InterfaceDescriptor {
                    interface_number: 0,
                    alternate_setting: 0,
                    class_code: 0xff,
                    endpoints: vec![
                        EndpointDescriptor {
                            address: 0x81,
                            attributes: 0x02,
                            max_packet_size: 512,
                            interval: 0,
                        },
                        EndpointDescriptor {
                            address: 0x02,
                            attributes: 0x02,
                            max_packet_size: 512,
                            interval: 0,
                        },
                    ],
                    ..Default::default()
                }],
            }],
            ..Default::default()
        };

        assert_eq!(
            config.to_string(),
            "config: val=1, len=32\n\
             if: num=0, altset=0, cls=0xff, subcls=0x0, proto=0x0\n\
             ep: address=0x81, attrib=0x2, mps=512\n\
             ep: address=0x2, attrib=0x2, mps=512\n"
        );
    }
}
