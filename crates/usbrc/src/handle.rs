//! Open device handles and interface claims
//!
//! A [`Handle`] records what its teardown must do in a [`ReleasePolicy`] stored
//! on the handle itself. Opening yields [`ReleasePolicy::CloseOnly`]; a
//! successful [`Handle::claim_interface`] promotes it, once, to
//! [`ReleasePolicy::ReleaseInterfaceThenClose`]. When the last clone drops the
//! policy is read and carried out: release the interface (failure is logged and
//! ignored), then close.

use crate::device::{self, Device, DeviceInner};
use crate::error::{self, Error, Result};
use crate::provider::Provider;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Size of the buffer used for string descriptor reads
const STRING_DESCRIPTOR_BUFFER: usize = 256;

/// What dropping the last reference to a [`Handle`] does
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReleasePolicy {
    #[default]
    CloseOnly,
    ReleaseInterfaceThenClose(u8),
}

pub(crate) struct HandleInner<P: Provider> {
    device: Arc<DeviceInner<P>>,
    raw: P::Handle,
    policy: Mutex<ReleasePolicy>,
}

impl<P: Provider> HandleInner<P> {
    pub(crate) fn provider(&self) -> &P {
        self.device.provider()
    }

    pub(crate) fn raw(&self) -> P::Handle {
        self.raw
    }
}

impl<P: Provider> Drop for HandleInner<P> {
    fn drop(&mut self) {
        let policy = *self
            .policy
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        let provider = self.device.provider();

        if let ReleasePolicy::ReleaseInterfaceThenClose(interface) = policy {
            let rc = provider.release_interface(self.raw, interface);
            if rc < 0 {
                warn!(
                    "Failed to release interface {} on {:?}: {}",
                    interface,
                    self.raw,
                    error::translate(provider, "libusb_release_interface", rc)
                );
            } else {
                debug!("Released interface {} on {:?}", interface, self.raw);
            }
        }

        provider.close(self.raw);
        debug!("Closed handle {:?}", self.raw);
    }
}

/// An open device
///
/// Clones share the same native handle. A handle must not be used from two
/// threads at once: transfers on one handle need external serialization.
/// Distinct handles can be used concurrently.
///
/// `Handle::default()` is a null reference.
pub struct Handle<P: Provider> {
    inner: Option<Arc<HandleInner<P>>>,
}

impl<P: Provider> Device<P> {
    pub fn open(&self) -> Result<Handle<P>> {
        let device = self.inner()?;
        let provider = device.provider();

        let raw = provider
            .open(device.raw())
            .map_err(|code| error::translate(provider, "libusb_open", code))?;

        debug!("Opened device {:?} as {:?}", device.raw(), raw);
        Ok(Handle {
            inner: Some(Arc::new(HandleInner {
                device: Arc::clone(device),
                raw,
                policy: Mutex::new(ReleasePolicy::CloseOnly),
            })),
        })
    }
}

impl<P: Provider> Handle<P> {
    pub fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    pub(crate) fn inner(&self) -> Result<&Arc<HandleInner<P>>> {
        self.inner
            .as_ref()
            .ok_or_else(|| Error::invalid("invalid handle"))
    }

    /// The device this handle was opened from
    pub fn device(&self) -> Device<P> {
        match &self.inner {
            Some(inner) => Device::from_inner(Arc::clone(&inner.device)),
            None => Device::default(),
        }
    }

    pub fn release_policy(&self) -> Result<ReleasePolicy> {
        let handle = self.inner()?;
        let policy = *handle.policy.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(policy)
    }

    /// Claim `interface_number`; it is released automatically before close
    ///
    /// A handle claims at most one interface. A failed claim leaves the handle
    /// as it was.
    pub fn claim_interface(&self, interface_number: u8) -> Result<()> {
        let handle = self.inner()?;
        let mut policy = handle.policy.lock().unwrap_or_else(PoisonError::into_inner);

        if let ReleasePolicy::ReleaseInterfaceThenClose(claimed) = *policy {
            return Err(Error::InvalidArgument(format!(
                "interface {} already claimed on this handle",
                claimed
            )));
        }

        let provider = handle.provider();
        let rc = provider.claim_interface(handle.raw, interface_number);
        error::check(provider, "libusb_claim_interface", rc)?;

        *policy = ReleasePolicy::ReleaseInterfaceThenClose(interface_number);
        debug!("Claimed interface {} on {:?}", interface_number, handle.raw);
        Ok(())
    }

    /// Max packet size of `endpoint`, looked up through the handle's device
    pub fn max_packet_size(&self, endpoint: u8) -> Result<u32> {
        let handle = self.inner()?;
        let provider = handle.provider();
        let device = provider
            .get_device(handle.raw)
            .ok_or_else(|| Error::invalid("invalid handle"))?;
        device::max_packet_size(provider, device, endpoint)
    }

    /// Read string descriptor `index` in the device's first language
    pub fn string_descriptor_ascii(&self, index: u8) -> Result<String> {
        let handle = self.inner()?;
        if index == 0 {
            return Err(Error::invalid("string descriptor index 0 is not a string"));
        }

        let provider = handle.provider();
        let mut buffer = [0u8; STRING_DESCRIPTOR_BUFFER];
        let rc = provider.get_string_descriptor_ascii(handle.raw, index, &mut buffer);
        let len = error::check(provider, "libusb_get_string_descriptor_ascii", rc)? as usize;

        Ok(String::from_utf8_lossy(&buffer[..len.min(buffer.len())]).into_owned())
    }
}

impl<P: Provider> Clone for Handle<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Provider> Default for Handle<P> {
    fn default() -> Self {
        Self { inner: None }
    }
}

impl<P: Provider> fmt::Debug for Handle<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f.debug_tuple("Handle").field(&inner.raw).finish(),
            None => f.write_str("Handle(null)"),
        }
    }
}
