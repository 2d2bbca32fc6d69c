//! Synchronous control and bulk transfers
//!
//! Both calls block until the provider completes or the timeout expires.
//! `Duration::ZERO` means wait indefinitely.

use crate::error::{self, Error, Result};
use crate::handle::Handle;
use crate::provider::Provider;
use std::time::Duration;
use tracing::debug;

pub use rusb::{Direction, Recipient, RequestType, request_type};

/// Header fields and payload of one control transfer
///
/// `data.len()` becomes `wLength`. For IN requests the device's reply is written
/// into `data`; for OUT requests `data` is sent.
#[derive(Debug)]
pub struct ControlRequest<'a> {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub data: &'a mut [u8],
}

impl<'a> ControlRequest<'a> {
    pub fn new(request_type: u8, request: u8, value: u16, index: u16, data: &'a mut [u8]) -> Self {
        Self {
            request_type,
            request,
            value,
            index,
            data,
        }
    }

    pub fn direction(&self) -> Direction {
        if self.request_type & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// Milliseconds for the provider; 0 only for `Duration::ZERO`
fn timeout_millis(timeout: Duration) -> u32 {
    if timeout.is_zero() {
        return 0;
    }
    match timeout.as_millis() {
        0 => 1,
        ms => u32::try_from(ms).unwrap_or(u32::MAX),
    }
}

impl<P: Provider> Handle<P> {
    /// Issue a control transfer, returning the number of bytes transferred
    pub fn control_transfer(
        &self,
        request: &mut ControlRequest<'_>,
        timeout: Duration,
    ) -> Result<usize> {
        let handle = self.inner()?;
        if request.data.len() > usize::from(u16::MAX) {
            return Err(Error::InvalidArgument(format!(
                "control transfer buffer of {} bytes exceeds wLength",
                request.data.len()
            )));
        }

        debug!(
            "Control transfer: request_type={:#x}, request={:#x}, value={:#x}, index={:#x}, data_len={}",
            request.request_type,
            request.request,
            request.value,
            request.index,
            request.data.len()
        );

        let provider = handle.provider();
        let rc = provider.control_transfer(
            handle.raw(),
            request.request_type,
            request.request,
            request.value,
            request.index,
            &mut *request.data,
            timeout_millis(timeout),
        );
        let len = error::check(provider, "libusb_control_transfer", rc)?;
        Ok(len as usize)
    }

    /// Issue a bulk transfer on `endpoint` using all of `data`
    ///
    /// Returns the length actually transferred, which can be shorter than
    /// `data` (a short packet on IN, for instance). Callers must check it.
    pub fn bulk_transfer(&self, endpoint: u8, data: &mut [u8], timeout: Duration) -> Result<usize> {
        let handle = self.inner()?;
        if i32::try_from(data.len()).is_err() {
            return Err(Error::InvalidArgument(format!(
                "bulk transfer buffer of {} bytes is too large",
                data.len()
            )));
        }

        debug!(
            "Bulk transfer: endpoint={:#x}, data_len={}, timeout={}ms",
            endpoint,
            data.len(),
            timeout.as_millis()
        );

        let provider = handle.provider();
        let transferred = provider
            .bulk_transfer(handle.raw(), endpoint, data, timeout_millis(timeout))
            .map_err(|code| error::translate(provider, "libusb_bulk_transfer", code))?;

        debug!("Bulk transfer succeeded: {} bytes", transferred);
        Ok(transferred)
    }
}
