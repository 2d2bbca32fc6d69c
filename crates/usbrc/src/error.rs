//! Error types and result-code translation
//!
//! Raw provider calls report failure as a negative libusb-style code. Those codes
//! are interpreted here and nowhere else: components hand them to [`check`] or
//! [`translate`] and propagate the structured [`Error`] with `?`.

use crate::provider::{Provider, RawCode};
use rusb::ffi::constants::{
    LIBUSB_ERROR_ACCESS, LIBUSB_ERROR_BUSY, LIBUSB_ERROR_INTERRUPTED, LIBUSB_ERROR_INVALID_PARAM,
    LIBUSB_ERROR_IO, LIBUSB_ERROR_NO_DEVICE, LIBUSB_ERROR_NO_MEM, LIBUSB_ERROR_NOT_FOUND,
    LIBUSB_ERROR_NOT_SUPPORTED, LIBUSB_ERROR_OTHER, LIBUSB_ERROR_OVERFLOW, LIBUSB_ERROR_PIPE,
    LIBUSB_ERROR_TIMEOUT, LIBUSB_SUCCESS,
};
use thiserror::Error;

/// A provider call that returned a negative result code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation}: failed with {code} ({name})")]
pub struct ProviderError {
    operation: &'static str,
    code: RawCode,
    name: &'static str,
}

impl ProviderError {
    pub fn new(operation: &'static str, code: RawCode, name: &'static str) -> Self {
        Self {
            operation,
            code,
            name,
        }
    }

    /// Name of the provider entry point that failed, e.g. `libusb_open`
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// The raw (negative) result code
    pub fn code(&self) -> RawCode {
        self.code
    }

    /// Symbolic name of the code, e.g. `LIBUSB_ERROR_ACCESS`
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The code as a [`rusb::Error`], for callers that want to match on it
    pub fn kind(&self) -> rusb::Error {
        match self.code {
            LIBUSB_ERROR_IO => rusb::Error::Io,
            LIBUSB_ERROR_INVALID_PARAM => rusb::Error::InvalidParam,
            LIBUSB_ERROR_ACCESS => rusb::Error::Access,
            LIBUSB_ERROR_NO_DEVICE => rusb::Error::NoDevice,
            LIBUSB_ERROR_NOT_FOUND => rusb::Error::NotFound,
            LIBUSB_ERROR_BUSY => rusb::Error::Busy,
            LIBUSB_ERROR_TIMEOUT => rusb::Error::Timeout,
            LIBUSB_ERROR_OVERFLOW => rusb::Error::Overflow,
            LIBUSB_ERROR_PIPE => rusb::Error::Pipe,
            LIBUSB_ERROR_INTERRUPTED => rusb::Error::Interrupted,
            LIBUSB_ERROR_NO_MEM => rusb::Error::NoMem,
            LIBUSB_ERROR_NOT_SUPPORTED => rusb::Error::NotSupported,
            _ => rusb::Error::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Rejected locally, no provider call was made
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl Error {
    pub(crate) fn invalid(message: &str) -> Self {
        Error::InvalidArgument(message.to_string())
    }

    /// The provider failure, if this error came from the provider
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Error::Provider(e) => Some(e),
            Error::InvalidArgument(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Symbolic libusb name for a result code
pub fn error_name(code: RawCode) -> &'static str {
    match code {
        LIBUSB_SUCCESS => "LIBUSB_SUCCESS",
        LIBUSB_ERROR_IO => "LIBUSB_ERROR_IO",
        LIBUSB_ERROR_INVALID_PARAM => "LIBUSB_ERROR_INVALID_PARAM",
        LIBUSB_ERROR_ACCESS => "LIBUSB_ERROR_ACCESS",
        LIBUSB_ERROR_NO_DEVICE => "LIBUSB_ERROR_NO_DEVICE",
        LIBUSB_ERROR_NOT_FOUND => "LIBUSB_ERROR_NOT_FOUND",
        LIBUSB_ERROR_BUSY => "LIBUSB_ERROR_BUSY",
        LIBUSB_ERROR_TIMEOUT => "LIBUSB_ERROR_TIMEOUT",
        LIBUSB_ERROR_OVERFLOW => "LIBUSB_ERROR_OVERFLOW",
        LIBUSB_ERROR_PIPE => "LIBUSB_ERROR_PIPE",
        LIBUSB_ERROR_INTERRUPTED => "LIBUSB_ERROR_INTERRUPTED",
        LIBUSB_ERROR_NO_MEM => "LIBUSB_ERROR_NO_MEM",
        LIBUSB_ERROR_NOT_SUPPORTED => "LIBUSB_ERROR_NOT_SUPPORTED",
        LIBUSB_ERROR_OTHER => "LIBUSB_ERROR_OTHER",
        _ => "**UNKNOWN**",
    }
}

/// Build the structured error for a failed provider call
///
/// `code` is expected to be negative.
pub fn translate<P: Provider + ?Sized>(
    provider: &P,
    operation: &'static str,
    code: RawCode,
) -> Error {
    debug_assert!(code < 0, "translate called with non-negative code {code}");
    ProviderError::new(operation, code, provider.error_name(code)).into()
}

/// Pass a non-negative result through, translate a negative one
pub fn check<P: Provider + ?Sized>(
    provider: &P,
    operation: &'static str,
    code: RawCode,
) -> Result<u32> {
    if code < 0 {
        Err(translate(provider, operation, code))
    } else {
        Ok(code as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeProvider;

    #[test]
    fn test_message_format() {
        let err = ProviderError::new("libusb_open", LIBUSB_ERROR_ACCESS, "LIBUSB_ERROR_ACCESS");
        assert_eq!(
            err.to_string(),
            "libusb_open: failed with -3 (LIBUSB_ERROR_ACCESS)"
        );
    }

    #[test]
    fn test_error_names() {
        assert_eq!(error_name(-1), "LIBUSB_ERROR_IO");
        assert_eq!(error_name(-7), "LIBUSB_ERROR_TIMEOUT");
        assert_eq!(error_name(-99), "LIBUSB_ERROR_OTHER");
        assert_eq!(error_name(-42), "**UNKNOWN**");
    }

    #[test]
    fn test_kind_mapping() {
        let err = ProviderError::new("op", LIBUSB_ERROR_PIPE, "LIBUSB_ERROR_PIPE");
        assert_eq!(err.kind(), rusb::Error::Pipe);
        let err = ProviderError::new("op", -42, "**UNKNOWN**");
        assert_eq!(err.kind(), rusb::Error::Other);
    }

    #[test]
    fn test_check_passes_non_negative_through() {
        let provider = FakeProvider::new();
        assert_eq!(check(&provider, "op", 0), Ok(0));
        assert_eq!(check(&provider, "op", 64), Ok(64));
    }

    #[test]
    fn test_check_translates_negative() {
        let provider = FakeProvider::new();
        let err = check(&provider, "libusb_claim_interface", LIBUSB_ERROR_BUSY).unwrap_err();
        let provider_error = err.provider_error().expect("provider error");
        assert_eq!(provider_error.operation(), "libusb_claim_interface");
        assert_eq!(provider_error.code(), LIBUSB_ERROR_BUSY);
        assert_eq!(provider_error.name(), "LIBUSB_ERROR_BUSY");
        assert_eq!(provider_error.kind(), rusb::Error::Busy);
    }

    #[test]
    fn test_invalid_argument_is_not_provider_error() {
        let err = Error::invalid("invalid reference to a device");
        assert!(err.provider_error().is_none());
        assert_eq!(
            err.to_string(),
            "Invalid argument: invalid reference to a device"
        );
    }
}
