//! Common utilities for the usbrc tools
//!
//! Shared error type, logging setup and device selection for binaries built
//! on the `usbrc` library.

pub mod error;
pub mod logging;
pub mod selector;

pub use error::{Error, Result};
pub use logging::setup_logging;
pub use selector::DeviceSelector;
