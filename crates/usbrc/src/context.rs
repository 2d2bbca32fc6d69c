//! Library context
//!
//! A [`Context`] is one initialized provider session. Clones share the session;
//! the provider's teardown runs once, after the last clone and the last device,
//! handle or descriptor derived from it have dropped.

use crate::error::{self, Error, Result};
use crate::libusb::LibusbProvider;
use crate::provider::Provider;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Initialize libusb with the given log verbosity (0 = none ... 4 = debug)
pub fn init(debug_level: i32) -> Result<Context<LibusbProvider>> {
    Context::init(LibusbProvider, debug_level)
}

pub(crate) struct ContextInner<P: Provider> {
    provider: P,
    raw: P::Context,
}

impl<P: Provider> ContextInner<P> {
    pub(crate) fn provider(&self) -> &P {
        &self.provider
    }

    pub(crate) fn raw(&self) -> P::Context {
        self.raw
    }
}

impl<P: Provider> Drop for ContextInner<P> {
    fn drop(&mut self) {
        debug!("Tearing down USB context {:?}", self.raw);
        self.provider.exit(self.raw);
    }
}

/// Shared reference to a provider session
///
/// `Context::default()` is a null reference: every operation on it fails with
/// [`Error::InvalidArgument`] without touching a provider.
pub struct Context<P: Provider> {
    inner: Option<Arc<ContextInner<P>>>,
}

impl<P: Provider> Context<P> {
    /// Start a session on `provider`
    ///
    /// Failing to apply `debug_level` is logged and otherwise ignored.
    pub fn init(provider: P, debug_level: i32) -> Result<Self> {
        let raw = provider
            .init()
            .map_err(|code| error::translate(&provider, "libusb_init", code))?;

        let rc = provider.set_log_level(raw, debug_level);
        if rc < 0 {
            warn!(
                "Could not set USB log level {}: {}",
                debug_level,
                error::translate(&provider, "libusb_set_option", rc)
            );
        }

        debug!("Initialized USB context {:?}", raw);
        Ok(Self {
            inner: Some(Arc::new(ContextInner { provider, raw })),
        })
    }

    pub fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    /// The provider this session runs on, `None` for a null context
    pub fn provider(&self) -> Option<&P> {
        self.inner.as_deref().map(ContextInner::provider)
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner<P>>) -> Self {
        Self { inner: Some(inner) }
    }

    pub(crate) fn inner(&self) -> Result<&Arc<ContextInner<P>>> {
        self.inner
            .as_ref()
            .ok_or_else(|| Error::invalid("invalid reference to a context"))
    }
}

impl<P: Provider> Clone for Context<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Provider> Default for Context<P> {
    fn default() -> Self {
        Self { inner: None }
    }
}

impl<P: Provider> fmt::Debug for Context<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f.debug_tuple("Context").field(&inner.raw).finish(),
            None => f.write_str("Context(null)"),
        }
    }
}
