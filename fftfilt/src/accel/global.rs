//! Process-wide capability state for the default device.
//!
//! Most code should construct a [`CapabilityState`] once and pass it down.
//! This module exists for callers that want the probe to run at most once
//! per process, driven by [`AccelConfig::load`].

use core::fmt;
use std::sync::OnceLock;

use tracing::warn;

use super::{CapabilityState, DeviceError};
use crate::config::AccelConfig;

/// Device used by the process-wide probe.
#[cfg(feature = "cuda")]
pub type DefaultDevice = super::CudaDevice;

/// Device used by the process-wide probe.
///
/// Without the `cuda` feature bring-up always fails, so acceleration stays
/// disabled regardless of configuration.
#[cfg(not(feature = "cuda"))]
pub type DefaultDevice = super::EmulatedDevice;

static CAPABILITY: OnceLock<CapabilityState<DefaultDevice>> = OnceLock::new();

/// Returned by [`capability`] before [`init_accel`] has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotInitialized;

impl fmt::Display for NotInitialized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "accelerator capability probe has not been initialized")
    }
}

impl std::error::Error for NotInitialized {}

#[cfg(feature = "cuda")]
fn bring_up_default() -> Result<DefaultDevice, DeviceError> {
    super::CudaDevice::new(0)
}

#[cfg(not(feature = "cuda"))]
fn bring_up_default() -> Result<DefaultDevice, DeviceError> {
    Err(DeviceError::Unavailable(
        "fftfilt was built without the `cuda` feature".into(),
    ))
}

/// Run the probe once for this process and return the shared state.
///
/// Later calls return the first result. A config that fails to load is
/// logged and treated as acceleration disabled.
pub fn init_accel() -> &'static CapabilityState<DefaultDevice> {
    CAPABILITY.get_or_init(|| {
        let config = AccelConfig::load().unwrap_or_else(|err| {
            warn!("ignoring accelerator configuration: {err}");
            AccelConfig::default()
        });
        CapabilityState::initialize(&config, bring_up_default)
    })
}

/// The shared state, or [`NotInitialized`] before [`init_accel`].
pub fn capability() -> Result<&'static CapabilityState<DefaultDevice>, NotInitialized> {
    CAPABILITY.get().ok_or(NotInitialized)
}

/// Whether the process-wide probe found a usable accelerator.
///
/// Returns `false` before [`init_accel`] has run.
pub fn is_capable() -> bool {
    capability().is_ok_and(CapabilityState::is_capable)
}
