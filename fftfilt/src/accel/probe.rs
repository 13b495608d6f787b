//! One-shot accelerator capability probe.

use core::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, info};

use super::{ComputeDevice, DeviceError};
use crate::config::AccelConfig;

/// A brought-up device together with its compiled multiply kernel.
///
/// Only [`CapabilityState`] constructs these, so holding one means both the
/// runtime and the kernel are usable.
pub struct Accelerator<D: ComputeDevice> {
    device: D,
    multiply: D::MultiplyKernel,
}

impl<D: ComputeDevice> Accelerator<D> {
    /// The underlying device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The compiled `b[i] = a[i] * b[i]` kernel.
    pub fn multiply_kernel(&self) -> &D::MultiplyKernel {
        &self.multiply
    }

    /// Launch the shared multiply kernel on `a` and `b`, writing into `b`.
    pub fn multiply_inplace(
        &self,
        a: &D::ComplexBuffer,
        b: &mut D::ComplexBuffer,
    ) -> Result<(), DeviceError> {
        self.device.multiply_inplace(&self.multiply, a, b)
    }
}

impl<D: ComputeDevice> fmt::Debug for Accelerator<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accelerator")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

/// Whether accelerated execution is usable, decided once and then read-only.
///
/// Cloning is cheap and shares the same accelerator.
pub struct CapabilityState<D: ComputeDevice> {
    accelerator: Option<Arc<Accelerator<D>>>,
}

impl<D: ComputeDevice> Clone for CapabilityState<D> {
    fn clone(&self) -> Self {
        Self {
            accelerator: self.accelerator.clone(),
        }
    }
}

impl<D: ComputeDevice> fmt::Debug for CapabilityState<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityState")
            .field("capable", &self.is_capable())
            .field("accelerator", &self.accelerator)
            .finish()
    }
}

impl<D: ComputeDevice> CapabilityState<D> {
    /// State in which acceleration is never attempted.
    pub fn disabled() -> Self {
        Self { accelerator: None }
    }

    /// Probe for acceleration.
    ///
    /// Returns the disabled state without calling `bring_up` when the config
    /// switch is off. Otherwise brings the device up and compiles the multiply
    /// kernel; any error, including a panic from a runtime loader that cannot
    /// find its shared library, is logged and yields the disabled state.
    pub fn initialize<F>(config: &AccelConfig, bring_up: F) -> Self
    where
        F: FnOnce() -> Result<D, DeviceError>,
    {
        if !config.use_cuda {
            debug!("CUDA disabled by configuration");
            return Self::disabled();
        }

        let probed = panic::catch_unwind(AssertUnwindSafe(|| {
            bring_up().and_then(Self::from_device)
        }));
        match probed {
            Ok(Ok(state)) => state,
            Ok(Err(err)) => {
                info!("CUDA not available: {err}");
                Self::disabled()
            }
            Err(_) => {
                info!("CUDA not available: runtime initialization panicked");
                Self::disabled()
            }
        }
    }

    /// Compile the multiply kernel on an already brought-up device.
    ///
    /// Unlike [`CapabilityState::initialize`] this propagates failures.
    pub fn from_device(device: D) -> Result<Self, DeviceError> {
        let multiply = device.compile_multiply_kernel()?;
        match device.free_memory() {
            Ok(free) => info!(
                "Enabling CUDA with {} available memory on {}",
                format_bytes(free),
                device.name()
            ),
            Err(err) => info!(
                "Enabling CUDA on {} (free memory unknown: {err})",
                device.name()
            ),
        }
        Ok(Self {
            accelerator: Some(Arc::new(Accelerator { device, multiply })),
        })
    }

    /// Whether an accelerator is available.
    pub fn is_capable(&self) -> bool {
        self.accelerator.is_some()
    }

    /// The shared accelerator, present iff [`CapabilityState::is_capable`].
    pub fn accelerator(&self) -> Option<&Arc<Accelerator<D>>> {
        self.accelerator.as_ref()
    }
}

/// Format a byte count with binary units, e.g. `"1.5 GiB"`.
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 6] = ["bytes", "KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{bytes} bytes");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::EmulatedDevice;

    fn enabled() -> AccelConfig {
        AccelConfig { use_cuda: true }
    }

    #[test]
    fn disabled_config_never_brings_up_a_device() {
        let state = CapabilityState::<EmulatedDevice>::initialize(
            &AccelConfig { use_cuda: false },
            || panic!("bring_up must not run when disabled"),
        );
        assert!(!state.is_capable());
        assert!(state.accelerator().is_none());
    }

    #[test]
    fn bring_up_failure_is_swallowed() {
        let state = CapabilityState::<EmulatedDevice>::initialize(&enabled(), || {
            Err(DeviceError::Unavailable("no driver".into()))
        });
        assert!(!state.is_capable());
    }

    #[test]
    fn bring_up_panic_is_swallowed() {
        let state = CapabilityState::<EmulatedDevice>::initialize(&enabled(), || {
            panic!("unable to dlopen libcuda.so")
        });
        assert!(!state.is_capable());
    }

    #[test]
    fn kernel_compile_failure_disables_acceleration() {
        let state = CapabilityState::initialize(&enabled(), || {
            Ok(EmulatedDevice::new().with_kernel_compile_failure())
        });
        assert!(!state.is_capable());
    }

    #[test]
    fn capable_state_is_shared_between_clones() {
        let state = CapabilityState::initialize(&enabled(), || Ok(EmulatedDevice::new()));
        assert!(state.is_capable());

        let clone = state.clone();
        let a = state.accelerator().expect("capable");
        let b = clone.accelerator().expect("capable");
        assert!(Arc::ptr_eq(a, b));
    }

    #[test]
    fn from_device_propagates_compile_errors() {
        let err = CapabilityState::from_device(EmulatedDevice::new().with_kernel_compile_failure())
            .expect_err("compile failure");
        assert!(matches!(err, DeviceError::KernelCompilation(_)));
    }

    #[test]
    fn byte_sizes_use_binary_units() {
        assert_eq!(format_bytes(0), "0 bytes");
        assert_eq!(format_bytes(1023), "1023 bytes");
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 / 2), "1.5 MiB");
        assert_eq!(format_bytes(8 << 30), "8.0 GiB");
    }
}
