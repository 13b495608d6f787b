//! Accelerator capability probing and compute devices.
//!
//! ```text
//! AccelConfig ──► CapabilityState::initialize ──► Option<Accelerator<D>>
//!                                                     │
//!                         ┌───────────────────────────┴──────────┐
//!                  EmulatedDevice (host memory)        CudaDevice (`cuda` feature)
//! ```

mod device;
mod emulated;
pub mod global;
mod probe;

#[cfg(feature = "cuda")]
mod cuda;

pub use device::{half_spectrum_len, ComputeDevice, DeviceError};
pub use emulated::*;
pub use probe::{format_bytes, Accelerator, CapabilityState};

#[cfg(feature = "cuda")]
pub use cuda::{CudaComplexBuffer, CudaDevice, CudaMultiplyKernel, CufftPlan};
