use core::fmt;

use rustfft::num_complex::Complex;

/// Errors that can occur while bringing up or driving a compute device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// No usable device or runtime library.
    Unavailable(String),
    /// A device allocation did not fit in the remaining memory.
    OutOfMemory {
        /// Bytes requested by the failed allocation.
        requested: usize,
        /// Bytes still free on the device at the time of the request.
        available: usize,
    },
    /// Transform plan construction failed.
    Plan(String),
    /// The elementwise kernel could not be compiled or loaded.
    KernelCompilation(String),
    /// Host/device memory transfer failed.
    Transfer(String),
    /// A transform or kernel launch failed.
    Launch(String),
    /// The device disappeared after it was brought up.
    DeviceLost,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Unavailable(s) => write!(f, "device unavailable: {s}"),
            DeviceError::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "out of device memory: requested {requested} bytes, {available} bytes available"
            ),
            DeviceError::Plan(s) => write!(f, "transform plan creation failed: {s}"),
            DeviceError::KernelCompilation(s) => write!(f, "kernel compilation failed: {s}"),
            DeviceError::Transfer(s) => write!(f, "memory transfer failed: {s}"),
            DeviceError::Launch(s) => write!(f, "launch failed: {s}"),
            DeviceError::DeviceLost => write!(f, "device was lost or reset"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Length of the non-redundant half spectrum of a real signal of length `n`.
pub const fn half_spectrum_len(n: usize) -> usize {
    n / 2 + 1
}

/// Backend seam for accelerated FFT multiplication.
///
/// A device exposes real-to-complex and complex-to-real transform plans,
/// buffers that live in its own memory, and one elementwise complex multiply
/// kernel. All calls block until the device work they enqueue has finished
/// or has been ordered before any later transfer back to the host.
///
/// Transforms follow the usual real FFT conventions: the forward plan maps `n`
/// reals to [`half_spectrum_len`]`(n)` complex bins, the inverse plan maps the
/// half spectrum back to `n` reals *without* dividing by `n`.
pub trait ComputeDevice: Send + Sync + fmt::Debug + 'static {
    /// Device buffer of `f64` samples.
    type RealBuffer: Send;
    /// Device buffer of `Complex<f64>` bins.
    type ComplexBuffer: Send;
    /// Forward real-to-complex plan.
    type ForwardPlan: Send;
    /// Inverse complex-to-real plan.
    type InversePlan: Send;
    /// Compiled `b[i] = a[i] * b[i]` kernel.
    type MultiplyKernel: Send + Sync;

    /// Human readable device name.
    fn name(&self) -> String;

    /// Free device memory in bytes.
    fn free_memory(&self) -> Result<usize, DeviceError>;

    /// Compile the in-place complex multiply kernel.
    fn compile_multiply_kernel(&self) -> Result<Self::MultiplyKernel, DeviceError>;

    /// Plan a forward transform of `n` real samples.
    fn plan_forward(&self, n: usize) -> Result<Self::ForwardPlan, DeviceError>;

    /// Plan an inverse transform producing `n` real samples.
    fn plan_inverse(&self, n: usize) -> Result<Self::InversePlan, DeviceError>;

    /// Allocate a zeroed real buffer of `len` samples.
    fn alloc_real(&self, len: usize) -> Result<Self::RealBuffer, DeviceError>;

    /// Allocate a zeroed complex buffer of `len` bins.
    fn alloc_complex(&self, len: usize) -> Result<Self::ComplexBuffer, DeviceError>;

    /// Copy host bins into a freshly allocated device buffer.
    fn upload_complex(&self, host: &[Complex<f64>]) -> Result<Self::ComplexBuffer, DeviceError>;

    /// Overwrite `dst` with host samples. `host.len()` must equal the buffer length.
    fn upload_real(&self, host: &[f64], dst: &mut Self::RealBuffer) -> Result<(), DeviceError>;

    /// Copy `src` back into host memory. `host.len()` must equal the buffer length.
    fn download_real(&self, src: &Self::RealBuffer, host: &mut [f64]) -> Result<(), DeviceError>;

    /// Run the forward plan, `input` -> `output`.
    fn execute_forward(
        &self,
        plan: &Self::ForwardPlan,
        input: &mut Self::RealBuffer,
        output: &mut Self::ComplexBuffer,
    ) -> Result<(), DeviceError>;

    /// Run the inverse plan, `input` -> `output`, unnormalized.
    fn execute_inverse(
        &self,
        plan: &Self::InversePlan,
        input: &mut Self::ComplexBuffer,
        output: &mut Self::RealBuffer,
    ) -> Result<(), DeviceError>;

    /// Launch the multiply kernel: `b[i] = a[i] * b[i]`.
    fn multiply_inplace(
        &self,
        kernel: &Self::MultiplyKernel,
        a: &Self::ComplexBuffer,
        b: &mut Self::ComplexBuffer,
    ) -> Result<(), DeviceError>;
}
