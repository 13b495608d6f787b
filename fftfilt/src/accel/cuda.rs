//! CUDA device: cudarc driver for memory, NVRTC for the multiply kernel and
//! cuFFT for the real transforms.
//!
//! # Requirements
//!
//! - CUDA driver and cuFFT shared libraries at runtime (loaded dynamically)
//! - `cuda` feature enabled in Cargo.toml

use core::fmt;
use std::sync::Arc;

use cudarc::cufft::{result as cufft, sys as cufft_sys};
use cudarc::driver::sys::CUresult;
use cudarc::driver::{
    CudaContext, CudaFunction, CudaSlice, CudaStream, DevicePtrMut, DriverError, LaunchConfig,
    PushKernelArg,
};
use cudarc::nvrtc::compile_ptx;
use rustfft::num_complex::Complex;
use tracing::debug;

use super::device::half_spectrum_len;
use super::{ComputeDevice, DeviceError};

const MULTIPLY_INPLACE_SRC: &str = r#"
extern "C" __global__ void multiply_inplace(const double *a, double *b, const int n)
{
    const int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        const double ar = a[2 * i];
        const double ai = a[2 * i + 1];
        const double br = b[2 * i];
        const double bi = b[2 * i + 1];
        b[2 * i] = ar * br - ai * bi;
        b[2 * i + 1] = ar * bi + ai * br;
    }
}
"#;

fn driver_err(kind: fn(String) -> DeviceError) -> impl Fn(DriverError) -> DeviceError {
    move |e| kind(format!("{e:?}"))
}

/// Out-of-memory becomes [`DeviceError::OutOfMemory`]; anything else is a
/// failed transfer.
fn alloc_error<F>(err: DriverError, requested: usize, available: F) -> DeviceError
where
    F: FnOnce() -> usize,
{
    if err.0 == CUresult::CUDA_ERROR_OUT_OF_MEMORY {
        DeviceError::OutOfMemory {
            requested,
            available: available(),
        }
    } else {
        DeviceError::Transfer(format!("allocating {requested} bytes: {err:?}"))
    }
}

fn cufft_err(e: cufft::CufftError) -> DeviceError {
    DeviceError::Plan(format!("{e:?}"))
}

/// Interleaved `re, im` pairs in device memory.
pub struct CudaComplexBuffer {
    data: CudaSlice<f64>,
    bins: usize,
}

/// A cuFFT plan handle bound to the device stream, destroyed on drop.
pub struct CufftPlan {
    handle: cufft_sys::cufftHandle,
    n: usize,
}

impl Drop for CufftPlan {
    fn drop(&mut self) {
        // SAFETY: the handle was created by `plan_1d` and is destroyed once.
        if let Err(e) = unsafe { cufft::destroy(self.handle) } {
            debug!("failed to destroy cuFFT plan: {e:?}");
        }
    }
}

/// The `multiply_inplace` function loaded from NVRTC-compiled PTX.
pub struct CudaMultiplyKernel {
    func: CudaFunction,
}

/// Device 0 (or another ordinal) driven through its default stream.
pub struct CudaDevice {
    ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    ordinal: usize,
}

impl fmt::Debug for CudaDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudaDevice")
            .field("ordinal", &self.ordinal)
            .finish_non_exhaustive()
    }
}

impl CudaDevice {
    /// Create a context on the device with the given ordinal.
    pub fn new(ordinal: usize) -> Result<Self, DeviceError> {
        let ctx = CudaContext::new(ordinal).map_err(driver_err(DeviceError::Unavailable))?;
        let stream = ctx.default_stream();
        Ok(Self {
            ctx,
            stream,
            ordinal,
        })
    }

    fn plan(&self, n: usize, kind: cufft_sys::cufftType) -> Result<CufftPlan, DeviceError> {
        let nx = i32::try_from(n)
            .map_err(|_| DeviceError::Plan(format!("transform length {n} exceeds i32")))?;
        self.ctx
            .bind_to_thread()
            .map_err(driver_err(DeviceError::Unavailable))?;
        // SAFETY: the context is bound to this thread.
        let handle = unsafe { cufft::plan_1d(nx, kind, 1) }.map_err(cufft_err)?;
        let plan = CufftPlan { handle, n };
        // SAFETY: the plan and the stream both belong to `self.ctx`.
        unsafe { cufft::set_stream(plan.handle, self.stream.cu_stream() as _) }
            .map_err(cufft_err)?;
        Ok(plan)
    }

    fn alloc_f64(&self, len: usize) -> Result<CudaSlice<f64>, DeviceError> {
        self.stream.alloc_zeros::<f64>(len).map_err(|e| {
            alloc_error(e, len * std::mem::size_of::<f64>(), || {
                self.free_memory().unwrap_or(0)
            })
        })
    }
}

fn check_len(what: &str, expected: usize, got: usize) -> Result<(), DeviceError> {
    if expected != got {
        return Err(DeviceError::Launch(format!(
            "{what}: expected {expected} elements, got {got}"
        )));
    }
    Ok(())
}

impl ComputeDevice for CudaDevice {
    type RealBuffer = CudaSlice<f64>;
    type ComplexBuffer = CudaComplexBuffer;
    type ForwardPlan = CufftPlan;
    type InversePlan = CufftPlan;
    type MultiplyKernel = CudaMultiplyKernel;

    fn name(&self) -> String {
        self.ctx
            .name()
            .unwrap_or_else(|_| format!("CUDA device {}", self.ordinal))
    }

    fn free_memory(&self) -> Result<usize, DeviceError> {
        self.ctx
            .bind_to_thread()
            .map_err(driver_err(DeviceError::Unavailable))?;
        let (free, _total) = cudarc::driver::result::mem_get_info()
            .map_err(driver_err(DeviceError::Unavailable))?;
        Ok(free)
    }

    fn compile_multiply_kernel(&self) -> Result<Self::MultiplyKernel, DeviceError> {
        let ptx = compile_ptx(MULTIPLY_INPLACE_SRC)
            .map_err(|e| DeviceError::KernelCompilation(format!("{e:?}")))?;
        let module = self
            .ctx
            .load_module(ptx)
            .map_err(driver_err(DeviceError::KernelCompilation))?;
        let func = module
            .load_function("multiply_inplace")
            .map_err(driver_err(DeviceError::KernelCompilation))?;
        Ok(CudaMultiplyKernel { func })
    }

    fn plan_forward(&self, n: usize) -> Result<Self::ForwardPlan, DeviceError> {
        self.plan(n, cufft_sys::cufftType::CUFFT_D2Z)
    }

    fn plan_inverse(&self, n: usize) -> Result<Self::InversePlan, DeviceError> {
        self.plan(n, cufft_sys::cufftType::CUFFT_Z2D)
    }

    fn alloc_real(&self, len: usize) -> Result<Self::RealBuffer, DeviceError> {
        self.alloc_f64(len)
    }

    fn alloc_complex(&self, len: usize) -> Result<Self::ComplexBuffer, DeviceError> {
        let data = self.alloc_f64(2 * len)?;
        Ok(CudaComplexBuffer { data, bins: len })
    }

    fn upload_complex(&self, host: &[Complex<f64>]) -> Result<Self::ComplexBuffer, DeviceError> {
        let interleaved = host.iter().flat_map(|c| [c.re, c.im]).collect::<Vec<_>>();
        let mut data = self.alloc_f64(interleaved.len())?;
        self.stream
            .memcpy_htod(&interleaved, &mut data)
            .map_err(driver_err(DeviceError::Transfer))?;
        Ok(CudaComplexBuffer {
            data,
            bins: host.len(),
        })
    }

    fn upload_real(&self, host: &[f64], dst: &mut Self::RealBuffer) -> Result<(), DeviceError> {
        self.stream
            .memcpy_htod(host, dst)
            .map_err(driver_err(DeviceError::Transfer))
    }

    fn download_real(&self, src: &Self::RealBuffer, host: &mut [f64]) -> Result<(), DeviceError> {
        self.stream
            .memcpy_dtoh(src, host)
            .map_err(driver_err(DeviceError::Transfer))?;
        self.stream
            .synchronize()
            .map_err(driver_err(DeviceError::Transfer))
    }

    fn execute_forward(
        &self,
        plan: &Self::ForwardPlan,
        input: &mut Self::RealBuffer,
        output: &mut Self::ComplexBuffer,
    ) -> Result<(), DeviceError> {
        check_len("forward input", plan.n, input.len())?;
        check_len("forward output", half_spectrum_len(plan.n), output.bins)?;
        let (idata, _in_guard) = input.device_ptr_mut(&self.stream);
        let (odata, _out_guard) = output.data.device_ptr_mut(&self.stream);
        // SAFETY: both buffers live on the plan's stream and have the sizes
        // a D2Z plan of length `plan.n` reads and writes.
        unsafe { cufft::exec_d2z(plan.handle, idata as *mut _, odata as *mut _) }
            .map_err(|e| DeviceError::Launch(format!("cufftExecD2Z: {e:?}")))
    }

    fn execute_inverse(
        &self,
        plan: &Self::InversePlan,
        input: &mut Self::ComplexBuffer,
        output: &mut Self::RealBuffer,
    ) -> Result<(), DeviceError> {
        check_len("inverse input", half_spectrum_len(plan.n), input.bins)?;
        check_len("inverse output", plan.n, output.len())?;
        let (idata, _in_guard) = input.data.device_ptr_mut(&self.stream);
        let (odata, _out_guard) = output.device_ptr_mut(&self.stream);
        // SAFETY: as for the forward transform; Z2D may overwrite `input`,
        // which only ever holds scratch spectra.
        unsafe { cufft::exec_z2d(plan.handle, idata as *mut _, odata as *mut _) }
            .map_err(|e| DeviceError::Launch(format!("cufftExecZ2D: {e:?}")))
    }

    fn multiply_inplace(
        &self,
        kernel: &Self::MultiplyKernel,
        a: &Self::ComplexBuffer,
        b: &mut Self::ComplexBuffer,
    ) -> Result<(), DeviceError> {
        check_len("multiply_inplace", a.bins, b.bins)?;
        let n = i32::try_from(b.bins)
            .map_err(|_| DeviceError::Launch(format!("{} bins exceed i32", b.bins)))?;
        let cfg = LaunchConfig::for_num_elems(b.bins as u32);
        let mut launch = self.stream.launch_builder(&kernel.func);
        launch.arg(&a.data).arg(&mut b.data).arg(&n);
        // SAFETY: the kernel signature is (const double*, double*, int) and
        // both buffers hold `2 * n` doubles.
        unsafe { launch.launch(cfg) }
            .map(|_| ())
            .map_err(driver_err(DeviceError::Launch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_memory_is_reported_with_sizes() {
        let err = alloc_error(DriverError(CUresult::CUDA_ERROR_OUT_OF_MEMORY), 4096, || 512);
        assert_eq!(
            err,
            DeviceError::OutOfMemory {
                requested: 4096,
                available: 512,
            }
        );
    }

    #[test]
    fn other_allocation_failures_are_transfers() {
        let mut queried = false;
        let err = alloc_error(DriverError(CUresult::CUDA_ERROR_INVALID_VALUE), 64, || {
            queried = true;
            0
        });
        assert!(matches!(err, DeviceError::Transfer(_)));
        assert!(!queried);
    }
}
