//! A compute device that executes the device contract in host memory.
//!
//! Used to exercise the accelerated code path (half-spectrum transforms,
//! pre-scaled filter, in-place multiply kernel) without GPU hardware. Memory
//! is accounted against a budget so allocation failures can be provoked, and
//! the device can be "lost" to exercise apply-time failures.

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use num_traits::Zero;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::device::half_spectrum_len;
use super::{ComputeDevice, DeviceError};

/// Memory budget of [`EmulatedDevice::new`].
pub const DEFAULT_EMULATED_MEMORY: usize = 4 << 30;

struct Ledger {
    limit: usize,
    allocated: AtomicUsize,
    live: AtomicUsize,
    total_allocations: AtomicUsize,
    lost: AtomicBool,
}

impl Ledger {
    fn reserve(&self, bytes: usize) -> Result<(), DeviceError> {
        self.allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= self.limit)
            })
            .map_err(|used| DeviceError::OutOfMemory {
                requested: bytes,
                available: self.limit.saturating_sub(used),
            })?;
        self.live.fetch_add(1, Ordering::AcqRel);
        self.total_allocations.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn release(&self, bytes: usize) {
        self.allocated.fetch_sub(bytes, Ordering::AcqRel);
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Host-memory buffer accounted against its device's memory budget.
pub struct EmulatedBuffer<T> {
    data: Vec<T>,
    ledger: Arc<Ledger>,
}

impl<T> EmulatedBuffer<T> {
    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read the buffer contents without a device transfer.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

impl<T> Drop for EmulatedBuffer<T> {
    fn drop(&mut self) {
        self.ledger
            .release(self.data.len() * core::mem::size_of::<T>());
    }
}

impl<T> fmt::Debug for EmulatedBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatedBuffer")
            .field("len", &self.data.len())
            .finish()
    }
}

/// Forward plan: full complex FFT truncated to the half spectrum.
pub struct EmulatedForwardPlan {
    n: usize,
    fft: Arc<dyn Fft<f64>>,
}

/// Inverse plan: Hermitian extension followed by a full complex inverse FFT.
pub struct EmulatedInversePlan {
    n: usize,
    fft: Arc<dyn Fft<f64>>,
}

/// The emulated in-place multiply kernel.
#[derive(Debug, Clone, Copy)]
pub struct EmulatedMultiplyKernel;

/// Software stand-in for a GPU.
///
/// Clones share the same memory ledger and lost flag.
#[derive(Clone)]
pub struct EmulatedDevice {
    ledger: Arc<Ledger>,
    fail_kernel_compile: bool,
}

impl fmt::Debug for EmulatedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatedDevice")
            .field("memory_limit", &self.ledger.limit)
            .field("allocated", &self.allocated_bytes())
            .field("lost", &self.is_lost())
            .finish()
    }
}

impl Default for EmulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedDevice {
    /// Device with [`DEFAULT_EMULATED_MEMORY`] bytes of memory.
    pub fn new() -> Self {
        Self::with_memory_limit(DEFAULT_EMULATED_MEMORY)
    }

    /// Device whose allocations fail once `limit` bytes are in use.
    pub fn with_memory_limit(limit: usize) -> Self {
        Self {
            ledger: Arc::new(Ledger {
                limit,
                allocated: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
                total_allocations: AtomicUsize::new(0),
                lost: AtomicBool::new(false),
            }),
            fail_kernel_compile: false,
        }
    }

    /// Make [`ComputeDevice::compile_multiply_kernel`] fail.
    pub fn with_kernel_compile_failure(mut self) -> Self {
        self.fail_kernel_compile = true;
        self
    }

    /// Simulate a device reset: every later call fails with [`DeviceError::DeviceLost`].
    pub fn lose(&self) {
        self.ledger.lost.store(true, Ordering::Release);
    }

    /// Whether [`EmulatedDevice::lose`] was called.
    pub fn is_lost(&self) -> bool {
        self.ledger.lost.load(Ordering::Acquire)
    }

    /// Bytes currently held by live buffers.
    pub fn allocated_bytes(&self) -> usize {
        self.ledger.allocated.load(Ordering::Acquire)
    }

    /// Number of live buffers.
    pub fn live_allocations(&self) -> usize {
        self.ledger.live.load(Ordering::Acquire)
    }

    /// Number of successful allocations over the device lifetime.
    pub fn total_allocations(&self) -> usize {
        self.ledger.total_allocations.load(Ordering::Acquire)
    }

    fn check_alive(&self) -> Result<(), DeviceError> {
        if self.is_lost() {
            return Err(DeviceError::DeviceLost);
        }
        Ok(())
    }

    fn alloc<T: Clone>(&self, len: usize, fill: T) -> Result<EmulatedBuffer<T>, DeviceError> {
        self.check_alive()?;
        let bytes = len
            .checked_mul(core::mem::size_of::<T>())
            .ok_or(DeviceError::OutOfMemory {
                requested: usize::MAX,
                available: self.ledger.limit.saturating_sub(self.allocated_bytes()),
            })?;
        self.ledger.reserve(bytes)?;
        Ok(EmulatedBuffer {
            data: vec![fill; len],
            ledger: Arc::clone(&self.ledger),
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

impl ComputeDevice for EmulatedDevice {
    type RealBuffer = EmulatedBuffer<f64>;
    type ComplexBuffer = EmulatedBuffer<Complex<f64>>;
    type ForwardPlan = EmulatedForwardPlan;
    type InversePlan = EmulatedInversePlan;
    type MultiplyKernel = EmulatedMultiplyKernel;

    fn name(&self) -> String {
        "emulated device".to_string()
    }

    fn free_memory(&self) -> Result<usize, DeviceError> {
        self.check_alive()?;
        Ok(self.ledger.limit.saturating_sub(self.allocated_bytes()))
    }

    fn compile_multiply_kernel(&self) -> Result<Self::MultiplyKernel, DeviceError> {
        self.check_alive()?;
        if self.fail_kernel_compile {
            return Err(DeviceError::KernelCompilation(
                "multiply_inplace: emulated compile failure".into(),
            ));
        }
        Ok(EmulatedMultiplyKernel)
    }

    fn plan_forward(&self, n: usize) -> Result<Self::ForwardPlan, DeviceError> {
        self.check_alive()?;
        if n == 0 {
            return Err(DeviceError::Plan("transform length must be > 0".into()));
        }
        let fft = FftPlanner::new().plan_fft_forward(n);
        Ok(EmulatedForwardPlan { n, fft })
    }

    fn plan_inverse(&self, n: usize) -> Result<Self::InversePlan, DeviceError> {
        self.check_alive()?;
        if n == 0 {
            return Err(DeviceError::Plan("transform length must be > 0".into()));
        }
        let fft = FftPlanner::new().plan_fft_inverse(n);
        Ok(EmulatedInversePlan { n, fft })
    }

    fn alloc_real(&self, len: usize) -> Result<Self::RealBuffer, DeviceError> {
        self.alloc(len, 0.0)
    }

    fn alloc_complex(&self, len: usize) -> Result<Self::ComplexBuffer, DeviceError> {
        self.alloc(len, Complex::zero())
    }

    fn upload_complex(&self, host: &[Complex<f64>]) -> Result<Self::ComplexBuffer, DeviceError> {
        let mut buf = self.alloc_complex(host.len())?;
        buf.data.copy_from_slice(host);
        Ok(buf)
    }

    fn upload_real(&self, host: &[f64], dst: &mut Self::RealBuffer) -> Result<(), DeviceError> {
        self.check_alive()?;
        if host.len() != dst.len() {
            return Err(DeviceError::Transfer(format!(
                "host slice has {} samples, device buffer {}",
                host.len(),
                dst.len()
            )));
        }
        dst.data.copy_from_slice(host);
        Ok(())
    }

    fn download_real(&self, src: &Self::RealBuffer, host: &mut [f64]) -> Result<(), DeviceError> {
        self.check_alive()?;
        if host.len() != src.len() {
            return Err(DeviceError::Transfer(format!(
                "host slice has {} samples, device buffer {}",
                host.len(),
                src.len()
            )));
        }
        host.copy_from_slice(&src.data);
        Ok(())
    }

    fn execute_forward(
        &self,
        plan: &Self::ForwardPlan,
        input: &mut Self::RealBuffer,
        output: &mut Self::ComplexBuffer,
    ) -> Result<(), DeviceError> {
        self.check_alive()?;
        check_len("forward input", plan.n, input.len())?;
        check_len("forward output", half_spectrum_len(plan.n), output.len())?;

        let mut work = input
            .data
            .iter()
            .map(|&x| Complex::new(x, 0.0))
            .collect::<Vec<_>>();
        plan.fft.process(&mut work);
        let bins = output.len();
        output.data.copy_from_slice(&work[..bins]);
        Ok(())
    }

    fn execute_inverse(
        &self,
        plan: &Self::InversePlan,
        input: &mut Self::ComplexBuffer,
        output: &mut Self::RealBuffer,
    ) -> Result<(), DeviceError> {
        self.check_alive()?;
        let n = plan.n;
        check_len("inverse input", half_spectrum_len(n), input.len())?;
        check_len("inverse output", n, output.len())?;

        let mut work = vec![Complex::zero(); n];
        let bins = half_spectrum_len(n).min(n);
        work[..bins].copy_from_slice(&input.data[..bins]);
        if n > 1 {
            let max_k = if n % 2 == 0 { n / 2 - 1 } else { n / 2 };
            for k in 1..=max_k {
                work[n - k] = work[k].conj();
            }
        }
        plan.fft.process(&mut work);
        for (dst, src) in output.data.iter_mut().zip(work) {
            *dst = src.re;
        }
        Ok(())
    }

    fn multiply_inplace(
        &self,
        _kernel: &Self::MultiplyKernel,
        a: &Self::ComplexBuffer,
        b: &mut Self::ComplexBuffer,
    ) -> Result<(), DeviceError> {
        self.check_alive()?;
        check_len("multiply_inplace", a.len(), b.len())?;
        for (bi, ai) in b.data.iter_mut().zip(&a.data) {
            *bi = *ai * *bi;
        }
        Ok(())
    }
}
