//! Repeated FFT-domain multiplication by one filter, on the host or on a
//! compute device.
//!
//! Setup happens once per filter: [`setup_fft_multiply_repeated`] (or
//! [`FftMultiplyKernel::try_new`]) decides whether to use the accelerator,
//! builds transform plans and buffers, and returns an [`ExecutionContext`]
//! that [`fft_multiply_repeated`] then reuses for every signal of the batch.
//!
//! Both paths compute the circular convolution `real(ifft(h_fft * fft(x)))`.
//! The host path multiplies the full spectrum; the device path keeps only the
//! `n / 2 + 1` non-redundant bins and folds the `1 / n` inverse scaling into
//! the uploaded filter.

use core::fmt;
use core::num::NonZeroUsize;
use core::str::FromStr;
use std::sync::Arc;

use ndarray::Array2;
use num_traits::Zero;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tracing::{debug, info, warn};

use super::traits::FftMultiply1D;
use super::FrequencyFilter;
use crate::accel::{half_spectrum_len, Accelerator, CapabilityState, ComputeDevice, DeviceError};
use crate::kernel::{
    expect_len, ConfigError, ExecInvariantViolation, KernelLifecycle, Read1D, Write1D,
};

/// Parallelism requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NJobs {
    /// Run on the host; the caller may use this many threads across signals.
    Threads(NonZeroUsize),
    /// Use the accelerator when available. Parses from `"cuda"`.
    Cuda,
}

impl NJobs {
    /// Host execution with `n` jobs.
    pub fn threads(n: usize) -> Result<Self, ConfigError> {
        NonZeroUsize::new(n)
            .map(Self::Threads)
            .ok_or(ConfigError::InvalidArgument {
                arg: "n_jobs",
                reason: "must be a positive integer or `cuda`",
            })
    }
}

impl Default for NJobs {
    fn default() -> Self {
        Self::Threads(NonZeroUsize::MIN)
    }
}

impl FromStr for NJobs {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("cuda") {
            return Ok(Self::Cuda);
        }
        let n = s.parse::<usize>().map_err(|_| ConfigError::InvalidArgument {
            arg: "n_jobs",
            reason: "must be a positive integer or `cuda`",
        })?;
        Self::threads(n)
    }
}

impl fmt::Display for NJobs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NJobs::Threads(n) => write!(f, "{n}"),
            NJobs::Cuda => write!(f, "cuda"),
        }
    }
}

/// Host execution state: the full-length filter plus cached FFT plans and
/// work buffers.
pub struct HostContext {
    h_fft: Vec<Complex<f64>>,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    work: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl HostContext {
    /// Plan full-length complex transforms for `h_fft`.
    pub fn new(h_fft: &FrequencyFilter) -> Self {
        let n = h_fft.len();
        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(n);
        let inverse = planner.plan_fft_inverse(n);
        let scratch_length = std::cmp::max(
            forward.get_inplace_scratch_len(),
            inverse.get_inplace_scratch_len(),
        );
        Self {
            h_fft: h_fft.as_slice().to_vec(),
            forward,
            inverse,
            work: vec![Complex::zero(); n],
            scratch: vec![Complex::zero(); scratch_length],
        }
    }

    fn apply(&mut self, x: &[f64], out: &mut [f64]) {
        for (w, &s) in self.work.iter_mut().zip(x) {
            *w = Complex::new(s, 0.0);
        }
        self.forward.process_with_scratch(&mut self.work, &mut self.scratch);
        for (w, h) in self.work.iter_mut().zip(&self.h_fft) {
            *w = *h * *w;
        }
        self.inverse.process_with_scratch(&mut self.work, &mut self.scratch);

        let scale = 1.0 / self.h_fft.len() as f64;
        for (o, w) in out.iter_mut().zip(&self.work) {
            *o = w.re * scale;
        }
    }
}

/// Device execution state: plans, reusable buffers and the device-resident
/// filter (truncated to the half spectrum and pre-divided by `n`).
pub struct DeviceContext<D: ComputeDevice> {
    n: usize,
    forward_plan: D::ForwardPlan,
    inverse_plan: D::InversePlan,
    x: D::RealBuffer,
    x_fft: D::ComplexBuffer,
    h_fft: D::ComplexBuffer,
    accelerator: Arc<Accelerator<D>>,
}

impl<D: ComputeDevice> DeviceContext<D> {
    /// The device-resident adjusted filter.
    pub fn adjusted_filter(&self) -> &D::ComplexBuffer {
        &self.h_fft
    }

    /// The accelerator these resources belong to.
    pub fn accelerator(&self) -> &Arc<Accelerator<D>> {
        &self.accelerator
    }

    fn apply(&mut self, x: &[f64], out: &mut [f64]) -> Result<(), DeviceError> {
        let device = self.accelerator.device();
        device.upload_real(x, &mut self.x)?;
        device.execute_forward(&self.forward_plan, &mut self.x, &mut self.x_fft)?;
        self.accelerator
            .multiply_inplace(&self.h_fft, &mut self.x_fft)?;
        // Normalization already lives in `h_fft`.
        device.execute_inverse(&self.inverse_plan, &mut self.x_fft, &mut self.x)?;
        device.download_real(&self.x, out)
    }
}

/// Build every device resource for `h_fft`, or fail without leaving any of
/// them allocated.
pub fn setup_device_context<D: ComputeDevice>(
    accelerator: &Arc<Accelerator<D>>,
    h_fft: &FrequencyFilter,
) -> Result<DeviceContext<D>, DeviceError> {
    let n = h_fft.len();
    let bins = half_spectrum_len(n);
    let device = accelerator.device();

    let forward_plan = device.plan_forward(n)?;
    let inverse_plan = device.plan_inverse(n)?;
    let x_fft = device.alloc_complex(bins)?;
    let x = device.alloc_real(n)?;

    let scale = 1.0 / n as f64;
    let adjusted = h_fft.as_slice()[..bins]
        .iter()
        .map(|c| *c * scale)
        .collect::<Vec<_>>();
    let h_fft = device.upload_complex(&adjusted)?;

    Ok(DeviceContext {
        n,
        forward_plan,
        inverse_plan,
        x,
        x_fft,
        h_fft,
        accelerator: Arc::clone(accelerator),
    })
}

/// Cached resources for one filter, reused across every signal of a batch.
pub enum ExecutionContext<D: ComputeDevice> {
    /// Host FFTs.
    Host(HostContext),
    /// Accelerated FFTs and multiply kernel.
    Device(DeviceContext<D>),
}

impl<D: ComputeDevice> fmt::Debug for ExecutionContext<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionContext::Host(ctx) => f
                .debug_struct("Host")
                .field("n", &ctx.h_fft.len())
                .finish(),
            ExecutionContext::Device(ctx) => f
                .debug_struct("Device")
                .field("n", &ctx.n)
                .field("device", ctx.accelerator.device())
                .finish(),
        }
    }
}

impl<D: ComputeDevice> ExecutionContext<D> {
    /// Whether signals run on the accelerator.
    pub fn use_acceleration(&self) -> bool {
        matches!(self, ExecutionContext::Device(_))
    }

    /// Signal length this context was prepared for.
    pub fn len(&self) -> usize {
        match self {
            ExecutionContext::Host(ctx) => ctx.h_fft.len(),
            ExecutionContext::Device(ctx) => ctx.n,
        }
    }

    /// Always `false`: contexts are built from non-empty filters.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Filter `x` into `out`. Both must have [`ExecutionContext::len`] samples.
    pub fn apply_into(
        &mut self,
        x: &[f64],
        out: &mut [f64],
    ) -> Result<(), ExecInvariantViolation> {
        expect_len("x", self.len(), x.len())?;
        expect_len("out", self.len(), out.len())?;
        match self {
            ExecutionContext::Host(ctx) => {
                ctx.apply(x, out);
                Ok(())
            }
            ExecutionContext::Device(ctx) => {
                ctx.apply(x, out).map_err(ExecInvariantViolation::from)
            }
        }
    }
}

/// Result of [`setup_fft_multiply_repeated`].
#[derive(Debug)]
pub struct Prepared<D: ComputeDevice> {
    /// Job count the caller should use: 1 whenever [`NJobs::Cuda`] was requested.
    pub n_jobs: usize,
    /// Resources for [`fft_multiply_repeated`].
    pub context: ExecutionContext<D>,
}

/// Decide host or device execution for `h_fft` and build the matching context.
///
/// Accelerator problems never surface as errors: an unavailable accelerator
/// or a failed setup (typically out of device memory) is logged and yields a
/// host context.
pub fn prepare<D: ComputeDevice>(
    n_jobs: NJobs,
    h_fft: &FrequencyFilter,
    capability: &CapabilityState<D>,
) -> Prepared<D> {
    let n_jobs = match n_jobs {
        NJobs::Threads(n) => {
            return Prepared {
                n_jobs: n.get(),
                context: ExecutionContext::Host(HostContext::new(h_fft)),
            };
        }
        NJobs::Cuda => 1,
    };

    let Some(accelerator) = capability.accelerator() else {
        info!("CUDA not used, machine is not CUDA capable, falling back to n_jobs=1");
        return Prepared {
            n_jobs,
            context: ExecutionContext::Host(HostContext::new(h_fft)),
        };
    };

    if !h_fft.is_conjugate_symmetric(1e-9) {
        warn!("h_fft is not conjugate-symmetric; device results keep only its first half");
    }

    match setup_device_context(accelerator, h_fft) {
        Ok(ctx) => {
            info!("Using CUDA for FFT FIR filtering");
            debug!(n = h_fft.len(), bins = half_spectrum_len(h_fft.len()), "device context ready");
            Prepared {
                n_jobs,
                context: ExecutionContext::Device(ctx),
            }
        }
        Err(err) => {
            info!(
                "CUDA not used, could not instantiate memory (arrays may be too large): {err}, falling back to n_jobs=1"
            );
            Prepared {
                n_jobs,
                context: ExecutionContext::Host(HostContext::new(h_fft)),
            }
        }
    }
}

/// Validate `h_fft` and [`prepare`] a context for repeated multiplication.
pub fn setup_fft_multiply_repeated<D: ComputeDevice>(
    n_jobs: NJobs,
    h_fft: &[Complex<f64>],
    capability: &CapabilityState<D>,
) -> Result<Prepared<D>, ConfigError> {
    let filter = FrequencyFilter::new(h_fft.to_vec())?;
    Ok(prepare(n_jobs, &filter, capability))
}

/// Filter one signal with a prepared context.
pub fn fft_multiply_repeated<D: ComputeDevice>(
    context: &mut ExecutionContext<D>,
    x: &[f64],
) -> Result<Vec<f64>, ExecInvariantViolation> {
    let mut out = vec![0.0; x.len()];
    context.apply_into(x, &mut out)?;
    Ok(out)
}

/// Constructor config for [`FftMultiplyKernel`].
#[derive(Debug)]
pub struct FftMultiplyConfig<D: ComputeDevice> {
    /// Frequency-domain filter, one coefficient per signal sample.
    pub h_fft: Vec<Complex<f64>>,
    /// Requested parallelism.
    pub n_jobs: NJobs,
    /// Accelerator probe result.
    pub capability: CapabilityState<D>,
}

impl<D: ComputeDevice> Clone for FftMultiplyConfig<D> {
    fn clone(&self) -> Self {
        Self {
            h_fft: self.h_fft.clone(),
            n_jobs: self.n_jobs,
            capability: self.capability.clone(),
        }
    }
}

/// Stateful FFT-multiply kernel owning an [`ExecutionContext`].
#[derive(Debug)]
pub struct FftMultiplyKernel<D: ComputeDevice> {
    n_jobs: usize,
    context: ExecutionContext<D>,
}

impl<D: ComputeDevice> FftMultiplyKernel<D> {
    /// Job count the caller should use across signals.
    pub fn n_jobs(&self) -> usize {
        self.n_jobs
    }

    /// Whether signals run on the accelerator.
    pub fn use_acceleration(&self) -> bool {
        self.context.use_acceleration()
    }

    /// The cached execution context.
    pub fn context(&self) -> &ExecutionContext<D> {
        &self.context
    }

    /// Release the kernel's resources, returning the bare context.
    pub fn into_context(self) -> ExecutionContext<D> {
        self.context
    }

    /// Filter every row of `signals` in place.
    pub fn run_rows(&mut self, signals: &mut Array2<f64>) -> Result<(), ExecInvariantViolation> {
        expect_len("signals.ncols", self.context.len(), signals.ncols())?;
        let mut x = vec![0.0; self.context.len()];
        for mut row in signals.rows_mut() {
            let row = row
                .as_slice_mut()
                .ok_or(ConfigError::NonContiguous { arg: "signals" })?;
            x.copy_from_slice(row);
            self.context.apply_into(&x, row)?;
        }
        Ok(())
    }
}

impl<D: ComputeDevice> KernelLifecycle for FftMultiplyKernel<D> {
    type Config = FftMultiplyConfig<D>;

    fn try_new(config: Self::Config) -> Result<Self, ConfigError> {
        let Prepared { n_jobs, context } =
            setup_fft_multiply_repeated(config.n_jobs, &config.h_fft, &config.capability)?;
        Ok(Self { n_jobs, context })
    }
}

impl<D: ComputeDevice> FftMultiply1D<f64> for FftMultiplyKernel<D> {
    fn run_into<I, O>(&mut self, input: &I, out: &mut O) -> Result<(), ExecInvariantViolation>
    where
        I: Read1D<f64> + ?Sized,
        O: Write1D<f64> + ?Sized,
    {
        let input = input.read_slice().map_err(ExecInvariantViolation::from)?;
        let out_slice = out
            .write_slice_mut()
            .map_err(ExecInvariantViolation::from)?;
        self.context.apply_into(input, out_slice)
    }

    fn run_alloc<I>(&mut self, input: &I) -> Result<Vec<f64>, ExecInvariantViolation>
    where
        I: Read1D<f64> + ?Sized,
    {
        let input = input.read_slice().map_err(ExecInvariantViolation::from)?;
        fft_multiply_repeated(&mut self.context, input)
    }
}
