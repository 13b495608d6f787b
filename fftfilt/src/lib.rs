#![deny(missing_docs)]
//! Repeated FFT-domain FIR filtering with optional device acceleration.
//!
//! The same frequency-domain filter is applied to many independent signals
//! of equal length. Setup (transform plans, buffers, uploading the filter)
//! happens once; each signal then costs one forward transform, one
//! elementwise multiply and one inverse transform.
//!
//! ```
//! use fftfilt::accel::{CapabilityState, EmulatedDevice};
//! use fftfilt::signal::{fft_multiply_repeated, prepare, FrequencyFilter, NJobs};
//!
//! let capability = CapabilityState::<EmulatedDevice>::disabled();
//! let h_fft = FrequencyFilter::from_impulse_response(&[0.5, 0.5], 8).unwrap();
//! let mut prepared = prepare(NJobs::Cuda, &h_fft, &capability);
//! assert_eq!(prepared.n_jobs, 1);
//!
//! let x = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
//! let y = fft_multiply_repeated(&mut prepared.context, &x).unwrap();
//! assert!((y[0] - 0.5).abs() < 1e-12 && (y[1] - 0.5).abs() < 1e-12);
//! ```
//!
//! Acceleration is opt-in through the `FFTFILT_USE_CUDA` switch (see
//! [`config`]) and the `cuda` cargo feature. Whenever it is unavailable or
//! its setup fails, the host path produces the same result.

/// Accelerator capability probe and compute devices.
pub mod accel;

/// Accelerator configuration.
pub mod config;

/// Shared kernel lifecycle, I/O adapters and errors.
pub mod kernel;

/// Frequency-domain filtering.
pub mod signal;
