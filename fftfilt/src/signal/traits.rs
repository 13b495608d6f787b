//! Trait interfaces for signal-processing capabilities.

use crate::kernel::{ExecInvariantViolation, Read1D, Write1D};

/// Repeated 1D FFT-domain multiplication by a fixed filter.
///
/// Implementations reuse transform plans and buffers between calls, so
/// running takes `&mut self`.
pub trait FftMultiply1D<T> {
    /// Filter `input` into a caller-provided output buffer of the same length.
    fn run_into<I, O>(&mut self, input: &I, out: &mut O) -> Result<(), ExecInvariantViolation>
    where
        I: Read1D<T> + ?Sized,
        O: Write1D<T> + ?Sized;

    /// Filter `input` and allocate the output.
    fn run_alloc<I>(&mut self, input: &I) -> Result<Vec<T>, ExecInvariantViolation>
    where
        I: Read1D<T> + ?Sized;
}
