//! Frequency-domain FIR filtering.

mod fft_multiply;
mod frequency_filter;

/// Trait-first capability interfaces.
pub mod traits;

pub use fft_multiply::*;
pub use frequency_filter::*;
