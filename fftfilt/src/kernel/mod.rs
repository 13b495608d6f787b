//! Shared trait-first kernel substrate.
//!
//! Constructor validation, 1D buffer adapters and the error types raised by
//! checked kernel entrypoints.

mod errors;
mod io;
mod lifecycle;

pub use errors::*;
pub(crate) use io::expect_len;
pub use io::{Read1D, Write1D};
pub use lifecycle::*;
