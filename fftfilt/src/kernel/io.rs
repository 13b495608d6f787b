use super::{ConfigError, ExecInvariantViolation};

use ndarray::{Array1, ArrayView1, ArrayViewMut1};

/// Adapter trait for reading a contiguous 1D signal.
pub trait Read1D<T> {
    /// Borrow the underlying input as a contiguous slice.
    fn read_slice(&self) -> Result<&[T], ConfigError>;
}

/// Adapter trait for writing a contiguous 1D signal.
pub trait Write1D<T> {
    /// Borrow the underlying output as a mutable contiguous slice.
    fn write_slice_mut(&mut self) -> Result<&mut [T], ConfigError>;
}

macro_rules! impl_contiguous_std {
    ($($ty:ty => [$($gen:tt)*]),* $(,)?) => {
        $(
            impl<T, $($gen)*> Read1D<T> for $ty {
                fn read_slice(&self) -> Result<&[T], ConfigError> {
                    Ok(&self[..])
                }
            }

            impl<T, $($gen)*> Write1D<T> for $ty {
                fn write_slice_mut(&mut self) -> Result<&mut [T], ConfigError> {
                    Ok(&mut self[..])
                }
            }
        )*
    };
}

impl_contiguous_std!(
    [T] => [],
    [T; N] => [const N: usize],
    Vec<T> => [],
);

impl<T> Read1D<T> for Array1<T> {
    fn read_slice(&self) -> Result<&[T], ConfigError> {
        self.as_slice()
            .ok_or(ConfigError::NonContiguous { arg: "array" })
    }
}

impl<T> Write1D<T> for Array1<T> {
    fn write_slice_mut(&mut self) -> Result<&mut [T], ConfigError> {
        self.as_slice_mut()
            .ok_or(ConfigError::NonContiguous { arg: "array" })
    }
}

impl<T> Read1D<T> for ArrayView1<'_, T> {
    fn read_slice(&self) -> Result<&[T], ConfigError> {
        self.as_slice()
            .ok_or(ConfigError::NonContiguous { arg: "array_view" })
    }
}

impl<T> Read1D<T> for ArrayViewMut1<'_, T> {
    fn read_slice(&self) -> Result<&[T], ConfigError> {
        self.as_slice().ok_or(ConfigError::NonContiguous {
            arg: "array_view_mut",
        })
    }
}

impl<T> Write1D<T> for ArrayViewMut1<'_, T> {
    fn write_slice_mut(&mut self) -> Result<&mut [T], ConfigError> {
        self.as_slice_mut().ok_or(ConfigError::NonContiguous {
            arg: "array_view_mut",
        })
    }
}

/// Fail with [`ExecInvariantViolation::LengthMismatch`] unless `got == expected`.
pub(crate) fn expect_len(
    arg: &'static str,
    expected: usize,
    got: usize,
) -> Result<(), ExecInvariantViolation> {
    if expected != got {
        return Err(ExecInvariantViolation::LengthMismatch { arg, expected, got });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array1, Array2};

    #[test]
    fn std_containers_expose_their_samples() {
        let a = [0.5f64, -1.0, 2.0];
        assert_eq!(a.read_slice().expect("array adapter"), &[0.5, -1.0, 2.0]);

        let mut v = vec![0.0f64; 3];
        v.write_slice_mut()
            .expect("vec write adapter")
            .copy_from_slice(&a);
        assert_eq!(v.read_slice().expect("vec read adapter")[2], 2.0);
    }

    #[test]
    fn strided_views_are_rejected() {
        let m = Array2::<f64>::zeros((4, 4));
        let column = m.slice(s![.., 1]);
        assert_eq!(
            column.read_slice(),
            Err(ConfigError::NonContiguous { arg: "array_view" })
        );

        let row = m.row(2);
        assert_eq!(row.read_slice().expect("rows are contiguous").len(), 4);
    }

    #[test]
    fn owned_arrays_round_trip_through_adapters() {
        let mut out = Array1::from(vec![0.0f64; 2]);
        out.write_slice_mut()
            .expect("array1 write")
            .copy_from_slice(&[4.0, 5.0]);
        assert_eq!(out.read_slice().expect("array1 read"), &[4.0, 5.0]);
    }

    #[test]
    fn expect_len_reports_both_lengths() {
        assert!(expect_len("signal", 8, 8).is_ok());
        assert_eq!(
            expect_len("signal", 8, 7),
            Err(ExecInvariantViolation::LengthMismatch {
                arg: "signal",
                expected: 8,
                got: 7,
            })
        );
    }
}
