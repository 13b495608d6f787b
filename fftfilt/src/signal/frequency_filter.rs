use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::kernel::ConfigError;

/// A circularly applied FIR filter already transformed to the frequency domain.
///
/// Always holds at least one coefficient.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyFilter {
    coeffs: Vec<Complex<f64>>,
}

impl FrequencyFilter {
    /// Wrap frequency-domain coefficients.
    pub fn new(coeffs: Vec<Complex<f64>>) -> Result<Self, ConfigError> {
        if coeffs.is_empty() {
            return Err(ConfigError::EmptyInput { arg: "h_fft" });
        }
        Ok(Self { coeffs })
    }

    /// The all-ones spectrum of length `n`, i.e. convolution with a unit impulse.
    pub fn identity(n: usize) -> Result<Self, ConfigError> {
        Self::new(vec![Complex::new(1.0, 0.0); n])
    }

    /// Zero-pad the real impulse response `h` to `n_fft` samples and transform it.
    ///
    /// The result is conjugate-symmetric, so host and device execution agree.
    pub fn from_impulse_response(h: &[f64], n_fft: usize) -> Result<Self, ConfigError> {
        if h.is_empty() {
            return Err(ConfigError::EmptyInput { arg: "h" });
        }
        if n_fft < h.len() {
            return Err(ConfigError::InvalidArgument {
                arg: "n_fft",
                reason: "n_fft must be at least the impulse response length",
            });
        }
        let mut buf = vec![Complex::new(0.0, 0.0); n_fft];
        for (dst, &src) in buf.iter_mut().zip(h) {
            *dst = Complex::new(src, 0.0);
        }
        FftPlanner::<f64>::new()
            .plan_fft_forward(n_fft)
            .process(&mut buf);
        Ok(Self { coeffs: buf })
    }

    /// Number of coefficients, which is also the signal length it applies to.
    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }

    /// Borrow the coefficients.
    pub fn as_slice(&self) -> &[Complex<f64>] {
        &self.coeffs
    }

    /// Whether `h[k] == conj(h[n - k])` for every bin within `tol`.
    ///
    /// Only such spectra describe real filters; device execution keeps just
    /// the half spectrum and would otherwise disagree with the host.
    pub fn is_conjugate_symmetric(&self, tol: f64) -> bool {
        let n = self.coeffs.len();
        let scale = self
            .coeffs
            .iter()
            .map(|c| c.norm())
            .fold(0.0f64, f64::max)
            .max(1.0);
        (1..n).all(|k| (self.coeffs[k] - self.coeffs[n - k].conj()).norm() <= tol * scale)
            && self.coeffs[0].im.abs() <= tol * scale
    }
}

impl TryFrom<Vec<Complex<f64>>> for FrequencyFilter {
    type Error = ConfigError;

    fn try_from(value: Vec<Complex<f64>>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl AsRef<[Complex<f64>]> for FrequencyFilter {
    fn as_ref(&self) -> &[Complex<f64>] {
        &self.coeffs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn empty_spectrum_is_rejected() {
        assert_eq!(
            FrequencyFilter::new(Vec::new()),
            Err(ConfigError::EmptyInput { arg: "h_fft" })
        );
        assert!(FrequencyFilter::identity(0).is_err());
    }

    #[test]
    fn impulse_response_transform_matches_dft() {
        let h = [0.25, 0.5, 0.25];
        let filter = FrequencyFilter::from_impulse_response(&h, 4).expect("valid");
        assert_eq!(filter.len(), 4);
        let expected = [
            Complex::new(1.0, 0.0),
            Complex::new(0.0, -0.5),
            Complex::new(0.0, 0.0),
            Complex::new(0.0, 0.5),
        ];
        for (got, want) in filter.as_slice().iter().zip(expected) {
            assert_abs_diff_eq!(got.re, want.re, epsilon = 1e-12);
            assert_abs_diff_eq!(got.im, want.im, epsilon = 1e-12);
        }
        assert!(filter.is_conjugate_symmetric(1e-12));
    }

    #[test]
    fn impulse_response_longer_than_transform_is_rejected() {
        let err = FrequencyFilter::from_impulse_response(&[1.0; 8], 4).expect_err("too long");
        assert!(matches!(err, ConfigError::InvalidArgument { arg: "n_fft", .. }));
        assert!(FrequencyFilter::from_impulse_response(&[], 4).is_err());
    }

    #[test]
    fn complex_filters_are_not_symmetric() {
        let filter = FrequencyFilter::new(vec![
            Complex::new(1.0, 0.0),
            Complex::new(0.0, 1.0),
            Complex::new(0.0, 1.0),
        ])
        .expect("non-empty");
        assert!(!filter.is_conjugate_symmetric(1e-12));
        assert!(FrequencyFilter::identity(5)
            .expect("identity")
            .is_conjugate_symmetric(0.0));
    }
}
