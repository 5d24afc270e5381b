//! Romberg quadrature over a fixed dyadic sample grid.
//!
//! With `d` digits the integrand is sampled once at `2^(d-1) + 1` equally spaced times,
//! then trapezoid estimates on successively halved step sizes are combined by Richardson
//! extrapolation. All components share the same sample grid, so a vector-valued
//! integrand (one column per component) is evaluated in a single call.
use crate::numerical::transcription_errors::TranscriptionError;
use nalgebra::{DMatrix, DVector};

/// Equally spaced sample times `t0 + i (t1 - t0) / 2^(digits-1)`, `i = 0..=2^(digits-1)`.
pub fn romberg_sample_times(t0: f64, t1: f64, digits: usize) -> DVector<f64> {
    let num_panels = 1usize << digits.saturating_sub(1);
    DVector::from_fn(num_panels + 1, |i, _| {
        t0 + i as f64 * (t1 - t0) / num_panels as f64
    })
}

/// Integrates every column of `integrand(times)` over `[t0, t1]`.
///
/// `integrand` receives the sample times and must return a matrix with one row per time
/// and one column per integrated component.
pub fn romberg_integration<F>(
    t0: f64,
    t1: f64,
    digits: usize,
    integrand: F,
) -> Result<DVector<f64>, TranscriptionError>
where
    F: Fn(&DVector<f64>) -> Result<DMatrix<f64>, TranscriptionError>,
{
    if digits == 0 {
        return Err(TranscriptionError::InvalidConfig(
            "romberg digits must be at least 1".to_string(),
        ));
    }
    let times = romberg_sample_times(t0, t1, digits);
    let samples = integrand(&times)?;
    if samples.nrows() != times.len() {
        return Err(TranscriptionError::length(
            "romberg_integration",
            times.len(),
            samples.nrows(),
        ));
    }
    let last = times.len() - 1;

    let mut output = DVector::zeros(samples.ncols());
    for (j, column) in samples.column_iter().enumerate() {
        // prev holds the finished row of the tableau, curr the row being built
        let mut prev = vec![0.0; digits];
        let mut curr = vec![0.0; digits];
        let mut h = t1 - t0;
        prev[0] = h * (column[0] + column[last]) / 2.0;
        for i in 2..=digits {
            let stride = 1usize << (digits - i + 1);
            let midpoint_sum: f64 = (stride / 2..last).step_by(stride).map(|k| column[k]).sum();
            curr[0] = (prev[0] + h * midpoint_sum) / 2.0;
            for k in 1..i {
                let p = 4f64.powi(k as i32);
                curr[k] = (p * curr[k - 1] - prev[k - 1]) / (p - 1.0);
            }
            prev[..i].copy_from_slice(&curr[..i]);
            h /= 2.0;
        }
        output[j] = prev[digits - 1];
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sampled<F: Fn(f64) -> f64>(f: F) -> impl Fn(&DVector<f64>) -> Result<DMatrix<f64>, TranscriptionError> {
        move |t: &DVector<f64>| Ok(DMatrix::from_fn(t.len(), 1, |i, _| f(t[i])))
    }

    #[test]
    fn test_sample_grid() {
        let t = romberg_sample_times(1.0, 2.0, 6);
        assert_eq!(t.len(), 33);
        assert_relative_eq!(t[0], 1.0);
        assert_relative_eq!(t[32], 2.0);
        assert_relative_eq!(t[16], 1.5);
    }

    #[test]
    fn test_polynomial_exact() {
        let result = romberg_integration(0.0, 2.0, 4, sampled(|x| 3.0 * x * x + 1.0)).unwrap();
        assert_relative_eq!(result[0], 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_smooth_integrand_converges() {
        let result = romberg_integration(0.0, std::f64::consts::PI, 6, sampled(f64::sin)).unwrap();
        assert_relative_eq!(result[0], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_single_digit_is_trapezoid() {
        let result = romberg_integration(0.0, 1.0, 1, sampled(|x| x * x)).unwrap();
        assert_relative_eq!(result[0], 0.5, epsilon = 1e-14);
    }

    #[test]
    fn test_multiple_columns() {
        let integrand = |t: &DVector<f64>| {
            Ok::<_, TranscriptionError>(DMatrix::from_fn(t.len(), 2, |i, j| {
                if j == 0 { 1.0 } else { t[i].exp() }
            }))
        };
        let result = romberg_integration(0.0, 1.0, 6, integrand).unwrap();
        assert_relative_eq!(result[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(result[1], 1f64.exp() - 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_rejects_zero_digits_and_bad_rows() {
        assert!(romberg_integration(0.0, 1.0, 0, sampled(|x| x)).is_err());
        let bad = |_: &DVector<f64>| Ok::<_, TranscriptionError>(DMatrix::zeros(2, 1));
        assert!(matches!(
            romberg_integration(0.0, 1.0, 3, bad),
            Err(TranscriptionError::DimensionMismatch { .. })
        ));
    }
}
