//! Hermite interpolation from paired (time, value, derivative) samples.
//!
//! For `n` samples the unique polynomial of degree `2n - 1` matching all values and
//! first derivatives is built with divided differences over the doubled node sequence
//! `z = [t0, t0, t1, t1, ...]`: values seed the even slots, derivatives fill the first
//! divided difference of each repeated pair. The Newton form is then expanded into
//! monomial coefficients by repeated convolution with `(x - z_k)`.
//!
//! Coefficients are stored in ascending powers: `p(x) = c[0] + c[1] x + c[2] x^2 + ...`.
//!
//! Callers should shift the sample times so that the first one is zero before building
//! coefficients; divided differences over large absolute times lose digits to cancellation.
//! State components are never coupled: each one gets its own polynomial.
use crate::numerical::Interpolation::BaryLagrange::is_strictly_increasing;
use crate::numerical::transcription_errors::TranscriptionError;
use nalgebra::{DMatrix, DVector};

pub struct HermiteUtil;

impl HermiteUtil {
    /// Monomial coefficients (ascending powers) of the Hermite polynomial through the samples.
    pub fn get_hermite_coeff(
        time_vec: &DVector<f64>,
        func_values: &DVector<f64>,
        dyn_values: &DVector<f64>,
    ) -> Result<DVector<f64>, TranscriptionError> {
        let context = "HermiteUtil::get_hermite_coeff";
        let n = time_vec.len();
        if n == 0 {
            return Err(TranscriptionError::infeasible(
                context,
                "at least one sample is required",
            ));
        }
        if func_values.len() != n {
            return Err(TranscriptionError::length(context, n, func_values.len()));
        }
        if dyn_values.len() != n {
            return Err(TranscriptionError::length(context, n, dyn_values.len()));
        }
        if !is_strictly_increasing(time_vec) {
            return Err(TranscriptionError::infeasible(
                context,
                "sample times must be strictly increasing",
            ));
        }

        let m = 2 * n;
        let z = DVector::from_fn(m, |i, _| time_vec[i / 2]);
        // divided difference table, column j holds differences of order j
        let mut q = DMatrix::<f64>::zeros(m, m);
        for i in 0..n {
            q[(2 * i, 0)] = func_values[i];
            q[(2 * i + 1, 0)] = func_values[i];
            q[(2 * i + 1, 1)] = dyn_values[i];
            if i > 0 {
                q[(2 * i, 1)] = (q[(2 * i, 0)] - q[(2 * i - 1, 0)]) / (z[2 * i] - z[2 * i - 1]);
            }
        }
        for j in 2..m {
            for i in j..m {
                q[(i, j)] = (q[(i, j - 1)] - q[(i - 1, j - 1)]) / (z[i] - z[i - j]);
            }
        }

        // p(x) = sum_k q[k][k] * prod_{l<k} (x - z_l)
        let mut coeff = DVector::<f64>::zeros(m);
        let mut basis = DVector::from_element(1, 1.0);
        for k in 0..m {
            for (power, b) in basis.iter().enumerate() {
                coeff[power] += q[(k, k)] * b;
            }
            let factor = DVector::from_vec(vec![-z[k], 1.0]);
            basis = Self::convolution(&basis, &factor);
        }
        Ok(coeff)
    }

    /// Horner evaluation of `p(t)`.
    pub fn compute_function_value(t: f64, coeff: &DVector<f64>) -> f64 {
        coeff.iter().rev().fold(0.0, |acc, c| acc * t + c)
    }

    /// Horner evaluation of `p'(t)`.
    pub fn compute_derivative_value(t: f64, coeff: &DVector<f64>) -> f64 {
        coeff
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .fold(0.0, |acc, (power, c)| acc * t + power as f64 * c)
    }

    /// Discrete convolution of two coefficient vectors; output length is
    /// `len(x) + len(h) - 1` (empty if either input is empty).
    pub fn convolution(x: &DVector<f64>, h: &DVector<f64>) -> DVector<f64> {
        if x.is_empty() || h.is_empty() {
            return DVector::zeros(0);
        }
        let mut y = DVector::zeros(x.len() + h.len() - 1);
        for (i, xi) in x.iter().enumerate() {
            for (j, hj) in h.iter().enumerate() {
                y[i + j] += xi * hj;
            }
        }
        y
    }

    /// Value and derivative of one component at a single time.
    pub fn interpolate_scalar(
        t: f64,
        time_vec: &DVector<f64>,
        func_values: &DVector<f64>,
        dyn_values: &DVector<f64>,
    ) -> Result<(f64, f64), TranscriptionError> {
        let coeff = Self::get_hermite_coeff(time_vec, func_values, dyn_values)?;
        Ok((
            Self::compute_function_value(t, &coeff),
            Self::compute_derivative_value(t, &coeff),
        ))
    }

    /// Values and derivatives of one component at a vector of times.
    pub fn interpolate_series(
        interp_times: &DVector<f64>,
        time_vec: &DVector<f64>,
        func_values: &DVector<f64>,
        dyn_values: &DVector<f64>,
    ) -> Result<(DVector<f64>, DVector<f64>), TranscriptionError> {
        let coeff = Self::get_hermite_coeff(time_vec, func_values, dyn_values)?;
        let values = interp_times.map(|t| Self::compute_function_value(t, &coeff));
        let derivatives = interp_times.map(|t| Self::compute_derivative_value(t, &coeff));
        Ok((values, derivatives))
    }

    /// Matrix form: `func_values[c]` and `dyn_values[c]` hold the samples of component `c`.
    /// Returns `(values, derivatives)` with one row per interpolation time and one
    /// column per component.
    pub fn hermite_interpolation(
        interp_times: &DVector<f64>,
        time_vec: &DVector<f64>,
        func_values: &[DVector<f64>],
        dyn_values: &[DVector<f64>],
    ) -> Result<(DMatrix<f64>, DMatrix<f64>), TranscriptionError> {
        if func_values.len() != dyn_values.len() {
            return Err(TranscriptionError::length(
                "HermiteUtil::hermite_interpolation",
                func_values.len(),
                dyn_values.len(),
            ));
        }
        let num_components = func_values.len();
        let mut values = DMatrix::zeros(interp_times.len(), num_components);
        let mut derivatives = DMatrix::zeros(interp_times.len(), num_components);
        for (component, (f, d)) in func_values.iter().zip(dyn_values.iter()).enumerate() {
            let (v, dv) = Self::interpolate_series(interp_times, time_vec, f, d)?;
            values.set_column(component, &v);
            derivatives.set_column(component, &dv);
        }
        Ok((values, derivatives))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cubic_from_two_samples() {
        // p(x) = x^3 on {0, 1}
        let t = DVector::from_vec(vec![0.0, 1.0]);
        let f = DVector::from_vec(vec![0.0, 1.0]);
        let d = DVector::from_vec(vec![0.0, 3.0]);
        let coeff = HermiteUtil::get_hermite_coeff(&t, &f, &d).unwrap();
        assert_eq!(coeff.len(), 4);
        assert_relative_eq!(HermiteUtil::compute_function_value(0.5, &coeff), 0.125, epsilon = 1e-12);
        assert_relative_eq!(coeff[3], 1.0, epsilon = 1e-12);
        assert_relative_eq!(coeff[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(HermiteUtil::compute_derivative_value(0.5, &coeff), 0.75, epsilon = 1e-12);
    }

    #[test]
    fn test_quintic_reproduced_from_three_samples() {
        // degree 2n-1 = 5 polynomial is recovered exactly
        let p = |x: f64| 1.0 - 2.0 * x + 0.5 * x.powi(3) + x.powi(5);
        let dp = |x: f64| -2.0 + 1.5 * x * x + 5.0 * x.powi(4);
        let t = DVector::from_vec(vec![0.0, 0.4, 1.1]);
        let coeff = HermiteUtil::get_hermite_coeff(&t, &t.map(p), &t.map(dp)).unwrap();
        for &x in &[0.0, 0.2, 0.7, 1.0, 1.3] {
            assert_relative_eq!(HermiteUtil::compute_function_value(x, &coeff), p(x), epsilon = 1e-10);
            assert_relative_eq!(HermiteUtil::compute_derivative_value(x, &coeff), dp(x), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_matches_samples_at_nodes() {
        let t = DVector::from_vec(vec![0.0, 0.3, 0.9, 1.4]);
        let f = t.map(|x: f64| x.sin());
        let d = t.map(|x: f64| x.cos());
        let (values, derivatives) = HermiteUtil::interpolate_series(&t, &t, &f, &d).unwrap();
        for i in 0..t.len() {
            assert_relative_eq!(values[i], f[i], epsilon = 1e-10);
            assert_relative_eq!(derivatives[i], d[i], epsilon = 1e-8);
        }
    }

    #[test]
    fn test_matrix_output_keeps_components_independent() {
        let t = DVector::from_vec(vec![0.0, 1.0]);
        let values = vec![DVector::from_vec(vec![0.0, 1.0]), DVector::from_vec(vec![2.0, 2.0])];
        let derivs = vec![DVector::from_vec(vec![1.0, 1.0]), DVector::from_vec(vec![0.0, 0.0])];
        let query = DVector::from_vec(vec![0.25, 0.5]);
        let (v, d) = HermiteUtil::hermite_interpolation(&query, &t, &values, &derivs).unwrap();
        assert_eq!(v.shape(), (2, 2));
        assert_relative_eq!(v[(0, 0)], 0.25, epsilon = 1e-12);
        assert_relative_eq!(v[(1, 0)], 0.5, epsilon = 1e-12);
        assert_relative_eq!(v[(0, 1)], 2.0, epsilon = 1e-12);
        assert_relative_eq!(d[(1, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(d[(1, 1)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_scalar_single_time() {
        let t = DVector::from_vec(vec![0.0, 1.0]);
        let (v, d) = HermiteUtil::interpolate_scalar(
            2.0,
            &t,
            &DVector::from_vec(vec![0.0, 1.0]),
            &DVector::from_vec(vec![0.0, 3.0]),
        )
        .unwrap();
        assert_relative_eq!(v, 8.0, epsilon = 1e-10);
        assert_relative_eq!(d, 12.0, epsilon = 1e-10);
    }

    #[test]
    fn test_convolution_length_and_commutativity() {
        let x = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let h = DVector::from_vec(vec![0.5, -1.0]);
        let xh = HermiteUtil::convolution(&x, &h);
        let hx = HermiteUtil::convolution(&h, &x);
        assert_eq!(xh.len(), x.len() + h.len() - 1);
        assert_eq!(xh, hx);
        // (1 + 2x + 3x^2)(0.5 - x) = 0.5 + 0x - 0.5x^2 - 3x^3
        assert_eq!(xh, DVector::from_vec(vec![0.5, 0.0, -0.5, -3.0]));
    }

    #[test]
    fn test_rejects_bad_samples() {
        let t = DVector::from_vec(vec![0.0, 0.0]);
        let f = DVector::from_vec(vec![1.0, 1.0]);
        assert!(matches!(
            HermiteUtil::get_hermite_coeff(&t, &f, &f),
            Err(TranscriptionError::InfeasibleNodeSet { .. })
        ));
        let t = DVector::from_vec(vec![0.0, 1.0]);
        let short = DVector::from_vec(vec![1.0]);
        assert!(matches!(
            HermiteUtil::get_hermite_coeff(&t, &f, &short),
            Err(TranscriptionError::DimensionMismatch { .. })
        ));
    }
}
