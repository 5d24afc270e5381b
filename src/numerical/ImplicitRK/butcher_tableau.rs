//! Lobatto IIIA Butcher tableaux in separated (defect) form.
//!
//! A step with `s` points `z_0..z_{s-1}` (the two mesh points plus the interior stages)
//! produces `s - 1` defect constraints
//!
//! ```text
//! defect = A * z - h * B * (dt * f(z))
//! ```
//!
//! where `A = param_dep_array`, `B = func_const_array`, `h` is the non-dimensional step
//! size and `dt = tf - t0`. Both patterns are dimensionless; the driver applies all
//! scaling. For a problem with `n` variables each scalar pattern entry becomes an
//! `n x n` diagonal block, so the scheme never couples different state components.
use crate::numerical::transcription_errors::TranscriptionError;
use nalgebra::{DMatrix, DVector};
use std::str::FromStr;
use strum_macros::{Display, EnumIter, EnumString};

/// Collocation methods available to the transcription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
pub enum CollocationMethod {
    /// Lobatto IIIA, 2 points, order 2
    Trapezoid,
    /// Lobatto IIIA, 3 points, order 4, compressed Hermite-Simpson defects
    HermiteSimpson,
    /// Lobatto IIIA, 3 points, order 4
    RungeKutta4,
    /// Lobatto IIIA, 4 points, order 6
    RungeKutta6,
    /// Lobatto IIIA, 5 points, order 8
    RungeKutta8,
}

impl CollocationMethod {
    pub fn from_name(name: &str) -> Result<Self, TranscriptionError> {
        CollocationMethod::from_str(name.trim())
            .map_err(|_| TranscriptionError::UnknownMethod(name.to_string()))
    }

    /// Number of points (mesh + interior stage) per step.
    pub fn points_per_step(&self) -> usize {
        match self {
            CollocationMethod::Trapezoid => 2,
            CollocationMethod::HermiteSimpson | CollocationMethod::RungeKutta4 => 3,
            CollocationMethod::RungeKutta6 => 4,
            CollocationMethod::RungeKutta8 => 5,
        }
    }

    /// Polynomial order used by the mesh-refinement error model.
    pub fn order(&self) -> usize {
        self.points_per_step() - 1
    }
}

#[derive(Debug, Clone)]
pub struct ButcherTableau {
    pub method: CollocationMethod,
    /// stage abscissae on [0, 1]
    pub rho_vec: DVector<f64>,
    /// stage coupling matrix
    pub sigma_matrix: DMatrix<f64>,
    /// quadrature weights
    pub beta_vec: DVector<f64>,
    pub stage_times: DVector<f64>,
    /// interior stage points per step
    pub num_stages: usize,
    pub num_defect_cons: usize,
    pub num_points_per_step: usize,
    pub num_stage_points_per_mesh: usize,
    pub num_state_stage_points_per_mesh: usize,
    pub num_control_stage_points_per_mesh: usize,
    /// raw structural weights, rows = defects, columns = points of the step
    pub param_dep_array: DMatrix<f64>,
    pub func_const_array: DMatrix<f64>,
    /// frozen copies used for Jacobian assembly
    pub pattern_a_mat: DMatrix<f64>,
    pub pattern_b_mat: DMatrix<f64>,
}

impl ButcherTableau {
    pub fn new(method: CollocationMethod) -> Self {
        let (rho_vec, sigma_matrix) = Self::load_butcher_table(method);
        let num_points_per_step = rho_vec.len();
        let beta_vec = sigma_matrix.row(num_points_per_step - 1).transpose();
        let (param_dep_array, func_const_array) = match method {
            CollocationMethod::HermiteSimpson => (
                DMatrix::from_row_slice(2, 3, &[-0.5, 1.0, -0.5, -1.0, 0.0, 1.0]),
                DMatrix::from_row_slice(
                    2,
                    3,
                    &[1.0 / 8.0, 0.0, -1.0 / 8.0, 1.0 / 6.0, 2.0 / 3.0, 1.0 / 6.0],
                ),
            ),
            _ => Self::separated_form(&sigma_matrix),
        };
        let num_stages = num_points_per_step - 2;
        let mut tableau = ButcherTableau {
            method,
            stage_times: rho_vec.clone(),
            rho_vec,
            sigma_matrix,
            beta_vec,
            num_stages,
            num_defect_cons: num_points_per_step - 1,
            num_points_per_step,
            num_stage_points_per_mesh: num_stages,
            num_state_stage_points_per_mesh: num_stages,
            num_control_stage_points_per_mesh: num_stages,
            param_dep_array,
            func_const_array,
            pattern_a_mat: DMatrix::zeros(0, 0),
            pattern_b_mat: DMatrix::zeros(0, 0),
        };
        tableau.compute_dependencies();
        tableau
    }

    pub fn from_name(name: &str) -> Result<Self, TranscriptionError> {
        Ok(Self::new(CollocationMethod::from_name(name)?))
    }

    /// Abscissae and coupling matrix of the Lobatto IIIA scheme behind `method`.
    fn load_butcher_table(method: CollocationMethod) -> (DVector<f64>, DMatrix<f64>) {
        match method {
            CollocationMethod::Trapezoid => (
                DVector::from_vec(vec![0.0, 1.0]),
                DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 0.5, 0.5]),
            ),
            CollocationMethod::HermiteSimpson | CollocationMethod::RungeKutta4 => (
                DVector::from_vec(vec![0.0, 0.5, 1.0]),
                DMatrix::from_row_slice(
                    3,
                    3,
                    &[
                        0.0,
                        0.0,
                        0.0,
                        5.0 / 24.0,
                        1.0 / 3.0,
                        -1.0 / 24.0,
                        1.0 / 6.0,
                        2.0 / 3.0,
                        1.0 / 6.0,
                    ],
                ),
            ),
            CollocationMethod::RungeKutta6 => {
                let s5 = 5_f64.sqrt();
                (
                    DVector::from_vec(vec![0.0, (5.0 - s5) / 10.0, (5.0 + s5) / 10.0, 1.0]),
                    DMatrix::from_row_slice(
                        4,
                        4,
                        &[
                            0.0,
                            0.0,
                            0.0,
                            0.0,
                            (11.0 + s5) / 120.0,
                            (25.0 - s5) / 120.0,
                            (25.0 - 13.0 * s5) / 120.0,
                            (-1.0 + s5) / 120.0,
                            (11.0 - s5) / 120.0,
                            (25.0 + 13.0 * s5) / 120.0,
                            (25.0 + s5) / 120.0,
                            (-1.0 - s5) / 120.0,
                            1.0 / 12.0,
                            5.0 / 12.0,
                            5.0 / 12.0,
                            1.0 / 12.0,
                        ],
                    ),
                )
            }
            CollocationMethod::RungeKutta8 => {
                let s21 = 21_f64.sqrt();
                (
                    DVector::from_vec(vec![
                        0.0,
                        (7.0 - s21) / 14.0,
                        0.5,
                        (7.0 + s21) / 14.0,
                        1.0,
                    ]),
                    DMatrix::from_row_slice(
                        5,
                        5,
                        &[
                            0.0,
                            0.0,
                            0.0,
                            0.0,
                            0.0,
                            17.0 / 280.0 + 3.0 * s21 / 1960.0,
                            49.0 / 360.0 - s21 / 280.0,
                            8.0 / 45.0 - 32.0 * s21 / 735.0,
                            49.0 / 360.0 - 23.0 * s21 / 840.0,
                            -3.0 / 280.0 + 3.0 * s21 / 1960.0,
                            13.0 / 320.0,
                            49.0 / 360.0 + 7.0 * s21 / 192.0,
                            8.0 / 45.0,
                            49.0 / 360.0 - 7.0 * s21 / 192.0,
                            3.0 / 320.0,
                            17.0 / 280.0 - 3.0 * s21 / 1960.0,
                            49.0 / 360.0 + 23.0 * s21 / 840.0,
                            8.0 / 45.0 + 32.0 * s21 / 735.0,
                            49.0 / 360.0 + s21 / 280.0,
                            -3.0 / 280.0 - 3.0 * s21 / 1960.0,
                            1.0 / 20.0,
                            49.0 / 180.0,
                            16.0 / 45.0,
                            49.0 / 180.0,
                            1.0 / 20.0,
                        ],
                    ),
                )
            }
        }
    }

    /// Defect `i` ties point `i + 1` to the first point of the step through row `i + 1`
    /// of the coupling matrix: `z_{i+1} - z_0 - h * sum_j sigma(i+1, j) f_j`.
    fn separated_form(sigma_matrix: &DMatrix<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
        let num_points = sigma_matrix.nrows();
        let num_defects = num_points - 1;
        let mut param_dep = DMatrix::zeros(num_defects, num_points);
        for i in 0..num_defects {
            param_dep[(i, 0)] = -1.0;
            param_dep[(i, i + 1)] = 1.0;
        }
        let func_const = sigma_matrix.rows(1, num_defects).into_owned();
        (param_dep, func_const)
    }

    /// Freezes the raw structural weights into the patterns used for Jacobian assembly.
    pub fn compute_dependencies(&mut self) {
        self.pattern_a_mat = self.param_dep_array.clone();
        self.pattern_b_mat = self.func_const_array.clone();
    }

    /// One `(defect, point)` block of the sparse Jacobian: `(a * I, b * I)` of size
    /// `num_vars x num_vars`. Both indices are zero-based within the step.
    pub fn get_dependency_chunk(
        &self,
        defect_idx: usize,
        point_idx: usize,
        num_vars: usize,
    ) -> Result<(DMatrix<f64>, DMatrix<f64>), TranscriptionError> {
        let context = "ButcherTableau::get_dependency_chunk";
        if defect_idx >= self.num_defect_cons {
            return Err(TranscriptionError::index(
                context,
                defect_idx,
                0,
                self.num_defect_cons,
            ));
        }
        if point_idx >= self.num_points_per_step {
            return Err(TranscriptionError::index(
                context,
                point_idx,
                0,
                self.num_points_per_step,
            ));
        }
        let identity = DMatrix::<f64>::identity(num_vars, num_vars);
        Ok((
            &identity * self.pattern_a_mat[(defect_idx, point_idx)],
            &identity * self.pattern_b_mat[(defect_idx, point_idx)],
        ))
    }

    /// Identity-Kronecker expansion of both patterns to
    /// `(num_defect_cons * num_vars) x (num_points_per_step * num_vars)`.
    pub fn compute_a_and_b(&self, num_vars: usize) -> (DMatrix<f64>, DMatrix<f64>) {
        let identity = DMatrix::<f64>::identity(num_vars, num_vars);
        (
            self.pattern_a_mat.kronecker(&identity),
            self.pattern_b_mat.kronecker(&identity),
        )
    }

    pub fn quadrature_weights(&self) -> &DVector<f64> {
        &self.beta_vec
    }

    pub fn order(&self) -> usize {
        self.method.order()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use strum::IntoEnumIterator;

    #[test]
    fn test_method_names() {
        assert_eq!(
            CollocationMethod::from_name("RungeKutta6").unwrap(),
            CollocationMethod::RungeKutta6
        );
        assert_eq!(CollocationMethod::HermiteSimpson.to_string(), "HermiteSimpson");
        assert_eq!(
            CollocationMethod::from_name("LobattoIIIA42"),
            Err(TranscriptionError::UnknownMethod("LobattoIIIA42".to_string()))
        );
        assert!(ButcherTableau::from_name("Trapezoid").is_ok());
    }

    #[test]
    fn test_counts() {
        for method in CollocationMethod::iter() {
            let t = ButcherTableau::new(method);
            assert_eq!(t.num_points_per_step, method.points_per_step());
            assert_eq!(t.num_defect_cons, t.num_points_per_step - 1);
            assert_eq!(t.num_stages + 2, t.num_points_per_step);
            assert_eq!(t.rho_vec.len(), t.num_points_per_step);
            assert_eq!(t.pattern_a_mat.shape(), (t.num_defect_cons, t.num_points_per_step));
            assert_eq!(t.pattern_b_mat.shape(), (t.num_defect_cons, t.num_points_per_step));
            assert_eq!(t.stage_times, t.rho_vec);
        }
    }

    #[test]
    fn test_quadrature_is_exact_to_method_order() {
        for method in CollocationMethod::iter() {
            let t = ButcherTableau::new(method);
            assert_relative_eq!(t.beta_vec.sum(), 1.0, epsilon = 1e-14);
            for k in 0..t.order() {
                let q: f64 = t
                    .beta_vec
                    .iter()
                    .zip(t.rho_vec.iter())
                    .map(|(b, r)| b * r.powi(k as i32))
                    .sum();
                assert_relative_eq!(q, 1.0 / (k as f64 + 1.0), epsilon = 1e-13);
            }
        }
    }

    #[test]
    fn test_stage_order_conditions() {
        // sum_j sigma_ij rho_j^(k-1) = rho_i^k / k for k = 1..s
        for method in CollocationMethod::iter() {
            let t = ButcherTableau::new(method);
            let s = t.num_points_per_step;
            for i in 0..s {
                for k in 1..=s {
                    let lhs: f64 = (0..s)
                        .map(|j| t.sigma_matrix[(i, j)] * t.rho_vec[j].powi(k as i32 - 1))
                        .sum();
                    let rhs = t.rho_vec[i].powi(k as i32) / k as f64;
                    assert_relative_eq!(lhs, rhs, epsilon = 1e-13);
                }
            }
        }
    }

    #[test]
    fn test_separated_form_rows() {
        let t = ButcherTableau::new(CollocationMethod::RungeKutta6);
        for i in 0..t.num_defect_cons {
            assert_eq!(t.param_dep_array[(i, 0)], -1.0);
            assert_eq!(t.param_dep_array[(i, i + 1)], 1.0);
            assert_eq!(t.param_dep_array.row(i).sum(), 0.0);
            for j in 0..t.num_points_per_step {
                assert_eq!(t.func_const_array[(i, j)], t.sigma_matrix[(i + 1, j)]);
            }
        }
    }

    #[test]
    fn test_hermite_simpson_patterns() {
        let t = ButcherTableau::new(CollocationMethod::HermiteSimpson);
        assert_eq!(t.pattern_a_mat.row(0).iter().cloned().collect::<Vec<_>>(), vec![-0.5, 1.0, -0.5]);
        assert_eq!(t.pattern_a_mat.row(1).iter().cloned().collect::<Vec<_>>(), vec![-1.0, 0.0, 1.0]);
        assert_relative_eq!(t.pattern_b_mat[(0, 0)], 0.125);
        assert_relative_eq!(t.pattern_b_mat[(0, 2)], -0.125);
        assert_relative_eq!(t.pattern_b_mat[(1, 1)], 2.0 / 3.0);
        assert_eq!(t.beta_vec, ButcherTableau::new(CollocationMethod::RungeKutta4).beta_vec);
    }

    #[test]
    fn test_dependency_chunk() {
        let t = ButcherTableau::new(CollocationMethod::RungeKutta4);
        let (a, b) = t.get_dependency_chunk(1, 2, 3).unwrap();
        assert_eq!(a, DMatrix::identity(3, 3));
        assert_relative_eq!(b, DMatrix::identity(3, 3) / 6.0, epsilon = 1e-15);

        assert_eq!(
            t.get_dependency_chunk(2, 0, 3),
            Err(TranscriptionError::InvalidIndex {
                context: "ButcherTableau::get_dependency_chunk",
                index: 2,
                lower: 0,
                upper: 2,
            })
        );
        assert!(matches!(
            t.get_dependency_chunk(0, 3, 3),
            Err(TranscriptionError::InvalidIndex { index: 3, upper: 3, .. })
        ));
    }

    #[test]
    fn test_a_and_b_blocks_are_scaled_identity() {
        let num_vars = 3;
        for method in CollocationMethod::iter() {
            let t = ButcherTableau::new(method);
            let (a, b) = t.compute_a_and_b(num_vars);
            assert_eq!(a.shape(), (t.num_defect_cons * num_vars, t.num_points_per_step * num_vars));
            for f in 0..t.num_defect_cons {
                for p in 0..t.num_points_per_step {
                    let block_a = a.view((f * num_vars, p * num_vars), (num_vars, num_vars));
                    let block_b = b.view((f * num_vars, p * num_vars), (num_vars, num_vars));
                    let (chunk_a, chunk_b) = t.get_dependency_chunk(f, p, num_vars).unwrap();
                    assert_eq!(block_a, chunk_a);
                    assert_eq!(block_b, chunk_b);
                    assert_eq!(
                        block_a.into_owned(),
                        DMatrix::identity(num_vars, num_vars) * t.param_dep_array[(f, p)]
                    );
                }
            }
        }
    }
}
