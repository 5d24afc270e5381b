//! Implicit Runge-Kutta collocation driver.
//!
//! Turns a phase `x' = f(t, x, u)` on `[t0, tf]` into algebraic defect constraints and
//! an integral-cost quadrature for an NLP solver. Time is normalized to `tau in [0, 1]`,
//! `t = t0 + tau (tf - t0)`, so with `dt = tf - t0` one step of size `h` reads
//!
//! ```text
//! defect_k = A z_k - h B q_k,      q_k = dt * f at the step points
//! ```
//!
//! with `A`, `B` the identity-expanded tableau patterns (cached once per mesh topology).
//! Decision variables are ordered `[t0, tf, states (point-major), controls (point-major)]`.
//!
//! Typical call order:
//! 1. `CollocationDriver::new(config)` and `initialize_transcription()`
//! 2. `set_time_vector(t0, tf)` whenever the time decision variables change
//! 3. `assemble_defects` / `assemble_cost` per NLP iteration
//! 4. `refine_mesh` after the NLP converged on the current mesh
use crate::Utils::logger::init_logger;
use crate::numerical::ImplicitRK::IRK_config::TranscriptionConfig;
use crate::numerical::ImplicitRK::IRK_interfaces::{DecisionVector, DynamicsEvaluator, DynamicsOutput};
use crate::numerical::ImplicitRK::butcher_tableau::ButcherTableau;
use crate::numerical::ImplicitRK::mesh_layout::MeshLayout;
use crate::numerical::Interpolation::BaryLagrange::BaryLagrangeInterpolator;
use crate::numerical::Interpolation::Hermite::HermiteUtil;
use crate::numerical::transcription_errors::TranscriptionError;
use log::{LevelFilter, debug, info};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;
use std::fmt::Display;
use std::time::Instant;

/// Step sizes and point times of one (normalized) mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshDiscretization {
    pub layout: MeshLayout,
    /// non-dimensional size of every step
    pub step_size_vec: DVector<f64>,
    /// non-dimensional time of every global point, point-major
    pub discretization_points: DVector<f64>,
    /// zero-based mesh interval of every step
    pub step_interval: Vec<usize>,
}

/// Lays `num_points[i] - 1` equal steps into every interval `[fractions[i], fractions[i+1]]`
/// and places the stage points of each step at `stage_times`. The last point is pinned
/// to the last fraction. Inputs must already pass `TranscriptionConfig::validate`.
pub(crate) fn compute_discretization(
    fractions: &DVector<f64>,
    num_points: &[usize],
    stage_times: &DVector<f64>,
) -> MeshDiscretization {
    let num_points_per_mesh = stage_times.len() - 1;
    let num_steps: usize = num_points.iter().map(|n| n - 1).sum();
    let layout = MeshLayout::new(num_steps, num_points_per_mesh - 1);

    let mut step_size_vec = Vec::with_capacity(num_steps);
    let mut step_interval = Vec::with_capacity(num_steps);
    let mut points = Vec::with_capacity(layout.total_num_points());
    for (interval, &n) in num_points.iter().enumerate() {
        let h = (fractions[interval + 1] - fractions[interval]) / (n - 1) as f64;
        for k in 0..n - 1 {
            let start = fractions[interval] + k as f64 * h;
            step_size_vec.push(h);
            step_interval.push(interval);
            points.extend(stage_times.iter().take(num_points_per_mesh).map(|rho| start + h * rho));
        }
    }
    points.push(fractions[fractions.len() - 1]);

    MeshDiscretization {
        layout,
        step_size_vec: DVector::from_vec(step_size_vec),
        discretization_points: DVector::from_vec(points),
        step_interval,
    }
}

/// Defect residual and Jacobian blocks of one step. Rows are `defect * nx + state`;
/// state (control) columns are `point * nx + state` (`point * nu + control`) over the
/// points of the step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDefectContribution {
    pub step_idx: usize,
    pub residual: DVector<f64>,
    pub d_state: DMatrix<f64>,
    pub d_control: DMatrix<f64>,
    pub d_t0: DVector<f64>,
    pub d_tf: DVector<f64>,
}

/// Quadrature contribution of one step to the integral cost.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCostContribution {
    pub step_idx: usize,
    pub value: f64,
    pub d_state: DVector<f64>,
    pub d_control: DVector<f64>,
    pub d_t0: f64,
    pub d_tf: f64,
}

/// Whole-phase defect constraints.
#[derive(Debug, Clone)]
pub struct DefectAssembly {
    pub residual: DVector<f64>,
    /// rows = defect constraints, columns = decision variables
    pub jacobian: CsrMatrix<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CostAssembly {
    pub value: f64,
    pub gradient: DVector<f64>,
}

#[derive(Debug, Clone)]
pub struct CollocationDriver {
    pub config: TranscriptionConfig,
    pub tableau: ButcherTableau,
    /// normalized mesh interval fractions
    pub mesh_interval_fractions: DVector<f64>,
    pub mesh_interval_num_points: Vec<usize>,
    mesh: Option<MeshDiscretization>,
    pub t0: f64,
    pub tf: f64,
    time_vector: Option<DVector<f64>>,
    // iterate-independent matrices, cached per mesh topology
    a_matrix: Option<DMatrix<f64>>,
    b_matrix: Option<DMatrix<f64>>,
    cost_weights: Option<DVector<f64>>,
    pub parallel: bool,
    pub log_level: Option<LevelFilter>,
    pub log_to_file: Option<String>,
    pub log_to_console: bool,
}

impl Display for CollocationDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CollocationDriver {{ method: {}, intervals: {:?}, steps: {}, t0: {}, tf: {} }}",
            self.tableau.method,
            self.mesh_interval_num_points,
            self.mesh.as_ref().map_or(0, |m| m.layout.num_steps),
            self.t0,
            self.tf
        )
    }
}

impl CollocationDriver {
    pub fn new(config: TranscriptionConfig) -> Self {
        let tableau = ButcherTableau::new(config.method);
        CollocationDriver {
            tableau,
            mesh_interval_fractions: config.mesh_interval_fractions.clone(),
            mesh_interval_num_points: config.mesh_interval_num_points.clone(),
            mesh: None,
            t0: 0.0,
            tf: 0.0,
            time_vector: None,
            a_matrix: None,
            b_matrix: None,
            cost_weights: None,
            parallel: config.parallel,
            log_level: config.log_level,
            log_to_file: config.log_to_file.clone(),
            log_to_console: config.log_to_console,
            config,
        }
    }

    ////////////////////////////////////////////////////////////////////////////
    //                      TRANSCRIPTION SETUP
    ////////////////////////////////////////////////////////////////////////////

    /// Loads the tableau, validates and normalizes the mesh, builds the point layout
    /// and caches the constant defect and cost matrices.
    pub fn initialize_transcription(&mut self) -> Result<(), TranscriptionError> {
        self.config.validate()?;
        self.tableau = ButcherTableau::new(self.config.method);
        self.mesh_interval_fractions = self.config.normalized_fractions();
        self.mesh_interval_num_points = self.config.mesh_interval_num_points.clone();
        let mesh = compute_discretization(
            &self.mesh_interval_fractions,
            &self.mesh_interval_num_points,
            &self.tableau.stage_times,
        );
        info!(
            "{} transcription: {} intervals, {} steps, {} points",
            self.tableau.method,
            self.mesh_interval_num_points.len(),
            mesh.layout.num_steps,
            mesh.layout.total_num_points()
        );
        debug!("discretization points: {:?}", mesh.discretization_points.as_slice());
        self.mesh = Some(mesh);
        self.time_vector = None;
        self.initialize_constant_defect_matrices()?;
        self.initialize_constant_cost_matrices()?;
        Ok(())
    }

    pub fn mesh(&self) -> Result<&MeshDiscretization, TranscriptionError> {
        self.mesh.as_ref().ok_or(TranscriptionError::PrerequisiteNotSet {
            context: "CollocationDriver",
            what: "transcription (initialize_transcription)",
        })
    }

    pub fn layout(&self) -> Result<MeshLayout, TranscriptionError> {
        Ok(self.mesh()?.layout)
    }

    /// Maps the normalized points onto `[t0, tf]`.
    pub fn set_time_vector(&mut self, t0: f64, tf: f64) -> Result<(), TranscriptionError> {
        if !(tf > t0) {
            return Err(TranscriptionError::InvalidConfig(format!(
                "final time {} must be greater than initial time {}",
                tf, t0
            )));
        }
        let tau = &self.mesh()?.discretization_points;
        self.time_vector = Some(tau.map(|s| t0 + s * (tf - t0)));
        self.t0 = t0;
        self.tf = tf;
        Ok(())
    }

    pub fn time_vector(&self) -> Result<&DVector<f64>, TranscriptionError> {
        self.time_vector.as_ref().ok_or(TranscriptionError::PrerequisiteNotSet {
            context: "CollocationDriver",
            what: "time vector (set_time_vector)",
        })
    }

    /// d t(point) / d t0 = 1 - tau
    pub fn get_d_current_time_d_ti(&self, point_idx: usize) -> Result<f64, TranscriptionError> {
        Ok(1.0 - self.non_dim_time(point_idx)?)
    }

    /// d t(point) / d tf = tau
    pub fn get_d_current_time_d_tf(&self, point_idx: usize) -> Result<f64, TranscriptionError> {
        self.non_dim_time(point_idx)
    }

    fn non_dim_time(&self, point_idx: usize) -> Result<f64, TranscriptionError> {
        let mesh = self.mesh()?;
        let offset = mesh.layout.point_offset(point_idx)?;
        Ok(mesh.discretization_points[offset])
    }

    pub fn get_mesh_index(&self, point_idx: usize) -> Result<usize, TranscriptionError> {
        self.layout()?.mesh_index(point_idx)
    }

    pub fn get_stage_index(&self, point_idx: usize) -> Result<usize, TranscriptionError> {
        self.layout()?.stage_index(point_idx)
    }

    pub fn get_point_idx_given_mesh_and_stage_idx(
        &self,
        mesh_idx: usize,
        stage_idx: usize,
    ) -> Result<usize, TranscriptionError> {
        self.layout()?.point_index(mesh_idx, stage_idx)
    }

    ////////////////////////////////////////////////////////////////////////////
    //                      NLP BOOKKEEPING
    ////////////////////////////////////////////////////////////////////////////

    pub fn num_state_vars(&self) -> usize {
        self.config.num_state_vars
    }

    pub fn num_control_vars(&self) -> usize {
        self.config.num_control_vars
    }

    pub fn num_state_vars_nlp(&self) -> Result<usize, TranscriptionError> {
        Ok(self.layout()?.total_num_points() * self.num_state_vars())
    }

    pub fn num_control_vars_nlp(&self) -> Result<usize, TranscriptionError> {
        Ok(self.layout()?.total_num_points() * self.num_control_vars())
    }

    /// `t0`, `tf`, then all states and controls.
    pub fn num_decision_vars(&self) -> Result<usize, TranscriptionError> {
        Ok(2 + self.num_state_vars_nlp()? + self.num_control_vars_nlp()?)
    }

    pub fn num_defect_cons(&self) -> Result<usize, TranscriptionError> {
        Ok(self.layout()?.num_steps * self.tableau.num_defect_cons * self.num_state_vars())
    }

    /// Column of state `var` at global point `point_idx` in the decision vector.
    pub fn state_var_index(&self, point_idx: usize, var: usize) -> Result<usize, TranscriptionError> {
        let nx = self.num_state_vars();
        if var >= nx {
            return Err(TranscriptionError::index("CollocationDriver::state_var_index", var, 0, nx));
        }
        Ok(2 + self.layout()?.point_offset(point_idx)? * nx + var)
    }

    pub fn control_var_index(&self, point_idx: usize, var: usize) -> Result<usize, TranscriptionError> {
        let nu = self.num_control_vars();
        if var >= nu {
            return Err(TranscriptionError::index("CollocationDriver::control_var_index", var, 0, nu));
        }
        Ok(2 + self.num_state_vars_nlp()? + self.layout()?.point_offset(point_idx)? * nu + var)
    }

    ////////////////////////////////////////////////////////////////////////////
    //                      CONSTANT MATRICES
    ////////////////////////////////////////////////////////////////////////////

    pub fn initialize_constant_defect_matrices(&mut self) -> Result<(), TranscriptionError> {
        self.mesh()?;
        let (a, b) = self.tableau.compute_a_and_b(self.num_state_vars());
        self.a_matrix = Some(a);
        self.b_matrix = Some(b);
        Ok(())
    }

    /// Quadrature weight of every global point: `sum over steps containing it of h * beta_j`.
    pub fn initialize_constant_cost_matrices(&mut self) -> Result<(), TranscriptionError> {
        let mesh = self.mesh()?;
        let layout = mesh.layout;
        let beta = self.tableau.quadrature_weights();
        let mut weights = DVector::zeros(layout.total_num_points());
        for step in 1..=layout.num_steps {
            let h = mesh.step_size_vec[step - 1];
            for (j, offset) in layout.step_point_offsets(step)?.enumerate() {
                weights[offset] += h * beta[j];
            }
        }
        self.cost_weights = Some(weights);
        Ok(())
    }

    fn constant_defect_matrices(&self) -> Result<(&DMatrix<f64>, &DMatrix<f64>), TranscriptionError> {
        match (&self.a_matrix, &self.b_matrix) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(TranscriptionError::PrerequisiteNotSet {
                context: "CollocationDriver",
                what: "constant defect matrices",
            }),
        }
    }

    pub fn cost_weights(&self) -> Result<&DVector<f64>, TranscriptionError> {
        self.cost_weights.as_ref().ok_or(TranscriptionError::PrerequisiteNotSet {
            context: "CollocationDriver",
            what: "constant cost matrices",
        })
    }

    ////////////////////////////////////////////////////////////////////////////
    //                      DYNAMIC MATRICES
    ////////////////////////////////////////////////////////////////////////////

    fn check_decision_vector<D: DecisionVector>(&self, dv: &D) -> Result<(), TranscriptionError> {
        let context = "CollocationDriver::check_decision_vector";
        let layout = self.layout()?;
        if dv.layout() != layout {
            return Err(TranscriptionError::length(
                context,
                layout.total_num_points(),
                dv.layout().total_num_points(),
            ));
        }
        if dv.num_state_vars() != self.num_state_vars() {
            return Err(TranscriptionError::length(context, self.num_state_vars(), dv.num_state_vars()));
        }
        if dv.num_control_vars() != self.num_control_vars() {
            return Err(TranscriptionError::length(
                context,
                self.num_control_vars(),
                dv.num_control_vars(),
            ));
        }
        Ok(())
    }

    /// Evaluates `evaluator` once at every global point (physical time). Outputs must
    /// have `num_outputs` rows.
    pub fn evaluate_at_points<D, F>(
        &self,
        dv: &D,
        evaluator: &F,
        num_outputs: usize,
    ) -> Result<Vec<DynamicsOutput>, TranscriptionError>
    where
        D: DecisionVector,
        F: DynamicsEvaluator,
    {
        self.check_decision_vector(dv)?;
        let times = self.time_vector()?;
        let (nx, nu) = (self.num_state_vars(), self.num_control_vars());
        let evaluate = |offset: usize| -> Result<DynamicsOutput, TranscriptionError> {
            let output = evaluator.evaluate(
                times[offset],
                &dv.state_at_offset(offset),
                &dv.control_at_offset(offset),
            )?;
            output.check_shape(num_outputs, nx, nu)?;
            Ok(output)
        };
        if self.parallel {
            (0..times.len()).into_par_iter().map(evaluate).collect()
        } else {
            (0..times.len()).map(evaluate).collect()
        }
    }

    /// Defect residual and Jacobian of one step (1-based) from point evaluations of the
    /// dynamics (`outputs[offset]` belongs to zero-based point `offset`).
    pub fn fill_dynamic_defect_con_matrices<D: DecisionVector>(
        &self,
        step_idx: usize,
        dv: &D,
        outputs: &[DynamicsOutput],
    ) -> Result<StepDefectContribution, TranscriptionError> {
        let (a, b) = self.constant_defect_matrices()?;
        let mesh = self.mesh()?;
        let offsets = mesh.layout.step_point_offsets(step_idx)?;
        let total = mesh.layout.total_num_points();
        if outputs.len() != total {
            return Err(TranscriptionError::length(
                "CollocationDriver::fill_dynamic_defect_con_matrices",
                total,
                outputs.len(),
            ));
        }
        let (nx, nu) = (self.num_state_vars(), self.num_control_vars());
        let s = self.tableau.num_points_per_step;
        let h = mesh.step_size_vec[step_idx - 1];
        let dt = self.tf - self.t0;

        let mut z = DVector::zeros(s * nx);
        let mut q = DVector::zeros(s * nx);
        let mut q_x = DMatrix::zeros(s * nx, s * nx);
        let mut q_u = DMatrix::zeros(s * nx, s * nu);
        let mut q_t0 = DVector::zeros(s * nx);
        let mut q_tf = DVector::zeros(s * nx);
        for (j, offset) in offsets.enumerate() {
            let out = &outputs[offset];
            let tau = mesh.discretization_points[offset];
            z.rows_mut(j * nx, nx).copy_from(&dv.state_at_offset(offset));
            q.rows_mut(j * nx, nx).copy_from(&(&out.value * dt));
            q_x.view_mut((j * nx, j * nx), (nx, nx))
                .copy_from(&(&out.state_jacobian * dt));
            q_u.view_mut((j * nx, j * nu), (nx, nu))
                .copy_from(&(&out.control_jacobian * dt));
            // dt = tf - t0 and t = t0 + tau * dt
            q_t0.rows_mut(j * nx, nx)
                .copy_from(&(-&out.value + &out.time_jacobian * (dt * (1.0 - tau))));
            q_tf.rows_mut(j * nx, nx)
                .copy_from(&(&out.value + &out.time_jacobian * (dt * tau)));
        }

        let hb = b * (-h);
        Ok(StepDefectContribution {
            step_idx,
            residual: a * &z + &hb * &q,
            d_state: a + &hb * &q_x,
            d_control: &hb * &q_u,
            d_t0: &hb * &q_t0,
            d_tf: &hb * &q_tf,
        })
    }

    /// All defect constraints of the phase with their sparse Jacobian with respect to
    /// `[t0, tf, states, controls]`. Uses the times of the last `set_time_vector` call.
    pub fn assemble_defects<D, F>(&self, dv: &D, dynamics: &F) -> Result<DefectAssembly, TranscriptionError>
    where
        D: DecisionVector,
        F: DynamicsEvaluator,
    {
        let begin = Instant::now();
        let layout = self.layout()?;
        let outputs = self.evaluate_at_points(dv, dynamics, self.num_state_vars())?;
        let fill = |step: usize| self.fill_dynamic_defect_con_matrices(step, dv, &outputs);
        let contributions: Vec<StepDefectContribution> = if self.parallel {
            (1..=layout.num_steps).into_par_iter().map(fill).collect::<Result<_, _>>()?
        } else {
            (1..=layout.num_steps).map(fill).collect::<Result<_, _>>()?
        };

        let (nx, nu) = (self.num_state_vars(), self.num_control_vars());
        let nd = self.tableau.num_defect_cons;
        let rows_per_step = nd * nx;
        let num_rows = self.num_defect_cons()?;
        let control_start = 2 + self.num_state_vars_nlp()?;
        let pattern_a = &self.tableau.pattern_a_mat;
        let pattern_b = &self.tableau.pattern_b_mat;

        let mut residual = DVector::zeros(num_rows);
        let mut coo = CooMatrix::new(num_rows, self.num_decision_vars()?);
        for c in &contributions {
            let row0 = (c.step_idx - 1) * rows_per_step;
            residual.rows_mut(row0, rows_per_step).copy_from(&c.residual);
            for r in 0..rows_per_step {
                coo.push(row0 + r, 0, c.d_t0[r]);
                coo.push(row0 + r, 1, c.d_tf[r]);
            }
            for (p, offset) in layout.step_point_offsets(c.step_idx)?.enumerate() {
                for f in 0..nd {
                    let depends_on_state = pattern_a[(f, p)] != 0.0 || pattern_b[(f, p)] != 0.0;
                    let depends_on_control = pattern_b[(f, p)] != 0.0;
                    for r in 0..nx {
                        let row = row0 + f * nx + r;
                        if depends_on_state {
                            for k in 0..nx {
                                coo.push(row, 2 + offset * nx + k, c.d_state[(f * nx + r, p * nx + k)]);
                            }
                        }
                        if depends_on_control {
                            for k in 0..nu {
                                coo.push(
                                    row,
                                    control_start + offset * nu + k,
                                    c.d_control[(f * nx + r, p * nu + k)],
                                );
                            }
                        }
                    }
                }
            }
        }
        let jacobian = CsrMatrix::from(&coo);
        debug!(
            "assembled {} defects, {} Jacobian entries in {:?}",
            num_rows,
            jacobian.nnz(),
            begin.elapsed()
        );
        Ok(DefectAssembly { residual, jacobian })
    }

    /// Cost quadrature of one step: `dt * h * sum_j beta_j g_j` and its partials.
    /// `outputs` are cost-integrand evaluations with a single output row.
    pub fn fill_dynamic_cost_func_matrices(
        &self,
        step_idx: usize,
        outputs: &[DynamicsOutput],
    ) -> Result<StepCostContribution, TranscriptionError> {
        let mesh = self.mesh()?;
        let offsets = mesh.layout.step_point_offsets(step_idx)?;
        if outputs.len() != mesh.layout.total_num_points() {
            return Err(TranscriptionError::length(
                "CollocationDriver::fill_dynamic_cost_func_matrices",
                mesh.layout.total_num_points(),
                outputs.len(),
            ));
        }
        let (nx, nu) = (self.num_state_vars(), self.num_control_vars());
        let s = self.tableau.num_points_per_step;
        let beta = self.tableau.quadrature_weights();
        let h = mesh.step_size_vec[step_idx - 1];
        let dt = self.tf - self.t0;

        let mut contribution = StepCostContribution {
            step_idx,
            value: 0.0,
            d_state: DVector::zeros(s * nx),
            d_control: DVector::zeros(s * nu),
            d_t0: 0.0,
            d_tf: 0.0,
        };
        for (j, offset) in offsets.enumerate() {
            let out = &outputs[offset];
            let w = h * beta[j];
            let tau = mesh.discretization_points[offset];
            let (g, g_t) = (out.value[0], out.time_jacobian[0]);
            contribution.value += dt * w * g;
            contribution
                .d_state
                .rows_mut(j * nx, nx)
                .copy_from(&(out.state_jacobian.row(0).transpose() * (dt * w)));
            contribution
                .d_control
                .rows_mut(j * nu, nu)
                .copy_from(&(out.control_jacobian.row(0).transpose() * (dt * w)));
            contribution.d_t0 += w * (-g + dt * g_t * (1.0 - tau));
            contribution.d_tf += w * (g + dt * g_t * tau);
        }
        Ok(contribution)
    }

    /// Integral cost over the phase and its dense gradient over the decision variables,
    /// from the cached per-point quadrature weights.
    pub fn assemble_cost<D, F>(&self, dv: &D, cost: &F) -> Result<CostAssembly, TranscriptionError>
    where
        D: DecisionVector,
        F: DynamicsEvaluator,
    {
        let weights = self.cost_weights()?;
        let outputs = self.evaluate_at_points(dv, cost, 1)?;
        let mesh = self.mesh()?;
        let (nx, nu) = (self.num_state_vars(), self.num_control_vars());
        let control_start = 2 + self.num_state_vars_nlp()?;
        let dt = self.tf - self.t0;

        let mut value = 0.0;
        let mut gradient = DVector::zeros(self.num_decision_vars()?);
        for (offset, out) in outputs.iter().enumerate() {
            let w = weights[offset];
            let tau = mesh.discretization_points[offset];
            let (g, g_t) = (out.value[0], out.time_jacobian[0]);
            value += dt * w * g;
            gradient[0] += w * (-g + dt * g_t * (1.0 - tau));
            gradient[1] += w * (g + dt * g_t * tau);
            for k in 0..nx {
                gradient[2 + offset * nx + k] = dt * w * out.state_jacobian[(0, k)];
            }
            for k in 0..nu {
                gradient[control_start + offset * nu + k] = dt * w * out.control_jacobian[(0, k)];
            }
        }
        Ok(CostAssembly { value, gradient })
    }

    ////////////////////////////////////////////////////////////////////////////
    //                      VALUES INSIDE ONE MESH STEP
    ////////////////////////////////////////////////////////////////////////////

    /// States and controls at the stage points of mesh `mesh_idx` (1-based step), optionally
    /// followed by the values at the next mesh point.
    pub fn get_state_and_control_in_mesh<D: DecisionVector>(
        &self,
        mesh_idx: usize,
        dv: &D,
        has_final_state: bool,
        has_final_control: bool,
    ) -> Result<(Vec<DVector<f64>>, Vec<DVector<f64>>), TranscriptionError> {
        self.check_decision_vector(dv)?;
        let layout = self.layout()?;
        if mesh_idx == 0 || mesh_idx > layout.num_steps {
            return Err(TranscriptionError::index(
                "CollocationDriver::get_state_and_control_in_mesh",
                mesh_idx,
                1,
                layout.num_steps + 1,
            ));
        }
        let mut states = Vec::with_capacity(layout.num_points_per_mesh() + 1);
        let mut controls = Vec::with_capacity(layout.num_points_per_mesh() + 1);
        for stage in 0..layout.num_points_per_mesh() {
            states.push(dv.state_at(mesh_idx, stage)?);
            controls.push(dv.control_at(mesh_idx, stage)?);
        }
        if has_final_state {
            states.push(dv.state_at(mesh_idx + 1, 0)?);
        }
        if has_final_control {
            controls.push(dv.control_at(mesh_idx + 1, 0)?);
        }
        Ok((states, controls))
    }

    /// States (Hermite, from collocated values and dynamics) and controls (barycentric
    /// Lagrange) of mesh step `mesh_idx` at increasing non-dimensional times `interp_pts`.
    /// Returns `(states, controls)` with one row per interpolation time.
    pub fn interpolate_in_mesh<D, F>(
        &self,
        mesh_idx: usize,
        dv: &D,
        dynamics: &F,
        interp_pts: &DVector<f64>,
    ) -> Result<(DMatrix<f64>, DMatrix<f64>), TranscriptionError>
    where
        D: DecisionVector,
        F: DynamicsEvaluator,
    {
        self.check_decision_vector(dv)?;
        let times = self.time_vector()?;
        let layout = self.layout()?;
        let offsets: Vec<usize> = layout.step_point_offsets(mesh_idx)?.collect();
        let dt = self.tf - self.t0;
        let derivatives = offsets
            .iter()
            .map(|&o| -> Result<DVector<f64>, TranscriptionError> {
                let out = dynamics.evaluate(times[o], &dv.state_at_offset(o), &dv.control_at_offset(o))?;
                out.check_shape(self.num_state_vars(), self.num_state_vars(), self.num_control_vars())?;
                Ok(out.value * dt)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let (states, _, controls) = self.interpolate_in_step(mesh_idx, dv, &derivatives, interp_pts)?;
        Ok((states, controls))
    }

    /// Core of [`CollocationDriver::interpolate_in_mesh`]. `derivatives[j]` is `dx/dtau`
    /// at the `j`-th point of the step. Also returns `dx/dtau` of the interpolant.
    /// Query times that coincide with a point of the step take that point's values.
    pub(crate) fn interpolate_in_step<D: DecisionVector>(
        &self,
        step_idx: usize,
        dv: &D,
        derivatives: &[DVector<f64>],
        interp_pts: &DVector<f64>,
    ) -> Result<(DMatrix<f64>, DMatrix<f64>, DMatrix<f64>), TranscriptionError> {
        let context = "CollocationDriver::interpolate_in_step";
        let mesh = self.mesh()?;
        let offsets: Vec<usize> = mesh.layout.step_point_offsets(step_idx)?.collect();
        if derivatives.len() != offsets.len() {
            return Err(TranscriptionError::length(context, offsets.len(), derivatives.len()));
        }
        let (nx, nu) = (self.num_state_vars(), self.num_control_vars());
        let num_queries = interp_pts.len();
        let node_taus = DVector::from_iterator(
            offsets.len(),
            offsets.iter().map(|&o| mesh.discretization_points[o]),
        );
        // Hermite coefficients are built on times shifted to start at zero
        let tau0 = node_taus[0];
        let shifted_nodes = node_taus.map(|t| t - tau0);
        let shifted_queries = interp_pts.map(|t| t - tau0);

        let mut states = DMatrix::zeros(num_queries, nx);
        let mut state_rates = DMatrix::zeros(num_queries, nx);
        for var in 0..nx {
            let values = DVector::from_iterator(offsets.len(), offsets.iter().map(|&o| dv.state_array()[(o, var)]));
            let rates = DVector::from_iterator(derivatives.len(), derivatives.iter().map(|d| d[var]));
            let (v, dv_dt) = HermiteUtil::interpolate_series(&shifted_queries, &shifted_nodes, &values, &rates)?;
            states.set_column(var, &v);
            state_rates.set_column(var, &dv_dt);
        }

        let mut controls = DMatrix::zeros(num_queries, nu);
        let coincident: Vec<Option<usize>> = interp_pts
            .iter()
            .map(|t| node_taus.iter().position(|node| node == t))
            .collect();
        if nu > 0 {
            let free: Vec<usize> = (0..num_queries).filter(|&q| coincident[q].is_none()).collect();
            if !free.is_empty() {
                let free_pts = DVector::from_iterator(free.len(), free.iter().map(|&q| interp_pts[q]));
                let mut interpolator = BaryLagrangeInterpolator::new();
                interpolator.set_ind_var_vec(&node_taus)?;
                interpolator.set_interp_point_vec(&free_pts)?;
                for var in 0..nu {
                    let values =
                        DVector::from_iterator(offsets.len(), offsets.iter().map(|&o| dv.control_array()[(o, var)]));
                    let interpolated = interpolator.interpolate(&values)?;
                    for (row, &q) in free.iter().enumerate() {
                        controls[(q, var)] = interpolated[row];
                    }
                }
            }
        }
        for (q, node) in coincident.iter().enumerate() {
            if let Some(j) = node {
                let o = offsets[*j];
                states.row_mut(q).copy_from(&dv.state_array().row(o));
                controls.row_mut(q).copy_from(&dv.control_array().row(o));
            }
        }
        Ok((states, state_rates, controls))
    }

    ////////////////////////////////////////////////////////////////////////////
    //                      SETTINGS
    ////////////////////////////////////////////////////////////////////////////

    pub fn set_parallel(&mut self, parallel: bool) {
        self.parallel = parallel;
        info!(
            "Collocation parallel processing: {}",
            if parallel { "enabled" } else { "disabled" }
        );
    }

    pub fn set_log_level(&mut self, level: LevelFilter) {
        self.log_level = Some(level);
        self.init_logger();
    }

    pub fn set_log_file(&mut self, filename: String) {
        self.log_to_file = Some(filename);
        self.init_logger();
    }

    pub fn set_console_logging(&mut self, enabled: bool) {
        self.log_to_console = enabled;
        self.init_logger();
    }

    pub fn disable_logging(&mut self) {
        self.set_log_level(LevelFilter::Off);
    }

    pub fn init_logger(&self) {
        init_logger(
            self.log_level.unwrap_or(LevelFilter::Info),
            self.log_to_file.as_deref(),
            self.log_to_console,
        );
    }
}
