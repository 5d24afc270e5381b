//! Mesh refinement for the collocation driver.
//!
//! For every step the state is rebuilt as a Hermite polynomial from the collocated
//! values and dynamics, and the residual `|x~'(tau) - dt f(t, x~, u~)| / dt` is
//! integrated over the step with Romberg quadrature. Dividing by `1 + w` (with `w` the
//! largest magnitude of the state and its dynamics at the step points) gives a
//! scale-free relative error. Intervals whose largest step error exceeds the tolerance
//! get `k` extra points chosen so that `err (n / (n + k))^(p + 1) <= tol`.
use crate::numerical::ImplicitRK::IRK_config::CapPolicy;
use crate::numerical::ImplicitRK::IRK_driver::{CollocationDriver, compute_discretization};
use crate::numerical::ImplicitRK::IRK_interfaces::{DecisionVector, DynamicsEvaluator, DynamicsOutput};
use crate::numerical::Interpolation::Romberg::romberg_integration;
use crate::numerical::transcription_errors::TranscriptionError;
use log::{info, warn};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Collocation error of the current solution.
#[derive(Debug, Clone, PartialEq)]
pub struct CollocationErrors {
    /// largest relative error over the states of every step
    pub step_errors: DVector<f64>,
    /// relative error per step (rows) and state (columns)
    pub rel_error_array: DMatrix<f64>,
    /// largest step error of every mesh interval
    pub max_rel_error_per_interval: DVector<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshRefinementResult {
    pub is_mesh_refined: bool,
    /// some interval above tolerance got fewer points than requested because of
    /// `max_total_node_num_per_intv`; the mesh is not converged even if unrefined
    pub cap_limited: bool,
    pub new_mesh_interval_fractions: DVector<f64>,
    pub new_mesh_interval_num_points: Vec<usize>,
    pub max_rel_error_per_interval: DVector<f64>,
    pub step_errors: DVector<f64>,
    /// non-dimensional times of the new points
    pub new_discretization_points: DVector<f64>,
    /// point-major guesses on the new mesh (unchanged arrays if not refined)
    pub new_state_guess: DMatrix<f64>,
    pub new_control_guess: DMatrix<f64>,
}

/// How one interval is rebuilt: number of sub-intervals and points added to each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalRefinement {
    pub num_sub_intervals: usize,
    pub added_points: Vec<usize>,
    /// fewer points than the error estimate asks for
    pub cap_limited: bool,
}

#[derive(Tabled)]
struct IntervalReport {
    interval: usize,
    points: usize,
    max_rel_error: String,
    added: String,
    sub_intervals: usize,
}

impl CollocationDriver {
    /// Per state: the largest of |state| and |dynamics| over the points of the step.
    pub fn cal_weight_vec<D: DecisionVector>(
        &self,
        step_idx: usize,
        dv: &D,
        outputs: &[DynamicsOutput],
    ) -> Result<DVector<f64>, TranscriptionError> {
        let nx = self.num_state_vars();
        let mut weights = DVector::zeros(nx);
        for offset in self.layout()?.step_point_offsets(step_idx)? {
            let state = dv.state_at_offset(offset);
            for var in 0..nx {
                weights[var] = f64::max(
                    weights[var],
                    f64::max(state[var].abs(), outputs[offset].value[var].abs()),
                );
            }
        }
        Ok(weights)
    }

    /// Absolute collocation error of every state over one step (1-based).
    pub fn get_colloc_error<D, F>(
        &self,
        step_idx: usize,
        dv: &D,
        dynamics: &F,
        outputs: &[DynamicsOutput],
    ) -> Result<DVector<f64>, TranscriptionError>
    where
        D: DecisionVector,
        F: DynamicsEvaluator,
    {
        let mesh = self.mesh()?;
        let offsets = mesh.layout.step_point_offsets(step_idx)?;
        let (first, last) = (offsets.start, offsets.end - 1);
        let dt = self.tf - self.t0;
        let nx = self.num_state_vars();
        let derivatives: Vec<DVector<f64>> = offsets.map(|o| &outputs[o].value * dt).collect();

        let integrand = |taus: &DVector<f64>| -> Result<DMatrix<f64>, TranscriptionError> {
            let (states, rates, controls) = self.interpolate_in_step(step_idx, dv, &derivatives, taus)?;
            let mut residual = DMatrix::zeros(taus.len(), nx);
            for (q, tau) in taus.iter().enumerate() {
                let time = self.t0 + tau * dt;
                let state = states.row(q).transpose();
                let control = controls.row(q).transpose();
                let f = dynamics.evaluate(time, &state, &control)?.value;
                if f.len() != nx {
                    return Err(TranscriptionError::length("CollocationDriver::get_colloc_error", nx, f.len()));
                }
                for var in 0..nx {
                    residual[(q, var)] = (rates[(q, var)] - dt * f[var]).abs() / dt;
                }
            }
            Ok(residual)
        };
        romberg_integration(
            mesh.discretization_points[first],
            mesh.discretization_points[last],
            self.config.refinement.romberg_digits,
            integrand,
        )
    }

    /// Relative collocation errors of every step and their maximum per mesh interval.
    pub fn get_colloc_error_vec<D, F>(&self, dv: &D, dynamics: &F) -> Result<CollocationErrors, TranscriptionError>
    where
        D: DecisionVector,
        F: DynamicsEvaluator,
    {
        let outputs = self.evaluate_at_points(dv, dynamics, self.num_state_vars())?;
        self.colloc_errors_with(dv, dynamics, &outputs)
    }

    fn colloc_errors_with<D, F>(
        &self,
        dv: &D,
        dynamics: &F,
        outputs: &[DynamicsOutput],
    ) -> Result<CollocationErrors, TranscriptionError>
    where
        D: DecisionVector,
        F: DynamicsEvaluator,
    {
        let mesh = self.mesh()?;
        let num_steps = mesh.layout.num_steps;
        let nx = self.num_state_vars();
        let relative_error = |step: usize| -> Result<DVector<f64>, TranscriptionError> {
            let weights = self.cal_weight_vec(step, dv, outputs)?;
            let error = self.get_colloc_error(step, dv, dynamics, outputs)?;
            Ok(error.zip_map(&weights, |e, w| e / (1.0 + w)))
        };
        let per_step: Vec<DVector<f64>> = if self.parallel {
            (1..=num_steps).into_par_iter().map(relative_error).collect::<Result<_, _>>()?
        } else {
            (1..=num_steps).map(relative_error).collect::<Result<_, _>>()?
        };

        let mut rel_error_array = DMatrix::zeros(num_steps, nx);
        for (k, errors) in per_step.iter().enumerate() {
            rel_error_array.set_row(k, &errors.transpose());
        }
        let step_errors = DVector::from_iterator(num_steps, per_step.iter().map(|e| e.max()));
        let mut max_rel_error_per_interval = DVector::zeros(self.mesh_interval_num_points.len());
        for (k, &interval) in mesh.step_interval.iter().enumerate() {
            max_rel_error_per_interval[interval] = f64::max(max_rel_error_per_interval[interval], step_errors[k]);
        }
        Ok(CollocationErrors {
            step_errors,
            rel_error_array,
            max_rel_error_per_interval,
        })
    }

    /// Smallest `k` in `1..=max_add` with `error (n / (n + k))^(p + 1) <= tol`, or `max_add`.
    fn betts_added_points(&self, max_error: f64, n: usize) -> usize {
        let settings = &self.config.refinement;
        let exponent = (self.tableau.order() + 1) as i32;
        let mut added = 0;
        let mut predicted = settings.rel_error_tol * 1000.0;
        while added < settings.max_add_node_num_per_intv && predicted > settings.rel_error_tol {
            added += 1;
            predicted = max_error * (n as f64 / (n + added) as f64).powi(exponent);
        }
        added
    }

    /// Decides how interval `interval_idx` (0-based) is rebuilt from the step errors.
    pub fn get_new_mesh_points(
        &self,
        interval_idx: usize,
        step_errors: &DVector<f64>,
    ) -> Result<IntervalRefinement, TranscriptionError> {
        let num_intervals = self.mesh_interval_num_points.len();
        if interval_idx >= num_intervals {
            return Err(TranscriptionError::index(
                "CollocationDriver::get_new_mesh_points",
                interval_idx,
                0,
                num_intervals,
            ));
        }
        let settings = &self.config.refinement;
        let n = self.mesh_interval_num_points[interval_idx];
        let first_step: usize = self.mesh_interval_num_points[..interval_idx].iter().map(|p| p - 1).sum();
        let num_steps = n - 1;
        let max_in = |from: usize, to: usize| (from..to).map(|k| step_errors[k]).fold(0.0, f64::max);

        let unchanged = IntervalRefinement {
            num_sub_intervals: 1,
            added_points: vec![0],
            cap_limited: false,
        };
        let max_error = max_in(first_step, first_step + num_steps);
        if max_error < settings.rel_error_tol {
            return Ok(unchanged);
        }
        let added = self
            .betts_added_points(max_error, n)
            .min(settings.max_add_nodes_per_pass);
        if added + n <= settings.max_total_node_num_per_intv {
            return Ok(IntervalRefinement {
                num_sub_intervals: 1,
                added_points: vec![added],
                cap_limited: false,
            });
        }
        let clamped = |added: usize| {
            let allowed = settings.max_total_node_num_per_intv.saturating_sub(n);
            warn!(
                "interval {} needs {} points, clamped to {}",
                interval_idx,
                added + n,
                n + allowed
            );
            IntervalRefinement {
                num_sub_intervals: 1,
                added_points: vec![allowed],
                cap_limited: true,
            }
        };

        match settings.cap_policy {
            CapPolicy::Fail => Err(TranscriptionError::RefinementCapExceeded {
                interval: interval_idx,
                requested: added + n,
                cap: settings.max_total_node_num_per_intv,
            }),
            CapPolicy::Clamp => Ok(clamped(added)),
            // a single step cannot be split
            CapPolicy::Subdivide if num_steps == 1 => Ok(clamped(added)),
            CapPolicy::Subdivide => {
                // every new sub-interval keeps at least one old step
                let num_sub = ((added + n) / settings.max_total_node_num_per_intv + 1)
                    .min(num_steps)
                    .max(1);
                let chunk = num_steps / num_sub;
                let mut added_points = Vec::with_capacity(num_sub);
                let mut current = first_step;
                let mut next = first_step + chunk;
                for sub in 0..num_sub {
                    // the last sub-interval takes the remainder
                    if sub == num_sub - 1 {
                        next = first_step + num_steps;
                    }
                    let sub_error = max_in(current, next);
                    added_points.push(
                        self.betts_added_points(sub_error, next - current)
                            .min(settings.max_add_node_num_per_intv),
                    );
                    current = next;
                    next += chunk;
                }
                // refine_mesh clamps every sub-interval to the cap
                let base = n / num_sub;
                let cap = settings.max_total_node_num_per_intv.max(3);
                let cap_limited = added_points.iter().any(|a| (a + base).max(3) > cap);
                Ok(IntervalRefinement {
                    num_sub_intervals: num_sub,
                    added_points,
                    cap_limited,
                })
            }
        }
    }

    /// One refinement pass. Returns the new mesh and state/control guesses interpolated
    /// onto it, or the current mesh and arrays when no interval can take more points.
    /// An unrefined result is converged only if `cap_limited` is false.
    pub fn refine_mesh<D, F>(&self, dv: &D, dynamics: &F) -> Result<MeshRefinementResult, TranscriptionError>
    where
        D: DecisionVector,
        F: DynamicsEvaluator,
    {
        let mesh = self.mesh()?;
        let outputs = self.evaluate_at_points(dv, dynamics, self.num_state_vars())?;
        let errors = self.colloc_errors_with(dv, dynamics, &outputs)?;

        let plan = (0..self.mesh_interval_num_points.len())
            .map(|i| self.get_new_mesh_points(i, &errors.step_errors))
            .collect::<Result<Vec<_>, _>>()?;
        self.log_refinement_report(&errors, &plan);

        let total_added: usize = plan.iter().flat_map(|p| p.added_points.iter()).sum();
        let cap_limited = plan.iter().any(|p| p.cap_limited);
        if total_added == 0 {
            let max_error = errors.step_errors.max();
            let tol = self.config.refinement.rel_error_tol;
            if max_error < tol {
                info!(
                    "mesh refinement: max relative error {:.3e} within tolerance {:.1e}",
                    max_error, tol
                );
            } else {
                warn!(
                    "mesh refinement: max relative error {:.3e} above tolerance {:.1e}, no points can be added within max_total_node_num_per_intv",
                    max_error, tol
                );
            }
            return Ok(MeshRefinementResult {
                is_mesh_refined: false,
                cap_limited,
                new_mesh_interval_fractions: self.mesh_interval_fractions.clone(),
                new_mesh_interval_num_points: self.mesh_interval_num_points.clone(),
                max_rel_error_per_interval: errors.max_rel_error_per_interval,
                step_errors: errors.step_errors,
                new_discretization_points: mesh.discretization_points.clone(),
                new_state_guess: dv.state_array().clone(),
                new_control_guess: dv.control_array().clone(),
            });
        }

        let cap = self.config.refinement.max_total_node_num_per_intv;
        let mut fractions = Vec::new();
        let mut num_points = Vec::new();
        for (i, refinement) in plan.iter().enumerate() {
            let start = self.mesh_interval_fractions[i];
            let width = (self.mesh_interval_fractions[i + 1] - start) / refinement.num_sub_intervals as f64;
            let base = self.mesh_interval_num_points[i] / refinement.num_sub_intervals;
            for (sub, added) in refinement.added_points.iter().enumerate() {
                let mut nodes = (added + base).max(3);
                if refinement.num_sub_intervals > 1 {
                    nodes = nodes.min(cap.max(3));
                }
                fractions.push(start + sub as f64 * width);
                num_points.push(nodes);
            }
        }
        fractions.push(self.mesh_interval_fractions[self.mesh_interval_fractions.len() - 1]);
        let new_fractions = DVector::from_vec(fractions);
        let new_mesh = compute_discretization(&new_fractions, &num_points, &self.tableau.stage_times);
        let (new_state_guess, new_control_guess) =
            self.reseed_guesses(dv, &outputs, &new_mesh.discretization_points)?;

        info!(
            "mesh refinement: {} -> {} intervals, {} -> {} points",
            self.mesh_interval_num_points.len(),
            num_points.len(),
            mesh.layout.total_num_points(),
            new_mesh.layout.total_num_points()
        );
        Ok(MeshRefinementResult {
            is_mesh_refined: true,
            cap_limited,
            new_mesh_interval_fractions: new_fractions,
            new_mesh_interval_num_points: num_points,
            max_rel_error_per_interval: errors.max_rel_error_per_interval,
            step_errors: errors.step_errors,
            new_discretization_points: new_mesh.discretization_points,
            new_state_guess,
            new_control_guess,
        })
    }

    /// Interpolates the current solution at the new points, step by step of the old mesh.
    fn reseed_guesses<D: DecisionVector>(
        &self,
        dv: &D,
        outputs: &[DynamicsOutput],
        new_points: &DVector<f64>,
    ) -> Result<(DMatrix<f64>, DMatrix<f64>), TranscriptionError> {
        let mesh = self.mesh()?;
        let num_steps = mesh.layout.num_steps;
        let dt = self.tf - self.t0;
        let mut states = DMatrix::zeros(new_points.len(), self.num_state_vars());
        let mut controls = DMatrix::zeros(new_points.len(), self.num_control_vars());

        let mut next = 0;
        for step in 1..=num_steps {
            let offsets = mesh.layout.step_point_offsets(step)?;
            let end = mesh.discretization_points[offsets.end - 1];
            let begin = next;
            while next < new_points.len() && (step == num_steps || new_points[next] < end) {
                next += 1;
            }
            if next == begin {
                continue;
            }
            let derivatives: Vec<DVector<f64>> = offsets.map(|o| &outputs[o].value * dt).collect();
            let queries = new_points.rows(begin, next - begin).into_owned();
            let (s, _, u) = self.interpolate_in_step(step, dv, &derivatives, &queries)?;
            states.rows_mut(begin, next - begin).copy_from(&s);
            controls.rows_mut(begin, next - begin).copy_from(&u);
        }
        Ok((states, controls))
    }

    fn log_refinement_report(&self, errors: &CollocationErrors, plan: &[IntervalRefinement]) {
        let rows: Vec<IntervalReport> = plan
            .iter()
            .enumerate()
            .map(|(i, p)| IntervalReport {
                interval: i,
                points: self.mesh_interval_num_points[i],
                max_rel_error: format!("{:.3e}", errors.max_rel_error_per_interval[i]),
                added: format!("{:?}", p.added_points),
                sub_intervals: p.num_sub_intervals,
            })
            .collect();
        let mut table = Table::new(&rows);
        table.with(Style::modern_rounded());
        info!("\n MESH REFINEMENT \n{}", table);
    }
}
