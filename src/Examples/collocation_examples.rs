#![allow(non_snake_case)]
use crate::numerical::ImplicitRK::IRK_config::TranscriptionConfig;
use crate::numerical::ImplicitRK::IRK_driver::CollocationDriver;
use crate::numerical::ImplicitRK::IRK_interfaces::{DynamicsOutput, PointArrays};
use crate::numerical::ImplicitRK::butcher_tableau::{ButcherTableau, CollocationMethod};
use crate::numerical::Interpolation::Hermite::HermiteUtil;
use crate::numerical::transcription_errors::TranscriptionError;

use nalgebra::{DMatrix, DVector};
use strum::IntoEnumIterator;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// rest-to-rest double integrator: x1' = x2, x2' = u
fn double_integrator(
    _t: f64,
    x: &DVector<f64>,
    u: &DVector<f64>,
) -> Result<DynamicsOutput, TranscriptionError> {
    Ok(DynamicsOutput::new(
        DVector::from_vec(vec![x[1], u[0]]),
        DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 0.0]),
        DMatrix::from_row_slice(2, 1, &[0.0, 1.0]),
        DVector::zeros(2),
    ))
}

/// control effort u^2 / 2
fn control_effort(
    _t: f64,
    x: &DVector<f64>,
    u: &DVector<f64>,
) -> Result<DynamicsOutput, TranscriptionError> {
    Ok(DynamicsOutput::new(
        DVector::from_element(1, 0.5 * u[0] * u[0]),
        DMatrix::zeros(1, x.len()),
        DMatrix::from_element(1, 1, u[0]),
        DVector::zeros(1),
    ))
}

/// x' = -x^2, solved by x = 1 / (1 + t)
fn decay(_t: f64, x: &DVector<f64>, u: &DVector<f64>) -> Result<DynamicsOutput, TranscriptionError> {
    Ok(DynamicsOutput::new(
        DVector::from_element(1, -x[0] * x[0]),
        DMatrix::from_element(1, 1, -2.0 * x[0]),
        DMatrix::zeros(1, u.len()),
        DVector::zeros(1),
    ))
}

/// Samples a trajectory known in closed form at every point of the driver's mesh.
fn sample<S, C>(driver: &CollocationDriver, state: S, control: C) -> Result<PointArrays, TranscriptionError>
where
    S: Fn(f64) -> Vec<f64>,
    C: Fn(f64) -> Vec<f64>,
{
    let times = driver.time_vector()?;
    let (nx, nu) = (driver.num_state_vars(), driver.num_control_vars());
    let states = DMatrix::from_fn(times.len(), nx, |p, k| state(times[p])[k]);
    let controls = DMatrix::from_fn(times.len(), nu, |p, k| control(times[p])[k]);
    PointArrays::new(driver.layout()?, states, controls)
}

#[derive(Tabled)]
struct MethodSummary {
    method: String,
    order: usize,
    points: usize,
    defects: usize,
    jacobian_nnz: usize,
    max_defect: String,
    cost: String,
}

pub fn collocation_examples(example: usize) -> Result<(), TranscriptionError> {
    match example {
        0 => {
            // Butcher tables and dependency patterns of every scheme
            for method in CollocationMethod::iter() {
                let tableau = ButcherTableau::new(method);
                println!("{} (order {})", method, tableau.order());
                println!("rho = {}", tableau.rho_vec.transpose());
                println!("sigma = {}", tableau.sigma_matrix);
                println!("A pattern = {}", tableau.pattern_a_mat);
                println!("B pattern = {}", tableau.pattern_b_mat);
            }
        }
        1 => {
            // minimum-energy transfer from (0, 0) to (1, 0) in unit time:
            // u = 6 - 12 t, x2 = 6 t - 6 t^2, x1 = 3 t^2 - 2 t^3, cost = 6
            let mut rows = Vec::new();
            for method in CollocationMethod::iter() {
                let config = TranscriptionConfig::new(method, 2, 1).with_mesh(vec![0.0, 0.5, 1.0], vec![4, 4]);
                let mut driver = CollocationDriver::new(config);
                driver.initialize_transcription()?;
                driver.set_time_vector(0.0, 1.0)?;
                let arrays = sample(
                    &driver,
                    |t| vec![3.0 * t * t - 2.0 * t.powi(3), 6.0 * t - 6.0 * t * t],
                    |t| vec![6.0 - 12.0 * t],
                )?;
                let defects = driver.assemble_defects(&arrays, &double_integrator)?;
                let cost = driver.assemble_cost(&arrays, &control_effort)?;
                rows.push(MethodSummary {
                    method: method.to_string(),
                    order: driver.tableau.order(),
                    points: driver.layout()?.total_num_points(),
                    defects: defects.residual.len(),
                    jacobian_nnz: defects.jacobian.nnz(),
                    max_defect: format!("{:.3e}", defects.residual.amax()),
                    cost: format!("{:.10}", cost.value),
                });
            }
            let mut table = Table::new(&rows);
            table.with(Style::modern_rounded());
            println!("{}", table);
        }
        2 => {
            // refinement loop; the closed-form solution stands in for the NLP solution
            let config = TranscriptionConfig::new(CollocationMethod::HermiteSimpson, 1, 0)
                .with_mesh(vec![0.0, 0.5, 1.0], vec![3, 3])
                .with_rel_error_tol(1e-7);
            let mut driver = CollocationDriver::new(config);
            driver.set_log_level(log::LevelFilter::Info);
            driver.initialize_transcription()?;
            for pass in 0..6 {
                driver.set_time_vector(0.0, 4.0)?;
                let arrays = sample(&driver, |t| vec![1.0 / (1.0 + t)], |_| vec![])?;
                let result = driver.refine_mesh(&arrays, &decay)?;
                println!(
                    "pass {}: max error {:.3e}, points per interval {:?}",
                    pass,
                    result.step_errors.max(),
                    driver.mesh_interval_num_points
                );
                if !result.is_mesh_refined {
                    if result.cap_limited {
                        println!("mesh is not converged: node caps reached");
                    }
                    break;
                }
                driver.config = driver.config.clone().with_mesh(
                    result.new_mesh_interval_fractions.iter().cloned().collect(),
                    result.new_mesh_interval_num_points,
                );
                driver.initialize_transcription()?;
            }
            println!("{}", driver);
        }
        3 => {
            // settings from a task document and Hermite interpolation of sin on three nodes
            let document = "
            collocation
             method: RungeKutta6
             mesh_interval_fractions: 0.0, 0.3, 1.0
             mesh_interval_num_points: 4, 6
             num_state_vars: 2
             num_control_vars: 1
            refinement
             rel_error_tol: 1e-6
             cap_policy: Clamp
            ";
            let config = TranscriptionConfig::from_document_str(document)?;
            println!("{:?}", config);
            let mut driver = CollocationDriver::new(config);
            driver.initialize_transcription()?;
            println!("{}", driver);

            let nodes = DVector::from_vec(vec![0.0, 0.5, 1.0]);
            let values = nodes.map(f64::sin);
            let rates = nodes.map(f64::cos);
            let queries = DVector::from_vec(vec![0.25, 0.75]);
            let (v, d) = HermiteUtil::interpolate_series(&queries, &nodes, &values, &rates)?;
            for (q, t) in queries.iter().enumerate() {
                println!("t = {}: sin ~ {:.8} ({:.8}), cos ~ {:.8} ({:.8})", t, v[q], t.sin(), d[q], t.cos());
            }
        }
        _ => println!("no such example"),
    }
    Ok(())
}
