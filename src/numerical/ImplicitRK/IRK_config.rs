//! Transcription settings: method, initial mesh, problem dimensions, refinement
//! tolerances and logging. Loadable from a task document:
//!
//! ```text
//! collocation
//!  method: RungeKutta6
//!  mesh_interval_fractions: 0.0, 0.5, 1.0
//!  mesh_interval_num_points: 5, 5
//!  num_state_vars: 2
//!  num_control_vars: 1
//!  parallel: false
//! refinement
//!  rel_error_tol: 1e-5
//!  max_add_node_num_per_intv: 15
//!  max_total_node_num_per_intv: 20
//!  max_add_nodes_per_pass: 50
//!  romberg_digits: 6
//!  cap_policy: Subdivide
//! logging
//!  level: info
//!  file: collocation.log
//!  console: true
//! ```
use crate::Utils::task_parser::{DocumentMap, Value, get_value, get_values, parse_document_as};
use crate::numerical::ImplicitRK::butcher_tableau::CollocationMethod;
use crate::numerical::Interpolation::BaryLagrange::is_strictly_increasing;
use crate::numerical::transcription_errors::TranscriptionError;
use log::LevelFilter;
use nalgebra::DVector;
use std::path::Path;
use std::str::FromStr;
use strum_macros::{Display, EnumIter, EnumString};

/// What refinement does when an interval needs more points than
/// `max_total_node_num_per_intv` allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, EnumString)]
pub enum CapPolicy {
    /// split the interval into sub-intervals that each respect the cap
    #[default]
    Subdivide,
    /// keep one interval and add only as many points as the cap allows
    Clamp,
    /// stop the pass with `RefinementCapExceeded`
    Fail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefinementSettings {
    pub rel_error_tol: f64,
    pub max_add_node_num_per_intv: usize,
    pub max_total_node_num_per_intv: usize,
    pub max_add_nodes_per_pass: usize,
    /// Romberg integration samples `2^(digits-1) + 1` points per step
    pub romberg_digits: usize,
    pub cap_policy: CapPolicy,
}

impl Default for RefinementSettings {
    fn default() -> Self {
        RefinementSettings {
            rel_error_tol: 1e-5,
            max_add_node_num_per_intv: 15,
            max_total_node_num_per_intv: 20,
            max_add_nodes_per_pass: 50,
            romberg_digits: 6,
            cap_policy: CapPolicy::Subdivide,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionConfig {
    pub method: CollocationMethod,
    /// interval boundaries; normalized to [0, 1] by the driver
    pub mesh_interval_fractions: DVector<f64>,
    /// mesh points per interval, both ends included
    pub mesh_interval_num_points: Vec<usize>,
    pub num_state_vars: usize,
    pub num_control_vars: usize,
    pub refinement: RefinementSettings,
    pub parallel: bool,
    pub log_level: Option<LevelFilter>,
    pub log_to_file: Option<String>,
    pub log_to_console: bool,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        TranscriptionConfig {
            method: CollocationMethod::RungeKutta4,
            mesh_interval_fractions: DVector::from_vec(vec![0.0, 1.0]),
            mesh_interval_num_points: vec![5],
            num_state_vars: 1,
            num_control_vars: 0,
            refinement: RefinementSettings::default(),
            parallel: false,
            log_level: Some(LevelFilter::Warn),
            log_to_file: None,
            log_to_console: true,
        }
    }
}

impl TranscriptionConfig {
    pub fn new(method: CollocationMethod, num_state_vars: usize, num_control_vars: usize) -> Self {
        TranscriptionConfig {
            method,
            num_state_vars,
            num_control_vars,
            ..Default::default()
        }
    }

    pub fn with_mesh(mut self, fractions: Vec<f64>, num_points: Vec<usize>) -> Self {
        self.mesh_interval_fractions = DVector::from_vec(fractions);
        self.mesh_interval_num_points = num_points;
        self
    }

    pub fn with_rel_error_tol(mut self, tol: f64) -> Self {
        self.refinement.rel_error_tol = tol;
        self
    }

    pub fn with_cap_policy(mut self, policy: CapPolicy) -> Self {
        self.refinement.cap_policy = policy;
        self
    }

    pub fn with_romberg_digits(mut self, digits: usize) -> Self {
        self.refinement.romberg_digits = digits;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn num_mesh_intervals(&self) -> usize {
        self.mesh_interval_num_points.len()
    }

    /// Checks mesh shape, dimensions and refinement limits.
    pub fn validate(&self) -> Result<(), TranscriptionError> {
        let bad = |msg: String| Err(TranscriptionError::InvalidConfig(msg));
        let num_intervals = self.mesh_interval_num_points.len();
        if num_intervals == 0 {
            return bad("at least one mesh interval is required".to_string());
        }
        if self.mesh_interval_fractions.len() != num_intervals + 1 {
            return bad(format!(
                "{} mesh interval fractions given for {} intervals, expected {}",
                self.mesh_interval_fractions.len(),
                num_intervals,
                num_intervals + 1
            ));
        }
        if !is_strictly_increasing(&self.mesh_interval_fractions) {
            return bad("mesh interval fractions must be strictly increasing".to_string());
        }
        if let Some(i) = self.mesh_interval_num_points.iter().position(|&n| n < 2) {
            return bad(format!("mesh interval {} has fewer than 2 points", i));
        }
        if self.num_state_vars == 0 {
            return bad("at least one state variable is required".to_string());
        }
        let r = &self.refinement;
        if !(r.rel_error_tol > 0.0) {
            return bad(format!("rel_error_tol must be positive, got {}", r.rel_error_tol));
        }
        if r.romberg_digits == 0 || r.romberg_digits > 20 {
            return bad(format!("romberg_digits must be in 1..=20, got {}", r.romberg_digits));
        }
        if r.max_add_node_num_per_intv == 0 || r.max_add_nodes_per_pass == 0 {
            return bad(format!(
                "max_add_node_num_per_intv and max_add_nodes_per_pass must be positive, got {} and {}",
                r.max_add_node_num_per_intv, r.max_add_nodes_per_pass
            ));
        }
        if r.max_total_node_num_per_intv < 3 {
            return bad("max_total_node_num_per_intv must be at least 3".to_string());
        }
        Ok(())
    }

    /// Fractions mapped affinely onto [0, 1].
    pub fn normalized_fractions(&self) -> DVector<f64> {
        let f0 = self.mesh_interval_fractions[0];
        let span = self.mesh_interval_fractions[self.mesh_interval_fractions.len() - 1] - f0;
        self.mesh_interval_fractions.map(|f| (f - f0) / span)
    }

    /// Reads a configuration from task-document text; absent keys keep their defaults.
    pub fn from_document_str(input: &str) -> Result<Self, TranscriptionError> {
        let document = parse_document_as(input, None).map_err(TranscriptionError::InvalidConfig)?;
        let config = Self::from_document(&document)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TranscriptionError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            TranscriptionError::InvalidConfig(format!(
                "cannot read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_document_str(&text)
    }

    fn from_document(document: &DocumentMap) -> Result<Self, TranscriptionError> {
        let mut config = TranscriptionConfig::default();

        if let Some(name) = get_value(document, "collocation", "method") {
            config.method = CollocationMethod::from_name(&name.to_string())?;
        }
        if let Some(values) = get_values(document, "collocation", "mesh_interval_fractions") {
            let fractions = values
                .iter()
                .map(|v| as_f64(v, "mesh_interval_fractions"))
                .collect::<Result<Vec<_>, _>>()?;
            config.mesh_interval_fractions = DVector::from_vec(fractions);
        }
        if let Some(values) = get_values(document, "collocation", "mesh_interval_num_points") {
            config.mesh_interval_num_points = values
                .iter()
                .map(|v| as_usize(v, "mesh_interval_num_points"))
                .collect::<Result<Vec<_>, _>>()?;
        }
        if let Some(v) = get_value(document, "collocation", "num_state_vars") {
            config.num_state_vars = as_usize(v, "num_state_vars")?;
        }
        if let Some(v) = get_value(document, "collocation", "num_control_vars") {
            config.num_control_vars = as_usize(v, "num_control_vars")?;
        }
        if let Some(v) = get_value(document, "collocation", "parallel") {
            config.parallel = as_bool(v, "parallel")?;
        }

        let r = &mut config.refinement;
        if let Some(v) = get_value(document, "refinement", "rel_error_tol") {
            r.rel_error_tol = as_f64(v, "rel_error_tol")?;
        }
        if let Some(v) = get_value(document, "refinement", "max_add_node_num_per_intv") {
            r.max_add_node_num_per_intv = as_usize(v, "max_add_node_num_per_intv")?;
        }
        if let Some(v) = get_value(document, "refinement", "max_total_node_num_per_intv") {
            r.max_total_node_num_per_intv = as_usize(v, "max_total_node_num_per_intv")?;
        }
        if let Some(v) = get_value(document, "refinement", "max_add_nodes_per_pass") {
            r.max_add_nodes_per_pass = as_usize(v, "max_add_nodes_per_pass")?;
        }
        if let Some(v) = get_value(document, "refinement", "romberg_digits") {
            r.romberg_digits = as_usize(v, "romberg_digits")?;
        }
        if let Some(v) = get_value(document, "refinement", "cap_policy") {
            r.cap_policy = CapPolicy::from_str(&v.to_string()).map_err(|_| {
                TranscriptionError::InvalidConfig(format!("unknown cap_policy '{}'", v))
            })?;
        }

        if let Some(v) = get_value(document, "logging", "level") {
            let level = LevelFilter::from_str(&v.to_string()).map_err(|_| {
                TranscriptionError::InvalidConfig(format!("unknown log level '{}'", v))
            })?;
            config.log_level = Some(level);
        }
        if let Some(v) = get_value(document, "logging", "file") {
            config.log_to_file = Some(v.to_string());
        }
        if let Some(v) = get_value(document, "logging", "console") {
            config.log_to_console = as_bool(v, "console")?;
        }
        Ok(config)
    }
}

fn as_f64(value: &Value, key: &str) -> Result<f64, TranscriptionError> {
    value
        .as_float()
        .ok_or_else(|| TranscriptionError::InvalidConfig(format!("{}: '{}' is not a number", key, value)))
}

fn as_usize(value: &Value, key: &str) -> Result<usize, TranscriptionError> {
    value.as_usize().ok_or_else(|| {
        TranscriptionError::InvalidConfig(format!("{}: '{}' is not a non-negative integer", key, value))
    })
}

fn as_bool(value: &Value, key: &str) -> Result<bool, TranscriptionError> {
    value
        .as_boolean()
        .ok_or_else(|| TranscriptionError::InvalidConfig(format!("{}: '{}' is not a boolean", key, value)))
}
