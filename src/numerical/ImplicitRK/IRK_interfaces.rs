//! Collaborators of the collocation driver: read access to the decision vector and
//! the user dynamics evaluator.
use crate::numerical::ImplicitRK::mesh_layout::MeshLayout;
use crate::numerical::transcription_errors::TranscriptionError;
use nalgebra::{DMatrix, DVector};

/// Read access to state and control values at collocation points.
///
/// Mesh indices are 1-based and stage indices 0-based, as in [`MeshLayout`].
/// Arrays are point-major: row `p - 1` holds global point `p`.
pub trait DecisionVector: Sync {
    fn layout(&self) -> MeshLayout;
    fn num_state_vars(&self) -> usize;
    fn num_control_vars(&self) -> usize;
    fn state_array(&self) -> &DMatrix<f64>;
    fn control_array(&self) -> &DMatrix<f64>;

    fn state_at(&self, mesh_idx: usize, stage_idx: usize) -> Result<DVector<f64>, TranscriptionError> {
        let row = self.layout().point_index(mesh_idx, stage_idx)? - 1;
        Ok(self.state_array().row(row).transpose())
    }

    fn control_at(&self, mesh_idx: usize, stage_idx: usize) -> Result<DVector<f64>, TranscriptionError> {
        let row = self.layout().point_index(mesh_idx, stage_idx)? - 1;
        Ok(self.control_array().row(row).transpose())
    }

    /// Values at a zero-based point offset.
    fn state_at_offset(&self, offset: usize) -> DVector<f64> {
        self.state_array().row(offset).transpose()
    }

    fn control_at_offset(&self, offset: usize) -> DVector<f64> {
        self.control_array().row(offset).transpose()
    }
}

/// Plain point-major storage of states and controls.
#[derive(Debug, Clone, PartialEq)]
pub struct PointArrays {
    pub layout: MeshLayout,
    pub states: DMatrix<f64>,
    pub controls: DMatrix<f64>,
}

impl PointArrays {
    pub fn new(
        layout: MeshLayout,
        states: DMatrix<f64>,
        controls: DMatrix<f64>,
    ) -> Result<Self, TranscriptionError> {
        let context = "PointArrays::new";
        let num_points = layout.total_num_points();
        if states.nrows() != num_points {
            return Err(TranscriptionError::length(context, num_points, states.nrows()));
        }
        if controls.nrows() != num_points {
            return Err(TranscriptionError::length(context, num_points, controls.nrows()));
        }
        Ok(PointArrays {
            layout,
            states,
            controls,
        })
    }

    /// Splits an NLP vector laid out as `[t0, tf, states, controls]` (point-major).
    /// Returns `(t0, tf, arrays)`.
    pub fn from_nlp_vector(
        layout: MeshLayout,
        num_state_vars: usize,
        num_control_vars: usize,
        decision: &DVector<f64>,
    ) -> Result<(f64, f64, Self), TranscriptionError> {
        let num_points = layout.total_num_points();
        let expected = 2 + num_points * (num_state_vars + num_control_vars);
        if decision.len() != expected {
            return Err(TranscriptionError::length(
                "PointArrays::from_nlp_vector",
                expected,
                decision.len(),
            ));
        }
        let state_start = 2;
        let control_start = state_start + num_points * num_state_vars;
        let states = DMatrix::from_row_slice(
            num_points,
            num_state_vars,
            &decision.as_slice()[state_start..control_start],
        );
        let controls = DMatrix::from_row_slice(
            num_points,
            num_control_vars,
            &decision.as_slice()[control_start..],
        );
        Ok((decision[0], decision[1], PointArrays { layout, states, controls }))
    }

    /// Inverse of [`PointArrays::from_nlp_vector`].
    pub fn to_nlp_vector(&self, t0: f64, tf: f64) -> DVector<f64> {
        let mut values = Vec::with_capacity(2 + self.states.len() + self.controls.len());
        values.push(t0);
        values.push(tf);
        for row in self.states.row_iter() {
            values.extend(row.iter());
        }
        for row in self.controls.row_iter() {
            values.extend(row.iter());
        }
        DVector::from_vec(values)
    }
}

impl DecisionVector for PointArrays {
    fn layout(&self) -> MeshLayout {
        self.layout
    }
    fn num_state_vars(&self) -> usize {
        self.states.ncols()
    }
    fn num_control_vars(&self) -> usize {
        self.controls.ncols()
    }
    fn state_array(&self) -> &DMatrix<f64> {
        &self.states
    }
    fn control_array(&self) -> &DMatrix<f64> {
        &self.controls
    }
}

/// Right-hand side value and its partial derivatives at one point.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicsOutput {
    pub value: DVector<f64>,
    /// d value / d state, `n_out x num_state_vars`
    pub state_jacobian: DMatrix<f64>,
    /// d value / d control, `n_out x num_control_vars`
    pub control_jacobian: DMatrix<f64>,
    /// d value / d time
    pub time_jacobian: DVector<f64>,
}

impl DynamicsOutput {
    pub fn new(
        value: DVector<f64>,
        state_jacobian: DMatrix<f64>,
        control_jacobian: DMatrix<f64>,
        time_jacobian: DVector<f64>,
    ) -> Self {
        DynamicsOutput {
            value,
            state_jacobian,
            control_jacobian,
            time_jacobian,
        }
    }

    /// Output with all partials zero. Enough for error estimation, which needs values only.
    pub fn value_only(value: DVector<f64>, num_state_vars: usize, num_control_vars: usize) -> Self {
        let n = value.len();
        DynamicsOutput {
            value,
            state_jacobian: DMatrix::zeros(n, num_state_vars),
            control_jacobian: DMatrix::zeros(n, num_control_vars),
            time_jacobian: DVector::zeros(n),
        }
    }

    pub(crate) fn check_shape(
        &self,
        num_outputs: usize,
        num_state_vars: usize,
        num_control_vars: usize,
    ) -> Result<(), TranscriptionError> {
        let context = "DynamicsOutput::check_shape";
        if self.value.len() != num_outputs {
            return Err(TranscriptionError::length(context, num_outputs, self.value.len()));
        }
        if self.state_jacobian.shape() != (num_outputs, num_state_vars) {
            return Err(TranscriptionError::length(
                context,
                num_outputs * num_state_vars,
                self.state_jacobian.len(),
            ));
        }
        if self.control_jacobian.shape() != (num_outputs, num_control_vars) {
            return Err(TranscriptionError::length(
                context,
                num_outputs * num_control_vars,
                self.control_jacobian.len(),
            ));
        }
        if self.time_jacobian.len() != num_outputs {
            return Err(TranscriptionError::length(context, num_outputs, self.time_jacobian.len()));
        }
        Ok(())
    }
}

/// User dynamics (or cost integrand) evaluated at physical time.
pub trait DynamicsEvaluator: Sync {
    fn evaluate(
        &self,
        time: f64,
        state: &DVector<f64>,
        control: &DVector<f64>,
    ) -> Result<DynamicsOutput, TranscriptionError>;
}

impl<F> DynamicsEvaluator for F
where
    F: Fn(f64, &DVector<f64>, &DVector<f64>) -> Result<DynamicsOutput, TranscriptionError> + Sync,
{
    fn evaluate(
        &self,
        time: f64,
        state: &DVector<f64>,
        control: &DVector<f64>,
    ) -> Result<DynamicsOutput, TranscriptionError> {
        self(time, state, control)
    }
}
