//! Barycentric Lagrange interpolation over an arbitrary node set.
//!
//! The interpolator keeps two pieces of state:
//! - the node set `ind_var` with its barycentric weights
//!   `w_i = 1 / prod_{j != i} (x_i - x_j)`
//! - the query set with the precomputed barycentric matrix
//!   `L[q, i] = (w_i / (t_q - x_i)) / sum_k (w_k / (t_q - x_k))`
//!
//! Once both are set, interpolating any number of value vectors is a single
//! matrix-vector product `L * f`, so the `O(queries * nodes)` build cost is paid
//! once and reused (e.g. once per control component).
//!
//! A failed `set_*` call leaves the corresponding part undefined, so later calls fail
//! with `PrerequisiteNotSet` instead of silently working on stale data.
use crate::numerical::transcription_errors::TranscriptionError;
use itertools::Itertools;
use log::debug;
use nalgebra::{DMatrix, DVector};

/// true when every element is strictly greater than the previous one
pub fn is_strictly_increasing(test_vec: &DVector<f64>) -> bool {
    test_vec.iter().tuple_windows().all(|(a, b)| b - a > 0.0)
}

#[derive(Debug, Clone)]
struct NodeSet {
    ind_var: DVector<f64>,
    weight_vec: DVector<f64>,
}

#[derive(Debug, Clone)]
struct QuerySet {
    interp_points: DVector<f64>,
    barycentric_matrix: DMatrix<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct BaryLagrangeInterpolator {
    nodes: Option<NodeSet>,
    queries: Option<QuerySet>,
}

impl BaryLagrangeInterpolator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the nodes where the dependent variable is known and computes the
    /// barycentric weights. Any previously built query matrix is dropped because
    /// it belongs to the old node set.
    pub fn set_ind_var_vec(&mut self, ind_var_vec: &DVector<f64>) -> Result<(), TranscriptionError> {
        self.queries = None;
        if let Err(e) = Self::check_ind_var_vec_feasibility(ind_var_vec) {
            self.nodes = None;
            return Err(e);
        }
        let weight_vec = Self::cal_weight_vec(ind_var_vec);
        self.nodes = Some(NodeSet {
            ind_var: ind_var_vec.clone(),
            weight_vec,
        });
        Ok(())
    }

    /// Sets the points where interpolated values are wanted and builds the
    /// barycentric matrix. Requires the node set.
    pub fn set_interp_point_vec(
        &mut self,
        interp_point_vec: &DVector<f64>,
    ) -> Result<(), TranscriptionError> {
        let Some(nodes) = self.nodes.as_ref() else {
            self.queries = None;
            return Err(TranscriptionError::PrerequisiteNotSet {
                context: "BaryLagrangeInterpolator::set_interp_point_vec",
                what: "indVarVec",
            });
        };
        if let Err(e) = Self::check_interp_point_vec_feasibility(&nodes.ind_var, interp_point_vec) {
            self.queries = None;
            return Err(e);
        }
        let barycentric_matrix = Self::cal_barycentric_matrix(nodes, interp_point_vec);
        self.queries = Some(QuerySet {
            interp_points: interp_point_vec.clone(),
            barycentric_matrix,
        });
        Ok(())
    }

    /// Interpolates with a fresh node set and a fresh query set.
    pub fn interpolate_with_nodes(
        &mut self,
        ind_var_vec: &DVector<f64>,
        func_value_vec: &DVector<f64>,
        interp_point_vec: &DVector<f64>,
    ) -> Result<DVector<f64>, TranscriptionError> {
        self.set_ind_var_vec(ind_var_vec)?;
        self.set_interp_point_vec(interp_point_vec)?;
        self.interpolate(func_value_vec)
    }

    /// Interpolates with the stored node set and a fresh query set.
    pub fn interpolate_with_queries(
        &mut self,
        func_value_vec: &DVector<f64>,
        interp_point_vec: &DVector<f64>,
    ) -> Result<DVector<f64>, TranscriptionError> {
        if self.nodes.is_none() {
            return Err(TranscriptionError::PrerequisiteNotSet {
                context: "BaryLagrangeInterpolator::interpolate_with_queries",
                what: "indVarVec",
            });
        }
        self.set_interp_point_vec(interp_point_vec)?;
        self.interpolate(func_value_vec)
    }

    /// Interpolates with the stored node and query sets: `L * f`.
    pub fn interpolate(&self, func_value_vec: &DVector<f64>) -> Result<DVector<f64>, TranscriptionError> {
        let context = "BaryLagrangeInterpolator::interpolate";
        let nodes = self.nodes.as_ref().ok_or(TranscriptionError::PrerequisiteNotSet {
            context,
            what: "indVarVec",
        })?;
        let queries = self.queries.as_ref().ok_or(TranscriptionError::PrerequisiteNotSet {
            context,
            what: "interpPointVec",
        })?;
        if func_value_vec.len() != nodes.ind_var.len() {
            return Err(TranscriptionError::length(
                context,
                nodes.ind_var.len(),
                func_value_vec.len(),
            ));
        }
        Ok(&queries.barycentric_matrix * func_value_vec)
    }

    /// number of nodes, 0 while undefined
    pub fn num_ind_var_vec(&self) -> usize {
        self.nodes.as_ref().map_or(0, |n| n.ind_var.len())
    }

    /// number of query points, 0 while undefined
    pub fn num_interp_point_vec(&self) -> usize {
        self.queries.as_ref().map_or(0, |q| q.interp_points.len())
    }

    pub fn is_ind_var_vec_defined(&self) -> bool {
        self.nodes.is_some()
    }

    pub fn is_interp_point_vec_defined(&self) -> bool {
        self.queries.is_some()
    }

    pub fn weight_vec(&self) -> Option<&DVector<f64>> {
        self.nodes.as_ref().map(|n| &n.weight_vec)
    }

    pub fn barycentric_matrix(&self) -> Option<&DMatrix<f64>> {
        self.queries.as_ref().map(|q| &q.barycentric_matrix)
    }

    fn check_ind_var_vec_feasibility(ind_var_vec: &DVector<f64>) -> Result<(), TranscriptionError> {
        let context = "BaryLagrangeInterpolator::set_ind_var_vec";
        if ind_var_vec.len() < 2 {
            return Err(TranscriptionError::infeasible(
                context,
                format!("indVarVec must have at least two elements, got {}", ind_var_vec.len()),
            ));
        }
        if !is_strictly_increasing(ind_var_vec) {
            return Err(TranscriptionError::infeasible(
                context,
                "indVarVec must be strictly increasing",
            ));
        }
        Ok(())
    }

    fn check_interp_point_vec_feasibility(
        ind_var: &DVector<f64>,
        interp_point_vec: &DVector<f64>,
    ) -> Result<(), TranscriptionError> {
        let context = "BaryLagrangeInterpolator::set_interp_point_vec";
        if interp_point_vec.is_empty() {
            return Err(TranscriptionError::infeasible(
                context,
                "interpPointVec must have at least one element",
            ));
        }
        if !is_strictly_increasing(interp_point_vec) {
            return Err(TranscriptionError::infeasible(
                context,
                "interpPointVec must be strictly increasing",
            ));
        }
        // only bit-identical points are rejected, nearby ones give large but finite terms
        for point in interp_point_vec.iter() {
            if ind_var.iter().any(|node| node == point) {
                return Err(TranscriptionError::infeasible(
                    context,
                    format!("interpolation point {} is identical to a node", point),
                ));
            }
        }
        Ok(())
    }

    fn cal_weight_vec(ind_var: &DVector<f64>) -> DVector<f64> {
        let n = ind_var.len();
        DVector::from_fn(n, |i, _| {
            let mut w = 1.0;
            for j in 0..n {
                if i != j {
                    w /= ind_var[i] - ind_var[j];
                }
            }
            w
        })
    }

    fn cal_barycentric_matrix(nodes: &NodeSet, interp_point_vec: &DVector<f64>) -> DMatrix<f64> {
        let mut barycentric_matrix = DMatrix::from_fn(interp_point_vec.len(), nodes.ind_var.len(), |q, i| {
            nodes.weight_vec[i] / (interp_point_vec[q] - nodes.ind_var[i])
        });
        for mut row in barycentric_matrix.row_iter_mut() {
            let normalization: f64 = row.sum();
            row /= normalization;
        }
        debug!(
            "barycentric matrix built: {} query points x {} nodes",
            interp_point_vec.len(),
            nodes.ind_var.len()
        );
        barycentric_matrix
    }
}
