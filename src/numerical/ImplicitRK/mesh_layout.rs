//! Global point numbering of a collocated phase.
//!
//! A phase of `num_steps` steps with `num_stages` interior stages has
//! `num_steps * (num_stages + 1) + 1` points. Points and mesh indices are numbered from 1,
//! stages from 0. Stage 0 of mesh `m` is the mesh point itself; the last point of the
//! phase is `(num_steps + 1, 0)`.
//!
//! ```text
//! 3 steps, 2 stages:
//! point  1  2  3  4  5  6  7  8  9  10
//! mesh   1  1  1  2  2  2  3  3  3  4
//! stage  0  1  2  0  1  2  0  1  2  0
//! ```
use crate::numerical::transcription_errors::TranscriptionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshLayout {
    pub num_steps: usize,
    pub num_stages: usize,
}

impl MeshLayout {
    pub fn new(num_steps: usize, num_stages: usize) -> Self {
        MeshLayout {
            num_steps,
            num_stages,
        }
    }

    pub fn num_points_per_mesh(&self) -> usize {
        self.num_stages + 1
    }

    pub fn num_mesh_points(&self) -> usize {
        self.num_steps + 1
    }

    pub fn total_num_points(&self) -> usize {
        self.num_steps * self.num_points_per_mesh() + 1
    }

    fn check_point(&self, point_idx: usize, context: &'static str) -> Result<(), TranscriptionError> {
        let total = self.total_num_points();
        if point_idx == 0 || point_idx > total {
            return Err(TranscriptionError::index(context, point_idx, 1, total + 1));
        }
        Ok(())
    }

    pub fn mesh_index(&self, point_idx: usize) -> Result<usize, TranscriptionError> {
        self.check_point(point_idx, "MeshLayout::mesh_index")?;
        Ok((point_idx - 1) / self.num_points_per_mesh() + 1)
    }

    pub fn stage_index(&self, point_idx: usize) -> Result<usize, TranscriptionError> {
        self.check_point(point_idx, "MeshLayout::stage_index")?;
        Ok((point_idx - 1) % self.num_points_per_mesh())
    }

    pub fn point_index(&self, mesh_idx: usize, stage_idx: usize) -> Result<usize, TranscriptionError> {
        let context = "MeshLayout::point_index";
        let last_mesh = self.num_mesh_points();
        if mesh_idx == 0 || mesh_idx > last_mesh {
            return Err(TranscriptionError::index(context, mesh_idx, 1, last_mesh + 1));
        }
        // the final mesh point has no stages after it
        let stage_upper = if mesh_idx == last_mesh {
            1
        } else {
            self.num_points_per_mesh()
        };
        if stage_idx >= stage_upper {
            return Err(TranscriptionError::index(context, stage_idx, 0, stage_upper));
        }
        Ok((mesh_idx - 1) * self.num_points_per_mesh() + stage_idx + 1)
    }

    /// Zero-based row of a (validated) point in point-major arrays.
    pub fn point_offset(&self, point_idx: usize) -> Result<usize, TranscriptionError> {
        self.check_point(point_idx, "MeshLayout::point_offset")?;
        Ok(point_idx - 1)
    }

    /// Zero-based rows of the points of one step: the step's mesh point, its stages,
    /// and the next mesh point.
    pub fn step_point_offsets(&self, step_idx: usize) -> Result<std::ops::Range<usize>, TranscriptionError> {
        if step_idx == 0 || step_idx > self.num_steps {
            return Err(TranscriptionError::index(
                "MeshLayout::step_point_offsets",
                step_idx,
                1,
                self.num_steps + 1,
            ));
        }
        let first = (step_idx - 1) * self.num_points_per_mesh();
        Ok(first..first + self.num_points_per_mesh() + 1)
    }
}
