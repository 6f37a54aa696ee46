use nalgebra::DVector;
use tracing::debug;

use super::difference::{stencil, TupleLayout};
use super::joint_state::{check_tuple, JointState, JointStateParams};
use super::switch::is_switched;
use super::Evaluation;
use crate::configuration::{Configuration, Frame, FrameId};
use crate::error::{FeatureError, Result};
use crate::jacobian::{Jacobian, JacobianKind};
use crate::selection::Targets;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ZeroVelocityParams {
    pub order: usize,
    /// target the single child of the frame instead of the frame itself
    pub use_child_frame: bool,
}

impl Default for ZeroVelocityParams {
    fn default() -> Self {
        Self {
            order: 1,
            use_child_frame: false,
        }
    }
}

/// Velocity (or higher derivative) of one frame's joint, zero whenever the
/// joint is missing or switched in the most recent transition.
#[derive(Debug, Clone)]
pub struct ZeroVelocity {
    frame: FrameId,
    params: ZeroVelocityParams,
}

impl ZeroVelocity {
    /// Fails unless `params.order` is a velocity, acceleration or jerk.
    pub fn new(frame: FrameId, params: ZeroVelocityParams) -> Result<ZeroVelocity> {
        stencil(params.order)?;
        Ok(ZeroVelocity { frame, params })
    }

    pub fn order(&self) -> usize {
        self.params.order
    }

    fn target<'a>(&self, c: &'a Configuration) -> Result<&'a Frame> {
        let f = c
            .frame(self.frame)
            .ok_or(FeatureError::FrameNotFound(self.frame))?;
        if !self.params.use_child_frame {
            return Ok(f);
        }
        match c.children(f.id).as_slice() {
            [child] => c.frame(*child).ok_or(FeatureError::FrameNotFound(*child)),
            children => Err(FeatureError::NotSingleChild {
                id: f.id,
                name: f.name.clone(),
                count: children.len(),
            }),
        }
    }

    pub fn dimension(&self, c: &Configuration) -> Result<usize> {
        Ok(self.target(c)?.joint.as_ref().map_or(0, |j| j.dim()))
    }

    pub fn dimension_tuple(&self, tuple: &[&Configuration]) -> Result<usize> {
        self.dimension(check_tuple(tuple, self.params.order)?)
    }

    pub fn evaluate_tuple(
        &self,
        tuple: &[&Configuration],
        kind: Option<JacobianKind>,
    ) -> Result<Evaluation> {
        let last = check_tuple(tuple, self.params.order)?;
        let f = self.target(last)?;
        let Some(joint) = f.joint.as_ref() else {
            return Ok(zeros(0, tuple, kind));
        };
        let prev = tuple[tuple.len() - 2];
        if is_switched(prev, last, f.id) {
            debug!(frame = %f.name, "switched joint, nothing to penalize");
            return Ok(zeros(joint.dim(), tuple, kind));
        }

        let q = JointState::new(
            Targets::Frames(vec![f.id]),
            JointStateParams {
                relative_q0: false,
                order: self.params.order,
            },
        );
        let mut e = q.evaluate_tuple(tuple, kind)?;
        if let Some(w) = joint.joint_type.zero_velocity_weights() {
            e.value.component_mul_assign(&DVector::from_row_slice(w));
            if let Some(j) = e.jacobian.as_mut() {
                j.scale_rows(w);
            }
        }
        Ok(e)
    }

    pub fn short_tag(&self, c: &Configuration) -> String {
        match c.frame(self.frame) {
            Some(f) => format!("qZeroVel-{}", f.name),
            None => format!("qZeroVel-{}", self.frame),
        }
    }
}

fn zeros(n: usize, tuple: &[&Configuration], kind: Option<JacobianKind>) -> Evaluation {
    let ncols = TupleLayout::new(tuple).ncols;
    Evaluation {
        value: DVector::zeros(n),
        jacobian: kind.map(|kind| Jacobian::zeros(kind, n, ncols)),
    }
}
