use nalgebra::DVector;

use super::Evaluation;
use crate::configuration::Configuration;
use crate::jacobian::{Jacobian, JacobianKind};

/// Squared norm minus one of every active quaternion coordinate block.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuaternionNorms;

impl QuaternionNorms {
    pub fn new() -> QuaternionNorms {
        QuaternionNorms
    }

    /// Start of each active quaternion block in the coordinate vector.
    fn blocks(c: &Configuration) -> Vec<usize> {
        c.active_joints()
            .filter_map(|(_, j)| j.joint_type.quaternion_offset().map(|o| j.q_index + o))
            .collect()
    }

    pub fn dimension(&self, c: &Configuration) -> usize {
        Self::blocks(c).len()
    }

    pub fn evaluate(&self, c: &Configuration, kind: Option<JacobianKind>) -> Evaluation {
        let blocks = Self::blocks(c);
        let q = c.joint_state();
        let mut value = DVector::zeros(blocks.len());
        let mut jacobian = kind.map(|kind| Jacobian::zeros(kind, blocks.len(), q.len()));
        for (i, start) in blocks.into_iter().enumerate() {
            let quat = q.rows(start, 4);
            value[i] = quat.norm_squared() - 1.;
            if let Some(j) = jacobian.as_mut() {
                for (t, v) in quat.iter().enumerate() {
                    j.set(i, start + t, 2. * v);
                }
            }
        }
        Evaluation { value, jacobian }
    }

    pub fn signature(&self, c: &Configuration) -> Vec<usize> {
        Self::blocks(c)
            .into_iter()
            .flat_map(|start| start..start + 4)
            .collect()
    }
}
