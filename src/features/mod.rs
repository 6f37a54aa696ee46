mod difference;
mod joint_state;
mod limits;
mod quaternion;
mod switch;
mod zero_vel;

use nalgebra::DVector;

use crate::configuration::Configuration;
use crate::error::Result;
use crate::jacobian::{Jacobian, JacobianKind};

use difference::TupleLayout;
use joint_state::check_tuple;

pub use joint_state::{JointState, JointStateParams};
pub use limits::{Limits, LimitsParams};
pub use quaternion::QuaternionNorms;
pub use switch::{is_switched, matching_joints, non_switched_frames, switched_frames};
pub use zero_vel::{ZeroVelocity, ZeroVelocityParams};

/// Value of a feature and, if requested, its Jacobian w.r.t. the active
/// coordinates (of the whole tuple when evaluated on a tuple).
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub value: DVector<f64>,
    pub jacobian: Option<Jacobian>,
}

/// The feature family seen by an optimizer.
#[derive(Debug, Clone)]
pub enum Feature {
    JointState(JointState),
    ZeroVelocity(ZeroVelocity),
    Limits(Limits),
    QuaternionNorms(QuaternionNorms),
}

impl Feature {
    /// Number of trailing configurations beyond the newest one a tuple must provide.
    pub fn order(&self) -> usize {
        match self {
            Feature::JointState(f) => f.order(),
            Feature::ZeroVelocity(f) => f.order(),
            Feature::Limits(_) | Feature::QuaternionNorms(_) => 0,
        }
    }

    pub fn dimension(&self, c: &Configuration) -> Result<usize> {
        self.dimension_tuple(std::slice::from_ref(&c))
    }

    pub fn evaluate(&self, c: &Configuration, kind: Option<JacobianKind>) -> Result<Evaluation> {
        self.evaluate_tuple(std::slice::from_ref(&c), kind)
    }

    pub fn dimension_tuple(&self, tuple: &[&Configuration]) -> Result<usize> {
        match self {
            Feature::JointState(f) => f.dimension_tuple(tuple),
            Feature::ZeroVelocity(f) => f.dimension_tuple(tuple),
            Feature::Limits(f) => Ok(f.dimension(check_tuple(tuple, 0)?)),
            Feature::QuaternionNorms(f) => Ok(f.dimension(check_tuple(tuple, 0)?)),
        }
    }

    pub fn evaluate_tuple(
        &self,
        tuple: &[&Configuration],
        kind: Option<JacobianKind>,
    ) -> Result<Evaluation> {
        let mut e = match self {
            Feature::JointState(f) => return f.evaluate_tuple(tuple, kind),
            Feature::ZeroVelocity(f) => return f.evaluate_tuple(tuple, kind),
            Feature::Limits(f) => f.evaluate(check_tuple(tuple, 0)?, kind),
            Feature::QuaternionNorms(f) => f.evaluate(check_tuple(tuple, 0)?, kind),
        };
        // static features only depend on the newest configuration
        let layout = TupleLayout::new(tuple);
        e.jacobian = e
            .jacobian
            .map(|j| j.expand(layout.last_offset(), layout.ncols));
        Ok(e)
    }

    pub fn short_tag(&self, c: &Configuration) -> String {
        match self {
            Feature::JointState(f) => f.short_tag(c),
            Feature::ZeroVelocity(f) => f.short_tag(c),
            Feature::Limits(_) => "qLimits".into(),
            Feature::QuaternionNorms(_) => "qQuaternionNorms".into(),
        }
    }
}

impl From<JointState> for Feature {
    fn from(f: JointState) -> Self {
        Feature::JointState(f)
    }
}

impl From<ZeroVelocity> for Feature {
    fn from(f: ZeroVelocity) -> Self {
        Feature::ZeroVelocity(f)
    }
}

impl From<Limits> for Feature {
    fn from(f: Limits) -> Self {
        Feature::Limits(f)
    }
}

impl From<QuaternionNorms> for Feature {
    fn from(f: QuaternionNorms) -> Self {
        Feature::QuaternionNorms(f)
    }
}
