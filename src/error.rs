use thiserror::Error;

use crate::configuration::FrameId;

/// Errors raised while resolving or evaluating a feature.
///
/// All of them indicate a misconfigured feature or an inconsistent
/// configuration tuple; none is meant to be retried.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeatureError {
    #[error("pick '{0}' not found")]
    PickNotFound(String),

    #[error("pick '{0}' is not a joint")]
    PickNotAJoint(String),

    #[error("frame {0} does not exist")]
    FrameNotFound(FrameId),

    #[error("selected frame {id} ('{name}') is not a joint")]
    NotAJoint { id: FrameId, name: String },

    #[error("frames {0} and {1} are not linked as parent and child")]
    NotLinked(FrameId, FrameId),

    #[error("frame {frame} cannot hang below its own descendant {parent}")]
    Cycle { frame: FrameId, parent: FrameId },

    #[error("need at least {needed} configurations to evaluate, got {got}")]
    TupleTooShort { needed: usize, got: usize },

    #[error("frame {id} ('{name}') has {count} children, expected exactly one")]
    NotSingleChild {
        id: FrameId,
        name: String,
        count: usize,
    },

    #[error("derivative order {0} is not implemented")]
    UnsupportedOrder(usize),

    #[error("derivative order {0} is not implemented for sparse jacobians")]
    UnsupportedSparse(usize),

    #[error("invalid time step: {0} (must be positive and finite)")]
    InvalidTimestep(f64),

    #[error("joint state dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("configurations disagree on the selected joints ({first} vs {other} coordinates)")]
    InconsistentTuple { first: usize, other: usize },

    #[error("urdf: {0}")]
    Urdf(String),
}

impl From<urdf_rs::UrdfError> for FeatureError {
    fn from(e: urdf_rs::UrdfError) -> Self {
        Self::Urdf(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FeatureError>;
