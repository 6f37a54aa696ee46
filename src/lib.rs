//! # kinfeat: joint-state features over kinematic configurations.
//! Values and Jacobians of joint coordinates, their finite differences over
//! configuration tuples, and a few auxiliary costs, robust to kinematic switches.

// #![deny(missing_docs)]
#![deny(unsafe_code)]

mod configuration;
mod error;
mod features;
mod jacobian;
mod selection;

pub use configuration::{Configuration, ConfigurationId, Frame, FrameId, Joint, JointType};
pub use error::{FeatureError, Result};
pub use features::{
    is_switched, matching_joints, non_switched_frames, switched_frames, Evaluation, Feature,
    JointState, JointStateParams, Limits, LimitsParams, QuaternionNorms, ZeroVelocity,
    ZeroVelocityParams,
};
pub use jacobian::{Jacobian, JacobianKind};
pub use selection::{PickMode, Targets};
