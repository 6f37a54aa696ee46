use super::Evaluation;
use crate::configuration::Configuration;
use crate::jacobian::JacobianKind;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LimitsParams {
    /// fraction of each limit interval that is penalized on either side
    pub margin: f64,
}

impl Default for LimitsParams {
    fn default() -> Self {
        Self { margin: 0.1 }
    }
}

/// Joint limit violation cost.
#[derive(Debug, Clone, Default)]
pub struct Limits {
    params: LimitsParams,
}

impl Limits {
    pub fn new(params: LimitsParams) -> Limits {
        Limits { params }
    }

    pub fn dimension(&self, _c: &Configuration) -> usize {
        1
    }

    pub fn evaluate(&self, c: &Configuration, kind: Option<JacobianKind>) -> Evaluation {
        // limits follow the joint ordering, which kinematic switches may change
        let limits = c.limits();
        let (value, jacobian) = c.limits_cost(&limits, self.params.margin, kind);
        Evaluation { value, jacobian }
    }
}
