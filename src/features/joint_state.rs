use std::cell::Cell;

use nalgebra::DVector;
use tracing::{debug, trace};

use super::difference::{difference, TupleLayout};
use super::switch::{aligned_rows, non_switched_frames, switched_frames, without};
use super::Evaluation;
use crate::configuration::{Configuration, ConfigurationId};
use crate::error::{FeatureError, Result};
use crate::jacobian::{Jacobian, JacobianKind};
use crate::selection::{resolve_pair, PickMode, Targets};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JointStateParams {
    /// subtract each joint's reference value `q0`
    pub relative_q0: bool,
    /// 0 = positions, 1 = velocities, 2 = accelerations, 3 = jerks
    pub order: usize,
}

/// Joint coordinates of selected joints, or finite differences of them over a
/// configuration tuple.
#[derive(Debug, Clone)]
pub struct JointState {
    targets: Targets,
    params: JointStateParams,
    // last configuration of a tuple -> output dimension
    dim_cache: Cell<Option<(ConfigurationId, usize)>>,
}

impl JointState {
    pub fn new(targets: Targets, params: JointStateParams) -> JointState {
        JointState {
            targets,
            params,
            dim_cache: Cell::new(None),
        }
    }

    /// The whole active coordinate vector.
    pub fn all(params: JointStateParams) -> JointState {
        Self::new(Targets::All, params)
    }

    pub fn pick(
        mode: PickMode,
        picks: &[&str],
        c: &Configuration,
        params: JointStateParams,
    ) -> Result<JointState> {
        Ok(Self::new(Targets::pick(mode, picks, c)?, params))
    }

    pub fn targets(&self) -> &Targets {
        &self.targets
    }

    pub fn order(&self) -> usize {
        self.params.order
    }

    pub fn invalidate_cache(&self) {
        self.dim_cache.set(None);
    }

    /// Output length on a single configuration, without evaluating it.
    pub fn dimension(&self, c: &Configuration) -> Result<usize> {
        match &self.targets {
            Targets::All => Ok(c.joint_state_dim()),
            targets => Ok(targets.resolve(c)?.iter().map(|r| r.joint.dim()).sum()),
        }
    }

    /// Joint coordinates of the targets in `c`, ignoring the derivative order.
    pub fn evaluate_configuration(
        &self,
        c: &Configuration,
        kind: Option<JacobianKind>,
    ) -> Result<Evaluation> {
        evaluate_targets(&self.targets, self.params.relative_q0, c, kind)
    }

    pub fn dimension_tuple(&self, tuple: &[&Configuration]) -> Result<usize> {
        let last = check_tuple(tuple, self.params.order)?;
        if self.params.order == 0 {
            return self.dimension(last);
        }
        if let Some((id, n)) = self.dim_cache.get() {
            if id == last.id() {
                trace!(n, "dimension cache hit");
                return Ok(n);
            }
        }
        let n = self.evaluate_tuple(tuple, None)?.value.len();
        trace!(n, "dimension cache miss");
        self.dim_cache.set(Some((last.id(), n)));
        Ok(n)
    }

    pub fn evaluate_tuple(
        &self,
        tuple: &[&Configuration],
        kind: Option<JacobianKind>,
    ) -> Result<Evaluation> {
        let last = check_tuple(tuple, self.params.order)?;
        let k = self.params.order;
        if k == 0 {
            let mut e = self.evaluate_configuration(last, kind)?;
            let layout = TupleLayout::new(tuple);
            e.jacobian = e
                .jacobian
                .map(|j| j.expand(layout.last_offset(), layout.ncols));
            return Ok(e);
        }

        let stencil = &tuple[tuple.len() - 1 - k..];
        let targets = match &self.targets {
            Targets::All => Targets::All,
            Targets::Frames(ids) => {
                let switched = switched_frames(tuple[tuple.len() - 2], last);
                if !switched.is_empty() {
                    debug!(?switched, "dropping switched frames from selection");
                }
                Targets::Frames(without(ids, &switched))
            }
            Targets::Pairs(pairs) => {
                let consistent = non_switched_frames(stencil);
                let kept: Vec<_> = pairs
                    .iter()
                    .copied()
                    .filter(|(a, b)| pair_is_stable(stencil, *a, *b, &consistent))
                    .collect();
                if kept.len() != pairs.len() {
                    debug!(
                        dropped = pairs.len() - kept.len(),
                        "dropping switched joints from selection"
                    );
                }
                Targets::Pairs(kept)
            }
        };

        let mut values = Vec::with_capacity(k + 1);
        let mut jacobians = kind.map(|_| Vec::with_capacity(k + 1));
        for c in stencil {
            let e = evaluate_targets(&targets, self.params.relative_q0, c, kind)?;
            values.push(e.value);
            if let (Some(jacobians), Some(j)) = (jacobians.as_mut(), e.jacobian) {
                jacobians.push(j);
            }
        }

        let n = values[0].len();
        if values.iter().any(|v| v.len() != n) {
            if !matches!(targets, Targets::All) {
                let other = values.iter().map(|v| v.len()).find(|l| *l != n).unwrap_or(n);
                return Err(FeatureError::InconsistentTuple { first: n, other });
            }
            let rows = aligned_rows(stencil);
            debug!(kept = rows[0].len(), "reconciling switched configurations");
            values = values
                .iter()
                .zip(&rows)
                .map(|(v, r)| v.select_rows(r))
                .collect();
            jacobians = jacobians.map(|js| {
                js.iter()
                    .zip(&rows)
                    .map(|(j, r)| j.select_rows(r))
                    .collect()
            });
        } else {
            trace!(n, "tuple already aligned");
        }

        let (value, jacobian) = difference(k, tuple, &values, jacobians.as_deref())?;
        Ok(Evaluation { value, jacobian })
    }

    /// Active coordinate indices touched by this feature in `c`.
    pub fn signature(&self, c: &Configuration) -> Result<Vec<usize>> {
        if let Targets::All = self.targets {
            return Ok((0..c.joint_state_dim()).collect());
        }
        Ok(self
            .targets
            .resolve(c)?
            .iter()
            .flat_map(|r| r.joint.q_index..r.joint.q_index + r.joint.q_dim())
            .collect())
    }

    pub fn short_tag(&self, c: &Configuration) -> String {
        let ids = self.targets.frame_ids();
        if let Targets::All = self.targets {
            return "qItself-ALL".into();
        }
        if ids.len() > 3 {
            return format!("qItself#{}", ids.len());
        }
        let mut s = String::from("qItself");
        for id in ids {
            s.push('-');
            match c.frame(id) {
                Some(f) => s.push_str(&f.name),
                None => s.push_str(&id.to_string()),
            }
        }
        s
    }
}

/// The last configuration, if the tuple is long enough for `order`.
pub(crate) fn check_tuple<'a>(tuple: &[&'a Configuration], order: usize) -> Result<&'a Configuration> {
    match tuple.last() {
        Some(last) if tuple.len() > order => Ok(*last),
        _ => Err(FeatureError::TupleTooShort {
            needed: order + 1,
            got: tuple.len(),
        }),
    }
}

/// A pair keeps its linkage and orientation in every configuration and its
/// joint frame is not switched.
fn pair_is_stable(stencil: &[&Configuration], a: usize, b: usize, consistent: &[usize]) -> bool {
    let mut found = None;
    for c in stencil {
        let Ok(r) = resolve_pair(c, a, b) else {
            return false;
        };
        let key = (r.frame.id, r.flip);
        if found.is_some_and(|f| f != key) {
            return false;
        }
        found = Some(key);
    }
    found.is_some_and(|(id, _)| consistent.contains(&id))
}

fn evaluate_targets(
    targets: &Targets,
    relative_q0: bool,
    c: &Configuration,
    kind: Option<JacobianKind>,
) -> Result<Evaluation> {
    if let Targets::All = targets {
        let mut value = c.joint_state().clone();
        if relative_q0 {
            for (_, j) in c.active_joints() {
                if !j.q0.is_empty() && j.q_dim() == 1 {
                    value[j.q_index] -= j.q0[0];
                }
            }
        }
        let jacobian = kind.map(|kind| Jacobian::identity(kind, c.joint_state_dim()));
        return Ok(Evaluation { value, jacobian });
    }

    let resolved = targets.resolve(c)?;
    let n: usize = resolved.iter().map(|r| r.joint.dim()).sum();
    let mut value = DVector::zeros(n);
    let mut jacobian = kind.map(|kind| Jacobian::zeros(kind, n, c.joint_state_dim()));
    let mut m = 0;
    for r in resolved {
        let j = r.joint;
        let sign = if r.flip { -1. } else { 1. };
        let src = if j.active {
            c.joint_state()
        } else {
            c.inactive_state()
        };
        for k in 0..j.dim() {
            value[m] = sign * src[j.q_index + k];
            // a non-empty q0 has one entry per coordinate, checked on insertion
            if let (true, Some(q0)) = (relative_q0, j.q0.get(k)) {
                value[m] -= q0;
            }
            if let (Some(jac), true) = (jacobian.as_mut(), j.active) {
                jac.set(m, j.q_index + k, sign);
            }
            m += 1;
        }
    }
    Ok(Evaluation { value, jacobian })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::configuration::fixtures::{arm, scalar};
    use crate::configuration::{Joint, JointType};
    use approx::assert_relative_eq;

    fn params(relative_q0: bool, order: usize) -> JointStateParams {
        JointStateParams { relative_q0, order }
    }

    #[test]
    fn test_all() {
        let c = arm();
        let f = JointState::all(params(false, 0));
        let e = f.evaluate_configuration(&c, Some(JacobianKind::Dense)).unwrap();
        assert_eq!(&e.value, c.joint_state());
        assert_relative_eq!(e.jacobian.unwrap().to_dense(), nalgebra::DMatrix::identity(12, 12));
        assert_eq!(f.dimension(&c).unwrap(), 12);
        assert_eq!(f.short_tag(&c), "qItself-ALL");
    }

    #[test]
    fn test_all_relative() {
        let c = arm();
        let abs = JointState::all(params(false, 0)).evaluate_configuration(&c, None).unwrap();
        let rel = JointState::all(params(true, 0)).evaluate_configuration(&c, None).unwrap();
        // only the arm joint has a reference value
        assert_relative_eq!(rel.value[3], abs.value[3] - 0.5);
        assert_relative_eq!(rel.value.rows(4, 8).into_owned(), abs.value.rows(4, 8).into_owned());
    }

    #[test]
    fn test_value_independent_of_jacobian() {
        let c = arm();
        for targets in [
            Targets::All,
            Targets::Frames(vec![4, 2]),
            Targets::Pairs(vec![(1, 0), (2, 3)]),
        ] {
            let f = JointState::new(targets, params(true, 0));
            let plain = f.evaluate_configuration(&c, None).unwrap();
            assert!(plain.jacobian.is_none());
            for kind in [JacobianKind::Dense, JacobianKind::Sparse] {
                let e = f.evaluate_configuration(&c, Some(kind)).unwrap();
                assert_eq!(e.value, plain.value);
                assert_eq!(f.dimension(&c).unwrap(), e.value.len());
                assert_eq!(e.jacobian.unwrap().kind(), kind);
            }
        }
    }

    #[test]
    fn test_frames() {
        let c = arm();
        let f = JointState::new(Targets::Frames(vec![3, 1]), params(false, 0));
        let e = f.evaluate_configuration(&c, Some(JacobianKind::Dense)).unwrap();
        assert_eq!(e.value.as_slice(), &[-0.4, 0.1, 0.2, 0.3]);
        let j = e.jacobian.unwrap().to_dense();
        assert_eq!(j.shape(), (4, 12));
        assert_relative_eq!(j[(0, 4)], 1.);
        assert_relative_eq!(j[(1, 0)], 1.);
        assert_relative_eq!(j[(3, 2)], 1.);
        assert_relative_eq!(j.sum(), 4.);
        assert_eq!(f.signature(&c).unwrap(), vec![4, 0, 1, 2]);
        assert_eq!(f.short_tag(&c), "qItself-hand-base");
    }

    #[test]
    fn test_relative_single_joint() {
        let c = arm();
        let abs = JointState::new(Targets::Frames(vec![2]), params(false, 0));
        let rel = JointState::new(Targets::Frames(vec![2]), params(true, 0));
        let a = abs.evaluate_configuration(&c, Some(JacobianKind::Dense)).unwrap();
        let r = rel.evaluate_configuration(&c, Some(JacobianKind::Dense)).unwrap();
        assert_relative_eq!(r.value[0], a.value[0] - 0.5);
        assert_relative_eq!(r.jacobian.unwrap().to_dense(), a.jacobian.unwrap().to_dense());
    }

    #[test]
    fn test_pair_sign_flip() {
        let c = arm();
        for (child, parent) in [(1, 0), (2, 1), (4, 0)] {
            for kind in [JacobianKind::Dense, JacobianKind::Sparse] {
                let up = JointState::new(Targets::Pairs(vec![(child, parent)]), params(false, 0))
                    .evaluate_configuration(&c, Some(kind))
                    .unwrap();
                let down = JointState::new(Targets::Pairs(vec![(parent, child)]), params(false, 0))
                    .evaluate_configuration(&c, Some(kind))
                    .unwrap();
                assert_relative_eq!(up.value, -down.value);
                assert_relative_eq!(
                    up.jacobian.unwrap().to_dense(),
                    -down.jacobian.unwrap().to_dense()
                );
            }
        }
    }

    #[test]
    fn test_inactive_joint() {
        let mut c = arm();
        c.set_active(1, false).unwrap();
        let f = JointState::new(Targets::Frames(vec![1, 2]), params(false, 0));
        let e = f.evaluate_configuration(&c, Some(JacobianKind::Sparse)).unwrap();
        assert_eq!(e.value.as_slice(), &[0.1, 0.2, 0.3, 1.0]);
        let j = e.jacobian.unwrap().to_dense();
        assert_eq!(j.shape(), (4, 9));
        assert_relative_eq!(j.rows(0, 3).sum(), 0.);
        assert_relative_eq!(j[(3, 0)], 1.);
        assert_eq!(f.signature(&c).unwrap(), vec![0]);
    }

    #[test]
    fn test_resolution_errors() {
        let c = arm();
        let f = JointState::new(Targets::Frames(vec![5]), params(false, 0));
        assert!(matches!(
            f.evaluate_configuration(&c, None),
            Err(FeatureError::NotAJoint { id: 5, .. })
        ));
        assert!(f.dimension(&c).is_err());
        let f = JointState::new(Targets::Pairs(vec![(3, 0)]), params(false, 0));
        assert_eq!(
            f.evaluate_configuration(&c, None).err(),
            Some(FeatureError::NotLinked(3, 0))
        );
        assert_eq!(
            JointState::pick(PickMode::ByJointNames, &["table"], &c, params(false, 0)).err(),
            Some(FeatureError::PickNotAJoint("table".into()))
        );
    }

    #[test]
    fn test_order_zero_tuple_expands() {
        let (c0, c1) = (arm(), arm());
        let f = JointState::new(Targets::Frames(vec![2]), params(false, 0));
        let e = f.evaluate_tuple(&[&c0, &c1], Some(JacobianKind::Dense)).unwrap();
        let j = e.jacobian.unwrap().to_dense();
        assert_eq!(j.shape(), (1, 24));
        assert_relative_eq!(j[(0, 15)], 1.);
        assert_eq!(f.dimension_tuple(&[&c0, &c1]).unwrap(), 1);
    }

    #[test]
    fn test_finite_differences() {
        let c = [scalar(0., 1.), scalar(2., 1.), scalar(5., 1.)];
        let tuple: Vec<_> = c.iter().collect();

        let vel = JointState::all(params(false, 1));
        let e = vel.evaluate_tuple(&tuple, Some(JacobianKind::Dense)).unwrap();
        assert_relative_eq!(e.value[0], 3.);
        let j = e.jacobian.unwrap().to_dense();
        assert_eq!(j.shape(), (1, 3));
        assert_relative_eq!(j[(0, 0)], 0.);
        assert_relative_eq!(j[(0, 1)], -1.);
        assert_relative_eq!(j[(0, 2)], 1.);

        let acc = JointState::new(Targets::Frames(vec![1]), params(false, 2));
        for kind in [JacobianKind::Dense, JacobianKind::Sparse] {
            let e = acc.evaluate_tuple(&tuple, Some(kind)).unwrap();
            assert_relative_eq!(e.value[0], 1.);
            let j = e.jacobian.unwrap().to_dense();
            assert_relative_eq!(j[(0, 0)], 1.);
            assert_relative_eq!(j[(0, 1)], -2.);
            assert_relative_eq!(j[(0, 2)], 1.);
        }
    }

    #[test]
    fn test_constant_tuple_is_zero() {
        let c = arm();
        let tuple = [&c, &c, &c, &c];
        for tau in [0.1, 1., 3.] {
            let mut last = c.clone();
            last.set_tau(tau);
            let tuple = [tuple[0], tuple[1], tuple[2], &last];
            for order in 1..=3 {
                let f = JointState::all(params(false, order));
                let e = f.evaluate_tuple(&tuple, Some(JacobianKind::Dense)).unwrap();
                assert_eq!(e.value.len(), 12);
                assert!(e.value.iter().all(|v| *v == 0.));
            }
        }
    }

    #[test]
    fn test_tuple_errors() {
        let c = arm();
        let f = JointState::all(params(false, 2));
        assert_eq!(
            f.evaluate_tuple(&[&c, &c], None).err(),
            Some(FeatureError::TupleTooShort { needed: 3, got: 2 })
        );
        assert!(f.evaluate_tuple(&[], None).is_err());

        let jerk = JointState::all(params(false, 3));
        assert_eq!(
            jerk.evaluate_tuple(&[&c, &c, &c, &c], Some(JacobianKind::Sparse)).err(),
            Some(FeatureError::UnsupportedSparse(3))
        );
        assert!(jerk.evaluate_tuple(&[&c, &c, &c, &c], Some(JacobianKind::Dense)).is_ok());

        let snap = JointState::all(params(false, 4));
        assert_eq!(
            snap.evaluate_tuple(&[&c, &c, &c, &c, &c], None).err(),
            Some(FeatureError::UnsupportedOrder(4))
        );
    }

    #[test]
    fn test_switch_reconciliation() {
        // the box is released from the hand onto the world between c1 and c2
        let mut c0 = arm();
        c0.reparent(4, Some(3), None).unwrap();
        let c1 = c0.clone();
        let mut c2 = arm();
        c2.set_joint_state(&[0.1, 0.2, 0.3, 1.5, -0.4, 1., 2., 3., 1., 0., 0., 0.])
            .unwrap();
        let tuple = [&c0, &c1, &c2];

        let f = JointState::all(params(false, 1));
        let e = f.evaluate_tuple(&tuple, Some(JacobianKind::Dense)).unwrap();
        assert_eq!(e.value.len(), 5);
        assert_relative_eq!(e.value[3], 0.5);
        let j = e.jacobian.unwrap().to_dense();
        assert_eq!(j.shape(), (5, 5 + 5 + 12));
        // arm joint: -1 in c1's block, +1 in c2's block
        assert_relative_eq!(j[(3, 5 + 3)], -1.);
        assert_relative_eq!(j[(3, 10 + 3)], 1.);
        assert_relative_eq!(j.columns(0, 5).sum(), 0.);
        assert_eq!(f.dimension_tuple(&tuple).unwrap(), 5);
    }

    #[test]
    fn test_switch_removed_from_frames() {
        // the box gets a new free joint below the hand in the last configuration
        let c0 = arm();
        let mut c1 = arm();
        c1.reparent(4, Some(3), Some(Joint::new(JointType::Free))).unwrap();
        let f = JointState::new(Targets::Frames(vec![2, 4]), params(false, 1));
        let e = f.evaluate_tuple(&[&c0, &c1], Some(JacobianKind::Sparse)).unwrap();
        assert_eq!(e.value.len(), 1);
        // the selection itself is untouched
        assert_eq!(f.targets(), &Targets::Frames(vec![2, 4]));
    }

    #[test]
    fn test_switch_removed_from_pairs() {
        let c0 = arm();
        let mut c1 = arm();
        c1.reparent(4, Some(3), Some(Joint::new(JointType::Free))).unwrap();
        c1.set_joint_state(&[0.2, 0.2, 0.3, 1.5, -0.1, 1., 2., 3., 1., 0., 0., 0.])
            .unwrap();
        let tuple = [&c0, &c1];

        let f = JointState::pick(PickMode::AllActiveJoints, &[], &c0, params(false, 1)).unwrap();
        let e = f.evaluate_tuple(&tuple, None).unwrap();
        assert_eq!(e.value.len(), 5);
        for (v, expected) in e.value.iter().zip([0.1, 0., 0., 0.5, 0.3]) {
            assert_relative_eq!(*v, expected, epsilon = 1e-12);
        }

        // (parent, child) pairs read the joints negated
        let f = JointState::new(Targets::Pairs(vec![(0, 1), (2, 3), (0, 4)]), params(false, 1));
        for kind in [JacobianKind::Dense, JacobianKind::Sparse] {
            let e = f.evaluate_tuple(&tuple, Some(kind)).unwrap();
            assert_eq!(e.value.len(), 4);
            assert_relative_eq!(e.value[0], -0.1, epsilon = 1e-12);
            assert_relative_eq!(e.value[3], -0.3, epsilon = 1e-12);
            let j = e.jacobian.unwrap().to_dense();
            assert_eq!(j.shape(), (4, 24));
            assert_relative_eq!(j[(0, 0)], 1.);
            assert_relative_eq!(j[(0, 12)], -1.);
            assert_relative_eq!(j[(3, 4)], 1.);
            assert_relative_eq!(j[(3, 12 + 4)], -1.);
            // nothing from the dropped box joint
            assert_relative_eq!(j.columns(12 + 5, 7).abs().sum(), 0.);
        }
    }

    #[test]
    fn test_empty_group_reads_whole_vector() {
        let c = arm();
        let f = JointState::pick(PickMode::ByJointGroups, &["nothing"], &c, params(false, 0))
            .unwrap();
        let e = f.evaluate_configuration(&c, Some(JacobianKind::Dense)).unwrap();
        assert_eq!(&e.value, c.joint_state());
        assert_eq!(f.dimension(&c).unwrap(), 12);
        assert_eq!(f.short_tag(&c), "qItself-ALL");
    }

    #[test]
    fn test_relative_multi_dof() {
        let mut c = arm();
        let q0 = vec![1., 2., 2., 1., 0., 0., 0.];
        c.set_joint(4, Joint::new(JointType::Free).with_q0(q0)).unwrap();
        let f = JointState::new(Targets::Frames(vec![4]), params(true, 0));
        let e = f.evaluate_configuration(&c, Some(JacobianKind::Dense)).unwrap();
        assert_eq!(e.value.len(), 7);
        assert_relative_eq!(e.value[2], 1.);
        assert_relative_eq!(e.value.abs().sum(), 1.);
        assert_relative_eq!(e.jacobian.unwrap().get(2, 7), 1.);
    }

    #[test]
    fn test_dimension_cache() {
        let c0 = arm();
        let mut c1 = arm();
        let f = JointState::all(params(false, 1));
        assert_eq!(f.dimension_tuple(&[&c0, &c1]).unwrap(), 12);

        // a structural edit renews the identity and the cache recomputes
        c1.reparent(4, Some(3), None).unwrap();
        assert_eq!(f.dimension_tuple(&[&c0, &c1]).unwrap(), 5);
        f.invalidate_cache();
        assert_eq!(f.dimension_tuple(&[&c0, &c1]).unwrap(), 5);
    }

    #[test]
    fn test_short_tag_many() {
        let c = arm();
        let f = JointState::pick(PickMode::AllActiveJoints, &[], &c, params(false, 0)).unwrap();
        assert_eq!(f.short_tag(&c), "qItself#8");
        let f = JointState::new(Targets::Pairs(vec![(2, 1)]), params(false, 0));
        assert_eq!(f.short_tag(&c), "qItself-arm-base");
    }
}
