mod urdf;

use std::sync::atomic::{AtomicU64, Ordering};

use nalgebra::DVector;
use petgraph::graphmap::DiGraphMap;

use crate::error::{FeatureError, Result};
use crate::jacobian::{Jacobian, JacobianKind};

pub type FrameId = usize;

static NEXT_CONFIGURATION_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of a configuration snapshot. Renewed on clone and on every
/// structural edit, never on value edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigurationId(u64);

impl ConfigurationId {
    fn next() -> Self {
        Self(NEXT_CONFIGURATION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JointType {
    HingeX,
    HingeY,
    HingeZ,
    TransX,
    TransY,
    TransZ,
    TransXY,
    TransXYPhi,
    PhiTransXY,
    Trans3,
    Universal,
    QuatBall,
    /// translation along x followed by a quaternion ball
    XBall,
    /// translation xyz followed by a quaternion
    Free,
    /// time step of the configuration
    Tau,
}

impl JointType {
    pub const fn dim(self) -> usize {
        match self {
            Self::HingeX | Self::HingeY | Self::HingeZ => 1,
            Self::TransX | Self::TransY | Self::TransZ | Self::Tau => 1,
            Self::TransXY | Self::Universal => 2,
            Self::TransXYPhi | Self::PhiTransXY | Self::Trans3 => 3,
            Self::QuatBall => 4,
            Self::XBall => 5,
            Self::Free => 7,
        }
    }

    /// Offset of the unit-quaternion sub-block within the joint's coordinates.
    pub const fn quaternion_offset(self) -> Option<usize> {
        match self {
            Self::QuatBall => Some(0),
            Self::XBall => Some(1),
            Self::Free => Some(3),
            _ => None,
        }
    }

    /// Per-component weights applied by zero-velocity features.
    pub fn zero_velocity_weights(self) -> Option<&'static [f64]> {
        match self {
            Self::TransXYPhi => Some(&[10., 10., 1.]),
            Self::Free => Some(&[10., 10., 10., 1., 1., 1., 1.]),
            _ => None,
        }
    }

    fn neutral_values(self) -> Vec<f64> {
        let mut q = vec![0.; self.dim()];
        if let Some(offset) = self.quaternion_offset() {
            q[offset] = 1.;
        }
        q
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Joint {
    pub joint_type: JointType,
    pub active: bool,
    /// offset into the active or the inactive coordinate vector
    pub q_index: usize,
    /// reference value, empty if none
    pub q0: Vec<f64>,
    /// `[lo, hi]` per coordinate, empty if unlimited
    pub limits: Vec<[f64; 2]>,
}

impl Joint {
    pub fn new(joint_type: JointType) -> Joint {
        Joint {
            joint_type,
            active: true,
            q_index: 0,
            q0: vec![],
            limits: vec![],
        }
    }

    pub fn inactive(mut self) -> Joint {
        self.active = false;
        self
    }

    pub fn with_q0(mut self, q0: Vec<f64>) -> Joint {
        self.q0 = q0;
        self
    }

    pub fn with_limits(mut self, limits: Vec<[f64; 2]>) -> Joint {
        self.limits = limits;
        self
    }

    pub fn dim(&self) -> usize {
        self.joint_type.dim()
    }

    /// Number of coordinates this joint occupies in the active coordinate vector.
    pub fn q_dim(&self) -> usize {
        if self.active {
            self.dim()
        } else {
            0
        }
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub id: FrameId,
    pub name: String,
    pub tags: Vec<String>,
    pub joint: Option<Joint>,
}

impl Frame {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// A kinematic snapshot: a forest of frames plus its coordinate vectors.
#[derive(Debug)]
pub struct Configuration {
    id: ConfigurationId,
    frames: Vec<Frame>,
    // parent -> child edges
    graph: DiGraphMap<FrameId, ()>,
    q: DVector<f64>,
    q_inactive: DVector<f64>,
    tau: f64,
}

impl Clone for Configuration {
    fn clone(&self) -> Self {
        Configuration {
            id: ConfigurationId::next(),
            frames: self.frames.clone(),
            graph: self.graph.clone(),
            q: self.q.clone(),
            q_inactive: self.q_inactive.clone(),
            tau: self.tau,
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

impl Configuration {
    pub fn new() -> Configuration {
        Configuration {
            id: ConfigurationId::next(),
            frames: vec![],
            graph: DiGraphMap::new(),
            q: DVector::zeros(0),
            q_inactive: DVector::zeros(0),
            tau: 1.,
        }
    }

    pub fn id(&self) -> ConfigurationId {
        self.id
    }

    pub fn add_frame(
        &mut self,
        name: impl Into<String>,
        parent: Option<FrameId>,
    ) -> Result<FrameId> {
        if let Some(p) = parent {
            self.frame(p).ok_or(FeatureError::FrameNotFound(p))?;
        }
        let id = self.frames.len();
        self.frames.push(Frame {
            id,
            name: name.into(),
            tags: vec![],
            joint: None,
        });
        self.graph.add_node(id);
        if let Some(p) = parent {
            self.graph.add_edge(p, id, ());
        }
        self.touch();
        Ok(id)
    }

    pub fn add_tag(&mut self, frame: FrameId, tag: impl Into<String>) -> Result<()> {
        self.frame_mut(frame)?.tags.push(tag.into());
        Ok(())
    }

    /// Attaches (or replaces) the joint owned by `frame`.
    pub fn set_joint(&mut self, frame: FrameId, joint: Joint) -> Result<()> {
        check_joint(&joint)?;
        let old = self.snapshot_values();
        self.frame_mut(frame)?.joint = Some(joint);
        self.reindex(old);
        Ok(())
    }

    pub fn remove_joint(&mut self, frame: FrameId) -> Result<()> {
        let old = self.snapshot_values();
        self.frame_mut(frame)?.joint = None;
        self.reindex(old);
        Ok(())
    }

    pub fn set_active(&mut self, frame: FrameId, active: bool) -> Result<()> {
        let old = self.snapshot_values();
        let f = self.frame_mut(frame)?;
        let Some(joint) = f.joint.as_mut() else {
            return Err(FeatureError::NotAJoint {
                id: frame,
                name: f.name.clone(),
            });
        };
        joint.active = active;
        self.reindex(old);
        Ok(())
    }

    /// Moves `frame` under `new_parent`, optionally with a new joint: a kinematic switch.
    pub fn reparent(
        &mut self,
        frame: FrameId,
        new_parent: Option<FrameId>,
        joint: Option<Joint>,
    ) -> Result<()> {
        self.frame(frame).ok_or(FeatureError::FrameNotFound(frame))?;
        if let Some(p) = new_parent {
            self.frame(p).ok_or(FeatureError::FrameNotFound(p))?;
            if self.is_ancestor_or_self(frame, p) {
                return Err(FeatureError::Cycle { frame, parent: p });
            }
        }
        if let Some(j) = joint.as_ref() {
            check_joint(j)?;
        }
        let old = self.snapshot_values();
        self.frame_mut(frame)?.joint = joint;
        if let Some(p) = self.parent(frame) {
            self.graph.remove_edge(p, frame);
        }
        if let Some(p) = new_parent {
            self.graph.add_edge(p, frame, ());
        }
        self.reindex(old);
        Ok(())
    }

    pub fn set_joint_state(&mut self, q: &[f64]) -> Result<()> {
        if q.len() != self.q.len() {
            return Err(FeatureError::DimensionMismatch {
                expected: self.q.len(),
                got: q.len(),
            });
        }
        self.q.copy_from_slice(q);
        Ok(())
    }

    pub fn set_inactive_state(&mut self, q: &[f64]) -> Result<()> {
        if q.len() != self.q_inactive.len() {
            return Err(FeatureError::DimensionMismatch {
                expected: self.q_inactive.len(),
                got: q.len(),
            });
        }
        self.q_inactive.copy_from_slice(q);
        Ok(())
    }

    pub fn set_tau(&mut self, tau: f64) {
        self.tau = tau;
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame(&self, id: FrameId) -> Option<&Frame> {
        self.frames.get(id)
    }

    pub fn frame_by_name(&self, name: &str) -> Option<&Frame> {
        self.frames.iter().find(|f| f.name == name)
    }

    pub fn parent(&self, id: FrameId) -> Option<FrameId> {
        if !self.graph.contains_node(id) {
            return None;
        }
        self.graph
            .neighbors_directed(id, petgraph::Direction::Incoming)
            .next()
    }

    pub fn children(&self, id: FrameId) -> Vec<FrameId> {
        if !self.graph.contains_node(id) {
            return vec![];
        }
        let mut children: Vec<_> = self
            .graph
            .neighbors_directed(id, petgraph::Direction::Outgoing)
            .collect();
        children.sort_unstable();
        children
    }

    pub fn joint_state(&self) -> &DVector<f64> {
        &self.q
    }

    pub fn inactive_state(&self) -> &DVector<f64> {
        &self.q_inactive
    }

    pub fn joint_state_dim(&self) -> usize {
        self.q.len()
    }

    /// Frames owning an active joint, in coordinate order.
    pub fn active_joints(&self) -> impl Iterator<Item = (&Frame, &Joint)> {
        self.frames
            .iter()
            .filter_map(|f| f.joint.as_ref().filter(|j| j.active).map(|j| (f, j)))
    }

    /// The frame named `to` if it hangs below the frame named `from` through a joint.
    pub fn joint_by_frame_names(&self, from: &str, to: &str) -> Option<&Frame> {
        let child = self.frame_by_name(to)?;
        child.joint.as_ref()?;
        let parent = self.frame(self.parent(child.id)?)?;
        (parent.name == from).then_some(child)
    }

    /// `[lo, hi]` for every active coordinate; `[0, 0]` where unlimited.
    pub fn limits(&self) -> Vec<[f64; 2]> {
        let mut limits = vec![[0., 0.]; self.q.len()];
        for (_, j) in self.active_joints() {
            for (k, l) in j.limits.iter().take(j.dim()).enumerate() {
                limits[j.q_index + k] = *l;
            }
        }
        limits
    }

    /// Sum of margin-scaled limit violations as a single residual.
    pub fn limits_cost(
        &self,
        limits: &[[f64; 2]],
        margin: f64,
        kind: Option<JacobianKind>,
    ) -> (DVector<f64>, Option<Jacobian>) {
        let mut y = DVector::zeros(1);
        let mut jac = kind.map(|kind| Jacobian::zeros(kind, 1, self.q.len()));
        for (i, [lo, hi]) in limits.iter().enumerate().take(self.q.len()) {
            if hi <= lo {
                continue;
            }
            let m = margin * (hi - lo);
            let mut grad = 0.;
            let d = lo + m - self.q[i];
            if d > 0. {
                y[0] += d / m;
                grad -= 1. / m;
            }
            let d = self.q[i] - hi + m;
            if d > 0. {
                y[0] += d / m;
                grad += 1. / m;
            }
            if grad != 0. {
                if let Some(jac) = jac.as_mut() {
                    jac.set(0, i, grad);
                }
            }
        }
        (y, jac)
    }

    fn tau_joint(&self) -> Option<&Joint> {
        self.frames
            .first()?
            .joint
            .as_ref()
            .filter(|j| j.active && j.joint_type == JointType::Tau)
    }

    /// Time step of the transition into this configuration.
    pub fn tau(&self) -> f64 {
        match self.tau_joint() {
            Some(j) => self.q[j.q_index],
            None => self.tau,
        }
    }

    /// Jacobian of [`Self::tau`] w.r.t. the active coordinates.
    pub fn jacobian_tau(&self, kind: JacobianKind) -> Jacobian {
        let mut jac = Jacobian::zeros(kind, 1, self.q.len());
        if let Some(j) = self.tau_joint() {
            jac.set(0, j.q_index, 1.);
        }
        jac
    }

    fn is_ancestor_or_self(&self, ancestor: FrameId, mut id: FrameId) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.parent(id) {
                Some(p) => id = p,
                None => return false,
            }
        }
    }

    fn frame_mut(&mut self, id: FrameId) -> Result<&mut Frame> {
        self.frames.get_mut(id).ok_or(FeatureError::FrameNotFound(id))
    }

    fn touch(&mut self) {
        self.id = ConfigurationId::next();
    }

    fn snapshot_values(&self) -> Vec<Option<(JointType, Vec<f64>)>> {
        self.frames
            .iter()
            .map(|f| {
                f.joint.as_ref().map(|j| {
                    let src = if j.active { &self.q } else { &self.q_inactive };
                    let values = src.rows(j.q_index, j.dim()).iter().copied().collect();
                    (j.joint_type, values)
                })
            })
            .collect()
    }

    /// Re-derives coordinate offsets after a structural edit; joints that kept
    /// their type keep their values.
    fn reindex(&mut self, old: Vec<Option<(JointType, Vec<f64>)>>) {
        let mut n_active = 0;
        let mut n_inactive = 0;
        for f in self.frames.iter_mut() {
            if let Some(j) = f.joint.as_mut() {
                if j.active {
                    j.q_index = n_active;
                    n_active += j.dim();
                } else {
                    j.q_index = n_inactive;
                    n_inactive += j.dim();
                }
            }
        }
        let mut q = DVector::zeros(n_active);
        let mut q_inactive = DVector::zeros(n_inactive);
        for (f, old) in self.frames.iter().zip(old.iter()) {
            let Some(j) = f.joint.as_ref() else {
                continue;
            };
            let values = match old {
                Some((t, v)) if *t == j.joint_type => v.clone(),
                _ => j.joint_type.neutral_values(),
            };
            let dst = if j.active { &mut q } else { &mut q_inactive };
            dst.rows_mut(j.q_index, j.dim()).copy_from_slice(&values);
        }
        self.q = q;
        self.q_inactive = q_inactive;
        self.touch();
    }
}

/// A reference value, if given, must cover every coordinate of the joint.
fn check_joint(joint: &Joint) -> Result<()> {
    if !joint.q0.is_empty() && joint.q0.len() != joint.dim() {
        return Err(FeatureError::DimensionMismatch {
            expected: joint.dim(),
            got: joint.q0.len(),
        });
    }
    Ok(())
}
