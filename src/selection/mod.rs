//! Resolution of a feature's target degrees of freedom.

use tracing::trace;

use crate::configuration::{Configuration, Frame, FrameId, Joint};
use crate::error::{FeatureError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PickMode {
    /// every active joint, addressed as a (frame, parent) pair
    AllActiveJoints,
    /// frames tagged with any of the picks
    ByJointGroups,
    /// frames named by the picks, each of which must own a joint
    ByJointNames,
    /// every active joint whose frame is not named by the picks
    ExcludeJointNames,
}

/// Targets of a joint-state feature, in output order.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Targets {
    /// the whole active coordinate vector
    All,
    /// the joints owned by these frames
    Frames(Vec<FrameId>),
    /// the joint linking each pair, negated when the pair is (parent, child)
    Pairs(Vec<(FrameId, FrameId)>),
}

/// A target joint as found in one configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Resolved<'a> {
    pub frame: &'a Frame,
    pub joint: &'a Joint,
    pub flip: bool,
}

fn set_append(ids: &mut Vec<FrameId>, id: FrameId) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

/// Drops a two-character `:x` suffix from a pick name.
fn strip_suffix(name: &str) -> &str {
    let mut chars = name.char_indices().rev();
    match (chars.next(), chars.next()) {
        (Some(_), Some((i, ':'))) => &name[..i],
        _ => name,
    }
}

impl Targets {
    /// Resolves `picks` in `c`. A pick that selects nothing means the whole
    /// coordinate vector.
    pub fn pick(mode: PickMode, picks: &[&str], c: &Configuration) -> Result<Targets> {
        let targets = match mode {
            PickMode::AllActiveJoints => {
                let mut pairs = vec![];
                for (f, _) in c.active_joints() {
                    // root joints cannot be addressed as a pair
                    match c.parent(f.id) {
                        Some(parent) => pairs.push((f.id, parent)),
                        None => trace!(frame = %f.name, "skipping parentless joint"),
                    }
                }
                Targets::Pairs(pairs)
            }
            PickMode::ByJointGroups => {
                let mut ids = vec![];
                for f in c.frames() {
                    if picks.iter().any(|p| f.has_tag(p)) {
                        set_append(&mut ids, f.id);
                    }
                }
                Targets::Frames(ids)
            }
            PickMode::ByJointNames => {
                let mut ids = vec![];
                for pick in picks {
                    let name = strip_suffix(pick);
                    let f = c
                        .frame_by_name(name)
                        .ok_or_else(|| FeatureError::PickNotFound(name.to_string()))?;
                    if f.joint.is_none() {
                        return Err(FeatureError::PickNotAJoint(name.to_string()));
                    }
                    set_append(&mut ids, f.id);
                }
                Targets::Frames(ids)
            }
            PickMode::ExcludeJointNames => {
                let mut ids = vec![];
                for (f, _) in c.active_joints() {
                    if picks.contains(&f.name.as_str()) {
                        continue;
                    }
                    set_append(&mut ids, f.id);
                }
                Targets::Frames(ids)
            }
        };
        match targets {
            Targets::Frames(ids) if ids.is_empty() => Ok(Targets::All),
            Targets::Pairs(pairs) if pairs.is_empty() => Ok(Targets::All),
            targets => Ok(targets),
        }
    }

    /// Frame ids in target order; for pairs, both ids of each pair.
    pub fn frame_ids(&self) -> Vec<FrameId> {
        match self {
            Targets::All => vec![],
            Targets::Frames(ids) => ids.clone(),
            Targets::Pairs(pairs) => pairs.iter().flat_map(|(a, b)| [*a, *b]).collect(),
        }
    }

    /// Looks up every target joint in `c`. `All` yields the active joints.
    pub(crate) fn resolve<'a>(&self, c: &'a Configuration) -> Result<Vec<Resolved<'a>>> {
        match self {
            Targets::All => Ok(c
                .active_joints()
                .map(|(frame, joint)| Resolved {
                    frame,
                    joint,
                    flip: false,
                })
                .collect()),
            Targets::Frames(ids) => ids.iter().map(|id| resolve_frame(c, *id)).collect(),
            Targets::Pairs(pairs) => pairs.iter().map(|(a, b)| resolve_pair(c, *a, *b)).collect(),
        }
    }
}

pub(crate) fn resolve_frame(c: &Configuration, id: FrameId) -> Result<Resolved<'_>> {
    let frame = c.frame(id).ok_or(FeatureError::FrameNotFound(id))?;
    let joint = frame.joint.as_ref().ok_or_else(|| FeatureError::NotAJoint {
        id,
        name: frame.name.clone(),
    })?;
    Ok(Resolved {
        frame,
        joint,
        flip: false,
    })
}

pub(crate) fn resolve_pair(c: &Configuration, a: FrameId, b: FrameId) -> Result<Resolved<'_>> {
    let (id, flip) = if c.parent(a) == Some(b) {
        (a, false)
    } else if c.parent(b) == Some(a) {
        (b, true)
    } else {
        return Err(FeatureError::NotLinked(a, b));
    };
    let mut res = resolve_frame(c, id)?;
    res.flip = flip;
    Ok(res)
}
