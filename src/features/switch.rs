//! Detection of kinematic switches between configurations and alignment of
//! joints across a configuration tuple.

use std::collections::HashSet;

use crate::configuration::{Configuration, FrameId};

/// Whether the joint at frame `id` differs structurally between `c0` and `c1`:
/// present in only one of them, of a different type, or hung below a different
/// parent. A frame missing from either configuration counts as switched.
pub fn is_switched(c0: &Configuration, c1: &Configuration, id: FrameId) -> bool {
    let (Some(f0), Some(f1)) = (c0.frame(id), c1.frame(id)) else {
        return true;
    };
    match (&f0.joint, &f1.joint) {
        (None, None) => false,
        (Some(j0), Some(j1)) => j0.joint_type != j1.joint_type || c0.parent(id) != c1.parent(id),
        _ => true,
    }
}

/// Frames of `c1` that own a joint which was absent, differently typed or
/// differently parented in `c0`. Frames unknown to `c0` are not reported.
pub fn switched_frames(c0: &Configuration, c1: &Configuration) -> Vec<FrameId> {
    c1.frames()
        .iter()
        .filter(|f1| f1.joint.is_some() && c0.frame(f1.id).is_some())
        .filter(|f1| is_switched(c0, c1, f1.id))
        .map(|f1| f1.id)
        .collect()
}

/// Frames of the first configuration that are structurally identical in every
/// configuration of the tuple.
pub fn non_switched_frames(tuple: &[&Configuration]) -> Vec<FrameId> {
    let Some((first, rest)) = tuple.split_first() else {
        return vec![];
    };
    first
        .frames()
        .iter()
        .map(|f| f.id)
        .filter(|id| rest.iter().all(|c| !is_switched(first, c, *id)))
        .collect()
}

/// Frames of the last configuration whose active joint has a match of the
/// same type and parent in every other configuration of the tuple.
pub fn matching_joints(tuple: &[&Configuration]) -> Vec<FrameId> {
    let Some((last, rest)) = tuple.split_last() else {
        return vec![];
    };
    last.active_joints()
        .map(|(f, _)| f.id)
        .filter(|id| {
            rest.iter().all(|c| {
                c.frame(*id).is_some_and(|f| f.joint.is_some()) && !is_switched(c, last, *id)
            })
        })
        .collect()
}

/// For every configuration of `stencil`, the rows of its full coordinate
/// vector that belong to joints consistent across the whole stencil, in the
/// frame order of the first configuration. Index `i` of every list denotes
/// the same degree of freedom.
pub(crate) fn aligned_rows(stencil: &[&Configuration]) -> Vec<Vec<usize>> {
    let mut rows = vec![vec![]; stencil.len()];
    for id in non_switched_frames(stencil) {
        let joints: Vec<_> = stencil
            .iter()
            .filter_map(|c| c.frame(id).and_then(|f| f.joint.as_ref()))
            .collect();
        if joints.len() != stencil.len() {
            continue;
        }
        let q_dim = joints[0].q_dim();
        if q_dim == 0 || joints.iter().any(|j| j.q_dim() != q_dim) {
            continue;
        }
        for (r, j) in rows.iter_mut().zip(joints) {
            r.extend(j.q_index..j.q_index + q_dim);
        }
    }
    rows
}

/// The ids of `ids` that are not in `switched`, in order.
pub(crate) fn without(ids: &[FrameId], switched: &[FrameId]) -> Vec<FrameId> {
    let switched: HashSet<_> = switched.iter().collect();
    ids.iter().filter(|id| !switched.contains(id)).copied().collect()
}
