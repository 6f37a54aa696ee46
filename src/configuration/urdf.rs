use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use petgraph::{graphmap::DiGraphMap, visit::Bfs};
use tracing::debug;

use super::{Configuration, Joint, JointType};
use crate::error::{FeatureError, Result};

impl Configuration {
    pub fn from_urdf(path: impl AsRef<Path>) -> Result<Configuration> {
        let robot = urdf_rs::read_file(path)?;
        parse_robot(robot)
    }

    pub fn from_urdf_str(xml: &str) -> Result<Configuration> {
        let robot = urdf_rs::read_from_string(xml)?;
        parse_robot(robot)
    }
}

struct BfsIter<'a> {
    graph: &'a DiGraphMap<usize, ()>,
    bfs: Bfs<usize, HashSet<usize>>,
}

impl<'a> Iterator for BfsIter<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        self.bfs.next(self.graph)
    }
}

fn link_index(index: &HashMap<&str, usize>, joint: &str, link: &str) -> Result<usize> {
    index.get(link).copied().ok_or_else(|| {
        FeatureError::Urdf(format!("joint '{joint}' references unknown link '{link}'"))
    })
}

fn parse_robot(robot: urdf_rs::Robot) -> Result<Configuration> {
    // link name -> link index
    let index: HashMap<&str, usize> = robot
        .links
        .iter()
        .enumerate()
        .map(|(i, link)| (link.name.as_str(), i))
        .collect();

    let mut graph = DiGraphMap::new();
    for i in 0..robot.links.len() {
        graph.add_node(i);
    }
    // child link index -> (parent link index, joint)
    let mut inbound = HashMap::new();
    for joint in &robot.joints {
        let parent = link_index(&index, &joint.name, &joint.parent.link)?;
        let child = link_index(&index, &joint.name, &joint.child.link)?;
        graph.add_edge(parent, child, ());
        inbound.insert(child, (parent, joint));
    }

    let roots: Vec<_> = (0..robot.links.len())
        .filter(|i| !inbound.contains_key(i))
        .collect();
    if roots.is_empty() {
        return Err(FeatureError::Urdf("no root link".into()));
    }

    let mut c = Configuration::new();
    // link index -> frame id
    let mut frame_of = HashMap::new();
    for root in roots {
        let iter = BfsIter {
            graph: &graph,
            bfs: Bfs::new(&graph, root),
        };
        for link in iter {
            let parent = match inbound.get(&link) {
                Some((p, _)) => Some(frame_of.get(p).copied().ok_or_else(|| {
                    FeatureError::Urdf(format!("link '{}' is part of a cycle", robot.links[link].name))
                })?),
                None => None,
            };
            let id = c.add_frame(robot.links[link].name.clone(), parent)?;
            frame_of.insert(link, id);
            if let Some(joint) = inbound.get(&link).and_then(|(_, j)| convert_joint(j)) {
                c.set_joint(id, joint)?;
            }
        }
    }
    debug!(
        robot = %robot.name,
        frames = c.frames().len(),
        dofs = c.joint_state_dim(),
        "loaded urdf"
    );
    Ok(c)
}

fn dominant_axis(xyz: &[f64; 3]) -> usize {
    let mut axis = 0;
    for i in 1..3 {
        if xyz[i].abs() > xyz[axis].abs() {
            axis = i;
        }
    }
    axis
}

/// Hinges and sliders always move along the positive axis. A joint declared
/// along the negative axis keeps its type and gets its limits mirrored, so its
/// coordinate is the negated URDF coordinate.
fn convert_joint(joint: &urdf_rs::Joint) -> Option<Joint> {
    use JointType::*;
    let axis = dominant_axis(&joint.axis.xyz.0);
    let mirrored = joint.axis.xyz.0[axis] < 0.;
    let joint_type = match joint.joint_type {
        urdf_rs::JointType::Revolute | urdf_rs::JointType::Continuous => {
            [HingeX, HingeY, HingeZ][axis]
        }
        urdf_rs::JointType::Prismatic => [TransX, TransY, TransZ][axis],
        urdf_rs::JointType::Floating => Free,
        urdf_rs::JointType::Planar => TransXY,
        urdf_rs::JointType::Spherical => QuatBall,
        urdf_rs::JointType::Fixed => return None,
    };
    let mut res = Joint::new(joint_type);
    let limited = matches!(
        joint.joint_type,
        urdf_rs::JointType::Revolute | urdf_rs::JointType::Prismatic
    );
    let (lo, hi) = (joint.limit.lower, joint.limit.upper);
    if limited && hi > lo {
        res = res.with_limits(vec![if mirrored { [-hi, -lo] } else { [lo, hi] }]);
    }
    if mirrored && res.dim() == 1 {
        debug!(joint = %joint.name, "negative axis, coordinate sign flipped");
    }
    Some(res)
}
