use std::collections::{HashSet, VecDeque};

use crate::graph::{Config, VertexId};

/// Low-level search node: a partial commitment of the first `depth` agents in
/// the priority order to the listed vertices at the next timestep.
#[derive(Debug, Clone)]
pub(crate) struct LNode {
    pub(crate) who: Vec<usize>,
    pub(crate) to: Vec<VertexId>,
    pub(crate) depth: usize,
}

impl LNode {
    pub(crate) fn root() -> Self {
        LNode {
            who: Vec::new(),
            to: Vec::new(),
            depth: 0,
        }
    }

    pub(crate) fn extend(parent: &LNode, i: usize, v: VertexId) -> Self {
        let mut who = parent.who.clone();
        who.push(i);
        let mut to = parent.to.clone();
        to.push(v);
        LNode {
            who,
            to,
            depth: parent.depth + 1,
        }
    }
}

/// High-level search node for one configuration. Nodes live in the planner's
/// arena and reference each other by index, which keeps the cyclic
/// parent/neighbor structure trivially droppable when the planner returns.
#[derive(Debug)]
pub(crate) struct HNode {
    pub(crate) c: Config,
    pub(crate) parent: Option<usize>,
    /// Known successors, traversed by the rewrite pass.
    pub(crate) neighbors: HashSet<usize>,
    pub(crate) g: usize,
    pub(crate) h: usize,
    pub(crate) f: usize,
    pub(crate) priorities: Vec<f32>,
    /// Agent ids by descending priority.
    pub(crate) order: Vec<usize>,
    pub(crate) search_tree: VecDeque<LNode>,
    pub(crate) depth: usize,
}

impl HNode {
    pub(crate) fn new(
        c: Config,
        parent: Option<usize>,
        g: usize,
        h: usize,
        depth: usize,
        priorities: Vec<f32>,
    ) -> Self {
        let order = argsort_desc(&priorities);
        let mut search_tree = VecDeque::new();
        search_tree.push_back(LNode::root());
        HNode {
            c,
            parent,
            neighbors: HashSet::new(),
            g,
            h,
            f: g + h,
            priorities,
            order,
            search_tree,
            depth,
        }
    }
}

pub(crate) fn argsort_desc(priorities: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..priorities.len()).collect();
    order.sort_by(|&i, &j| priorities[j].partial_cmp(&priorities[i]).unwrap());
    order
}
