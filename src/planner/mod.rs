mod node;
mod pibt;

use std::collections::HashMap;
use std::sync::Arc;

use rand::prelude::*;
use tracing::{debug, info};

use crate::common::{Deadline, Objective, Solution};
use crate::dist::DistTable;
use crate::factorize::{FactAlgo, Partitions};
use crate::graph::{Config, VertexId};
use crate::instance::Instance;
use crate::stat::Infos;
use node::{HNode, LNode};

/// What one planner invocation hands back: the local solution up to and
/// including the frontier configuration, the sub-instances to enqueue when
/// the search was split, and the split group for partition persistence.
#[derive(Debug)]
pub struct Bundle {
    pub solution: Solution,
    pub instances: Vec<Instance>,
    pub partition: Option<(usize, Partitions)>,
    /// Goal reached with the whole search space exhausted.
    pub optimal: bool,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct AgentPlan {
    pub(crate) v_now: Option<VertexId>,
    pub(crate) v_next: Option<VertexId>,
}

/// Configuration-space DFS with per-node constraint trees and a rewrite pass
/// that keeps g-values minimal. One planner lives for exactly one (sub-)
/// instance; high-level nodes sit in the `nodes` arena and never escape it.
pub struct Planner<'a> {
    ins: &'a Instance,
    deadline: &'a Deadline,
    objective: Objective,
    rng: Option<StdRng>,
    n: usize,
    dist: Arc<DistTable>,
    pub infos: Infos,

    agents: Vec<AgentPlan>,
    occupied_now: Vec<Option<usize>>,
    occupied_next: Vec<Option<usize>>,
    tie_breakers: Vec<f32>,
    cand: Vec<Vec<VertexId>>,

    nodes: Vec<HNode>,
}

impl<'a> Planner<'a> {
    pub fn new(
        ins: &'a Instance,
        dist: Arc<DistTable>,
        deadline: &'a Deadline,
        objective: Objective,
        seed: Option<u64>,
    ) -> Self {
        let n = ins.n();
        let v_size = ins.graph.size();
        Planner {
            ins,
            deadline,
            objective,
            rng: seed.map(StdRng::seed_from_u64),
            n,
            dist,
            infos: Infos::default(),
            agents: vec![AgentPlan::default(); n],
            occupied_now: vec![None; v_size],
            occupied_next: vec![None; v_size],
            tie_breakers: vec![0.0; v_size],
            cand: vec![Vec::with_capacity(5); n],
            nodes: Vec::new(),
        }
    }

    /// Distance of local agent i to its goal from v. The oracle is keyed by
    /// global agent ids, so lookups go through the enabled mapping.
    pub(crate) fn d(&self, i: usize, v: VertexId) -> usize {
        self.dist.get(self.ins.enabled[i], v)
    }

    /// Standard solving, no factorization gate.
    pub fn solve(&mut self) -> Bundle {
        self.search(None)
    }

    /// Factorized solving. `start_t` is the absolute timestep at which this
    /// sub-instance begins, i.e. the length of the rows already written for
    /// its agents.
    pub fn solve_fact(&mut self, algo: &FactAlgo, start_t: usize) -> Bundle {
        self.search(Some((algo, start_t)))
    }

    fn search(&mut self, fact: Option<(&FactAlgo, usize)>) -> Bundle {
        debug!("start search with {} agents", self.n);

        let mut open: Vec<usize> = Vec::new();
        let mut explored: HashMap<Config, usize> = HashMap::new();

        let starts = self.ins.starts.clone();
        let h0 = self.h_value(&starts);
        let root = self.push_hnode(starts.clone(), None, 0, h0);
        open.push(root);
        explored.insert(starts, root);

        let mut h_goal: Option<usize> = None;

        loop {
            let Some(&h) = open.last() else {
                break;
            };
            if self.deadline.is_expired() {
                break;
            }
            self.infos.loop_count += 1;

            // Low-level search exhausted for this node.
            if self.nodes[h].search_tree.is_empty() {
                open.pop();
                continue;
            }

            // Lower-bound prune against the incumbent.
            if let Some(hg) = h_goal {
                if self.nodes[h].f >= self.nodes[hg].f {
                    open.pop();
                    continue;
                }
            }

            if h_goal.is_none() && self.nodes[h].c == self.ins.goals {
                h_goal = Some(h);
                info!("found solution, cost: {}", self.nodes[h].g);
                if self.objective == Objective::None {
                    break;
                }
                continue;
            }

            let l = self.nodes[h].search_tree.pop_front().unwrap();
            self.expand_lowlevel_tree(h, &l);

            if !self.get_new_config(h, &l) {
                continue;
            }

            let c_new: Config = (0..self.n)
                .map(|i| self.agents[i].v_next.unwrap())
                .collect();

            let h_last = if let Some(&h_prev) = explored.get(&c_new) {
                self.rewrite(h, h_prev, h_goal, &mut open);
                // Always re-insert the known node; random restarts stayed an
                // experiment and the flag is a no-op.
                if h_goal.map_or(true, |hg| self.nodes[h_prev].f < self.nodes[hg].f) {
                    open.push(h_prev);
                }
                h_prev
            } else {
                let g = self.nodes[h].g + self.edge_cost(&self.nodes[h].c, &c_new);
                let h_val = self.h_value(&c_new);
                let h_new = self.push_hnode(c_new.clone(), Some(h), g, h_val);
                explored.insert(c_new, h_new);
                if h_goal.map_or(true, |hg| self.nodes[h_new].f < self.nodes[hg].f) {
                    open.push(h_new);
                }
                h_new
            };

            // Factorization gate: freeze the current path and hand the
            // remaining work back as independent sub-instances.
            if let Some((algo, start_t)) = fact {
                if self.n > 1 && h_goal.is_none() {
                    if let Some(instances) = self.try_factorize(algo, h_last, start_t) {
                        let timestep = start_t + self.nodes[h_last].depth;
                        let groups: Partitions =
                            instances.iter().map(|s| s.enabled.clone()).collect();
                        let solution = self.backtrack(h_last);
                        info!(
                            "problem is factorizable into {} groups at timestep {}",
                            instances.len(),
                            timestep
                        );
                        self.infos.num_node_gen += self.nodes.len();
                        return Bundle {
                            solution,
                            instances,
                            partition: Some((timestep, groups)),
                            optimal: false,
                        };
                    }
                }
            }
        }

        let optimal = h_goal.is_some() && open.is_empty();
        match (h_goal, open.is_empty()) {
            (Some(_), true) => info!("solved optimally, objective: {}", self.objective),
            (Some(_), false) => info!("solved sub-optimally, objective: {}", self.objective),
            (None, true) => info!("no solution"),
            (None, false) => info!("timeout"),
        }

        let solution = h_goal.map(|hg| self.backtrack(hg)).unwrap_or_default();
        self.infos.num_node_gen += self.nodes.len();
        Bundle {
            solution,
            instances: Vec::new(),
            partition: None,
            optimal,
        }
    }

    fn try_factorize(
        &mut self,
        algo: &FactAlgo,
        h_last: usize,
        start_t: usize,
    ) -> Option<Vec<Instance>> {
        let c = self.nodes[h_last].c.clone();
        let priorities = self.nodes[h_last].priorities.clone();
        if algo.uses_precomputed() {
            let timestep = start_t + self.nodes[h_last].depth;
            algo.is_factorizable_def(self.ins, &c, &priorities, timestep)
        } else {
            let astar: Vec<usize> = if algo.need_astar() {
                (0..self.n).map(|j| self.d(j, c[j])).collect()
            } else {
                Vec::new()
            };
            algo.is_factorizable(self.ins, &c, &astar, &priorities)
        }
    }

    /// Arena insertion; computes the node's priorities from its parent and
    /// registers it as the parent's neighbor.
    fn push_hnode(&mut self, c: Config, parent: Option<usize>, g: usize, h: usize) -> usize {
        let priorities: Vec<f32> = match parent {
            None if !self.ins.priority.is_empty() => self.ins.priority.clone(),
            None => (0..self.n)
                .map(|i| self.d(i, c[i]) as f32 / self.n as f32)
                .collect(),
            Some(p) => {
                // Dynamic update akin to PIBT: off-goal agents age, agents at
                // their goal drop back to their fractional identity.
                (0..self.n)
                    .map(|i| {
                        let prev = self.nodes[p].priorities[i];
                        if self.d(i, c[i]) != 0 {
                            prev + 1.0
                        } else {
                            prev.fract()
                        }
                    })
                    .collect()
            }
        };

        let depth = parent.map_or(0, |p| self.nodes[p].depth + 1);
        let id = self.nodes.len();
        self.nodes.push(HNode::new(c, parent, g, h, depth, priorities));
        if let Some(p) = parent {
            self.nodes[p].neighbors.insert(id);
        }
        id
    }

    /// Queues one child constraint per move candidate of the next agent in
    /// the priority order.
    fn expand_lowlevel_tree(&mut self, h: usize, l: &LNode) {
        if l.depth >= self.n {
            return;
        }
        let i = self.nodes[h].order[l.depth];
        let v = self.nodes[h].c[i];
        let mut candidates: Vec<VertexId> = self.ins.graph.neighbors(v).to_vec();
        candidates.push(v);
        if let Some(rng) = self.rng.as_mut() {
            candidates.shuffle(rng);
        }
        for u in candidates {
            self.nodes[h].search_tree.push_back(LNode::extend(l, i, u));
        }
    }

    /// Dijkstra-style relaxation over the known neighbor edges after a better
    /// back-edge into `h_to` was found.
    fn rewrite(&mut self, h_from: usize, h_to: usize, h_goal: Option<usize>, open: &mut Vec<usize>) {
        self.nodes[h_from].neighbors.insert(h_to);

        let mut queue = std::collections::VecDeque::from([h_from]);
        while let Some(n_from) = queue.pop_front() {
            let successors: Vec<usize> = self.nodes[n_from].neighbors.iter().copied().collect();
            for n_to in successors {
                let g_val =
                    self.nodes[n_from].g + self.edge_cost(&self.nodes[n_from].c, &self.nodes[n_to].c);
                if g_val < self.nodes[n_to].g {
                    if Some(n_to) == h_goal {
                        info!("cost update: {} -> {}", self.nodes[n_to].g, g_val);
                    }
                    self.nodes[n_to].g = g_val;
                    self.nodes[n_to].f = g_val + self.nodes[n_to].h;
                    self.nodes[n_to].parent = Some(n_from);
                    queue.push_back(n_to);
                    if let Some(hg) = h_goal {
                        if self.nodes[n_to].f < self.nodes[hg].f {
                            open.push(n_to);
                        }
                    }
                }
            }
        }
    }

    fn edge_cost(&self, c1: &Config, c2: &Config) -> usize {
        if self.objective == Objective::SumOfLoss {
            return (0..self.n)
                .filter(|&i| c1[i] != self.ins.goals[i] || c2[i] != self.ins.goals[i])
                .count();
        }
        // Makespan and none: unit steps.
        1
    }

    fn h_value(&self, c: &Config) -> usize {
        match self.objective {
            Objective::Makespan => (0..self.n).map(|i| self.d(i, c[i])).max().unwrap_or(0),
            Objective::SumOfLoss => (0..self.n).map(|i| self.d(i, c[i])).sum(),
            Objective::None => 0,
        }
    }

    fn backtrack(&self, h_end: usize) -> Solution {
        let mut solution = Vec::new();
        let mut cursor = Some(h_end);
        while let Some(h) = cursor {
            solution.push(self.nodes[h].c.clone());
            cursor = self.nodes[h].parent;
        }
        solution.reverse();
        solution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use std::time::Duration;

    fn open_map(size: usize) -> Arc<Graph> {
        let mut text = format!("type octile\nheight {size}\nwidth {size}\nmap\n");
        for _ in 0..size {
            text.push_str(&".".repeat(size));
            text.push('\n');
        }
        Arc::new(Graph::from_map_str(&text).unwrap())
    }

    fn make_instance(
        g: &Arc<Graph>,
        starts: &[(usize, usize)],
        goals: &[(usize, usize)],
    ) -> Instance {
        let n = starts.len();
        let starts = starts.iter().map(|&(x, y)| g.vertex_at(x, y).unwrap()).collect();
        let goals = goals.iter().map(|&(x, y)| g.vertex_at(x, y).unwrap()).collect();
        Instance::new_sub(g.clone(), starts, goals, (0..n).collect(), Vec::new())
    }

    fn deadline() -> Deadline {
        Deadline::new(Duration::from_secs(10))
    }

    fn run(ins: &Instance, objective: Objective, seed: Option<u64>) -> Bundle {
        let dist = Arc::new(DistTable::new(ins.graph.clone(), &ins.goals));
        let dl = deadline();
        let mut planner = Planner::new(ins, dist, &dl, objective, seed);
        planner.solve()
    }

    #[test]
    fn test_single_agent_walks_straight() {
        let g = open_map(5);
        let ins = make_instance(&g, &[(0, 0)], &[(4, 0)]);
        let bundle = run(&ins, Objective::None, None);
        assert_eq!(bundle.solution.len(), 5);
        assert_eq!(bundle.solution[0], ins.starts);
        assert_eq!(bundle.solution[4], ins.goals);
    }

    #[test]
    fn test_corridor_swap_has_no_solution() {
        // Two agents exchanging ends of a plain corridor cannot pass.
        let g = Arc::new(Graph::from_map_str("height 1\nwidth 5\nmap\n.....\n").unwrap());
        let ins = make_instance(&g, &[(0, 0), (4, 0)], &[(4, 0), (0, 0)]);
        let bundle = run(&ins, Objective::None, None);
        assert!(bundle.solution.is_empty());
        assert!(!bundle.optimal);
    }

    #[test]
    fn test_plus_map_swap_is_optimal() {
        // Five-cell plus: the two agents must use a waiting cell to swap, the
        // optimal makespan is 4.
        let g = Arc::new(Graph::from_map_str("height 3\nwidth 3\nmap\n@.@\n...\n@.@\n").unwrap());
        let ins = make_instance(&g, &[(0, 1), (2, 1)], &[(2, 1), (0, 1)]);
        let bundle = run(&ins, Objective::Makespan, None);
        assert!(!bundle.solution.is_empty(), "expected a solution");
        assert!(bundle.optimal);
        assert_eq!(bundle.solution.len() - 1, 4);
        assert!(crate::common::is_feasible_solution(&ins, &bundle.solution));
    }

    #[test]
    fn test_moves_are_graph_edges_or_stays() {
        let g = open_map(6);
        let ins = make_instance(
            &g,
            &[(0, 0), (5, 5), (0, 5), (5, 0)],
            &[(5, 5), (0, 0), (5, 0), (0, 5)],
        );
        let bundle = run(&ins, Objective::None, Some(7));
        assert!(!bundle.solution.is_empty());
        assert!(crate::common::is_feasible_solution(&ins, &bundle.solution));
    }

    #[test]
    fn test_sum_of_loss_objective_solves() {
        let g = open_map(4);
        let ins = make_instance(&g, &[(0, 0), (3, 3)], &[(3, 0), (0, 3)]);
        let bundle = run(&ins, Objective::SumOfLoss, Some(1));
        assert!(!bundle.solution.is_empty());
        assert!(crate::common::is_feasible_solution(&ins, &bundle.solution));
    }

    #[test]
    fn test_factorization_gate_splits_independent_agents() {
        let g = open_map(10);
        let ins = make_instance(&g, &[(0, 0), (9, 0)], &[(0, 2), (9, 2)]);
        let dist = Arc::new(DistTable::new(g.clone(), &ins.goals));
        let dl = deadline();
        let mut planner = Planner::new(&ins, dist, &dl, Objective::None, None);
        let bundle = planner.solve_fact(&FactAlgo::Distance, 0);

        assert_eq!(bundle.instances.len(), 2);
        // The gate fires on the first expanded configuration.
        assert_eq!(bundle.solution.len(), 2);
        assert_eq!(bundle.solution[0], ins.starts);
        let (timestep, groups) = bundle.partition.expect("split recorded");
        assert_eq!(timestep, 1);
        assert_eq!(groups, vec![vec![0], vec![1]]);

        // Sub-instances continue exactly where the local solution stops.
        let frontier = &bundle.solution[1];
        assert_eq!(bundle.instances[0].starts, vec![frontier[0]]);
        assert_eq!(bundle.instances[1].starts, vec![frontier[1]]);
        assert_eq!(bundle.instances[0].priority.len(), 1);
    }

    #[test]
    fn test_gate_stays_closed_for_interacting_agents() {
        let g = open_map(10);
        let ins = make_instance(&g, &[(0, 5), (9, 5)], &[(9, 5), (0, 5)]);
        let dist = Arc::new(DistTable::new(g.clone(), &ins.goals));
        let dl = deadline();
        let mut planner = Planner::new(&ins, dist, &dl, Objective::None, None);
        let bundle = planner.solve_fact(&FactAlgo::Distance, 0);

        assert!(bundle.instances.is_empty());
        assert!(!bundle.solution.is_empty());
        assert!(crate::common::is_feasible_solution(&ins, &bundle.solution));
    }
}
