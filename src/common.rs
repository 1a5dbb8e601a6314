use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::error;

use crate::dist::DistTable;
use crate::graph::Config;
use crate::instance::Instance;

/// A configuration per timestep, front is the start configuration.
pub type Solution = Vec<Config>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    None,
    Makespan,
    SumOfLoss,
}

impl Objective {
    pub fn from_flag(value: u8) -> Self {
        match value {
            1 => Objective::Makespan,
            2 => Objective::SumOfLoss,
            _ => Objective::None,
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Objective::None => write!(f, "none"),
            Objective::Makespan => write!(f, "makespan"),
            Objective::SumOfLoss => write!(f, "sum_of_loss"),
        }
    }
}

/// Absolute expiry passed down to every planner call.
#[derive(Debug)]
pub struct Deadline {
    start: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn new(limit: Duration) -> Self {
        Deadline {
            start: Instant::now(),
            limit,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn is_expired(&self) -> bool {
        self.start.elapsed() >= self.limit
    }
}

/// Post-hoc validation: starts and goals match, every move stays or follows an
/// edge, no vertex is shared and no edge is swapped between consecutive steps.
pub fn is_feasible_solution(ins: &Instance, solution: &Solution) -> bool {
    if solution.is_empty() {
        return true;
    }

    if solution[0] != ins.starts {
        error!("solution does not begin at the start configuration");
        return false;
    }
    if solution[solution.len() - 1] != ins.goals {
        error!("solution does not end at the goal configuration");
        return false;
    }

    let n = ins.n();
    for t in 1..solution.len() {
        let prev = &solution[t - 1];
        let step = &solution[t];
        let mut seen = HashSet::with_capacity(n);
        for i in 0..n {
            if step[i] != prev[i] && !ins.graph.neighbors(prev[i]).contains(&step[i]) {
                error!(
                    "invalid move of agent {} at timestep {}: {:?} -> {:?}",
                    i,
                    t,
                    ins.graph.coords(prev[i]),
                    ins.graph.coords(step[i])
                );
                return false;
            }
            if !seen.insert(step[i]) {
                error!(
                    "vertex conflict involving agent {} at {:?}, timestep {}",
                    i,
                    ins.graph.coords(step[i]),
                    t
                );
                return false;
            }
            for j in (i + 1)..n {
                if step[j] == prev[i] && step[i] == prev[j] {
                    error!("edge conflict between {} and {} at timestep {}", i, j, t);
                    return false;
                }
            }
        }
    }
    true
}

pub fn get_makespan(solution: &Solution) -> usize {
    if solution.is_empty() {
        return 0;
    }
    solution.len() - 1
}

/// Timestep at which agent i finally settles on its last vertex.
pub fn get_path_cost(solution: &Solution, i: usize) -> usize {
    let goal = solution[solution.len() - 1][i];
    let mut c = solution.len() - 1;
    while c > 0 && solution[c - 1][i] == goal {
        c -= 1;
    }
    c
}

pub fn get_sum_of_costs(solution: &Solution) -> usize {
    if solution.is_empty() {
        return 0;
    }
    let n = solution[0].len();
    (0..n).map(|i| get_path_cost(solution, i)).sum()
}

pub fn get_sum_of_loss(solution: &Solution) -> usize {
    if solution.is_empty() {
        return 0;
    }
    let n = solution[0].len();
    let mut c = 0;
    for i in 0..n {
        let goal = solution[solution.len() - 1][i];
        for t in 1..solution.len() {
            if solution[t - 1][i] != goal || solution[t][i] != goal {
                c += 1;
            }
        }
    }
    c
}

pub fn get_makespan_lower_bound(ins: &Instance, dist: &DistTable) -> usize {
    (0..ins.n())
        .map(|i| dist.get(ins.enabled[i], ins.starts[i]))
        .max()
        .unwrap_or(0)
}

pub fn get_sum_of_costs_lower_bound(ins: &Instance, dist: &DistTable) -> usize {
    (0..ins.n())
        .map(|i| dist.get(ins.enabled[i], ins.starts[i]))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use std::sync::Arc;

    fn open_map(size: usize) -> Arc<Graph> {
        let mut text = format!("type octile\nheight {size}\nwidth {size}\nmap\n");
        for _ in 0..size {
            text.push_str(&".".repeat(size));
            text.push('\n');
        }
        Arc::new(Graph::from_map_str(&text).unwrap())
    }

    #[test]
    fn test_validator_accepts_feasible() {
        let g = open_map(3);
        let at = |x, y| g.vertex_at(x, y).unwrap();
        let starts = vec![at(0, 0), at(2, 0)];
        let goals = vec![at(0, 2), at(2, 2)];
        let ins = Instance::new_sub(g.clone(), starts, goals, vec![0, 1], Vec::new());
        let solution = vec![
            vec![at(0, 0), at(2, 0)],
            vec![at(0, 1), at(2, 1)],
            vec![at(0, 2), at(2, 2)],
        ];
        assert!(is_feasible_solution(&ins, &solution));
    }

    #[test]
    fn test_validator_rejects_vertex_conflict() {
        let g = open_map(3);
        let at = |x, y| g.vertex_at(x, y).unwrap();
        let starts = vec![at(0, 0), at(2, 0)];
        let goals = vec![at(2, 2), at(0, 2)];
        let ins = Instance::new_sub(g.clone(), starts, goals, vec![0, 1], Vec::new());
        let solution = vec![
            vec![at(0, 0), at(2, 0)],
            vec![at(1, 0), at(1, 0)],
            vec![at(2, 2), at(0, 2)],
        ];
        assert!(!is_feasible_solution(&ins, &solution));
    }

    #[test]
    fn test_validator_rejects_edge_swap() {
        let g = open_map(3);
        let at = |x, y| g.vertex_at(x, y).unwrap();
        let starts = vec![at(0, 0), at(1, 0)];
        let goals = vec![at(1, 0), at(0, 0)];
        let ins = Instance::new_sub(g.clone(), starts, goals, vec![0, 1], Vec::new());
        let solution = vec![vec![at(0, 0), at(1, 0)], vec![at(1, 0), at(0, 0)]];
        assert!(!is_feasible_solution(&ins, &solution));
    }

    #[test]
    fn test_validator_rejects_teleport() {
        let g = open_map(3);
        let at = |x, y| g.vertex_at(x, y).unwrap();
        let ins = Instance::new_sub(
            g.clone(),
            vec![at(0, 0)],
            vec![at(2, 2)],
            vec![0],
            Vec::new(),
        );
        let solution = vec![vec![at(0, 0)], vec![at(2, 2)]];
        assert!(!is_feasible_solution(&ins, &solution));
    }

    #[test]
    fn test_metrics() {
        let g = open_map(3);
        let at = |x, y| g.vertex_at(x, y).unwrap();
        // One agent walks two steps and waits, the other is at goal throughout.
        let solution = vec![
            vec![at(0, 0), at(2, 2)],
            vec![at(1, 0), at(2, 2)],
            vec![at(2, 0), at(2, 2)],
            vec![at(2, 0), at(2, 2)],
        ];
        assert_eq!(get_makespan(&solution), 3);
        assert_eq!(get_path_cost(&solution, 0), 2);
        assert_eq!(get_path_cost(&solution, 1), 0);
        assert_eq!(get_sum_of_costs(&solution), 2);
        assert_eq!(get_sum_of_loss(&solution), 2);
    }
}
