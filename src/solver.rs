use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use tracing::{debug, info};

use crate::common::{Deadline, Objective, Solution};
use crate::dist::DistTable;
use crate::factorize::{record_partition, FactAlgo, PartitionsMap};
use crate::graph::VertexId;
use crate::instance::Instance;
use crate::planner::Planner;
use crate::stat::Infos;

/// Outcome of one full run, standard or factorized.
#[derive(Debug)]
pub struct SolveReport {
    /// Empty when the run failed (no solution or timeout).
    pub solution: Solution,
    pub optimal: bool,
    pub infos: Infos,
    /// Splits accepted during the run, keyed by absolute timestep.
    pub partitions: PartitionsMap,
}

/// Standard solving, one planner over the whole instance.
pub fn solve(
    ins: &Instance,
    dist: Arc<DistTable>,
    deadline: &Deadline,
    objective: Objective,
    seed: Option<u64>,
) -> SolveReport {
    let mut planner = Planner::new(ins, dist, deadline, objective, seed);
    let bundle = planner.solve();
    SolveReport {
        solution: bundle.solution,
        optimal: bundle.optimal,
        infos: planner.infos.clone(),
        partitions: PartitionsMap::new(),
    }
}

/// Factorized solving on the current thread: a FIFO of sub-instances, each
/// solved until it finishes or splits, with every local solution appended to
/// the per-agent rows of the global solution.
pub fn solve_fact(
    ins: Instance,
    dist: Arc<DistTable>,
    deadline: &Deadline,
    algo: &FactAlgo,
    objective: Objective,
    seed: Option<u64>,
) -> SolveReport {
    let n_top = ins.n();
    let mut global: Vec<Vec<VertexId>> = vec![Vec::new(); n_top];
    let mut queue = VecDeque::from([ins]);
    let mut infos = Infos::default();
    let mut partitions = PartitionsMap::new();
    let mut all_optimal = true;
    let mut job: u64 = 0;

    while let Some(sub) = queue.pop_front() {
        let start_t = global[sub.enabled[0]].len();
        let mut planner = Planner::new(
            &sub,
            dist.clone(),
            deadline,
            objective,
            seed.map(|s| s.wrapping_add(job)),
        );
        job += 1;
        let bundle = planner.solve_fact(algo, start_t);
        infos.merge(&planner.infos);

        if bundle.solution.is_empty() {
            return SolveReport {
                solution: Vec::new(),
                optimal: false,
                infos,
                partitions,
            };
        }
        all_optimal &= bundle.optimal;
        if let Some((timestep, groups)) = bundle.partition {
            record_partition(&mut partitions, timestep, groups);
        }
        write_sol(&bundle.solution, &sub.enabled, &mut global);
        queue.extend(bundle.instances);
        debug!("sub-instance finished, {} pending", queue.len());
    }

    pad_solution(&mut global);
    SolveReport {
        solution: transpose(&global),
        optimal: all_optimal,
        infos,
        partitions,
    }
}

struct QueueState {
    queue: VecDeque<Instance>,
    running: usize,
    job: u64,
    stop: bool,
    failed: bool,
    all_optimal: bool,
}

struct SharedState {
    queue: Mutex<QueueState>,
    signal: Condvar,
    solution: Mutex<Vec<Vec<VertexId>>>,
    infos: Mutex<Infos>,
    partitions: Mutex<PartitionsMap>,
}

/// Factorized solving on a worker pool sharing one FIFO and one global
/// solution buffer. Termination: a worker that finds the queue empty with no
/// running peer raises the stop flag.
pub fn solve_fact_mt(
    ins: Instance,
    dist: Arc<DistTable>,
    deadline: &Deadline,
    algo: &FactAlgo,
    objective: Objective,
    seed: Option<u64>,
) -> SolveReport {
    let n_top = ins.n();
    let workers = thread::available_parallelism()
        .map(|p| p.get() / 2)
        .unwrap_or(1)
        .max(1);
    info!("multi-threaded solving with {workers} workers");

    let shared = SharedState {
        queue: Mutex::new(QueueState {
            queue: VecDeque::from([ins]),
            running: 0,
            job: 0,
            stop: false,
            failed: false,
            all_optimal: true,
        }),
        signal: Condvar::new(),
        solution: Mutex::new(vec![Vec::new(); n_top]),
        infos: Mutex::new(Infos::default()),
        partitions: Mutex::new(PartitionsMap::new()),
    };

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| worker_loop(&shared, &dist, deadline, algo, objective, seed));
        }
    });

    let state = shared.queue.into_inner().unwrap();
    let mut global = shared.solution.into_inner().unwrap();
    let infos = shared.infos.into_inner().unwrap();
    let partitions = shared.partitions.into_inner().unwrap();

    if state.failed {
        return SolveReport {
            solution: Vec::new(),
            optimal: false,
            infos,
            partitions,
        };
    }
    pad_solution(&mut global);
    SolveReport {
        solution: transpose(&global),
        optimal: state.all_optimal,
        infos,
        partitions,
    }
}

fn worker_loop(
    shared: &SharedState,
    dist: &Arc<DistTable>,
    deadline: &Deadline,
    algo: &FactAlgo,
    objective: Objective,
    seed: Option<u64>,
) {
    loop {
        let (sub, job) = {
            let mut state = shared.queue.lock().unwrap();
            loop {
                if state.stop {
                    return;
                }
                if let Some(sub) = state.queue.pop_front() {
                    state.running += 1;
                    let job = state.job;
                    state.job += 1;
                    break (sub, job);
                }
                if state.running == 0 {
                    state.stop = true;
                    shared.signal.notify_all();
                    return;
                }
                state = shared.signal.wait(state).unwrap();
            }
        };

        let start_t = shared.solution.lock().unwrap()[sub.enabled[0]].len();
        let mut planner = Planner::new(
            &sub,
            dist.clone(),
            deadline,
            objective,
            seed.map(|s| s.wrapping_add(job)),
        );
        let bundle = planner.solve_fact(algo, start_t);
        shared.infos.lock().unwrap().merge(&planner.infos);

        if bundle.solution.is_empty() {
            let mut state = shared.queue.lock().unwrap();
            state.failed = true;
            state.stop = true;
            state.running -= 1;
            shared.signal.notify_all();
            return;
        }

        if let Some((timestep, groups)) = bundle.partition {
            record_partition(&mut shared.partitions.lock().unwrap(), timestep, groups);
        }

        // Append this slice before the children become poppable so a child
        // reads a completed row when it computes its start timestep.
        write_sol(
            &bundle.solution,
            &sub.enabled,
            &mut shared.solution.lock().unwrap(),
        );

        let mut state = shared.queue.lock().unwrap();
        state.all_optimal &= bundle.optimal;
        state.queue.extend(bundle.instances);
        state.running -= 1;
        shared.signal.notify_all();
    }
}

/// Appends the local solution to the global per-agent rows: local agent k
/// writes into the row of its global id.
pub(crate) fn write_sol(local: &Solution, enabled: &[usize], global: &mut [Vec<VertexId>]) {
    for (k, &g) in enabled.iter().enumerate() {
        for config in local {
            global[g].push(config[k]);
        }
    }
}

/// Extends every row to the longest row by repeating its last vertex.
pub(crate) fn pad_solution(global: &mut [Vec<VertexId>]) {
    let max_len = global.iter().map(|row| row.len()).max().unwrap_or(0);
    for row in global.iter_mut() {
        if let Some(&last) = row.last() {
            row.resize(max_len, last);
        }
    }
}

/// N rows of length T into T configurations of length N.
pub(crate) fn transpose(global: &[Vec<VertexId>]) -> Solution {
    if global.is_empty() || global[0].is_empty() {
        return Vec::new();
    }
    let t_len = global[0].len();
    (0..t_len)
        .map(|t| global.iter().map(|row| row[t]).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::is_feasible_solution;
    use crate::graph::Graph;
    use rand::prelude::*;
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

    #[test]
    fn test_write_pad_transpose() {
        let mut global: Vec<Vec<VertexId>> = vec![Vec::new(); 3];
        // Joint prefix for agents 1 and 2, then separate continuations.
        write_sol(&vec![vec![10, 20], vec![11, 21]], &[1, 2], &mut global);
        write_sol(&vec![vec![11], vec![12], vec![13]], &[1], &mut global);
        write_sol(&vec![vec![5], vec![6]], &[0], &mut global);

        assert_eq!(global[1], vec![10, 11, 11, 12, 13]);
        assert_eq!(global[2], vec![20, 21]);
        assert_eq!(global[0], vec![5, 6]);

        pad_solution(&mut global);
        assert_eq!(global[2], vec![20, 21, 21, 21, 21]);
        assert_eq!(global[0], vec![5, 6, 6, 6, 6]);

        let solution = transpose(&global);
        assert_eq!(solution.len(), 5);
        assert_eq!(solution[0], vec![5, 10, 20]);
        assert_eq!(solution[4], vec![6, 13, 21]);
    }

    #[test]
    fn test_open_map_with_sixteen_agents() {
        // Random permutation scenario on an open 8x8 grid.
        let g = open_map(8);
        let mut rng = StdRng::seed_from_u64(0);
        let mut cells: Vec<usize> = (0..g.size()).collect();
        cells.shuffle(&mut rng);
        let starts: Vec<usize> = cells[..16].to_vec();
        cells.shuffle(&mut rng);
        let goals: Vec<usize> = cells[..16].to_vec();
        let ins = Instance::new_sub(g.clone(), starts, goals, (0..16).collect(), Vec::new());

        let dist = Arc::new(DistTable::new(g, &ins.goals));
        let dl = deadline();
        let report = solve(&ins, dist, &dl, Objective::None, Some(0));
        assert!(!report.solution.is_empty(), "expected a solution");
        assert!(is_feasible_solution(&ins, &report.solution));
    }

    #[test]
    fn test_factorized_solve_matches_instance() {
        let g = open_map(10);
        let ins = make_instance(
            &g,
            &[(0, 0), (9, 0), (0, 9), (9, 9)],
            &[(2, 0), (7, 0), (2, 9), (7, 9)],
        );
        let dist = Arc::new(DistTable::new(g, &ins.goals));
        let dl = deadline();
        let report = solve_fact(
            ins.clone(),
            dist,
            &dl,
            &FactAlgo::Distance,
            Objective::None,
            Some(0),
        );
        assert!(!report.solution.is_empty());
        assert!(!report.partitions.is_empty(), "expected at least one split");
        assert!(is_feasible_solution(&ins, &report.solution));
    }

    #[test]
    fn test_factorized_solve_without_split_still_solves() {
        let g = open_map(10);
        let ins = make_instance(&g, &[(0, 5), (9, 5)], &[(9, 5), (0, 5)]);
        let dist = Arc::new(DistTable::new(g, &ins.goals));
        let dl = deadline();
        let report = solve_fact(
            ins.clone(),
            dist,
            &dl,
            &FactAlgo::Distance,
            Objective::None,
            Some(0),
        );
        assert!(!report.solution.is_empty());
        assert!(report.partitions.is_empty());
        assert!(is_feasible_solution(&ins, &report.solution));
    }

    #[test]
    fn test_multi_threaded_solve_is_feasible() {
        let g = open_map(10);
        let ins = make_instance(
            &g,
            &[(0, 0), (9, 0), (0, 9), (9, 9), (4, 4), (5, 4)],
            &[(2, 0), (7, 0), (2, 9), (7, 9), (4, 6), (5, 6)],
        );
        let dist = Arc::new(DistTable::new(g, &ins.goals));
        let dl = deadline();
        let report = solve_fact_mt(
            ins.clone(),
            dist,
            &dl,
            &FactAlgo::Distance,
            Objective::None,
            Some(0),
        );
        assert!(!report.solution.is_empty());
        assert!(is_feasible_solution(&ins, &report.solution));
    }

    #[test]
    fn test_unsolvable_corridor_reports_failure() {
        let g = Arc::new(Graph::from_map_str("height 1\nwidth 5\nmap\n.....\n").unwrap());
        let ins = make_instance(&g, &[(0, 0), (4, 0)], &[(4, 0), (0, 0)]);
        let dist = Arc::new(DistTable::new(g, &ins.goals));
        let dl = deadline();
        let report = solve_fact(
            ins,
            dist,
            &dl,
            &FactAlgo::Distance,
            Objective::None,
            Some(0),
        );
        assert!(report.solution.is_empty());
        assert!(!report.optimal);
    }
}
