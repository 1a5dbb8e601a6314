use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::common::{
    get_makespan, get_makespan_lower_bound, get_sum_of_costs, get_sum_of_costs_lower_bound,
    get_sum_of_loss, Solution,
};
use crate::dist::DistTable;
use crate::instance::Instance;

/// Counters accumulated across every planner invocation of a run.
#[derive(Debug, Default, Clone)]
pub struct Infos {
    pub loop_count: usize,
    pub num_node_gen: usize,
    pub pibt_calls: usize,
    pub pibt_calls_active: usize,
    pub actions_count: usize,
    pub actions_count_active: usize,
}

impl Infos {
    pub fn merge(&mut self, other: &Infos) {
        self.loop_count += other.loop_count;
        self.num_node_gen += other.num_node_gen;
        self.pibt_calls += other.pibt_calls;
        self.pibt_calls_active += other.pibt_calls_active;
        self.actions_count += other.actions_count;
        self.actions_count_active += other.actions_count_active;
    }
}

fn map_file_name(map_path: &Path) -> String {
    map_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| map_path.display().to_string())
}

pub fn print_stats(ins: &Instance, dist: &DistTable, solution: &Solution, comp_time_ms: f64) {
    let makespan = get_makespan(solution);
    let makespan_lb = get_makespan_lower_bound(ins, dist);
    let soc = get_sum_of_costs(solution);
    let soc_lb = get_sum_of_costs_lower_bound(ins, dist);
    let loss = get_sum_of_loss(solution);
    let ratio = |value: usize, lb: usize| {
        if lb == 0 {
            0.0
        } else {
            (value as f64 / lb as f64 * 100.0).ceil() / 100.0
        }
    };
    info!(
        "solved: {:.2}ms\tmakespan: {} (lb={}, ub={})\tsum_of_costs: {} (lb={}, ub={})\tsum_of_loss: {} (lb={}, ub={})",
        comp_time_ms,
        makespan,
        makespan_lb,
        ratio(makespan, makespan_lb),
        soc,
        soc_lb,
        ratio(soc, soc_lb),
        loss,
        soc_lb,
        ratio(loss, soc_lb)
    );
}

/// Writes the key=value solution log consumed by the visualizer.
#[allow(clippy::too_many_arguments)]
pub fn make_log(
    ins: &Instance,
    dist: &DistTable,
    solution: &Solution,
    output: &Path,
    comp_time_ms: f64,
    map_path: &Path,
    seed: u64,
    additional_info: &str,
    log_short: bool,
) -> Result<()> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let coords = |v: usize| {
        let (x, y) = ins.graph.coords(v);
        format!("({},{})", x, y)
    };

    let mut log = String::new();
    log.push_str(&format!("agents={}\n", ins.n()));
    log.push_str(&format!("map_file={}\n", map_file_name(map_path)));
    log.push_str("solver=planner\n");
    log.push_str(&format!("solved={}\n", u8::from(!solution.is_empty())));
    log.push_str(&format!("soc={}\n", get_sum_of_costs(solution)));
    log.push_str(&format!(
        "soc_lb={}\n",
        get_sum_of_costs_lower_bound(ins, dist)
    ));
    log.push_str(&format!("makespan={}\n", get_makespan(solution)));
    log.push_str(&format!(
        "makespan_lb={}\n",
        get_makespan_lower_bound(ins, dist)
    ));
    log.push_str(&format!("sum_of_loss={}\n", get_sum_of_loss(solution)));
    log.push_str(&format!(
        "sum_of_loss_lb={}\n",
        get_sum_of_costs_lower_bound(ins, dist)
    ));
    log.push_str(&format!("comp_time={}\n", comp_time_ms));
    log.push_str(&format!("seed={}\n", seed));
    log.push_str(additional_info);

    if !log_short {
        log.push_str("starts=");
        for &s in &ins.starts {
            log.push_str(&coords(s));
            log.push(',');
        }
        log.push_str("\ngoals=");
        for &g in &ins.goals {
            log.push_str(&coords(g));
            log.push(',');
        }
        log.push_str("\nsolution=\n");
        for (t, config) in solution.iter().enumerate() {
            log.push_str(&format!("{}:", t));
            for &v in config {
                log.push_str(&coords(v));
                log.push(',');
            }
            log.push('\n');
        }
    }

    fs::write(output, log)
        .with_context(|| format!("failed to write solution log {}", output.display()))?;
    Ok(())
}

/// Appends one run record to the JSON stats array, recreating the file when
/// it is missing or malformed.
#[allow(clippy::too_many_arguments)]
pub fn make_stats(
    file_name: &Path,
    factorize: &str,
    n: usize,
    comp_time_ms: f64,
    infos: &Infos,
    solution: &Solution,
    map_path: &Path,
    success: bool,
    multi_threading: bool,
) -> Result<()> {
    let mut array = match fs::read_to_string(file_name) {
        Ok(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Array(array)) => array,
            _ => {
                warn!(
                    "failed to parse existing stats file {}, overwriting",
                    file_name.display()
                );
                Vec::new()
            }
        },
        Err(_) => Vec::new(),
    };

    array.push(json!({
        "Number of agents": n,
        "Map name": map_file_name(map_path),
        "Success": u8::from(success),
        "Computation time (ms)": comp_time_ms,
        "Makespan": get_makespan(solution),
        "Factorized": factorize,
        "Multi threading": multi_threading,
        "Loop count": infos.loop_count,
        "PIBT calls": infos.pibt_calls,
        "Active PIBT calls": infos.pibt_calls_active,
        "Action counts": infos.actions_count,
        "Active action counts": infos.actions_count_active,
        "Sum of costs": get_sum_of_costs(solution),
        "Sum of loss": get_sum_of_loss(solution),
    }));

    fs::write(file_name, serde_json::to_string_pretty(&Value::Array(array))?)
        .with_context(|| format!("failed to write stats file {}", file_name.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn tmp(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("lacam_fact_stat_test");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn tiny_setup() -> (Instance, DistTable, Solution) {
        let g = Arc::new(Graph::from_map_str("height 1\nwidth 3\nmap\n...\n").unwrap());
        let starts = vec![g.vertex_at(0, 0).unwrap()];
        let goals = vec![g.vertex_at(2, 0).unwrap()];
        let ins = Instance::new_sub(g.clone(), starts, goals, vec![0], Vec::new());
        let dist = DistTable::new(g.clone(), &ins.goals);
        let solution = vec![
            vec![g.vertex_at(0, 0).unwrap()],
            vec![g.vertex_at(1, 0).unwrap()],
            vec![g.vertex_at(2, 0).unwrap()],
        ];
        (ins, dist, solution)
    }

    #[test]
    fn test_make_log_format() {
        let (ins, dist, solution) = tiny_setup();
        let path = tmp("result.txt");
        make_log(
            &ins,
            &dist,
            &solution,
            &path,
            12.5,
            Path::new("maps/tiny.map"),
            42,
            "loop_cnt=3\n",
            false,
        )
        .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("agents=1\n"));
        assert!(text.contains("map_file=tiny.map\n"));
        assert!(text.contains("solved=1\n"));
        assert!(text.contains("makespan=2\n"));
        assert!(text.contains("makespan_lb=2\n"));
        assert!(text.contains("seed=42\n"));
        assert!(text.contains("loop_cnt=3\n"));
        assert!(text.contains("starts=(0,0),\n"));
        assert!(text.contains("goals=(2,0),\n"));
        assert!(text.contains("0:(0,0),\n"));
        assert!(text.contains("2:(2,0),\n"));
    }

    #[test]
    fn test_make_log_short_omits_paths() {
        let (ins, dist, solution) = tiny_setup();
        let path = tmp("result_short.txt");
        make_log(
            &ins,
            &dist,
            &solution,
            &path,
            1.0,
            Path::new("tiny.map"),
            0,
            "",
            true,
        )
        .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("solution="));
        assert!(!text.contains("starts="));
    }

    #[test]
    fn test_make_stats_appends() {
        let (_, _, solution) = tiny_setup();
        let path = tmp("stats.json");
        let _ = std::fs::remove_file(&path);
        let infos = Infos::default();
        for _ in 0..2 {
            make_stats(
                &path,
                "FactDistance",
                1,
                3.0,
                &infos,
                &solution,
                Path::new("tiny.map"),
                true,
                false,
            )
            .unwrap();
        }
        let text = std::fs::read_to_string(&path).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        let array = value.as_array().unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array[0]["Number of agents"], 1);
        assert_eq!(array[1]["Factorized"], "FactDistance");
        assert_eq!(array[1]["Success"], 1);
    }
}
