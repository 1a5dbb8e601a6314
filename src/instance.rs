use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::graph::{Config, Graph};

/// An immutable MAPF problem. Sub-instances produced by factorization carry
/// the `enabled` mapping from local agent id to the id in the top instance,
/// plus the priority vector inherited from the splitting node.
#[derive(Debug, Clone)]
pub struct Instance {
    pub graph: Arc<Graph>,
    pub starts: Config,
    pub goals: Config,
    /// Local agent id (vector position) to global agent id.
    pub enabled: Vec<usize>,
    /// Inherited priorities, empty on the top instance.
    pub priority: Vec<f32>,
}

impl Instance {
    /// Loads start/goal pairs from a MAPF-benchmark scenario file, accepting
    /// rows until `n` agents are gathered. Lines that do not look like
    /// scenario rows are skipped; reading stops at the first row whose start
    /// or goal is out of bounds or falls on an obstacle.
    pub fn from_scen(graph: Arc<Graph>, scen_path: &Path, n: usize) -> Result<Self> {
        let file = File::open(scen_path)
            .with_context(|| format!("failed to open scenario file {}", scen_path.display()))?;
        let reader = BufReader::new(file);

        let mut starts = Config::new();
        let mut goals = Config::new();
        for line in reader.lines() {
            let line = line?;
            let fields: Vec<&str> = line.split_whitespace().collect();
            // <bucket> <map> <w> <h> <x_s> <y_s> <x_g> <y_g> <dist>
            if fields.len() < 9 || !fields[1].ends_with(".map") {
                continue;
            }
            let parsed: Option<(usize, usize, usize, usize)> = (|| {
                Some((
                    fields[4].parse().ok()?,
                    fields[5].parse().ok()?,
                    fields[6].parse().ok()?,
                    fields[7].parse().ok()?,
                ))
            })();
            let Some((x_s, y_s, x_g, y_g)) = parsed else {
                continue;
            };
            let (Some(s), Some(g)) = (graph.vertex_at(x_s, y_s), graph.vertex_at(x_g, y_g)) else {
                info!(
                    "stopped reading the scenario at an unusable row: start ({x_s},{y_s}), goal ({x_g},{y_g})"
                );
                break;
            };
            starts.push(s);
            goals.push(g);
            if starts.len() == n {
                break;
            }
        }

        info!("loaded scenario with {} of {} requested agents", starts.len(), n);
        let enabled = (0..starts.len()).collect();
        Ok(Instance {
            graph,
            starts,
            goals,
            enabled,
            priority: Vec::new(),
        })
    }

    /// Constructor for sub-instances produced by factorization.
    pub fn new_sub(
        graph: Arc<Graph>,
        starts: Config,
        goals: Config,
        enabled: Vec<usize>,
        priority: Vec<f32>,
    ) -> Self {
        Instance {
            graph,
            starts,
            goals,
            enabled,
            priority,
        }
    }

    pub fn n(&self) -> usize {
        self.starts.len()
    }

    pub fn is_valid(&self, expected_n: usize) -> bool {
        if self.starts.len() != expected_n
            || self.goals.len() != expected_n
            || self.enabled.len() != expected_n
        {
            info!(
                "invalid N, check instance: expected {}, starts {}, goals {}",
                expected_n,
                self.starts.len(),
                self.goals.len()
            );
            return false;
        }
        true
    }
}
