use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::graph::{Config, Graph};
use crate::instance::Instance;

/// Minimal clearance required between two agents' remaining work before a
/// pairwise predicate may declare them separable.
pub const SAFETY_DISTANCE: i64 = 0;

/// Groups of agent ids, local or global depending on context.
pub type Partitions = Vec<Vec<usize>>;
/// Timestep to the groups of global agent ids split off at that timestep.
pub type PartitionsMap = BTreeMap<usize, Partitions>;

/// Separability policy deciding when a configuration decomposes into
/// independent sub-problems. One interface, five algorithms; the precomputed
/// variant carries the replay table loaded at construction.
#[derive(Debug)]
pub enum FactAlgo {
    /// Manhattan distances between agents versus to their goals.
    Distance,
    /// Disjoint axis-aligned boxes spanned by (position, goal).
    Bbox,
    /// Non-intersecting (position, goal) segments.
    Orient,
    /// Same algebra as `Distance` with oracle distances to the goals.
    Astar,
    /// Replay of a persisted timestep-indexed partition table.
    Def(PartitionsMap),
}

impl FactAlgo {
    /// Loads the replay table for the precomputed variant. A missing or
    /// unparsable file is fatal.
    pub fn def_from_file(path: &Path) -> Result<FactAlgo> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read partition file {}", path.display()))?;
        let raw: HashMap<String, Partitions> = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse partition file {}", path.display()))?;
        let mut map = PartitionsMap::new();
        for (key, value) in raw {
            let timestep: usize = key
                .parse()
                .with_context(|| format!("non-numeric timestep key '{key}'"))?;
            map.insert(timestep, value);
        }
        info!("loaded precomputed partitions for {} timesteps", map.len());
        Ok(FactAlgo::Def(map))
    }

    /// Whether `is_factorizable` expects oracle distances for the current
    /// configuration.
    pub fn need_astar(&self) -> bool {
        matches!(self, FactAlgo::Astar)
    }

    pub fn uses_precomputed(&self) -> bool {
        matches!(self, FactAlgo::Def(_))
    }

    /// Partitions the enabled agents at configuration `c` if no pair from
    /// different groups can still interact, returning one sub-instance per
    /// group. `astar[j]` must hold the oracle distance of agent j to its goal
    /// when `need_astar()` is set.
    pub fn is_factorizable(
        &self,
        ins: &Instance,
        c: &Config,
        astar: &[usize],
        priorities: &[f32],
    ) -> Option<Vec<Instance>> {
        let n = c.len();
        if n < 2 {
            return None;
        }

        let mut partitions: Partitions = (0..n).map(|j| vec![j]).collect();
        let mut agent_loc: Vec<usize> = (0..n).collect();

        'merge: for j1 in 0..n {
            let l1 = agent_loc[j1];
            for j2 in (j1 + 1)..n {
                let l2 = agent_loc[j2];
                if l1 == l2 {
                    continue;
                }
                if self.separable(&ins.graph, j1, j2, c, &ins.goals, astar) {
                    continue;
                }
                // Not separable, merge j2's group into j1's.
                let moved = std::mem::take(&mut partitions[l2]);
                for &a in &moved {
                    agent_loc[a] = l1;
                }
                partitions[l1].extend(moved);
                partitions[l1].sort_unstable();
                if partitions[l1].len() == n {
                    break 'merge;
                }
            }
        }

        partitions.retain(|group| !group.is_empty());
        if partitions.len() < 2 {
            return None;
        }
        debug!("configuration is factorizable into {} groups", partitions.len());
        Some(self.split(ins, c, &partitions, priorities))
    }

    /// Replay variant: looks up the absolute timestep in the loaded table,
    /// keeps the groups that still contain enabled agents and splits when at
    /// least two remain.
    pub fn is_factorizable_def(
        &self,
        ins: &Instance,
        c: &Config,
        priorities: &[f32],
        timestep: usize,
    ) -> Option<Vec<Instance>> {
        let FactAlgo::Def(table) = self else {
            return None;
        };
        let partition = table.get(&timestep)?;

        let enabled_set: HashSet<usize> = ins.enabled.iter().copied().collect();
        let filtered: Vec<&Vec<usize>> = partition
            .iter()
            .filter(|block| block.iter().any(|a| enabled_set.contains(a)))
            .collect();
        if filtered.len() < 2 {
            return None;
        }

        // Global id back to position in the instance to split.
        let agent_map: HashMap<usize, usize> = ins
            .enabled
            .iter()
            .enumerate()
            .map(|(local, &global)| (global, local))
            .collect();

        let mut sub_instances = Vec::with_capacity(filtered.len());
        for block in filtered {
            let members: Vec<usize> = block
                .iter()
                .copied()
                .filter(|a| agent_map.contains_key(a))
                .collect();
            let starts = members.iter().map(|g| c[agent_map[g]]).collect();
            let goals = members.iter().map(|g| ins.goals[agent_map[g]]).collect();
            let priority = members.iter().map(|g| priorities[agent_map[g]]).collect();
            info!("pushed new sub-instance with {} agents", members.len());
            sub_instances.push(Instance::new_sub(
                ins.graph.clone(),
                starts,
                goals,
                members,
                priority,
            ));
        }
        Some(sub_instances)
    }

    /// Projects the configuration, goals, enabled ids and priorities onto each
    /// partition, keeping global ids in `enabled`.
    fn split(
        &self,
        ins: &Instance,
        c: &Config,
        partitions: &Partitions,
        priorities: &[f32],
    ) -> Vec<Instance> {
        partitions
            .iter()
            .map(|agents| {
                let starts = agents.iter().map(|&j| c[j]).collect();
                let goals = agents.iter().map(|&j| ins.goals[j]).collect();
                let enabled = agents.iter().map(|&j| ins.enabled[j]).collect();
                let priority = agents.iter().map(|&j| priorities[j]).collect();
                info!("pushed new sub-instance with {} agents", agents.len());
                Instance::new_sub(ins.graph.clone(), starts, goals, enabled, priority)
            })
            .collect()
    }

    /// Pairwise predicate, true means provably separable.
    fn separable(
        &self,
        graph: &Graph,
        j1: usize,
        j2: usize,
        c: &Config,
        goals: &Config,
        astar: &[usize],
    ) -> bool {
        match self {
            FactAlgo::Distance => {
                let da = graph.manhattan(c[j1], c[j2]) as i64;
                let d1 = graph.manhattan(c[j1], goals[j1]) as i64;
                let d2 = graph.manhattan(c[j2], goals[j2]) as i64;
                da > d1 + d2 + SAFETY_DISTANCE
            }
            FactAlgo::Astar => {
                let da = graph.manhattan(c[j1], c[j2]) as i64;
                da > astar[j1] as i64 + astar[j2] as i64 + SAFETY_DISTANCE
            }
            FactAlgo::Bbox => {
                let (x1, y1) = coords_i64(graph, c[j1]);
                let (xg1, yg1) = coords_i64(graph, goals[j1]);
                let (x2, y2) = coords_i64(graph, c[j2]);
                let (xg2, yg2) = coords_i64(graph, goals[j2]);

                let (x1_min, x1_max) = (x1.min(xg1), x1.max(xg1));
                let (y1_min, y1_max) = (y1.min(yg1), y1.max(yg1));
                let (x2_min, x2_max) = (x2.min(xg2), x2.max(xg2));
                let (y2_min, y2_max) = (y2.min(yg2), y2.max(yg2));

                let d = (x1 - x2).abs() + (y1 - y2).abs();
                let overlap = !(x1_max < x2_min
                    || x2_max < x1_min
                    || y1_max < y2_min
                    || y2_max < y1_min);
                d > SAFETY_DISTANCE && !overlap
            }
            FactAlgo::Orient => {
                let p1 = coords_i64(graph, c[j1]);
                let g1 = coords_i64(graph, goals[j1]);
                let p2 = coords_i64(graph, c[j2]);
                let g2 = coords_i64(graph, goals[j2]);

                let da = (p1.0 - p2.0).abs() + (p1.1 - p2.1).abs();
                let dg = (g1.0 - g2.0).abs() + (g1.1 - g2.1).abs();
                if da < SAFETY_DISTANCE && dg < SAFETY_DISTANCE {
                    return false;
                }

                let not_intersecting = !segments_intersect(p1, g1, p2, g2);
                if SAFETY_DISTANCE != 0 {
                    return not_intersecting
                        && segments_min_distance(p1, g1, p2, g2) >= SAFETY_DISTANCE as f64;
                }
                not_intersecting
            }
            // The precomputed variant is consulted through is_factorizable_def.
            FactAlgo::Def(_) => false,
        }
    }
}

/// Records one accepted split for later replay.
pub fn record_partition(map: &mut PartitionsMap, timestep: usize, groups: Partitions) {
    map.entry(timestep).or_default().extend(groups);
}

pub fn write_partitions(path: &Path, map: &PartitionsMap) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut object = serde_json::Map::new();
    for (timestep, partitions) in map {
        if partitions.is_empty() {
            continue;
        }
        object.insert(timestep.to_string(), serde_json::json!(partitions));
    }
    let text = serde_json::to_string_pretty(&serde_json::Value::Object(object))?;
    fs::write(path, text)
        .with_context(|| format!("failed to write partition file {}", path.display()))?;
    Ok(())
}

fn coords_i64(graph: &Graph, v: usize) -> (i64, i64) {
    let (x, y) = graph.coords(v);
    (x as i64, y as i64)
}

type Point = (i64, i64);

/// Orientation of the ordered triple: 0 collinear, positive counterclockwise,
/// negative clockwise.
fn orientation(p: Point, q: Point, r: Point) -> i64 {
    let val = (q.1 - p.1) * (r.0 - q.0) - (q.0 - p.0) * (r.1 - q.1);
    -val.signum()
}

/// Whether q lies on the segment p-r, assuming the three are collinear.
fn on_segment(p: Point, q: Point, r: Point) -> bool {
    q.0 <= p.0.max(r.0) && q.0 >= p.0.min(r.0) && q.1 <= p.1.max(r.1) && q.1 >= p.1.min(r.1)
}

fn segments_intersect(p1: Point, q1: Point, p2: Point, q2: Point) -> bool {
    let o1 = orientation(p1, q1, p2);
    let o2 = orientation(p1, q1, q2);
    let o3 = orientation(p2, q2, p1);
    let o4 = orientation(p2, q2, q1);

    if o1 != o2 && o3 != o4 {
        return true;
    }

    // Collinear special cases.
    (o1 == 0 && on_segment(p1, p2, q1))
        || (o2 == 0 && on_segment(p1, q2, q1))
        || (o3 == 0 && on_segment(p2, p1, q2))
        || (o4 == 0 && on_segment(p2, q1, q2))
}

fn point_to_segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let (px, py) = (p.0 as f64, p.1 as f64);
    let (ax, ay) = (a.0 as f64, a.1 as f64);
    let (bx, by) = (b.0 as f64, b.1 as f64);

    let (abx, aby) = (bx - ax, by - ay);
    let (apx, apy) = (px - ax, py - ay);
    let denom = abx * abx + aby * aby;
    if denom == 0.0 {
        return (apx * apx + apy * apy).sqrt();
    }
    let t = (abx * apx + aby * apy) / denom;
    if t < 0.0 {
        ((px - ax).powi(2) + (py - ay).powi(2)).sqrt()
    } else if t > 1.0 {
        ((px - bx).powi(2) + (py - by).powi(2)).sqrt()
    } else {
        let (proj_x, proj_y) = (ax + t * abx, ay + t * aby);
        ((px - proj_x).powi(2) + (py - proj_y).powi(2)).sqrt()
    }
}

fn segments_min_distance(a1: Point, g1: Point, a2: Point, g2: Point) -> f64 {
    point_to_segment_distance(a1, a2, g2)
        .min(point_to_segment_distance(g1, a2, g2))
        .min(point_to_segment_distance(a2, a1, g1))
        .min(point_to_segment_distance(g2, a1, g1))
}
