use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::debug;

/// Dense id of a passable cell, assigned in row-major order.
pub type VertexId = usize;

/// One vertex per agent, a joint placement at a single timestep.
pub type Config = Vec<VertexId>;

#[derive(Debug, Clone)]
pub struct Vertex {
    pub id: VertexId,
    /// Grid index, `width * y + x`.
    pub index: usize,
    /// Adjacent passable cells, in left/right/up/down order.
    pub neighbors: Vec<VertexId>,
}

/// Immutable 4-connected grid graph. Built once from a map file and shared
/// read-only by every component.
#[derive(Debug)]
pub struct Graph {
    pub width: usize,
    pub height: usize,
    /// Passable vertices with dense ids 0..V-1.
    pub vertices: Vec<Vertex>,
    /// `width * height` slots mapping grid index to vertex id, `None` at obstacles.
    pub cells: Vec<Option<VertexId>>,
}

impl Graph {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read map file {}", path.display()))?;
        Self::from_map_str(&text)
    }

    pub fn from_map_str(text: &str) -> Result<Self> {
        let mut lines = text.lines().map(|line| line.trim_end_matches('\r'));

        let mut height = 0;
        let mut width = 0;
        for line in lines.by_ref() {
            if let Some(value) = line.strip_prefix("height ") {
                height = value.trim().parse::<usize>().context("invalid height line")?;
            } else if let Some(value) = line.strip_prefix("width ") {
                width = value.trim().parse::<usize>().context("invalid width line")?;
            } else if line == "map" {
                break;
            }
        }
        if width == 0 || height == 0 {
            bail!("map header must declare non-zero width and height before 'map'");
        }

        let mut cells: Vec<Option<VertexId>> = vec![None; width * height];
        let mut vertices: Vec<Vertex> = Vec::new();

        for (y, row) in lines.take(height).enumerate() {
            for (x, s) in row.chars().take(width).enumerate() {
                if s == 'T' || s == '@' {
                    continue; // obstacle
                }
                let index = width * y + x;
                let id = vertices.len();
                vertices.push(Vertex {
                    id,
                    index,
                    neighbors: Vec::new(),
                });
                cells[index] = Some(id);
            }
        }

        // Edges in left/right/up/down order. The order is load-bearing for
        // deterministic candidate enumeration downstream.
        for y in 0..height {
            for x in 0..width {
                let Some(v) = cells[width * y + x] else {
                    continue;
                };
                let mut neighbors = Vec::with_capacity(4);
                if x > 0 {
                    if let Some(u) = cells[width * y + (x - 1)] {
                        neighbors.push(u);
                    }
                }
                if x < width - 1 {
                    if let Some(u) = cells[width * y + (x + 1)] {
                        neighbors.push(u);
                    }
                }
                if y < height - 1 {
                    if let Some(u) = cells[width * (y + 1) + x] {
                        neighbors.push(u);
                    }
                }
                if y > 0 {
                    if let Some(u) = cells[width * (y - 1) + x] {
                        neighbors.push(u);
                    }
                }
                vertices[v].neighbors = neighbors;
            }
        }

        debug!("loaded graph: width {width}, height {height}, {} vertices", vertices.len());
        Ok(Graph {
            width,
            height,
            vertices,
            cells,
        })
    }

    pub fn size(&self) -> usize {
        self.vertices.len()
    }

    /// Vertex id at grid coordinates, `None` out of bounds or at obstacles.
    pub fn vertex_at(&self, x: usize, y: usize) -> Option<VertexId> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.cells[self.width * y + x]
    }

    pub fn neighbors(&self, v: VertexId) -> &[VertexId] {
        &self.vertices[v].neighbors
    }

    /// Grid coordinates (x, y) of a vertex.
    pub fn coords(&self, v: VertexId) -> (usize, usize) {
        let index = self.vertices[v].index;
        (index % self.width, index / self.width)
    }

    pub fn manhattan(&self, v: VertexId, u: VertexId) -> usize {
        let (x1, y1) = self.coords(v);
        let (x2, y2) = self.coords(u);
        x1.abs_diff(x2) + y1.abs_diff(y2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = "type octile\n\
                       height 3\n\
                       width 4\n\
                       map\n\
                       ....\n\
                       .@@.\n\
                       ....\n";

    #[test]
    fn test_load_map() {
        let g = Graph::from_map_str(MAP).unwrap();
        assert_eq!(g.width, 4);
        assert_eq!(g.height, 3);
        assert_eq!(g.size(), 10);

        assert!(g.vertex_at(0, 0).is_some());
        assert!(g.vertex_at(1, 1).is_none());
        assert!(g.vertex_at(2, 1).is_none());
        assert!(g.vertex_at(4, 0).is_none());
    }

    #[test]
    fn test_adjacency_is_symmetric() {
        let g = Graph::from_map_str(MAP).unwrap();
        for v in &g.vertices {
            for &u in &v.neighbors {
                assert!(
                    g.vertices[u].neighbors.contains(&v.id),
                    "edge ({}, {}) has no reverse edge",
                    v.id,
                    u
                );
            }
        }
    }

    #[test]
    fn test_neighbors_skip_obstacles() {
        let g = Graph::from_map_str(MAP).unwrap();
        let corner = g.vertex_at(0, 0).unwrap();
        assert_eq!(g.neighbors(corner).len(), 2);

        // (1, 0) sits above the obstacle at (1, 1).
        let above = g.vertex_at(1, 0).unwrap();
        assert_eq!(g.neighbors(above).len(), 2);
    }

    #[test]
    fn test_configs_key_by_vertex_ids() {
        use std::collections::HashMap;
        let g = Graph::from_map_str(MAP).unwrap();
        let a: Config = vec![g.vertex_at(0, 0).unwrap(), g.vertex_at(3, 2).unwrap()];
        let b: Config = vec![g.vertex_at(0, 0).unwrap(), g.vertex_at(3, 2).unwrap()];
        let c: Config = vec![g.vertex_at(3, 2).unwrap(), g.vertex_at(0, 0).unwrap()];
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut explored: HashMap<Config, usize> = HashMap::new();
        explored.insert(a, 0);
        assert_eq!(explored.get(&b), Some(&0));
        assert_eq!(explored.get(&c), None);
    }

    #[test]
    fn test_coords_roundtrip() {
        let g = Graph::from_map_str(MAP).unwrap();
        let v = g.vertex_at(3, 2).unwrap();
        assert_eq!(g.coords(v), (3, 2));
        assert_eq!(g.manhattan(g.vertex_at(0, 0).unwrap(), v), 5);
    }
}
