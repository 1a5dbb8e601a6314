use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::graph::{Config, Graph, VertexId};

struct AgentState {
    /// Hop-count from the agent's goal, `v_size` until computed.
    table: Vec<usize>,
    /// Resumable BFS frontier.
    open: VecDeque<VertexId>,
}

/// Lazy reverse-BFS distances from each goal, one table per agent of the top
/// instance. Built once per solve and shared by every worker; each agent's
/// `(table, frontier)` pair sits behind its own lock so `get` is linearisable
/// without serialising queries across agents.
pub struct DistTable {
    graph: Arc<Graph>,
    v_size: usize,
    agents: Vec<Mutex<AgentState>>,
}

impl DistTable {
    pub fn new(graph: Arc<Graph>, goals: &Config) -> Self {
        let v_size = graph.size();
        let agents = goals
            .iter()
            .map(|&goal| {
                let mut table = vec![v_size; v_size];
                table[goal] = 0;
                Mutex::new(AgentState {
                    table,
                    open: VecDeque::from([goal]),
                })
            })
            .collect();
        DistTable {
            graph,
            v_size,
            agents,
        }
    }

    /// Shortest-path hop-count from agent i's goal to v, or `v_size` when v
    /// is unreachable. Resumes the paused BFS on a miss, O(1) afterwards.
    pub fn get(&self, i: usize, v: VertexId) -> usize {
        let mut state = self.agents[i].lock().unwrap();
        if state.table[v] < self.v_size {
            return state.table[v];
        }

        // Lazy BFS, c.f. Reverse Resumable A*. Plain BFS beats RRA* here
        // because every edge has unit cost.
        while let Some(n) = state.open.pop_front() {
            let d_n = state.table[n];
            for &m in self.graph.neighbors(n) {
                if d_n + 1 >= state.table[m] {
                    continue;
                }
                state.table[m] = d_n + 1;
                state.open.push_back(m);
            }
            if n == v {
                return d_n;
            }
        }
        self.v_size
    }

    pub fn v_size(&self) -> usize {
        self.v_size
    }
}
