use rand::Rng;

use super::node::LNode;
use super::Planner;
use crate::graph::VertexId;

impl<'a> Planner<'a> {
    /// Completes one joint successor configuration under the constraint
    /// prefix `l`, writing each agent's `v_next`. Returns false when the
    /// constraints conflict or PIBT cannot place every agent.
    pub(crate) fn get_new_config(&mut self, h: usize, l: &LNode) -> bool {
        // Reset the occupancy cache left over from the previous attempt.
        for i in 0..self.n {
            if let Some(v) = self.agents[i].v_now {
                if self.occupied_now[v] == Some(i) {
                    self.occupied_now[v] = None;
                }
            }
            if let Some(v) = self.agents[i].v_next.take() {
                self.occupied_next[v] = None;
            }
            let v_now = self.nodes[h].c[i];
            self.agents[i].v_now = Some(v_now);
            self.occupied_now[v_now] = Some(i);
        }

        // Pre-commit the constrained agents.
        for k in 0..l.depth {
            let i = l.who[k];
            let target = l.to[k];

            if self.occupied_next[target].is_some() {
                return false; // vertex conflict
            }
            let v_pre = self.nodes[h].c[i];
            if let (Some(a), Some(b)) = (self.occupied_next[v_pre], self.occupied_now[target]) {
                if a == b {
                    return false; // swap conflict
                }
            }

            self.agents[i].v_next = Some(target);
            self.occupied_next[target] = Some(i);
        }

        // Let PIBT fill in everyone else, highest priority first.
        for k in 0..self.n {
            let i = self.nodes[h].order[k];
            if self.agents[i].v_next.is_none() && !self.pibt(i) {
                return false;
            }
        }

        self.infos.actions_count += self.n;
        self.infos.actions_count_active += (0..self.n)
            .filter(|&i| self.agents[i].v_next != self.agents[i].v_now)
            .count();
        true
    }

    /// One step of priority inheritance with backtracking for agent i.
    /// On success `v_next` is a neighbor of `v_now` or `v_now` itself; on
    /// failure the agent is pinned to `v_now` and false propagates to the
    /// inheriting caller.
    pub(crate) fn pibt(&mut self, i: usize) -> bool {
        self.infos.pibt_calls += 1;
        let ins = self.ins;
        let v_now = self.agents[i].v_now.expect("agent placed before pibt");
        if self.d(i, v_now) != 0 {
            self.infos.pibt_calls_active += 1;
        }

        let neighbors = ins.graph.neighbors(v_now);
        let degree = neighbors.len();
        self.cand[i].clear();
        self.cand[i].extend_from_slice(neighbors);
        self.cand[i].push(v_now);

        // Fresh random tie-breakers for the move candidates.
        if let Some(rng) = self.rng.as_mut() {
            for k in 0..degree {
                let u = self.cand[i][k];
                self.tie_breakers[u] = rng.gen();
            }
        }

        let mut keyed: Vec<(VertexId, f32)> = self.cand[i]
            .iter()
            .map(|&u| (u, self.d(i, u) as f32 + self.tie_breakers[u]))
            .collect();
        keyed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        for (slot, (u, _)) in keyed.into_iter().enumerate() {
            self.cand[i][slot] = u;
        }

        // A pending swap flips the preference so the worst move goes first,
        // clearing the way for the partner.
        let swap_agent = self.swap_possible_and_required(i);
        if swap_agent.is_some() {
            self.cand[i].reverse();
        }

        for k in 0..self.cand[i].len() {
            let u = self.cand[i][k];

            if self.occupied_next[u].is_some() {
                continue; // vertex conflict
            }
            let ak = self.occupied_now[u];
            if let Some(ak) = ak {
                if self.agents[ak].v_next == Some(v_now) {
                    continue; // swap conflict
                }
            }

            self.occupied_next[u] = Some(i);
            self.agents[i].v_next = Some(u);

            // Priority inheritance: the displaced agent plans next. Its
            // failure handler re-reserves its own cell, so the stale
            // reservation above is always overwritten.
            if let Some(ak) = ak {
                if ak != i && self.agents[ak].v_next.is_none() && !self.pibt(ak) {
                    continue;
                }
            }

            if k == 0 {
                if let Some(partner) = swap_agent {
                    if self.agents[partner].v_next.is_none()
                        && self.occupied_next[v_now].is_none()
                    {
                        self.agents[partner].v_next = Some(v_now);
                        self.occupied_next[v_now] = Some(partner);
                    }
                }
            }
            return true;
        }

        // No vertex could be secured, stay put.
        self.occupied_next[v_now] = Some(i);
        self.agents[i].v_next = Some(v_now);
        false
    }

    /// Detects the swap pattern: either agent i needs to pull the occupant of
    /// its preferred vertex through itself, or a neighbor needs agent i to
    /// clear the way.
    fn swap_possible_and_required(&self, i: usize) -> Option<usize> {
        let ins = self.ins;
        let v_now = self.agents[i].v_now.unwrap();
        let best = self.cand[i][0];
        if best == v_now {
            return None;
        }

        if let Some(aj) = self.occupied_now[best] {
            let v_aj = self.agents[aj].v_now.unwrap();
            if self.agents[aj].v_next.is_none()
                && self.is_swap_required(i, aj, v_now, v_aj)
                && self.is_swap_possible(v_aj, v_now)
            {
                return Some(aj);
            }
        }

        // Clear operation: a stuck neighbor pulls agent i out of the way.
        for &u in ins.graph.neighbors(v_now) {
            let Some(ak) = self.occupied_now[u] else {
                continue;
            };
            if best == self.agents[ak].v_now.unwrap() {
                continue;
            }
            if self.is_swap_required(ak, i, v_now, best) && self.is_swap_possible(best, v_now) {
                return Some(ak);
            }
        }

        None
    }

    /// Walks the puller's side of the corridor away from the pusher while the
    /// pull direction keeps the pusher closer to its goal. Dead-end neighbors
    /// holding an agent already at a degree-one goal do not count as escape
    /// room.
    fn is_swap_required(
        &self,
        pusher: usize,
        puller: usize,
        v_pusher_origin: VertexId,
        v_puller_origin: VertexId,
    ) -> bool {
        let ins = self.ins;
        let mut v_pusher = v_pusher_origin;
        let mut v_puller = v_puller_origin;
        let mut tmp = None;

        while self.d(pusher, v_puller) < self.d(pusher, v_pusher) {
            let neighbors = ins.graph.neighbors(v_puller);
            let mut room = neighbors.len();
            for &u in neighbors {
                let occupant = self.occupied_now[u];
                if u == v_pusher
                    || (ins.graph.neighbors(u).len() == 1
                        && occupant.is_some_and(|a| ins.goals[a] == u))
                {
                    room -= 1;
                } else {
                    tmp = Some(u);
                }
            }
            if room >= 2 {
                return false; // enough room to dodge, no swap needed
            }
            if room == 0 {
                break;
            }
            v_pusher = v_puller;
            v_puller = tmp.expect("one pullable neighbor remains");
        }

        self.d(puller, v_pusher) < self.d(puller, v_puller)
            && (self.d(pusher, v_pusher) == 0
                || self.d(pusher, v_puller) < self.d(pusher, v_pusher))
    }

    /// Same walk, checking that the corridor reaches a branching cell before
    /// wrapping back to the pusher's origin.
    fn is_swap_possible(&self, v_pusher_origin: VertexId, v_puller_origin: VertexId) -> bool {
        let ins = self.ins;
        let mut v_pusher = v_pusher_origin;
        let mut v_puller = v_puller_origin;
        let mut tmp = None;

        while v_puller != v_pusher_origin {
            let neighbors = ins.graph.neighbors(v_puller);
            let mut room = neighbors.len();
            for &u in neighbors {
                let occupant = self.occupied_now[u];
                if u == v_pusher
                    || (ins.graph.neighbors(u).len() == 1
                        && occupant.is_some_and(|a| ins.goals[a] == u))
                {
                    room -= 1;
                } else {
                    tmp = Some(u);
                }
            }
            if room >= 2 {
                return true;
            }
            if room == 0 {
                return false;
            }
            v_pusher = v_puller;
            v_puller = tmp.expect("one pullable neighbor remains");
        }
        false
    }
}
