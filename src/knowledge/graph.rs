//! Global concept co-occurrence graph.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::entities::KnowledgeEdge;

/// Relation label of global co-occurrence edges.
pub const CO_OCCURS: &str = "co_occurs";

/// Directed adjacency list shared by all sessions.
#[derive(Debug, Default, Clone)]
pub(crate) struct CooccurrenceGraph {
    adjacency: HashMap<String, Vec<KnowledgeEdge>>,
    edge_count: usize,
}

impl CooccurrenceGraph {
    /// Link every pair of `node_ids` in both directions.
    ///
    /// Returns the number of edges added.
    pub fn link_all(&mut self, node_ids: &[String], session_id: &str) -> usize {
        let mut added = 0;
        for (i, a) in node_ids.iter().enumerate() {
            for b in &node_ids[i + 1..] {
                if a == b {
                    continue;
                }
                self.add_edge(KnowledgeEdge::new(a, b, CO_OCCURS, 1.0, session_id));
                self.add_edge(KnowledgeEdge::new(b, a, CO_OCCURS, 1.0, session_id));
                added += 2;
            }
        }
        added
    }

    fn add_edge(&mut self, edge: KnowledgeEdge) {
        self.adjacency
            .entry(edge.source.clone())
            .or_default()
            .push(edge);
        self.edge_count += 1;
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn edges(&self) -> impl Iterator<Item = &KnowledgeEdge> {
        self.adjacency.values().flatten()
    }

    /// Ids reachable from `start` within `max_depth` hops, nearest first.
    ///
    /// `start` itself is not included. Neighbours are visited in edge
    /// insertion order so the result is deterministic.
    pub fn bfs(&self, start: &str, max_depth: usize) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&str, usize)> = VecDeque::new();
        let mut reached = Vec::new();

        visited.insert(start);
        queue.push_back((start, 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let Some(edges) = self.adjacency.get(current) else {
                continue;
            };
            for edge in edges {
                if visited.insert(edge.target.as_str()) {
                    reached.push(edge.target.clone());
                    queue.push_back((edge.target.as_str(), depth + 1));
                }
            }
        }

        reached
    }
}
