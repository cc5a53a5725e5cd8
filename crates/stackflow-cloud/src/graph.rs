//! Resource dependency graph
//!
//! Edges point from a dependency to its dependent: `vpc -> subnet` means the
//! subnet is applied after the VPC and deleted before it.

use crate::error::{CloudError, Result};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use stackflow_core::{FlowError, StackInstance};
use std::collections::{BTreeSet, HashMap, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    graph: DiGraph<String, ()>,
    node_map: HashMap<String, NodeIndex>,
}

impl ResourceGraph {
    /// Graph of a stack instance, wired through references and `depends-on`
    pub fn build(instance: &StackInstance) -> Result<Self> {
        Self::from_dependencies(
            instance
                .nodes
                .iter()
                .map(|node| (node.name.clone(), node.dependencies())),
        )
    }

    /// Every dependency must name a node in the set
    pub fn from_dependencies<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, BTreeSet<String>)>,
    {
        Self::construct(entries, true)
    }

    /// Dependencies outside the set are ignored. Used for recorded state,
    /// where a dependency may already be gone.
    pub fn from_recorded<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, BTreeSet<String>)>,
    {
        Self::construct(entries, false)
    }

    fn construct<I>(entries: I, strict: bool) -> Result<Self>
    where
        I: IntoIterator<Item = (String, BTreeSet<String>)>,
    {
        let entries: Vec<_> = entries.into_iter().collect();
        let mut graph = Self::default();

        for (name, _) in &entries {
            if graph.node_map.contains_key(name) {
                return Err(FlowError::validation(name, "duplicate resource name").into());
            }
            let idx = graph.graph.add_node(name.clone());
            graph.node_map.insert(name.clone(), idx);
        }

        for (name, dependencies) in &entries {
            let to = graph.node_map[name];
            for dependency in dependencies {
                match graph.node_map.get(dependency) {
                    Some(&from) => {
                        graph.graph.add_edge(from, to, ());
                    }
                    None if strict => {
                        return Err(FlowError::validation(
                            name,
                            format!("depends on unknown resource '{dependency}'"),
                        )
                        .into());
                    }
                    None => {}
                }
            }
        }

        if let Some(cycle) = graph.find_cycle() {
            return Err(CloudError::CyclicDependency(cycle));
        }
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    fn sorted_names(&self, indices: impl Iterator<Item = NodeIndex>) -> Vec<String> {
        let mut names: Vec<_> = indices.map(|idx| self.graph[idx].clone()).collect();
        names.sort();
        names
    }

    /// Direct dependencies of a node
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        match self.node_map.get(name) {
            Some(&idx) => {
                self.sorted_names(self.graph.neighbors_directed(idx, Direction::Incoming))
            }
            None => Vec::new(),
        }
    }

    /// Direct dependents of a node
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        match self.node_map.get(name) {
            Some(&idx) => {
                self.sorted_names(self.graph.neighbors_directed(idx, Direction::Outgoing))
            }
            None => Vec::new(),
        }
    }

    /// Everything that transitively depends on `name`
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let Some(&start) = self.node_map.get(name) else {
            return seen;
        };

        let mut queue = VecDeque::from([start]);
        while let Some(idx) = queue.pop_front() {
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if seen.insert(self.graph[next].clone()) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Depth-first search for a cycle. Returns its path with the first node repeated at the end.
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        let mut starts: Vec<NodeIndex> = self.graph.node_indices().collect();
        starts.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));

        for start in starts {
            if marks[start.index()] != Mark::Unvisited {
                continue;
            }

            // Iterative DFS; each frame holds a node and its remaining successors
            let mut path: Vec<NodeIndex> = Vec::new();
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>)> = Vec::new();
            marks[start.index()] = Mark::InProgress;
            path.push(start);
            stack.push((start, self.successors_desc(start)));

            while let Some((_, remaining)) = stack.last_mut() {
                match remaining.pop() {
                    Some(next) => match marks[next.index()] {
                        Mark::InProgress => {
                            let from = path.iter().position(|&n| n == next).unwrap_or(0);
                            let mut cycle: Vec<String> =
                                path[from..].iter().map(|&n| self.graph[n].clone()).collect();
                            cycle.push(self.graph[next].clone());
                            return Some(cycle);
                        }
                        Mark::Unvisited => {
                            marks[next.index()] = Mark::InProgress;
                            path.push(next);
                            stack.push((next, self.successors_desc(next)));
                        }
                        Mark::Done => {}
                    },
                    None => {
                        if let Some((done, _)) = stack.pop() {
                            marks[done.index()] = Mark::Done;
                            path.pop();
                        }
                    }
                }
            }
        }
        None
    }

    /// Successors sorted descending so that popping visits them by name
    fn successors_desc(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut next: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        next.sort_by(|a, b| self.graph[*b].cmp(&self.graph[*a]));
        next.dedup();
        next
    }

    /// Kahn layering: each node lands one batch after its latest predecessor.
    /// Batch members are sorted by name.
    pub fn schedule(&self) -> Vec<Vec<String>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| self.graph.neighbors_directed(idx, Direction::Incoming).count())
            .collect();
        let mut level = vec![0usize; self.graph.node_count()];

        let mut queue: VecDeque<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .collect();

        let mut batches: Vec<Vec<String>> = Vec::new();
        while let Some(idx) = queue.pop_front() {
            let depth = level[idx.index()];
            if batches.len() <= depth {
                batches.resize_with(depth + 1, Vec::new);
            }
            batches[depth].push(self.graph[idx].clone());

            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                level[next.index()] = level[next.index()].max(depth + 1);
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    queue.push_back(next);
                }
            }
        }

        for batch in &mut batches {
            batch.sort();
        }
        batches
    }

    /// Batches for tearing down: dependents first
    pub fn deletion_batches(&self) -> Vec<Vec<String>> {
        let mut batches = self.schedule();
        batches.reverse();
        batches
    }
}
