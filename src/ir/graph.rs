//! Call dependency graph derived from a workflow.
//!
//! Nodes are call ids in call order and an edge `a -> b` means call `b` reads
//! an output of call `a`. The graph is rebuilt from the IR whenever it is
//! asked for, so it never goes stale after the IR is edited.
//!
//! Ordering results (topological order, parallel groups, cycles) are stable
//! with respect to the order calls were declared in.

use super::workflow::Workflow;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Summary numbers for a dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub total_calls: usize,
    pub total_dependencies: usize,
    pub has_cycles: bool,
    pub parallel_groups: usize,
    pub critical_path_length: usize,
    pub max_parallelism: usize,
}

/// Directed graph over call ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyGraph {
    /// node -> direct upstream nodes
    upstream: IndexMap<String, IndexSet<String>>,
    /// node -> direct downstream nodes
    downstream: IndexMap<String, IndexSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for `workflow`. References to names that are not
    /// call ids (workflow inputs, scatter variables) produce no edge.
    pub fn from_workflow(workflow: &Workflow) -> Self {
        let mut graph = Self::new();
        for call in &workflow.calls {
            graph.add_node(&call.call_id);
        }
        for call in &workflow.calls {
            for dep in call.upstream_calls() {
                if graph.contains(&dep) {
                    graph.add_edge(&dep, &call.call_id);
                }
            }
        }
        graph
    }

    pub fn add_node(&mut self, id: &str) {
        self.upstream.entry(id.to_string()).or_default();
        self.downstream.entry(id.to_string()).or_default();
    }

    /// Add `from -> to`, creating either node if needed.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.add_node(from);
        self.add_node(to);
        if let Some(ups) = self.upstream.get_mut(to) {
            ups.insert(from.to_string());
        }
        if let Some(downs) = self.downstream.get_mut(from) {
            downs.insert(to.to_string());
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.upstream.contains_key(id)
    }

    pub fn nodes(&self) -> Vec<String> {
        self.upstream.keys().cloned().collect()
    }

    /// Edges as `(from, to)` pairs, grouped by source node.
    pub fn edges(&self) -> Vec<(String, String)> {
        self.downstream
            .iter()
            .flat_map(|(from, tos)| tos.iter().map(move |to| (from.clone(), to.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.upstream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstream.is_empty()
    }

    /// Direct upstream calls of `id`.
    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        self.upstream
            .get(id)
            .map(|ups| ups.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Direct downstream calls of `id`.
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.downstream
            .get(id)
            .map(|downs| downs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every call `id` transitively depends on, in node order.
    pub fn ancestors(&self, id: &str) -> Vec<String> {
        self.reachable(id, &self.upstream)
    }

    /// Every call that transitively depends on `id`, in node order.
    pub fn descendants(&self, id: &str) -> Vec<String> {
        self.reachable(id, &self.downstream)
    }

    fn reachable(&self, id: &str, adjacency: &IndexMap<String, IndexSet<String>>) -> Vec<String> {
        let mut seen: IndexSet<&str> = IndexSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        if let Some(next) = adjacency.get(id) {
            queue.extend(next.iter().map(String::as_str));
        }
        while let Some(node) = queue.pop_front() {
            if seen.insert(node) {
                if let Some(next) = adjacency.get(node) {
                    queue.extend(next.iter().map(String::as_str));
                }
            }
        }
        // a node on a cycle reaches itself; that is not an ancestor
        self.upstream
            .keys()
            .filter(|n| n.as_str() != id && seen.contains(n.as_str()))
            .cloned()
            .collect()
    }

    /// Kahn layering: each wave holds the nodes whose upstream nodes are all
    /// in earlier waves. Nodes on or behind a cycle are left out.
    fn waves(&self) -> Vec<Vec<String>> {
        let mut remaining: IndexMap<&str, usize> = self
            .upstream
            .iter()
            .map(|(id, ups)| (id.as_str(), ups.len()))
            .collect();
        let mut waves = Vec::new();
        loop {
            let wave: Vec<&str> = remaining
                .iter()
                .filter(|(_, deg)| **deg == 0)
                .map(|(id, _)| *id)
                .collect();
            if wave.is_empty() {
                break;
            }
            for id in &wave {
                remaining.shift_remove(id);
                if let Some(downs) = self.downstream.get(*id) {
                    for n in downs {
                        if let Some(deg) = remaining.get_mut(n.as_str()) {
                            *deg -= 1;
                        }
                    }
                }
            }
            waves.push(wave.into_iter().map(String::from).collect());
        }
        waves
    }

    /// A dependency-respecting order of all calls, or `None` when the graph
    /// has a cycle. Ties are broken by call order.
    pub fn topological_order(&self) -> Option<Vec<String>> {
        let mut in_degree: IndexMap<&str, usize> = self
            .upstream
            .iter()
            .map(|(id, ups)| (id.as_str(), ups.len()))
            .collect();
        let mut order = Vec::with_capacity(self.len());
        loop {
            let next = in_degree.iter().find(|(_, deg)| **deg == 0).map(|(id, _)| *id);
            let Some(id) = next else { break };
            in_degree.shift_remove(id);
            if let Some(downs) = self.downstream.get(id) {
                for n in downs {
                    if let Some(deg) = in_degree.get_mut(n.as_str()) {
                        *deg -= 1;
                    }
                }
            }
            order.push(id.to_string());
        }
        if order.len() == self.len() {
            Some(order)
        } else {
            None
        }
    }

    pub fn has_cycles(&self) -> bool {
        self.topological_order().is_none()
    }

    /// One entry per strongly connected component that contains a cycle,
    /// including self-loops. Members and components are in call order.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut tarjan = Tarjan::new(self);
        for node in self.upstream.keys() {
            if !tarjan.index.contains_key(node.as_str()) {
                tarjan.visit(node);
            }
        }

        let position = |id: &str| self.upstream.get_index_of(id).unwrap_or(usize::MAX);
        let mut cycles: Vec<Vec<String>> = tarjan
            .components
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .map(|id| self.dependencies_of(id).contains(id))
                        .unwrap_or(false)
            })
            .map(|mut component| {
                component.sort_by_key(|id| position(id));
                component
            })
            .collect();
        cycles.sort_by_key(|component| component.first().map(|id| position(id)));
        cycles
    }

    /// Groups of calls that can run concurrently, in execution order.
    /// Calls on or downstream of a cycle appear in no group.
    pub fn parallel_groups(&self) -> Vec<Vec<String>> {
        self.waves()
    }

    /// The longest dependency chain. Empty when the graph has a cycle.
    pub fn critical_path(&self) -> Vec<String> {
        let Some(order) = self.topological_order() else {
            return Vec::new();
        };
        // longest chain ending at each node, with its predecessor on that chain
        let mut best: IndexMap<&str, (usize, Option<&str>)> = IndexMap::new();
        for id in &order {
            let mut entry = (1, None);
            for dep in self.upstream.get(id.as_str()).into_iter().flatten() {
                if let Some((len, _)) = best.get(dep.as_str()) {
                    if len + 1 > entry.0 {
                        entry = (len + 1, Some(dep.as_str()));
                    }
                }
            }
            best.insert(id.as_str(), entry);
        }

        let mut end: Option<(&str, usize)> = None;
        for (id, (len, _)) in &best {
            if end.map(|(_, l)| *len > l).unwrap_or(true) {
                end = Some((*id, *len));
            }
        }

        let mut path = Vec::new();
        let mut cursor = end.map(|(id, _)| id);
        while let Some(id) = cursor {
            path.push(id.to_string());
            cursor = best.get(id).and_then(|(_, prev)| *prev);
        }
        path.reverse();
        path
    }

    pub fn statistics(&self) -> GraphStatistics {
        let groups = self.parallel_groups();
        GraphStatistics {
            total_calls: self.len(),
            total_dependencies: self.edges().len(),
            has_cycles: !self.find_cycles().is_empty(),
            parallel_groups: groups.len(),
            critical_path_length: self.critical_path().len(),
            max_parallelism: groups.iter().map(Vec::len).max().unwrap_or(0),
        }
    }
}

/// Tarjan's strongly connected components, recursive over downstream edges.
struct Tarjan<'g> {
    graph: &'g DependencyGraph,
    counter: usize,
    index: IndexMap<&'g str, usize>,
    lowlink: IndexMap<&'g str, usize>,
    stack: Vec<&'g str>,
    on_stack: IndexSet<&'g str>,
    components: Vec<Vec<String>>,
}

impl<'g> Tarjan<'g> {
    fn new(graph: &'g DependencyGraph) -> Self {
        Self {
            graph,
            counter: 0,
            index: IndexMap::new(),
            lowlink: IndexMap::new(),
            stack: Vec::new(),
            on_stack: IndexSet::new(),
            components: Vec::new(),
        }
    }

    fn visit(&mut self, node: &'g str) {
        self.index.insert(node, self.counter);
        self.lowlink.insert(node, self.counter);
        self.counter += 1;
        self.stack.push(node);
        self.on_stack.insert(node);

        let graph = self.graph;
        for next in graph.downstream.get(node).into_iter().flatten() {
            let next = next.as_str();
            if !self.index.contains_key(next) {
                self.visit(next);
                let low = self.lowlink[next].min(self.lowlink[node]);
                self.lowlink.insert(node, low);
            } else if self.on_stack.contains(next) {
                let low = self.index[next].min(self.lowlink[node]);
                self.lowlink.insert(node, low);
            }
        }

        if self.lowlink[node] == self.index[node] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.shift_remove(member);
                component.push(member.to_string());
                if member == node {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Binding, WorkflowCall};

    /// Calls with space-separated upstream ids.
    fn chain(calls: &[(&str, &str)]) -> Workflow {
        let mut wf = Workflow::new("wf");
        for (id, deps) in calls {
            let mut call = WorkflowCall::new(*id, "t");
            for (i, dep) in deps.split_whitespace().enumerate() {
                call = call.with_input(format!("in{}", i), Binding::expression(format!("{}.out", dep)));
            }
            wf.add_call(call);
        }
        wf
    }

    #[test]
    fn test_edges_from_references() {
        let mut wf = chain(&[("align", ""), ("sort", "align")]);
        wf.add_call(
            WorkflowCall::new("call_vars", "t")
                .with_input("bam", Binding::expression("sort.bam"))
                .with_input("ref", Binding::expression("reference"))
                .with_input("label", Binding::literal("align.out")),
        );
        let graph = wf.dependency_graph();
        assert_eq!(graph.nodes(), vec!["align", "sort", "call_vars"]);
        assert_eq!(
            graph.edges(),
            vec![
                ("align".to_string(), "sort".to_string()),
                ("sort".to_string(), "call_vars".to_string())
            ]
        );
        assert_eq!(graph.dependencies_of("call_vars"), vec!["sort"]);
        assert!(graph.dependencies_of("missing").is_empty());
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let wf = chain(&[("a", ""), ("b", "a"), ("c", "b"), ("d", "")]);
        let graph = wf.dependency_graph();
        assert_eq!(graph.ancestors("c"), vec!["a", "b"]);
        assert_eq!(graph.descendants("a"), vec!["b", "c"]);
        assert!(graph.ancestors("d").is_empty());
        assert!(graph.descendants("unknown").is_empty());
    }

    #[test]
    fn test_topological_order_is_stable() {
        // declared out of dependency order
        let wf = chain(&[("merge", "left right"), ("left", ""), ("right", "")]);
        let graph = wf.dependency_graph();
        assert_eq!(
            graph.topological_order(),
            Some(vec!["left".to_string(), "right".to_string(), "merge".to_string()])
        );
    }

    #[test]
    fn test_two_call_cycle() {
        let wf = chain(&[("A", "B"), ("B", "A")]);
        let graph = wf.dependency_graph();
        assert_eq!(graph.find_cycles(), vec![vec!["A".to_string(), "B".to_string()]]);
        assert_eq!(graph.topological_order(), None);
        assert!(graph.critical_path().is_empty());
        assert!(graph.parallel_groups().is_empty());
        assert!(graph.has_cycles());
    }

    #[test]
    fn test_self_loop_and_separate_cycles() {
        let wf = chain(&[
            ("solo", "solo"),
            ("x", "z"),
            ("y", "x"),
            ("z", "y"),
            ("free", ""),
        ]);
        let cycles = wf.dependency_graph().find_cycles();
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0], vec!["solo"]);
        assert_eq!(cycles[1], vec!["x", "y", "z"]);
    }

    #[test]
    fn test_parallel_groups() {
        let wf = chain(&[
            ("split", ""),
            ("left", "split"),
            ("right", "split"),
            ("qc", ""),
            ("merge", "left right"),
        ]);
        let groups = wf.dependency_graph().parallel_groups();
        assert_eq!(
            groups,
            vec![
                vec!["split".to_string(), "qc".to_string()],
                vec!["left".to_string(), "right".to_string()],
                vec!["merge".to_string()],
            ]
        );
    }

    #[test]
    fn test_critical_path() {
        let wf = chain(&[
            ("a", ""),
            ("b", "a"),
            ("side", "a"),
            ("c", "b"),
            ("d", "c side"),
        ]);
        assert_eq!(wf.dependency_graph().critical_path(), vec!["a", "b", "c", "d"]);
        assert!(DependencyGraph::new().critical_path().is_empty());
    }

    #[test]
    fn test_statistics() {
        let wf = chain(&[("a", ""), ("b", "a"), ("c", "a")]);
        let stats = wf.dependency_graph().statistics();
        assert_eq!(
            stats,
            GraphStatistics {
                total_calls: 3,
                total_dependencies: 2,
                has_cycles: false,
                parallel_groups: 2,
                critical_path_length: 2,
                max_parallelism: 2,
            }
        );
    }
}
