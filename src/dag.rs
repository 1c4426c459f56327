//! Directed action graph: topological sort, cycle detection, and bounded traversal
//! over a user-selected goal set.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{OrchestratorError, Result};

/// Forward/reverse adjacency over action ids. Edges and duplicate edges are both
/// tolerated; a duplicate edge costs one extra counter increment, applied the same
/// way in both the topological sort and traversal counters.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    children: HashMap<String, Vec<String>>,
    parents: HashMap<String, Vec<String>>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &str) {
        self.children.entry(id.to_string()).or_default();
        self.parents.entry(id.to_string()).or_default();
    }

    pub fn add_edge(&mut self, parent: &str, child: &str) {
        self.add_node(parent);
        self.add_node(child);
        self.children.get_mut(parent).unwrap().push(child.to_string());
        self.parents.get_mut(child).unwrap().push(parent.to_string());
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    pub fn parents_of(&self, id: &str) -> &[String] {
        self.parents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn children_of(&self, id: &str) -> &[String] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Kahn's algorithm. On success, returns every node in topological order. On
    /// failure (a cycle), returns the set of nodes whose in-degree never reached
    /// zero.
    pub fn topological_sort(&self) -> std::result::Result<Vec<String>, Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self
            .children
            .keys()
            .map(|id| (id.as_str(), self.parents_of(id).len()))
            .collect();

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| *id)
            .collect();
        // Deterministic order makes the traversal reproducible across runs.
        let mut queue: Vec<&str> = queue.drain(..).collect();
        queue.sort_unstable();
        let mut queue: VecDeque<&str> = queue.into();

        let mut order = Vec::with_capacity(self.children.len());
        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            let mut newly_ready: Vec<&str> = Vec::new();
            for child in self.children_of(id) {
                let deg = in_degree.get_mut(child.as_str()).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    newly_ready.push(child.as_str());
                }
            }
            newly_ready.sort_unstable();
            queue.extend(newly_ready);
        }

        if order.len() == self.children.len() {
            Ok(order)
        } else {
            let ordered: HashSet<&str> = order.iter().map(String::as_str).collect();
            let residual = self
                .children
                .keys()
                .filter(|id| !ordered.contains(id.as_str()))
                .cloned()
                .collect();
            Err(residual)
        }
    }

    /// Convenience wrapper raising [`OrchestratorError::Cycle`] when the graph is
    /// not a DAG.
    pub fn check_acyclic(&self) -> Result<()> {
        self.topological_sort()
            .map(|_| ())
            .map_err(|nodes| OrchestratorError::Cycle { nodes })
    }

    /// Ancestor closure of `goals`, returned in dependency (ancestors-first) order,
    /// with each node appearing once (its *earliest*-needed occurrence is dropped in
    /// favor of latest, since a node reachable via two goal paths only needs to be
    /// listed where it is last still gated correctly).
    pub fn traversal_to(&self, goals: &[String]) -> Vec<String> {
        let mut layers: Vec<Vec<String>> = Vec::new();
        let mut frontier: Vec<String> = goals.to_vec();
        let mut seen_at_any_layer: HashSet<String> = HashSet::new();

        while !frontier.is_empty() {
            layers.push(frontier.clone());
            for n in &frontier {
                seen_at_any_layer.insert(n.clone());
            }
            let mut next: Vec<String> = Vec::new();
            let mut next_seen: HashSet<String> = HashSet::new();
            for node in &frontier {
                for parent in self.parents_of(node) {
                    if next_seen.insert(parent.clone()) {
                        next.push(parent.clone());
                    }
                }
            }
            frontier = next;
        }

        // Layers are goal-first (layer 0 = goals). Keep each node's *last* layer
        // (furthest from the goals, i.e. earliest ancestor) so it isn't gated by a
        // counter computed against a layer that will never actually run it.
        let mut last_layer: HashMap<String, usize> = HashMap::new();
        for (i, layer) in layers.iter().enumerate() {
            for node in layer {
                last_layer.insert(node.clone(), i);
            }
        }

        // Emit in ancestors-first (topological) order: reverse layer index order,
        // deduplicated by the retained layer.
        let max_layer = layers.len();
        let mut by_layer: Vec<Vec<String>> = vec![Vec::new(); max_layer];
        for (node, layer) in &last_layer {
            by_layer[*layer].push(node.clone());
        }
        let mut out = Vec::new();
        for layer in by_layer.into_iter().rev() {
            let mut layer = layer;
            layer.sort_unstable();
            out.extend(layer);
        }
        out
    }

    /// Pending-parent counters for every node in the traversal closure of `goals`,
    /// counting only parents that are themselves part of the closure. Parents
    /// outside the traversal must never gate a node: they are not going to run as
    /// part of this invocation, so waiting on them would deadlock the scheduler.
    pub fn traversal_list(&self, goals: &[String]) -> HashMap<String, usize> {
        let nodes = self.traversal_to(goals);
        let in_set: HashSet<&str> = nodes.iter().map(String::as_str).collect();
        nodes
            .into_iter()
            .map(|id| {
                let count = self
                    .parents_of(&id)
                    .iter()
                    .filter(|p| in_set.contains(p.as_str()))
                    .count();
                (id, count)
            })
            .collect()
    }

    /// Removes and returns every node whose pending-parent counter is zero.
    pub fn ready_nodes(list: &mut HashMap<String, usize>) -> Vec<String> {
        let ready: Vec<String> = list
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ready {
            list.remove(id);
        }
        ready
    }

    /// Decrements the counter of every downstream child still present in `list`.
    pub fn node_complete(&self, id: &str, list: &mut HashMap<String, usize>) {
        for child in self.children_of(id) {
            if let Some(count) = list.get_mut(child) {
                *count = count.saturating_sub(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> Dag {
        let mut d = Dag::new();
        d.add_edge("a", "b");
        d.add_edge("b", "c");
        d
    }

    #[test]
    fn topological_sort_orders_dependencies_first() {
        let order = linear().topological_sort().unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn detects_cycle() {
        let mut d = Dag::new();
        d.add_edge("a", "b");
        d.add_edge("b", "a");
        let err = d.check_acyclic().unwrap_err();
        assert!(matches!(err, OrchestratorError::Cycle { .. }));
    }

    #[test]
    fn traversal_excludes_unrelated_branches() {
        let mut d = Dag::new();
        d.add_edge("a", "b");
        d.add_edge("x", "y"); // unrelated branch
        let closure = d.traversal_to(&["b".to_string()]);
        assert_eq!(closure, vec!["a", "b"]);
    }

    #[test]
    fn traversal_counters_ignore_parents_outside_the_set() {
        // c depends on both a (outside the goal closure) and b (inside it).
        let mut d = Dag::new();
        d.add_edge("a", "c");
        d.add_edge("b", "c");
        let list = d.traversal_list(&["c".to_string(), "b".to_string()]);
        // "a" is not in the traversal (goal is just b -> c), so c's counter must
        // only count b, not a.
        assert_eq!(list.get("c"), Some(&1));
    }

    #[test]
    fn ready_and_complete_drain_the_list() {
        let d = linear();
        let mut list = d.traversal_list(&["c".to_string()]);
        let ready = Dag::ready_nodes(&mut list);
        assert_eq!(ready, vec!["a".to_string()]);
        d.node_complete("a", &mut list);
        let ready = Dag::ready_nodes(&mut list);
        assert_eq!(ready, vec!["b".to_string()]);
        d.node_complete("b", &mut list);
        let ready = Dag::ready_nodes(&mut list);
        assert_eq!(ready, vec!["c".to_string()]);
        assert!(list.is_empty());
    }

    #[test]
    fn empty_goals_yield_empty_traversal() {
        let d = linear();
        assert!(d.traversal_to(&[]).is_empty());
        assert!(d.traversal_list(&[]).is_empty());
    }
}
