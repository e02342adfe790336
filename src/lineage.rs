//! Sample lineage traversal
//!
//! Samples form a forest through the nullable `parent_sample_id` column.
//! The store refuses self-parenting and parents are assigned only at
//! creation, so a cycle should be impossible; both walks still keep a
//! visited set and a depth cap and fail with `LineageCycle` instead of
//! looping on a corrupted store.

use std::collections::{HashSet, VecDeque};

use rusqlite::Connection;

use crate::db::models::Sample;
use crate::db::samples;
use crate::error::LabError;

/// A node that knows its parent
pub trait LineageNode {
    fn node_id(&self) -> &str;
    fn parent_id(&self) -> Option<&str>;
}

impl LineageNode for Sample {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        self.parent_sample_id.as_deref()
    }
}

/// Lookup access needed by the walks
pub trait LineageStore {
    type Node: LineageNode;

    fn node(&self, id: &str) -> Result<Self::Node, LabError>;

    fn children(&self, id: &str) -> Result<Vec<Self::Node>, LabError>;
}

/// Lineage over the samples table
pub struct SampleLineage<'a>(pub &'a Connection);

impl LineageStore for SampleLineage<'_> {
    type Node = Sample;

    fn node(&self, id: &str) -> Result<Sample, LabError> {
        samples::require_sample(self.0, id)
    }

    fn children(&self, id: &str) -> Result<Vec<Sample>, LabError> {
        samples::get_children(self.0, id)
    }
}

/// Chain from the root ancestor down to `id`, root first
pub fn ancestry<S: LineageStore>(
    store: &S,
    id: &str,
    max_depth: usize,
) -> Result<Vec<S::Node>, LabError> {
    let start = store.node(id)?;
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(start.node_id().to_string());

    let mut chain = vec![start];

    loop {
        let parent_id = match chain.last().and_then(|n| n.parent_id()) {
            Some(parent_id) => parent_id.to_string(),
            None => break,
        };

        if chain.len() > max_depth || !visited.insert(parent_id.clone()) {
            return Err(LabError::LineageCycle {
                sample_id: id.to_string(),
                depth: chain.len(),
            });
        }

        chain.push(store.node(&parent_id)?);
    }

    chain.reverse();
    Ok(chain)
}

/// Every transitive child of `id`, breadth-first by level
pub fn descendants<S: LineageStore>(
    store: &S,
    id: &str,
    max_depth: usize,
) -> Result<Vec<S::Node>, LabError> {
    let mut result = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(id.to_string());

    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    queue.push_back((id.to_string(), 0));

    while let Some((current, depth)) = queue.pop_front() {
        let children = store.children(&current)?;
        if children.is_empty() {
            continue;
        }
        if depth >= max_depth {
            return Err(LabError::LineageCycle {
                sample_id: id.to_string(),
                depth,
            });
        }

        for child in children {
            let child_id = child.node_id().to_string();
            if !visited.insert(child_id.clone()) {
                return Err(LabError::LineageCycle {
                    sample_id: id.to_string(),
                    depth: depth + 1,
                });
            }
            queue.push_back((child_id, depth + 1));
            result.push(child);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, Clone)]
    struct Node {
        id: String,
        parent: Option<String>,
    }

    impl LineageNode for Node {
        fn node_id(&self) -> &str {
            &self.id
        }

        fn parent_id(&self) -> Option<&str> {
            self.parent.as_deref()
        }
    }

    /// Arena of nodes keyed by id; children derived from parent links in
    /// insertion order
    struct Arena {
        nodes: HashMap<String, Node>,
        order: Vec<String>,
    }

    impl Arena {
        fn new(edges: &[(&str, Option<&str>)]) -> Self {
            let mut nodes = HashMap::new();
            let mut order = vec![];
            for (id, parent) in edges {
                nodes.insert(
                    id.to_string(),
                    Node {
                        id: id.to_string(),
                        parent: parent.map(str::to_string),
                    },
                );
                order.push(id.to_string());
            }
            Self { nodes, order }
        }
    }

    impl LineageStore for Arena {
        type Node = Node;

        fn node(&self, id: &str) -> Result<Node, LabError> {
            self.nodes
                .get(id)
                .cloned()
                .ok_or_else(|| LabError::not_found("Sample", id))
        }

        fn children(&self, id: &str) -> Result<Vec<Node>, LabError> {
            Ok(self
                .order
                .iter()
                .filter_map(|k| self.nodes.get(k))
                .filter(|n| n.parent.as_deref() == Some(id))
                .cloned()
                .collect())
        }
    }

    fn ids(nodes: &[Node]) -> Vec<&str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_ancestry_is_root_first() {
        let arena = Arena::new(&[("a", None), ("b", Some("a")), ("c", Some("b"))]);
        assert_eq!(ids(&ancestry(&arena, "c", 100).unwrap()), vec!["a", "b", "c"]);
        assert_eq!(ids(&ancestry(&arena, "a", 100).unwrap()), vec!["a"]);
    }

    #[test]
    fn test_descendants_breadth_first() {
        let arena = Arena::new(&[
            ("root", None),
            ("a", Some("root")),
            ("b", Some("root")),
            ("a1", Some("a")),
            ("b1", Some("b")),
            ("a1x", Some("a1")),
        ]);
        assert_eq!(
            ids(&descendants(&arena, "root", 100).unwrap()),
            vec!["a", "b", "a1", "b1", "a1x"]
        );
        assert!(descendants(&arena, "a1x", 100).unwrap().is_empty());
    }

    #[test]
    fn test_cycle_is_reported_not_followed() {
        let arena = Arena::new(&[("x", Some("z")), ("y", Some("x")), ("z", Some("y"))]);

        assert!(matches!(
            ancestry(&arena, "x", 100),
            Err(LabError::LineageCycle { .. })
        ));
        assert!(matches!(
            descendants(&arena, "x", 100),
            Err(LabError::LineageCycle { .. })
        ));
    }

    #[test]
    fn test_depth_cap_applies() {
        let arena = Arena::new(&[("a", None), ("b", Some("a")), ("c", Some("b")), ("d", Some("c"))]);

        assert!(ancestry(&arena, "d", 3).is_ok());
        assert!(matches!(
            ancestry(&arena, "d", 2),
            Err(LabError::LineageCycle { depth: 3, .. })
        ));
        assert!(matches!(
            descendants(&arena, "a", 2),
            Err(LabError::LineageCycle { depth: 2, .. })
        ));
    }

    #[test]
    fn test_missing_parent_is_not_found() {
        let arena = Arena::new(&[("orphan", Some("gone"))]);
        assert!(matches!(
            ancestry(&arena, "orphan", 10),
            Err(LabError::NotFound { .. })
        ));
    }
}
