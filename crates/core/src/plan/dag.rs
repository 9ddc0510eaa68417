//! Dependency graph validation and round assignment.
//!
//! Rounds are longest-path levels: a node without dependencies sits in round
//! 1, every other node one round after its deepest dependency. Cycles are
//! found with a depth-first walk that keeps the current path, so the error
//! can name the nodes on the cycle.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::hash::Hash;
use thiserror::Error;

use crate::error::StoreError;

/// Anything that can sit in a dependency graph.
pub trait DagNode {
    type Key: Eq + Hash + Clone + Display;

    fn key(&self) -> Self::Key;
    fn dependencies(&self) -> &[Self::Key];
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    #[error("plan has no steps")]
    Empty,

    #[error("duplicate step id {0}")]
    DuplicateStep(String),

    #[error("step {0} depends on itself")]
    SelfDependency(String),

    #[error("step {step} depends on {dependency}, which is not part of the plan")]
    UnknownDependency { step: String, dependency: String },

    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

impl From<DagError> for StoreError {
    fn from(err: DagError) -> Self {
        StoreError::Validation(err.to_string())
    }
}

#[derive(Clone, Copy)]
enum Mark {
    Unvisited,
    InProgress,
    Done(u32),
}

/// Validate the graph and return each node's round, in input order.
pub fn assign_rounds<N: DagNode>(nodes: &[N]) -> Result<Vec<u32>, DagError> {
    if nodes.is_empty() {
        return Err(DagError::Empty);
    }

    let mut index = HashMap::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        if index.insert(node.key(), i).is_some() {
            return Err(DagError::DuplicateStep(node.key().to_string()));
        }
    }

    let mut edges = Vec::with_capacity(nodes.len());
    for node in nodes {
        let key = node.key();
        let mut deps = Vec::with_capacity(node.dependencies().len());
        for dep in node.dependencies() {
            if *dep == key {
                return Err(DagError::SelfDependency(key.to_string()));
            }
            let &d = index.get(dep).ok_or_else(|| DagError::UnknownDependency {
                step: key.to_string(),
                dependency: dep.to_string(),
            })?;
            deps.push(d);
        }
        edges.push(deps);
    }

    let mut marks = vec![Mark::Unvisited; nodes.len()];
    let mut rounds = Vec::with_capacity(nodes.len());
    for i in 0..nodes.len() {
        let round = visit(i, &edges, &mut marks).map_err(|cycle| {
            DagError::Cycle(cycle.into_iter().map(|n| nodes[n].key().to_string()).collect())
        })?;
        rounds.push(round);
    }
    Ok(rounds)
}

/// Returns the node's round, or the nodes of a cycle (first node repeated at the end).
///
/// The walk keeps its path on the heap, so chain length is not bounded by
/// the thread's stack.
fn visit(root: usize, edges: &[Vec<usize>], marks: &mut [Mark]) -> Result<u32, Vec<usize>> {
    if let Mark::Done(round) = marks[root] {
        return Ok(round);
    }

    // (node, next dependency to look at, round so far)
    let mut path: Vec<(usize, usize, u32)> = vec![(root, 0, 1)];
    marks[root] = Mark::InProgress;
    let mut root_round = 1;
    while let Some(&(node, next, round)) = path.last() {
        let top = path.len() - 1;
        match edges[node].get(next) {
            Some(&dep) => {
                path[top].1 += 1;
                match marks[dep] {
                    Mark::Done(dep_round) => path[top].2 = round.max(dep_round + 1),
                    Mark::InProgress => {
                        let start = path.iter().position(|f| f.0 == dep).unwrap_or(0);
                        let mut cycle: Vec<usize> = path[start..].iter().map(|f| f.0).collect();
                        cycle.push(dep);
                        return Err(cycle);
                    }
                    Mark::Unvisited => {
                        marks[dep] = Mark::InProgress;
                        path.push((dep, 0, 1));
                    }
                }
            }
            None => {
                marks[node] = Mark::Done(round);
                path.pop();
                match path.last_mut() {
                    Some(parent) => parent.2 = parent.2.max(round + 1),
                    None => root_round = round,
                }
            }
        }
    }
    Ok(root_round)
}

/// Every node that depends on `root`, directly or through other nodes.
pub fn transitive_dependents<N: DagNode>(nodes: &[N], root: &N::Key) -> HashSet<N::Key> {
    let mut reverse: HashMap<N::Key, Vec<N::Key>> = HashMap::new();
    for node in nodes {
        for dep in node.dependencies() {
            reverse.entry(dep.clone()).or_default().push(node.key());
        }
    }

    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([root.clone()]);
    while let Some(key) = queue.pop_front() {
        for child in reverse.get(&key).into_iter().flatten() {
            if seen.insert(child.clone()) {
                queue.push_back(child.clone());
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Node {
        key: &'static str,
        deps: Vec<&'static str>,
    }

    impl DagNode for Node {
        type Key = &'static str;

        fn key(&self) -> Self::Key {
            self.key
        }

        fn dependencies(&self) -> &[Self::Key] {
            &self.deps
        }
    }

    fn node(key: &'static str, deps: &[&'static str]) -> Node {
        Node {
            key,
            deps: deps.to_vec(),
        }
    }

    #[test]
    fn independent_roots_share_round_one() {
        let nodes = [node("a", &[]), node("b", &[]), node("c", &["a", "b"])];
        assert_eq!(assign_rounds(&nodes).unwrap(), vec![1, 1, 2]);
    }

    #[test]
    fn rounds_follow_longest_path() {
        // a -> b -> d and a -> d: d must wait for b.
        let nodes = [
            node("d", &["a", "b"]),
            node("b", &["a"]),
            node("a", &[]),
            node("e", &["a"]),
        ];
        assert_eq!(assign_rounds(&nodes).unwrap(), vec![3, 2, 1, 2]);
    }

    #[test]
    fn cycle_is_reported_with_its_members() {
        let nodes = [
            node("root", &[]),
            node("a", &["root", "c"]),
            node("b", &["a"]),
            node("c", &["b"]),
        ];
        match assign_rounds(&nodes).unwrap_err() {
            DagError::Cycle(cycle) => {
                assert_eq!(cycle.first(), cycle.last());
                for member in ["a", "b", "c"] {
                    assert!(cycle.iter().any(|k| k == member), "{cycle:?}");
                }
                assert!(!cycle.iter().any(|k| k == "root"));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn malformed_graphs_are_rejected() {
        let empty: [Node; 0] = [];
        assert_eq!(assign_rounds(&empty).unwrap_err(), DagError::Empty);
        assert_eq!(
            assign_rounds(&[node("a", &[]), node("a", &[])]).unwrap_err(),
            DagError::DuplicateStep("a".into())
        );
        assert_eq!(
            assign_rounds(&[node("a", &["a"])]).unwrap_err(),
            DagError::SelfDependency("a".into())
        );
        assert!(matches!(
            assign_rounds(&[node("a", &["ghost"])]).unwrap_err(),
            DagError::UnknownDependency { .. }
        ));
    }

    #[test]
    fn dependents_are_transitive() {
        let nodes = [
            node("a", &[]),
            node("b", &["a"]),
            node("c", &["b"]),
            node("d", &[]),
        ];
        let dependents = transitive_dependents(&nodes, &"a");
        assert_eq!(dependents, HashSet::from(["b", "c"]));
        assert!(transitive_dependents(&nodes, &"d").is_empty());
    }

    struct Link {
        key: usize,
        deps: Vec<usize>,
    }

    impl DagNode for Link {
        type Key = usize;

        fn key(&self) -> usize {
            self.key
        }

        fn dependencies(&self) -> &[usize] {
            &self.deps
        }
    }

    #[test]
    fn long_chains_fit_on_a_small_stack() {
        const LEN: usize = 200_000;
        let worker = std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(|| {
                // Listed leaf-first so the walk has to descend the whole chain.
                let chain: Vec<Link> = (0..LEN)
                    .rev()
                    .map(|key| Link {
                        key,
                        deps: if key == 0 { vec![] } else { vec![key - 1] },
                    })
                    .collect();
                let rounds = assign_rounds(&chain).unwrap();
                assert_eq!(rounds[0], LEN as u32);
                assert_eq!(rounds[LEN - 1], 1);

                let mut looped = chain;
                looped[LEN - 1].deps = vec![5];
                match assign_rounds(&looped).unwrap_err() {
                    DagError::Cycle(cycle) => assert_eq!(cycle.first(), cycle.last()),
                    other => panic!("expected cycle, got {other:?}"),
                }
            })
            .unwrap();
        worker.join().unwrap();
    }
}
