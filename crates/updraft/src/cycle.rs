//! Cycle data and normalization.

use std::fmt;

use ahash::HashSet;

use crate::key::NodeKey;

/// A single dependency cycle, together with the path from the reporting node
/// into it.
///
/// For any reporting node, either the node heads `path_to_cycle`, or - when
/// the node itself is part of the cycle - `path_to_cycle` is empty and the
/// cycle starts with the node.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CycleInfo {
    path_to_cycle: Vec<NodeKey>,
    cycle: Vec<NodeKey>,
}

impl CycleInfo {
    pub(crate) fn new(path_to_cycle: Vec<NodeKey>, cycle: Vec<NodeKey>) -> Self {
        debug_assert!(!cycle.is_empty());
        Self {
            path_to_cycle,
            cycle,
        }
    }

    /// The ordered keys forming the loop.
    pub fn cycle(&self) -> &[NodeKey] {
        &self.cycle
    }

    /// The ordered prefix from the reporting node to the cycle's head. Empty
    /// when the reporting node is in the cycle.
    pub fn path_to_cycle(&self) -> &[NodeKey] {
        &self.path_to_cycle
    }

    // A known cycle reached at one of its interior nodes: shift the cycle so
    // that node heads it.
    fn rotated(&self, start: usize) -> Self {
        let mut cycle = Vec::with_capacity(self.cycle.len());
        cycle.extend_from_slice(&self.cycle[start..]);
        cycle.extend_from_slice(&self.cycle[..start]);
        Self {
            path_to_cycle: Vec::new(),
            cycle,
        }
    }

    /// Normalize this cycle for a node about to report it.
    ///
    /// If `node` is part of the cycle, the cycle is rotated so `node` heads
    /// it - unless the cycle was reached through a non-empty path, in which
    /// case the report is a roundabout duplicate of one reachable directly
    /// and is dropped (`None`). Example, with `c` depending back on `top`:
    ///
    /// ```text
    ///          top
    ///         /  ^
    ///        a   |
    ///       / \ /
    ///      b-> c
    /// ```
    ///
    /// The traversal from `top` visits `a`, then `c`, then `top` again,
    /// yielding the cycle `{top,a,c}`. Visiting `b` then yields
    /// `([b], {top,a,c})`, and when `a` assembles its own reports the copy
    /// through `b` is redundant with the direct one.
    ///
    /// If `node` is not part of the cycle, it is prepended to the path.
    fn normalized_for(&self, node: &NodeKey) -> Option<Self> {
        if let Some(index) = self.cycle.iter().position(|k| k == node) {
            if !self.path_to_cycle.is_empty() {
                return None;
            }
            return Some(self.rotated(index));
        }
        let mut path = Vec::with_capacity(self.path_to_cycle.len() + 1);
        path.push(node.clone());
        path.extend_from_slice(&self.path_to_cycle);
        Some(Self {
            path_to_cycle: path,
            cycle: self.cycle.clone(),
        })
    }

    /// Normalize the cycles a node collected through one child.
    ///
    /// Removes multiple paths to the same cycle through that child, so a node
    /// never reports the same cycle twice via the same first step. A node may
    /// still report one cycle several times, each through a different child.
    pub(crate) fn prepare_for(node: &NodeKey, cycles: &[CycleInfo]) -> Vec<CycleInfo> {
        let mut seen: HashSet<Vec<NodeKey>> = HashSet::default();
        cycles
            .iter()
            .filter_map(|c| c.normalized_for(node))
            .filter(|c| seen.insert(c.cycle.clone()))
            .collect()
    }
}

impl fmt::Debug for CycleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} -> {:?}", self.path_to_cycle, self.cycle)
    }
}
