//! Plug addressing: one attribute location on one node.
//!
//! A plug names the root attribute plus a walk into array elements and
//! compound children, e.g. `translate[2].1` is element 2, child 1. Plugs
//! are the unit of read/write and of connection endpoints.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::NodeId;

/// One step below a root attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlugStep {
    /// Logical (sparse) array index.
    Element(u32),
    /// Compound child by declaration order.
    Child(usize),
}

/// Resolved location of an attribute on a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlugPath {
    pub node: NodeId,
    pub attr: String,
    pub steps: SmallVec<[PlugStep; 2]>,
}

impl PlugPath {
    /// Plug at the root of an attribute.
    pub fn root(node: NodeId, attr: impl Into<String>) -> Self {
        Self { node, attr: attr.into(), steps: SmallVec::new() }
    }

    /// Descend into a logical array element.
    pub fn element(&self, index: u32) -> Self {
        let mut p = self.clone();
        p.steps.push(PlugStep::Element(index));
        p
    }

    /// Descend into a compound child.
    pub fn child(&self, index: usize) -> Self {
        let mut p = self.clone();
        p.steps.push(PlugStep::Child(index));
        p
    }

    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    /// True when `other` is this plug or lies underneath it.
    pub fn contains(&self, other: &PlugPath) -> bool {
        self.node == other.node
            && self.attr == other.attr
            && other.steps.len() >= self.steps.len()
            && self.steps.iter().zip(other.steps.iter()).all(|(a, b)| a == b)
    }
}

impl std::fmt::Display for PlugPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.node, self.attr)?;
        for step in &self.steps {
            match step {
                PlugStep::Element(i) => write!(f, "[{i}]")?,
                PlugStep::Child(i) => write!(f, ".{i}")?,
            }
        }
        Ok(())
    }
}

/// Connection direction relative to a plug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Edges where the plug is the source.
    Outgoing,
    /// Edges where the plug is the destination.
    Incoming,
    Both,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plug_display() {
        let p = PlugPath::root(NodeId(7), "link").element(3);
        assert_eq!(p.to_string(), "7.link[3]");
        let q = PlugPath::root(NodeId(7), "offset").child(1);
        assert_eq!(q.to_string(), "7.offset.1");
    }

    #[test]
    fn test_contains() {
        let root = PlugPath::root(NodeId(1), "link");
        let elem = root.element(0);
        assert!(root.contains(&elem));
        assert!(root.contains(&root));
        assert!(!elem.contains(&root));
        assert!(!root.contains(&PlugPath::root(NodeId(1), "other")));
    }
}
