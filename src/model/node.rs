//! Node identity in the scene graph.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque node identifier.
///
/// The backend promises ids are never reused within a session, so a
/// `NodeId` doubles as the stable identity key for the instance cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of a node's header data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    /// Full name including namespace (`"rig:spine"`).
    pub name: String,
    /// Backend node kind (`"network"`, `"transform"`, ...).
    pub kind: String,
    /// Assigned at creation, survives renames and reparenting.
    pub uuid: Uuid,
    pub parent: Option<NodeId>,
    pub locked: bool,
}

impl NodeInfo {
    /// Name without any namespace qualifier.
    pub fn leaf_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    /// Namespace qualifier, if the name carries one.
    pub fn namespace(&self) -> Option<&str> {
        self.name.rsplit_once(':').map(|(ns, _)| ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_split() {
        let info = NodeInfo {
            id: NodeId(1),
            name: "rig:spine".into(),
            kind: "network".into(),
            uuid: Uuid::new_v4(),
            parent: None,
            locked: false,
        };
        assert_eq!(info.leaf_name(), "spine");
        assert_eq!(info.namespace(), Some("rig"));
    }

    #[test]
    fn test_plain_name() {
        let info = NodeInfo {
            id: NodeId(2),
            name: "spine".into(),
            kind: "network".into(),
            uuid: Uuid::new_v4(),
            parent: None,
            locked: false,
        };
        assert_eq!(info.leaf_name(), "spine");
        assert_eq!(info.namespace(), None);
    }
}
