//! Node registry
//!
//! Tracks every storage node that has registered with the cluster, the status
//! reported for it by the heartbeat detector, and how many region groups of
//! each kind it hosts. The load counters are committed state: they are only
//! changed by the apply path, together with the allocation that causes them.

use crate::common::{Error, Result};
use crate::coordinator::partition::RegionKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type NodeId = u32;

/// Network endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Endpoints a storage node declares when registering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLocation {
    /// Client-facing RPC
    pub external_endpoint: Endpoint,
    /// Coordinator ↔ node RPC; identifies the node
    pub internal_endpoint: Endpoint,
    /// Query data exchange
    pub data_exchange_endpoint: Endpoint,
    /// Region replication
    pub consensus_endpoint: Endpoint,
}

impl NodeLocation {
    /// Structural check, run before a registration reaches the log
    pub fn validate(&self) -> Result<()> {
        for (name, ep) in [
            ("external", &self.external_endpoint),
            ("internal", &self.internal_endpoint),
            ("data exchange", &self.data_exchange_endpoint),
            ("consensus", &self.consensus_endpoint),
        ] {
            if ep.ip.trim().is_empty() {
                return Err(Error::InvalidPlan(format!("{} endpoint has no address", name)));
            }
            if ep.port == 0 {
                return Err(Error::InvalidPlan(format!("{} endpoint has port 0", name)));
            }
        }
        Ok(())
    }
}

/// Status recorded for a node. Detection is external; the registry only
/// stores what it is told.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Registering,
    Running,
    Unknown,
    Removing,
}

impl NodeStatus {
    /// Eligible to receive new region groups?
    pub fn can_allocate(&self) -> bool {
        matches!(self, NodeStatus::Running)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Registering => write!(f, "registering"),
            NodeStatus::Running => write!(f, "running"),
            NodeStatus::Unknown => write!(f, "unknown"),
            NodeStatus::Removing => write!(f, "removing"),
        }
    }
}

/// Registry record for one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: NodeId,
    pub location: NodeLocation,
    pub status: NodeStatus,
    pub schema_region_count: u32,
    pub data_region_count: u32,
}

impl NodeInfo {
    pub fn load(&self, kind: RegionKind) -> u32 {
        match kind {
            RegionKind::Schema => self.schema_region_count,
            RegionKind::Data => self.data_region_count,
        }
    }

    pub fn hosts_regions(&self) -> bool {
        self.schema_region_count > 0 || self.data_region_count > 0
    }

    fn load_mut(&mut self, kind: RegionKind) -> &mut u32 {
        match kind {
            RegionKind::Schema => &mut self.schema_region_count,
            RegionKind::Data => &mut self.data_region_count,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeRegistry {
    nodes: BTreeMap<NodeId, NodeInfo>,
    /// Never decreases, so removed ids are never handed out again
    next_node_id: NodeId,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node, or return the id it already holds.
    ///
    /// Returns the id and whether a new record was created.
    pub fn register(&mut self, location: &NodeLocation) -> Result<(NodeId, bool)> {
        if let Some(existing) = self
            .nodes
            .values()
            .find(|n| n.location.internal_endpoint == location.internal_endpoint)
        {
            if existing.location == *location {
                return Ok((existing.node_id, false));
            }
            return Err(Error::AlreadyExists(format!(
                "internal endpoint {} is registered to node {} with different endpoints",
                location.internal_endpoint, existing.node_id
            )));
        }

        let node_id = self.next_node_id;
        self.next_node_id = self
            .next_node_id
            .checked_add(1)
            .ok_or_else(|| Error::Internal("node id space exhausted".into()))?;
        self.nodes.insert(
            node_id,
            NodeInfo {
                node_id,
                location: location.clone(),
                status: NodeStatus::Registering,
                schema_region_count: 0,
                data_region_count: 0,
            },
        );
        Ok((node_id, true))
    }

    pub fn get(&self, node_id: NodeId) -> Option<&NodeInfo> {
        self.nodes.get(&node_id)
    }

    /// Snapshot of one node (`Some`) or all nodes (`None`), ordered by id
    pub fn query(&self, node_id: Option<NodeId>) -> Vec<NodeInfo> {
        match node_id {
            Some(id) => self.nodes.get(&id).cloned().into_iter().collect(),
            None => self.nodes.values().cloned().collect(),
        }
    }

    /// Returns the previous status
    pub fn update_status(&mut self, node_id: NodeId, status: NodeStatus) -> Result<NodeStatus> {
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| Error::NotFound(format!("node {}", node_id)))?;
        Ok(std::mem::replace(&mut node.status, status))
    }

    /// Drop a node that is being removed and hosts nothing
    pub fn remove(&mut self, node_id: NodeId) -> Result<NodeInfo> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or_else(|| Error::NotFound(format!("node {}", node_id)))?;
        if node.status != NodeStatus::Removing {
            return Err(Error::InvalidPlan(format!(
                "node {} is {}, mark it removing first",
                node_id, node.status
            )));
        }
        if node.hosts_regions() {
            return Err(Error::NodeInUse(node_id));
        }
        self.nodes
            .remove(&node_id)
            .ok_or_else(|| Error::NotFound(format!("node {}", node_id)))
    }

    /// Nodes eligible for new region groups
    pub fn allocatable(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.values().filter(|n| n.status.can_allocate())
    }

    pub fn acquire(&mut self, node_id: NodeId, kind: RegionKind) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| Error::Internal(format!("replica on unknown node {}", node_id)))?;
        *node.load_mut(kind) += 1;
        Ok(())
    }

    pub fn release(&mut self, node_id: NodeId, kind: RegionKind) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| Error::Internal(format!("replica on unknown node {}", node_id)))?;
        let load = node.load_mut(kind);
        *load = load.checked_sub(1).ok_or_else(|| {
            Error::Internal(format!("{:?} load underflow on node {}", kind, node_id))
        })?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn mock_location(port: u16) -> NodeLocation {
    NodeLocation {
        external_endpoint: Endpoint::new("127.0.0.1", port),
        internal_endpoint: Endpoint::new("127.0.0.1", port + 1),
        data_exchange_endpoint: Endpoint::new("127.0.0.1", port + 2),
        consensus_endpoint: Endpoint::new("127.0.0.1", port + 3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = NodeRegistry::new();
        let (a, created) = registry.register(&mock_location(6667)).unwrap();
        assert!(created);
        let (b, created) = registry.register(&mock_location(6667)).unwrap();
        assert!(!created);
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_conflicting_endpoints() {
        let mut registry = NodeRegistry::new();
        registry.register(&mock_location(6667)).unwrap();
        let mut other = mock_location(6667);
        other.consensus_endpoint.port = 9999;
        assert!(matches!(
            registry.register(&other),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_ids_never_reused() {
        let mut registry = NodeRegistry::new();
        let (a, _) = registry.register(&mock_location(6000)).unwrap();
        registry.update_status(a, NodeStatus::Removing).unwrap();
        registry.remove(a).unwrap();
        let (b, _) = registry.register(&mock_location(6000)).unwrap();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_remove_requires_removing_and_empty() {
        let mut registry = NodeRegistry::new();
        let (id, _) = registry.register(&mock_location(6000)).unwrap();
        assert!(matches!(registry.remove(id), Err(Error::InvalidPlan(_))));

        registry.update_status(id, NodeStatus::Removing).unwrap();
        registry.acquire(id, RegionKind::Data).unwrap();
        assert!(matches!(registry.remove(id), Err(Error::NodeInUse(_))));

        registry.release(id, RegionKind::Data).unwrap();
        assert!(registry.remove(id).is_ok());
        assert!(registry.query(Some(id)).is_empty());
    }

    #[test]
    fn test_release_underflow() {
        let mut registry = NodeRegistry::new();
        let (id, _) = registry.register(&mock_location(6000)).unwrap();
        assert!(matches!(
            registry.release(id, RegionKind::Schema),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_location_validation() {
        assert!(mock_location(6000).validate().is_ok());
        let mut bad = mock_location(6000);
        bad.internal_endpoint.port = 0;
        assert!(bad.validate().is_err());
        let mut bad = mock_location(6000);
        bad.external_endpoint.ip = " ".into();
        assert!(bad.validate().is_err());
    }
}
