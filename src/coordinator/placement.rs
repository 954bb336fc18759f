//! Replica placement for new region groups
//!
//! Least-loaded selection: among nodes that can take new regions, prefer the
//! ones hosting the fewest region groups of the same kind, breaking ties by
//! the lowest node id. No randomness and no hashing, so the same committed
//! state always produces the same replica set on every replica.

use crate::common::{Error, Result};
use crate::coordinator::node_registry::{NodeId, NodeInfo};
use crate::coordinator::partition::RegionKind;

/// Pick `factor` nodes for a new region group of `kind`.
pub fn select_replica_set<'a>(
    candidates: impl IntoIterator<Item = &'a NodeInfo>,
    kind: RegionKind,
    factor: usize,
) -> Result<Vec<NodeId>> {
    if factor == 0 {
        return Err(Error::Internal("replication factor 0 reached placement".into()));
    }

    let mut ranked: Vec<(u32, NodeId)> = candidates
        .into_iter()
        .filter(|n| n.status.can_allocate())
        .map(|n| (n.load(kind), n.node_id))
        .collect();

    if ranked.len() < factor {
        return Err(Error::InsufficientNodes {
            needed: factor,
            available: ranked.len(),
        });
    }

    ranked.sort_unstable();
    let mut selected: Vec<NodeId> = ranked.into_iter().take(factor).map(|(_, id)| id).collect();
    selected.sort_unstable();
    Ok(selected)
}
