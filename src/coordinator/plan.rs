//! Plans and their results
//!
//! A [`Plan`] is the unit written to the command log and applied by the
//! metadata state machine. A [`DataSet`] is what applying (or reading) a plan
//! returns. Both are closed: adding a plan means adding a match arm in
//! every place that handles one.

use crate::common::{ClusterDefaults, Error, PartialPath, Result};
use crate::coordinator::author::{AuthorPlan, PermissionInfo, Privilege};
use crate::coordinator::catalog::{validate_interval, validate_ttl, StorageGroupSchema};
use crate::coordinator::node_registry::{NodeId, NodeInfo, NodeLocation, NodeStatus};
use crate::coordinator::partition::{DataPartition, DataPartitionRequest, SchemaPartition};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plan {
    RegisterNode(NodeLocation),
    UpdateNodeStatus {
        node_id: NodeId,
        status: NodeStatus,
    },
    RemoveNode {
        node_id: NodeId,
    },
    QueryNodeInfo {
        /// `None` lists every node
        node_id: Option<NodeId>,
    },
    SetStorageGroup(StorageGroupSchema),
    DeleteStorageGroup {
        name: String,
    },
    SetTtl {
        name: String,
        ttl_ms: i64,
    },
    SetTimePartitionInterval {
        name: String,
        interval_ms: i64,
    },
    GetStorageGroupsSchema,
    GetSchemaPartition {
        patterns: Vec<PartialPath>,
    },
    GetOrCreateSchemaPartition {
        patterns: Vec<PartialPath>,
    },
    GetDataPartition {
        requests: Vec<DataPartitionRequest>,
    },
    GetOrCreateDataPartition {
        requests: Vec<DataPartitionRequest>,
    },
    Author(AuthorPlan),
    CheckUserPrivileges {
        user_name: String,
        paths: Vec<PartialPath>,
        privilege: Privilege,
    },
}

impl Plan {
    /// Stable name, used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Plan::RegisterNode(_) => "RegisterNode",
            Plan::UpdateNodeStatus { .. } => "UpdateNodeStatus",
            Plan::RemoveNode { .. } => "RemoveNode",
            Plan::QueryNodeInfo { .. } => "QueryNodeInfo",
            Plan::SetStorageGroup(_) => "SetStorageGroup",
            Plan::DeleteStorageGroup { .. } => "DeleteStorageGroup",
            Plan::SetTtl { .. } => "SetTTL",
            Plan::SetTimePartitionInterval { .. } => "SetTimePartitionInterval",
            Plan::GetStorageGroupsSchema => "GetStorageGroupsSchema",
            Plan::GetSchemaPartition { .. } => "GetSchemaPartition",
            Plan::GetOrCreateSchemaPartition { .. } => "GetOrCreateSchemaPartition",
            Plan::GetDataPartition { .. } => "GetDataPartition",
            Plan::GetOrCreateDataPartition { .. } => "GetOrCreateDataPartition",
            Plan::Author(p) if p.operation.is_query() => "QueryPermission",
            Plan::Author(_) => "OperatePermission",
            Plan::CheckUserPrivileges { .. } => "CheckUserPrivileges",
        }
    }

    /// Read plans are answered from local state and never logged.
    pub fn is_read_only(&self) -> bool {
        match self {
            Plan::QueryNodeInfo { .. }
            | Plan::GetStorageGroupsSchema
            | Plan::GetSchemaPartition { .. }
            | Plan::GetDataPartition { .. }
            | Plan::CheckUserPrivileges { .. } => true,
            Plan::Author(p) => p.operation.is_query(),
            Plan::RegisterNode(_)
            | Plan::UpdateNodeStatus { .. }
            | Plan::RemoveNode { .. }
            | Plan::SetStorageGroup(_)
            | Plan::DeleteStorageGroup { .. }
            | Plan::SetTtl { .. }
            | Plan::SetTimePartitionInterval { .. }
            | Plan::GetOrCreateSchemaPartition { .. }
            | Plan::GetOrCreateDataPartition { .. } => false,
        }
    }

    /// Structural checks that need no state. Failing plans never reach the log.
    pub fn validate(&self) -> Result<()> {
        match self {
            Plan::RegisterNode(location) => location.validate(),
            Plan::UpdateNodeStatus { .. }
            | Plan::RemoveNode { .. }
            | Plan::QueryNodeInfo { .. }
            | Plan::GetStorageGroupsSchema => Ok(()),
            Plan::SetStorageGroup(schema) => schema.validate(),
            Plan::DeleteStorageGroup { name } => validate_group_name(name),
            Plan::SetTtl { name, ttl_ms } => {
                validate_group_name(name)?;
                validate_ttl(*ttl_ms)
            }
            Plan::SetTimePartitionInterval { name, interval_ms } => {
                validate_group_name(name)?;
                validate_interval(*interval_ms)
            }
            Plan::GetSchemaPartition { patterns }
            | Plan::GetOrCreateSchemaPartition { patterns } => {
                if patterns.is_empty() {
                    return Err(Error::InvalidPlan("no path patterns given".into()));
                }
                Ok(())
            }
            Plan::GetDataPartition { requests } | Plan::GetOrCreateDataPartition { requests } => {
                if requests.is_empty() {
                    return Err(Error::InvalidPlan("no devices given".into()));
                }
                for req in requests {
                    if req.device.has_wildcard() {
                        return Err(Error::InvalidPlan(format!(
                            "device path may not contain wildcards: {}",
                            req.device
                        )));
                    }
                    if req.time_ranges.is_empty() {
                        return Err(Error::InvalidPlan(format!(
                            "no time ranges for device {}",
                            req.device
                        )));
                    }
                    if let Some(r) = req.time_ranges.iter().find(|r| r.start > r.end) {
                        return Err(Error::InvalidPlan(format!(
                            "time range start {} is after end {}",
                            r.start, r.end
                        )));
                    }
                }
                Ok(())
            }
            Plan::Author(plan) => plan.validate(),
            Plan::CheckUserPrivileges {
                user_name, paths, ..
            } => {
                if user_name.is_empty() {
                    return Err(Error::InvalidPlan("user name is empty".into()));
                }
                if paths.is_empty() {
                    return Err(Error::InvalidPlan("no paths given".into()));
                }
                Ok(())
            }
        }
    }
}

fn validate_group_name(name: &str) -> Result<()> {
    let path = PartialPath::parse_concrete(name)?;
    if path.len() < 2 {
        return Err(Error::InvalidPlan(format!(
            "storage group must sit below root: {}",
            name
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSet {
    /// Success with no payload
    Status,
    NodeRegistered {
        node_id: NodeId,
        status: NodeStatus,
        defaults: ClusterDefaults,
    },
    Nodes(Vec<NodeInfo>),
    StorageGroups(Vec<StorageGroupSchema>),
    SchemaPartition(SchemaPartition),
    DataPartition(DataPartition),
    Permissions(PermissionInfo),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::author::{AuthorOperation, AuthorRequest};
    use crate::coordinator::partition::TimeRange;
    use crate::common::auth::Sha256Encryptor;

    #[test]
    fn test_read_only_classification() {
        assert!(Plan::GetStorageGroupsSchema.is_read_only());
        assert!(!Plan::GetOrCreateSchemaPartition { patterns: vec![] }.is_read_only());

        let list = AuthorRequest {
            author_type: AuthorOperation::ListUser.code(),
            ..Default::default()
        }
        .into_plan(&Sha256Encryptor)
        .unwrap();
        let plan = Plan::Author(list);
        assert!(plan.is_read_only());
        assert_eq!(plan.kind(), "QueryPermission");
    }

    #[test]
    fn test_structural_validation() {
        assert!(Plan::SetTtl {
            name: "root.sg1".into(),
            ttl_ms: -5
        }
        .validate()
        .is_err());
        assert!(Plan::DeleteStorageGroup {
            name: "root".into()
        }
        .validate()
        .is_err());
        assert!(Plan::GetSchemaPartition { patterns: vec![] }.validate().is_err());

        let bad_range = Plan::GetOrCreateDataPartition {
            requests: vec![DataPartitionRequest {
                device: PartialPath::parse("root.sg1.d1").unwrap(),
                time_ranges: vec![TimeRange::new(10, 0)],
            }],
        };
        assert!(matches!(bad_range.validate(), Err(Error::InvalidPlan(_))));
    }

    #[test]
    fn test_plan_bincode_round_trip() {
        let plan = Plan::SetTimePartitionInterval {
            name: "root.sg1".into(),
            interval_ms: 1000,
        };
        let bytes = bincode::serialize(&plan).unwrap();
        let back: Plan = bincode::deserialize(&bytes).unwrap();
        assert_eq!(plan, back);
    }
}
