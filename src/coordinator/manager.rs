//! Metadata coordinator
//!
//! Single entry point for every metadata operation. Requests are turned into
//! fully specified plans here (defaults merged, passwords encrypted, author
//! codes decoded) so that nothing replica-local leaks into the log, then
//! handed to the consensus gateway.

use crate::common::{
    encryptor_for, AuditEventType, AuditLogger, ClusterDefaults, Config, Error, MetricsRegistry,
    PartialPath, PasswordEncryptor, Result,
};
use crate::coordinator::author::{AuthorRequest, PermissionInfo, Privilege};
use crate::coordinator::catalog::{StorageGroupRequest, StorageGroupSchema};
use crate::coordinator::node_registry::{NodeId, NodeInfo, NodeLocation, NodeStatus};
use crate::coordinator::partition::{DataPartition, DataPartitionRequest, SchemaPartition};
use crate::coordinator::plan::{DataSet, Plan};
use crate::coordinator::raft_node::ConsensusGateway;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reply to a node registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub defaults: ClusterDefaults,
}

/// Snapshot served by `/admin/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub node_id: String,
    pub is_leader: bool,
    pub leader: Option<String>,
    pub applied_index: u64,
    pub nodes: usize,
    pub storage_groups: usize,
    pub region_groups: usize,
    pub uptime_seconds: u64,
}

pub struct MetadataCoordinator<G: ConsensusGateway> {
    node_id: String,
    gateway: Arc<G>,
    encryptor: Arc<dyn PasswordEncryptor>,
    metrics: MetricsRegistry,
    audit: AuditLogger,
}

impl<G: ConsensusGateway> MetadataCoordinator<G> {
    pub fn new(gateway: Arc<G>, config: &Config) -> Result<Self> {
        let audit = match &config.coordinator.audit_log {
            Some(path) => AuditLogger::open(path)?,
            None => AuditLogger::disabled(),
        };
        Ok(Self {
            node_id: config.coordinator.node_id.clone(),
            gateway,
            encryptor: encryptor_for(config.security.password_encryptor),
            metrics: MetricsRegistry::new(),
            audit,
        })
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Validate a plan and route it through the gateway.
    pub async fn submit(&self, plan: Plan) -> Result<DataSet> {
        let kind = plan.kind();
        if let Err(e) = plan.validate() {
            tracing::warn!("{} rejected before consensus: {}", kind, e);
            self.metrics.rejected_before_consensus.inc();
            return Err(e);
        }

        let read_only = plan.is_read_only();
        let start = Instant::now();
        let result = self.gateway.submit(plan).await;
        self.metrics
            .record_plan(kind, start.elapsed(), result.is_ok());

        if !read_only {
            self.refresh_gauges().await;
        }
        result
    }

    pub async fn register_node(&self, location: NodeLocation) -> Result<NodeRegistration> {
        let endpoint = location.internal_endpoint.to_string();
        match self.submit(Plan::RegisterNode(location)).await? {
            DataSet::NodeRegistered {
                node_id,
                status,
                defaults,
            } => {
                self.audit.log_event(
                    AuditEventType::NodeRegistered,
                    &self.node_id,
                    Some(endpoint),
                    format!("node {} registered", node_id),
                );
                Ok(NodeRegistration {
                    node_id,
                    status,
                    defaults,
                })
            }
            other => Err(unexpected("RegisterNode", &other)),
        }
    }

    pub async fn update_node_status(&self, node_id: NodeId, status: NodeStatus) -> Result<()> {
        self.submit(Plan::UpdateNodeStatus { node_id, status })
            .await
            .map(drop)
    }

    pub async fn remove_node(&self, node_id: NodeId) -> Result<()> {
        self.submit(Plan::RemoveNode { node_id }).await?;
        self.audit.log_event(
            AuditEventType::NodeRemoved,
            &self.node_id,
            Some(node_id.to_string()),
            "node removed",
        );
        Ok(())
    }

    pub async fn query_node_info(&self, node_id: Option<NodeId>) -> Result<Vec<NodeInfo>> {
        match self.submit(Plan::QueryNodeInfo { node_id }).await? {
            DataSet::Nodes(nodes) => Ok(nodes),
            other => Err(unexpected("QueryNodeInfo", &other)),
        }
    }

    /// Create a storage group; omitted fields take the cluster defaults.
    pub async fn set_storage_group(&self, req: StorageGroupRequest) -> Result<()> {
        let defaults = self.gateway.read(|s| s.defaults().clone()).await;
        let schema = match StorageGroupSchema::from_request(&req, &defaults) {
            Ok(schema) => schema,
            Err(e) => {
                self.metrics.rejected_before_consensus.inc();
                return Err(e);
            }
        };
        let name = schema.name.to_string();
        self.submit(Plan::SetStorageGroup(schema)).await?;
        self.audit.log_event(
            AuditEventType::StorageGroupCreated,
            &self.node_id,
            Some(name),
            "storage group created",
        );
        Ok(())
    }

    pub async fn delete_storage_group(&self, name: &str) -> Result<()> {
        self.submit(Plan::DeleteStorageGroup {
            name: name.to_string(),
        })
        .await?;
        self.audit.log_event(
            AuditEventType::StorageGroupDeleted,
            &self.node_id,
            Some(name.to_string()),
            "storage group deleted",
        );
        Ok(())
    }

    pub async fn set_ttl(&self, name: &str, ttl_ms: i64) -> Result<()> {
        self.submit(Plan::SetTtl {
            name: name.to_string(),
            ttl_ms,
        })
        .await
        .map(drop)
    }

    pub async fn set_time_partition_interval(&self, name: &str, interval_ms: i64) -> Result<()> {
        self.submit(Plan::SetTimePartitionInterval {
            name: name.to_string(),
            interval_ms,
        })
        .await
        .map(drop)
    }

    pub async fn get_storage_groups_schema(&self) -> Result<Vec<StorageGroupSchema>> {
        match self.submit(Plan::GetStorageGroupsSchema).await? {
            DataSet::StorageGroups(groups) => Ok(groups),
            other => Err(unexpected("GetStorageGroupsSchema", &other)),
        }
    }

    pub async fn get_schema_partition(&self, patterns: &[String]) -> Result<SchemaPartition> {
        let patterns = self.parse_patterns(patterns)?;
        match self.submit(Plan::GetSchemaPartition { patterns }).await? {
            DataSet::SchemaPartition(p) => Ok(p),
            other => Err(unexpected("GetSchemaPartition", &other)),
        }
    }

    pub async fn get_or_create_schema_partition(
        &self,
        patterns: &[String],
    ) -> Result<SchemaPartition> {
        let patterns = self.parse_patterns(patterns)?;
        match self
            .submit(Plan::GetOrCreateSchemaPartition { patterns })
            .await?
        {
            DataSet::SchemaPartition(p) => Ok(p),
            other => Err(unexpected("GetOrCreateSchemaPartition", &other)),
        }
    }

    pub async fn get_data_partition(
        &self,
        requests: Vec<DataPartitionRequest>,
    ) -> Result<DataPartition> {
        match self.submit(Plan::GetDataPartition { requests }).await? {
            DataSet::DataPartition(p) => Ok(p),
            other => Err(unexpected("GetDataPartition", &other)),
        }
    }

    pub async fn get_or_create_data_partition(
        &self,
        requests: Vec<DataPartitionRequest>,
    ) -> Result<DataPartition> {
        match self
            .submit(Plan::GetOrCreateDataPartition { requests })
            .await?
        {
            DataSet::DataPartition(p) => Ok(p),
            other => Err(unexpected("GetOrCreateDataPartition", &other)),
        }
    }

    /// Run a mutating permission operation.
    pub async fn operate_permission(&self, req: AuthorRequest) -> Result<()> {
        let plan = self.author_plan(req)?;
        if plan.operation.is_query() {
            self.metrics.rejected_before_consensus.inc();
            return Err(Error::InvalidPlan(format!(
                "{} is a listing, use query_permission",
                plan.operation
            )));
        }
        let (operation, target) = (plan.operation, subject_of(&plan.user_name, &plan.role_name));
        self.submit(Plan::Author(plan)).await?;
        self.audit.log_event(
            AuditEventType::AuthorChanged,
            &self.node_id,
            target,
            operation.to_string(),
        );
        Ok(())
    }

    /// Run a permission listing.
    pub async fn query_permission(&self, req: AuthorRequest) -> Result<PermissionInfo> {
        let plan = self.author_plan(req)?;
        if !plan.operation.is_query() {
            self.metrics.rejected_before_consensus.inc();
            return Err(Error::InvalidPlan(format!(
                "{} is a mutation, use operate_permission",
                plan.operation
            )));
        }
        match self.submit(Plan::Author(plan)).await? {
            DataSet::Permissions(info) => Ok(info),
            other => Err(unexpected("QueryPermission", &other)),
        }
    }

    pub async fn login(&self, user_name: &str, password: &str) -> Result<()> {
        let encryptor = self.encryptor.clone();
        let result = self
            .gateway
            .read(|s| s.login(user_name, password, encryptor.as_ref()))
            .await;
        if result.is_err() {
            self.audit.log_event(
                AuditEventType::LoginFailed,
                user_name,
                None,
                "login failed",
            );
        }
        result
    }

    pub async fn check_user_privileges(
        &self,
        user_name: &str,
        paths: &[String],
        privilege: u32,
    ) -> Result<()> {
        let privilege = match Privilege::from_code(privilege) {
            Some(p) => p,
            None => {
                self.metrics.rejected_before_consensus.inc();
                return Err(Error::InvalidPlan(format!("unknown privilege code {}", privilege)));
            }
        };
        let paths = self.parse_patterns(paths)?;
        self.submit(Plan::CheckUserPrivileges {
            user_name: user_name.to_string(),
            paths,
            privilege,
        })
        .await
        .map(drop)
    }

    /// Wait until this replica has applied `index`.
    pub async fn wait_for_index(&self, index: u64, timeout: Duration) -> Result<()> {
        self.gateway.wait_for_index(index, timeout).await
    }

    pub async fn status(&self) -> CoordinatorStatus {
        let (nodes, storage_groups, region_groups) = self
            .gateway
            .read(|s| {
                (
                    s.nodes().len(),
                    s.catalog().len(),
                    s.partitions().region_group_count(),
                )
            })
            .await;
        CoordinatorStatus {
            node_id: self.node_id.clone(),
            is_leader: self.gateway.is_leader(),
            leader: self.gateway.leader_hint(),
            applied_index: self.gateway.applied_index(),
            nodes,
            storage_groups,
            region_groups,
            uptime_seconds: self.metrics.uptime_seconds(),
        }
    }

    async fn refresh_gauges(&self) {
        let (nodes, groups, regions) = self
            .gateway
            .read(|s| {
                (
                    s.nodes().len(),
                    s.catalog().len(),
                    s.partitions().region_group_count(),
                )
            })
            .await;
        self.metrics.registered_nodes.set(nodes as u64);
        self.metrics.storage_groups.set(groups as u64);
        self.metrics.region_groups.set(regions as u64);
        self.metrics.applied_index.set(self.gateway.applied_index());
    }

    fn author_plan(&self, req: AuthorRequest) -> Result<crate::coordinator::author::AuthorPlan> {
        req.into_plan(self.encryptor.as_ref()).inspect_err(|e| {
            tracing::warn!("permission request rejected: {}", e);
            self.metrics.rejected_before_consensus.inc();
        })
    }

    fn parse_patterns(&self, raw: &[String]) -> Result<Vec<PartialPath>> {
        raw.iter()
            .map(|p| PartialPath::parse(p))
            .collect::<Result<Vec<_>>>()
            .inspect_err(|_| self.metrics.rejected_before_consensus.inc())
    }
}

fn subject_of(user: &str, role: &str) -> Option<String> {
    match (user.is_empty(), role.is_empty()) {
        (false, false) => Some(format!("{}/{}", user, role)),
        (false, true) => Some(user.to_string()),
        (true, false) => Some(role.to_string()),
        (true, true) => None,
    }
}

fn unexpected(kind: &str, got: &DataSet) -> Error {
    tracing::error!("{} produced unexpected result {:?}", kind, got);
    Error::Internal(format!("{} produced an unexpected result", kind))
}
