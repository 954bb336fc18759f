//! Metadata state machine
//!
//! Holds the committed cluster state:
//! - Node registry (ids, endpoints, status, region load)
//! - Storage group catalog
//! - Partition table (schema and data region groups)
//! - Authorization store
//!
//! `apply` is a pure function of the current state and the plan: no clocks,
//! no randomness, no I/O. Every replica applying the same log ends in the same
//! state. A plan that fails leaves the state untouched.

use crate::common::{ClusterDefaults, Error, PasswordEncryptor, Result};
use crate::coordinator::author::AuthorStore;
use crate::coordinator::catalog::StorageGroupCatalog;
use crate::coordinator::node_registry::NodeRegistry;
use crate::coordinator::partition::PartitionTable;
use crate::coordinator::plan::{DataSet, Plan};

pub struct MetadataState {
    nodes: NodeRegistry,
    catalog: StorageGroupCatalog,
    partitions: PartitionTable,
    author: AuthorStore,
    defaults: ClusterDefaults,
}

impl MetadataState {
    /// Initial state. `admin_password` is already encrypted.
    pub fn new(defaults: ClusterDefaults, admin_name: &str, admin_password: String) -> Self {
        let author = AuthorStore::new(admin_name, admin_password);
        Self {
            nodes: NodeRegistry::new(),
            catalog: StorageGroupCatalog::new(),
            partitions: PartitionTable::new(),
            author,
            defaults,
        }
    }

    /// Apply a committed plan.
    pub fn apply(&mut self, plan: &Plan) -> Result<DataSet> {
        match plan {
            Plan::RegisterNode(location) => {
                let (node_id, created) = self.nodes.register(location)?;
                let status = self
                    .nodes
                    .get(node_id)
                    .map(|n| n.status)
                    .ok_or_else(|| Error::Internal(format!("node {} missing after register", node_id)))?;
                if created {
                    tracing::info!("registered node {} at {}", node_id, location.internal_endpoint);
                }
                Ok(DataSet::NodeRegistered {
                    node_id,
                    status,
                    defaults: self.defaults.clone(),
                })
            }
            Plan::UpdateNodeStatus { node_id, status } => {
                let previous = self.nodes.update_status(*node_id, *status)?;
                if previous != *status {
                    tracing::info!("node {} {} -> {}", node_id, previous, status);
                }
                Ok(DataSet::Status)
            }
            Plan::RemoveNode { node_id } => {
                let removed = self.nodes.remove(*node_id)?;
                tracing::info!(
                    "removed node {} at {}",
                    node_id,
                    removed.location.internal_endpoint
                );
                Ok(DataSet::Status)
            }
            Plan::SetStorageGroup(schema) => {
                self.catalog.set(schema.clone())?;
                tracing::info!("storage group {} created", schema.name);
                Ok(DataSet::Status)
            }
            Plan::DeleteStorageGroup { name } => {
                if self.catalog.get(name).is_none() {
                    return Err(Error::NotFound(format!("storage group {}", name)));
                }
                let removed = self.partitions.remove_storage_group(name, &mut self.nodes)?;
                self.catalog.delete(name)?;
                tracing::info!(
                    "storage group {} deleted with {} region groups",
                    name,
                    removed.len()
                );
                Ok(DataSet::Status)
            }
            Plan::SetTtl { name, ttl_ms } => {
                self.catalog.set_ttl(name, *ttl_ms)?;
                Ok(DataSet::Status)
            }
            Plan::SetTimePartitionInterval { name, interval_ms } => {
                self.catalog.set_time_partition_interval(name, *interval_ms)?;
                Ok(DataSet::Status)
            }
            Plan::GetOrCreateSchemaPartition { patterns } => self
                .partitions
                .get_or_create_schema_partition(&mut self.catalog, &mut self.nodes, patterns)
                .map(DataSet::SchemaPartition),
            Plan::GetOrCreateDataPartition { requests } => self
                .partitions
                .get_or_create_data_partition(&mut self.catalog, &mut self.nodes, requests)
                .map(DataSet::DataPartition),
            Plan::Author(author) if !author.operation.is_query() => {
                self.author.apply(author)?;
                Ok(DataSet::Status)
            }
            Plan::Author(_)
            | Plan::QueryNodeInfo { .. }
            | Plan::GetStorageGroupsSchema
            | Plan::GetSchemaPartition { .. }
            | Plan::GetDataPartition { .. }
            | Plan::CheckUserPrivileges { .. } => self.read(plan),
        }
    }

    /// Answer a read plan from committed state.
    pub fn read(&self, plan: &Plan) -> Result<DataSet> {
        match plan {
            Plan::QueryNodeInfo { node_id } => Ok(DataSet::Nodes(self.nodes.query(*node_id))),
            Plan::GetStorageGroupsSchema => Ok(DataSet::StorageGroups(self.catalog.all())),
            Plan::GetSchemaPartition { patterns } => Ok(DataSet::SchemaPartition(
                self.partitions.get_schema_partition(&self.catalog, patterns),
            )),
            Plan::GetDataPartition { requests } => self
                .partitions
                .get_data_partition(&self.catalog, requests)
                .map(DataSet::DataPartition),
            Plan::Author(author) => self.author.query(author).map(DataSet::Permissions),
            Plan::CheckUserPrivileges {
                user_name,
                paths,
                privilege,
            } => {
                self.author.check_privileges(user_name, paths, *privilege)?;
                Ok(DataSet::Status)
            }
            Plan::RegisterNode(_)
            | Plan::UpdateNodeStatus { .. }
            | Plan::RemoveNode { .. }
            | Plan::SetStorageGroup(_)
            | Plan::DeleteStorageGroup { .. }
            | Plan::SetTtl { .. }
            | Plan::SetTimePartitionInterval { .. }
            | Plan::GetOrCreateSchemaPartition { .. }
            | Plan::GetOrCreateDataPartition { .. } => Err(Error::InvalidPlan(format!(
                "{} modifies state and must be submitted",
                plan.kind()
            ))),
        }
    }

    pub fn login(
        &self,
        user_name: &str,
        password: &str,
        encryptor: &dyn PasswordEncryptor,
    ) -> Result<()> {
        self.author.login(user_name, password, encryptor)
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    pub fn catalog(&self) -> &StorageGroupCatalog {
        &self.catalog
    }

    pub fn partitions(&self) -> &PartitionTable {
        &self.partitions
    }

    pub fn defaults(&self) -> &ClusterDefaults {
        &self.defaults
    }
}
