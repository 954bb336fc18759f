//! Storage group catalog
//!
//! A storage group is a `root.`-prefixed path that owns every series below it.
//! Groups never nest: a new group may not equal, contain, or sit inside an
//! existing one, so every concrete device resolves to at most one group.

use crate::common::{ClusterDefaults, Error, PartialPath, Result};
use crate::coordinator::partition::{RegionGroupId, RegionKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fully specified storage group, as stored and as carried in a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageGroupSchema {
    pub name: PartialPath,
    pub ttl_ms: i64,
    pub schema_replication_factor: usize,
    pub data_replication_factor: usize,
    pub time_partition_interval_ms: i64,
    /// Append-only until the group is deleted
    #[serde(default)]
    pub schema_region_groups: Vec<u32>,
    #[serde(default)]
    pub data_region_groups: Vec<u32>,
}

/// Client-facing request; omitted fields come from the cluster defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageGroupRequest {
    pub name: String,
    #[serde(default)]
    pub ttl_ms: Option<i64>,
    #[serde(default)]
    pub schema_replication_factor: Option<usize>,
    #[serde(default)]
    pub data_replication_factor: Option<usize>,
    #[serde(default)]
    pub time_partition_interval_ms: Option<i64>,
}

impl StorageGroupSchema {
    /// Merge a request with the process defaults.
    pub fn from_request(req: &StorageGroupRequest, defaults: &ClusterDefaults) -> Result<Self> {
        let schema = Self {
            name: PartialPath::parse_concrete(&req.name)?,
            ttl_ms: req.ttl_ms.unwrap_or(defaults.default_ttl_ms),
            schema_replication_factor: req
                .schema_replication_factor
                .unwrap_or(defaults.schema_replication_factor),
            data_replication_factor: req
                .data_replication_factor
                .unwrap_or(defaults.data_replication_factor),
            time_partition_interval_ms: req
                .time_partition_interval_ms
                .unwrap_or(defaults.time_partition_interval_ms),
            schema_region_groups: Vec::new(),
            data_region_groups: Vec::new(),
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.len() < 2 {
            return Err(Error::InvalidPlan(format!(
                "storage group must sit below root: {}",
                self.name
            )));
        }
        if self.name.has_wildcard() {
            return Err(Error::InvalidPlan(format!(
                "storage group may not contain wildcards: {}",
                self.name
            )));
        }
        if self.schema_replication_factor == 0 || self.data_replication_factor == 0 {
            return Err(Error::InvalidPlan("replication factor must be at least 1".into()));
        }
        validate_ttl(self.ttl_ms)?;
        validate_interval(self.time_partition_interval_ms)?;
        if !self.schema_region_groups.is_empty() || !self.data_region_groups.is_empty() {
            return Err(Error::InvalidPlan(
                "new storage group may not carry region groups".into(),
            ));
        }
        Ok(())
    }

    pub fn replication_factor(&self, kind: RegionKind) -> usize {
        match kind {
            RegionKind::Schema => self.schema_replication_factor,
            RegionKind::Data => self.data_replication_factor,
        }
    }
}

pub fn validate_ttl(ttl_ms: i64) -> Result<()> {
    if ttl_ms <= 0 {
        return Err(Error::InvalidPlan(format!("ttl must be positive, got {}", ttl_ms)));
    }
    Ok(())
}

pub fn validate_interval(interval_ms: i64) -> Result<()> {
    if interval_ms <= 0 {
        return Err(Error::InvalidPlan(format!(
            "time partition interval must be positive, got {}",
            interval_ms
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageGroupCatalog {
    groups: BTreeMap<String, StorageGroupSchema>,
}

impl StorageGroupCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, schema: StorageGroupSchema) -> Result<()> {
        if let Some(existing) = self.groups.values().find(|g| {
            g.name.is_prefix_of(&schema.name) || schema.name.is_prefix_of(&g.name)
        }) {
            return Err(Error::AlreadyExists(if existing.name == schema.name {
                format!("storage group {}", schema.name)
            } else {
                format!(
                    "storage group {} overlaps existing group {}",
                    schema.name, existing.name
                )
            }));
        }
        self.groups.insert(schema.name.to_string(), schema);
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Result<StorageGroupSchema> {
        self.groups
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("storage group {}", name)))
    }

    pub fn get(&self, name: &str) -> Option<&StorageGroupSchema> {
        self.groups.get(name)
    }

    /// All schemas, ordered by name
    pub fn all(&self) -> Vec<StorageGroupSchema> {
        self.groups.values().cloned().collect()
    }

    pub fn set_ttl(&mut self, name: &str, ttl_ms: i64) -> Result<()> {
        self.get_mut(name)?.ttl_ms = ttl_ms;
        Ok(())
    }

    pub fn set_time_partition_interval(&mut self, name: &str, interval_ms: i64) -> Result<()> {
        self.get_mut(name)?.time_partition_interval_ms = interval_ms;
        Ok(())
    }

    /// The group owning a concrete device path
    pub fn group_of(&self, device: &PartialPath) -> Option<&StorageGroupSchema> {
        self.groups.values().find(|g| g.name.is_prefix_of(device))
    }

    /// Groups with at least one path matched by `pattern`
    pub fn implied_by<'a>(
        &'a self,
        pattern: &'a PartialPath,
    ) -> impl Iterator<Item = &'a StorageGroupSchema> + 'a {
        self.groups
            .values()
            .filter(move |g| pattern.overlaps_subtree(&g.name))
    }

    pub fn record_region(&mut self, name: &str, id: RegionGroupId) -> Result<()> {
        let group = self
            .groups
            .get_mut(name)
            .ok_or_else(|| Error::Internal(format!("region for unknown storage group {}", name)))?;
        match id.kind {
            RegionKind::Schema => group.schema_region_groups.push(id.id),
            RegionKind::Data => group.data_region_groups.push(id.id),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut StorageGroupSchema> {
        self.groups
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("storage group {}", name)))
    }
}

#[cfg(test)]
pub(crate) fn mock_schema(name: &str, schema_factor: usize, data_factor: usize) -> StorageGroupSchema {
    let req = StorageGroupRequest {
        name: name.to_string(),
        schema_replication_factor: Some(schema_factor),
        data_replication_factor: Some(data_factor),
        ..Default::default()
    };
    StorageGroupSchema::from_request(&req, &ClusterDefaults::default()).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::TTL_FOREVER;

    #[test]
    fn test_defaults_merged() {
        let defaults = ClusterDefaults::default();
        let req = StorageGroupRequest {
            name: "root.sg1".into(),
            data_replication_factor: Some(2),
            ..Default::default()
        };
        let schema = StorageGroupSchema::from_request(&req, &defaults).unwrap();
        assert_eq!(schema.ttl_ms, TTL_FOREVER);
        assert_eq!(schema.schema_replication_factor, defaults.schema_replication_factor);
        assert_eq!(schema.data_replication_factor, 2);
        assert_eq!(
            schema.time_partition_interval_ms,
            defaults.time_partition_interval_ms
        );
    }

    #[test]
    fn test_request_validation() {
        let defaults = ClusterDefaults::default();
        for name in ["root", "sg1", "root.*", "root.sg.**", ""] {
            let req = StorageGroupRequest {
                name: name.into(),
                ..Default::default()
            };
            assert!(
                StorageGroupSchema::from_request(&req, &defaults).is_err(),
                "{} should be rejected",
                name
            );
        }
        let req = StorageGroupRequest {
            name: "root.sg1".into(),
            ttl_ms: Some(0),
            ..Default::default()
        };
        assert!(StorageGroupSchema::from_request(&req, &defaults).is_err());
    }

    #[test]
    fn test_set_rejects_overlap() {
        let mut catalog = StorageGroupCatalog::new();
        catalog.set(mock_schema("root.ln", 1, 1)).unwrap();

        for name in ["root.ln", "root.ln.wf01"] {
            assert!(matches!(
                catalog.set(mock_schema(name, 1, 1)),
                Err(Error::AlreadyExists(_))
            ));
        }
        catalog.set(mock_schema("root.sg", 1, 1)).unwrap();
        catalog.set(mock_schema("root.ln2", 1, 1)).unwrap();
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_ancestor_of_existing_rejected() {
        let mut catalog = StorageGroupCatalog::new();
        catalog.set(mock_schema("root.a.b", 1, 1)).unwrap();
        assert!(matches!(
            catalog.set(mock_schema("root.a", 1, 1)),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_updates_and_delete() {
        let mut catalog = StorageGroupCatalog::new();
        catalog.set(mock_schema("root.sg1", 1, 1)).unwrap();

        catalog.set_ttl("root.sg1", 3_600_000).unwrap();
        catalog.set_ttl("root.sg1", 3_600_000).unwrap();
        catalog.set_time_partition_interval("root.sg1", 1000).unwrap();
        let g = catalog.get("root.sg1").unwrap();
        assert_eq!(g.ttl_ms, 3_600_000);
        assert_eq!(g.time_partition_interval_ms, 1000);

        assert!(matches!(catalog.set_ttl("root.nope", 1), Err(Error::NotFound(_))));
        catalog.delete("root.sg1").unwrap();
        assert!(matches!(catalog.delete("root.sg1"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_group_resolution() {
        let mut catalog = StorageGroupCatalog::new();
        catalog.set(mock_schema("root.sg1", 1, 1)).unwrap();
        catalog.set(mock_schema("root.sg2", 1, 1)).unwrap();

        let device = PartialPath::parse("root.sg1.d1").unwrap();
        assert_eq!(catalog.group_of(&device).unwrap().name.to_string(), "root.sg1");
        let stray = PartialPath::parse("root.other.d1").unwrap();
        assert!(catalog.group_of(&stray).is_none());

        let pattern = PartialPath::parse("root.**").unwrap();
        assert_eq!(catalog.implied_by(&pattern).count(), 2);
        let pattern = PartialPath::parse("root.sg2.*").unwrap();
        let implied: Vec<_> = catalog.implied_by(&pattern).map(|g| g.name.to_string()).collect();
        assert_eq!(implied, vec!["root.sg2".to_string()]);
    }
}
