//! Partition table and allocation engine
//!
//! Schema partitions are bound per storage group, data partitions per
//! (storage group, time slot). Get-or-create runs inside a single apply: it
//! first works out everything that is missing, checks that every missing
//! region group can be placed, and only then allocates. A plan that cannot be
//! fully satisfied allocates nothing.

use crate::common::{Error, PartialPath, Result};
use crate::coordinator::catalog::StorageGroupCatalog;
use crate::coordinator::node_registry::{NodeId, NodeRegistry};
use crate::coordinator::placement::select_replica_set;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Upper bound on the time slots one data partition request may expand to
pub const MAX_TIME_SLOTS_PER_REQUEST: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    Schema,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionGroupId {
    pub kind: RegionKind,
    pub id: u32,
}

impl fmt::Display for RegionGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RegionKind::Schema => write!(f, "SchemaRegion[{}]", self.id),
            RegionKind::Data => write!(f, "DataRegion[{}]", self.id),
        }
    }
}

/// Bucket of the time axis, identified by its start time in ms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimePartitionSlot {
    pub start_time: i64,
}

impl TimePartitionSlot {
    /// Slot containing `timestamp` under `interval_ms`
    pub fn of(timestamp: i64, interval_ms: i64) -> Result<Self> {
        Self::from_index(timestamp.div_euclid(interval_ms), interval_ms)
    }

    fn from_index(index: i64, interval_ms: i64) -> Result<Self> {
        index
            .checked_mul(interval_ms)
            .map(|start_time| Self { start_time })
            .ok_or_else(|| Error::InvalidPlan(format!("time slot {} out of range", index)))
    }

    /// `floor(start_time / interval_ms)`
    pub fn index(&self, interval_ms: i64) -> i64 {
        self.start_time.div_euclid(interval_ms)
    }
}

/// Inclusive time range in ms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Every slot the range touches, capped at `limit` slots.
    pub fn slots(&self, interval_ms: i64, limit: usize) -> Result<Vec<TimePartitionSlot>> {
        if self.start > self.end {
            return Err(Error::InvalidPlan(format!(
                "time range start {} is after end {}",
                self.start, self.end
            )));
        }
        let first = self.start.div_euclid(interval_ms);
        let last = self.end.div_euclid(interval_ms);
        let count = (last as i128 - first as i128 + 1) as u128;
        if count > limit as u128 {
            return Err(Error::InvalidPlan(format!(
                "time range [{}, {}] spans {} slots, limit is {}",
                self.start, self.end, count, limit
            )));
        }
        (first..=last)
            .map(|index| TimePartitionSlot::from_index(index, interval_ms))
            .collect()
    }
}

/// One device and the time ranges wanted for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPartitionRequest {
    pub device: PartialPath,
    pub time_ranges: Vec<TimeRange>,
}

/// An allocated region group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionGroup {
    pub id: RegionGroupId,
    pub storage_group: String,
    /// Node ids in ascending order
    pub replicas: Vec<NodeId>,
    #[serde(default)]
    pub time_slot: Option<TimePartitionSlot>,
}

/// Storage group name -> schema region group
pub type SchemaPartition = BTreeMap<String, RegionGroup>;

/// Storage group name -> slot -> data region group
pub type DataPartition = BTreeMap<String, BTreeMap<TimePartitionSlot, RegionGroup>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionTable {
    schema: BTreeMap<String, RegionGroupId>,
    data: BTreeMap<String, BTreeMap<TimePartitionSlot, RegionGroupId>>,
    region_groups: BTreeMap<RegionGroupId, RegionGroup>,
    next_region_group_id: u32,
}

impl PartitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema_region(&self, storage_group: &str) -> Option<&RegionGroup> {
        self.schema
            .get(storage_group)
            .and_then(|id| self.region_groups.get(id))
    }

    pub fn data_region(&self, storage_group: &str, slot: TimePartitionSlot) -> Option<&RegionGroup> {
        self.data
            .get(storage_group)
            .and_then(|slots| slots.get(&slot))
            .and_then(|id| self.region_groups.get(id))
    }

    pub fn region_group(&self, id: RegionGroupId) -> Option<&RegionGroup> {
        self.region_groups.get(&id)
    }

    pub fn region_group_count(&self) -> usize {
        self.region_groups.len()
    }

    /// Pure lookup of the schema region groups for `patterns`
    pub fn get_schema_partition(
        &self,
        catalog: &StorageGroupCatalog,
        patterns: &[PartialPath],
    ) -> SchemaPartition {
        implied_groups(catalog, patterns)
            .into_iter()
            .filter_map(|sg| self.schema_region(&sg).map(|rg| (sg, rg.clone())))
            .collect()
    }

    /// Look up, allocating schema region groups for implied groups that lack one.
    pub fn get_or_create_schema_partition(
        &mut self,
        catalog: &mut StorageGroupCatalog,
        nodes: &mut NodeRegistry,
        patterns: &[PartialPath],
    ) -> Result<SchemaPartition> {
        let groups = implied_groups(catalog, patterns);

        let mut missing = Vec::new();
        for sg in &groups {
            if self.schema.contains_key(sg) {
                continue;
            }
            let factor = factor_of(catalog, sg, RegionKind::Schema)?;
            missing.push((sg.clone(), None, factor));
        }
        self.allocate_all(catalog, nodes, RegionKind::Schema, missing)?;

        groups
            .into_iter()
            .map(|sg| {
                let rg = self.schema_region(&sg).cloned().ok_or_else(|| {
                    Error::Internal(format!("schema region for {} vanished after allocation", sg))
                })?;
                Ok((sg, rg))
            })
            .collect()
    }

    /// Pure lookup of data region groups; unknown devices and unallocated
    /// slots are left out.
    pub fn get_data_partition(
        &self,
        catalog: &StorageGroupCatalog,
        requests: &[DataPartitionRequest],
    ) -> Result<DataPartition> {
        let wanted = resolve_slots(catalog, requests, false)?;
        let mut out = DataPartition::new();
        for (sg, slots) in wanted {
            let found: BTreeMap<_, _> = slots
                .into_iter()
                .filter_map(|slot| self.data_region(&sg, slot).map(|rg| (slot, rg.clone())))
                .collect();
            if !found.is_empty() {
                out.insert(sg, found);
            }
        }
        Ok(out)
    }

    /// Look up, allocating data region groups for every requested slot that
    /// lacks one. A device under no storage group fails the whole request.
    pub fn get_or_create_data_partition(
        &mut self,
        catalog: &mut StorageGroupCatalog,
        nodes: &mut NodeRegistry,
        requests: &[DataPartitionRequest],
    ) -> Result<DataPartition> {
        let wanted = resolve_slots(catalog, requests, true)?;

        let mut missing = Vec::new();
        for (sg, slots) in &wanted {
            let factor = factor_of(catalog, sg, RegionKind::Data)?;
            for slot in slots {
                if self.data_region(sg, *slot).is_none() {
                    missing.push((sg.clone(), Some(*slot), factor));
                }
            }
        }
        self.allocate_all(catalog, nodes, RegionKind::Data, missing)?;

        let mut out = DataPartition::new();
        for (sg, slots) in wanted {
            let mut bound = BTreeMap::new();
            for slot in slots {
                let rg = self.data_region(&sg, slot).cloned().ok_or_else(|| {
                    Error::Internal(format!(
                        "data region for {} slot {} vanished after allocation",
                        sg, slot.start_time
                    ))
                })?;
                bound.insert(slot, rg);
            }
            out.insert(sg, bound);
        }
        Ok(out)
    }

    /// Drop every binding and region group of `storage_group`, releasing node load.
    pub fn remove_storage_group(
        &mut self,
        storage_group: &str,
        nodes: &mut NodeRegistry,
    ) -> Result<Vec<RegionGroup>> {
        let mut ids: Vec<RegionGroupId> = self.schema.remove(storage_group).into_iter().collect();
        if let Some(slots) = self.data.remove(storage_group) {
            ids.extend(slots.into_values());
        }

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            let rg = self.region_groups.remove(&id).ok_or_else(|| {
                Error::Internal(format!("binding to missing region group {}", id))
            })?;
            for node_id in &rg.replicas {
                nodes.release(*node_id, id.kind)?;
            }
            removed.push(rg);
        }
        Ok(removed)
    }

    fn allocate_all(
        &mut self,
        catalog: &mut StorageGroupCatalog,
        nodes: &mut NodeRegistry,
        kind: RegionKind,
        missing: Vec<(String, Option<TimePartitionSlot>, usize)>,
    ) -> Result<()> {
        if missing.is_empty() {
            return Ok(());
        }

        // The node set is fixed for the whole apply, so checking the largest
        // factor up front guarantees every allocation below succeeds.
        let available = nodes.allocatable().count();
        let needed = missing.iter().map(|(_, _, f)| *f).max().unwrap_or(0);
        if needed > available {
            return Err(Error::InsufficientNodes { needed, available });
        }
        let needed_ids = u32::try_from(missing.len())
            .ok()
            .and_then(|n| self.next_region_group_id.checked_add(n));
        if needed_ids.is_none() {
            return Err(Error::Internal("region group id space exhausted".into()));
        }

        for (sg, slot, factor) in missing {
            let replicas = select_replica_set(nodes.allocatable(), kind, factor)?;
            let id = RegionGroupId {
                kind,
                id: self.next_region_group_id,
            };
            self.next_region_group_id += 1;

            for node_id in &replicas {
                nodes.acquire(*node_id, kind)?;
            }
            catalog.record_region(&sg, id)?;
            match slot {
                Some(slot) => {
                    self.data.entry(sg.clone()).or_default().insert(slot, id);
                }
                None => {
                    self.schema.insert(sg.clone(), id);
                }
            }
            tracing::debug!("allocated {} for {} on nodes {:?}", id, sg, replicas);
            self.region_groups.insert(
                id,
                RegionGroup {
                    id,
                    storage_group: sg,
                    replicas,
                    time_slot: slot,
                },
            );
        }
        Ok(())
    }
}

fn factor_of(catalog: &StorageGroupCatalog, sg: &str, kind: RegionKind) -> Result<usize> {
    catalog
        .get(sg)
        .map(|g| g.replication_factor(kind))
        .ok_or_else(|| Error::Internal(format!("storage group {} disappeared mid-apply", sg)))
}

/// Names of the storage groups implied by any of `patterns`, deduplicated and sorted
fn implied_groups(catalog: &StorageGroupCatalog, patterns: &[PartialPath]) -> BTreeSet<String> {
    patterns
        .iter()
        .flat_map(|p| catalog.implied_by(p).map(|g| g.name.to_string()))
        .collect()
}

/// Expand data requests into the distinct slots wanted per storage group.
fn resolve_slots(
    catalog: &StorageGroupCatalog,
    requests: &[DataPartitionRequest],
    strict: bool,
) -> Result<BTreeMap<String, BTreeSet<TimePartitionSlot>>> {
    let mut wanted: BTreeMap<String, BTreeSet<TimePartitionSlot>> = BTreeMap::new();
    let mut total = 0usize;

    for req in requests {
        let Some(group) = catalog.group_of(&req.device) else {
            if strict {
                return Err(Error::NotFound(format!(
                    "no storage group for device {}",
                    req.device
                )));
            }
            continue;
        };
        let interval = group.time_partition_interval_ms;
        let entry = wanted.entry(group.name.to_string()).or_default();
        for range in &req.time_ranges {
            let remaining = MAX_TIME_SLOTS_PER_REQUEST.saturating_sub(total);
            let slots = range.slots(interval, remaining)?;
            total += slots.len();
            entry.extend(slots);
        }
    }
    Ok(wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::catalog::mock_schema;
    use crate::coordinator::node_registry::{mock_location, NodeStatus};

    fn running_nodes(n: u16) -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        for i in 0..n {
            let (id, _) = registry.register(&mock_location(6000 + i * 10)).unwrap();
            registry.update_status(id, NodeStatus::Running).unwrap();
        }
        registry
    }

    fn pattern(s: &str) -> PartialPath {
        PartialPath::parse(s).unwrap()
    }

    fn request(device: &str, ranges: &[(i64, i64)]) -> DataPartitionRequest {
        DataPartitionRequest {
            device: PartialPath::parse(device).unwrap(),
            time_ranges: ranges.iter().map(|&(s, e)| TimeRange::new(s, e)).collect(),
        }
    }

    #[test]
    fn test_slot_math() {
        assert_eq!(TimePartitionSlot::of(0, 100).unwrap().start_time, 0);
        assert_eq!(TimePartitionSlot::of(99, 100).unwrap().start_time, 0);
        assert_eq!(TimePartitionSlot::of(100, 100).unwrap().start_time, 100);
        assert_eq!(TimePartitionSlot::of(-1, 100).unwrap().start_time, -100);
        assert_eq!(TimePartitionSlot::of(250, 100).unwrap().index(100), 2);
        assert!(TimePartitionSlot::of(i64::MIN, 7).is_err());
    }

    #[test]
    fn test_range_slots() {
        let slots = TimeRange::new(50, 250).slots(100, 10).unwrap();
        let starts: Vec<i64> = slots.iter().map(|s| s.start_time).collect();
        assert_eq!(starts, vec![0, 100, 200]);

        assert!(TimeRange::new(10, 5).slots(100, 10).is_err());
        assert!(TimeRange::new(0, 1_000).slots(1, 10).is_err());
        assert!(TimeRange::new(i64::MIN, i64::MAX).slots(1, 10).is_err());
    }

    #[test]
    fn test_schema_get_or_create_is_stable() {
        let mut nodes = running_nodes(5);
        let mut catalog = StorageGroupCatalog::new();
        catalog.set(mock_schema("root.sg1", 3, 1)).unwrap();
        let mut table = PartitionTable::new();

        let first = table
            .get_or_create_schema_partition(&mut catalog, &mut nodes, &[pattern("root.sg1.*")])
            .unwrap();
        let rg = &first["root.sg1"];
        assert_eq!(rg.replicas, vec![0, 1, 2]);

        let second = table
            .get_or_create_schema_partition(&mut catalog, &mut nodes, &[pattern("root.sg1.*")])
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(table.region_group_count(), 1);
        assert_eq!(catalog.get("root.sg1").unwrap().schema_region_groups, vec![rg.id.id]);
    }

    #[test]
    fn test_schema_lookup_omits_unallocated() {
        let mut catalog = StorageGroupCatalog::new();
        catalog.set(mock_schema("root.sg1", 1, 1)).unwrap();
        let table = PartitionTable::new();
        assert!(table
            .get_schema_partition(&catalog, &[pattern("root.**")])
            .is_empty());
    }

    #[test]
    fn test_insufficient_nodes_allocates_nothing() {
        let mut nodes = running_nodes(2);
        let mut catalog = StorageGroupCatalog::new();
        catalog.set(mock_schema("root.a", 1, 1)).unwrap();
        catalog.set(mock_schema("root.b", 3, 1)).unwrap();
        let mut table = PartitionTable::new();

        let result =
            table.get_or_create_schema_partition(&mut catalog, &mut nodes, &[pattern("root.**")]);
        assert!(matches!(result, Err(Error::InsufficientNodes { needed: 3, available: 2 })));
        assert_eq!(table.region_group_count(), 0);
        assert!(nodes.query(None).iter().all(|n| !n.hosts_regions()));
        assert!(catalog.get("root.a").unwrap().schema_region_groups.is_empty());
    }

    #[test]
    fn test_least_loaded_spreads_groups() {
        let mut nodes = running_nodes(4);
        let mut catalog = StorageGroupCatalog::new();
        catalog.set(mock_schema("root.sg1", 1, 2)).unwrap();
        let mut table = PartitionTable::new();

        let out = table
            .get_or_create_data_partition(
                &mut catalog,
                &mut nodes,
                &[request("root.sg1.d1", &[(0, 2 * 604_800_000 - 1)])],
            )
            .unwrap();
        let replicas: Vec<Vec<NodeId>> =
            out["root.sg1"].values().map(|rg| rg.replicas.clone()).collect();
        assert_eq!(replicas, vec![vec![0, 1], vec![2, 3]]);
        assert!(nodes.query(None).iter().all(|n| n.data_region_count == 1));
    }

    #[test]
    fn test_data_partition_strictness() {
        let mut nodes = running_nodes(1);
        let mut catalog = StorageGroupCatalog::new();
        catalog.set(mock_schema("root.sg1", 1, 1)).unwrap();
        let mut table = PartitionTable::new();

        let reqs = [request("root.sg1.d1", &[(0, 0)]), request("root.nope.d1", &[(0, 0)])];
        assert!(matches!(
            table.get_or_create_data_partition(&mut catalog, &mut nodes, &reqs),
            Err(Error::NotFound(_))
        ));
        assert_eq!(table.region_group_count(), 0);

        table
            .get_or_create_data_partition(&mut catalog, &mut nodes, &reqs[..1])
            .unwrap();
        let found = table.get_data_partition(&catalog, &reqs).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["root.sg1"].len(), 1);
    }

    #[test]
    fn test_slot_limit_spans_whole_request() {
        let mut nodes = running_nodes(1);
        let mut catalog = StorageGroupCatalog::new();
        catalog.set(mock_schema("root.sg1", 1, 1)).unwrap();
        catalog.set_time_partition_interval("root.sg1", 1).unwrap();
        let mut table = PartitionTable::new();

        let half = MAX_TIME_SLOTS_PER_REQUEST as i64 / 2;
        let reqs = [
            request("root.sg1.d1", &[(0, half - 1)]),
            request("root.sg1.d2", &[(half, half * 2)]),
        ];
        assert!(matches!(
            table.get_or_create_data_partition(&mut catalog, &mut nodes, &reqs),
            Err(Error::InvalidPlan(_))
        ));
        assert_eq!(table.region_group_count(), 0);
    }

    #[test]
    fn test_remove_storage_group_releases_load() {
        let mut nodes = running_nodes(3);
        let mut catalog = StorageGroupCatalog::new();
        catalog.set(mock_schema("root.sg1", 3, 2)).unwrap();
        let mut table = PartitionTable::new();

        table
            .get_or_create_schema_partition(&mut catalog, &mut nodes, &[pattern("root.sg1")])
            .unwrap();
        table
            .get_or_create_data_partition(
                &mut catalog,
                &mut nodes,
                &[request("root.sg1.d1", &[(0, 10)])],
            )
            .unwrap();
        assert_eq!(table.region_group_count(), 2);

        let removed = table.remove_storage_group("root.sg1", &mut nodes).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(table.region_group_count(), 0);
        assert!(nodes.query(None).iter().all(|n| !n.hosts_regions()));
    }
}
