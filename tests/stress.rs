//! Concurrency test: many clients racing to allocate the same partitions

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tsmeta::common::{Config, LogSyncPolicy, PartialPath};
use tsmeta::coordinator::catalog::StorageGroupRequest;
use tsmeta::coordinator::node_registry::{Endpoint, NodeLocation, NodeStatus};
use tsmeta::coordinator::partition::{DataPartitionRequest, TimeRange};
use tsmeta::coordinator::{ConsensusGateway, MetadataCoordinator, RaftNode};

async fn cluster(dir: &TempDir, nodes: u16) -> Arc<MetadataCoordinator<RaftNode>> {
    let mut config = Config::default();
    config.coordinator.data_dir = dir.path().to_path_buf();
    config.coordinator.log_sync = LogSyncPolicy::Never;
    config.defaults.schema_replication_factor = 3;
    config.defaults.data_replication_factor = 2;
    let raft = Arc::new(
        RaftNode::open(&config.coordinator, config.defaults.clone(), &config.security).unwrap(),
    );
    let c = Arc::new(MetadataCoordinator::new(raft, &config).unwrap());

    for i in 0..nodes {
        let port = 6000 + i * 10;
        let reg = c
            .register_node(NodeLocation {
                external_endpoint: Endpoint::new("127.0.0.1", port),
                internal_endpoint: Endpoint::new("127.0.0.1", port + 1),
                data_exchange_endpoint: Endpoint::new("127.0.0.1", port + 2),
                consensus_endpoint: Endpoint::new("127.0.0.1", port + 3),
            })
            .await
            .unwrap();
        c.update_node_status(reg.node_id, NodeStatus::Running)
            .await
            .unwrap();
    }
    c
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_concurrent_schema_allocation() {
    let dir = TempDir::new().unwrap();
    let c = cluster(&dir, 5).await;
    c.set_storage_group(StorageGroupRequest {
        name: "root.sg1".to_string(),
        ..Default::default()
    })
    .await
    .unwrap();

    let mut handles = Vec::new();
    for i in 0..64 {
        let c = c.clone();
        handles.push(tokio::spawn(async move {
            c.get_or_create_schema_partition(&[format!("root.sg1.d{}.s1", i)])
                .await
                .unwrap()
        }));
    }

    let mut seen = BTreeSet::new();
    for h in handles {
        let partition = h.await.unwrap();
        seen.insert(partition["root.sg1"].id);
    }
    assert_eq!(seen.len(), 1, "racing callers saw different region groups");

    let groups = c.get_storage_groups_schema().await.unwrap();
    assert_eq!(groups[0].schema_region_groups.len(), 1);
    let nodes = c.query_node_info(None).await.unwrap();
    let load: u32 = nodes.iter().map(|n| n.schema_region_count).sum();
    assert_eq!(load, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_concurrent_data_allocation() {
    let dir = TempDir::new().unwrap();
    let c = cluster(&dir, 4).await;
    c.set_storage_group(StorageGroupRequest {
        name: "root.sg1".to_string(),
        time_partition_interval_ms: Some(1_000),
        ..Default::default()
    })
    .await
    .unwrap();

    let slots = 16i64;
    let clients = 32;
    let start = Instant::now();
    let mut handles = Vec::new();
    for i in 0..clients {
        let c = c.clone();
        handles.push(tokio::spawn(async move {
            let req = DataPartitionRequest {
                device: PartialPath::parse_concrete(&format!("root.sg1.d{}", i)).unwrap(),
                time_ranges: vec![TimeRange::new(0, slots * 1_000 - 1)],
            };
            c.get_or_create_data_partition(vec![req]).await.unwrap()
        }));
    }

    let mut results = Vec::new();
    for h in handles {
        results.push(h.await.unwrap());
    }
    let elapsed = start.elapsed();

    // Every client sees the same slot -> group binding
    for partition in &results[1..] {
        assert_eq!(partition, &results[0]);
    }
    assert_eq!(results[0]["root.sg1"].len(), slots as usize);

    let status = c.status().await;
    assert_eq!(status.region_groups, slots as usize);

    // Least loaded placement keeps nodes within one group of each other
    let nodes = c.query_node_info(None).await.unwrap();
    let loads: Vec<u32> = nodes.iter().map(|n| n.data_region_count).collect();
    assert_eq!(loads.iter().sum::<u32>(), (slots * 2) as u32);
    let spread = loads.iter().max().unwrap() - loads.iter().min().unwrap();
    assert!(spread <= 1, "unbalanced loads {:?}", loads);

    println!("{} clients x {} slots: {:?}", clients, slots, elapsed);
    assert!(c.gateway().applied_index() > 0);
    assert!(elapsed.as_secs_f64() < 30.0, "Allocation too slow");
}
