//! Config node implementation
//!
//! The config node owns all cluster metadata:
//! - Node registry (storage nodes and their endpoints)
//! - Storage group catalog
//! - Schema and data partition tables with replica placement
//! - Users, roles and privileges
//!
//! Every mutation is a [`Plan`] ordered by the [`ConsensusGateway`] and
//! applied to [`MetadataState`].

pub mod author;
pub mod catalog;
pub mod command_log;
pub mod http;
pub mod manager;
pub mod metadata;
pub mod node_registry;
pub mod partition;
pub mod placement;
pub mod plan;
pub mod raft_node;
pub mod server;

pub use manager::MetadataCoordinator;
pub use metadata::MetadataState;
pub use plan::{DataSet, Plan};
pub use raft_node::{ConsensusGateway, RaftNode, RaftRole};
pub use server::Coordinator;
