//! # tsmeta
//!
//! Metadata coordinator ("config node") for a distributed time-series
//! database:
//! - Node registry with stable, never reused ids
//! - Storage group catalog with TTL and time partition interval
//! - Schema and data partition allocation onto the least loaded nodes
//! - Users, roles and path privileges
//! - Every mutation ordered through a replicated command log
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              Config Node                  │
//! │  HTTP API → MetadataCoordinator           │
//! │           → ConsensusGateway (log)        │
//! │           → MetadataState                 │
//! └───────────┬──────────────────────────────┘
//!             │ registration / partition lookups
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌──▼───────────┐
//! │ Data node 0 │   │ Data node 1│   │ Data node 2  │
//! └─────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a config node
//! ```bash
//! tsmeta-confignode serve \
//!   --id confignode-1 \
//!   --bind 0.0.0.0:22277 \
//!   --data-dir ./confignode-data
//! ```
//!
//! ### Use the CLI
//! ```bash
//! tsmeta storage-group set root.sg1 --ttl 7d
//! tsmeta partition data root.sg1.d1 --start 0 --end 1000 --create
//! tsmeta status
//! ```

pub mod client;
pub mod common;
pub mod coordinator;

// Re-export commonly used types
pub use client::ConfigNodeClient;
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
