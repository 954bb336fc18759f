//! CLI for config node operations

use clap::{Parser, Subcommand};
use std::time::Duration;
use tsmeta::common::{format_duration_ms, parse_duration_ms, PartialPath};
use tsmeta::coordinator::author::AuthorRequest;
use tsmeta::coordinator::catalog::StorageGroupRequest;
use tsmeta::coordinator::node_registry::{Endpoint, NodeLocation, NodeStatus};
use tsmeta::coordinator::partition::{DataPartitionRequest, TimeRange};
use tsmeta::ConfigNodeClient;

#[derive(Parser)]
#[command(name = "tsmeta")]
#[command(about = "tsmeta config node CLI")]
#[command(version)]
struct Cli {
    /// Config node URL
    #[arg(long, default_value = "http://localhost:22277")]
    confignode: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "10")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show config node status
    Status,

    /// Node registry
    #[command(subcommand)]
    Node(NodeCommands),

    /// Storage group catalog
    #[command(subcommand)]
    StorageGroup(StorageGroupCommands),

    /// Partition lookup and allocation
    #[command(subcommand)]
    Partition(PartitionCommands),

    /// Users, roles and privileges
    #[command(subcommand)]
    Auth(AuthCommands),
}

#[derive(Subcommand)]
enum NodeCommands {
    /// Register a storage node; ports are consecutive from --port
    Register {
        #[arg(long, default_value = "127.0.0.1")]
        ip: String,

        /// First of four consecutive ports
        #[arg(long, default_value = "6667")]
        port: u16,
    },

    /// List registered nodes
    List,

    /// Set a node's status (registering, running, unknown, removing)
    SetStatus { id: u32, status: String },

    /// Remove a node
    Remove { id: u32 },
}

#[derive(Subcommand)]
enum StorageGroupCommands {
    /// Create a storage group
    Set {
        name: String,

        /// TTL, e.g. 7d or "forever"
        #[arg(long)]
        ttl: Option<String>,

        #[arg(long)]
        schema_replicas: Option<usize>,

        #[arg(long)]
        data_replicas: Option<usize>,

        /// Time partition interval, e.g. 7d
        #[arg(long)]
        interval: Option<String>,
    },

    /// Delete a storage group and its partitions
    Delete { name: String },

    /// List storage groups
    List,

    /// Change TTL
    Ttl { name: String, ttl: String },

    /// Change time partition interval
    Interval { name: String, interval: String },
}

#[derive(Subcommand)]
enum PartitionCommands {
    /// Schema partition for path patterns
    Schema {
        patterns: Vec<String>,

        /// Allocate missing region groups
        #[arg(long)]
        create: bool,
    },

    /// Data partition for one device over [start, end)
    Data {
        device: String,

        #[arg(long)]
        start: i64,

        #[arg(long)]
        end: i64,

        /// Allocate missing region groups
        #[arg(long)]
        create: bool,
    },
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Run a permission operation by code (0..=10)
    Operate {
        #[arg(long = "type")]
        author_type: i32,

        #[arg(long, default_value = "")]
        user: String,

        #[arg(long, default_value = "")]
        role: String,

        #[arg(long, default_value = "")]
        password: String,

        #[arg(long, default_value = "")]
        new_password: String,

        /// Privilege bitmask
        #[arg(long, default_value = "0")]
        permissions: u64,

        /// Path the privileges apply to
        #[arg(long, default_value = "")]
        path: String,
    },

    /// Run a listing by code (11..=16)
    Query {
        #[arg(long = "type")]
        author_type: i32,

        #[arg(long, default_value = "")]
        user: String,

        #[arg(long, default_value = "")]
        role: String,
    },

    /// Check a user's password
    Login { user: String, password: String },

    /// Check that a user holds a privilege on every path
    Check {
        user: String,

        #[arg(long)]
        privilege: u32,

        paths: Vec<String>,
    },
}

fn parse_status(s: &str) -> anyhow::Result<NodeStatus> {
    Ok(serde_json::from_value(serde_json::Value::String(
        s.to_ascii_lowercase(),
    ))?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = ConfigNodeClient::new(&cli.confignode, Duration::from_secs(cli.timeout))?;

    match cli.command {
        Commands::Status => {
            let status = client.status().await?;
            println!("Config node {}", status.node_id);
            println!("  Leader: {} ({:?})", status.is_leader, status.leader);
            println!("  Applied index: {}", status.applied_index);
            println!("  Nodes: {}", status.nodes);
            println!("  Storage groups: {}", status.storage_groups);
            println!("  Region groups: {}", status.region_groups);
            println!("  Uptime: {}s", status.uptime_seconds);
        }

        Commands::Node(cmd) => match cmd {
            NodeCommands::Register { ip, port } => {
                let location = NodeLocation {
                    external_endpoint: Endpoint::new(ip.clone(), port),
                    internal_endpoint: Endpoint::new(ip.clone(), port.saturating_add(1)),
                    data_exchange_endpoint: Endpoint::new(ip.clone(), port.saturating_add(2)),
                    consensus_endpoint: Endpoint::new(ip, port.saturating_add(3)),
                };
                let reg = client.register_node(&location).await?;
                println!("✓ Registered node {} ({})", reg.node_id, reg.status);
            }
            NodeCommands::List => {
                for node in client.list_nodes().await? {
                    println!(
                        "{:>4}  {:<12} {:<22} schema={} data={}",
                        node.node_id,
                        node.status.to_string(),
                        node.location.internal_endpoint.to_string(),
                        node.schema_region_count,
                        node.data_region_count,
                    );
                }
            }
            NodeCommands::SetStatus { id, status } => {
                client.update_node_status(id, parse_status(&status)?).await?;
                println!("✓ Node {} is now {}", id, status);
            }
            NodeCommands::Remove { id } => {
                client.remove_node(id).await?;
                println!("✓ Removed node {}", id);
            }
        },

        Commands::StorageGroup(cmd) => match cmd {
            StorageGroupCommands::Set {
                name,
                ttl,
                schema_replicas,
                data_replicas,
                interval,
            } => {
                let req = StorageGroupRequest {
                    name: name.clone(),
                    ttl_ms: ttl.as_deref().map(parse_duration_ms).transpose()?,
                    schema_replication_factor: schema_replicas,
                    data_replication_factor: data_replicas,
                    time_partition_interval_ms: interval
                        .as_deref()
                        .map(parse_duration_ms)
                        .transpose()?,
                };
                client.set_storage_group(&req).await?;
                println!("✓ Created storage group {}", name);
            }
            StorageGroupCommands::Delete { name } => {
                client.delete_storage_group(&name).await?;
                println!("✓ Deleted storage group {}", name);
            }
            StorageGroupCommands::List => {
                for sg in client.list_storage_groups().await? {
                    println!(
                        "{:<30} ttl={:<8} replicas={}/{} interval={} regions={}/{}",
                        sg.name.to_string(),
                        format_duration_ms(sg.ttl_ms),
                        sg.schema_replication_factor,
                        sg.data_replication_factor,
                        format_duration_ms(sg.time_partition_interval_ms),
                        sg.schema_region_groups.len(),
                        sg.data_region_groups.len(),
                    );
                }
            }
            StorageGroupCommands::Ttl { name, ttl } => {
                client.set_ttl(&name, parse_duration_ms(&ttl)?).await?;
                println!("✓ TTL of {} set to {}", name, ttl);
            }
            StorageGroupCommands::Interval { name, interval } => {
                client
                    .set_time_partition_interval(&name, parse_duration_ms(&interval)?)
                    .await?;
                println!("✓ Time partition interval of {} set to {}", name, interval);
            }
        },

        Commands::Partition(cmd) => match cmd {
            PartitionCommands::Schema { patterns, create } => {
                let partition = client.schema_partition(&patterns, create).await?;
                println!("{}", serde_json::to_string_pretty(&partition)?);
            }
            PartitionCommands::Data {
                device,
                start,
                end,
                create,
            } => {
                let req = DataPartitionRequest {
                    device: PartialPath::parse_concrete(&device)?,
                    time_ranges: vec![TimeRange::new(start, end)],
                };
                let partition = client.data_partition(&[req], create).await?;
                println!("{}", serde_json::to_string_pretty(&partition)?);
            }
        },

        Commands::Auth(cmd) => match cmd {
            AuthCommands::Operate {
                author_type,
                user,
                role,
                password,
                new_password,
                permissions,
                path,
            } => {
                let req = AuthorRequest {
                    author_type,
                    user_name: user,
                    role_name: role,
                    password,
                    new_password,
                    permissions,
                    node_name: path,
                };
                client.operate_permission(&req).await?;
                println!("✓ Done");
            }
            AuthCommands::Query {
                author_type,
                user,
                role,
            } => {
                let req = AuthorRequest {
                    author_type,
                    user_name: user,
                    role_name: role,
                    ..Default::default()
                };
                let info = client.query_permission(&req).await?;
                println!("{}", serde_json::to_string_pretty(&info)?);
            }
            AuthCommands::Login { user, password } => {
                client.login(&user, &password).await?;
                println!("✓ Login succeeded");
            }
            AuthCommands::Check {
                user,
                privilege,
                paths,
            } => {
                client.check_user_privileges(&user, &paths, privilege).await?;
                println!("✓ {} holds privilege {} on all paths", user, privilege);
            }
        },
    }

    Ok(())
}
