//! Consensus gateway
//!
//! [`ConsensusGateway`] is the only path by which a plan reaches the metadata
//! state: it fixes a total order, makes the plan durable, applies it and
//! hands the result back to the submitter. [`RaftNode`] is the single-node
//! implementation: a local command log plus the state machine, always its own
//! leader unless told to step down.

use crate::common::{
    encryptor_for, ClusterDefaults, CoordinatorConfig, Error, Result, SecurityConfig,
};
use crate::coordinator::command_log::CommandLog;
use crate::coordinator::metadata::MetadataState;
use crate::coordinator::plan::{DataSet, Plan};
use std::future::Future;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};

pub const COMMAND_LOG_FILE: &str = "commands.log";

// Uses RPITIT; every returned future is `Send` so generic callers can hold
// it across `.await` in spawned tasks.
pub trait ConsensusGateway: Send + Sync + 'static {
    /// Order, persist and apply a write plan; read plans are served locally.
    fn submit(&self, plan: Plan) -> impl Future<Output = Result<DataSet>> + Send;

    /// Run `f` against the local committed state.
    fn read<T, F>(&self, f: F) -> impl Future<Output = T> + Send
    where
        T: Send,
        F: FnOnce(&MetadataState) -> T + Send;

    fn is_leader(&self) -> bool;

    /// Address of the current leader, if known
    fn leader_hint(&self) -> Option<String>;

    /// Index of the last plan applied to the local state
    fn applied_index(&self) -> u64;

    /// Resolve once the local state has applied `index`.
    fn wait_for_index(
        &self,
        index: u64,
        timeout: Duration,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaftRole {
    Follower,
    Leader,
}

impl std::fmt::Display for RaftRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaftRole::Follower => write!(f, "follower"),
            RaftRole::Leader => write!(f, "leader"),
        }
    }
}

#[derive(Debug)]
struct Leadership {
    role: RaftRole,
    leader_id: Option<String>,
}

pub struct RaftNode {
    node_id: String,
    leadership: StdRwLock<Leadership>,
    /// Lock order: log, then state
    log: Mutex<CommandLog>,
    state: Arc<RwLock<MetadataState>>,
    applied: watch::Sender<u64>,
    consensus_timeout: Duration,
}

impl RaftNode {
    /// Open the command log under `config.data_dir`, replay it, and take leadership.
    pub fn open(
        config: &CoordinatorConfig,
        defaults: ClusterDefaults,
        security: &SecurityConfig,
    ) -> Result<Self> {
        let admin_password =
            encryptor_for(security.password_encryptor).encrypt(&security.admin_password)?;
        let mut state = MetadataState::new(defaults, &security.admin_name, admin_password);

        let log_path = config.data_dir.join(COMMAND_LOG_FILE);
        let (log, entries) = CommandLog::open(&log_path, config.log_sync)?;

        let mut applied = 0;
        for entry in &entries {
            // Plans that were rejected when first applied are rejected again
            if let Err(e) = state.apply(&entry.plan) {
                tracing::debug!("replayed {} at {} failed again: {}", entry.plan.kind(), entry.index, e);
            }
            applied = entry.index;
        }
        tracing::info!(
            "node {} replayed {} commands from {}",
            config.node_id,
            entries.len(),
            log_path.display()
        );

        let (applied_tx, _) = watch::channel(applied);
        Ok(Self {
            node_id: config.node_id.clone(),
            leadership: StdRwLock::new(Leadership {
                role: RaftRole::Leader,
                leader_id: Some(config.node_id.clone()),
            }),
            log: Mutex::new(log),
            state: Arc::new(RwLock::new(state)),
            applied: applied_tx,
            consensus_timeout: config.consensus_timeout(),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn role(&self) -> RaftRole {
        self.leadership
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .role
    }

    pub fn become_leader(&self) {
        let mut l = self.leadership.write().unwrap_or_else(|e| e.into_inner());
        l.role = RaftRole::Leader;
        l.leader_id = Some(self.node_id.clone());
        tracing::info!("node {} is leader", self.node_id);
    }

    /// Stop accepting writes, pointing clients at `leader_id`.
    pub fn step_down(&self, leader_id: Option<String>) {
        let mut l = self.leadership.write().unwrap_or_else(|e| e.into_inner());
        l.role = RaftRole::Follower;
        tracing::info!("node {} stepped down, leader is {:?}", self.node_id, leader_id);
        l.leader_id = leader_id;
    }

    /// Flush and fsync the command log
    pub async fn sync(&self) -> Result<()> {
        self.log.lock().await.sync()
    }

    async fn commit(&self, plan: Plan) -> Result<DataSet> {
        let mut log = self.log.lock().await;
        let mut state = self.state.write().await;
        // No await below: once appended, the plan is applied in the same poll.
        let index = log.append(&plan)?;
        let result = state.apply(&plan);
        self.applied.send_replace(index);
        match &result {
            Err(e @ Error::Internal(_)) => {
                tracing::error!("{} at index {} broke an invariant: {}", plan.kind(), index, e)
            }
            Err(e) => tracing::warn!("{} at index {} rejected: {}", plan.kind(), index, e),
            Ok(_) => {}
        }
        result
    }
}

impl ConsensusGateway for RaftNode {
    async fn submit(&self, plan: Plan) -> Result<DataSet> {
        if plan.is_read_only() {
            return self.state.read().await.read(&plan);
        }
        if !self.is_leader() {
            return Err(Error::NotLeader(
                self.leader_hint().unwrap_or_else(|| "unknown".to_string()),
            ));
        }

        let kind = plan.kind();
        match tokio::time::timeout(self.consensus_timeout, self.commit(plan)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{} not committed within {:?}",
                kind, self.consensus_timeout
            ))),
        }
    }

    async fn read<T, F>(&self, f: F) -> T
    where
        T: Send,
        F: FnOnce(&MetadataState) -> T + Send,
    {
        let state = self.state.read().await;
        f(&state)
    }

    fn is_leader(&self) -> bool {
        self.role() == RaftRole::Leader
    }

    fn leader_hint(&self) -> Option<String> {
        self.leadership
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .leader_id
            .clone()
    }

    fn applied_index(&self) -> u64 {
        *self.applied.borrow()
    }

    async fn wait_for_index(&self, index: u64, timeout: Duration) -> Result<()> {
        let mut rx = self.applied.subscribe();
        // The borrow guard must be dropped before `rx`
        let waited = tokio::time::timeout(timeout, rx.wait_for(|applied| *applied >= index))
            .await
            .map(|r| r.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::Internal("applied index channel closed".into())),
            Err(_) => Err(Error::Timeout(format!(
                "index {} not applied within {:?}",
                index, timeout
            ))),
        }
    }
}
