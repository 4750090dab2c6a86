//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use depot_repl::{
    ClusterHandle, ClusterNodeInfo, ErrorStrategy, ExecutionStatus, MemoryDataManager,
    MemoryRecordService, MockReplicaClient, NodeInfo, PackageSummary, PackageVersion,
    RecordService, ReplError, ReplResult, ReplicaContext, ReplicaObjectInfo, ReplicaSetting,
    ReplicaTaskInfo, ReplicationConfig, Replicator, ScheduledReplicator, DEFAULT_VERSION,
};
use depot_storage::MockObjectStore;

pub const PROJECT: &str = "proj";
pub const REPO: &str = "repoA";

/// Install a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Scripted result of one replication primitive.
#[derive(Debug, Clone)]
pub enum Outcome {
    Transferred,
    Skipped,
    Fail(String),
}

/// Replicator whose leaf results are scripted by label.
///
/// Files are labelled by full path, versions by `key@version`, folders by
/// `dir:{full_path}`. Unscripted leaves transfer.
#[derive(Default)]
pub struct ScriptedReplicator {
    outcomes: Mutex<HashMap<String, Outcome>>,
    visits: Mutex<Vec<String>>,
    fail_repo: Mutex<bool>,
}

impl ScriptedReplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, label: &str, outcome: Outcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(label.to_string(), outcome);
    }

    pub fn fail_repo(&self) {
        *self.fail_repo.lock().unwrap() = true;
    }

    /// Labels in visiting order.
    pub fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }

    /// Leaf labels only, folders excluded.
    pub fn leaf_visits(&self) -> Vec<String> {
        self.visits()
            .into_iter()
            .filter(|v| !v.starts_with("dir:"))
            .collect()
    }

    fn visit(&self, label: String) -> ReplResult<bool> {
        self.visits.lock().unwrap().push(label.clone());
        match self.outcomes.lock().unwrap().get(&label).cloned() {
            None | Some(Outcome::Transferred) => Ok(true),
            Some(Outcome::Skipped) => Ok(false),
            Some(Outcome::Fail(msg)) => Err(ReplError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                msg,
            ))),
        }
    }
}

#[async_trait]
impl Replicator for ScriptedReplicator {
    async fn replica_project(&self, context: &ReplicaContext) -> ReplResult<()> {
        context
            .cluster
            .client
            .replica_project(depot_repl::ProjectCreateRequest {
                name: context.remote_project_id().to_string(),
            })
            .await
    }

    async fn replica_repo(&self, context: &ReplicaContext) -> ReplResult<()> {
        if *self.fail_repo.lock().unwrap() {
            return Err(ReplError::Remote {
                cluster: context.remote_cluster.name.clone(),
                msg: "repository quota exceeded".to_string(),
            });
        }
        Ok(())
    }

    async fn replica_package(&self, _context: &ReplicaContext, _package: &PackageSummary) -> ReplResult<()> {
        Ok(())
    }

    async fn replica_package_version(
        &self,
        _context: &ReplicaContext,
        package: &PackageSummary,
        version: &PackageVersion,
    ) -> ReplResult<bool> {
        self.visit(format!("{}@{}", package.key, version.name))
    }

    async fn replica_file(&self, _context: &ReplicaContext, node: &NodeInfo) -> ReplResult<bool> {
        self.visit(node.full_path.clone())
    }

    async fn replica_dir(&self, _context: &ReplicaContext, node: &NodeInfo) -> ReplResult<()> {
        self.visit(format!("dir:{}", node.full_path)).map(|_| ())
    }
}

/// Scheduler wired to in-memory collaborators.
pub struct Env {
    pub local: Arc<MemoryDataManager>,
    pub records: Arc<MemoryRecordService>,
    pub replicator: Arc<ScriptedReplicator>,
    pub remote: Arc<MockReplicaClient>,
    pub scheduled: ScheduledReplicator,
}

pub fn env() -> Env {
    env_with_config(ReplicationConfig::default())
}

pub fn env_with_config(config: ReplicationConfig) -> Env {
    init_tracing();
    let local = Arc::new(MemoryDataManager::new());
    let records = Arc::new(MemoryRecordService::new());
    let replicator = Arc::new(ScriptedReplicator::new());
    let remote = Arc::new(MockReplicaClient::named("edge", DEFAULT_VERSION));
    let scheduled = ScheduledReplicator::new(replicator.clone(), local.clone(), records.clone(), config);
    Env {
        local,
        records,
        replicator,
        remote,
        scheduled,
    }
}

impl Env {
    /// Fresh run context for `object` against the `edge` cluster.
    pub async fn context(&self, object: ReplicaObjectInfo, error_strategy: ErrorStrategy) -> ReplicaContext {
        let task = ReplicaTaskInfo {
            key: "task-1".into(),
            name: "nightly".into(),
            project_id: PROJECT.into(),
            remote_clusters: vec![edge()],
            setting: ReplicaSetting {
                error_strategy,
                ..Default::default()
            },
        };
        let record = self
            .records
            .initial_record(&task.key)
            .await
            .expect("open task record");
        ReplicaContext::new(
            task,
            object,
            record,
            "local",
            edge(),
            ClusterHandle {
                client: self.remote.clone(),
                blob_store: Arc::new(MockObjectStore::new()),
            },
        )
    }
}

pub fn edge() -> ClusterNodeInfo {
    ClusterNodeInfo {
        name: "edge".into(),
        url: "http://edge.example".into(),
        credentials_key: None,
    }
}

pub fn assert_finalized(status: ExecutionStatus) {
    assert_ne!(status, ExecutionStatus::Running, "detail left running");
}
