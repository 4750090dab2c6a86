//! Task execution: one task record, one concurrent worker per remote cluster.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::ReplicationConfig;
use crate::context::ReplicaContext;
use crate::error::{ReplError, ReplResult};
use crate::record::{ExecutionStatus, RecordDetail, RecordService, ReplicaRecordInfo};
use crate::remote::ReplicaClientFactory;
use crate::scheduled::ScheduledReplicator;
use crate::task::{ClusterNodeInfo, ReplicaObjectInfo, ReplicaTaskDetail, ReplicaTaskInfo};

/// What happened on one remote cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterOutcome {
    /// Remote cluster name.
    pub cluster: String,
    /// Finalized record details, in traversal order.
    pub details: Vec<RecordDetail>,
    /// Run-fatal error that stopped this cluster, if any.
    pub error: Option<String>,
}

impl ClusterOutcome {
    fn new(cluster: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            details: Vec::new(),
            error: None,
        }
    }

    /// True when no run failed and every detail succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
            && self
                .details
                .iter()
                .all(|d| d.status == ExecutionStatus::Success)
    }

    fn error_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .details
            .iter()
            .filter_map(|d| d.error_reason.as_ref())
            .map(|reason| format!("[{}] {}", self.cluster, reason))
            .collect();
        if let Some(e) = &self.error {
            lines.push(format!("[{}] {}", self.cluster, e));
        }
        lines
    }
}

/// Result of one task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionSummary {
    /// Completed task record.
    pub record: ReplicaRecordInfo,
    /// One entry per remote cluster, in task order.
    pub clusters: Vec<ClusterOutcome>,
}

/// Runs replication tasks against every remote cluster they name.
pub struct ReplicaTaskExecutor {
    scheduled: ScheduledReplicator,
    records: Arc<dyn RecordService>,
    factory: Arc<dyn ReplicaClientFactory>,
    config: ReplicationConfig,
}

impl ReplicaTaskExecutor {
    /// Create an executor.
    pub fn new(
        scheduled: ScheduledReplicator,
        records: Arc<dyn RecordService>,
        factory: Arc<dyn ReplicaClientFactory>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            scheduled,
            records,
            factory,
            config,
        }
    }

    /// Executes `detail` once.
    ///
    /// Clusters run concurrently; objects within a cluster run in order. The
    /// task record ends `Success` only if every cluster did.
    pub async fn execute(&self, detail: ReplicaTaskDetail) -> ReplResult<TaskExecutionSummary> {
        let record = self.records.initial_record(&detail.task.key).await?;
        info!(
            task = %detail.task.key,
            record = %record.id,
            clusters = detail.task.remote_clusters.len(),
            objects = detail.objects.len(),
            "replication task started"
        );

        let task = Arc::new(detail.task);
        let objects = Arc::new(detail.objects);
        let mut handles = Vec::with_capacity(task.remote_clusters.len());
        for cluster in task.remote_clusters.iter().cloned() {
            let worker = ClusterWorker {
                scheduled: self.scheduled.clone(),
                factory: self.factory.clone(),
                task: task.clone(),
                objects: objects.clone(),
                record: record.clone(),
                local_cluster: self.config.local_cluster_name.clone(),
            };
            let name = cluster.name.clone();
            handles.push((name, tokio::spawn(worker.run(cluster))));
        }

        let mut clusters = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let e = ReplError::WorkerFailed {
                        cluster: name.clone(),
                        msg: e.to_string(),
                    };
                    error!(cluster = %name, error = %e, "replication worker failed");
                    let mut outcome = ClusterOutcome::new(&name);
                    outcome.error = Some(e.to_string());
                    outcome
                }
            };
            clusters.push(outcome);
        }

        let success = clusters.iter().all(ClusterOutcome::is_success);
        let (status, reason) = if success {
            (ExecutionStatus::Success, None)
        } else {
            let lines: Vec<String> = clusters.iter().flat_map(ClusterOutcome::error_lines).collect();
            (ExecutionStatus::Failed, Some(lines.join("\n")))
        };
        let record = self.records.complete_record(&record.id, status, reason).await?;
        info!(task = %task.key, record = %record.id, status = ?record.status, "replication task finished");

        Ok(TaskExecutionSummary { record, clusters })
    }
}

struct ClusterWorker {
    scheduled: ScheduledReplicator,
    factory: Arc<dyn ReplicaClientFactory>,
    task: Arc<ReplicaTaskInfo>,
    objects: Arc<Vec<ReplicaObjectInfo>>,
    record: ReplicaRecordInfo,
    local_cluster: String,
}

impl ClusterWorker {
    async fn run(self, cluster: ClusterNodeInfo) -> ClusterOutcome {
        let mut outcome = ClusterOutcome::new(&cluster.name);
        let handle = match self.factory.connect(&cluster).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(cluster = %cluster.name, error = %e, "cannot connect to remote cluster");
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        for object in self.objects.iter() {
            let mut context = ReplicaContext::new(
                (*self.task).clone(),
                object.clone(),
                self.record.clone(),
                &self.local_cluster,
                cluster.clone(),
                handle.clone(),
            );
            match self.scheduled.replica(&mut context).await {
                Ok(details) => outcome.details.extend(details),
                Err(e) => {
                    warn!(
                        cluster = %cluster.name,
                        repo = %object.local_repo_name,
                        error = %e,
                        "replication run aborted"
                    );
                    outcome.error = Some(format!("{}: {}", object.local_repo_name, e));
                    break;
                }
            }
        }
        outcome
    }
}
