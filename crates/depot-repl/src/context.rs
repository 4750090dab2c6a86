//! Per-run and per-traversal state.
//!
//! A [`ReplicaContext`] covers one (task object, remote cluster) run. Each
//! traversal inside the run borrows it through a [`ReplicaExecutionContext`],
//! which owns the counters and error reasons that end up in one record detail.

use chrono::Utc;

use crate::error::ReplError;
use crate::record::{ExecutionResult, ExecutionStatus, RecordDetail, ReplicaProgress, ReplicaRecordInfo};
use crate::remote::ClusterHandle;
use crate::task::{
    ClusterNodeInfo, ConflictStrategy, ErrorStrategy, ReplicaObjectInfo, ReplicaTaskInfo, RepositoryType,
};

/// State of one run against one remote cluster. Owned by a single task.
#[derive(Debug, Clone)]
pub struct ReplicaContext {
    /// Task definition.
    pub task: ReplicaTaskInfo,
    /// Object being replicated.
    pub task_object: ReplicaObjectInfo,
    /// Task-level record this run reports into.
    pub task_record: ReplicaRecordInfo,
    /// Local cluster name.
    pub local_cluster: String,
    /// Target cluster.
    pub remote_cluster: ClusterNodeInfo,
    /// Connection to the target cluster.
    pub cluster: ClusterHandle,
    /// Downgraded to `Failed` by any failure; never upgraded back.
    pub status: ExecutionStatus,
}

impl ReplicaContext {
    /// New run in `Running`.
    pub fn new(
        task: ReplicaTaskInfo,
        task_object: ReplicaObjectInfo,
        task_record: ReplicaRecordInfo,
        local_cluster: &str,
        remote_cluster: ClusterNodeInfo,
        cluster: ClusterHandle,
    ) -> Self {
        Self {
            task,
            task_object,
            task_record,
            local_cluster: local_cluster.to_string(),
            remote_cluster,
            cluster,
            status: ExecutionStatus::Running,
        }
    }

    /// Local project.
    pub fn local_project_id(&self) -> &str {
        &self.task.project_id
    }

    /// Local repository.
    pub fn local_repo_name(&self) -> &str {
        &self.task_object.local_repo_name
    }

    /// Local repository flavor.
    pub fn local_repo_type(&self) -> RepositoryType {
        self.task_object.repo_type
    }

    /// Remote project; the local one when unset.
    pub fn remote_project_id(&self) -> &str {
        if self.task_object.remote_project_id.is_empty() {
            &self.task.project_id
        } else {
            &self.task_object.remote_project_id
        }
    }

    /// Remote repository; the local one when unset.
    pub fn remote_repo_name(&self) -> &str {
        if self.task_object.remote_repo_name.is_empty() {
            &self.task_object.local_repo_name
        } else {
            &self.task_object.remote_repo_name
        }
    }

    /// Leaf failure handling.
    pub fn error_strategy(&self) -> ErrorStrategy {
        self.task.setting.error_strategy
    }

    /// Remote conflict handling.
    pub fn conflict_strategy(&self) -> ConflictStrategy {
        self.task.setting.conflict_strategy
    }
}

/// Bookkeeping for one traversal; becomes one record detail.
#[derive(Debug)]
pub struct ReplicaExecutionContext<'a> {
    replica_context: &'a mut ReplicaContext,
    /// Detail opened for this traversal.
    pub detail: RecordDetail,
    /// Leaf counters.
    pub progress: ReplicaProgress,
    /// Traversal status.
    pub status: ExecutionStatus,
    error_reasons: Vec<String>,
}

impl<'a> ReplicaExecutionContext<'a> {
    /// Wraps `replica_context` for the traversal recorded by `detail`.
    pub fn new(replica_context: &'a mut ReplicaContext, detail: RecordDetail) -> Self {
        Self {
            replica_context,
            detail,
            progress: ReplicaProgress::default(),
            status: ExecutionStatus::Running,
            error_reasons: Vec::new(),
        }
    }

    /// The run this traversal belongs to.
    pub fn replica_context(&self) -> &ReplicaContext {
        self.replica_context
    }

    /// Leaf failure handling of the run.
    pub fn error_strategy(&self) -> ErrorStrategy {
        self.replica_context.error_strategy()
    }

    /// Marks this traversal and the owning run as failed.
    pub fn set_error_status(&mut self, reason: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.replica_context.status = ExecutionStatus::Failed;
        self.error_reasons.push(reason.into());
    }

    /// Records a failed leaf: bumps `failed` and keeps `label` in the reason.
    pub fn record_leaf_failure(&mut self, label: &str, error: &ReplError) {
        self.progress.failed += 1;
        self.set_error_status(format!("{}: {}", label, error));
    }

    /// Error messages in occurrence order.
    pub fn error_reasons(&self) -> &[String] {
        &self.error_reasons
    }

    /// Reasons joined by newlines, cut at `max_len` characters; `None` when empty.
    pub fn build_error_reason(&self, max_len: Option<usize>) -> Option<String> {
        if self.error_reasons.is_empty() {
            return None;
        }
        let joined = self.error_reasons.join("\n");
        match max_len {
            Some(max) if joined.chars().count() > max => Some(joined.chars().take(max).collect()),
            _ => Some(joined),
        }
    }

    /// Final result: `Running` becomes `Success`, `Failed` stays.
    pub fn execution_result(&self, max_len: Option<usize>) -> ExecutionResult {
        let status = match self.status {
            ExecutionStatus::Running => ExecutionStatus::Success,
            other => other,
        };
        ExecutionResult {
            status,
            progress: self.progress,
            error_reason: self.build_error_reason(max_len),
        }
    }

    /// Snapshot of the detail as it would be persisted now.
    pub fn finalized_detail(&self, max_len: Option<usize>) -> RecordDetail {
        let result = self.execution_result(max_len);
        RecordDetail {
            status: result.status,
            progress: result.progress,
            error_reason: result.error_reason,
            end_time: Some(Utc::now()),
            ..self.detail.clone()
        }
    }
}
