//! Execution records: the persisted outcome of runs and execution contexts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReplResult;
use crate::task::RepositoryType;

/// Status of a run, a record, or an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// In progress.
    Running,
    /// Finished without failures.
    Success,
    /// At least one failure was recorded.
    Failed,
}

/// Leaf outcome counters. Each visited leaf bumps exactly one of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaProgress {
    /// Leaves transferred.
    pub success: u64,
    /// Leaves the remote already had.
    pub skip: u64,
    /// Leaves that errored.
    pub failed: u64,
}

impl ReplicaProgress {
    /// Number of leaves visited.
    pub fn total(&self) -> u64 {
        self.success + self.skip + self.failed
    }
}

/// Data needed to open a record detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDetailInitialRequest {
    /// Owning task record.
    pub record_id: String,
    /// Local cluster name.
    pub local_cluster: String,
    /// Remote cluster name.
    pub remote_cluster: String,
    /// Local repository.
    pub local_repo_name: String,
    /// Repository flavor.
    pub repo_type: RepositoryType,
}

/// Persisted outcome of one execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDetail {
    /// Detail id.
    pub id: String,
    /// Owning task record.
    pub record_id: String,
    /// Local cluster name.
    pub local_cluster: String,
    /// Remote cluster name.
    pub remote_cluster: String,
    /// Local repository.
    pub local_repo_name: String,
    /// Repository flavor.
    pub repo_type: RepositoryType,
    /// Current or final status.
    pub status: ExecutionStatus,
    /// Current or final counters.
    pub progress: ReplicaProgress,
    /// When the context was opened.
    pub start_time: DateTime<Utc>,
    /// When the context was finalized.
    pub end_time: Option<DateTime<Utc>>,
    /// Accumulated failure messages; `None` when nothing failed.
    pub error_reason: Option<String>,
}

/// Final state handed to the record service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Final status.
    pub status: ExecutionStatus,
    /// Final counters.
    pub progress: ReplicaProgress,
    /// Joined failure messages.
    pub error_reason: Option<String>,
}

/// Task-level record covering every cluster of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaRecordInfo {
    /// Record id.
    pub id: String,
    /// Task key.
    pub task_key: String,
    /// Current or final status.
    pub status: ExecutionStatus,
    /// When the execution started.
    pub start_time: DateTime<Utc>,
    /// When the execution finished.
    pub end_time: Option<DateTime<Utc>>,
    /// Failure summary.
    pub error_reason: Option<String>,
}

/// Persistence for records and record details.
#[async_trait]
pub trait RecordService: Send + Sync {
    /// Open a task-level record in `Running`.
    async fn initial_record(&self, task_key: &str) -> ReplResult<ReplicaRecordInfo>;

    /// Finalize a task-level record.
    async fn complete_record(
        &self,
        record_id: &str,
        status: ExecutionStatus,
        error_reason: Option<String>,
    ) -> ReplResult<ReplicaRecordInfo>;

    /// Open a record detail in `Running`.
    async fn initial_record_detail(&self, request: RecordDetailInitialRequest) -> ReplResult<RecordDetail>;

    /// Finalize a record detail and return its persisted form.
    async fn complete_record_detail(&self, detail_id: &str, result: ExecutionResult) -> ReplResult<RecordDetail>;
}
