#![warn(missing_docs)]

//! Depot replication subsystem: scheduled cross-cluster replication
//!
//! A replication task names a local project, the repositories to copy and the
//! remote clusters to copy them to. For each (object, cluster) pair the
//! [`ScheduledReplicator`] walks the repository, or just the constrained
//! packages and paths, and drives a [`Replicator`] over every leaf while
//! counting successes, skips and failures into persisted record details.

pub mod cluster;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod local;
pub mod memory;
pub mod record;
pub mod remote;
pub mod replicator;
pub mod scheduled;
pub mod task;

pub use cluster::ClusterReplicator;
pub use config::{ReplicationConfig, DEFAULT_VERSION};
pub use context::{ReplicaContext, ReplicaExecutionContext};
pub use error::{ReplError, ReplResult};
pub use executor::{ClusterOutcome, ReplicaTaskExecutor, TaskExecutionSummary};
pub use local::{
    LocalDataManager, NodeContent, NodeInfo, PackageListOption, PackageSummary, PackageVersion,
    VersionListOption, ROOT_PATH,
};
pub use memory::{MemoryClusterFactory, MemoryDataManager, MemoryRecordService, MockReplicaClient};
pub use record::{
    ExecutionResult, ExecutionStatus, RecordDetail, RecordDetailInitialRequest, RecordService,
    ReplicaProgress, ReplicaRecordInfo,
};
pub use remote::{
    blob_key, ArtifactReplicaClient, ClusterHandle, NodeCreateRequest, PackageUpsertRequest,
    PackageVersionCreateRequest, ProjectCreateRequest, RepoCreateRequest, ReplicaClientFactory,
};
pub use replicator::Replicator;
pub use scheduled::ScheduledReplicator;
pub use task::{
    ClusterNodeInfo, ConflictStrategy, ErrorStrategy, PackageConstraint, PathConstraint,
    ReplicaObjectInfo, ReplicaSetting, ReplicaTaskDetail, ReplicaTaskInfo, RepositoryType,
};
