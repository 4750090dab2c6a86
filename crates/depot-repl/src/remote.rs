//! Remote cluster seam: the replica API client and blob storage of one cluster.

use std::sync::Arc;

use async_trait::async_trait;
use depot_storage::ObjectStoreBackend;
use serde::{Deserialize, Serialize};

use crate::error::ReplResult;
use crate::local::NodeInfo;
use crate::task::{ClusterNodeInfo, RepositoryType};

/// Ensure a project exists remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCreateRequest {
    /// Project id.
    pub name: String,
}

/// Ensure a repository exists remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoCreateRequest {
    /// Project id.
    pub project_id: String,
    /// Repository name.
    pub name: String,
    /// Repository flavor.
    pub repo_type: RepositoryType,
}

/// Create or update a package summary remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageUpsertRequest {
    /// Project id.
    pub project_id: String,
    /// Repository name.
    pub repo_name: String,
    /// Package key.
    pub package_key: String,
    /// Display name.
    pub package_name: String,
    /// Repository flavor.
    pub repo_type: RepositoryType,
}

/// Register a package version whose artifacts are already uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersionCreateRequest {
    /// Project id.
    pub project_id: String,
    /// Repository name.
    pub repo_name: String,
    /// Package key.
    pub package_key: String,
    /// Version name.
    pub version_name: String,
    /// Total size.
    pub size: u64,
    /// Artifact node paths.
    pub artifact_paths: Vec<String>,
    /// Replace an existing version.
    pub overwrite: bool,
}

/// Create a file or folder node remotely. File content must already be in blob storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCreateRequest {
    /// Project id.
    pub project_id: String,
    /// Repository name.
    pub repo_name: String,
    /// Full path.
    pub full_path: String,
    /// True for folders.
    pub folder: bool,
    /// Size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the content.
    pub sha256: Option<String>,
    /// Hex MD5 of the content.
    pub md5: Option<String>,
    /// Replace an existing node.
    pub overwrite: bool,
}

/// Replica API of a remote cluster.
#[async_trait]
pub trait ArtifactReplicaClient: Send + Sync {
    /// Build version the remote reports.
    async fn version(&self) -> ReplResult<String>;
    /// Create the project if absent.
    async fn replica_project(&self, request: ProjectCreateRequest) -> ReplResult<()>;
    /// Create the repository if absent.
    async fn replica_repo(&self, request: RepoCreateRequest) -> ReplResult<()>;
    /// Upsert a package summary.
    async fn replica_package(&self, request: PackageUpsertRequest) -> ReplResult<()>;
    /// True if the remote already has the version.
    async fn check_package_version_exist(
        &self,
        project_id: &str,
        repo_name: &str,
        package_key: &str,
        version: &str,
    ) -> ReplResult<bool>;
    /// Register a package version.
    async fn replica_package_version(&self, request: PackageVersionCreateRequest) -> ReplResult<()>;
    /// Remote node at `full_path`, if any.
    async fn check_node_exist(&self, project_id: &str, repo_name: &str, full_path: &str) -> ReplResult<Option<NodeInfo>>;
    /// Create a node.
    async fn replica_node_create(&self, request: NodeCreateRequest) -> ReplResult<()>;
}

/// Connection to one remote cluster.
#[derive(Clone)]
pub struct ClusterHandle {
    /// Replica API client.
    pub client: Arc<dyn ArtifactReplicaClient>,
    /// Blob storage shared by the cluster.
    pub blob_store: Arc<dyn ObjectStoreBackend>,
}

impl std::fmt::Debug for ClusterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterHandle").finish_non_exhaustive()
    }
}

/// Opens connections to remote clusters.
#[async_trait]
pub trait ReplicaClientFactory: Send + Sync {
    /// Connect to `cluster`.
    async fn connect(&self, cluster: &ClusterNodeInfo) -> ReplResult<ClusterHandle>;
}

/// Content-addressed blob key: `{sha[0..2]}/{sha[2..4]}/{sha}`.
pub fn blob_key(sha256: &str) -> Option<String> {
    if sha256.len() < 4 || !sha256.is_ascii() {
        return None;
    }
    Some(format!("{}/{}/{}", &sha256[0..2], &sha256[2..4], sha256))
}
