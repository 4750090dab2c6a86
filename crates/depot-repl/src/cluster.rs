//! Replicator that pushes to another cluster through its replica API.
//!
//! File content travels through the remote cluster's blob storage under a
//! content-addressed key; metadata goes through [`ArtifactReplicaClient`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::context::ReplicaContext;
use crate::error::{ReplError, ReplResult};
use crate::local::{LocalDataManager, NodeContent, NodeInfo, PackageSummary, PackageVersion};
use crate::remote::{
    blob_key, NodeCreateRequest, PackageUpsertRequest, PackageVersionCreateRequest,
    ProjectCreateRequest, RepoCreateRequest,
};
use crate::replicator::Replicator;
use crate::task::ConflictStrategy;

/// Direct cluster-to-cluster replicator.
pub struct ClusterReplicator {
    local: Arc<dyn LocalDataManager>,
}

impl ClusterReplicator {
    /// Replicator reading content from `local`.
    pub fn new(local: Arc<dyn LocalDataManager>) -> Self {
        Self { local }
    }

    /// Uploads the node's content unless the blob is already there.
    async fn push_blob(&self, context: &ReplicaContext, node: &NodeInfo) -> ReplResult<()> {
        let key = node
            .sha256
            .as_deref()
            .and_then(blob_key)
            .ok_or_else(|| ReplError::InvalidNode {
                full_path: node.full_path.clone(),
                reason: "missing or malformed sha256".to_string(),
            })?;
        let store = &context.cluster.blob_store;
        if store.exists(&key).await? {
            debug!(path = %node.full_path, key = %key, "blob already on remote");
            return Ok(());
        }
        match self.local.node_content(node).await? {
            NodeContent::File(path) => store.put_file(&key, &path).await?,
            NodeContent::Bytes(data) => store.put_bytes(&key, data).await?,
        }
        debug!(path = %node.full_path, key = %key, size = node.size, "blob pushed");
        Ok(())
    }

    /// Decides whether an existing remote copy should be replaced.
    fn resolve_conflict(context: &ReplicaContext, target: &str) -> ReplResult<bool> {
        match context.conflict_strategy() {
            ConflictStrategy::Skip => Ok(false),
            ConflictStrategy::Overwrite => Ok(true),
            ConflictStrategy::FastFail => Err(ReplError::Conflict {
                target: target.to_string(),
            }),
        }
    }
}

#[async_trait]
impl Replicator for ClusterReplicator {
    async fn replica_project(&self, context: &ReplicaContext) -> ReplResult<()> {
        context
            .cluster
            .client
            .replica_project(ProjectCreateRequest {
                name: context.remote_project_id().to_string(),
            })
            .await
    }

    async fn replica_repo(&self, context: &ReplicaContext) -> ReplResult<()> {
        context
            .cluster
            .client
            .replica_repo(RepoCreateRequest {
                project_id: context.remote_project_id().to_string(),
                name: context.remote_repo_name().to_string(),
                repo_type: context.local_repo_type(),
            })
            .await
    }

    async fn replica_package(&self, context: &ReplicaContext, package: &PackageSummary) -> ReplResult<()> {
        context
            .cluster
            .client
            .replica_package(PackageUpsertRequest {
                project_id: context.remote_project_id().to_string(),
                repo_name: context.remote_repo_name().to_string(),
                package_key: package.key.clone(),
                package_name: package.name.clone(),
                repo_type: package.repo_type,
            })
            .await
    }

    async fn replica_package_version(
        &self,
        context: &ReplicaContext,
        package: &PackageSummary,
        version: &PackageVersion,
    ) -> ReplResult<bool> {
        let client = &context.cluster.client;
        let exists = client
            .check_package_version_exist(
                context.remote_project_id(),
                context.remote_repo_name(),
                &package.key,
                &version.name,
            )
            .await?;
        if exists && !Self::resolve_conflict(context, &format!("{}@{}", package.key, version.name))? {
            return Ok(false);
        }

        let paths = version.node_paths();
        for path in &paths {
            let node = self
                .local
                .find_node_detail(context.local_project_id(), context.local_repo_name(), path)
                .await?;
            self.push_blob(context, &node).await?;
        }

        client
            .replica_package_version(PackageVersionCreateRequest {
                project_id: context.remote_project_id().to_string(),
                repo_name: context.remote_repo_name().to_string(),
                package_key: package.key.clone(),
                version_name: version.name.clone(),
                size: version.size,
                artifact_paths: paths,
                overwrite: exists,
            })
            .await?;
        Ok(true)
    }

    async fn replica_file(&self, context: &ReplicaContext, node: &NodeInfo) -> ReplResult<bool> {
        let client = &context.cluster.client;
        let remote = client
            .check_node_exist(context.remote_project_id(), context.remote_repo_name(), &node.full_path)
            .await?;
        let overwrite = match remote {
            Some(existing) if !existing.folder && existing.sha256 == node.sha256 => return Ok(false),
            Some(_) => {
                if !Self::resolve_conflict(context, &node.full_path)? {
                    return Ok(false);
                }
                true
            }
            None => false,
        };

        self.push_blob(context, node).await?;
        client
            .replica_node_create(NodeCreateRequest {
                project_id: context.remote_project_id().to_string(),
                repo_name: context.remote_repo_name().to_string(),
                full_path: node.full_path.clone(),
                folder: false,
                size: node.size,
                sha256: node.sha256.clone(),
                md5: node.md5.clone(),
                overwrite,
            })
            .await?;
        Ok(true)
    }

    async fn replica_dir(&self, context: &ReplicaContext, node: &NodeInfo) -> ReplResult<()> {
        let client = &context.cluster.client;
        let remote = client
            .check_node_exist(context.remote_project_id(), context.remote_repo_name(), &node.full_path)
            .await?;
        if remote.is_some() {
            return Ok(());
        }
        client
            .replica_node_create(NodeCreateRequest {
                project_id: context.remote_project_id().to_string(),
                repo_name: context.remote_repo_name().to_string(),
                full_path: node.full_path.clone(),
                folder: true,
                size: 0,
                sha256: None,
                md5: None,
                overwrite: false,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use depot_storage::{MockObjectStore, ObjectStoreBackend};

    use crate::memory::{MemoryDataManager, MockReplicaClient};
    use crate::record::{ExecutionStatus, ReplicaRecordInfo};
    use crate::remote::ClusterHandle;
    use crate::task::{
        ClusterNodeInfo, ReplicaObjectInfo, ReplicaSetting, ReplicaTaskInfo, RepositoryType,
    };

    struct Fixture {
        local: Arc<MemoryDataManager>,
        remote: Arc<MockReplicaClient>,
        blobs: Arc<MockObjectStore>,
        replicator: ClusterReplicator,
    }

    fn fixture() -> Fixture {
        let local = Arc::new(MemoryDataManager::new());
        Fixture {
            replicator: ClusterReplicator::new(local.clone()),
            local,
            remote: Arc::new(MockReplicaClient::new("1.0.0")),
            blobs: Arc::new(MockObjectStore::new()),
        }
    }

    fn context(f: &Fixture, conflict_strategy: ConflictStrategy) -> ReplicaContext {
        let task = ReplicaTaskInfo {
            key: "t1".into(),
            name: "t1".into(),
            project_id: "proj".into(),
            remote_clusters: vec![],
            setting: ReplicaSetting {
                conflict_strategy,
                ..Default::default()
            },
        };
        let mut object = ReplicaObjectInfo::whole_repo("repoA", RepositoryType::Generic);
        object.remote_project_id = "proj".into();
        ReplicaContext::new(
            task,
            object,
            ReplicaRecordInfo {
                id: "r1".into(),
                task_key: "t1".into(),
                status: ExecutionStatus::Running,
                start_time: Utc::now(),
                end_time: None,
                error_reason: None,
            },
            "local",
            ClusterNodeInfo {
                name: "edge".into(),
                url: "http://edge".into(),
                credentials_key: None,
            },
            ClusterHandle {
                client: f.remote.clone(),
                blob_store: f.blobs.clone(),
            },
        )
    }

    mod files {
        use super::*;

        #[tokio::test]
        async fn test_new_file_is_pushed_and_created() {
            let f = fixture();
            let ctx = context(&f, ConflictStrategy::Skip);
            let node = f.local.add_file("proj", "repoA", "/b.txt", b"bbb");

            assert!(f.replicator.replica_file(&ctx, &node).await.unwrap());

            let key = blob_key(node.sha256.as_deref().unwrap()).unwrap();
            assert_eq!(&f.blobs.object(&key).unwrap()[..], b"bbb");
            let remote = f.remote.node("proj", "repoA", "/b.txt").unwrap();
            assert_eq!(remote.sha256, node.sha256);
        }

        #[tokio::test]
        async fn test_identical_remote_file_is_skipped() {
            let f = fixture();
            let ctx = context(&f, ConflictStrategy::Overwrite);
            let node = f.local.add_file("proj", "repoA", "/a.txt", b"aaa");
            f.remote.insert_node(node.clone());

            assert!(!f.replicator.replica_file(&ctx, &node).await.unwrap());
            assert_eq!(f.blobs.stats().puts, 0);
            assert_eq!(f.remote.node_create_count(), 0);
        }

        #[tokio::test]
        async fn test_conflicting_file_per_strategy() {
            let f = fixture();
            let node = f.local.add_file("proj", "repoA", "/c.txt", b"new");
            let mut stale = node.clone();
            stale.sha256 = Some("ffff0000".into());
            f.remote.insert_node(stale);

            let skip = context(&f, ConflictStrategy::Skip);
            assert!(!f.replicator.replica_file(&skip, &node).await.unwrap());

            let fail = context(&f, ConflictStrategy::FastFail);
            let err = f.replicator.replica_file(&fail, &node).await.unwrap_err();
            assert!(matches!(err, ReplError::Conflict { .. }));

            let overwrite = context(&f, ConflictStrategy::Overwrite);
            assert!(f.replicator.replica_file(&overwrite, &node).await.unwrap());
            assert_eq!(f.remote.node("proj", "repoA", "/c.txt").unwrap().sha256, node.sha256);
        }

        #[tokio::test]
        async fn test_existing_blob_not_uploaded_twice() {
            let f = fixture();
            let ctx = context(&f, ConflictStrategy::Skip);
            let first = f.local.add_file("proj", "repoA", "/one.txt", b"same");
            let second = f.local.add_file("proj", "repoA", "/two.txt", b"same");

            assert!(f.replicator.replica_file(&ctx, &first).await.unwrap());
            assert!(f.replicator.replica_file(&ctx, &second).await.unwrap());
            assert_eq!(f.blobs.stats().puts, 1);
            assert_eq!(f.remote.node_create_count(), 2);
        }

        #[tokio::test]
        async fn test_blob_failure_propagates() {
            let f = fixture();
            let ctx = context(&f, ConflictStrategy::Skip);
            let node = f.local.add_file("proj", "repoA", "/x.bin", b"x");
            f.blobs.fail_puts_for(&blob_key(node.sha256.as_deref().unwrap()).unwrap());

            let err = f.replicator.replica_file(&ctx, &node).await.unwrap_err();
            assert!(matches!(err, ReplError::Storage(_)));
            assert!(f.remote.node("proj", "repoA", "/x.bin").is_none());
        }

        #[tokio::test]
        async fn test_dir_created_once() {
            let f = fixture();
            let ctx = context(&f, ConflictStrategy::Skip);
            f.local.add_folder("proj", "repoA", "/sub");
            let dir = f.local.find_node_detail("proj", "repoA", "/sub").await.unwrap();

            f.replicator.replica_dir(&ctx, &dir).await.unwrap();
            f.replicator.replica_dir(&ctx, &dir).await.unwrap();
            assert!(f.remote.node("proj", "repoA", "/sub").unwrap().folder);
            assert_eq!(f.remote.node_create_count(), 1);
        }
    }

    mod packages {
        use super::*;

        #[tokio::test]
        async fn test_version_pushed_then_skipped() {
            let f = fixture();
            let ctx = context(&f, ConflictStrategy::Skip);
            let package = f.local.add_package("proj", "repoA", "npm://left-pad", RepositoryType::Npm);
            let artifact = f.local.add_file("proj", "repoA", "/left-pad/-/left-pad-1.0.0.tgz", b"tgz");
            let version = f.local.add_version(
                "proj",
                "repoA",
                "npm://left-pad",
                "1.0.0",
                &["/left-pad/-/left-pad-1.0.0.tgz"],
            );

            f.replicator.replica_package(&ctx, &package).await.unwrap();
            assert!(f.remote.has_package("proj", "repoA", "npm://left-pad"));

            assert!(f.replicator.replica_package_version(&ctx, &package, &version).await.unwrap());
            let key = blob_key(artifact.sha256.as_deref().unwrap()).unwrap();
            assert!(f.blobs.exists(&key).await.unwrap());
            assert!(f
                .remote
                .version_record("proj", "repoA", "npm://left-pad", "1.0.0")
                .is_some());

            assert!(!f.replicator.replica_package_version(&ctx, &package, &version).await.unwrap());
        }

        #[tokio::test]
        async fn test_existing_version_overwritten() {
            let f = fixture();
            let ctx = context(&f, ConflictStrategy::Overwrite);
            let package = f.local.add_package("proj", "repoA", "npm://a", RepositoryType::Npm);
            let version = f.local.add_version("proj", "repoA", "npm://a", "2.0.0", &[]);
            f.remote.insert_version("proj", "repoA", "npm://a", "2.0.0");

            assert!(f.replicator.replica_package_version(&ctx, &package, &version).await.unwrap());
            assert!(f
                .remote
                .version_record("proj", "repoA", "npm://a", "2.0.0")
                .unwrap()
                .overwrite);
        }

        #[tokio::test]
        async fn test_missing_artifact_fails_version() {
            let f = fixture();
            let ctx = context(&f, ConflictStrategy::Skip);
            let package = f.local.add_package("proj", "repoA", "npm://b", RepositoryType::Npm);
            let version = f.local.add_version("proj", "repoA", "npm://b", "1.0.0", &["/gone.tgz"]);

            let err = f
                .replicator
                .replica_package_version(&ctx, &package, &version)
                .await
                .unwrap_err();
            assert!(matches!(err, ReplError::NodeNotFound { .. }));
        }
    }
}
