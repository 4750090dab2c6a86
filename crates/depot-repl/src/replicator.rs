//! Replication primitives the scheduler drives.

use async_trait::async_trait;

use crate::context::ReplicaContext;
use crate::error::ReplResult;
use crate::local::{NodeInfo, PackageSummary, PackageVersion};

/// One way of pushing data to a remote cluster.
///
/// Leaf primitives return `true` when data was transferred and `false` when
/// the remote already had it.
#[async_trait]
pub trait Replicator: Send + Sync {
    /// Ensure the remote project exists.
    async fn replica_project(&self, context: &ReplicaContext) -> ReplResult<()>;

    /// Ensure the remote repository exists.
    async fn replica_repo(&self, context: &ReplicaContext) -> ReplResult<()>;

    /// Sync package-level metadata. Not a leaf.
    async fn replica_package(&self, context: &ReplicaContext, package: &PackageSummary) -> ReplResult<()>;

    /// Replicate one package version.
    async fn replica_package_version(
        &self,
        context: &ReplicaContext,
        package: &PackageSummary,
        version: &PackageVersion,
    ) -> ReplResult<bool>;

    /// Replicate one file node.
    async fn replica_file(&self, context: &ReplicaContext, node: &NodeInfo) -> ReplResult<bool>;

    /// Replicate one folder node. Not a leaf.
    async fn replica_dir(&self, context: &ReplicaContext, node: &NodeInfo) -> ReplResult<()>;
}
