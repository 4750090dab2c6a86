//! Error types for the replication subsystem.

use depot_storage::StorageError;
use thiserror::Error;

/// Result type alias for replication operations.
pub type ReplResult<T> = Result<T, ReplError>;

/// Errors that can occur in the replication subsystem.
#[derive(Debug, Error)]
pub enum ReplError {
    /// A node is missing from the local repository.
    #[error("node not found: {project_id}/{repo_name}{full_path}")]
    NodeNotFound {
        /// Project of the lookup.
        project_id: String,
        /// Repository of the lookup.
        repo_name: String,
        /// Full path that was requested.
        full_path: String,
    },

    /// A package key is unknown locally.
    #[error("package not found: {package_key}")]
    PackageNotFound {
        /// Package key that was requested.
        package_key: String,
    },

    /// A named package version is unknown locally.
    #[error("version {version} of package {package_key} not found")]
    VersionNotFound {
        /// Package key.
        package_key: String,
        /// Version name that was requested.
        version: String,
    },

    /// A local node cannot be replicated as stored.
    #[error("invalid node {full_path}: {reason}")]
    InvalidNode {
        /// Full path of the node.
        full_path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The remote cluster rejected or failed a call.
    #[error("remote cluster {cluster} error: {msg}")]
    Remote {
        /// Remote cluster name.
        cluster: String,
        /// Error message describing the issue.
        msg: String,
    },

    /// The remote holds different content and the conflict strategy forbids overwriting.
    #[error("conflict on {target}: remote content differs")]
    Conflict {
        /// Path or `package@version` that conflicts.
        target: String,
    },

    /// The record service failed to persist progress.
    #[error("record service error: {msg}")]
    Record {
        /// Error message describing the issue.
        msg: String,
    },

    /// Blob transfer failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration or task definition.
    #[error("configuration error: {msg}")]
    Config {
        /// Error message describing the issue.
        msg: String,
    },

    /// A per-cluster worker panicked or was cancelled.
    #[error("replication worker for {cluster} failed: {msg}")]
    WorkerFailed {
        /// Remote cluster name.
        cluster: String,
        /// Join failure description.
        msg: String,
    },
}
