//! Read-only access to the local repository metadata store.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReplResult;
use crate::task::RepositoryType;

/// Full path of a repository root.
pub const ROOT_PATH: &str = "/";

/// A file or folder in a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Owning project.
    pub project_id: String,
    /// Owning repository.
    pub repo_name: String,
    /// Absolute path inside the repository, `/` for the root.
    pub full_path: String,
    /// Last path segment.
    pub name: String,
    /// True for folders.
    pub folder: bool,
    /// Size in bytes; zero for folders.
    pub size: u64,
    /// Hex SHA-256 of the content; `None` for folders.
    pub sha256: Option<String>,
    /// Hex MD5 of the content, when known.
    pub md5: Option<String>,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
}

/// Package listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSummary {
    /// Owning project.
    pub project_id: String,
    /// Owning repository.
    pub repo_name: String,
    /// Unique package key, e.g. `npm://left-pad`.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Repository flavor.
    pub repo_type: RepositoryType,
    /// Latest version name.
    pub latest: Option<String>,
    /// Number of versions.
    pub versions: u64,
}

/// One version of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersion {
    /// Version name.
    pub name: String,
    /// Total artifact size in bytes.
    pub size: u64,
    /// Main artifact path.
    pub content_path: Option<String>,
    /// Every node path making up the version.
    pub artifact_paths: Vec<String>,
    /// Format-specific metadata.
    #[serde(default)]
    pub metadata: std::collections::BTreeMap<String, String>,
}

impl PackageVersion {
    /// Artifact paths, falling back to the content path.
    pub fn node_paths(&self) -> Vec<String> {
        if !self.artifact_paths.is_empty() {
            return self.artifact_paths.clone();
        }
        self.content_path.iter().cloned().collect()
    }
}

/// Page request for package listings; pages are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageListOption {
    /// One-based page number.
    pub page_number: usize,
    /// Page size.
    pub page_size: usize,
}

/// Page request for version listings; pages are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionListOption {
    /// One-based page number.
    pub page_number: usize,
    /// Page size.
    pub page_size: usize,
}

/// Where a node's bytes can be read from.
#[derive(Debug, Clone)]
pub enum NodeContent {
    /// A file on local disk; large files go up in parts.
    File(PathBuf),
    /// Bytes already in memory.
    Bytes(Bytes),
}

/// Local repository facade. Implementations must be safe to share between runs.
#[async_trait]
pub trait LocalDataManager: Send + Sync {
    /// Node at `full_path`, or [`ReplError::NodeNotFound`](crate::ReplError::NodeNotFound).
    async fn find_node_detail(&self, project_id: &str, repo_name: &str, full_path: &str) -> ReplResult<NodeInfo>;

    /// Direct children of the folder at `full_path`, in listing order.
    async fn list_node(&self, project_id: &str, repo_name: &str, full_path: &str) -> ReplResult<Vec<NodeInfo>>;

    /// One page of packages; an empty page ends pagination.
    async fn list_package_page(
        &self,
        project_id: &str,
        repo_name: &str,
        option: PackageListOption,
    ) -> ReplResult<Vec<PackageSummary>>;

    /// Package by key, or [`ReplError::PackageNotFound`](crate::ReplError::PackageNotFound).
    async fn find_package_by_key(&self, project_id: &str, repo_name: &str, package_key: &str) -> ReplResult<PackageSummary>;

    /// One page of a package's versions; an empty page ends pagination.
    async fn list_version_page(
        &self,
        project_id: &str,
        repo_name: &str,
        package_key: &str,
        option: VersionListOption,
    ) -> ReplResult<Vec<PackageVersion>>;

    /// Named version, or [`ReplError::VersionNotFound`](crate::ReplError::VersionNotFound).
    async fn find_package_version(
        &self,
        project_id: &str,
        repo_name: &str,
        package_key: &str,
        version: &str,
    ) -> ReplResult<PackageVersion>;

    /// Content of a file node.
    async fn node_content(&self, node: &NodeInfo) -> ReplResult<NodeContent>;

    /// Every version of a package, paging until an empty page.
    async fn list_all_version(
        &self,
        project_id: &str,
        repo_name: &str,
        package_key: &str,
        page_size: usize,
    ) -> ReplResult<Vec<PackageVersion>> {
        let mut option = VersionListOption {
            page_number: 1,
            page_size: page_size.max(1),
        };
        let mut versions = Vec::new();
        loop {
            let page = self
                .list_version_page(project_id, repo_name, package_key, option)
                .await?;
            if page.is_empty() {
                return Ok(versions);
            }
            versions.extend(page);
            option.page_number += 1;
        }
    }
}

/// Parent folder of `full_path`; `None` for the root.
pub fn parent_path(full_path: &str) -> Option<String> {
    let trimmed = full_path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind('/') {
        Some(0) => Some(ROOT_PATH.to_string()),
        Some(idx) => Some(trimmed[..idx].to_string()),
        None => Some(ROOT_PATH.to_string()),
    }
}

/// Normalizes to a leading slash and no trailing slash.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        ROOT_PATH.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
