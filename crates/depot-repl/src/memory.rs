//! In-memory collaborators: local data, records, and a remote cluster.
//!
//! Used by the crate's tests and by downstream crates that want to exercise a
//! replication run without a metadata store or a network.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ReplError, ReplResult};
use crate::local::{
    normalize_path, parent_path, LocalDataManager, NodeContent, NodeInfo, PackageListOption,
    PackageSummary, PackageVersion, VersionListOption,
};
use crate::record::{
    ExecutionResult, ExecutionStatus, RecordDetail, RecordDetailInitialRequest, RecordService,
    ReplicaRecordInfo,
};
use crate::remote::{
    ArtifactReplicaClient, ClusterHandle, NodeCreateRequest, PackageUpsertRequest,
    PackageVersionCreateRequest, ProjectCreateRequest, RepoCreateRequest, ReplicaClientFactory,
};
use crate::task::{ClusterNodeInfo, RepositoryType};

type RepoKey = (String, String);

fn repo_key(project_id: &str, repo_name: &str) -> RepoKey {
    (project_id.to_string(), repo_name.to_string())
}

fn last_segment(full_path: &str) -> String {
    full_path.rsplit('/').next().unwrap_or_default().to_string()
}

fn page<T: Clone>(items: &[T], page_number: usize, page_size: usize) -> Vec<T> {
    let start = page_number.saturating_sub(1).saturating_mul(page_size);
    items.iter().skip(start).take(page_size).cloned().collect()
}

#[derive(Default)]
struct RepoData {
    nodes: HashMap<String, NodeInfo>,
    children: HashMap<String, Vec<String>>,
    content: HashMap<String, Bytes>,
    packages: Vec<PackageSummary>,
    versions: HashMap<String, Vec<PackageVersion>>,
    failing_listings: HashSet<String>,
}

/// Local repository data held in memory. Listing order is insertion order.
#[derive(Default)]
pub struct MemoryDataManager {
    repos: Mutex<HashMap<RepoKey, RepoData>>,
    package_page_requests: Mutex<usize>,
}

impl MemoryDataManager {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_folder(data: &mut RepoData, project_id: &str, repo_name: &str, full_path: &str) {
        if data.nodes.contains_key(full_path) {
            return;
        }
        if let Some(parent) = parent_path(full_path) {
            Self::ensure_folder(data, project_id, repo_name, &parent);
            data.children
                .entry(parent)
                .or_default()
                .push(full_path.to_string());
        }
        data.nodes.insert(
            full_path.to_string(),
            NodeInfo {
                project_id: project_id.to_string(),
                repo_name: repo_name.to_string(),
                full_path: full_path.to_string(),
                name: last_segment(full_path),
                folder: true,
                size: 0,
                sha256: None,
                md5: None,
                last_modified: Utc::now(),
            },
        );
    }

    /// Adds a folder and any missing ancestors.
    pub fn add_folder(&self, project_id: &str, repo_name: &str, full_path: &str) {
        let full_path = normalize_path(full_path);
        let mut repos = self.repos.lock().unwrap();
        let data = repos.entry(repo_key(project_id, repo_name)).or_default();
        Self::ensure_folder(data, project_id, repo_name, &full_path);
    }

    /// Adds a file and any missing ancestor folders.
    pub fn add_file(&self, project_id: &str, repo_name: &str, full_path: &str, content: &[u8]) -> NodeInfo {
        let full_path = normalize_path(full_path);
        let mut repos = self.repos.lock().unwrap();
        let data = repos.entry(repo_key(project_id, repo_name)).or_default();
        let parent = parent_path(&full_path).unwrap_or_else(|| "/".to_string());
        Self::ensure_folder(data, project_id, repo_name, &parent);

        let node = NodeInfo {
            project_id: project_id.to_string(),
            repo_name: repo_name.to_string(),
            full_path: full_path.clone(),
            name: last_segment(&full_path),
            folder: false,
            size: content.len() as u64,
            sha256: Some(hex::encode(Sha256::digest(content))),
            md5: None,
            last_modified: Utc::now(),
        };
        if data.nodes.insert(full_path.clone(), node.clone()).is_none() {
            data.children.entry(parent).or_default().push(full_path.clone());
        }
        data.content.insert(full_path, Bytes::copy_from_slice(content));
        node
    }

    /// Adds a package summary with no versions.
    pub fn add_package(&self, project_id: &str, repo_name: &str, key: &str, repo_type: RepositoryType) -> PackageSummary {
        let summary = PackageSummary {
            project_id: project_id.to_string(),
            repo_name: repo_name.to_string(),
            key: key.to_string(),
            name: key.rsplit("://").next().unwrap_or(key).to_string(),
            repo_type,
            latest: None,
            versions: 0,
        };
        let mut repos = self.repos.lock().unwrap();
        repos
            .entry(repo_key(project_id, repo_name))
            .or_default()
            .packages
            .push(summary.clone());
        summary
    }

    /// Adds a version to an existing package and returns it.
    pub fn add_version(&self, project_id: &str, repo_name: &str, key: &str, version: &str, artifact_paths: &[&str]) -> PackageVersion {
        let version = PackageVersion {
            name: version.to_string(),
            size: 0,
            content_path: artifact_paths.first().map(|p| p.to_string()),
            artifact_paths: artifact_paths.iter().map(|p| p.to_string()).collect(),
            metadata: Default::default(),
        };
        let mut repos = self.repos.lock().unwrap();
        let data = repos.entry(repo_key(project_id, repo_name)).or_default();
        if let Some(summary) = data.packages.iter_mut().find(|p| p.key == key) {
            summary.versions += 1;
            summary.latest = Some(version.name.clone());
        }
        data.versions
            .entry(key.to_string())
            .or_default()
            .push(version.clone());
        version
    }

    /// Makes listing the children of `full_path` fail.
    pub fn fail_list_node(&self, project_id: &str, repo_name: &str, full_path: &str) {
        let mut repos = self.repos.lock().unwrap();
        repos
            .entry(repo_key(project_id, repo_name))
            .or_default()
            .failing_listings
            .insert(normalize_path(full_path));
    }

    /// Number of package pages requested so far.
    pub fn package_page_requests(&self) -> usize {
        *self.package_page_requests.lock().unwrap()
    }
}

#[async_trait]
impl LocalDataManager for MemoryDataManager {
    async fn find_node_detail(&self, project_id: &str, repo_name: &str, full_path: &str) -> ReplResult<NodeInfo> {
        let full_path = normalize_path(full_path);
        let repos = self.repos.lock().unwrap();
        repos
            .get(&repo_key(project_id, repo_name))
            .and_then(|data| data.nodes.get(&full_path))
            .cloned()
            .ok_or_else(|| ReplError::NodeNotFound {
                project_id: project_id.to_string(),
                repo_name: repo_name.to_string(),
                full_path,
            })
    }

    async fn list_node(&self, project_id: &str, repo_name: &str, full_path: &str) -> ReplResult<Vec<NodeInfo>> {
        let full_path = normalize_path(full_path);
        let repos = self.repos.lock().unwrap();
        let Some(data) = repos.get(&repo_key(project_id, repo_name)) else {
            return Ok(Vec::new());
        };
        if data.failing_listings.contains(&full_path) {
            return Err(ReplError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("listing {} failed", full_path),
            )));
        }
        Ok(data
            .children
            .get(&full_path)
            .map(|paths| paths.iter().filter_map(|p| data.nodes.get(p).cloned()).collect())
            .unwrap_or_default())
    }

    async fn list_package_page(
        &self,
        project_id: &str,
        repo_name: &str,
        option: PackageListOption,
    ) -> ReplResult<Vec<PackageSummary>> {
        *self.package_page_requests.lock().unwrap() += 1;
        let repos = self.repos.lock().unwrap();
        Ok(repos
            .get(&repo_key(project_id, repo_name))
            .map(|data| page(&data.packages, option.page_number, option.page_size))
            .unwrap_or_default())
    }

    async fn find_package_by_key(&self, project_id: &str, repo_name: &str, package_key: &str) -> ReplResult<PackageSummary> {
        let repos = self.repos.lock().unwrap();
        repos
            .get(&repo_key(project_id, repo_name))
            .and_then(|data| data.packages.iter().find(|p| p.key == package_key))
            .cloned()
            .ok_or_else(|| ReplError::PackageNotFound {
                package_key: package_key.to_string(),
            })
    }

    async fn list_version_page(
        &self,
        project_id: &str,
        repo_name: &str,
        package_key: &str,
        option: VersionListOption,
    ) -> ReplResult<Vec<PackageVersion>> {
        let repos = self.repos.lock().unwrap();
        Ok(repos
            .get(&repo_key(project_id, repo_name))
            .and_then(|data| data.versions.get(package_key))
            .map(|versions| page(versions, option.page_number, option.page_size))
            .unwrap_or_default())
    }

    async fn find_package_version(
        &self,
        project_id: &str,
        repo_name: &str,
        package_key: &str,
        version: &str,
    ) -> ReplResult<PackageVersion> {
        let repos = self.repos.lock().unwrap();
        repos
            .get(&repo_key(project_id, repo_name))
            .and_then(|data| data.versions.get(package_key))
            .and_then(|versions| versions.iter().find(|v| v.name == version))
            .cloned()
            .ok_or_else(|| ReplError::VersionNotFound {
                package_key: package_key.to_string(),
                version: version.to_string(),
            })
    }

    async fn node_content(&self, node: &NodeInfo) -> ReplResult<NodeContent> {
        let repos = self.repos.lock().unwrap();
        repos
            .get(&repo_key(&node.project_id, &node.repo_name))
            .and_then(|data| data.content.get(&node.full_path))
            .cloned()
            .map(NodeContent::Bytes)
            .ok_or_else(|| ReplError::NodeNotFound {
                project_id: node.project_id.clone(),
                repo_name: node.repo_name.clone(),
                full_path: node.full_path.clone(),
            })
    }
}

#[derive(Default)]
struct RecordState {
    records: Vec<ReplicaRecordInfo>,
    details: Vec<RecordDetail>,
    fail_complete_detail: bool,
}

/// Record service keeping everything in memory.
#[derive(Default)]
pub struct MemoryRecordService {
    state: Mutex<RecordState>,
}

impl MemoryRecordService {
    /// Empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Task-level records in creation order.
    pub fn records(&self) -> Vec<ReplicaRecordInfo> {
        self.state.lock().unwrap().records.clone()
    }

    /// Record details in creation order.
    pub fn details(&self) -> Vec<RecordDetail> {
        self.state.lock().unwrap().details.clone()
    }

    /// Makes every detail finalization fail.
    pub fn set_fail_complete_detail(&self, fail: bool) {
        self.state.lock().unwrap().fail_complete_detail = fail;
    }
}

#[async_trait]
impl RecordService for MemoryRecordService {
    async fn initial_record(&self, task_key: &str) -> ReplResult<ReplicaRecordInfo> {
        let record = ReplicaRecordInfo {
            id: uuid::Uuid::new_v4().to_string(),
            task_key: task_key.to_string(),
            status: ExecutionStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            error_reason: None,
        };
        self.state.lock().unwrap().records.push(record.clone());
        Ok(record)
    }

    async fn complete_record(
        &self,
        record_id: &str,
        status: ExecutionStatus,
        error_reason: Option<String>,
    ) -> ReplResult<ReplicaRecordInfo> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .records
            .iter_mut()
            .find(|r| r.id == record_id)
            .ok_or_else(|| ReplError::Record {
                msg: format!("record {} not found", record_id),
            })?;
        record.status = status;
        record.error_reason = error_reason;
        record.end_time = Some(Utc::now());
        Ok(record.clone())
    }

    async fn initial_record_detail(&self, request: RecordDetailInitialRequest) -> ReplResult<RecordDetail> {
        let detail = RecordDetail {
            id: uuid::Uuid::new_v4().to_string(),
            record_id: request.record_id,
            local_cluster: request.local_cluster,
            remote_cluster: request.remote_cluster,
            local_repo_name: request.local_repo_name,
            repo_type: request.repo_type,
            status: ExecutionStatus::Running,
            progress: Default::default(),
            start_time: Utc::now(),
            end_time: None,
            error_reason: None,
        };
        self.state.lock().unwrap().details.push(detail.clone());
        Ok(detail)
    }

    async fn complete_record_detail(&self, detail_id: &str, result: ExecutionResult) -> ReplResult<RecordDetail> {
        let mut state = self.state.lock().unwrap();
        if state.fail_complete_detail {
            return Err(ReplError::Record {
                msg: format!("cannot persist detail {}", detail_id),
            });
        }
        let detail = state
            .details
            .iter_mut()
            .find(|d| d.id == detail_id)
            .ok_or_else(|| ReplError::Record {
                msg: format!("detail {} not found", detail_id),
            })?;
        detail.status = result.status;
        detail.progress = result.progress;
        detail.error_reason = result.error_reason;
        detail.end_time = Some(Utc::now());
        Ok(detail.clone())
    }
}

#[derive(Default)]
struct RemoteState {
    projects: HashSet<String>,
    repos: HashSet<RepoKey>,
    packages: HashMap<(String, String, String), PackageUpsertRequest>,
    versions: HashMap<(String, String, String, String), PackageVersionCreateRequest>,
    nodes: HashMap<(String, String, String), NodeInfo>,
    node_creates: usize,
    fail_project: Option<String>,
    failing_nodes: HashSet<String>,
}

/// A remote cluster's replica API held in memory.
pub struct MockReplicaClient {
    cluster: String,
    version: String,
    state: Mutex<RemoteState>,
}

impl MockReplicaClient {
    /// Remote reporting `version`.
    pub fn new(version: &str) -> Self {
        Self::named("mock", version)
    }

    /// Remote called `cluster` reporting `version`.
    pub fn named(cluster: &str, version: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            version: version.to_string(),
            state: Mutex::new(RemoteState::default()),
        }
    }

    fn remote_error(&self, msg: String) -> ReplError {
        ReplError::Remote {
            cluster: self.cluster.clone(),
            msg,
        }
    }

    /// Makes project replication fail with `msg`.
    pub fn fail_project(&self, msg: &str) {
        self.state.lock().unwrap().fail_project = Some(msg.to_string());
    }

    /// Makes node creation at `full_path` fail.
    pub fn fail_node_create(&self, full_path: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_nodes
            .insert(normalize_path(full_path));
    }

    /// Seeds a node as if it had been replicated before.
    pub fn insert_node(&self, node: NodeInfo) {
        let key = (node.project_id.clone(), node.repo_name.clone(), node.full_path.clone());
        self.state.lock().unwrap().nodes.insert(key, node);
    }

    /// Seeds a package version as if it had been replicated before.
    pub fn insert_version(&self, project_id: &str, repo_name: &str, package_key: &str, version: &str) {
        let request = PackageVersionCreateRequest {
            project_id: project_id.to_string(),
            repo_name: repo_name.to_string(),
            package_key: package_key.to_string(),
            version_name: version.to_string(),
            size: 0,
            artifact_paths: Vec::new(),
            overwrite: false,
        };
        self.state.lock().unwrap().versions.insert(
            (
                project_id.to_string(),
                repo_name.to_string(),
                package_key.to_string(),
                version.to_string(),
            ),
            request,
        );
    }

    /// Remote node at `full_path`.
    pub fn node(&self, project_id: &str, repo_name: &str, full_path: &str) -> Option<NodeInfo> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(&(project_id.to_string(), repo_name.to_string(), full_path.to_string()))
            .cloned()
    }

    /// Registered version, if any.
    pub fn version_record(&self, project_id: &str, repo_name: &str, package_key: &str, version: &str) -> Option<PackageVersionCreateRequest> {
        self.state
            .lock()
            .unwrap()
            .versions
            .get(&(
                project_id.to_string(),
                repo_name.to_string(),
                package_key.to_string(),
                version.to_string(),
            ))
            .cloned()
    }

    /// True if the project was replicated.
    pub fn has_project(&self, project_id: &str) -> bool {
        self.state.lock().unwrap().projects.contains(project_id)
    }

    /// True if the repository was replicated.
    pub fn has_repo(&self, project_id: &str, repo_name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .repos
            .contains(&repo_key(project_id, repo_name))
    }

    /// True if the package summary was replicated.
    pub fn has_package(&self, project_id: &str, repo_name: &str, package_key: &str) -> bool {
        self.state.lock().unwrap().packages.contains_key(&(
            project_id.to_string(),
            repo_name.to_string(),
            package_key.to_string(),
        ))
    }

    /// Number of node create calls that succeeded.
    pub fn node_create_count(&self) -> usize {
        self.state.lock().unwrap().node_creates
    }
}

#[async_trait]
impl ArtifactReplicaClient for MockReplicaClient {
    async fn version(&self) -> ReplResult<String> {
        Ok(self.version.clone())
    }

    async fn replica_project(&self, request: ProjectCreateRequest) -> ReplResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(msg) = state.fail_project.clone() {
            return Err(self.remote_error(msg));
        }
        state.projects.insert(request.name);
        Ok(())
    }

    async fn replica_repo(&self, request: RepoCreateRequest) -> ReplResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.projects.contains(&request.project_id) {
            return Err(self.remote_error(format!("project {} does not exist", request.project_id)));
        }
        state.repos.insert((request.project_id, request.name));
        Ok(())
    }

    async fn replica_package(&self, request: PackageUpsertRequest) -> ReplResult<()> {
        let key = (
            request.project_id.clone(),
            request.repo_name.clone(),
            request.package_key.clone(),
        );
        self.state.lock().unwrap().packages.insert(key, request);
        Ok(())
    }

    async fn check_package_version_exist(
        &self,
        project_id: &str,
        repo_name: &str,
        package_key: &str,
        version: &str,
    ) -> ReplResult<bool> {
        Ok(self
            .version_record(project_id, repo_name, package_key, version)
            .is_some())
    }

    async fn replica_package_version(&self, request: PackageVersionCreateRequest) -> ReplResult<()> {
        let key = (
            request.project_id.clone(),
            request.repo_name.clone(),
            request.package_key.clone(),
            request.version_name.clone(),
        );
        let mut state = self.state.lock().unwrap();
        if state.versions.contains_key(&key) && !request.overwrite {
            return Err(self.remote_error(format!(
                "version {}@{} already exists",
                request.package_key, request.version_name
            )));
        }
        state.versions.insert(key, request);
        Ok(())
    }

    async fn check_node_exist(&self, project_id: &str, repo_name: &str, full_path: &str) -> ReplResult<Option<NodeInfo>> {
        Ok(self.node(project_id, repo_name, full_path))
    }

    async fn replica_node_create(&self, request: NodeCreateRequest) -> ReplResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_nodes.contains(&request.full_path) {
            return Err(self.remote_error(format!("cannot create node {}", request.full_path)));
        }
        let key = (
            request.project_id.clone(),
            request.repo_name.clone(),
            request.full_path.clone(),
        );
        if state.nodes.contains_key(&key) && !request.overwrite {
            return Err(self.remote_error(format!("node {} already exists", request.full_path)));
        }
        debug!(path = %request.full_path, folder = request.folder, "mock remote node created");
        state.nodes.insert(
            key,
            NodeInfo {
                project_id: request.project_id,
                repo_name: request.repo_name,
                name: last_segment(&request.full_path),
                full_path: request.full_path,
                folder: request.folder,
                size: request.size,
                sha256: request.sha256,
                md5: request.md5,
                last_modified: Utc::now(),
            },
        );
        state.node_creates += 1;
        Ok(())
    }
}

/// Factory handing out pre-built cluster handles by name.
#[derive(Default)]
pub struct MemoryClusterFactory {
    clusters: Mutex<HashMap<String, ClusterHandle>>,
}

impl MemoryClusterFactory {
    /// Empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handle returned for cluster `name`.
    pub fn register(&self, name: &str, handle: ClusterHandle) {
        self.clusters
            .lock()
            .unwrap()
            .insert(name.to_string(), handle);
    }
}

#[async_trait]
impl ReplicaClientFactory for MemoryClusterFactory {
    async fn connect(&self, cluster: &ClusterNodeInfo) -> ReplResult<ClusterHandle> {
        self.clusters
            .lock()
            .unwrap()
            .get(&cluster.name)
            .cloned()
            .ok_or_else(|| ReplError::Remote {
                cluster: cluster.name.clone(),
                msg: format!("cannot connect to {}", cluster.url),
            })
    }
}
