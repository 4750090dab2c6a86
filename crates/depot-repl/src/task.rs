//! Replication task model.

use serde::{Deserialize, Serialize};

/// What a run does after a leaf fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorStrategy {
    /// Stop the current traversal at the first failed leaf.
    #[default]
    FastFail,
    /// Record the failure and carry on with sibling leaves.
    Continue,
}

/// What to do when the remote already holds different content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStrategy {
    /// Leave the remote copy alone and count a skip.
    #[default]
    Skip,
    /// Replace the remote copy.
    Overwrite,
    /// Treat the difference as a leaf failure.
    FastFail,
}

/// Per-task behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaSetting {
    /// Leaf failure handling.
    pub error_strategy: ErrorStrategy,
    /// Remote conflict handling.
    pub conflict_strategy: ConflictStrategy,
}

/// Repository flavors. Only [`RepositoryType::Generic`] is a plain file tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepositoryType {
    /// Arbitrary files and folders.
    Generic,
    /// Container images.
    Docker,
    /// Maven artifacts.
    Maven,
    /// npm packages.
    Npm,
    /// Helm charts.
    Helm,
    /// RPM packages.
    Rpm,
    /// Conan packages.
    Conan,
}

impl RepositoryType {
    /// True for repositories replicated by walking nodes instead of packages.
    pub fn is_file_tree(&self) -> bool {
        matches!(self, RepositoryType::Generic)
    }
}

impl std::fmt::Display for RepositoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RepositoryType::Generic => "GENERIC",
            RepositoryType::Docker => "DOCKER",
            RepositoryType::Maven => "MAVEN",
            RepositoryType::Npm => "NPM",
            RepositoryType::Helm => "HELM",
            RepositoryType::Rpm => "RPM",
            RepositoryType::Conan => "CONAN",
        };
        f.write_str(name)
    }
}

/// Replicate one package, optionally only some of its versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageConstraint {
    /// Package key.
    pub package_key: String,
    /// Version names; every local version when `None`.
    #[serde(default)]
    pub versions: Option<Vec<String>>,
}

/// Replicate the subtree (or single file) at a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathConstraint {
    /// Full path inside the repository.
    pub path: String,
}

/// One local repository to replicate and where it lands remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaObjectInfo {
    /// Local repository name.
    pub local_repo_name: String,
    /// Project on the remote cluster.
    pub remote_project_id: String,
    /// Repository on the remote cluster.
    pub remote_repo_name: String,
    /// Repository flavor.
    pub repo_type: RepositoryType,
    /// Package constraints, if any.
    #[serde(default)]
    pub package_constraints: Option<Vec<PackageConstraint>>,
    /// Path constraints, if any.
    #[serde(default)]
    pub path_constraints: Option<Vec<PathConstraint>>,
}

impl ReplicaObjectInfo {
    /// Whole-repository object with no constraints.
    pub fn whole_repo(repo_name: &str, repo_type: RepositoryType) -> Self {
        Self {
            local_repo_name: repo_name.to_string(),
            remote_project_id: String::new(),
            remote_repo_name: repo_name.to_string(),
            repo_type,
            package_constraints: None,
            path_constraints: None,
        }
    }

    /// True when neither constraint list carries anything.
    pub fn include_all_data(&self) -> bool {
        self.package_constraints.as_ref().map_or(true, Vec::is_empty)
            && self.path_constraints.as_ref().map_or(true, Vec::is_empty)
    }
}

/// A remote cluster target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNodeInfo {
    /// Cluster name.
    pub name: String,
    /// Base URL of the cluster's replica API.
    pub url: String,
    /// Reference to stored credentials, resolved by the client factory.
    #[serde(default)]
    pub credentials_key: Option<String>,
}

/// A replication task definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaTaskInfo {
    /// Unique task key.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Local project the task replicates from.
    pub project_id: String,
    /// Target clusters.
    pub remote_clusters: Vec<ClusterNodeInfo>,
    /// Behavior switches.
    #[serde(default)]
    pub setting: ReplicaSetting,
}

/// A task together with the objects it replicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaTaskDetail {
    /// Task definition.
    pub task: ReplicaTaskInfo,
    /// Objects, processed in order.
    pub objects: Vec<ReplicaObjectInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_include_all_data() {
        let mut object = ReplicaObjectInfo::whole_repo("repoA", RepositoryType::Generic);
        assert!(object.include_all_data());

        object.package_constraints = Some(vec![]);
        object.path_constraints = Some(vec![]);
        assert!(object.include_all_data());

        object.path_constraints = Some(vec![PathConstraint { path: "/a".into() }]);
        assert!(!object.include_all_data());

        object.path_constraints = None;
        object.package_constraints = Some(vec![PackageConstraint {
            package_key: "npm://left-pad".into(),
            versions: None,
        }]);
        assert!(!object.include_all_data());
    }

    #[test]
    fn test_setting_defaults() {
        let setting = ReplicaSetting::default();
        assert_eq!(setting.error_strategy, ErrorStrategy::FastFail);
        assert_eq!(setting.conflict_strategy, ConflictStrategy::Skip);
    }

    #[test]
    fn test_only_generic_is_file_tree() {
        assert!(RepositoryType::Generic.is_file_tree());
        assert!(!RepositoryType::Maven.is_file_tree());
        assert!(!RepositoryType::Docker.is_file_tree());
    }

    #[test]
    fn test_task_json_shape() {
        let json = r#"{
            "key": "t1",
            "name": "nightly",
            "project_id": "proj",
            "remote_clusters": [{"name": "edge", "url": "http://edge"}],
            "setting": {"error_strategy": "CONTINUE"}
        }"#;
        let task: ReplicaTaskInfo = serde_json::from_str(json).unwrap();
        assert_eq!(task.setting.error_strategy, ErrorStrategy::Continue);
        assert_eq!(task.setting.conflict_strategy, ConflictStrategy::Skip);
        assert!(task.remote_clusters[0].credentials_key.is_none());
    }
}
