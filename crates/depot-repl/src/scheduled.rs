//! Scheduled replication: one run per (task object, remote cluster).
//!
//! A run checks the remote version, makes sure the remote project and
//! repository exist, then traverses either the whole repository or each
//! package and path constraint. Every traversal gets its own execution
//! context and therefore its own record detail, which is finalized whatever
//! the traversal's outcome.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ReplicationConfig;
use crate::context::{ReplicaContext, ReplicaExecutionContext};
use crate::error::{ReplError, ReplResult};
use crate::local::{LocalDataManager, NodeInfo, PackageListOption, PackageSummary, ROOT_PATH};
use crate::record::{RecordDetail, RecordDetailInitialRequest, RecordService};
use crate::replicator::Replicator;
use crate::task::{ErrorStrategy, PackageConstraint, PathConstraint};

/// Why a traversal stopped early.
#[derive(Debug)]
enum Interrupt {
    /// A leaf failed under fast-fail; already counted and recorded.
    Aborted,
    /// A non-leaf step failed; recorded once at the traversal boundary.
    Fatal(ReplError),
}

impl From<ReplError> for Interrupt {
    fn from(e: ReplError) -> Self {
        Interrupt::Fatal(e)
    }
}

/// Drives a [`Replicator`] over local repository data.
#[derive(Clone)]
pub struct ScheduledReplicator {
    replicator: Arc<dyn Replicator>,
    local: Arc<dyn LocalDataManager>,
    records: Arc<dyn RecordService>,
    config: ReplicationConfig,
}

impl ScheduledReplicator {
    /// Create a scheduler over the given collaborators.
    pub fn new(
        replicator: Arc<dyn Replicator>,
        local: Arc<dyn LocalDataManager>,
        records: Arc<dyn RecordService>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            replicator,
            local,
            records,
            config,
        }
    }

    /// Settings in use.
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Runs one full replication of `context.task_object`.
    ///
    /// Returns the finalized record details, one per traversal. Errors are
    /// run-fatal: the version query, project or repository replication, or the
    /// record service failed. Leaf and traversal failures never surface here;
    /// they are in the returned details and in `context.status`.
    pub async fn replica(&self, context: &mut ReplicaContext) -> ReplResult<Vec<RecordDetail>> {
        info!(
            task = %context.task.key,
            remote = %context.remote_cluster.name,
            repo = %context.local_repo_name(),
            "replication run started"
        );
        self.check_version(context).await?;
        self.replicator.replica_project(context).await?;
        self.replicator.replica_repo(context).await?;

        let mut details = Vec::new();
        if context.task_object.include_all_data() {
            details.push(self.replica_by_repo(context).await?);
        } else {
            let packages = context.task_object.package_constraints.clone().unwrap_or_default();
            let paths = context.task_object.path_constraints.clone().unwrap_or_default();
            for constraint in &packages {
                details.push(self.replica_by_package_constraint(context, constraint).await?);
            }
            for constraint in &paths {
                details.push(self.replica_by_path_constraint(context, constraint).await?);
            }
        }

        info!(
            task = %context.task.key,
            remote = %context.remote_cluster.name,
            status = ?context.status,
            details = details.len(),
            "replication run finished"
        );
        Ok(details)
    }

    /// Warns when the remote runs a different build; never fails on mismatch.
    async fn check_version(&self, context: &ReplicaContext) -> ReplResult<()> {
        let remote_version = context.cluster.client.version().await?;
        if remote_version != self.config.version {
            warn!(
                local_version = %self.config.version,
                remote_version = %remote_version,
                remote = %context.remote_cluster.name,
                "local cluster version differs from remote cluster"
            );
        }
        Ok(())
    }

    async fn replica_by_repo(&self, context: &mut ReplicaContext) -> ReplResult<RecordDetail> {
        let mut exec = self.initial_execution_context(context).await?;
        let result = self.traverse_repo(&mut exec).await;
        self.complete_record_detail(exec, result).await
    }

    async fn replica_by_package_constraint(
        &self,
        context: &mut ReplicaContext,
        constraint: &PackageConstraint,
    ) -> ReplResult<RecordDetail> {
        let mut exec = self.initial_execution_context(context).await?;
        let result: Result<(), Interrupt> = async {
            let (project_id, repo_name) = local_ids(&exec);
            let package = self
                .local
                .find_package_by_key(&project_id, &repo_name, &constraint.package_key)
                .await?;
            self.replica_by_package(&mut exec, &package, constraint.versions.as_deref())
                .await
        }
        .await;
        self.complete_record_detail(exec, result).await
    }

    async fn replica_by_path_constraint(
        &self,
        context: &mut ReplicaContext,
        constraint: &PathConstraint,
    ) -> ReplResult<RecordDetail> {
        let mut exec = self.initial_execution_context(context).await?;
        let result: Result<(), Interrupt> = async {
            let (project_id, repo_name) = local_ids(&exec);
            let node = self
                .local
                .find_node_detail(&project_id, &repo_name, &constraint.path)
                .await?;
            self.replica_by_path(&mut exec, node).await
        }
        .await;
        self.complete_record_detail(exec, result).await
    }

    async fn traverse_repo(&self, exec: &mut ReplicaExecutionContext<'_>) -> Result<(), Interrupt> {
        let (project_id, repo_name) = local_ids(exec);

        if exec.replica_context().local_repo_type().is_file_tree() {
            let root = self
                .local
                .find_node_detail(&project_id, &repo_name, ROOT_PATH)
                .await?;
            return self.replica_by_path(exec, root).await;
        }

        let mut option = PackageListOption {
            page_number: 1,
            page_size: self.config.package_page_size.max(1),
        };
        loop {
            let packages = self
                .local
                .list_package_page(&project_id, &repo_name, option)
                .await?;
            if packages.is_empty() {
                return Ok(());
            }
            debug!(page = option.page_number, count = packages.len(), "replicating package page");
            for package in &packages {
                self.replica_by_package(exec, package, None).await?;
            }
            option.page_number += 1;
        }
    }

    /// Breadth-first walk from `root`. Files are leaves; folders are
    /// replicated, then listed, and their sub-folders queued.
    async fn replica_by_path(
        &self,
        exec: &mut ReplicaExecutionContext<'_>,
        root: NodeInfo,
    ) -> Result<(), Interrupt> {
        let (project_id, repo_name) = local_ids(exec);
        let mut queue = VecDeque::from([root]);

        while let Some(node) = queue.pop_front() {
            if !node.folder {
                self.replica_file_leaf(exec, &node).await?;
                continue;
            }
            self.replicator.replica_dir(exec.replica_context(), &node).await?;
            let children = self
                .local
                .list_node(&project_id, &repo_name, &node.full_path)
                .await?;
            for child in children {
                if child.folder {
                    queue.push_back(child);
                } else {
                    self.replica_file_leaf(exec, &child).await?;
                }
            }
        }
        Ok(())
    }

    async fn replica_file_leaf(
        &self,
        exec: &mut ReplicaExecutionContext<'_>,
        node: &NodeInfo,
    ) -> Result<(), Interrupt> {
        let outcome = self.replicator.replica_file(exec.replica_context(), node).await;
        record_leaf(exec, &node.full_path, outcome)
    }

    /// Package metadata first, then each version as a leaf.
    async fn replica_by_package(
        &self,
        exec: &mut ReplicaExecutionContext<'_>,
        package: &PackageSummary,
        version_names: Option<&[String]>,
    ) -> Result<(), Interrupt> {
        let (project_id, repo_name) = local_ids(exec);
        self.replicator
            .replica_package(exec.replica_context(), package)
            .await?;

        match version_names {
            None => {
                let versions = self
                    .local
                    .list_all_version(&project_id, &repo_name, &package.key, self.config.version_page_size)
                    .await?;
                for version in &versions {
                    let outcome = self
                        .replicator
                        .replica_package_version(exec.replica_context(), package, version)
                        .await;
                    record_leaf(exec, &version_label(package, &version.name), outcome)?;
                }
            }
            Some(names) => {
                for name in names {
                    let outcome = match self
                        .local
                        .find_package_version(&project_id, &repo_name, &package.key, name)
                        .await
                    {
                        Ok(version) => {
                            self.replicator
                                .replica_package_version(exec.replica_context(), package, &version)
                                .await
                        }
                        Err(e) => Err(e),
                    };
                    record_leaf(exec, &version_label(package, name), outcome)?;
                }
            }
        }
        Ok(())
    }

    async fn initial_execution_context<'a>(
        &self,
        context: &'a mut ReplicaContext,
    ) -> ReplResult<ReplicaExecutionContext<'a>> {
        let request = RecordDetailInitialRequest {
            record_id: context.task_record.id.clone(),
            local_cluster: context.local_cluster.clone(),
            remote_cluster: context.remote_cluster.name.clone(),
            local_repo_name: context.local_repo_name().to_string(),
            repo_type: context.local_repo_type(),
        };
        let detail = self.records.initial_record_detail(request).await?;
        Ok(ReplicaExecutionContext::new(context, detail))
    }

    /// Persists the traversal's outcome. Always runs, whatever `result` is.
    async fn complete_record_detail(
        &self,
        mut exec: ReplicaExecutionContext<'_>,
        result: Result<(), Interrupt>,
    ) -> ReplResult<RecordDetail> {
        if let Err(Interrupt::Fatal(e)) = &result {
            warn!(detail = %exec.detail.id, error = %e, "replication traversal failed");
            exec.set_error_status(e.to_string());
        }
        let outcome = exec.execution_result(self.config.max_error_reason_len);
        info!(
            detail = %exec.detail.id,
            status = ?outcome.status,
            success = outcome.progress.success,
            skip = outcome.progress.skip,
            failed = outcome.progress.failed,
            "replication record detail completed"
        );
        self.records
            .complete_record_detail(&exec.detail.id, outcome)
            .await
    }
}

fn local_ids(exec: &ReplicaExecutionContext<'_>) -> (String, String) {
    let context = exec.replica_context();
    (
        context.local_project_id().to_string(),
        context.local_repo_name().to_string(),
    )
}

fn version_label(package: &PackageSummary, version: &str) -> String {
    format!("{}@{}", package.key, version)
}

/// Counts one leaf outcome. Under fast-fail a failure stops the traversal.
fn record_leaf(
    exec: &mut ReplicaExecutionContext<'_>,
    label: &str,
    outcome: ReplResult<bool>,
) -> Result<(), Interrupt> {
    match outcome {
        Ok(true) => exec.progress.success += 1,
        Ok(false) => exec.progress.skip += 1,
        Err(e) => {
            warn!(leaf = label, error = %e, "replication leaf failed");
            exec.record_leaf_failure(label, &e);
            if exec.error_strategy() == ErrorStrategy::FastFail {
                return Err(Interrupt::Aborted);
            }
        }
    }
    Ok(())
}
