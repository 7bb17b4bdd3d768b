// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use tracing::{info, info_span, warn};

use crate::config::SyncConfig;
use crate::directory::{DirectoryClient, RepositoryDescriptor};
use crate::error::{ConfigError, DirectoryError, OrchestrationError, SyncError};
use crate::pool::BoundedPool;
use crate::repository::RepositoryHandle;
use crate::sync::{SyncOptions, Synchronizer};

/// The outcome of synchronizing an organization.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Repositories the directory listed.
    pub found: usize,
    pub synchronized: Vec<RepositoryHandle>,
    pub failures: Vec<SyncError>,
    /// Requested names the directory did not list.
    pub unmatched: Vec<String>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Order handles and failures by repository name.
    pub fn sort(&mut self) {
        self.synchronized.sort_by(|a, b| a.name().cmp(b.name()));
        self.failures.sort_by(|a, b| a.name().cmp(b.name()));
    }
}

/// Drop every descriptor whose name was already listed. Paginated listings can repeat a
/// repository when the organization changes between pages, and two copies would share one
/// local path.
pub fn dedupe_repositories(descriptors: Vec<RepositoryDescriptor>) -> Vec<RepositoryDescriptor> {
    let mut seen = HashSet::new();
    descriptors
        .into_iter()
        .filter(|descriptor| {
            let first = seen.insert(descriptor.name.clone());
            if !first {
                warn!(
                    name = %descriptor.name,
                    id = descriptor.id,
                    "Dropping duplicate repository"
                );
            }
            first
        })
        .collect()
}

/// Keep the descriptors named in `filter`. An empty filter keeps everything. Also returns the
/// requested names that matched nothing.
pub fn select_repositories(
    descriptors: Vec<RepositoryDescriptor>,
    filter: &[String],
) -> (Vec<RepositoryDescriptor>, Vec<String>) {
    if filter.is_empty() {
        return (descriptors, Vec::new());
    }

    let wanted: HashSet<&str> = filter.iter().map(String::as_str).collect();
    let selected: Vec<RepositoryDescriptor> = descriptors
        .into_iter()
        .filter(|descriptor| wanted.contains(descriptor.name.as_str()))
        .collect();

    let present: HashSet<&str> = selected.iter().map(|d| d.name.as_str()).collect();
    let mut seen = HashSet::new();
    let unmatched = filter
        .iter()
        .filter(|name| !present.contains(name.as_str()) && seen.insert(name.as_str()))
        .cloned()
        .collect();

    (selected, unmatched)
}

pub struct Orchestrator {
    config: SyncConfig,
    directory: DirectoryClient,
    synchronizer: Synchronizer,
    pool: BoundedPool,
}

impl Orchestrator {
    pub fn new(config: SyncConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let directory = DirectoryClient::from_config(&config);
        let synchronizer = Synchronizer::new(SyncOptions::from_config(&config));
        let pool = BoundedPool::new("sync", config.sync_concurrency)?;
        Ok(Self {
            config,
            directory,
            synchronizer,
            pool,
        })
    }

    /// Replace the synchronizer, for example to change the retry policy.
    pub fn with_synchronizer(mut self, synchronizer: Synchronizer) -> Self {
        self.synchronizer = synchronizer;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn list_repositories(&self) -> Result<Vec<RepositoryDescriptor>, DirectoryError> {
        self.directory.list_repositories(&self.config.organization)
    }

    /// List the organization, keep the repositories named in `filter` (all of them when it is
    /// empty), and synchronize each one. Only a failed listing fails the whole call.
    #[tracing::instrument(skip(self), fields(org = %self.config.organization))]
    pub fn sync_all(&self, filter: &[String]) -> Result<SyncReport, OrchestrationError> {
        let descriptors = dedupe_repositories(self.list_repositories()?);
        let found = descriptors.len();

        let (selected, unmatched) = select_repositories(descriptors, filter);
        for name in &unmatched {
            warn!(%name, "Requested repository is not in the organization");
        }

        let root = &self.config.sync_root;
        std::fs::create_dir_all(root).map_err(|source| OrchestrationError::SyncRoot {
            path: root.clone(),
            source,
        })?;

        info!(
            found,
            selected = selected.len(),
            workers = self.pool.workers(),
            "Synchronizing"
        );
        let (synchronized, failures) = self.sync_descriptors(selected);

        let mut report = SyncReport {
            found,
            synchronized,
            failures,
            unmatched,
        };
        report.sort();
        info!(
            synchronized = report.synchronized.len(),
            failed = report.failures.len(),
            "Synchronization finished"
        );
        Ok(report)
    }

    /// Synchronize `descriptors` on the worker pool, once per distinct name. A failure is
    /// recorded and never affects the other repositories.
    pub fn sync_descriptors(
        &self,
        descriptors: Vec<RepositoryDescriptor>,
    ) -> (Vec<RepositoryHandle>, Vec<SyncError>) {
        let descriptors = dedupe_repositories(descriptors);
        let names: Vec<String> = descriptors.iter().map(|d| d.name.clone()).collect();
        let root = self.config.sync_root.as_path();
        let outcomes = self.pool.run_all(descriptors, |descriptor| {
            let span = info_span!("sync_worker", repo = %descriptor.name);
            let _guard = span.enter();
            let outcome = self.synchronizer.sync(&descriptor, root);
            if let Err(e) = &outcome {
                warn!(error = %e, "Synchronization failed");
            }
            outcome
        });

        let mut synchronized = Vec::new();
        let mut failures = Vec::new();
        for (name, outcome) in names.into_iter().zip(outcomes) {
            match outcome {
                Ok(Ok(handle)) => synchronized.push(handle),
                Ok(Err(e)) => failures.push(e),
                Err(panic) => {
                    warn!(%name, message = %panic.message, "Synchronization panicked");
                    failures.push(SyncError::Panicked {
                        name,
                        message: panic.message,
                    });
                }
            }
        }
        (synchronized, failures)
    }
}
