// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::time::Duration;

use git2::{ErrorClass, ErrorCode, Repository};
use tracing::{debug, info, warn};

use autoupgrade_util::git_helper::{self, TransferSettings};
use autoupgrade_util::retry::Backoff;

use crate::config::SyncConfig;
use crate::directory::RepositoryDescriptor;
use crate::error::SyncError;
use crate::primary_branch::{resolve_primary_branch, PrimaryBranch};
use crate::repository::{checked_local_path, RepositoryHandle, Transport};

/// How every repository in a run is synchronized.
#[derive(Clone, Debug, Default)]
pub struct SyncOptions {
    pub reset_local_changes: bool,
    pub working_branch: Option<String>,
    pub transport: Transport,
    pub token: Option<String>,
    pub operation_timeout: Option<Duration>,
    pub backoff: Backoff,
}

impl SyncOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            reset_local_changes: config.reset_local_changes,
            working_branch: config.working_branch.clone(),
            transport: config.transport,
            token: config.token.clone(),
            operation_timeout: config.operation_timeout,
            backoff: Backoff {
                retries: config.retries,
                ..Backoff::default()
            },
        }
    }
}

/// What a pull did to the primary branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PullOutcome {
    UpToDate,
    FastForwarded,
    AheadOfUpstream,
}

/// Brings one local clone in line with its remote.
#[derive(Clone, Debug)]
pub struct Synchronizer {
    options: SyncOptions,
}

impl Synchronizer {
    pub fn new(options: SyncOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Clone or update `descriptor` under `local_root`, normalize it to its primary branch, and
    /// move it onto the working branch when one is configured.
    #[tracing::instrument(skip_all, fields(repo = %descriptor.name))]
    pub fn sync(
        &self,
        descriptor: &RepositoryDescriptor,
        local_root: &Path,
    ) -> Result<RepositoryHandle, SyncError> {
        let name = descriptor.name.as_str();
        let path = checked_local_path(local_root, descriptor).ok_or_else(|| {
            SyncError::InvalidName {
                name: name.to_owned(),
            }
        })?;

        let (repo, freshly_cloned) = match git_helper::open_repository(&path) {
            Ok(Some(repo)) => {
                debug!(path = ?path, "Found existing clone");
                (repo, false)
            }
            Ok(None) => (self.clone_with_retries(descriptor, &path)?, true),
            Err(source) => {
                return Err(SyncError::Open {
                    name: name.to_owned(),
                    path,
                    source,
                })
            }
        };

        let refnames = git_helper::reference_names(&repo).map_err(|source| SyncError::Open {
            name: name.to_owned(),
            path: path.clone(),
            source,
        })?;
        let primary =
            resolve_primary_branch(&refnames).ok_or_else(|| SyncError::NoPrimaryBranch {
                name: name.to_owned(),
            })?;
        debug!(primary = %primary.refname(), "Resolved primary branch");

        self.align_to_primary(&repo, &primary)
            .map_err(|source| SyncError::Checkout {
                name: name.to_owned(),
                branch: primary.name().to_owned(),
                source,
            })?;

        let mut pull = None;
        if !freshly_cloned {
            if self.options.reset_local_changes {
                info!("Discarding local changes");
                git_helper::hard_reset_to_head(&repo).map_err(|source| SyncError::Reset {
                    name: name.to_owned(),
                    source,
                })?;
            }

            match primary.local_branch() {
                Some(branch) => {
                    let outcome = self.pull(&repo, branch).map_err(|source| SyncError::Pull {
                        name: name.to_owned(),
                        branch: branch.to_owned(),
                        source,
                    })?;
                    info!(%branch, ?outcome, "Pulled");
                    pull = Some(outcome);
                }
                None => warn!(
                    primary = %primary.refname(),
                    "Primary reference is not a branch, not pulling"
                ),
            }
        }

        if let Some(working_branch) = &self.options.working_branch {
            Self::enter_working_branch(&repo, working_branch).map_err(|source| {
                SyncError::WorkingBranch {
                    name: name.to_owned(),
                    branch: working_branch.clone(),
                    source,
                }
            })?;
        }

        let current_branch = git_helper::current_branch_name(&repo);
        info!(freshly_cloned, current_branch = ?current_branch, "Synchronized");
        Ok(RepositoryHandle {
            descriptor: descriptor.clone(),
            local_root: local_root.to_owned(),
            primary_branch: primary.name().to_owned(),
            current_branch,
            freshly_cloned,
            pull,
        })
    }

    fn transfer_settings(&self) -> TransferSettings {
        TransferSettings::new(self.options.token.clone(), self.options.operation_timeout)
    }

    fn clone_with_retries(
        &self,
        descriptor: &RepositoryDescriptor,
        path: &Path,
    ) -> Result<Repository, SyncError> {
        let url = self.options.transport.url_for(descriptor);
        let existed_before = path.exists();
        info!(%url, "Cloning");

        self.options
            .backoff
            .run(
                &format!("clone {}", descriptor.name),
                |attempt| {
                    if attempt > 0 && !existed_before {
                        remove_partial_clone(path);
                    }
                    let settings = self.transfer_settings();
                    git_helper::clone_repository(url, path, &settings)
                        .map_err(|e| self.explain_timeout(e, &settings))
                },
                is_transient,
            )
            .map_err(|source| {
                if !existed_before {
                    remove_partial_clone(path);
                }
                SyncError::Clone {
                    name: descriptor.name.clone(),
                    source,
                }
            })
    }

    fn align_to_primary(
        &self,
        repo: &Repository,
        primary: &PrimaryBranch,
    ) -> Result<(), git2::Error> {
        let head = git_helper::head_reference_name(repo)?;
        match primary {
            PrimaryBranch::Local(branch) => {
                let refname = primary.refname();
                if head.as_deref() != Some(refname.as_str()) {
                    info!(%branch, "Checking out primary branch");
                    git_helper::checkout_reference(repo, &refname)?;
                }
            }
            PrimaryBranch::RemoteTracking { remote, branch } => {
                let target = repo.refname_to_id(&primary.refname())?;
                if git_helper::ensure_local_branch(repo, branch, target)? {
                    git_helper::set_upstream(repo, branch, &format!("{}/{}", remote, branch))?;
                    info!(%branch, %remote, "Created local primary branch");
                }
                git_helper::checkout_reference(repo, &format!("refs/heads/{}", branch))?;
            }
            PrimaryBranch::Detached(refname) => {
                let target = repo.refname_to_id(refname)?;
                let at_target = repo.head_detached()?
                    && git_helper::get_head_commit(repo)?.id() == target;
                if !at_target {
                    info!(%refname, "Checking out primary reference");
                    git_helper::checkout_detached(repo, refname)?;
                }
            }
        }
        Ok(())
    }

    /// Fetch the upstream of the local `branch` and fast-forward to it.
    fn pull(&self, repo: &Repository, branch: &str) -> Result<PullOutcome, git2::Error> {
        let refname = format!("refs/heads/{}", branch);
        let local = repo.refname_to_id(&refname).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                git2::Error::from_str(&format!("{} has no commits", branch))
            } else {
                e
            }
        })?;

        let (remote, merge) = git_helper::upstream_of(repo, &refname);
        let merge_branch = merge.strip_prefix("refs/heads/").unwrap_or(&merge);
        let tracking = format!("refs/remotes/{}/{}", remote, merge_branch);
        let refspec = format!("+{}:{}", merge, tracking);

        self.options.backoff.run(
            &format!("fetch {}", refspec),
            |_| {
                let settings = self.transfer_settings();
                git_helper::fetch_refs(repo, &remote, &[refspec.as_str()], &settings)
                    .map_err(|e| self.explain_timeout(e, &settings))
            },
            is_transient,
        )?;

        let upstream = repo.refname_to_id(&tracking)?;
        if upstream == local {
            return Ok(PullOutcome::UpToDate);
        }
        if repo.graph_descendant_of(upstream, local)? {
            git_helper::fast_forward(repo, &refname, upstream)?;
            return Ok(PullOutcome::FastForwarded);
        }
        if repo.graph_descendant_of(local, upstream)? {
            return Ok(PullOutcome::AheadOfUpstream);
        }
        Err(git2::Error::from_str(&format!(
            "{} has diverged from {}/{}",
            branch, remote, merge_branch
        )))
    }

    fn enter_working_branch(repo: &Repository, branch: &str) -> Result<(), git2::Error> {
        let tip = git_helper::get_head_commit(repo)?.id();
        if git_helper::ensure_local_branch(repo, branch, tip)? {
            info!(%branch, "Created working branch");
        } else {
            debug!(%branch, "Working branch already exists");
        }
        git_helper::checkout_reference(repo, &format!("refs/heads/{}", branch))
    }

    fn explain_timeout(&self, error: git2::Error, settings: &TransferSettings) -> git2::Error {
        match self.options.operation_timeout {
            Some(timeout) if settings.deadline_passed() => git2::Error::from_str(&format!(
                "timed out after {:?}: {}",
                timeout,
                error.message()
            )),
            _ => error,
        }
    }
}

fn remove_partial_clone(path: &Path) {
    if path.exists() {
        debug!(path = ?path, "Removing partial clone");
        if let Err(e) = std::fs::remove_dir_all(path) {
            warn!(path = ?path, ?e, "Failed to remove partial clone");
        }
    }
}

/// Whether a clone or fetch failure might go away on its own.
fn is_transient(error: &git2::Error) -> bool {
    match error.code() {
        ErrorCode::Auth
        | ErrorCode::Certificate
        | ErrorCode::Exists
        | ErrorCode::Conflict
        | ErrorCode::NotFastForward => false,
        _ => matches!(
            error.class(),
            ErrorClass::None
                | ErrorClass::Net
                | ErrorClass::Http
                | ErrorClass::Ssh
                | ErrorClass::Os
                | ErrorClass::Callback
        ),
    }
}
