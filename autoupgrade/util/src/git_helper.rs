// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::time::{Duration, Instant};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    BranchType, Commit, Cred, ErrorCode, FetchOptions, Oid, RemoteCallbacks, Repository, ResetType,
};
use tracing::debug;

/// Username GitHub expects alongside a token used as an HTTPS password.
const TOKEN_USERNAME: &str = "x-access-token";
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;
const REFLOG_PREFIX: &str = "autoupgrade";

/// Credentials and deadline applied to a single network operation (clone or fetch).
#[derive(Clone, Debug, Default)]
pub struct TransferSettings {
    pub token: Option<String>,
    pub deadline: Option<Instant>,
}

impl TransferSettings {
    pub fn new(token: Option<String>, timeout: Option<Duration>) -> Self {
        Self {
            token,
            deadline: timeout.map(|timeout| Instant::now() + timeout),
        }
    }

    pub fn deadline_passed(&self) -> bool {
        deadline_passed(self.deadline)
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    matches!(deadline, Some(deadline) if Instant::now() >= deadline)
}

/// Callbacks that authenticate with the configured token (HTTPS) or the SSH agent, and abort the
/// transfer once the deadline passes. libgit2 only consults these while data is moving, so a
/// remote that never answers the initial connection is bounded by the OS socket timeouts.
pub fn remote_callbacks(settings: &TransferSettings) -> RemoteCallbacks<'static> {
    let mut callbacks = RemoteCallbacks::new();

    let token = settings.token.clone();
    let mut attempts = 0;
    callbacks.credentials(move |url, username_from_url, allowed| {
        attempts += 1;
        if attempts > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::from_str("credentials were rejected"));
        }
        if allowed.is_ssh_key() {
            return Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"));
        }
        if allowed.is_user_pass_plaintext() {
            if let Some(token) = &token {
                return Cred::userpass_plaintext(TOKEN_USERNAME, token);
            }
            if let Ok(config) = git2::Config::open_default() {
                if let Ok(cred) = Cred::credential_helper(&config, url, username_from_url) {
                    return Ok(cred);
                }
            }
        }
        Cred::default()
    });

    let deadline = settings.deadline;
    callbacks.transfer_progress(move |_progress| !deadline_passed(deadline));
    callbacks.sideband_progress(move |_data| !deadline_passed(deadline));

    callbacks
}

fn fetch_options(settings: &TransferSettings) -> FetchOptions<'static> {
    let mut options = FetchOptions::new();
    options.remote_callbacks(remote_callbacks(settings));
    options
}

/// Open an existing clone. `Ok(None)` means there is no repository at `path`.
pub fn open_repository(path: &Path) -> Result<Option<Repository>, git2::Error> {
    match Repository::open(path) {
        Ok(repo) => Ok(Some(repo)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn clone_repository(
    url: &str,
    path: &Path,
    settings: &TransferSettings,
) -> Result<Repository, git2::Error> {
    debug!(%url, path = ?path, "Cloning");
    RepoBuilder::new()
        .fetch_options(fetch_options(settings))
        .clone(url, path)
}

/// Full names of every reference in the repository, in the order libgit2 reports them.
pub fn reference_names(repo: &Repository) -> Result<Vec<String>, git2::Error> {
    let mut names = Vec::new();
    for reference in repo.references()? {
        if let Some(name) = reference?.name() {
            names.push(name.to_owned());
        }
    }
    Ok(names)
}

/// The full name of the reference `HEAD` points at, or `None` if the current branch is unborn.
/// A detached `HEAD` is reported as `"HEAD"`.
pub fn head_reference_name(repo: &Repository) -> Result<Option<String>, git2::Error> {
    match repo.head() {
        Ok(head) => Ok(head.name().map(str::to_owned)),
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

pub fn get_head_commit(repo: &Repository) -> Result<Commit<'_>, git2::Error> {
    repo.head()?.peel_to_commit()
}

/// Update the working tree to `refname` and point `HEAD` at it. Local modifications that do not
/// conflict with the target survive, like `git switch`.
pub fn checkout_reference(repo: &Repository, refname: &str) -> Result<(), git2::Error> {
    let commit = repo.find_reference(refname)?.peel_to_commit()?;
    repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().safe()))?;
    repo.set_head(refname)
}

/// Check out the commit `refname` resolves to with a detached `HEAD`.
pub fn checkout_detached(repo: &Repository, refname: &str) -> Result<(), git2::Error> {
    let commit = repo.find_reference(refname)?.peel_to_commit()?;
    repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().safe()))?;
    repo.set_head_detached(commit.id())
}

/// Short name of the branch `HEAD` points at. `None` when detached or unborn.
pub fn current_branch_name(repo: &Repository) -> Option<String> {
    let head = repo.head().ok()?;
    if head.is_branch() {
        head.shorthand().map(str::to_owned)
    } else {
        None
    }
}

/// Create the local branch `name` at `target` unless it exists. Returns whether it was created.
pub fn ensure_local_branch(
    repo: &Repository,
    name: &str,
    target: Oid,
) -> Result<bool, git2::Error> {
    match repo.find_branch(name, BranchType::Local) {
        Ok(_) => Ok(false),
        Err(e) if e.code() == ErrorCode::NotFound => {
            let commit = repo.find_commit(target)?;
            repo.branch(name, &commit, false)?;
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

/// Point the local branch `name` at the remote-tracking branch `upstream` (e.g. `origin/main`).
pub fn set_upstream(repo: &Repository, name: &str, upstream: &str) -> Result<(), git2::Error> {
    let mut branch = repo.find_branch(name, BranchType::Local)?;
    branch.set_upstream(Some(upstream))
}

/// Discard modifications to tracked files by resetting index and working tree to `HEAD`.
/// Untracked files are left in place, as with `git reset --hard`.
pub fn hard_reset_to_head(repo: &Repository) -> Result<(), git2::Error> {
    let head = get_head_commit(repo)?;
    repo.reset(
        head.as_object(),
        ResetType::Hard,
        Some(CheckoutBuilder::new().force()),
    )
}

/// The remote and the remote branch that the local branch `refname` merges from, read from the
/// `branch.<name>.remote` and `branch.<name>.merge` configuration. Falls back to `origin` and a
/// branch of the same name when no upstream is configured.
pub fn upstream_of(repo: &Repository, refname: &str) -> (String, String) {
    let short_name = refname.strip_prefix("refs/heads/").unwrap_or(refname);
    let config = repo.config().ok();
    let read = |key: String| -> Option<String> {
        config
            .as_ref()
            .and_then(|config| config.get_string(&key).ok())
            .filter(|value| !value.is_empty())
    };
    let remote = read(format!("branch.{}.remote", short_name))
        .unwrap_or_else(|| String::from("origin"));
    let merge = read(format!("branch.{}.merge", short_name))
        .unwrap_or_else(|| format!("refs/heads/{}", short_name));
    (remote, merge)
}

/// Fetch `refspecs` from `remote_name`.
pub fn fetch_refs(
    repo: &Repository,
    remote_name: &str,
    refspecs: &[&str],
    settings: &TransferSettings,
) -> Result<(), git2::Error> {
    let mut remote = repo.find_remote(remote_name)?;
    let mut options = fetch_options(settings);
    debug!(remote = %remote_name, ?refspecs, "Fetching");
    remote.fetch(refspecs, Some(&mut options), None)
}

/// Move the branch `refname` forward to `target`, updating the working tree first so that a
/// conflicting local modification aborts the operation before any reference moves.
pub fn fast_forward(repo: &Repository, refname: &str, target: Oid) -> Result<(), git2::Error> {
    let commit = repo.find_commit(target)?;
    let mut reference = repo.find_reference(refname)?;
    let is_checked_out = head_reference_name(repo)?.as_deref() == Some(refname);
    if is_checked_out {
        repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().safe()))?;
    }
    let message = format!("{}: fast-forward to {}", REFLOG_PREFIX, target);
    reference.set_target(target, &message)?;
    Ok(())
}
