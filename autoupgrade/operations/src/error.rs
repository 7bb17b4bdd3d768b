// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Failure to obtain the organization's repository list. Nothing can be synchronized without it.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("{url} responded with HTTP status {status}")]
    Status { url: String, status: u16 },

    #[error("failed to decode the repository list from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure to synchronize a single repository. Siblings are unaffected.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{name:?} is not a single directory name")]
    InvalidName { name: String },

    #[error("{name}: clone failed: {source}")]
    Clone {
        name: String,
        #[source]
        source: git2::Error,
    },

    #[error("{name}: could not open {}: {source}", .path.display())]
    Open {
        name: String,
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error("{name}: no reference resembling a main or master branch")]
    NoPrimaryBranch { name: String },

    #[error("{name}: checking out {branch} failed: {source}")]
    Checkout {
        name: String,
        branch: String,
        #[source]
        source: git2::Error,
    },

    #[error("{name}: hard reset failed: {source}")]
    Reset {
        name: String,
        #[source]
        source: git2::Error,
    },

    #[error("{name}: pulling {branch} failed: {source}")]
    Pull {
        name: String,
        branch: String,
        #[source]
        source: git2::Error,
    },

    #[error("{name}: entering working branch {branch} failed: {source}")]
    WorkingBranch {
        name: String,
        branch: String,
        #[source]
        source: git2::Error,
    },

    #[error("{name}: synchronization panicked: {message}")]
    Panicked { name: String, message: String },
}

impl SyncError {
    /// The repository this failure belongs to.
    pub fn name(&self) -> &str {
        match self {
            SyncError::InvalidName { name }
            | SyncError::Clone { name, .. }
            | SyncError::Open { name, .. }
            | SyncError::NoPrimaryBranch { name }
            | SyncError::Checkout { name, .. }
            | SyncError::Reset { name, .. }
            | SyncError::Pull { name, .. }
            | SyncError::WorkingBranch { name, .. }
            | SyncError::Panicked { name, .. } => name,
        }
    }
}

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("{name}: failed to run the upgrade: {source}")]
    Spawn {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{name}: upgrade exited with {status}")]
    Failed { name: String, status: ExitStatus },

    #[error("{name}: upgrade killed after {elapsed:?}")]
    TimedOut { name: String, elapsed: Duration },

    #[error("{name}: upgrade panicked: {message}")]
    Panicked { name: String, message: String },
}

impl UpgradeError {
    pub fn name(&self) -> &str {
        match self {
            UpgradeError::Spawn { name, .. }
            | UpgradeError::Failed { name, .. }
            | UpgradeError::TimedOut { name, .. }
            | UpgradeError::Panicked { name, .. } => name,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("an organization is required")]
    EmptyOrganization,

    #[error("{stage} concurrency must be at least 1")]
    ZeroConcurrency { stage: &'static str },

    #[error("max pages must be at least 1")]
    ZeroPages,

    #[error("invalid API URL {url}: {reason}")]
    InvalidApiUrl { url: String, reason: String },

    #[error("{branch:?} is not a valid branch name")]
    InvalidBranchName { branch: String },

    #[error("could not start {workers} {stage} workers: {reason}")]
    WorkerPool {
        stage: &'static str,
        workers: usize,
        reason: String,
    },
}

/// Failure that stops a run before any repository is synchronized.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("could not create sync root {}: {source}", .path.display())]
    SyncRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
