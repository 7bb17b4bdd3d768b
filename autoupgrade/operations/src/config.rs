// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, TimeZone};
use url::Url;

use crate::error::ConfigError;
use crate::repository::Transport;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_SYNC_CONCURRENCY: usize = 10;
pub const DEFAULT_UPGRADE_CONCURRENCY: usize = 5;
pub const DEFAULT_RETRIES: usize = 2;
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_MAX_PAGES: usize = 10;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const WORKING_BRANCH_FORMAT: &str = "autoupgrade-%Y-%m-%d-%H-%M-%S";

/// The working branch name for a run started at `now`.
pub fn default_working_branch<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    now.format(WORKING_BRANCH_FORMAT).to_string()
}

/// Everything a run needs, validated once up front.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Base URL of the hosting API.
    pub api_url: String,
    /// Bearer credential for the API, also used as the HTTPS password for transfers.
    pub token: Option<String>,
    pub organization: String,
    pub sync_root: PathBuf,
    /// Throw away modifications to tracked files in existing clones before pulling.
    pub reset_local_changes: bool,
    /// Branch every synchronized repository ends up on. `None` leaves them on the primary branch.
    pub working_branch: Option<String>,
    pub transport: Transport,
    pub sync_concurrency: usize,
    pub upgrade_concurrency: usize,
    /// Extra attempts for a clone or pull that failed.
    pub retries: usize,
    /// Deadline for one clone, fetch, or upgrade.
    pub operation_timeout: Option<Duration>,
    pub max_pages: usize,
    pub request_timeout: Duration,
}

impl SyncConfig {
    pub fn new(organization: impl Into<String>, sync_root: impl Into<PathBuf>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            token: None,
            organization: organization.into(),
            sync_root: sync_root.into(),
            reset_local_changes: false,
            working_branch: None,
            transport: Transport::default(),
            sync_concurrency: DEFAULT_SYNC_CONCURRENCY,
            upgrade_concurrency: DEFAULT_UPGRADE_CONCURRENCY,
            retries: DEFAULT_RETRIES,
            operation_timeout: Some(DEFAULT_OPERATION_TIMEOUT),
            max_pages: DEFAULT_MAX_PAGES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.organization.trim().is_empty() {
            return Err(ConfigError::EmptyOrganization);
        }
        if self.sync_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency { stage: "sync" });
        }
        if self.upgrade_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency { stage: "upgrade" });
        }
        if self.max_pages == 0 {
            return Err(ConfigError::ZeroPages);
        }

        let url = Url::parse(&self.api_url).map_err(|e| ConfigError::InvalidApiUrl {
            url: self.api_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidApiUrl {
                url: self.api_url.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        if let Some(branch) = &self.working_branch {
            if !git2::Reference::is_valid_name(&format!("refs/heads/{}", branch)) {
                return Err(ConfigError::InvalidBranchName {
                    branch: branch.clone(),
                });
            }
        }

        Ok(())
    }
}
