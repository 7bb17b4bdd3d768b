// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use anyhow::{Context, Result};
use tempfile::TempDir;

use autoupgrade_testing::ScratchGitRepo;
use autoupgrade_util::git_helper::{self, TransferSettings};
use autoupgrade_util::retry::Backoff;

use crate::config::SyncConfig;
use crate::directory::RepositoryDescriptor;
use crate::orchestrator::Orchestrator;
use crate::sync::{SyncOptions, Synchronizer};
use crate::testing::http::{CannedApi, CannedResponse};

pub const ORGANIZATION: &str = "acme";

/// An organization whose repositories are scratch repositories on disk, listed by a canned API.
pub struct OrgFixture {
    pub dir: TempDir,
    pub origins_dir: PathBuf,
    pub sync_root: PathBuf,
    pub api: CannedApi,
    descriptors: Vec<RepositoryDescriptor>,
    origins: Vec<ScratchGitRepo>,
}

impl OrgFixture {
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let origins_dir = dir.path().join("origins");
        let sync_root = dir.path().join("sync");
        std::fs::create_dir_all(&origins_dir)?;
        let fixture = Self {
            dir,
            origins_dir,
            sync_root,
            api: CannedApi::start()?,
            descriptors: Vec::new(),
            origins: Vec::new(),
        };
        fixture.publish()?;
        Ok(fixture)
    }

    /// Add a repository whose first commit is on `branch`.
    pub fn add_origin(&mut self, name: &str, branch: &str) -> Result<&ScratchGitRepo> {
        let origin = ScratchGitRepo::new_named_fixture(&self.origins_dir, name, branch)?;
        self.add_descriptor(name, origin.url())?;
        self.origins.push(origin);
        self.origins.last().context("origin was just added")
    }

    /// Add a repository that cannot be cloned.
    pub fn add_unreachable(&mut self, name: &str) -> Result<()> {
        let url = format!("file://{}", self.origins_dir.join("does-not-exist").display());
        self.add_descriptor(name, url)
    }

    fn add_descriptor(&mut self, name: &str, url: String) -> Result<()> {
        self.descriptors.push(RepositoryDescriptor {
            id: self.descriptors.len() as u64 + 1,
            name: name.to_owned(),
            clone_url: url,
            ssh_url: None,
            default_branch: None,
        });
        self.publish()
    }

    fn publish(&self) -> Result<()> {
        let body = serde_json::to_string(&self.descriptors)?;
        self.api.respond(
            &format!("/orgs/{}/repos?per_page=100", ORGANIZATION),
            CannedResponse::json(body),
        );
        Ok(())
    }

    pub fn descriptor(&self, name: &str) -> Result<&RepositoryDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.name == name)
            .with_context(|| format!("no descriptor named {}", name))
    }

    pub fn origin(&self, name: &str) -> Result<&ScratchGitRepo> {
        self.origins
            .iter()
            .find(|origin| origin.path().file_name().map_or(false, |n| n == name))
            .with_context(|| format!("no origin named {}", name))
    }

    /// The checkout of `name` under the sync root.
    pub fn local(&self, name: &str) -> Result<ScratchGitRepo> {
        ScratchGitRepo::open(&self.sync_root.join(name))
    }

    /// Clone `name` into the sync root the way an earlier run would have.
    pub fn preclone(&self, name: &str) -> Result<ScratchGitRepo> {
        let descriptor = self.descriptor(name)?;
        std::fs::create_dir_all(&self.sync_root)?;
        let path = self.sync_root.join(name);
        git_helper::clone_repository(&descriptor.clone_url, &path, &TransferSettings::default())
            .with_context(|| format!("cloning {}", name))?;
        ScratchGitRepo::open(&path)
    }

    pub fn config(&self) -> SyncConfig {
        let mut config = SyncConfig::new(ORGANIZATION, &self.sync_root);
        config.api_url = self.api.url();
        config.retries = 0;
        config
    }

    pub fn orchestrator(&self, config: SyncConfig) -> Result<Orchestrator> {
        let options = SyncOptions {
            backoff: Backoff::NONE,
            ..SyncOptions::from_config(&config)
        };
        Ok(Orchestrator::new(config)?.with_synchronizer(Synchronizer::new(options)))
    }

    pub fn synchronizer(
        &self,
        reset_local_changes: bool,
        working_branch: Option<&str>,
    ) -> Synchronizer {
        Synchronizer::new(SyncOptions {
            reset_local_changes,
            working_branch: working_branch.map(str::to_owned),
            backoff: Backoff::NONE,
            ..SyncOptions::default()
        })
    }
}
