// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::Context;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

/// The git executable used to build fixtures, running against an isolated `HOME` so that the
/// developer's global configuration never leaks into a test.
#[derive(Clone, Debug)]
pub struct GitBinary {
    home_temp_dir: Arc<TempDir>,
    pub git_binary_path: PathBuf,
}

impl PartialEq for GitBinary {
    fn eq(&self, other: &Self) -> bool {
        self.git_binary_path == other.git_binary_path
    }
}

impl Eq for GitBinary {}

impl GitBinary {
    pub fn from_env() -> anyhow::Result<Self> {
        let git_binary_path =
            which::which("git").context("Resolving absolute path for git binary")?;
        Self::from_binary_path(git_binary_path)
    }

    pub fn from_binary_path(git_binary_path: PathBuf) -> anyhow::Result<Self> {
        let home_temp_dir = Arc::new(tempfile::tempdir().context("creating a scratch HOME")?);
        Ok(Self {
            home_temp_dir,
            git_binary_path,
        })
    }

    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.git_binary_path);
        command.env("HOME", self.home_temp_dir.path());
        command.env("GIT_CONFIG_NOSYSTEM", "1");
        command.env("GIT_AUTHOR_NAME", "Autoupgrade Testing");
        command.env("GIT_AUTHOR_EMAIL", "autoupgrade@example.com");
        command.env("GIT_COMMITTER_NAME", "Autoupgrade Testing");
        command.env("GIT_COMMITTER_EMAIL", "autoupgrade@example.com");
        command
    }
}
