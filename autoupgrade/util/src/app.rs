// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Debug;
use std::sync::Arc;

use crate::sandbox::Sandbox;
use anyhow::{Context, Result};

#[must_use = "The exit code for the application should be returned and bubbled up to `main` so that it can be passed to `std::process::exit`."]
#[derive(Debug, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    /// At least one repository failed to synchronize or upgrade.
    pub const PARTIAL_FAILURE: ExitCode = ExitCode(1);
    /// Nothing was attempted: the configuration or the repository listing was unusable.
    pub const FATAL: ExitCode = ExitCode(2);
}

/// Run-scoped context shared by every worker.
#[derive(Clone)]
pub struct App {
    sandbox: Arc<Sandbox>,
}

impl Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("sandbox", &self.sandbox.path())
            .finish()
    }
}

impl App {
    pub fn new_for_testing() -> Result<Self> {
        let sandbox = Sandbox::new_in(&std::env::temp_dir(), false, Some("testing"))
            .context("Failed to create sandbox")?;
        Ok(Self {
            sandbox: Arc::new(sandbox),
        })
    }

    pub fn new(preserve_sandbox_contents: bool, with_cmd_prefix: Option<&str>) -> Result<Self> {
        let sandbox = Arc::from(
            Sandbox::new(preserve_sandbox_contents, with_cmd_prefix)
                .context("Failed to create sandbox")?,
        );
        Ok(Self { sandbox })
    }

    /// Get a reference to the app's sandbox.
    pub fn sandbox(&self) -> Arc<Sandbox> {
        self.sandbox.clone()
    }
}
