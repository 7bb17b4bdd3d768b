// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::borrow::Cow;
use std::fs::File;
use std::io::Write;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, info_span, warn};

use autoupgrade_util::app::App;
use autoupgrade_util::sandbox_command::{CommandCompletion, SandboxCommand, SandboxCommandOutput};

use crate::error::UpgradeError;
use crate::pool::BoundedPool;
use crate::repository::RepositoryHandle;

const NPM_UPGRADE_SCRIPT: &str = include_str!("scripts/npm-upgrade.sh");
const SHELL: &str = "/bin/sh";
const NPM_MANIFEST: &str = "package.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpgradeStatus {
    Upgraded,
    /// The repository does not use this upgrader's package manager.
    NotApplicable,
}

/// Upgrades the dependencies of a synchronized repository in place.
pub trait Upgrader: Send + Sync {
    fn upgrade(&self, handle: &RepositoryHandle) -> Result<UpgradeStatus, UpgradeError>;
}

/// Runs a shell script that installs the newest version of every outdated npm dependency.
pub struct NpmUpgrader {
    app: Arc<App>,
    timeout: Option<Duration>,
    script: Cow<'static, str>,
}

impl NpmUpgrader {
    pub fn new(app: Arc<App>, timeout: Option<Duration>) -> Self {
        Self {
            app,
            timeout,
            script: Cow::Borrowed(NPM_UPGRADE_SCRIPT),
        }
    }

    /// Use a different script, run the same way.
    pub fn with_script(app: Arc<App>, timeout: Option<Duration>, script: impl Into<String>) -> Self {
        Self {
            app,
            timeout,
            script: Cow::Owned(script.into()),
        }
    }

    fn run_script(
        &self,
        handle: &RepositoryHandle,
    ) -> anyhow::Result<(CommandCompletion, SandboxCommand, String)> {
        let sandbox = self.app.sandbox();
        let (mut script_file, script_path, _) = sandbox
            .create_file(Some("npm-upgrade"), Some("sh"), None)
            .context("creating the upgrade script")?;
        script_file
            .write_all(self.script.as_bytes())
            .context("writing the upgrade script")?;
        drop(script_file);
        let stdin = File::open(&script_path).context("reopening the upgrade script")?;

        let (mut cmd, sandbox_command) = SandboxCommand::new_with_handles(
            SHELL,
            Some(Stdio::from(stdin)),
            None,
            None,
            self.app.clone(),
        )?;
        cmd.current_dir(handle.local_path());
        let description = format!("npm upgrade of {}", handle.name());
        let completion = sandbox_command.run_with_timeout(&mut cmd, self.timeout)?;
        Ok((completion, sandbox_command, description))
    }
}

impl Upgrader for NpmUpgrader {
    fn upgrade(&self, handle: &RepositoryHandle) -> Result<UpgradeStatus, UpgradeError> {
        let manifest = handle.local_path().join(NPM_MANIFEST);
        if !manifest.is_file() {
            return Ok(UpgradeStatus::NotApplicable);
        }

        let name = handle.name().to_owned();
        let (completion, sandbox_command, description) =
            self.run_script(handle).map_err(|source| UpgradeError::Spawn {
                name: name.clone(),
                source,
            })?;

        match completion {
            CommandCompletion::Exited(status) if status.success() => Ok(UpgradeStatus::Upgraded),
            CommandCompletion::Exited(status) => {
                if let Err(e) = sandbox_command.log(SandboxCommandOutput::Stderr, &description) {
                    warn!(?e, "Could not log upgrade output");
                }
                Err(UpgradeError::Failed { name, status })
            }
            CommandCompletion::TimedOut(elapsed) => {
                if let Err(e) = sandbox_command.log(SandboxCommandOutput::Stderr, &description) {
                    warn!(?e, "Could not log upgrade output");
                }
                Err(UpgradeError::TimedOut { name, elapsed })
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct UpgradeReport {
    pub upgraded: Vec<String>,
    pub not_applicable: Vec<String>,
    pub failures: Vec<UpgradeError>,
}

impl UpgradeReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run `upgrader` over every handle on `pool`.
#[tracing::instrument(skip_all, fields(count = handles.len()))]
pub fn upgrade_all(
    handles: &[RepositoryHandle],
    upgrader: &dyn Upgrader,
    pool: &BoundedPool,
) -> UpgradeReport {
    let names = handles.iter().map(|handle| handle.name().to_owned());
    let outcomes = pool.run_all(handles.iter().collect(), |handle: &RepositoryHandle| {
        let span = info_span!("upgrade_worker", repo = %handle.name());
        let _guard = span.enter();
        let outcome = upgrader.upgrade(handle);
        match &outcome {
            Ok(status) => info!(?status, "Upgrade finished"),
            Err(e) => warn!(error = %e, "Upgrade failed"),
        }
        outcome
    });

    let mut report = UpgradeReport::default();
    for (name, outcome) in names.zip(outcomes) {
        match outcome {
            Ok(Ok(UpgradeStatus::Upgraded)) => report.upgraded.push(name),
            Ok(Ok(UpgradeStatus::NotApplicable)) => report.not_applicable.push(name),
            Ok(Err(e)) => report.failures.push(e),
            Err(panic) => {
                warn!(%name, message = %panic.message, "Upgrade panicked");
                report.failures.push(UpgradeError::Panicked {
                    name,
                    message: panic.message,
                });
            }
        }
    }
    report.upgraded.sort();
    report.not_applicable.sort();
    report.failures.sort_by(|a, b| a.name().cmp(b.name()));
    report
}
