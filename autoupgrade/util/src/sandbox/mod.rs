// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result};
use std::fs;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

use tempfile::TempDir;

use crate::{paths, process};

/// A per-run scratch directory holding captured output of the commands we spawn. Every upgrade
/// writes its stdout and stderr here so a failure can be inspected after the run.
pub struct Sandbox {
    #[allow(dead_code)]
    temp_dir: Option<tempfile::TempDir>,
    path: PathBuf,
    serial_sequence: AtomicUsize,
}

const DEFAULT_NAME_PREFIX: &str = "autoupgrade_sandbox_";

impl Sandbox {
    pub fn new(preserve_contents: bool, name_prefix: Option<&str>) -> Result<Self> {
        Self::new_in(&paths::sandbox_dir(), preserve_contents, name_prefix)
    }

    pub fn new_in(
        sandbox_root: &Path,
        preserve_contents: bool,
        name_prefix: Option<&str>,
    ) -> Result<Self> {
        std::fs::create_dir_all(sandbox_root)
            .with_context(|| format!("creating sandbox root {}", sandbox_root.display()))?;
        let prefix = name_prefix
            .map(|prefix| DEFAULT_NAME_PREFIX.to_string() + prefix + "_")
            .unwrap_or_else(|| DEFAULT_NAME_PREFIX.to_string());
        let underlying: TempDir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(sandbox_root)
            .context("creating a temporary directory to house the sandbox")?;

        let path = underlying.path().to_owned();
        let temp_dir: Option<TempDir> = if preserve_contents {
            // Dropping the TempDir deletes it, so recreate the directory afterwards.
            drop(underlying);

            fs::create_dir_all(&path).context("recreating the directory")?;
            info!(
                ?path,
                "Created sandbox, which will not be cleaned up at exit",
            );

            Self::create_latest_symlink(&path, sandbox_root, &prefix);

            None
        } else {
            Some(underlying)
        };

        let instance = Self {
            temp_dir,
            path,
            serial_sequence: AtomicUsize::new(0),
        };

        std::fs::write(
            instance.command_description_path(),
            process::get_process_description(),
        )
        .context("Writing process description failed")?;

        Ok(instance)
    }

    pub fn command_description_path(&self) -> PathBuf {
        self.path.join("cmd")
    }

    fn latest_symlink_path(sandbox_root: impl AsRef<Path>, prefix: &str) -> PathBuf {
        let prefix = prefix.trim_end_matches('_');
        sandbox_root.as_ref().join(prefix).with_extension("latest")
    }

    #[cfg(unix)]
    fn create_latest_symlink(path: impl AsRef<Path>, root: impl AsRef<Path>, prefix: &str) {
        let link_path = Self::latest_symlink_path(root, prefix);
        if link_path.is_symlink() {
            let _ = std::fs::remove_file(&link_path);
        }
        if let Err(e) = std::os::unix::fs::symlink(path, link_path) {
            warn!(?e, "Failed to create symlink to latest sandbox");
        }
    }

    #[cfg(not(unix))]
    fn create_latest_symlink(_path: impl AsRef<Path>, _root: impl AsRef<Path>, _prefix: &str) {}

    /// Create a uniquely named file. Passing the `serial` of an earlier file groups related
    /// files (`name-000000003.stdout`, `name-000000003.stderr`) under one number.
    pub fn create_file(
        &self,
        prefix: Option<&str>,
        extension: Option<&str>,
        serial: Option<usize>,
    ) -> Result<(File, PathBuf, usize)> {
        let serial: usize =
            serial.unwrap_or_else(|| self.serial_sequence.fetch_add(1, Ordering::SeqCst));
        let mut path = PathBuf::from(format!("{}-{:09}", prefix.unwrap_or("unknown"), serial));
        if let Some(extension) = extension {
            path.set_extension(extension);
        }
        let qualified_path = self.path.join(path);
        let file = File::create(&qualified_path).context("creating a temporary file")?;

        Ok((file, qualified_path, serial))
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }
}
