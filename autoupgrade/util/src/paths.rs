// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "autoupgrade";

/// Where sandboxes are created. Falls back to the system temporary directory when the platform
/// has no notion of a per-user data directory.
#[cfg(not(target_os = "macos"))]
pub fn sandbox_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
        .join("sandboxes")
}

#[cfg(target_os = "macos")]
pub fn sandbox_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join("Library").join("Logs"))
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde<P: AsRef<Path>>(path_user_input: P) -> Result<PathBuf> {
    let p = path_user_input.as_ref();
    if !p.starts_with("~") {
        return Ok(p.to_path_buf());
    }

    let home_dir = match dirs::home_dir() {
        Some(home_dir) => home_dir,
        None => bail!("Could not determine home directory"),
    };
    if p == Path::new("~") {
        return Ok(home_dir);
    }

    match p.strip_prefix("~/") {
        // Corner case: `home_dir` is the root directory; just drop the tilde.
        Ok(rest) if home_dir == Path::new("/") => Ok(Path::new("/").join(rest)),
        Ok(rest) => Ok(home_dir.join(rest)),
        Err(_) => bail!("Failed to expand tildes in path '{}'", p.display()),
    }
}
