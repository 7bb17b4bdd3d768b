// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::{Component, Path, PathBuf};

use crate::directory::RepositoryDescriptor;
use crate::sync::PullOutcome;

/// Which of the descriptor's URLs a clone uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Https,
    Ssh,
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Https
    }
}

impl Transport {
    /// The URL to clone `descriptor` from. Falls back to the HTTPS URL when the directory did not
    /// report an SSH one.
    pub fn url_for<'a>(&self, descriptor: &'a RepositoryDescriptor) -> &'a str {
        match (self, descriptor.ssh_url.as_deref()) {
            (Transport::Ssh, Some(ssh_url)) => ssh_url,
            _ => &descriptor.clone_url,
        }
    }
}

/// A repository that has been synchronized to `local_root/name`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepositoryHandle {
    pub descriptor: RepositoryDescriptor,
    pub local_root: PathBuf,
    /// Short name of the branch the repository was normalized to.
    pub primary_branch: String,
    /// Short name of the branch `HEAD` points at after synchronization. `None` when detached.
    pub current_branch: Option<String>,
    pub freshly_cloned: bool,
    /// What updating the primary branch did. `None` for fresh clones and detached primaries.
    pub pull: Option<PullOutcome>,
}

impl RepositoryHandle {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn local_path(&self) -> PathBuf {
        local_path(&self.local_root, &self.descriptor)
    }
}

pub(crate) fn local_path(local_root: &Path, descriptor: &RepositoryDescriptor) -> PathBuf {
    local_root.join(&descriptor.name)
}

/// `local_root/name`, or `None` unless the name is exactly one plain path component.
pub(crate) fn checked_local_path(
    local_root: &Path,
    descriptor: &RepositoryDescriptor,
) -> Option<PathBuf> {
    let name = descriptor.name.as_str();
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Some(local_root.join(part)),
        _ => None,
    }
}
