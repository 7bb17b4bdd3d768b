// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Choosing the branch a repository is normalized to before it is updated.
//!
//! Candidates are references whose full name contains `main` or `master`. When several match, the
//! choice is made in this order:
//!
//! 1. the local branch `main`, then the local branch `master`;
//! 2. a remote-tracking branch named exactly `main`, then exactly `master`;
//! 3. any reference containing `main`, then any containing `master`, taking the lexicographically
//!    smallest full name within each group.

const MAIN: &str = "main";
const MASTER: &str = "master";
const LOCAL_PREFIX: &str = "refs/heads/";
const REMOTE_PREFIX: &str = "refs/remotes/";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrimaryBranch {
    /// A local branch, by short name.
    Local(String),
    /// A remote-tracking branch. Checking it out creates a local branch of the same name.
    RemoteTracking { remote: String, branch: String },
    /// Any other reference (a tag, a note). Checked out with a detached `HEAD`.
    Detached(String),
}

impl PrimaryBranch {
    fn from_refname(refname: &str) -> Self {
        if let Some(branch) = refname.strip_prefix(LOCAL_PREFIX) {
            return PrimaryBranch::Local(branch.to_owned());
        }
        if let Some((remote, branch)) = refname
            .strip_prefix(REMOTE_PREFIX)
            .and_then(|rest| rest.split_once('/'))
        {
            return PrimaryBranch::RemoteTracking {
                remote: remote.to_owned(),
                branch: branch.to_owned(),
            };
        }
        PrimaryBranch::Detached(refname.to_owned())
    }

    /// The full name of the reference that was chosen.
    pub fn refname(&self) -> String {
        match self {
            PrimaryBranch::Local(branch) => format!("{}{}", LOCAL_PREFIX, branch),
            PrimaryBranch::RemoteTracking { remote, branch } => {
                format!("{}{}/{}", REMOTE_PREFIX, remote, branch)
            }
            PrimaryBranch::Detached(refname) => refname.clone(),
        }
    }

    /// The name of the local branch that will be checked out, if any.
    pub fn local_branch(&self) -> Option<&str> {
        match self {
            PrimaryBranch::Local(branch) | PrimaryBranch::RemoteTracking { branch, .. } => {
                Some(branch)
            }
            PrimaryBranch::Detached(_) => None,
        }
    }

    /// Short display name.
    pub fn name(&self) -> &str {
        match self {
            PrimaryBranch::Local(branch) | PrimaryBranch::RemoteTracking { branch, .. } => branch,
            PrimaryBranch::Detached(refname) => refname,
        }
    }
}

fn remote_branch_is(refname: &str, wanted: &str) -> bool {
    refname
        .strip_prefix(REMOTE_PREFIX)
        .and_then(|rest| rest.split_once('/'))
        .map_or(false, |(_, branch)| branch == wanted)
}

/// Pick the primary branch among the given full reference names. `None` when no name contains
/// `main` or `master`.
pub fn resolve_primary_branch<S: AsRef<str>>(refnames: &[S]) -> Option<PrimaryBranch> {
    let mut names: Vec<&str> = refnames.iter().map(|name| name.as_ref()).collect();
    names.sort_unstable();
    names.dedup();

    for wanted in [MAIN, MASTER] {
        let local = format!("{}{}", LOCAL_PREFIX, wanted);
        if names.contains(&local.as_str()) {
            return Some(PrimaryBranch::Local(wanted.to_owned()));
        }
    }

    for wanted in [MAIN, MASTER] {
        if let Some(name) = names.iter().find(|name| remote_branch_is(name, wanted)) {
            return Some(PrimaryBranch::from_refname(name));
        }
    }

    for wanted in [MAIN, MASTER] {
        if let Some(name) = names.iter().find(|name| name.contains(wanted)) {
            return Some(PrimaryBranch::from_refname(name));
        }
    }

    None
}
