// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::GitBinary;
use anyhow::{bail, Context, Result};
use git2::Repository;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A throwaway repository built with the real git binary. Tests use these as the "remote" side
/// of a clone as well as to inspect what the synchronizer left on disk.
pub struct ScratchGitRepo {
    git_binary: GitBinary,
    path: PathBuf,
}

impl ScratchGitRepo {
    // Create a new fixture repo with a unique random name in the given directory
    pub fn new_static_fixture(containing_dir: &Path) -> Result<Self> {
        let name = format!("repo_{}", Uuid::new_v4());
        Self::new_named_fixture(containing_dir, &name, "main")
    }

    /// Create a repo called `name` in `containing_dir` whose first commit lives on `branch`.
    pub fn new_named_fixture(containing_dir: &Path, name: &str, branch: &str) -> Result<Self> {
        let git_binary = GitBinary::from_env()?;
        let path = containing_dir.join(name);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("creating fixture directory {}", path.display()))?;
        let instance = Self { git_binary, path };

        instance.git(["init", "--quiet"])?;
        instance.git(["config", "user.email", "example@example.com"])?;
        instance.git(["config", "user.name", "Example"])?;
        instance.git(["symbolic-ref", "HEAD", &format!("refs/heads/{}", branch)])?;

        instance.write_file("d_0_0/f_1.txt", "This is test file 1")?;
        instance.write_file("d_0_0/d_0_1/f_2.txt", "This is test file 2")?;
        instance.write_file("d_1_0/f_3.txt", "This is test file 3")?;
        instance.git(["add", "--", "."])?;
        instance.git(["commit", "--quiet", "-a", "-m", "Test commit"])?;

        Ok(instance)
    }

    /// Open an existing checkout (for example one produced by the code under test).
    pub fn open(path: &Path) -> Result<Self> {
        let git_binary = GitBinary::from_env()?;
        if !path.join(".git").is_dir() {
            bail!("{} is not a git checkout", path.display());
        }
        Ok(Self {
            git_binary,
            path: path.to_owned(),
        })
    }

    /// A `file://` URL suitable for cloning this repository.
    pub fn url(&self) -> String {
        format!("file://{}", self.path.display())
    }

    fn git<I, S>(&self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<S> = args.into_iter().collect();
        let description = args
            .iter()
            .map(|a| a.as_ref().to_string_lossy().into_owned())
            .collect::<Vec<String>>()
            .join(" ");
        let status = self
            .git_binary
            .command()
            .args(&args)
            .current_dir(&self.path)
            .status()
            .with_context(|| format!("running `git {}`", description))?;
        if !status.success() {
            bail!(
                "`git {}` exited abnormally in {}",
                description,
                self.path.display()
            );
        }
        Ok(())
    }

    pub fn create_and_switch_to_branch(&self, name: &str) -> Result<()> {
        self.git(["switch", "--quiet", "-c", name]).with_context(|| {
            format!(
                "ScratchGitRepo failed to switch to branch {} in repo {:?}",
                name,
                self.path()
            )
        })
    }

    pub fn switch_to_branch(&self, name: &str) -> Result<()> {
        self.git(["switch", "--quiet", name])
    }

    /// Create a branch at `HEAD` without switching to it.
    pub fn create_branch(&self, name: &str) -> Result<()> {
        self.git(["branch", name])
    }

    /// Used to make an empty commit
    pub fn make_empty_commit(&self, message: &str) -> Result<git2::Oid> {
        self.git(["commit", "--quiet", "--allow-empty", "-m", message])
            .with_context(|| {
                format!(
                    "Could not create empty commit in ScratchGitRepo repo at {:?}",
                    self.path()
                )
            })?;
        self.head_commit_id()
    }

    pub fn write_file(
        &self,
        relative_filename: impl AsRef<Path>,
        content: impl AsRef<[u8]>,
    ) -> Result<()> {
        let relative_filename = relative_filename.as_ref();
        let absolute_filename = self.path.join(relative_filename);
        if let Some(parent_dir) = absolute_filename.parent() {
            std::fs::create_dir_all(parent_dir).context("creating intermediate directories")?;
        }
        std::fs::write(&absolute_filename, content).context("writing content")?;
        Ok(())
    }

    pub fn add_file(&self, relative_filename: impl AsRef<Path>) -> Result<()> {
        self.git([OsStr::new("add"), OsStr::new("--"), relative_filename.as_ref().as_os_str()])
    }

    pub fn commit_all(&self, message: impl AsRef<str>) -> Result<git2::Oid> {
        self.git(["commit", "--quiet", "-a", "-m", message.as_ref()])?;
        self.head_commit_id()
    }

    pub fn write_and_commit_file(
        &self,
        relative_filename: impl AsRef<Path>,
        content: impl AsRef<[u8]>,
        message: impl AsRef<str>,
    ) -> Result<git2::Oid> {
        let relative_filename = relative_filename.as_ref();
        self.write_file(relative_filename, content)?;
        self.add_file(relative_filename)?;
        self.commit_all(message)
    }

    pub fn head_commit_id(&self) -> Result<git2::Oid> {
        let repo = self.repo()?;
        let id = repo
            .head()
            .context("reading HEAD reference")?
            .peel_to_commit()
            .context("finding commit")?
            .id();
        Ok(id)
    }

    /// The commit a local branch points at.
    pub fn branch_commit_id(&self, branch: &str) -> Result<git2::Oid> {
        let repo = self.repo()?;
        let id = repo
            .refname_to_id(&format!("refs/heads/{}", branch))
            .with_context(|| format!("resolving branch {}", branch))?;
        Ok(id)
    }

    /// The short name of the branch `HEAD` points at.
    pub fn current_branch(&self) -> Result<String> {
        let repo = self.repo()?;
        let head = repo.head().context("reading HEAD reference")?;
        match head.shorthand() {
            Some(name) if head.is_branch() => Ok(name.to_owned()),
            _ => bail!("HEAD is detached in {}", self.path.display()),
        }
    }

    /// Whether the working tree or index differ from `HEAD`. Untracked files count as changes.
    pub fn is_dirty(&self) -> Result<bool> {
        let repo = self.repo()?;
        let mut options = git2::StatusOptions::new();
        options.include_untracked(true).include_ignored(false);
        let statuses = repo.statuses(Some(&mut options))?;
        Ok(!statuses.is_empty())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn repo(&self) -> Result<Repository> {
        Repository::open(&self.path).context("opening repository")
    }
}
