// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

mod report;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info};

use autoupgrade_operations::config::{default_working_branch, SyncConfig};
use autoupgrade_operations::directory::DirectoryClient;
use autoupgrade_operations::orchestrator::Orchestrator;
use autoupgrade_operations::pool::BoundedPool;
use autoupgrade_operations::repository::Transport;
use autoupgrade_operations::upgrade::{upgrade_all, NpmUpgrader};
use autoupgrade_tracing::TracingOpts;
use autoupgrade_util::app::{App, ExitCode};
use autoupgrade_util::paths;

#[derive(Args, Debug)]
struct DirectoryOpts {
    /// Organization whose repositories are listed.
    #[clap(short, long, env = "GITHUB_ORG")]
    org: String,

    /// Token for the hosting API, also used to authenticate HTTPS clones.
    #[clap(short, long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Base URL of the hosting API.
    #[clap(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    api_url: String,

    /// Stop following pagination after this many pages.
    #[clap(long, default_value_t = 10)]
    max_pages: usize,

    /// Timeout for each API request, in seconds.
    #[clap(long, default_value_t = 30)]
    request_timeout_secs: u64,
}

#[derive(Args, Debug)]
struct SyncOpts {
    #[clap(flatten)]
    directory: DirectoryOpts,

    /// Directory the repositories are synchronized into.
    #[clap(short = 'd', long, env = "SYNC_DIR", parse(from_os_str))]
    sync_dir: PathBuf,

    /// Only synchronize these repositories. Repeat the flag or separate names with commas.
    #[clap(short = 'r', long = "repo", value_delimiter = ',')]
    repos: Vec<String>,

    /// Discard local changes to tracked files before pulling.
    #[clap(short, long)]
    force: bool,

    /// Name of the working branch. Defaults to `autoupgrade-<timestamp>`.
    #[clap(long, conflicts_with = "no-branch")]
    branch: Option<String>,

    /// Leave repositories on their primary branch.
    #[clap(long)]
    no_branch: bool,

    /// Clone over SSH instead of HTTPS.
    #[clap(long)]
    ssh: bool,

    /// How many repositories are synchronized at once.
    #[clap(long, default_value_t = 10)]
    sync_jobs: usize,

    /// How often a failed clone or pull is retried.
    #[clap(long, default_value_t = 2)]
    retries: usize,

    /// Deadline in seconds for each clone, fetch, and upgrade. 0 disables it.
    #[clap(long, default_value_t = 600)]
    timeout_secs: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the repositories of the organization.
    List {
        #[clap(flatten)]
        directory: DirectoryOpts,
    },

    /// Clone or update repositories and check out the working branch.
    Sync {
        #[clap(flatten)]
        sync: SyncOpts,
    },

    /// Synchronize, then upgrade the npm dependencies of every synchronized repository.
    Upgrade {
        #[clap(flatten)]
        sync: SyncOpts,

        /// How many upgrades run at once.
        #[clap(long, default_value_t = 5)]
        upgrade_jobs: usize,
    },
}

#[derive(Parser, Debug)]
#[clap(
    name = "autoupgrade",
    about = "Synchronize an organization's repositories and upgrade their dependencies"
)]
struct AutoupgradeOpts {
    /// Keep captured upgrade output after exit.
    #[clap(long, global = true)]
    preserve_sandbox: bool,

    /// Directory for the log file.
    #[clap(long, global = true, parse(from_os_str))]
    log_dir: Option<PathBuf>,

    #[clap(subcommand)]
    cmd: Command,
}

fn seconds(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

impl DirectoryOpts {
    fn apply(&self, config: &mut SyncConfig) {
        config.api_url = self.api_url.clone();
        config.token = self.token.clone().filter(|token| !token.is_empty());
        config.max_pages = self.max_pages;
        config.request_timeout = Duration::from_secs(self.request_timeout_secs);
    }

    fn to_config(&self) -> SyncConfig {
        let mut config = SyncConfig::new(self.org.clone(), PathBuf::new());
        self.apply(&mut config);
        config
    }
}

impl SyncOpts {
    fn to_config(&self) -> Result<SyncConfig> {
        let sync_root = paths::expand_tilde(&self.sync_dir)?;
        let mut config = SyncConfig::new(self.directory.org.clone(), sync_root);
        self.directory.apply(&mut config);
        config.reset_local_changes = self.force;
        config.working_branch = if self.no_branch {
            None
        } else {
            Some(
                self.branch
                    .clone()
                    .unwrap_or_else(|| default_working_branch(&Local::now())),
            )
        };
        config.transport = if self.ssh {
            Transport::Ssh
        } else {
            Transport::Https
        };
        config.sync_concurrency = self.sync_jobs;
        config.retries = self.retries;
        config.operation_timeout = seconds(self.timeout_secs);
        Ok(config)
    }
}

fn run_subcommand(options: AutoupgradeOpts) -> Result<ExitCode> {
    let mut stdout = std::io::stdout();
    match options.cmd {
        Command::List { directory } => {
            let config = directory.to_config();
            config.validate().context("Invalid configuration")?;
            let descriptors = DirectoryClient::from_config(&config)
                .list_repositories(&config.organization)
                .context("Listing repositories failed")?;
            report::print_listing(&mut stdout, &descriptors)?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Sync { sync } => {
            let config = sync.to_config()?;
            let orchestrator = Orchestrator::new(config).context("Invalid configuration")?;
            let report = orchestrator
                .sync_all(&sync.repos)
                .context("Synchronization failed")?;
            report::print_sync_report(&mut stdout, &report)?;
            Ok(report::exit_code(&report, None))
        }

        Command::Upgrade { sync, upgrade_jobs } => {
            let mut config = sync.to_config()?;
            config.upgrade_concurrency = upgrade_jobs;
            let orchestrator =
                Orchestrator::new(config.clone()).context("Invalid configuration")?;
            let pool = BoundedPool::new("upgrade", config.upgrade_concurrency)
                .context("Invalid configuration")?;
            let app = Arc::new(App::new(options.preserve_sandbox, Some("upgrade"))?);

            let report = orchestrator
                .sync_all(&sync.repos)
                .context("Synchronization failed")?;
            report::print_sync_report(&mut stdout, &report)?;

            let upgrader = NpmUpgrader::new(app, config.operation_timeout);
            info!(
                count = report.synchronized.len(),
                workers = pool.workers(),
                "Upgrading"
            );
            let upgrade_report = upgrade_all(&report.synchronized, &upgrader, &pool);
            report::print_upgrade_report(&mut stdout, &upgrade_report)?;
            Ok(report::exit_code(&report, Some(&upgrade_report)))
        }
    }
}

fn main() {
    let started_at = Instant::now();
    let options = AutoupgradeOpts::parse();

    let is_tty = termion::is_tty(&std::io::stderr());
    let no_color = std::env::var_os("NO_COLOR").is_some(); // see https://no-color.org/
    let guard = match autoupgrade_tracing::init_tracing(TracingOpts {
        is_tty,
        no_color,
        log_dir: options.log_dir.clone(),
    }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:?}", e);
            std::process::exit(ExitCode::FATAL.0);
        }
    };

    let exit_code = match run_subcommand(options) {
        Ok(exit_code) => exit_code,
        Err(e) => {
            error!("{:?}", e);
            ExitCode::FATAL
        }
    };

    debug!(
        exit_code = exit_code.0,
        "Finished in {:.2}s",
        started_at.elapsed().as_secs_f32()
    );
    // Flush the log writers before exiting.
    drop(guard);
    std::process::exit(exit_code.0);
}
