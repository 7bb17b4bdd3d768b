// Copyright 2022 Twitter, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::app::App;
use anyhow::{bail, Context, Result};
use std::{
    ffi::OsStr,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    time::{Duration, Instant},
};
use tracing::{debug, debug_span, error, info, info_span, warn};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn exhibit_file(file: &Path, title: &str) -> Result<()> {
    let file = File::open(file)?;
    let lines = BufReader::new(file).lines();
    error!("Begin {}", &title);
    for line in lines.flatten() {
        error!("{}", &line);
    }
    error!("End {}", &title);

    Ok(())
}

/// A command whose stdout and stderr are captured into sandbox files unless other destinations
/// are specified.
#[derive(Debug, Clone)]
pub struct SandboxCommand {
    stdout_path: PathBuf,
    stderr_path: PathBuf,
    description_path: PathBuf,
}

#[derive(Debug)]
pub enum SandboxCommandOutput {
    All,
    Stdout,
    Stderr,
    Ignore,
}

/// How a command run under a deadline ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCompletion {
    Exited(ExitStatus),
    /// The deadline passed and the process was killed.
    TimedOut(Duration),
}

impl SandboxCommand {
    pub fn new(program: impl AsRef<OsStr>, app: Arc<App>) -> Result<(Command, Self)> {
        let mut command = Command::new(program);
        let sandbox_command = Self::with_command(&mut command, app)?;
        Ok((command, sandbox_command))
    }

    pub fn new_with_handles(
        program: impl AsRef<OsStr>,
        stdin: Option<Stdio>,
        stdout: Option<&Path>,
        stderr: Option<&Path>,
        app: Arc<App>,
    ) -> Result<(Command, Self)> {
        let mut command = Command::new(program);
        let sandbox_command =
            Self::with_command_and_handles(&mut command, stdin, stdout, stderr, app)?;
        Ok((command, sandbox_command))
    }

    pub fn with_command(command: &mut Command, app: Arc<App>) -> Result<Self> {
        Self::with_command_and_handles(command, None, None, None, app)
    }

    pub fn with_command_and_handles(
        command: &mut Command,
        stdin: Option<Stdio>,
        stdout: Option<&Path>,
        stderr: Option<&Path>,
        app: Arc<App>,
    ) -> Result<Self> {
        let sandbox = app.sandbox();

        // Write the description and get the generated serial to name all the files the same.
        let (description_path, serial) = {
            let (_, description_path, serial) = sandbox
                .create_file(Some("sandboxed_command"), Some("script"), None)
                .context("Failed creating description file")?;
            (description_path, serial)
        };

        let output_file = |extension: &str| -> Result<(Stdio, PathBuf)> {
            let (file, path, _) =
                sandbox.create_file(Some("sandboxed_command"), Some(extension), Some(serial))?;
            Ok((Stdio::from(file), path))
        };

        let stdin = stdin.unwrap_or_else(Stdio::null);

        let (stdout, stdout_path) = match stdout {
            Some(path) => (Stdio::from(File::create(path)?), path.to_owned()),
            None => output_file("stdout").context("Failed preparing stdout")?,
        };
        let (stderr, stderr_path) = match stderr {
            Some(path) => (Stdio::from(File::create(path)?), path.to_owned()),
            None => output_file("stderr").context("Failed preparing stderr")?,
        };

        command.stdin(stdin).stdout(stdout).stderr(stderr);

        Ok(Self {
            stdout_path,
            stderr_path,
            description_path,
        })
    }

    pub fn log(&self, output: SandboxCommandOutput, description: &str) -> Result<()> {
        let title = |o: SandboxCommandOutput| format!("{:?} from {}", o, description);
        let items: Vec<(String, &Path)> = match output {
            SandboxCommandOutput::All => {
                vec![
                    (
                        title(SandboxCommandOutput::Stdout),
                        self.stdout_path.as_path(),
                    ),
                    (
                        title(SandboxCommandOutput::Stderr),
                        self.stderr_path.as_path(),
                    ),
                ]
            }
            SandboxCommandOutput::Stdout => {
                vec![(
                    title(SandboxCommandOutput::Stdout),
                    self.stdout_path.as_path(),
                )]
            }
            SandboxCommandOutput::Stderr => {
                vec![(
                    title(SandboxCommandOutput::Stderr),
                    self.stderr_path.as_path(),
                )]
            }
            SandboxCommandOutput::Ignore => {
                vec![]
            }
        };

        for (title, path) in items {
            exhibit_file(path, title.as_str()).with_context(|| format!("Exhibiting {}", title))?
        }

        Ok(())
    }

    pub fn read_to_string(
        &self,
        output: SandboxCommandOutput,
        output_string: &mut String,
    ) -> Result<()> {
        use std::io::prelude::*;

        let path = match output {
            SandboxCommandOutput::Stdout => &self.stdout_path,
            SandboxCommandOutput::Stderr => &self.stderr_path,
            _ => bail!("cannot read all outputs into one string"),
        };

        let mut reader = BufReader::new(File::open(path)?);
        reader.read_to_string(output_string)?;
        Ok(())
    }

    pub fn stderr_path(&self) -> &Path {
        &self.stderr_path
    }

    pub fn pretty_print_command(command: &Command) -> String {
        let convert_os_str = |s: &OsStr| -> String {
            s.to_str().unwrap_or("<???>").trim_matches('"').to_owned()
        };

        let mut buf = convert_os_str(command.get_program());
        for arg in command.get_args() {
            buf.push(' ');
            buf.push_str(&convert_os_str(arg));
        }
        buf
    }

    fn record_description(&self, command_description: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.description_path)?;
        writeln!(file, "{}", command_description)?;
        Ok(())
    }

    // Run the provided command and if it is not successful, log the process output
    pub fn ensure_success_or_log(
        &self,
        cmd: &mut Command,
        output: SandboxCommandOutput,
    ) -> Result<ExitStatus> {
        let command_description = Self::pretty_print_command(cmd);
        match self.run_with_timeout(cmd, None)? {
            CommandCompletion::Exited(status) if status.success() => Ok(status),
            _ => {
                self.log(output, &command_description)
                    .context("logging output")?;
                bail!("Command failed: {}", command_description);
            }
        }
    }

    /// Run the command, killing it if it outlives `timeout`. The caller decides what a failing
    /// exit status means.
    pub fn run_with_timeout(
        &self,
        cmd: &mut Command,
        timeout: Option<Duration>,
    ) -> Result<CommandCompletion> {
        let command_description = Self::pretty_print_command(cmd);
        let span = debug_span!("Running command", description = %command_description);
        let _guard = span.enter();
        self.record_description(&command_description)?;

        let started_at = Instant::now();
        let mut launch = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn command {}", &command_description))?;

        let tailer = Self::tail(&command_description, &self.stderr_path)
            .context("Could not create log tailer");

        let completion = loop {
            if let Some(status) = launch
                .try_wait()
                .with_context(|| format!("Failed to wait for command {}", &command_description))?
            {
                break CommandCompletion::Exited(status);
            }
            let elapsed = started_at.elapsed();
            if matches!(timeout, Some(limit) if elapsed >= limit) {
                warn!(command = %command_description, ?elapsed, "Deadline passed, killing command");
                if let Err(e) = launch.kill() {
                    warn!(?e, "Failed to kill command");
                }
                let _ = launch.wait();
                break CommandCompletion::TimedOut(elapsed);
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        };
        tailer.iter().for_each(|t| t.stop());
        debug!(command = %command_description, ?completion, "Command finished");

        Ok(completion)
    }

    fn tail(description: &str, path: &Path) -> Result<Tailer> {
        Ok(match File::options().read(true).open(path) {
            Ok(f) => Tailer::new(description, f),
            Err(_e) => bail!("Could not open {} for tailing", path.display()),
        })
    }
}

/// Echoes lines appended to a file into the log until stopped.
struct Tailer {
    cancel_tx: mpsc::Sender<()>,
    stopped: AtomicBool,
}

impl Tailer {
    pub fn new(description: &str, file: File) -> Self {
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let description = description.to_owned();
        let _ = std::thread::spawn(move || Self::work(description, file, cancel_rx));
        Self {
            cancel_tx,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn stop(&self) {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            if let Err(e) = self.cancel_tx.send(()) {
                warn!(?e, "Failed to send stop signal to Tailer instance");
            }
        }
    }

    fn work(description: String, file: File, cancel_rx: mpsc::Receiver<()>) {
        let buffered_reader = BufReader::new(file);
        let mut lines = buffered_reader.lines();
        let span = info_span!("Output", command=?description);
        let _guard = span.enter();
        while cancel_rx.try_recv().is_err() {
            for line in lines.by_ref().flatten() {
                info!("{}", line);
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

impl Drop for Tailer {
    fn drop(&mut self) {
        self.stop();
    }
}
