//! Runner process wrapper -- build the command line, spawn the child in its
//! own process group, and terminate the whole group on demand.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::suite::Workspace;
use crate::config::RunnerConfig;

/// Everything needed to invoke the runner for one run.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub module: String,
    pub workdir: PathBuf,
    pub output_path: PathBuf,
    pub log_path: PathBuf,
    pub report_path: PathBuf,
    /// Pre-rendered `-v key:value` pairs.
    pub variable_args: Vec<String>,
    /// Suite file name, relative to `workdir`.
    pub suite_file: String,
}

/// A spawned runner with its output pipes detached from the handle.
pub struct LaunchedProcess {
    pub child: Child,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

impl LaunchSpec {
    pub fn new(
        runner: &RunnerConfig,
        workspace: &Workspace,
        variable_args: Vec<String>,
        suite_file: String,
    ) -> Self {
        Self {
            program: runner.program.clone(),
            module: runner.module.clone(),
            workdir: workspace.dir.clone(),
            output_path: workspace.output_path(),
            log_path: workspace.log_path(),
            report_path: workspace.report_path(),
            variable_args,
            suite_file,
        }
    }

    /// Arguments after the program name:
    /// `-m <module> --output <p> --log <p> --report <p> [-v k:v ...] <suite>`.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-m".into(),
            self.module.clone().into(),
            "--output".into(),
            self.output_path.clone().into(),
            "--log".into(),
            self.log_path.clone().into(),
            "--report".into(),
            self.report_path.clone().into(),
        ];
        args.extend(self.variable_args.iter().map(OsString::from));
        args.push(self.suite_file.clone().into());
        args
    }

    /// Human-readable command line, for the run log.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args().iter().map(|a| a.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Spawn the runner with the workspace as current directory, stdin
    /// closed and both output streams piped.
    pub fn spawn(&self) -> Result<LaunchedProcess> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args())
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so termination reaches browsers and other
        // grandchildren the runner starts.
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(
            program = self.program.as_str(),
            workdir = %self.workdir.display(),
            "spawning runner"
        );

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn runner '{}' in {}",
                self.program,
                self.workdir.display()
            )
        })?;

        let stdout = child
            .stdout
            .take()
            .context("runner stdout was not captured")?;
        let stderr = child
            .stderr
            .take()
            .context("runner stderr was not captured")?;

        info!(pid = child.id(), suite = self.suite_file.as_str(), "runner started");

        Ok(LaunchedProcess {
            child,
            stdout,
            stderr,
        })
    }
}

/// Terminate a runner and its process group.
///
/// Sends SIGTERM to the group first, waits up to `grace`, then sends
/// SIGKILL if the runner is still alive.
pub async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    let pgid = child.id().map(|pid| pid as libc::pid_t);

    #[cfg(unix)]
    if let Some(pgid) = pgid {
        unsafe {
            libc::killpg(pgid, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    let _ = child.start_kill();

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(exit_code = status.code(), "runner exited after SIGTERM");
        }
        Ok(Err(e)) => {
            warn!(error = %e, "error waiting for runner after SIGTERM");
        }
        Err(_) => {
            warn!("runner did not exit after SIGTERM, sending SIGKILL");
            #[cfg(unix)]
            if let Some(pgid) = pgid {
                unsafe {
                    libc::killpg(pgid, libc::SIGKILL);
                }
            }
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to SIGKILL runner");
            }
        }
    }
}
