//! Run lifecycle controller.
//!
//! Drives a run from PENDING through RUNNING to a terminal state in a
//! detached task per run. The task owns the child process; every status
//! write goes through the guarded transitions in [`RunStore`], so a cancel
//! request racing with natural completion can only ever leave one terminal
//! state behind.

use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::capture::{capture_output, CaptureSummary};
use super::launcher::{self, LaunchSpec, LaunchedProcess};
use super::store::{Completion, DeleteOutcome, RunStore};
use super::suite::{Workspace, LOG_FILE, OUTPUT_FILE, REPORT_FILE};
use super::{vars, Run, RunStatus, StreamKind, TargetType, Variables};
use crate::catalog::{scenarios, testcases};
use crate::config::RunnerConfig;
use crate::error::{ApiError, ApiResult};
use crate::storage;

pub const CANCELED_BY_REQUEST: &str = "canceled by request";
pub const CANCELED_BY_SHUTDOWN: &str = "canceled by service shutdown";
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by service restart";
const TASK_DROPPED: &str = "run task stopped before completion";

/// What a run executes, resolved from `target_type` + `target_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTarget {
    Testcase(i64),
    Scenario(i64),
}

impl RunTarget {
    pub fn new(target_type: TargetType, id: i64) -> Self {
        match target_type {
            TargetType::Testcase => RunTarget::Testcase(id),
            TargetType::Scenario => RunTarget::Scenario(id),
        }
    }

    pub fn target_type(&self) -> TargetType {
        match self {
            RunTarget::Testcase(_) => TargetType::Testcase,
            RunTarget::Scenario(_) => TargetType::Scenario,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            RunTarget::Testcase(id) | RunTarget::Scenario(id) => *id,
        }
    }

    fn not_found(&self) -> ApiError {
        match self {
            RunTarget::Testcase(_) => ApiError::NotFound("Testcase"),
            RunTarget::Scenario(_) => ApiError::NotFound("Scenario"),
        }
    }
}

type Registry = Arc<Mutex<HashMap<i64, CancellationToken>>>;

/// Launches runs in the background and tracks the in-flight ones.
#[derive(Clone)]
pub struct RunExecutor {
    store: RunStore,
    runner: Arc<RunnerConfig>,
    permits: Arc<Semaphore>,
    active: Registry,
    tasks: TaskTracker,
}

/// Why supervision stopped before the runner exited on its own.
enum Interrupt {
    Canceled,
    TimedOut,
}

impl RunExecutor {
    pub fn new(store: RunStore, runner: RunnerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(runner.max_concurrent_runs.max(1)));
        Self {
            store,
            runner: Arc::new(runner),
            permits,
            active: Arc::new(Mutex::new(HashMap::new())),
            tasks: TaskTracker::new(),
        }
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    /// Number of runs with a live background task.
    pub fn in_flight(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Mark runs left PENDING/RUNNING by a previous process as CANCELED.
    pub async fn recover(&self) -> Result<usize> {
        let recovered = self.store.recover_interrupted(INTERRUPTED_BY_RESTART).await?;
        if recovered > 0 {
            warn!(recovered, "canceled runs interrupted by a previous shutdown");
        }
        Ok(recovered)
    }

    /// Validate the request, persist a PENDING run and start it in the
    /// background. Returns as soon as the run row exists.
    pub async fn trigger(&self, target: RunTarget, variables: Variables) -> ApiResult<Run> {
        vars::validate(&variables).map_err(ApiError::Validation)?;

        let exists = storage::interact(self.store.pool(), move |conn| {
            Ok(match target {
                RunTarget::Testcase(id) => testcases::get(conn, id)?.is_some(),
                RunTarget::Scenario(id) => scenarios::get(conn, id)?.is_some(),
            })
        })
        .await?;
        if !exists {
            return Err(target.not_found());
        }

        let run = self
            .store
            .create_pending(target.target_type(), target.id(), variables.clone())
            .await?;

        let token = CancellationToken::new();
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run.id, token.clone());

        info!(
            run_id = run.id,
            target_type = target.target_type().as_str(),
            target_id = target.id(),
            "run queued"
        );

        let guard = RunGuard {
            store: self.store.clone(),
            active: self.active.clone(),
            run_id: run.id,
            settled: false,
        };
        self.tasks
            .spawn(self.clone().execute(guard, target, variables, token));

        Ok(run)
    }

    /// Cancel a run. Non-terminal runs become CANCELED at once and their
    /// runner is terminated in the background; terminal runs are returned
    /// unchanged.
    pub async fn cancel(&self, run_id: i64) -> ApiResult<Run> {
        let run = self
            .store
            .get(run_id)
            .await?
            .ok_or(ApiError::NotFound("Run"))?;
        if run.status.is_terminal() {
            return Ok(run);
        }

        let completion = Completion::new(RunStatus::Canceled).with_message(CANCELED_BY_REQUEST);
        if self.store.finish(run_id, completion).await? {
            info!(run_id, "run canceled");
        }
        self.signal(run_id);

        self.store
            .get(run_id)
            .await?
            .ok_or(ApiError::NotFound("Run"))
    }

    /// Delete a terminal run's history and its scratch directory.
    pub async fn delete(&self, run_id: i64) -> ApiResult<()> {
        match self.store.delete(run_id).await? {
            DeleteOutcome::NotFound => Err(ApiError::NotFound("Run")),
            DeleteOutcome::InFlight => Err(ApiError::Conflict(format!(
                "run {run_id} is still in progress; cancel it first"
            ))),
            DeleteOutcome::Deleted(run) => {
                if let Some(dir) = run.workdir {
                    match tokio::fs::remove_dir_all(&dir).await {
                        Ok(()) => debug!(run_id, dir = %dir, "removed run workspace"),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => {
                            warn!(run_id, dir = %dir, error = %e, "failed to remove run workspace")
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Cancel every in-flight run and wait for the run tasks to finish.
    pub async fn shutdown(&self) {
        let in_flight: Vec<i64> = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();

        for run_id in &in_flight {
            let completion =
                Completion::new(RunStatus::Canceled).with_message(CANCELED_BY_SHUTDOWN);
            if let Err(e) = self.store.finish(*run_id, completion).await {
                warn!(run_id, error = %e, "failed to mark run canceled on shutdown");
            }
            self.signal(*run_id);
        }

        self.tasks.close();
        self.tasks.wait().await;
        info!(canceled = in_flight.len(), "run executor stopped");
    }

    fn signal(&self, run_id: i64) {
        if let Some(token) = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&run_id)
        {
            token.cancel();
        }
    }

    async fn system_step(&self, run_id: i64, message: String) {
        if let Err(e) = self.store.append_step(run_id, StreamKind::System, message).await {
            warn!(run_id, error = %e, "failed to record system step");
        }
    }

    async fn execute(
        self,
        mut guard: RunGuard,
        target: RunTarget,
        variables: Variables,
        token: CancellationToken,
    ) {
        let run_id = guard.run_id;

        let completion = match self.drive(run_id, target, &variables, &token).await {
            Ok(completion) => completion,
            Err(e) => {
                let message = format!("{e:#}");
                error!(run_id, error = %message, "run failed");
                self.system_step(run_id, format!("error: {message}")).await;
                Completion::new(RunStatus::Error).with_message(message)
            }
        };

        let status = completion.status;
        match self.store.finish(run_id, completion).await {
            Ok(true) => {
                info!(run_id, status = status.as_str(), "run finished");
                guard.settled = true;
            }
            Ok(false) => {
                debug!(run_id, status = status.as_str(), "run already terminal");
                guard.settled = true;
            }
            Err(e) => error!(run_id, error = %e, "failed to record run outcome"),
        }
    }

    async fn drive(
        &self,
        run_id: i64,
        target: RunTarget,
        variables: &Variables,
        token: &CancellationToken,
    ) -> Result<Completion> {
        let _permit = tokio::select! {
            _ = token.cancelled() => {
                return Ok(Completion::new(RunStatus::Canceled).with_message(CANCELED_BY_REQUEST));
            }
            permit = self.permits.clone().acquire_owned() => {
                permit.context("run executor is closed")?
            }
        };

        let workspace = Workspace::create(&self.runner.workdir_root, run_id).await?;
        self.store
            .set_workdir(run_id, workspace.dir.display().to_string())
            .await?;

        let (suite_file, effective) = match target {
            RunTarget::Testcase(id) => {
                let testcase = storage::interact(self.store.pool(), move |conn| {
                    testcases::get(conn, id)
                })
                .await?
                .with_context(|| format!("testcase {id} no longer exists"))?;
                let file = workspace.write_testcase(&testcase).await?;
                (file, vars::merge(None, variables))
            }
            RunTarget::Scenario(id) => {
                let (scenario, members) = storage::interact(self.store.pool(), move |conn| {
                    scenarios::get_with_testcases(conn, id)
                })
                .await?
                .with_context(|| format!("scenario {id} no longer exists"))?;
                let file = workspace.write_scenario_suite(&members).await?;
                (file, vars::merge(Some(&scenario.inputs), variables))
            }
        };

        let spec = LaunchSpec::new(
            &self.runner,
            &workspace,
            vars::to_cli_args(&effective),
            suite_file,
        );
        self.system_step(run_id, format!("launching: {}", spec.command_line()))
            .await;

        if token.is_cancelled() {
            return Ok(Completion::new(RunStatus::Canceled).with_message(CANCELED_BY_REQUEST));
        }

        let LaunchedProcess {
            mut child,
            stdout,
            stderr,
        } = spec.spawn()?;

        if !self.store.mark_running(run_id).await? {
            // Canceled between spawn and the RUNNING transition.
            launcher::terminate(&mut child, self.runner.kill_grace()).await;
            self.system_step(run_id, "run canceled; runner terminated".to_string())
                .await;
            return Ok(Completion::new(RunStatus::Canceled));
        }

        let timeout = self.runner.timeout();
        let outcome: std::result::Result<Result<(CaptureSummary, ExitStatus)>, Interrupt> = {
            let work = async {
                let summary = capture_output(stdout, stderr, run_id, &self.store).await?;
                let status = child.wait().await.context("failed to wait for runner")?;
                Ok::<_, anyhow::Error>((summary, status))
            };
            let deadline = async {
                match timeout {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                result = work => Ok(result),
                _ = token.cancelled() => Err(Interrupt::Canceled),
                _ = deadline => Err(Interrupt::TimedOut),
            }
        };

        match outcome {
            Ok(Ok((summary, status))) => {
                debug!(
                    run_id,
                    stdout_lines = summary.stdout_lines,
                    stderr_lines = summary.stderr_lines,
                    "runner output drained"
                );
                self.complete(run_id, &workspace, status).await
            }
            Ok(Err(e)) => {
                launcher::terminate(&mut child, self.runner.kill_grace()).await;
                Err(e)
            }
            Err(Interrupt::Canceled) => {
                launcher::terminate(&mut child, self.runner.kill_grace()).await;
                self.system_step(run_id, "run canceled; runner terminated".to_string())
                    .await;
                Ok(Completion::new(RunStatus::Canceled).with_message(CANCELED_BY_REQUEST))
            }
            Err(Interrupt::TimedOut) => {
                let secs = self.runner.timeout_secs;
                launcher::terminate(&mut child, self.runner.kill_grace()).await;
                self.system_step(run_id, format!("run timed out after {secs}s; runner terminated"))
                    .await;
                Ok(Completion::new(RunStatus::Error)
                    .with_message(format!("run timed out after {secs}s")))
            }
        }
    }

    /// Map the runner's exit status to PASSED/FAILED and register the
    /// artifacts it left behind.
    async fn complete(
        &self,
        run_id: i64,
        workspace: &Workspace,
        status: ExitStatus,
    ) -> Result<Completion> {
        let mut completion = match status.code() {
            Some(0) => {
                self.system_step(run_id, "runner exited with code 0".to_string())
                    .await;
                Completion::new(RunStatus::Passed)
            }
            Some(code) => {
                self.system_step(run_id, format!("runner exited with code {code}"))
                    .await;
                Completion::new(RunStatus::Failed)
            }
            None => {
                let message = signal_message(&status);
                self.system_step(run_id, message.clone()).await;
                Completion::new(RunStatus::Failed).with_message(message)
            }
        };

        for (name, path, content_type) in [
            (OUTPUT_FILE, workspace.output_path(), "application/xml"),
            (LOG_FILE, workspace.log_path(), "text/html"),
            (REPORT_FILE, workspace.report_path(), "text/html"),
        ] {
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            let path = path.display().to_string();
            if name == OUTPUT_FILE {
                completion.robot_output_path = Some(path.clone());
            } else if name == LOG_FILE {
                completion.robot_log_path = Some(path.clone());
            }
            self.store
                .add_attachment(run_id, name.to_string(), path, Some(content_type.to_string()))
                .await?;
        }

        Ok(completion)
    }
}

#[cfg(unix)]
fn signal_message(status: &ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(sig) => format!("runner killed by signal {sig}"),
        None => "runner exited without a status code".to_string(),
    }
}

#[cfg(not(unix))]
fn signal_message(_status: &ExitStatus) -> String {
    "runner exited without a status code".to_string()
}

/// Deregisters the run on exit and, if the task never reached a terminal
/// write (dropped or aborted), marks the run CANCELED.
struct RunGuard {
    store: RunStore,
    active: Registry,
    run_id: i64,
    settled: bool,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.run_id);
        if self.settled {
            return;
        }
        let completion = Completion::new(RunStatus::Canceled).with_message(TASK_DROPPED);
        match self.store.finish_blocking(self.run_id, &completion) {
            Ok(true) => warn!(run_id = self.run_id, "run task dropped, marked canceled"),
            Ok(false) => {}
            Err(e) => error!(run_id = self.run_id, error = %e, "failed to settle dropped run"),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::catalog::scenarios::NewScenario;
    use crate::catalog::testcases::NewTestCase;
    use serde_json::json;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    struct Harness {
        dir: tempfile::TempDir,
        store: RunStore,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::TempDir::new().unwrap();
            let pool = storage::open_pool(&dir.path().join("testdeck.db")).unwrap();
            Self {
                store: RunStore::new(pool),
                dir,
            }
        }

        /// A stand-in runner: a shell script receiving the usual arguments
        /// (`$4` is the output path, `$6` the log path).
        fn script(&self, name: &str, body: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn executor(&self, program: &Path, tweak: impl FnOnce(&mut RunnerConfig)) -> RunExecutor {
            let mut runner = RunnerConfig {
                program: program.display().to_string(),
                workdir_root: self.dir.path().join("runs"),
                kill_grace_secs: 2,
                ..RunnerConfig::default()
            };
            tweak(&mut runner);
            RunExecutor::new(self.store.clone(), runner)
        }

        async fn testcase(&self, name: &str) -> i64 {
            let new = NewTestCase {
                name: name.into(),
                description: None,
                content: format!("{name}\n    Log    hello"),
            };
            storage::interact(self.store.pool(), move |conn| testcases::create(conn, &new))
                .await
                .unwrap()
                .id
        }
    }

    async fn wait_for(store: &RunStore, id: i64, pred: impl Fn(&Run) -> bool) -> Run {
        for _ in 0..200 {
            let run = store.get(id).await.unwrap().unwrap();
            if pred(&run) {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("run {id} never reached the expected state");
    }

    async fn wait_terminal(store: &RunStore, id: i64) -> Run {
        wait_for(store, id, |r| r.status.is_terminal()).await
    }

    #[tokio::test]
    async fn test_passing_run_records_output_and_artifacts() {
        let h = Harness::new();
        let runner = h.script(
            "pass.sh",
            "echo starting\necho careful >&2\ntouch \"$4\" \"$6\"\nexit 0",
        );
        let exec = h.executor(&runner, |_| {});
        let tc = h.testcase("Smoke").await;

        let run = exec
            .trigger(RunTarget::Testcase(tc), Variables::new())
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Pending);

        let run = wait_terminal(&h.store, run.id).await;
        assert_eq!(run.status, RunStatus::Passed);
        assert!(run.started_at.is_some());
        assert!(run.started_at <= run.finished_at);
        assert!(run.robot_output_path.unwrap().ends_with("output.xml"));
        assert!(run.robot_log_path.unwrap().ends_with("log.html"));
        assert!(Path::new(&run.workdir.unwrap()).join("Smoke.robot").exists());

        let steps = h.store.list_steps(run.id, None).await.unwrap();
        assert!(steps
            .iter()
            .any(|s| s.stream == StreamKind::Stdout && s.message == "starting"));
        assert!(steps
            .iter()
            .any(|s| s.stream == StreamKind::Stderr && s.message == "careful"));
        assert!(steps
            .iter()
            .any(|s| s.stream == StreamKind::System && s.message.starts_with("launching: ")));

        let attachments = h.store.list_attachments(run.id).await.unwrap();
        let names: Vec<_> = attachments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["output.xml", "log.html"]);
        assert_eq!(attachments[0].content_type.as_deref(), Some("application/xml"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed() {
        let h = Harness::new();
        let runner = h.script("fail.sh", "echo '1 test, 0 passed, 1 failed'\nexit 1");
        let exec = h.executor(&runner, |_| {});
        let tc = h.testcase("Broken").await;

        let run = exec
            .trigger(RunTarget::Testcase(tc), Variables::new())
            .await
            .unwrap();
        let run = wait_terminal(&h.store, run.id).await;
        assert_eq!(run.status, RunStatus::Failed);

        let steps = h.store.list_steps(run.id, None).await.unwrap();
        assert!(steps.iter().any(|s| s.message == "runner exited with code 1"));
    }

    #[tokio::test]
    async fn test_missing_runner_is_error() {
        let h = Harness::new();
        let exec = h.executor(Path::new("/nonexistent/testdeck-runner"), |_| {});
        let tc = h.testcase("Any").await;

        let run = exec
            .trigger(RunTarget::Testcase(tc), Variables::new())
            .await
            .unwrap();
        let run = wait_terminal(&h.store, run.id).await;
        assert_eq!(run.status, RunStatus::Error);
        assert!(run.message.unwrap().contains("failed to spawn runner"));
        assert!(run.started_at.is_none());
    }

    #[tokio::test]
    async fn test_scenario_run_merges_variables() {
        let h = Harness::new();
        let runner = h.script("args.sh", "for a in \"$@\"; do echo \"$a\"; done");
        let exec = h.executor(&runner, |_| {});
        let t1 = h.testcase("T1").await;
        let t2 = h.testcase("T2").await;

        let new = NewScenario {
            name: "Checkout".into(),
            description: None,
            inputs: Some(
                [("A".to_string(), json!("1")), ("B".to_string(), json!("2"))]
                    .into_iter()
                    .collect(),
            ),
            testcase_ids: Some(vec![t1, t2]),
        };
        let scenario = storage::interact(h.store.pool(), move |conn| scenarios::create(conn, &new))
            .await
            .unwrap();

        let overrides: Variables = [("B".to_string(), json!("3")), ("C".to_string(), json!("4"))]
            .into_iter()
            .collect();
        let run = exec
            .trigger(RunTarget::Scenario(scenario.id), overrides)
            .await
            .unwrap();
        let run = wait_terminal(&h.store, run.id).await;
        assert_eq!(run.status, RunStatus::Passed);

        let args: Vec<String> = h
            .store
            .list_steps(run.id, None)
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.stream == StreamKind::Stdout)
            .map(|s| s.message)
            .collect();
        assert!(args.contains(&"A:1".to_string()));
        assert!(args.contains(&"B:3".to_string()));
        assert!(args.contains(&"C:4".to_string()));
        assert!(!args.contains(&"B:2".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("suite.robot"));

        let suite =
            std::fs::read_to_string(Path::new(&run.workdir.unwrap()).join("suite.robot")).unwrap();
        let first = suite.find("# ---- Testcase: T1 ----").unwrap();
        let second = suite.find("# ---- Testcase: T2 ----").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn test_cancel_terminates_running_runner() {
        let h = Harness::new();
        let runner = h.script("slow.sh", "echo waiting\nsleep 30");
        let exec = h.executor(&runner, |_| {});
        let tc = h.testcase("Slow").await;

        let run = exec
            .trigger(RunTarget::Testcase(tc), Variables::new())
            .await
            .unwrap();
        wait_for(&h.store, run.id, |r| r.status == RunStatus::Running).await;

        let canceled = exec.cancel(run.id).await.unwrap();
        assert_eq!(canceled.status, RunStatus::Canceled);
        assert_eq!(canceled.message.as_deref(), Some(CANCELED_BY_REQUEST));

        // Idempotent on a terminal run.
        let again = exec.cancel(run.id).await.unwrap();
        assert_eq!(again.status, RunStatus::Canceled);
        assert_eq!(again.finished_at, canceled.finished_at);

        tokio::time::timeout(Duration::from_secs(10), exec.shutdown())
            .await
            .unwrap();
        assert_eq!(exec.in_flight(), 0);

        let steps = h.store.list_steps(run.id, None).await.unwrap();
        assert!(steps
            .iter()
            .any(|s| s.message == "run canceled; runner terminated"));
        let run = h.store.get(run.id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Canceled);
    }

    #[tokio::test]
    async fn test_timeout_is_error() {
        let h = Harness::new();
        let runner = h.script("hang.sh", "sleep 30");
        let exec = h.executor(&runner, |r| r.timeout_secs = 1);
        let tc = h.testcase("Hang").await;

        let run = exec
            .trigger(RunTarget::Testcase(tc), Variables::new())
            .await
            .unwrap();
        let run = wait_terminal(&h.store, run.id).await;
        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(run.message.as_deref(), Some("run timed out after 1s"));
    }

    #[tokio::test]
    async fn test_queued_run_canceled_before_spawn() {
        let h = Harness::new();
        let runner = h.script("slow.sh", "sleep 30");
        let exec = h.executor(&runner, |r| r.max_concurrent_runs = 1);
        let tc = h.testcase("Queued").await;

        let first = exec
            .trigger(RunTarget::Testcase(tc), Variables::new())
            .await
            .unwrap();
        wait_for(&h.store, first.id, |r| r.status == RunStatus::Running).await;

        let second = exec
            .trigger(RunTarget::Testcase(tc), Variables::new())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let waiting = h.store.get(second.id).await.unwrap().unwrap();
        assert_eq!(waiting.status, RunStatus::Pending);

        exec.cancel(second.id).await.unwrap();
        exec.cancel(first.id).await.unwrap();
        tokio::time::timeout(Duration::from_secs(10), exec.shutdown())
            .await
            .unwrap();

        let second = h.store.get(second.id).await.unwrap().unwrap();
        assert_eq!(second.status, RunStatus::Canceled);
        assert!(second.started_at.is_none());
        assert!(second.workdir.is_none());
    }

    #[tokio::test]
    async fn test_trigger_validation() {
        let h = Harness::new();
        let exec = h.executor(Path::new("true"), |_| {});

        let missing = exec
            .trigger(RunTarget::Scenario(999), Variables::new())
            .await
            .unwrap_err();
        assert!(matches!(missing, ApiError::NotFound("Scenario")));

        let tc = h.testcase("Valid").await;
        let bad: Variables = [("--output".to_string(), json!("/etc/passwd"))]
            .into_iter()
            .collect();
        let invalid = exec.trigger(RunTarget::Testcase(tc), bad).await.unwrap_err();
        assert!(matches!(invalid, ApiError::Validation(_)));
        assert!(h.store.list(10).await.unwrap().is_empty());

        assert!(matches!(
            exec.cancel(12345).await.unwrap_err(),
            ApiError::NotFound("Run")
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_workspace() {
        let h = Harness::new();
        let runner = h.script("ok.sh", "exit 0");
        let exec = h.executor(&runner, |_| {});
        let tc = h.testcase("Cleanup").await;

        let run = exec
            .trigger(RunTarget::Testcase(tc), Variables::new())
            .await
            .unwrap();
        let run = wait_terminal(&h.store, run.id).await;
        let workdir = PathBuf::from(run.workdir.clone().unwrap());
        assert!(workdir.exists());

        exec.delete(run.id).await.unwrap();
        assert!(!workdir.exists());
        assert!(matches!(
            exec.delete(run.id).await.unwrap_err(),
            ApiError::NotFound("Run")
        ));
    }

    #[tokio::test]
    async fn test_recover_cancels_stale_runs() {
        let h = Harness::new();
        let stale = h
            .store
            .create_pending(TargetType::Testcase, 1, Variables::new())
            .await
            .unwrap();
        let exec = h.executor(Path::new("true"), |_| {});

        assert_eq!(exec.recover().await.unwrap(), 1);
        let stale = h.store.get(stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, RunStatus::Canceled);
        assert_eq!(stale.message.as_deref(), Some(INTERRUPTED_BY_RESTART));
    }

    /// State of a process from `/proc/<pid>/stat`, `None` once it is gone.
    #[cfg(target_os = "linux")]
    fn proc_state(pid: u32) -> Option<char> {
        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        let (_, rest) = stat.rsplit_once(')')?;
        rest.trim_start().chars().next()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_dropped_task_marks_run_canceled() {
        let h = Harness::new();
        let runner = h.script("stuck.sh", "echo $$ > runner.pid\nexec sleep 30");

        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let (run_id, pid) = rt.block_on(async {
            let exec = h.executor(&runner, |_| {});
            let tc = h.testcase("Stuck").await;
            let run = exec
                .trigger(RunTarget::Testcase(tc), Variables::new())
                .await
                .unwrap();
            let run = wait_for(&h.store, run.id, |r| r.status == RunStatus::Running).await;
            let pid_file = Path::new(run.workdir.as_deref().unwrap()).join("runner.pid");
            for _ in 0..200 {
                if let Ok(pid) = std::fs::read_to_string(&pid_file) {
                    if let Ok(pid) = pid.trim().parse::<u32>() {
                        return (run.id, pid);
                    }
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            panic!("runner never wrote its pid");
        });

        // Tearing down the runtime drops the run task mid-supervision.
        drop(rt);

        let rt = tokio::runtime::Runtime::new().unwrap();
        let run = rt.block_on(h.store.get(run_id)).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Canceled);
        assert_eq!(run.message.as_deref(), Some(TASK_DROPPED));
        assert!(run.finished_at.is_some());

        let mut gone = false;
        for _ in 0..100 {
            if matches!(proc_state(pid), None | Some('Z')) {
                gone = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(gone, "runner process {pid} outlived its run task");
    }
}
