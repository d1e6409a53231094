use camino::{Utf8Path, Utf8PathBuf};
use crboost_star::{ProcessStatus, ProcessTable};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::RunnerError;
use crate::probe::run_probe;

/// The downstream pipeliner binary.
pub const PIPELINER_BIN: &str = "relion_schemer";

/// File the qsub template drops into a job's output directory so the abort
/// path can address the scheduler job.
pub const SLURM_ID_FILE: &str = "slurm_job_id";

/// Marker the pipeliner writes into a job's output directory on success.
pub const SUCCESS_MARKER: &str = "RELION_JOB_EXIT_SUCCESS";

/// Lock directory the pipeliner maintains while it owns a project.
const PIPELINER_LOCK_DIR: &str = ".relion_lock";

/// Processes file at the project root.
const PROCESSES_FILE: &str = "default_pipeline.star";

/// Timeout for ad-hoc scheduler calls made during abort and reset.
const PROBE_TIMEOUT: Duration = Duration::from_secs(120);

/// How long an abort waits for the supervised process to be reaped before
/// escalating to SIGKILL.
const ABORT_GRACE: Duration = Duration::from_secs(10);

/// Lifecycle phase of the supervised pipeliner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunnerPhase {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    Completed,
    Failed,
}

impl RunnerPhase {
    /// A live run: start and reset are refused, abort is accepted.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    phase: Mutex<RunnerPhase>,
    pid: Mutex<Option<u32>>,
}

impl Shared {
    fn phase(&self) -> RunnerPhase {
        *self.phase.lock().expect("runner phase lock")
    }

    fn set_phase(&self, next: RunnerPhase) {
        *self.phase.lock().expect("runner phase lock") = next;
    }
}

/// Supervises one pipeliner subprocess per project.
///
/// The pipeliner is spawned in its own session with captured stdio; both
/// streams are teed into the project log. Abort follows the four-step
/// sequence (terminate process group, cancel the running scheduler job,
/// rewrite its process row, clear the pipeliner lock), each step
/// best-effort and idempotent.
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    project_root: Utf8PathBuf,
    scheme_name: String,
    shared: Arc<Shared>,
}

impl PipelineRunner {
    pub fn new(project_root: Utf8PathBuf, scheme_name: String) -> Self {
        Self {
            project_root,
            scheme_name,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn phase(&self) -> RunnerPhase {
        self.shared.phase()
    }

    pub fn pid(&self) -> Option<u32> {
        *self.shared.pid.lock().expect("runner pid lock")
    }

    fn log_path(&self) -> Utf8PathBuf {
        self.project_root.join("Logs").join("pipeline.log")
    }

    /// Spawn the (already wrapped) pipeliner command line.
    ///
    /// The working directory is the project root; the caller has written
    /// the snapshot and materialized the scheme before this point.
    pub fn start(&self, command_line: &str) -> Result<u32, RunnerError> {
        {
            let mut phase = self.shared.phase.lock().expect("runner phase lock");
            if phase.is_active() {
                return Err(RunnerError::PipelineActive {
                    phase: phase.as_str().to_string(),
                });
            }
            *phase = RunnerPhase::Starting;
        }

        let mut command = Command::new("bash");
        command
            .arg("-c")
            .arg(command_line)
            .current_dir(self.project_root.as_std_path())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            self.shared.set_phase(RunnerPhase::Failed);
            RunnerError::SpawnFailed {
                reason: e.to_string(),
            }
        })?;

        let pid = child.id().unwrap_or_default();
        *self.shared.pid.lock().expect("runner pid lock") = Some(pid);
        info!(pid, scheme = %self.scheme_name, "pipeliner spawned");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let shared = Arc::clone(&self.shared);
        let log_path = self.log_path();

        tokio::spawn(async move {
            let out_pump = stdout.map(|reader| {
                let log = log_path.clone();
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    pump_lines(reader, &log, Some(shared)).await;
                })
            });
            let err_pump = stderr.map(|reader| {
                let log = log_path.clone();
                tokio::spawn(async move {
                    pump_lines(reader, &log, None).await;
                })
            });
            if let Some(handle) = out_pump {
                let _ = handle.await;
            }
            if let Some(handle) = err_pump {
                let _ = handle.await;
            }

            let status = child.wait().await;
            let mut phase = shared.phase.lock().expect("runner phase lock");
            *phase = match (*phase, &status) {
                (RunnerPhase::Stopping, _) => RunnerPhase::Idle,
                (_, Ok(s)) if s.success() => RunnerPhase::Completed,
                _ => RunnerPhase::Failed,
            };
            drop(phase);
            *shared.pid.lock().expect("runner pid lock") = None;
            debug!(?status, "pipeliner reaped");
        });

        Ok(pid)
    }

    /// Cooperative abort. Safe to call repeatedly; every step tolerates the
    /// previous call having already done its work.
    pub async fn abort(&self) -> Result<(), RunnerError> {
        {
            let mut phase = self.shared.phase.lock().expect("runner phase lock");
            if !phase.is_active() {
                return Err(RunnerError::NotRunning);
            }
            *phase = RunnerPhase::Stopping;
        }

        // 1. Terminate the pipeliner's process group.
        if let Some(pid) = self.pid() {
            terminate_group(pid);
        }

        // 2 + 3. Cancel the running scheduler job and rewrite its row.
        self.cancel_running_job().await;

        // 4. Clear the pipeliner's locks.
        self.unlock();

        // Give the process group a bounded window, then escalate.
        let deadline = tokio::time::Instant::now() + ABORT_GRACE;
        while self.shared.phase() == RunnerPhase::Stopping
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if self.shared.phase() == RunnerPhase::Stopping {
            if let Some(pid) = self.pid() {
                warn!(pid, "pipeliner ignored SIGTERM, escalating");
                kill_group(pid);
            }
            // The supervise task flips to Idle once the child is reaped; if
            // the race already reaped it, settle the phase ourselves.
            let deadline = tokio::time::Instant::now() + ABORT_GRACE;
            while self.shared.phase() == RunnerPhase::Stopping
                && tokio::time::Instant::now() < deadline
            {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            if self.shared.phase() == RunnerPhase::Stopping {
                self.shared.set_phase(RunnerPhase::Idle);
            }
        }
        info!(scheme = %self.scheme_name, "pipeline aborted");
        Ok(())
    }

    /// Cancel the scheduler job behind the single `Running` process row,
    /// then mark that row `Failed` unless its success marker exists.
    async fn cancel_running_job(&self) {
        let processes_path = self.project_root.join(PROCESSES_FILE);
        let Ok(raw) = std::fs::read_to_string(processes_path.as_std_path()) else {
            return;
        };
        let Ok(mut table) = ProcessTable::parse(&raw) else {
            return;
        };
        let Some(running) = table.running_entry() else {
            return;
        };
        let job_dir = self.project_root.join(&running.name);

        let id_file = job_dir.join(SLURM_ID_FILE);
        if let Ok(job_id) = std::fs::read_to_string(id_file.as_std_path()) {
            let job_id = job_id.trim();
            if !job_id.is_empty() {
                match run_probe(&format!("scancel {job_id}"), PROBE_TIMEOUT).await {
                    Ok(out) if !out.success() => {
                        warn!(job_id, stderr = %out.stderr, "scancel returned non-zero");
                    }
                    Err(e) => warn!(job_id, error = %e, "scancel failed"),
                    Ok(_) => info!(job_id, "scheduler job cancelled"),
                }
            }
        }

        if !job_dir.join(SUCCESS_MARKER).exists()
            && table.set_status(&running.name, ProcessStatus::Failed)
        {
            if let Err(e) =
                std::fs::write(processes_path.as_std_path(), table.to_star_string())
            {
                warn!(error = %e, "could not rewrite processes file");
            }
        }
    }

    /// Remove the pipeliner's lock directories. Explicit user operation;
    /// idempotent.
    pub fn unlock(&self) {
        for lock_dir in [
            self.project_root.join(PIPELINER_LOCK_DIR),
            self.project_root
                .join("Schemes")
                .join(&self.scheme_name)
                .join(PIPELINER_LOCK_DIR),
        ] {
            match std::fs::remove_dir_all(lock_dir.as_std_path()) {
                Ok(()) => info!(%lock_dir, "removed pipeliner lock"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(%lock_dir, error = %e, "could not remove pipeliner lock"),
            }
        }
    }

    /// Synchronous head reset via the pipeliner itself. Refused while a run
    /// is live.
    pub async fn reset(&self, reset_command: &str) -> Result<(), RunnerError> {
        let phase = self.shared.phase();
        if phase.is_active() {
            return Err(RunnerError::PipelineActive {
                phase: phase.as_str().to_string(),
            });
        }
        let out = run_probe(reset_command, PROBE_TIMEOUT).await?;
        if !out.success() {
            return Err(RunnerError::SpawnFailed {
                reason: format!("reset exited with {:?}: {}", out.exit_code, out.stderr),
            });
        }
        self.shared.set_phase(RunnerPhase::Idle);
        Ok(())
    }
}

/// Pump one child stream line-by-line into the project log. The first
/// stdout line flips the phase from starting to running.
async fn pump_lines(
    reader: impl tokio::io::AsyncRead + Unpin,
    log_path: &Utf8Path,
    shared: Option<Arc<Shared>>,
) {
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent.as_std_path());
    }
    let mut log = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path.as_std_path())
        .await
    {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(%log_path, error = %e, "pipeline log unavailable");
            None
        }
    };

    let mut lines = BufReader::new(reader).lines();
    let mut first = true;
    while let Ok(Some(line)) = lines.next_line().await {
        if first {
            if let Some(shared) = &shared {
                let mut phase = shared.phase.lock().expect("runner phase lock");
                if *phase == RunnerPhase::Starting {
                    *phase = RunnerPhase::Running;
                }
            }
            first = false;
        }
        debug!(target: "pipeliner", "{line}");
        if let Some(log) = &mut log {
            let _ = log.write_all(line.as_bytes()).await;
            let _ = log.write_all(b"\n").await;
        }
    }
}

#[cfg(unix)]
fn terminate_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        debug!(pid, error = %e, "SIGTERM delivery failed");
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!(pid, error = %e, "SIGKILL delivery failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn runner(dir: &TempDir) -> PipelineRunner {
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        PipelineRunner::new(root, "scheme_demo".to_string())
    }

    async fn wait_for_phase(runner: &PipelineRunner, expected: RunnerPhase) {
        for _ in 0..200 {
            if runner.phase() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!(
            "runner never reached {expected:?}, stuck at {:?}",
            runner.phase()
        );
    }

    #[tokio::test]
    async fn clean_run_completes_and_tees_log() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);

        let pid = runner.start("echo schemer says hi; echo oops >&2").unwrap();
        assert!(pid > 0);
        wait_for_phase(&runner, RunnerPhase::Completed).await;

        let log =
            std::fs::read_to_string(dir.path().join("Logs").join("pipeline.log")).unwrap();
        assert!(log.contains("schemer says hi"));
        assert!(log.contains("oops"));
    }

    #[tokio::test]
    async fn early_exit_fails() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        runner.start("exit 7").unwrap();
        wait_for_phase(&runner, RunnerPhase::Failed).await;
    }

    #[tokio::test]
    async fn start_is_refused_while_active() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        runner.start("echo up; sleep 5").unwrap();
        wait_for_phase(&runner, RunnerPhase::Running).await;
        assert!(matches!(
            runner.start("echo again"),
            Err(RunnerError::PipelineActive { .. })
        ));
        runner.abort().await.unwrap();
    }

    #[tokio::test]
    async fn abort_when_idle_is_not_running() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        assert!(matches!(runner.abort().await, Err(RunnerError::NotRunning)));
    }

    #[tokio::test]
    async fn abort_terminates_rewrites_and_unlocks() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        // Live run plus the observable state the pipeliner would leave.
        let job_dir = root.join("Schemes/scheme_demo/ts_alignment");
        std::fs::create_dir_all(job_dir.as_std_path()).unwrap();
        std::fs::create_dir_all(
            root.join("Schemes/scheme_demo/.relion_lock").as_std_path(),
        )
        .unwrap();
        std::fs::write(
            root.join(PROCESSES_FILE).as_std_path(),
            "data_pipeline_processes\n\nloop_\n_rlnPipeLineProcessName #1\n_rlnPipeLineProcessStatusLabel #2\nSchemes/scheme_demo/ts_alignment/    Running\n",
        )
        .unwrap();

        runner.start("echo up; sleep 60").unwrap();
        wait_for_phase(&runner, RunnerPhase::Running).await;
        runner.abort().await.unwrap();
        wait_for_phase(&runner, RunnerPhase::Idle).await;

        let rewritten =
            std::fs::read_to_string(root.join(PROCESSES_FILE).as_std_path()).unwrap();
        assert!(rewritten.contains("Failed"));
        assert!(!rewritten.contains("Running"));
        assert!(!root.join("Schemes/scheme_demo/.relion_lock").exists());

        // A second abort is rejected but the terminal state is unchanged.
        assert!(matches!(runner.abort().await, Err(RunnerError::NotRunning)));
        assert_eq!(runner.phase(), RunnerPhase::Idle);
    }

    #[tokio::test]
    async fn success_marker_blocks_failure_rewrite() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let job_dir = root.join("Schemes/scheme_demo/ts_alignment");
        std::fs::create_dir_all(job_dir.as_std_path()).unwrap();
        std::fs::write(job_dir.join(SUCCESS_MARKER).as_std_path(), b"").unwrap();
        std::fs::write(
            root.join(PROCESSES_FILE).as_std_path(),
            "data_pipeline_processes\n\nloop_\n_rlnPipeLineProcessName #1\n_rlnPipeLineProcessStatusLabel #2\nSchemes/scheme_demo/ts_alignment/    Running\n",
        )
        .unwrap();

        runner.start("echo up; sleep 60").unwrap();
        wait_for_phase(&runner, RunnerPhase::Running).await;
        runner.abort().await.unwrap();

        let content =
            std::fs::read_to_string(root.join(PROCESSES_FILE).as_std_path()).unwrap();
        assert!(content.contains("Running"));
    }

    #[tokio::test]
    async fn reset_requires_idle() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        runner.start("echo up; sleep 5").unwrap();
        wait_for_phase(&runner, RunnerPhase::Running).await;
        assert!(matches!(
            runner.reset("true").await,
            Err(RunnerError::PipelineActive { .. })
        ));
        runner.abort().await.unwrap();
        wait_for_phase(&runner, RunnerPhase::Idle).await;
        runner.reset("true").await.unwrap();
        assert_eq!(runner.phase(), RunnerPhase::Idle);
    }

    #[test]
    fn unlock_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir);
        runner.unlock();
        runner.unlock();
    }
}
