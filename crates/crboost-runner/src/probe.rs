use std::time::Duration;
use tokio::process::Command;

use crate::error::RunnerError;

/// Output of an ad-hoc shell probe (scheduler introspection, reset calls).
#[derive(Debug, Clone)]
pub struct ProbeOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ProbeOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run a shell line with a bounded timeout. On expiry the process is killed
/// and a structured error is returned; the call never hangs the caller.
pub async fn run_probe(command: &str, timeout: Duration) -> Result<ProbeOutput, RunnerError> {
    let mut child = Command::new("bash")
        .arg("-c")
        .arg(command)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RunnerError::SpawnFailed {
            reason: e.to_string(),
        })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ProbeOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        }),
        Ok(Err(e)) => Err(RunnerError::SpawnFailed {
            reason: e.to_string(),
        }),
        Err(_) => Err(RunnerError::Timeout {
            command: command.to_string(),
            timeout_secs: timeout.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit() {
        let out = run_probe("echo hi; exit 3", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success());
    }

    #[tokio::test]
    async fn times_out_and_kills() {
        let err = run_probe("sleep 30", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Timeout { .. }));
    }
}
