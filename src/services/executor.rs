use tokio::process::Command;
#[allow(unused_imports)]
use tracing::{debug, warn};

/// Result of running a job's command once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub success: bool,
    pub output: String,
}

impl ExecOutcome {
    fn new(success: bool, stdout: &str, stderr: &str, error: Option<&str>) -> Self {
        let output = format!(
            "stdout:\n{}\nstderr:\n{}\nerror:{}",
            stdout,
            stderr,
            error.unwrap_or("none")
        );
        ExecOutcome { success, output }
    }
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Runs `command` through the shell and waits for it. There is no timeout.
pub async fn execute(command: &str) -> ExecOutcome {
    let output = match shell(command).output().await {
        Ok(output) => output,
        Err(err) => {
            warn!({ command }, "spawn failed: {}", err);
            return ExecOutcome::new(false, "", "", Some(&err.to_string()));
        }
    };
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let status = output.status;
    debug!({ command, status = %status }, "exited");
    if status.success() {
        return ExecOutcome::new(true, &stdout, &stderr, None);
    }
    let error = format!("Command failed: {} ({})", command, status);
    ExecOutcome::new(false, &stdout, &stderr, Some(&error))
}
