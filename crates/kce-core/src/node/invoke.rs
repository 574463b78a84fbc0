//! Subprocess invocation.
//!
//! Spawns the resolved script with a sanitized environment, its own
//! directory as cwd, and captured stdout/stderr. The wait is bounded by the
//! node timeout and observes run cancellation: a cancelled script gets a
//! grace window to exit before it is killed.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use oxigraph::model::NamedNode;

use crate::cancel::CancelHandle;
use crate::error::CoreError;
use crate::CoreResult;

const STDERR_TAIL_BYTES: usize = 8 * 1024;

/// Captured result of a successful script run (exit code 0)
#[derive(Debug)]
pub(crate) struct ScriptOutput {
    pub stdout: String,
    pub stderr_tail: String,
}

/// Run a script to completion under timeout and cancellation.
pub(crate) async fn run_script(
    node: &NamedNode,
    script: &Path,
    args: &[String],
    timeout: Duration,
    kill_grace: Duration,
    env_allowlist: &[String],
    cancel: &CancelHandle,
) -> CoreResult<ScriptOutput> {
    let mut command = Command::new(script);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .env_clear();
    for key in env_allowlist {
        if let Ok(value) = std::env::var(key) {
            command.env(key, value);
        }
    }
    if let Some(dir) = script.parent() {
        command.current_dir(dir);
    }

    debug!(node = node.as_str(), script = %script.display(), ?args, "spawning script");
    let mut child = command.spawn().map_err(|e| CoreError::Script {
        node: node.as_str().to_string(),
        message: format!("failed to spawn {}: {e}", script.display()),
        stderr: String::new(),
    })?;

    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    let status = tokio::select! {
        status = child.wait() => status.map_err(CoreError::from)?,
        _ = tokio::time::sleep(timeout) => {
            warn!(node = node.as_str(), "script timed out, killing");
            let _ = child.kill().await;
            return Err(CoreError::Timeout {
                node: node.as_str().to_string(),
                seconds: timeout.as_secs(),
            });
        }
        _ = cancel.cancelled() => {
            // Give the script a grace window to finish on its own, then kill.
            match tokio::time::timeout(kill_grace, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(node = node.as_str(), "cancelled script did not exit, killing");
                    let _ = child.kill().await;
                }
            }
            return Err(CoreError::Cancelled);
        }
    };

    let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
    let stderr_raw = stderr_task.await.unwrap_or_default();
    let stderr_tail = tail(&stderr_raw, STDERR_TAIL_BYTES);

    if !status.success() {
        return Err(CoreError::Script {
            node: node.as_str().to_string(),
            message: format!(
                "script {} exited with {}",
                script.display(),
                status.code().map_or_else(|| "signal".to_string(), |c| c.to_string())
            ),
            stderr: stderr_tail,
        });
    }
    Ok(ScriptOutput {
        stdout,
        stderr_tail,
    })
}

fn tail(bytes: &[u8], limit: usize) -> String {
    let start = bytes.len().saturating_sub(limit);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn node() -> NamedNode {
        NamedNode::new("http://example.com/ns#n").unwrap()
    }

    #[tokio::test]
    async fn captures_stdout_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "ok.sh", r#"echo "{\"result\": 2}""#);
        let out = run_script(
            &node(),
            &script,
            &[],
            Duration::from_secs(5),
            Duration::from_secs(1),
            &["PATH".to_string()],
            &CancelHandle::new(),
        )
        .await
        .unwrap();
        assert!(out.stdout.contains("\"result\": 2"));
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_stderr_tail() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "fail.sh", "echo boom >&2\nexit 3");
        let err = run_script(
            &node(),
            &script,
            &[],
            Duration::from_secs(5),
            Duration::from_secs(1),
            &["PATH".to_string()],
            &CancelHandle::new(),
        )
        .await
        .unwrap_err();
        match err {
            CoreError::Script { message, stderr, .. } => {
                assert!(message.contains("exited with 3"));
                assert!(stderr.contains("boom"));
            }
            other => panic!("expected Script error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_kills_the_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "slow.sh", "sleep 30");
        let started = std::time::Instant::now();
        let err = run_script(
            &node(),
            &script,
            &[],
            Duration::from_millis(200),
            Duration::from_millis(100),
            &["PATH".to_string()],
            &CancelHandle::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancellation_kills_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "hang.sh", "sleep 30");
        let cancel = CancelHandle::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let err = run_script(
            &node(),
            &script,
            &[],
            Duration::from_secs(30),
            Duration::from_millis(200),
            &["PATH".to_string()],
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
