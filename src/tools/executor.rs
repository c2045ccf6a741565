//! Isolated Tool Executor
//!
//! Information Hiding:
//! - Scratch file materialisation and cleanup hidden
//! - Container vs. subprocess isolation choice hidden
//! - Process-tree termination on timeout hidden
//! - Output recovery heuristics hidden behind `ExecutionResult`

use super::{ExecutionResult, ExecutorConfig};
use anyhow::{Context, Result};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

pub const TIMEOUT_ERROR: &str = "Execution timed out.";
pub const DECODE_ERROR: &str = "Failed to decode tool output as JSON.";

const DOCKER_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const DOCKER_KILL_TIMEOUT: Duration = Duration::from_secs(10);
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(10);
/// How long to keep draining pipes after the process exited
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);
/// Captured bytes per stream; the rest is read and discarded
const MAX_OUTPUT_BYTES: u64 = 8 * 1024 * 1024;
const CONTAINER_WORKDIR: &str = "/app";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Isolation {
    Subprocess,
    Container { name: String },
}

enum Completion {
    Exited {
        status: ExitStatus,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    TimedOut,
}

/// Runs generated tool source in a disposable, time-bounded environment
pub struct Executor {
    config: ExecutorConfig,
    docker_available: OnceCell<bool>,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            docker_available: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Syntax-only pre-flight check. The source is parsed, never run.
    pub async fn validate(&self, source: &str) -> bool {
        if source.trim().is_empty() {
            tracing::debug!("Rejecting empty tool source");
            return false;
        }

        match self.check_syntax(source).await {
            Ok(valid) => valid,
            Err(e) => {
                tracing::warn!("Syntax check could not run: {:#}", e);
                false
            }
        }
    }

    /// Run with the configured timeout
    pub async fn execute(&self, source: &str, parameters: &Value) -> ExecutionResult {
        self.run(source, parameters, self.config.timeout).await
    }

    /// Run `source` with `parameters` on stdin, bounded by `limit`
    ///
    /// Every failure, including timeouts and faults inside the executor
    /// itself, comes back as an unsuccessful [`ExecutionResult`].
    pub async fn run(&self, source: &str, parameters: &Value, limit: Duration) -> ExecutionResult {
        tracing::info!("Executing tool code in sandbox (timeout {:?})", limit);

        let outcome = AssertUnwindSafe(self.try_run(source, parameters, limit))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!("Unexpected error during sandbox execution: {:#}", e);
                ExecutionResult::failure(format!("{:#}", e))
            }
            Err(_) => {
                tracing::error!("Sandbox execution panicked");
                ExecutionResult::failure("Executor panicked while running the tool")
            }
        }
    }

    async fn try_run(
        &self,
        source: &str,
        parameters: &Value,
        limit: Duration,
    ) -> Result<ExecutionResult> {
        let scratch = self.scratch_dir().await?;
        let file_name = format!("tool.{}", self.config.language.extension());
        let script = scratch.path().join(&file_name);

        tokio::fs::write(&script, source)
            .await
            .context(format!("Failed to write scratch file {:?}", script))?;
        tracing::debug!("Wrote tool code to {:?}", script);

        let input = serde_json::to_string(parameters).context("Failed to encode parameters")?;
        tracing::debug!("Input JSON: {}", input);

        let isolation = self.isolation(scratch.path()).await;
        let mut command = match &isolation {
            Isolation::Subprocess => self.subprocess_command(&script, scratch.path()),
            Isolation::Container { name } => {
                self.container_command(name, scratch.path(), &file_name)
            }
        };

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(format!("Failed to start {:?} execution", isolation))?;

        let completion = communicate(&mut child, input, limit).await?;

        let (status, stdout, stderr) = match completion {
            Completion::TimedOut => {
                tracing::warn!("Tool execution exceeded {:?}, terminating", limit);
                terminate(&mut child, &isolation).await;
                return Ok(ExecutionResult::failure(TIMEOUT_ERROR));
            }
            Completion::Exited {
                status,
                stdout,
                stderr,
            } => (
                status,
                String::from_utf8_lossy(&stdout).into_owned(),
                String::from_utf8_lossy(&stderr).into_owned(),
            ),
        };

        tracing::debug!("Sandbox stdout: {}", stdout);
        tracing::debug!("Sandbox stderr: {}", stderr);

        if !status.success() {
            let stderr = stderr.trim_end();
            let error = if stderr.trim().is_empty() {
                format!("Tool process exited with {}", status)
            } else {
                stderr.to_string()
            };
            return Ok(ExecutionResult::failure(error));
        }

        Ok(recover_json_output(&stdout))
    }

    async fn check_syntax(&self, source: &str) -> Result<bool> {
        let scratch = self.scratch_dir().await?;
        let script = scratch
            .path()
            .join(format!("check.{}", self.config.language.extension()));
        tokio::fs::write(&script, source)
            .await
            .context("Failed to write source for syntax check")?;

        let args = self
            .config
            .language
            .syntax_check_args(&script.to_string_lossy());

        let output = Command::new(&self.config.interpreter)
            .args(&args)
            .current_dir(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match timeout(VALIDATION_TIMEOUT, output).await {
            Ok(Ok(output)) => {
                if !output.status.success() {
                    tracing::debug!(
                        "Syntax check failed: {}",
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                }
                Ok(output.status.success())
            }
            Ok(Err(e)) => Err(e).context(format!(
                "Failed to run syntax checker '{}'",
                self.config.interpreter
            )),
            Err(_) => {
                tracing::warn!("Syntax check timed out after {:?}", VALIDATION_TIMEOUT);
                Ok(false)
            }
        }
    }

    /// Fresh directory per call, removed when the guard drops
    async fn scratch_dir(&self) -> Result<tempfile::TempDir> {
        tokio::fs::create_dir_all(&self.config.scratch_dir)
            .await
            .context(format!(
                "Failed to create scratch root {:?}",
                self.config.scratch_dir
            ))?;

        tempfile::Builder::new()
            .prefix("exec-")
            .tempdir_in(&self.config.scratch_dir)
            .context("Failed to create scratch directory")
    }

    async fn isolation(&self, scratch: &Path) -> Isolation {
        if self.config.wants_container() && self.container_runtime_available().await {
            let suffix = scratch
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| std::process::id().to_string());
            Isolation::Container {
                name: format!("toolsmith-{}", suffix),
            }
        } else {
            Isolation::Subprocess
        }
    }

    /// Probed once per executor
    async fn container_runtime_available(&self) -> bool {
        *self.docker_available.get_or_init(probe_docker).await
    }

    fn subprocess_command(&self, script: &Path, workdir: &Path) -> Command {
        let mut command = std::process::Command::new(&self.config.interpreter);
        command.arg(script).current_dir(workdir);

        // Own process group, so a timeout can take down the whole tree
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        Command::from(command)
    }

    fn container_command(&self, name: &str, scratch: &Path, file_name: &str) -> Command {
        let mut command = Command::new("docker");
        command.args(docker_run_args(&self.config, name, scratch, file_name));
        command
    }
}

fn docker_run_args(
    config: &ExecutorConfig,
    name: &str,
    scratch: &Path,
    file_name: &str,
) -> Vec<String> {
    vec![
        "run".to_string(),
        "--rm".to_string(),
        "-i".to_string(),
        "--name".to_string(),
        name.to_string(),
        "--network".to_string(),
        "none".to_string(),
        "--memory".to_string(),
        config.docker_memory.clone(),
        "--pids-limit".to_string(),
        config.docker_pids_limit.to_string(),
        "-v".to_string(),
        format!("{}:{}:ro", scratch.display(), CONTAINER_WORKDIR),
        "-w".to_string(),
        CONTAINER_WORKDIR.to_string(),
        config.docker_image.clone(),
        config.language.container_interpreter().to_string(),
        file_name.to_string(),
    ]
}

async fn probe_docker() -> bool {
    let probe = Command::new("docker")
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    let available = matches!(
        timeout(DOCKER_PROBE_TIMEOUT, probe).await,
        Ok(Ok(status)) if status.success()
    );

    if available {
        tracing::info!("Docker available, tools will run in containers");
    } else {
        tracing::info!("Docker unavailable, falling back to subprocess execution");
    }
    available
}

/// Feed stdin, drain stdout/stderr, and wait at most `limit`
async fn communicate(child: &mut Child, input: String, limit: Duration) -> Result<Completion> {
    let mut stdin = child.stdin.take().context("Child stdin not captured")?;
    let stdout = child.stdout.take().context("Child stdout not captured")?;
    let stderr = child.stderr.take().context("Child stderr not captured")?;

    let mut writer = tokio::spawn(async move {
        stdin.write_all(input.as_bytes()).await?;
        stdin.shutdown().await
    });
    let mut stdout_reader = tokio::spawn(read_capped(stdout));
    let mut stderr_reader = tokio::spawn(read_capped(stderr));

    let status = match timeout(limit, child.wait()).await {
        Ok(status) => status.context("Failed to wait for tool process")?,
        Err(_) => {
            writer.abort();
            stdout_reader.abort();
            stderr_reader.abort();
            return Ok(Completion::TimedOut);
        }
    };

    match timeout(OUTPUT_DRAIN_GRACE, &mut writer).await {
        Ok(Ok(Err(e))) if e.kind() != std::io::ErrorKind::BrokenPipe => {
            tracing::debug!("Failed to write parameters to tool stdin: {}", e);
        }
        Err(_) => writer.abort(),
        _ => {}
    }

    let stdout = drain(&mut stdout_reader, "stdout").await;
    let stderr = drain(&mut stderr_reader, "stderr").await;

    Ok(Completion::Exited {
        status,
        stdout,
        stderr,
    })
}

async fn read_capped<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    (&mut reader).take(MAX_OUTPUT_BYTES).read_to_end(&mut buf).await?;
    tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok(buf)
}

/// Collect a reader task's output. Descendants that outlive the tool may
/// hold the pipe open, so waiting is bounded.
async fn drain(handle: &mut JoinHandle<std::io::Result<Vec<u8>>>, stream: &str) -> Vec<u8> {
    match timeout(OUTPUT_DRAIN_GRACE, &mut *handle).await {
        Ok(Ok(Ok(bytes))) => bytes,
        Ok(Ok(Err(e))) => {
            tracing::debug!("Failed to read tool {}: {}", stream, e);
            Vec::new()
        }
        Ok(Err(e)) => {
            tracing::debug!("Tool {} reader failed: {}", stream, e);
            Vec::new()
        }
        Err(_) => {
            tracing::warn!("Tool {} still open after exit, discarding", stream);
            handle.abort();
            Vec::new()
        }
    }
}

/// Hard-stop everything the execution started, then reap the child
async fn terminate(child: &mut Child, isolation: &Isolation) {
    if let Isolation::Container { name } = isolation {
        let kill = Command::new("docker")
            .args(["kill", name.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        match timeout(DOCKER_KILL_TIMEOUT, kill).await {
            Ok(Ok(status)) if status.success() => {
                tracing::debug!("Killed container {}", name);
            }
            _ => tracing::warn!("Failed to kill container {}", name),
        }
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(raw) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
                tracing::debug!("killpg({}) failed: {}", raw, e);
            }
        }
    }

    if let Err(e) = child.kill().await {
        tracing::debug!("Failed to kill tool process: {}", e);
    }
}

/// Recover a JSON result from tool stdout
///
/// Tries all of stdout, then each line on its own (first hit wins).
pub fn recover_json_output(stdout: &str) -> ExecutionResult {
    if let Ok(value) = serde_json::from_str::<Value>(stdout) {
        return ExecutionResult::success(value);
    }
    tracing::debug!("Full stdout is not valid JSON, trying line-by-line");

    let lines: Vec<&str> = stdout.trim().lines().collect();
    for (idx, line) in lines.iter().enumerate() {
        match serde_json::from_str::<Value>(line) {
            Ok(value) => {
                tracing::debug!("Parsed JSON from line {}", idx);
                return ExecutionResult::success(value);
            }
            Err(_) => tracing::debug!("Line {} is not valid JSON: {}", idx, line),
        }
    }

    ExecutionResult::failure(format!("{} Full stdout: {}", DECODE_ERROR, stdout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolLanguage;
    use serde_json::json;
    use std::time::Instant;
    use tempfile::TempDir;

    fn shell_executor(scratch: &TempDir) -> Executor {
        Executor::new(
            ExecutorConfig::local(ToolLanguage::Shell)
                .with_timeout(Duration::from_secs(10))
                .with_scratch_dir(scratch.path()),
        )
    }

    #[test]
    fn test_recover_whole_stdout() {
        let result = recover_json_output("{\n  \"a\": 1\n}\n");
        assert!(result.success);
        assert_eq!(result.result, Some(json!({"a": 1})));
    }

    #[test]
    fn test_recover_first_parsable_line() {
        let result = recover_json_output("loading model...\n{\"a\": 1}\n{\"b\": 2}\n");
        assert!(result.success);
        assert_eq!(result.result, Some(json!({"a": 1})));
    }

    #[test]
    fn test_pretty_json_after_log_line_is_not_recovered() {
        let result = recover_json_output("starting\n{\n  \"status\": \"ok\"\n}\n");
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with(DECODE_ERROR));
    }

    #[test]
    fn test_recover_failure_includes_stdout() {
        let result = recover_json_output("no json here\nnor here\n");
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.starts_with(DECODE_ERROR));
        assert!(error.contains("nor here"));

        assert!(!recover_json_output("").success);
    }

    #[test]
    fn test_docker_args_disable_network_and_mount_read_only() {
        let config = ExecutorConfig::local(ToolLanguage::Python);
        let args = docker_run_args(&config, "toolsmith-x", Path::new("/tmp/exec-1"), "tool.py");

        let joined = args.join(" ");
        assert!(joined.starts_with("run --rm -i --name toolsmith-x"));
        assert!(joined.contains("--network none"));
        assert!(joined.contains("-v /tmp/exec-1:/app:ro"));
        assert!(joined.contains("-w /app"));
        assert!(joined.ends_with("python:3.10-slim python tool.py"));
    }

    #[tokio::test]
    async fn test_echo_tool() {
        let scratch = TempDir::new().unwrap();
        let executor = shell_executor(&scratch);
        let source = "input=$(cat)\nprintf '{\"received\": %s}\\n' \"$input\"\n";

        let result = executor.execute(source, &json!({"x": 1})).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.result, Some(json!({"received": {"x": 1}})));
    }

    #[tokio::test]
    async fn test_leading_diagnostic_line_is_tolerated() {
        let scratch = TempDir::new().unwrap();
        let executor = shell_executor(&scratch);
        let source = "cat > /dev/null\necho 'warming up'\necho '{\"ok\": true}'\n";

        let result = executor.execute(source, &json!({})).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.result, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_nonzero_exit_returns_stderr() {
        let scratch = TempDir::new().unwrap();
        let executor = shell_executor(&scratch);

        let result = executor
            .execute("echo 'something broke' >&2\nexit 3\n", &json!({}))
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("something broke"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_without_stderr_reports_status() {
        let scratch = TempDir::new().unwrap();
        let executor = shell_executor(&scratch);

        let result = executor.execute("exit 4\n", &json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("exited with"));
    }

    #[tokio::test]
    async fn test_unparsable_output() {
        let scratch = TempDir::new().unwrap();
        let executor = shell_executor(&scratch);

        let result = executor.execute("echo 'plain text'\n", &json!({})).await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains(DECODE_ERROR));
        assert!(error.contains("plain text"));
    }

    #[tokio::test]
    async fn test_timeout_kills_process_tree() {
        let scratch = TempDir::new().unwrap();
        let marker_dir = TempDir::new().unwrap();
        let marker = marker_dir.path().join("survived");
        let executor = shell_executor(&scratch);
        let source = format!("( sleep 2; touch '{}' ) &\nwait\n", marker.display());

        let start = Instant::now();
        let result = executor
            .run(&source, &json!({}), Duration::from_millis(300))
            .await;

        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(TIMEOUT_ERROR));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists(), "background child outlived the timeout");
    }

    #[tokio::test]
    async fn test_scratch_files_are_removed() {
        let scratch = TempDir::new().unwrap();
        let executor = shell_executor(&scratch);

        let result = executor.execute("echo '[1, 2]'\n", &json!({})).await;
        assert!(result.success);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_runs_do_not_interfere() {
        let scratch = TempDir::new().unwrap();
        let executor = shell_executor(&scratch);
        let source = "input=$(cat)\nprintf '%s\\n' \"$input\"\n";

        let input_a = json!({"id": "a"});
        let input_b = json!({"id": "b"});
        let (a, b) = tokio::join!(
            executor.execute(source, &input_a),
            executor.execute(source, &input_b),
        );
        assert_eq!(a.result, Some(json!({"id": "a"})));
        assert_eq!(b.result, Some(json!({"id": "b"})));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_a_result_not_a_panic() {
        let scratch = TempDir::new().unwrap();
        let mut config = ExecutorConfig::local(ToolLanguage::Shell).with_scratch_dir(scratch.path());
        config.interpreter = "/nonexistent/interpreter".to_string();
        let executor = Executor::new(config);

        let result = executor.execute("echo '{}'", &json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Failed to start"));
        assert!(!executor.validate("echo '{}'").await);
    }

    #[tokio::test]
    async fn test_validate_gates_on_syntax_only() {
        let scratch = TempDir::new().unwrap();
        let executor = shell_executor(&scratch);

        assert!(executor.validate("echo hello\n").await);
        // Valid syntax that would fail at runtime still passes
        assert!(executor.validate("exit 1\n").await);
        assert!(!executor.validate("if true; then echo missing fi\n").await);
        assert!(!executor.validate("   \n").await);
    }

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_python_validate_rejects_compile_time_errors() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let scratch = TempDir::new().unwrap();
        let executor = Executor::new(
            ExecutorConfig::local(ToolLanguage::Python).with_scratch_dir(scratch.path()),
        );

        assert!(executor.validate("import json\nprint(json.dumps({}))\n").await);
        assert!(!executor.validate("def broken(:\n    pass\n").await);
        // Parses, but fails to compile
        assert!(!executor.validate("return 1\n").await);
        assert!(!executor.validate("break\n").await);
        assert!(!executor.validate("def f(a, a):\n    pass\n").await);
    }

    #[tokio::test]
    async fn test_validate_does_not_execute() {
        let scratch = TempDir::new().unwrap();
        let marker_dir = TempDir::new().unwrap();
        let marker = marker_dir.path().join("ran");
        let executor = shell_executor(&scratch);

        assert!(executor.validate(&format!("touch '{}'\n", marker.display())).await);
        assert!(!marker.exists());
    }
}
