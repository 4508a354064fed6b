//! Persistent interpreter child process as the execution engine.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use costscope_core::config::SandboxConfig;
use costscope_core::SandboxError;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use super::{SandboxEngine, SandboxEvent, SandboxHandle};

const STOP_GRACE: Duration = Duration::from_secs(2);

/// Reads one JSON request per line and executes it in a namespace that lives
/// for the whole session, so variables carry over between calls.
const DRIVER: &str = r#"
import contextlib, io, json, sys, traceback
namespace = {"__name__": "__costscope__"}
for line in sys.stdin:
    request = json.loads(line)
    out, err = io.StringIO(), io.StringIO()
    error = None
    with contextlib.redirect_stdout(out), contextlib.redirect_stderr(err):
        try:
            exec(compile(request["code"], "<calculation>", "exec"), namespace)
        except BaseException:
            error = traceback.format_exc()
    sys.__stdout__.write(json.dumps({"stdout": out.getvalue(), "stderr": err.getvalue(), "error": error}) + "\n")
    sys.__stdout__.flush()
"#;

#[derive(Serialize)]
struct DriverRequest<'a> {
    code: &'a str,
}

#[derive(Deserialize)]
struct DriverResponse {
    stdout: String,
    stderr: String,
    error: Option<String>,
}

impl DriverResponse {
    fn into_events(self) -> Vec<SandboxEvent> {
        [Some(self.stdout), Some(self.stderr), self.error]
            .into_iter()
            .flatten()
            .map(|text| text.trim_end_matches('\n').to_string())
            .filter(|text| !text.is_empty())
            .map(SandboxEvent::text)
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct ProcessSandboxEngine {
    interpreter: String,
    execution_timeout: Duration,
}

impl ProcessSandboxEngine {
    pub fn new(interpreter: impl Into<String>, execution_timeout: Duration) -> Self {
        Self { interpreter: interpreter.into(), execution_timeout }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(config.interpreter.clone(), config.execution_timeout())
    }
}

#[async_trait]
impl SandboxEngine for ProcessSandboxEngine {
    async fn start(&self) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        let mut command = Command::new(&self.interpreter);
        command.env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }
        let mut child = command
            .arg("-u")
            .arg("-c")
            .arg(DRIVER)
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| SandboxError::Start(format!("failed to spawn `{}`: {error}", self.interpreter)))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(SandboxError::Start("interpreter pipes unavailable".to_string()));
        };

        let mut handle = ProcessHandle {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            execution_timeout: self.execution_timeout,
        };

        // Round-trip an empty program so a broken interpreter fails at start.
        handle
            .round_trip("")
            .await
            .map_err(|error| SandboxError::Start(format!("interpreter did not become ready: {error}")))?;
        debug!(interpreter = %self.interpreter, "sandbox interpreter ready");
        Ok(Box::new(handle))
    }
}

struct ProcessHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    execution_timeout: Duration,
}

impl ProcessHandle {
    async fn round_trip(&mut self, code: &str) -> Result<DriverResponse, SandboxError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SandboxError::Execution("interpreter input is closed".to_string()))?;
        let mut line = serde_json::to_string(&DriverRequest { code })
            .map_err(|error| SandboxError::Execution(error.to_string()))?;
        line.push('\n');

        let stdout = &mut self.stdout;
        let exchange = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await?;
            let mut response = String::new();
            stdout.read_line(&mut response).await?;
            Ok::<_, std::io::Error>(response)
        };

        let response = match tokio::time::timeout(self.execution_timeout, exchange).await {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => return Err(SandboxError::Execution(error.to_string())),
            Err(_) => {
                // Interpreter state is unknown after a timeout; the session cannot be reused.
                if let Err(error) = self.child.start_kill() {
                    warn!(
                        event_name = "sandbox.kill_failed",
                        error = %error,
                        "failed to kill sandbox interpreter after execution timeout"
                    );
                }
                self.stdin = None;
                return Err(SandboxError::Timeout(self.execution_timeout));
            }
        };
        if response.is_empty() {
            return Err(SandboxError::Execution("interpreter exited".to_string()));
        }
        serde_json::from_str(&response)
            .map_err(|error| SandboxError::Execution(format!("malformed interpreter response: {error}")))
    }
}

#[async_trait]
impl SandboxHandle for ProcessHandle {
    async fn invoke(&mut self, code: &str, language: &str) -> Result<Vec<SandboxEvent>, SandboxError> {
        if !language.eq_ignore_ascii_case("python") {
            return Err(SandboxError::Execution(format!("unsupported language `{language}`")));
        }
        Ok(self.round_trip(code).await?.into_events())
    }

    async fn stop(&mut self) -> Result<(), SandboxError> {
        // Closing stdin ends the driver loop.
        self.stdin = None;
        match tokio::time::timeout(STOP_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(status = %status, "sandbox interpreter exited");
                Ok(())
            }
            Ok(Err(error)) => Err(SandboxError::Execution(error.to_string())),
            Err(_) => {
                warn!(event_name = "sandbox.kill", "sandbox interpreter ignored shutdown; killing");
                self.child.kill().await.map_err(|error| SandboxError::Execution(error.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::process::Stdio;
    use std::time::Duration;

    use costscope_core::SandboxError;
    use tokio::io::BufReader;
    use tokio::process::Command;

    use super::{DriverResponse, ProcessHandle};
    use crate::sandbox::SandboxEvent;

    #[cfg(unix)]
    #[tokio::test]
    async fn execution_timeout_kills_child_and_retires_handle() {
        let mut child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("spawn sleep");
        let stdin = child.stdin.take().expect("stdin");
        let stdout = child.stdout.take().expect("stdout");
        let mut handle = ProcessHandle {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            execution_timeout: Duration::from_millis(50),
        };

        let error = handle.round_trip("x = 1").await.err().expect("times out");
        assert_eq!(error, SandboxError::Timeout(Duration::from_millis(50)));

        let status = tokio::time::timeout(Duration::from_secs(5), handle.child.wait())
            .await
            .expect("child exits after kill")
            .expect("wait status");
        assert!(!status.success());

        let error = handle.round_trip("x = 2").await.err().expect("handle retired");
        assert_eq!(error, SandboxError::Execution("interpreter input is closed".to_string()));
    }

    #[test]
    fn driver_response_keeps_stream_order_and_drops_blank_output() {
        let response = DriverResponse {
            stdout: "7.488\n".to_string(),
            stderr: String::new(),
            error: Some("Traceback ...\nZeroDivisionError\n".to_string()),
        };
        assert_eq!(
            response.into_events(),
            vec![SandboxEvent::text("7.488"), SandboxEvent::text("Traceback ...\nZeroDivisionError")]
        );
    }
}
