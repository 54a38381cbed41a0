//! Shell execution tool.
//!
//! Commands run via `sh -c` with the configured timeout.  Blacklist
//! patterns reject a command outright; the process registry acts as an
//! admission gate against unbounded spawning.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::ShellConfig;
use crate::runtime::ProcessRegistry;

use super::traits::{PermissionLevel, Tool, ToolResult};

pub struct ShellExecuteTool {
    config: ShellConfig,
    processes: Arc<ProcessRegistry>,
}

impl ShellExecuteTool {
    pub fn new(config: ShellConfig, processes: Arc<ProcessRegistry>) -> Self {
        Self { config, processes }
    }

    fn blacklisted(&self, command: &str) -> Option<&str> {
        self.config
            .blacklist_patterns
            .iter()
            .find(|p| command.contains(p.as_str()))
            .map(String::as_str)
    }
}

#[async_trait]
impl Tool for ShellExecuteTool {
    fn name(&self) -> &str {
        "shell_execute"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout, stderr, and the exit code. \
         Use dedicated file tools instead when one exists."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute."
                },
                "working_dir": {
                    "type": "string",
                    "description": "Optional working directory."
                }
            },
            "required": ["command"]
        })
    }

    fn permission_level(&self) -> PermissionLevel {
        PermissionLevel::Destructive
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .ok_or("missing required argument 'command'")?
            .to_owned();
        let working_dir = args
            .get("working_dir")
            .and_then(Value::as_str)
            .map(str::to_owned);

        if let Some(pattern) = self.blacklisted(&command) {
            return Ok(ToolResult::err(format!(
                "command rejected by blacklist pattern '{pattern}'"
            )));
        }

        // Admission gate: saturation is a failure result, not a block.
        if self.processes.at_capacity() {
            return Ok(ToolResult::err(
                "process registry at capacity; try again after running commands finish",
            ));
        }

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(&command);
        if let Some(dir) = &working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("failed to spawn process: {e}"))?;
        let pid = child.id().unwrap_or(0);
        self.processes.register(pid, &command);

        let timeout = std::time::Duration::from_secs(self.config.timeout_seconds);
        let result = tokio::time::timeout(timeout, child.wait_with_output()).await;
        self.processes.unregister(pid);

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(format!("failed to read process output: {e}")),
            Err(_) => {
                return Ok(ToolResult {
                    success: false,
                    data: Some(json!({
                        "timed_out": true,
                        "timeout_seconds": self.config.timeout_seconds,
                    })),
                    error: Some(format!(
                        "command timed out after {} s",
                        self.config.timeout_seconds
                    )),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let data = json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": output.status.code(),
        });

        if output.status.success() {
            Ok(ToolResult::ok(data))
        } else {
            Ok(ToolResult {
                success: false,
                data: Some(data),
                error: Some(format!("command exited with {}", output.status)),
            })
        }
    }
}
