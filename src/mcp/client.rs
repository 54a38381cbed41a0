//! MCP (Model Context Protocol) stdio client.
//!
//! An MCP server is a child process speaking JSON-RPC 2.0 over
//! stdin/stdout, newline-delimited.
//!
//! # Lifecycle
//! 1. Spawn the server process with its (vault-resolved) environment.
//! 2. `initialize` completes the MCP handshake.
//! 3. `notifications/initialized` is fired without expecting a reply.
//! 4. `tools/list` discovers the advertised tools.
//! 5. Agent tool calls forward to `tools/call`.
//!
//! All calls are serialized behind a mutex so concurrent invocations don't
//! interleave frames on the shared stdio stream.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

// ─── JSON-RPC 2.0 types ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: Value,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn into_result(self) -> Result<Value, String> {
        if let Some(err) = self.error {
            return Err(format!(
                "MCP error {} ({}): {}",
                err.code,
                err.message,
                err.data.unwrap_or(Value::Null)
            ));
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

// ─── Discovered tool descriptor ───────────────────────────────────────────────

/// A tool advertised by an MCP server, as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

// ─── Connection state ─────────────────────────────────────────────────────────

/// Connection state machine.  A call is only dispatched while `Connected`;
/// discovery returns nothing otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Failed,
}

// ─── Client internals ─────────────────────────────────────────────────────────

struct McpProcess {
    child: tokio::process::Child,
    stdin: tokio::process::ChildStdin,
    stdout: BufReader<tokio::process::ChildStdout>,
    next_id: u64,
}

impl McpProcess {
    fn next_id(&mut self) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        Value::Number(id.into())
    }

    async fn call(&mut self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, String> {
        let id = self.next_id();
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.to_owned(),
            params,
        };

        let mut line = serde_json::to_string(&req).map_err(|e| format!("MCP serialize error: {e}"))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| format!("MCP write error: {e}"))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| format!("MCP flush error: {e}"))?;

        let mut resp_line = String::new();
        self.stdout
            .read_line(&mut resp_line)
            .await
            .map_err(|e| format!("MCP read error: {e}"))?;
        if resp_line.is_empty() {
            return Err("MCP server closed the connection".to_owned());
        }

        serde_json::from_str::<JsonRpcResponse>(&resp_line)
            .map_err(|e| format!("MCP deserialize error: {e}"))
    }

    async fn notify(&mut self, method: &str) -> Result<(), String> {
        let notif = serde_json::json!({ "jsonrpc": "2.0", "method": method });
        let mut line =
            serde_json::to_string(&notif).map_err(|e| format!("MCP serialize error: {e}"))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| format!("MCP notification write error: {e}"))?;
        Ok(())
    }
}

// ─── McpClient ────────────────────────────────────────────────────────────────

/// Manages one long-running MCP server process.
pub struct McpClient {
    server_name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    process: Mutex<Option<McpProcess>>,
    state: std::sync::Mutex<ConnectionState>,
}

impl McpClient {
    /// Create a client (process not yet started).  `env` must already be
    /// vault-resolved.
    pub fn new(
        server_name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            command: command.into(),
            args,
            env,
            process: Mutex::new(None),
            state: std::sync::Mutex::new(ConnectionState::Disconnected),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Spawn the server and complete the MCP handshake.  Returns the
    /// advertised tools.
    pub async fn connect(&self) -> Result<Vec<McpToolInfo>, String> {
        self.set_state(ConnectionState::Connecting);
        let result = self.connect_inner().await;
        match &result {
            Ok(tools) => {
                self.set_state(ConnectionState::Connected);
                log::info!(
                    "MCP server '{}' connected, {} tool(s) discovered",
                    self.server_name,
                    tools.len()
                );
            }
            Err(e) => {
                self.set_state(ConnectionState::Failed);
                log::warn!("MCP server '{}' failed to connect: {e}", self.server_name);
            }
        }
        result
    }

    async fn connect_inner(&self) -> Result<Vec<McpToolInfo>, String> {
        let mut guard = self.process.lock().await;

        let mut child = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to start MCP server '{}': {e}", self.command))?;

        let stdin = child.stdin.take().ok_or("MCP child has no stdin")?;
        let stdout = BufReader::new(child.stdout.take().ok_or("MCP child has no stdout")?);
        let mut proc = McpProcess {
            child,
            stdin,
            stdout,
            next_id: 0,
        };

        // Handshake.
        let init_params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {
                "name": "huginn",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        proc.call("initialize", Some(init_params))
            .await
            .and_then(JsonRpcResponse::into_result)?;
        proc.notify("notifications/initialized").await?;

        // Discovery.
        let tools_result = proc.call("tools/list", None).await?.into_result()?;
        let tools: Vec<McpToolInfo> = tools_result
            .get("tools")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        *guard = Some(proc);
        Ok(tools)
    }

    /// Stop the server.  Dropping the process closes stdin; the server
    /// sees EOF and exits.
    pub async fn close(&self) {
        self.set_state(ConnectionState::Closing);
        let mut guard = self.process.lock().await;
        if let Some(mut proc) = guard.take() {
            let _ = proc.child.start_kill();
        }
        self.set_state(ConnectionState::Disconnected);
        log::info!("MCP server '{}' stopped", self.server_name);
    }

    /// Call a tool on the server.  Dispatched only while Connected.
    pub async fn call_tool(&self, tool_name: &str, input: Value) -> Result<Value, String> {
        if !self.connected() {
            return Err(format!(
                "MCP server '{}' is not connected",
                self.server_name
            ));
        }
        let mut guard = self.process.lock().await;
        let proc = guard
            .as_mut()
            .ok_or_else(|| format!("MCP server '{}' is not running", self.server_name))?;

        let params = serde_json::json!({ "name": tool_name, "arguments": input });
        let result = proc.call("tools/call", Some(params)).await?.into_result()?;
        Ok(result)
    }
}

// ─── Result translation ───────────────────────────────────────────────────────

/// Translate an MCP `tools/call` result into a tool-result payload.
///
/// MCP returns a heterogeneous content list; text items collapse into
/// `{output}` (a string for one item, a list otherwise), images become
/// `{type: "image", mimeType, data}`, resources `{type: "resource", uri,
/// text?}`.  The `isError` flag becomes an `Err` with the extracted text.
pub fn translate_call_result(result: &Value) -> Result<Value, String> {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let content = result
        .get("content")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if is_error {
        let message = content
            .iter()
            .find_map(|item| item.get("text").and_then(Value::as_str))
            .unwrap_or("tool returned an error");
        return Err(message.to_owned());
    }

    let mut items: Vec<Value> = Vec::with_capacity(content.len());
    for item in &content {
        match item.get("type").and_then(Value::as_str) {
            Some("text") => {
                items.push(Value::String(
                    item.get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                ));
            }
            Some("image") => items.push(serde_json::json!({
                "type": "image",
                "mimeType": item.get("mimeType").cloned().unwrap_or(Value::Null),
                "data": item.get("data").cloned().unwrap_or(Value::Null),
            })),
            Some("resource") => {
                let resource = item.get("resource").unwrap_or(item);
                let mut out = serde_json::json!({
                    "type": "resource",
                    "uri": resource.get("uri").cloned().unwrap_or(Value::Null),
                });
                if let Some(text) = resource.get("text") {
                    out["text"] = text.clone();
                }
                items.push(out);
            }
            _ => items.push(item.clone()),
        }
    }

    let output = match items.len() {
        0 => Value::String(String::new()),
        1 => items.into_iter().next().unwrap_or_default(),
        _ => Value::Array(items),
    };
    Ok(serde_json::json!({ "output": output }))
}
