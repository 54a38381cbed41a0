use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-tool risk label governing approval prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    /// Auto-approved even in ask-always mode.
    Safe,
    Moderate,
    Destructive,
    Critical,
}

impl PermissionLevel {
    /// Parse a config string; unrecognized values yield `None` (callers fall
    /// back to `Moderate`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "safe" => Some(Self::Safe),
            "moderate" => Some(Self::Moderate),
            "destructive" => Some(Self::Destructive),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Where a tool comes from.  Federated tools carry their server name for
/// metrics and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolOrigin {
    Native,
    Mcp(String),
}

/// The result of executing a [`Tool`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    /// Structured payload for the model.
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// A timeout result with the explicit `timed_out` flag in data.
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Some(serde_json::json!({ "timed_out": true })),
            error: Some(message.into()),
        }
    }
}

/// A capability the agent loop can invoke.
///
/// Implementations must be `Send + Sync` so they can be held in a shared
/// `Arc<dyn Tool>` registry.  MCP tools implement this contract by
/// forwarding to their session.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable machine identifier (snake_case), e.g. `"shell_execute"`.
    fn name(&self) -> &str;

    /// Human-readable description used in LLM tool payloads.
    fn description(&self) -> &str;

    /// JSON Schema object describing the accepted parameters.
    fn parameters_schema(&self) -> Value;

    fn permission_level(&self) -> PermissionLevel;

    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Native
    }

    /// Payment-typed tools go through the spending-limit and approval-tier
    /// gates before execution.
    fn is_payment(&self) -> bool {
        false
    }

    /// Execute with decoded arguments.  Tool-body failures are returned as
    /// `Err` and converted to structured tool errors by the executor —
    /// never propagated.
    async fn execute(&self, args: Value) -> Result<ToolResult, String>;
}
