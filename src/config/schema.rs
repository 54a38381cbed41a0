//! YAML configuration schema for Huginn.
//!
//! All fields carry `#[serde(default)]` so a partially-filled `config.yaml`
//! works correctly.  Missing sections fall back to their `Default` impl.
//!
//! Example `config.yaml`:
//! ```yaml
//! agent:
//!   name: huginn
//!   permission_mode: smart_auto
//!   max_steps: 20
//!
//! llm:
//!   provider_priority: [glm, openrouter, ollama]
//!   providers:
//!     openrouter:
//!       enabled: true
//!       base_url: https://openrouter.ai/api/v1
//!   budget:
//!     daily_limit_usd: 10.0
//!
//! authority:
//!   owner:
//!     user_ids: ["telegram:111"]
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ─── AgentConfig ──────────────────────────────────────────────────────────────

/// How tool executions are approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Every non-SAFE tool execution requires explicit user approval.
    #[default]
    AskAlways,
    /// SAFE and MODERATE tools run automatically; DESTRUCTIVE/CRITICAL ask.
    SmartAuto,
    /// All tool executions proceed without manual approval.
    FullAuto,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Display name used in the system prompt.
    pub name: String,
    pub permission_mode: PermissionMode,
    /// Maximum plan→tool→observe iterations per turn.
    pub max_steps: usize,
    /// Wall-clock cap per turn, in seconds.
    pub max_time_seconds: u64,
    /// Conversation history cap in messages (oldest non-system evicted first).
    pub max_history: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "huginn".to_owned(),
            permission_mode: PermissionMode::default(),
            max_steps: 20,
            max_time_seconds: 300,
            max_history: 50,
        }
    }
}

// ─── LLM section ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ProviderConfig {
    pub enabled: bool,
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
    /// Local providers (Ollama) are gated by health-check failures;
    /// cloud providers stay eligible after transient errors.
    pub local: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RoutingConfig {
    pub preferred_provider: Option<String>,
    pub preferred_model: Option<String>,
    pub fallback_provider: Option<String>,
    pub fallback_model: Option<String>,
    /// Model to use when routing lands on a local provider.
    pub local_fallback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BudgetConfig {
    pub daily_limit_usd: f64,
    pub per_task_limit_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_limit_usd: 10.0,
            per_task_limit_usd: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LlmConfig {
    pub providers: HashMap<String, ProviderConfig>,
    /// Fallback order walked when task routing yields nothing usable.
    pub provider_priority: Vec<String>,
    /// Task-type → routing preference.
    pub routing: HashMap<String, RoutingConfig>,
    pub budget: BudgetConfig,
}

// ─── ShellConfig ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    /// Per-command timeout in seconds.
    pub timeout_seconds: u64,
    /// Substring patterns that reject a command outright.
    pub blacklist_patterns: Vec<String>,
    /// Commands considered safe regardless of permission mode.
    pub safe_commands: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            blacklist_patterns: vec![
                "rm -rf /".to_owned(),
                "mkfs".to_owned(),
                ":(){".to_owned(),
                "dd if=".to_owned(),
                "> /dev/sd".to_owned(),
            ],
            safe_commands: vec![
                "ls".to_owned(),
                "cat".to_owned(),
                "pwd".to_owned(),
                "echo".to_owned(),
                "date".to_owned(),
            ],
        }
    }
}

// ─── AuthorityConfig ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AuthorityTierConfig {
    /// Composite `"channel:user_id"` keys or bare user ids.
    pub user_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AuthorityConfig {
    pub owner: AuthorityTierConfig,
    pub trusted: AuthorityTierConfig,
}

// ─── McpConfig ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct McpServerConfig {
    pub enabled: bool,
    /// Stdio transport: command + args spawn an MCP server child process.
    pub command: String,
    pub args: Vec<String>,
    /// Environment for the child.  Values may be `vault:<name>` references.
    pub env: HashMap<String, String>,
    /// Default permission level inherited by every tool from this server.
    /// Invalid values fall back to `moderate`.
    pub permission_level: String,
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            permission_level: "moderate".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct McpConfig {
    pub enabled: bool,
    pub servers: HashMap<String, McpServerConfig>,
}

// ─── PaymentsConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpendingLimitsConfig {
    pub per_transaction: f64,
    pub daily: f64,
    pub monthly: f64,
    pub per_recipient_daily: f64,
}

impl Default for SpendingLimitsConfig {
    fn default() -> Self {
        Self {
            per_transaction: 50.0,
            daily: 100.0,
            monthly: 500.0,
            per_recipient_daily: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PaymentApprovalConfig {
    pub always_ask_above: f64,
    pub confirm_above: f64,
    pub cooldown_above: f64,
    /// Delay between preview and execute for the cooldown tier.
    pub cooldown_seconds: u64,
}

impl Default for PaymentApprovalConfig {
    fn default() -> Self {
        Self {
            always_ask_above: 5.0,
            confirm_above: 20.0,
            cooldown_above: 100.0,
            cooldown_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PaymentsConfig {
    pub enabled: bool,
    pub limits: SpendingLimitsConfig,
    pub approval: PaymentApprovalConfig,
}

// ─── StorageConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Total workspace quota in MB.  0 disables quota checking.
    pub workspace_quota_mb: u64,
    /// Percentage of quota at which `check_quota` reports `warning`.
    pub alert_threshold_pct: f64,
    pub max_file_size_mb: u64,
    pub download_retention_hours: u64,
    pub upload_retention_hours: u64,
    pub cache_max_mb: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_owned(),
            workspace_quota_mb: 2000,
            alert_threshold_pct: 80.0,
            max_file_size_mb: 100,
            download_retention_hours: 72,
            upload_retention_hours: 168,
            cache_max_mb: 500,
        }
    }
}

// ─── Gateway / Browser ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub session_timeout_hours: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            session_timeout_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct BrowserConfig {
    pub enabled: bool,
}

// ─── AppConfig ────────────────────────────────────────────────────────────────

/// Top-level application configuration, loaded from `config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    pub shell: ShellConfig,
    pub authority: AuthorityConfig,
    pub mcp: McpConfig,
    pub payments: PaymentsConfig,
    pub storage: StorageConfig,
    pub gateway: GatewayConfig,
    pub browser: BrowserConfig,
    /// Files no tool may write, delete, or move.
    pub protected_paths: Vec<String>,
}
