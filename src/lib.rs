//! Huginn — a local, self-hosted AI assistant core.
//!
//! The crate is the plan–execute–observe loop glued to five interacting
//! subsystems: a health-aware LLM router, a layered authorization stack
//! (authority tier → permission level → spending limits → content safety),
//! an external-content taint guard, a tool registry federating native tools
//! with MCP servers, and an out-of-band recovery channel that stays usable
//! when every provider is down.

pub mod agent;
pub mod ai;
pub mod bootstrap;
pub mod config;
pub mod database;
pub mod gateway;
pub mod mcp;
pub mod payments;
pub mod recovery;
pub mod runtime;
pub mod security;
pub mod tools;
pub mod vault;

/// Convenience re-exports for the most commonly used types.
///
/// ```rust
/// use huginn::prelude::*;
/// ```
pub mod prelude {
    pub use crate::agent::{Agent, AgentResponse};
    pub use crate::ai::provider::LlmProvider;
    pub use crate::ai::types::{CompletionRequest, CompletionResponse, Message, MessageRole};
    pub use crate::ai::{CostTracker, LlmRouter, RouterError};
    pub use crate::config::{load_config, AppConfig, PermissionMode};
    pub use crate::database::Store;
    pub use crate::gateway::{Channel, ChannelManager, ChannelMessage, Gateway};
    pub use crate::mcp::McpManager;
    pub use crate::payments::{PaymentAuditor, SpendingLimiter};
    pub use crate::recovery::RecoveryHandler;
    pub use crate::runtime::{Deadline, ProcessRegistry, StorageManager};
    pub use crate::security::{resolve_authority, AuthorityLevel};
    pub use crate::tools::{Tool, ToolExecutor, ToolRegistry, ToolResult};
    pub use crate::vault::{KeyringVault, MemoryVault, Vault};
}
