pub mod loader;
pub mod schema;

pub use loader::{apply_env_overrides, load_config, ConfigError};
pub use schema::{
    AgentConfig, AppConfig, AuthorityConfig, AuthorityTierConfig, BrowserConfig, BudgetConfig,
    GatewayConfig, LlmConfig, McpConfig, McpServerConfig, PaymentApprovalConfig, PaymentsConfig,
    PermissionMode, ProviderConfig, RoutingConfig, ShellConfig, SpendingLimitsConfig,
    StorageConfig,
};
