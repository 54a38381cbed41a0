//! Constructor-time wiring of the whole stack.
//!
//! The gateway owns the loop; the loop owns the router and executor; the
//! executor owns the registry; the registry holds MCP tool proxies but not
//! the manager.  No runtime circular ownership — everything is wired here,
//! once, from the loaded configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::ai::cost::CostTracker;
use crate::ai::provider::LlmProvider;
use crate::ai::providers::{GlmProvider, OpenAiCompatibleConfig, OpenAiCompatibleProvider};
use crate::ai::router::LlmRouter;
use crate::config::{AppConfig, ConfigError};
use crate::database::{Store, StoreError};
use crate::gateway::Gateway;
use crate::mcp::McpManager;
use crate::payments::{PaymentAuditor, SpendingLimiter};
use crate::recovery::RecoveryHandler;
use crate::runtime::{ProcessRegistry, StorageManager};
use crate::tools::{register_native_tools, ToolExecutor, ToolRegistry};
use crate::vault::{KeyringVault, Vault};

/// Default bound on concurrently tracked child processes.
const MAX_TRACKED_PROCESSES: usize = 10;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("storage init failed: {0}")]
    Storage(#[from] std::io::Error),

    #[error("provider setup failed: {0}")]
    Provider(String),
}

/// The assembled runtime.
pub struct Runtime {
    pub config: Arc<RwLock<AppConfig>>,
    pub store: Arc<Store>,
    pub router: Arc<LlmRouter>,
    pub registry: Arc<ToolRegistry>,
    pub executor: Arc<ToolExecutor>,
    pub mcp: Arc<McpManager>,
    pub gateway: Arc<Gateway>,
    pub storage: Arc<StorageManager>,
    pub processes: Arc<ProcessRegistry>,
}

/// Build every subsystem from a loaded config.
pub async fn build(config: AppConfig, config_path: Option<&Path>) -> Result<Runtime, BootstrapError> {
    let project_root = config_path
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let storage = Arc::new(StorageManager::new(config.storage.clone(), &project_root));
    storage.initialize().await?;
    let store = Arc::new(Store::open(&storage.base_dir().join("huginn.db"))?);

    let vault: Arc<dyn Vault> = Arc::new(KeyringVault::new("huginn"));
    let processes = Arc::new(ProcessRegistry::new(MAX_TRACKED_PROCESSES));

    let providers = build_providers(&config)?;
    let shell_config = config.shell.clone();
    let mcp_config = config.mcp.clone();
    let payments_config = config.payments.clone();

    let config = Arc::new(RwLock::new(config));
    let router = Arc::new(LlmRouter::new(
        config.clone(),
        providers,
        Arc::new(CostTracker::new()),
    ));

    // Native tools first, then federated MCP tools.
    let registry = Arc::new(ToolRegistry::new());
    register_native_tools(&registry, shell_config, processes.clone(), storage.clone());

    let mcp = Arc::new(McpManager::new(mcp_config, vault));
    let connected = mcp.connect_all().await;
    for (name, ok) in &connected {
        log::info!("MCP server '{name}': {}", if *ok { "connected" } else { "unavailable" });
    }
    for tool in mcp.discover_and_create_tools() {
        if let Err(e) = registry.register(tool) {
            log::warn!("MCP tool registration skipped: {e}");
        }
    }

    let mut executor = ToolExecutor::new(registry.clone(), config.clone());
    if payments_config.enabled {
        let auditor = Arc::new(PaymentAuditor::new(store.clone()));
        let limiter = Arc::new(SpendingLimiter::new(
            auditor.clone(),
            payments_config.limits.clone(),
            payments_config.approval.clone(),
        ));
        executor = executor.with_payments(limiter, auditor);
    }
    let executor = Arc::new(executor);

    let mut recovery = RecoveryHandler::new(config.clone(), router.clone()).with_store(store.clone());
    if let Some(path) = config_path {
        recovery = recovery.with_config_path(path.to_path_buf());
    }
    let recovery = Arc::new(recovery);

    let gateway = Arc::new(Gateway::new(
        config.clone(),
        router.clone(),
        executor.clone(),
        recovery,
    ));

    Ok(Runtime {
        config,
        store,
        router,
        registry,
        executor,
        mcp,
        gateway,
        storage,
        processes,
    })
}

fn build_providers(
    config: &AppConfig,
) -> Result<HashMap<String, Arc<dyn LlmProvider>>, BootstrapError> {
    let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
    for (name, cfg) in &config.llm.providers {
        if !cfg.enabled {
            continue;
        }
        let provider: Arc<dyn LlmProvider> = match name.as_str() {
            "glm" => {
                let base_url = if cfg.base_url.is_empty() {
                    "https://api.z.ai/api/paas/v4"
                } else {
                    &cfg.base_url
                };
                Arc::new(
                    GlmProvider::new(cfg.api_key.clone(), base_url)
                        .map_err(BootstrapError::Provider)?,
                )
            }
            "ollama" => {
                let mut provider_cfg = OpenAiCompatibleConfig::ollama();
                if !cfg.base_url.is_empty() {
                    provider_cfg.base_url = cfg.base_url.clone();
                }
                Arc::new(
                    OpenAiCompatibleProvider::new(provider_cfg, name.clone())
                        .map_err(BootstrapError::Provider)?,
                )
            }
            _ => {
                let mut provider_cfg = if cfg.base_url.is_empty() {
                    OpenAiCompatibleConfig::openrouter(cfg.api_key.clone())
                } else {
                    OpenAiCompatibleConfig::new(cfg.api_key.clone(), cfg.base_url.clone())
                };
                provider_cfg.local = cfg.local;
                Arc::new(
                    OpenAiCompatibleProvider::new(provider_cfg, name.clone())
                        .map_err(BootstrapError::Provider)?,
                )
            }
        };
        providers.insert(name.clone(), provider);
    }
    Ok(providers)
}
