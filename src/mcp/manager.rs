//! MCP connection manager — lifecycle of external tool-server connections
//! and federation of their tools into the registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{McpConfig, McpServerConfig};
use crate::tools::traits::{PermissionLevel, Tool, ToolOrigin, ToolResult};
use crate::vault::{resolve_value, Vault};

use super::client::{translate_call_result, McpClient, McpToolInfo};

/// Sanitize a server name for tool naming: lowercase, non-alphanumerics to
/// `_`, leading/trailing underscores trimmed.
pub fn sanitize_server_name(name: &str) -> String {
    let lowered: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    lowered.trim_matches('_').to_owned()
}

/// Federated tool name: `mcp_<sanitized_server>_<tool>`.
pub fn federated_tool_name(server: &str, tool: &str) -> String {
    format!("mcp_{}_{tool}", sanitize_server_name(server))
}

// ─── McpToolProxy ─────────────────────────────────────────────────────────────

/// A [`Tool`] that forwards execution to an MCP session.
pub struct McpToolProxy {
    full_name: String,
    remote_name: String,
    description: String,
    input_schema: Value,
    permission_level: PermissionLevel,
    client: Arc<McpClient>,
}

impl McpToolProxy {
    pub fn new(server: &str, info: &McpToolInfo, level: PermissionLevel, client: Arc<McpClient>) -> Self {
        Self {
            full_name: federated_tool_name(server, &info.name),
            remote_name: info.name.clone(),
            description: format!("[MCP:{server}] {}", info.description),
            input_schema: info.input_schema.clone(),
            permission_level: level,
            client,
        }
    }
}

#[async_trait]
impl Tool for McpToolProxy {
    fn name(&self) -> &str {
        &self.full_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.input_schema.clone()
    }

    fn permission_level(&self) -> PermissionLevel {
        self.permission_level
    }

    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Mcp(self.client.server_name().to_owned())
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let raw = match self.client.call_tool(&self.remote_name, args).await {
            Ok(raw) => raw,
            // Disconnected sessions and transport errors become tool
            // errors, not loop failures.
            Err(e) => return Ok(ToolResult::err(e)),
        };
        match translate_call_result(&raw) {
            Ok(data) => Ok(ToolResult::ok(data)),
            Err(e) => Ok(ToolResult::err(e)),
        }
    }
}

// ─── McpManager ───────────────────────────────────────────────────────────────

pub struct McpManager {
    config: McpConfig,
    vault: Arc<dyn Vault>,
    clients: HashMap<String, Arc<McpClient>>,
    /// Tool lists discovered per connected server.
    discovered: std::sync::Mutex<HashMap<String, Vec<McpToolInfo>>>,
}

impl McpManager {
    pub fn new(config: McpConfig, vault: Arc<dyn Vault>) -> Self {
        let mut clients = HashMap::new();
        if config.enabled {
            for (name, server) in &config.servers {
                if !server.enabled {
                    continue;
                }
                clients.insert(
                    name.clone(),
                    Arc::new(McpClient::new(
                        name.clone(),
                        server.command.clone(),
                        server.args.clone(),
                        resolve_env(&server.env, vault.as_ref()),
                    )),
                );
            }
        }
        Self {
            config,
            vault,
            clients,
            discovered: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Connect every enabled server.  Failures log and leave the connection
    /// Disconnected; the result maps server name to success.
    pub async fn connect_all(&self) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for (name, client) in &self.clients {
            match client.connect().await {
                Ok(tools) => {
                    self.discovered
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(name.clone(), tools);
                    results.insert(name.clone(), true);
                }
                Err(e) => {
                    log::warn!("MCP connect failed for '{name}': {e}");
                    results.insert(name.clone(), false);
                }
            }
        }
        results
    }

    /// Build tool proxies for every Connected session.  Disconnected
    /// servers contribute nothing.
    pub fn discover_and_create_tools(&self) -> Vec<Arc<dyn Tool>> {
        let discovered = self.discovered.lock().unwrap_or_else(|e| e.into_inner());
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
        for (name, infos) in discovered.iter() {
            let Some(client) = self.clients.get(name) else {
                continue;
            };
            if !client.connected() {
                continue;
            }
            let level = self.server_permission_level(name);
            for info in infos {
                tools.push(Arc::new(McpToolProxy::new(name, info, level, client.clone())));
            }
        }
        tools
    }

    /// Per-server default permission level; invalid declarations fall back
    /// to MODERATE.
    fn server_permission_level(&self, name: &str) -> PermissionLevel {
        self.config
            .servers
            .get(name)
            .and_then(|s| PermissionLevel::parse(&s.permission_level))
            .unwrap_or(PermissionLevel::Moderate)
    }

    pub fn client(&self, name: &str) -> Option<&Arc<McpClient>> {
        self.clients.get(name)
    }

    /// Reconnect a single server (used after transient failures).
    pub async fn reconnect(&self, name: &str) -> bool {
        let Some(client) = self.clients.get(name) else {
            return false;
        };
        match client.connect().await {
            Ok(tools) => {
                self.discovered
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(name.to_owned(), tools);
                true
            }
            Err(_) => false,
        }
    }

    /// Federated names contributed by one server, for registry cleanup
    /// when its connection closes permanently.
    pub fn federated_tool_names(&self, server: &str) -> Vec<String> {
        self.discovered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(server)
            .map(|infos| {
                infos
                    .iter()
                    .map(|info| federated_tool_name(server, &info.name))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Close one server's connection and drop its tools from `registry`.
    pub async fn disconnect(&self, server: &str, registry: &crate::tools::ToolRegistry) {
        for name in self.federated_tool_names(server) {
            registry.unregister(&name);
        }
        self.discovered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(server);
        if let Some(client) = self.clients.get(server) {
            client.close().await;
        }
    }

    pub async fn shutdown(&self) {
        for client in self.clients.values() {
            client.close().await;
        }
    }

    /// Server config accessor for diagnostics.
    pub fn server_config(&self, name: &str) -> Option<&McpServerConfig> {
        self.config.servers.get(name)
    }

    pub fn vault(&self) -> &Arc<dyn Vault> {
        &self.vault
    }
}

/// Resolve `vault:<name>` placeholders in an env map.  A missing vault
/// entry drops the variable silently.
fn resolve_env(env: &HashMap<String, String>, vault: &dyn Vault) -> HashMap<String, String> {
    env.iter()
        .filter_map(|(k, v)| {
            match resolve_value(v, vault) {
                Some(resolved) => Some((k.clone(), resolved)),
                None => {
                    log::debug!("dropping env var {k}: vault entry missing");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::MemoryVault;
    use serde_json::json;

    fn server(command: &str, level: &str) -> McpServerConfig {
        McpServerConfig {
            enabled: true,
            command: command.to_owned(),
            args: vec![],
            env: HashMap::new(),
            permission_level: level.to_owned(),
        }
    }

    fn manager_with(servers: Vec<(&str, McpServerConfig)>) -> McpManager {
        let config = McpConfig {
            enabled: true,
            servers: servers
                .into_iter()
                .map(|(n, s)| (n.to_owned(), s))
                .collect(),
        };
        McpManager::new(config, Arc::new(MemoryVault::new()))
    }

    #[test]
    fn server_name_sanitization() {
        assert_eq!(sanitize_server_name("GitHub"), "github");
        assert_eq!(sanitize_server_name("my-server.v2"), "my_server_v2");
        assert_eq!(sanitize_server_name("--edge--"), "edge");
    }

    #[test]
    fn federated_names_follow_convention() {
        assert_eq!(
            federated_tool_name("GitHub", "create_issue"),
            "mcp_github_create_issue"
        );
    }

    #[test]
    fn disabled_servers_get_no_client() {
        let mut disabled = server("mcp-x", "safe");
        disabled.enabled = false;
        let mgr = manager_with(vec![("x", disabled), ("y", server("mcp-y", "safe"))]);
        assert!(mgr.client("x").is_none());
        assert!(mgr.client("y").is_some());
    }

    #[test]
    fn mcp_disabled_globally_means_no_clients() {
        let config = McpConfig {
            enabled: false,
            servers: [("x".to_owned(), server("mcp-x", "safe"))].into(),
        };
        let mgr = McpManager::new(config, Arc::new(MemoryVault::new()));
        assert!(mgr.client("x").is_none());
    }

    #[test]
    fn permission_level_inherited_and_invalid_falls_back() {
        let mgr = manager_with(vec![
            ("strict", server("a", "critical")),
            ("typo", server("b", "yolo")),
        ]);
        assert_eq!(
            mgr.server_permission_level("strict"),
            PermissionLevel::Critical
        );
        assert_eq!(
            mgr.server_permission_level("typo"),
            PermissionLevel::Moderate
        );
    }

    #[test]
    fn env_resolution_drops_missing_vault_entries() {
        let vault = MemoryVault::new();
        vault.set("token", "s3cret");
        let env: HashMap<String, String> = [
            ("PLAIN".to_owned(), "value".to_owned()),
            ("TOKEN".to_owned(), "vault:token".to_owned()),
            ("GONE".to_owned(), "vault:missing".to_owned()),
        ]
        .into();
        let resolved = resolve_env(&env, &vault);
        assert_eq!(resolved.get("PLAIN").map(String::as_str), Some("value"));
        assert_eq!(resolved.get("TOKEN").map(String::as_str), Some("s3cret"));
        assert!(!resolved.contains_key("GONE"));
    }

    #[tokio::test]
    async fn discovery_returns_nothing_when_disconnected() {
        let mgr = manager_with(vec![("x", server("definitely-not-a-binary", "safe"))]);
        let results = mgr.connect_all().await;
        assert_eq!(results["x"], false);
        assert!(mgr.discover_and_create_tools().is_empty());
    }

    #[tokio::test]
    async fn disconnect_unregisters_federated_tools() {
        let mgr = manager_with(vec![("github", server("mcp-github", "moderate"))]);
        let info = McpToolInfo {
            name: "search".to_owned(),
            description: "search repos".to_owned(),
            input_schema: json!({"type": "object"}),
        };
        mgr.discovered
            .lock()
            .unwrap()
            .insert("github".to_owned(), vec![info.clone()]);

        let registry = crate::tools::ToolRegistry::new();
        let client = mgr.client("github").unwrap().clone();
        registry
            .register(Arc::new(McpToolProxy::new(
                "github",
                &info,
                PermissionLevel::Moderate,
                client,
            )))
            .unwrap();
        assert!(registry.get("mcp_github_search").is_some());

        mgr.disconnect("github", &registry).await;
        assert!(registry.get("mcp_github_search").is_none());
        assert!(mgr.federated_tool_names("github").is_empty());
    }

    #[tokio::test]
    async fn proxy_reports_disconnected_as_tool_error() {
        let client = Arc::new(McpClient::new("github", "mcp-github", vec![], HashMap::new()));
        let info = McpToolInfo {
            name: "search".to_owned(),
            description: "search repos".to_owned(),
            input_schema: json!({"type": "object"}),
        };
        let proxy = McpToolProxy::new("github", &info, PermissionLevel::Moderate, client);
        assert_eq!(proxy.name(), "mcp_github_search");
        assert_eq!(proxy.origin(), ToolOrigin::Mcp("github".to_owned()));

        let result = proxy.execute(json!({})).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not connected"));
    }
}
