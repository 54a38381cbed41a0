//! Recovery mode — out-of-band agent control with no LLM involvement.
//!
//! When every provider fails, the agent goes quiet but the gateway stays
//! alive.  Recovery commands are plain command dispatch in the gateway, so
//! the operator can inspect health, re-point providers, and fix the config
//! while the model layer is down.
//!
//! ```text
//! /health              provider health report
//! /health recheck      re-run probes (all down → auto-enter recovery)
//! /health full         extended diagnostics
//! /config get <key>    read a config value (dot notation)
//! /config set <k> <v>  update config in memory (safe keys only)
//! /config reload       re-read config.yaml from disk
//! /provider enable|disable <name>
//! /provider priority <a,b,c | a b c>
//! /restart             re-run provider probes and reset health state
//! /recovery on|off|log
//! ```

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use serde_json::Value;

use crate::ai::router::LlmRouter;
use crate::config::{load_config, AppConfig};
use crate::database::Store;

/// Config keys that may be modified remotely.  Everything else is refused.
const SAFE_CONFIG_KEYS: &[&str] = &[
    "llm.providers.*",
    "llm.provider_priority",
    "llm.routing.*",
    "llm.budget.*",
    "browser.enabled",
    "gateway.session_timeout_hours",
];

/// Keys that can NEVER be changed remotely.
const BLOCKED_CONFIG_PREFIXES: &[&str] = &[
    "permission",
    "shell.blacklist",
    "telegram.allowed_users",
    "discord.allowed_guilds",
    "slack.allowed_channels",
];

/// Ring size of the recovery action log.
const LOG_CAPACITY: usize = 100;

fn is_safe_key(key: &str) -> bool {
    if BLOCKED_CONFIG_PREFIXES.iter().any(|b| key.starts_with(b)) {
        return false;
    }
    SAFE_CONFIG_KEYS.iter().any(|pattern| {
        match pattern.strip_suffix(".*") {
            Some(prefix) => key.starts_with(prefix),
            None => key == *pattern,
        }
    })
}

#[derive(Debug, Clone)]
struct LogEntry {
    ts: chrono::DateTime<chrono::Utc>,
    command: String,
    detail: String,
}

#[derive(Default)]
struct RecoveryState {
    active: bool,
    entered_at: Option<Instant>,
    log: VecDeque<LogEntry>,
}

pub struct RecoveryHandler {
    config: Arc<RwLock<AppConfig>>,
    router: Arc<LlmRouter>,
    store: Option<Arc<Store>>,
    config_path: Option<PathBuf>,
    state: Mutex<RecoveryState>,
}

impl RecoveryHandler {
    pub fn new(config: Arc<RwLock<AppConfig>>, router: Arc<LlmRouter>) -> Self {
        Self {
            config,
            router,
            store: None,
            config_path: None,
            state: Mutex::new(RecoveryState::default()),
        }
    }

    pub fn with_store(mut self, store: Arc<Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    pub fn recovery_mode(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).active
    }

    /// Enter recovery mode; idempotent.
    pub fn enter_recovery(&self, reason: &str) -> String {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.active {
            return "Already in recovery mode.".to_owned();
        }
        state.active = true;
        state.entered_at = Some(Instant::now());
        push_log(&mut state, "recovery on", reason);
        log::warn!("entered recovery mode: {reason}");
        "Recovery mode ACTIVE. Use /health to check providers.".to_owned()
    }

    /// Exit recovery mode, reporting how long it was active.
    pub fn exit_recovery(&self) -> String {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.active {
            return "Not in recovery mode.".to_owned();
        }
        state.active = false;
        let duration = state
            .entered_at
            .take()
            .map(|t| format!(" (was active for {:.1}m)", t.elapsed().as_secs_f64() / 60.0))
            .unwrap_or_default();
        push_log(&mut state, "recovery off", "");
        log::info!("exited recovery mode{duration}");
        format!("Recovery mode OFF.{duration}")
    }

    /// Auto-enter recovery when every enabled provider is unhealthy.
    /// Returns the user notification when entering, `None` otherwise.
    /// Called periodically by the gateway health monitor.
    pub fn check_auto_recovery(&self) -> Option<String> {
        if self.recovery_mode() {
            return None;
        }
        let (has_enabled, all_unhealthy) = {
            let cfg = self.config.read().unwrap_or_else(|e| e.into_inner());
            let mut has_enabled = false;
            let mut all_unhealthy = true;
            for name in &cfg.llm.provider_priority {
                if cfg.llm.providers.get(name).is_some_and(|p| p.enabled) {
                    has_enabled = true;
                    if self.router.is_healthy(name) {
                        all_unhealthy = false;
                        break;
                    }
                }
            }
            (has_enabled, all_unhealthy)
        };

        if has_enabled && all_unhealthy {
            self.enter_recovery("all providers unhealthy");
            return Some(
                "All LLM providers are down. Entering recovery mode.\n\
                 Use /health to check status. Use /provider or /config to fix."
                    .to_owned(),
            );
        }
        None
    }

    /// Parse and dispatch a recovery command.  Returns `None` when the text
    /// is not a recovery command.
    pub async fn handle(&self, command_text: &str, user_id: &str) -> Option<String> {
        let trimmed = command_text.trim();
        let mut parts = trimmed.split_whitespace();
        let cmd = parts.next()?.trim_start_matches('/').to_lowercase();
        let args: Vec<&str> = parts.collect();

        if !matches!(cmd.as_str(), "health" | "config" | "provider" | "restart" | "recovery") {
            return None;
        }

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            push_log(&mut state, trimmed, &format!("user={user_id}"));
        }

        let reply = match cmd.as_str() {
            "health" => self.handle_health(&args).await,
            "config" => self.handle_config(&args).await,
            "provider" => self.handle_provider(&args),
            "restart" => self.handle_restart().await,
            "recovery" => self.handle_recovery(&args),
            _ => unreachable!(),
        };
        Some(reply)
    }

    // ── /health ──────────────────────────────────────────────────────────────

    async fn handle_health(&self, args: &[&str]) -> String {
        match args.first().copied() {
            Some("recheck") => self.health_recheck().await,
            Some("full") => self.health_full().await,
            _ => self.health_report(),
        }
    }

    fn health_report(&self) -> String {
        let cfg = self.config.read().unwrap_or_else(|e| e.into_inner());
        let snapshot = self.router.health_snapshot();
        let mut lines: Vec<String> = Vec::new();

        for name in &cfg.llm.provider_priority {
            let Some(provider_cfg) = cfg.llm.providers.get(name) else {
                continue;
            };
            if !provider_cfg.enabled {
                lines.push(format!("  {name}: DISABLED"));
                continue;
            }
            match snapshot.get(name) {
                Some(h) if !h.healthy => {
                    let ago = h
                        .last_failed_at
                        .map(|t| format!(" (down {}s)", (chrono::Utc::now() - t).num_seconds()))
                        .unwrap_or_default();
                    lines.push(format!("  {name}: UNHEALTHY{ago}"));
                }
                _ => lines.push(format!("  {name}: healthy")),
            }
        }

        let tracker = self.router.cost_tracker();
        lines.push(String::new());
        lines.push(format!(
            "Budget: ${:.2} / ${:.2} daily",
            tracker.daily_total(),
            cfg.llm.budget.daily_limit_usd
        ));
        lines.push(format!(
            "Recovery mode: {}",
            if self.recovery_mode() { "ACTIVE" } else { "off" }
        ));

        let priority = if cfg.llm.provider_priority.is_empty() {
            "(none)".to_owned()
        } else {
            cfg.llm.provider_priority.join(" -> ")
        };
        format!("Provider Health\n\n{}\n\nPriority: {priority}", lines.join("\n"))
    }

    async fn health_recheck(&self) -> String {
        let results = self.router.health_check().await;

        let mut lines: Vec<String> = results
            .iter()
            .map(|(name, healthy)| {
                format!("  {name}: {}", if *healthy { "healthy" } else { "UNHEALTHY" })
            })
            .collect();
        lines.sort();

        let all_down = results.is_empty() || results.values().all(|healthy| !healthy);
        if all_down && !self.recovery_mode() {
            self.enter_recovery("all providers unhealthy after recheck");
            lines.push("\nAll providers down - auto-entered recovery mode.".to_owned());
        }

        format!("Health Recheck\n\n{}", lines.join("\n"))
    }

    async fn health_full(&self) -> String {
        let mut lines = vec![self.health_report(), String::new()];

        let browser_enabled = {
            let cfg = self.config.read().unwrap_or_else(|e| e.into_inner());
            cfg.browser.enabled
        };
        lines.push(format!(
            "Browser bridge: {}",
            if browser_enabled { "enabled" } else { "disabled" }
        ));
        lines.push("Scheduler: disabled".to_owned());

        match &self.store {
            Some(store) => match store.ping() {
                Ok(()) => lines.push("Database: ok".to_owned()),
                Err(e) => lines.push(format!("Database: ERROR ({e})")),
            },
            None => lines.push("Database: not initialized".to_owned()),
        }

        lines.join("\n")
    }

    // ── /config ──────────────────────────────────────────────────────────────

    async fn handle_config(&self, args: &[&str]) -> String {
        match args.first().copied() {
            Some("get") if args.len() >= 2 => self.config_get(args[1]),
            Some("set") if args.len() >= 3 => self.config_set(args[1], &args[2..].join(" ")),
            Some("reload") => self.config_reload(),
            _ => "Usage:\n  /config get <key>        - Read config value\n  \
                  /config set <key> <val>  - Update in memory\n  \
                  /config reload           - Re-read config.yaml"
                .to_owned(),
        }
    }

    fn config_get(&self, key: &str) -> String {
        let cfg = self.config.read().unwrap_or_else(|e| e.into_inner());
        let tree = match serde_json::to_value(&*cfg) {
            Ok(v) => v,
            Err(e) => return format!("Error: {e}"),
        };
        match lookup(&tree, key) {
            Some(value) => format!(
                "{key} = {}",
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            ),
            None => format!("Key not found: {key}"),
        }
    }

    fn config_set(&self, key: &str, value_str: &str) -> String {
        if !is_safe_key(key) {
            return format!("Blocked: '{key}' cannot be changed remotely (security-critical).");
        }

        // JSON first, plain string as the fallback.
        let value: Value = serde_json::from_str(value_str)
            .unwrap_or_else(|_| Value::String(value_str.to_owned()));

        let mut cfg = self.config.write().unwrap_or_else(|e| e.into_inner());
        let mut tree = match serde_json::to_value(&*cfg) {
            Ok(v) => v,
            Err(e) => return format!("Error: {e}"),
        };
        if let Err(e) = assign(&mut tree, key, value.clone()) {
            return format!("Failed to set {key}: {e}");
        }
        match serde_json::from_value::<AppConfig>(tree) {
            Ok(updated) => {
                *cfg = updated;
                format!("Updated: {key} = {value}\n(in-memory only, lost on restart)")
            }
            Err(e) => format!("Failed to set {key}: {e}"),
        }
    }

    fn config_reload(&self) -> String {
        let Some(path) = &self.config_path else {
            return "Config path not set - cannot reload.".to_owned();
        };
        if !path.exists() {
            return format!("Config file not found: {}", path.display());
        }
        match load_config(path) {
            Ok(fresh) => {
                // Only LLM and browser sections apply; security-critical
                // fields keep their running values.
                let mut cfg = self.config.write().unwrap_or_else(|e| e.into_inner());
                cfg.llm = fresh.llm;
                cfg.browser = fresh.browser;
                "Config reloaded from disk (LLM, browser sections updated).".to_owned()
            }
            Err(e) => format!("Reload failed: {e}"),
        }
    }

    // ── /provider ────────────────────────────────────────────────────────────

    fn handle_provider(&self, args: &[&str]) -> String {
        match args.first().copied() {
            Some("enable") if args.len() >= 2 => self.provider_toggle(args[1], true),
            Some("disable") if args.len() >= 2 => self.provider_toggle(args[1], false),
            Some("priority") if args.len() >= 2 => self.provider_priority(&args[1..]),
            _ => "Usage:\n  /provider enable <name>       - Enable a provider\n  \
                  /provider disable <name>      - Disable a provider\n  \
                  /provider priority <a,b,c>    - Reorder fallback chain"
                .to_owned(),
        }
    }

    fn provider_toggle(&self, name: &str, enabled: bool) -> String {
        let mut cfg = self.config.write().unwrap_or_else(|e| e.into_inner());
        let Some(provider) = cfg.llm.providers.get_mut(name) else {
            let mut available: Vec<&str> = cfg.llm.providers.keys().map(String::as_str).collect();
            available.sort_unstable();
            return format!("Unknown provider: {name}. Available: {}", available.join(", "));
        };
        provider.enabled = enabled;
        if enabled {
            // Give the router a fresh start on it.
            self.router.reset_provider(name);
        }
        format!(
            "Provider '{name}' {}.",
            if enabled { "enabled" } else { "disabled" }
        )
    }

    fn provider_priority(&self, args: &[&str]) -> String {
        // Accept "a,b,c" or "a b c".
        let new_order: Vec<String> = if args.len() == 1 && args[0].contains(',') {
            args[0].split(',').map(|s| s.trim().to_owned()).collect()
        } else {
            args.iter().map(|s| (*s).to_owned()).collect()
        };

        let mut cfg = self.config.write().unwrap_or_else(|e| e.into_inner());
        for name in &new_order {
            if !cfg.llm.providers.contains_key(name) {
                return format!("Unknown provider: {name}");
            }
        }
        cfg.llm.provider_priority = new_order.clone();
        format!("Provider priority updated: {}", new_order.join(" -> "))
    }

    // ── /restart ─────────────────────────────────────────────────────────────

    async fn handle_restart(&self) -> String {
        let results = self.router.health_check().await;
        let any_up = results.values().any(|healthy| *healthy);
        if any_up && self.recovery_mode() {
            self.exit_recovery();
        }
        if any_up {
            "Agent re-initialized; at least one provider is reachable.".to_owned()
        } else {
            "Restart ran, but no provider is reachable yet.".to_owned()
        }
    }

    // ── /recovery ────────────────────────────────────────────────────────────

    fn handle_recovery(&self, args: &[&str]) -> String {
        match args.first().copied() {
            Some("on") => self.enter_recovery("manual"),
            Some("off") => self.exit_recovery(),
            Some("log") => self.show_log(),
            _ => format!(
                "Recovery mode: {}\n\nUsage:\n  /recovery on   - Enter recovery mode\n  \
                 /recovery off  - Exit recovery mode\n  /recovery log  - Show recent actions",
                if self.recovery_mode() { "ACTIVE" } else { "off" }
            ),
        }
    }

    fn show_log(&self) -> String {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.log.is_empty() {
            return "No recovery actions logged.".to_owned();
        }
        let lines: Vec<String> = state
            .log
            .iter()
            .rev()
            .take(20)
            .map(|e| format!("  {} | {} | {}", e.ts.to_rfc3339(), e.command, e.detail))
            .collect();
        format!("Recovery Log (last 20)\n\n{}", lines.join("\n"))
    }
}

fn push_log(state: &mut RecoveryState, command: &str, detail: &str) {
    state.log.push_back(LogEntry {
        ts: chrono::Utc::now(),
        command: command.to_owned(),
        detail: detail.to_owned(),
    });
    while state.log.len() > LOG_CAPACITY {
        state.log.pop_front();
    }
}

/// Navigate a JSON tree by dot-notation key.
fn lookup<'a>(tree: &'a Value, key: &str) -> Option<&'a Value> {
    let mut current = tree;
    for part in key.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Assign into a JSON tree by dot-notation key; intermediate objects must
/// exist (map keys may be created at the leaf's parent).
fn assign(tree: &mut Value, key: &str, value: Value) -> Result<(), String> {
    let parts: Vec<&str> = key.split('.').collect();
    let mut current = tree;
    for part in &parts[..parts.len().saturating_sub(1)] {
        current = current
            .get_mut(*part)
            .ok_or_else(|| format!("key not found: {part}"))?;
    }
    let last = parts.last().ok_or("empty key")?;
    match current {
        Value::Object(map) => {
            map.insert((*last).to_owned(), value);
            Ok(())
        }
        _ => Err(format!("'{last}' parent is not an object")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    use crate::ai::cost::CostTracker;
    use crate::ai::provider::LlmProvider;
    use crate::ai::types::{CompletionRequest, CompletionResponse};
    use crate::config::ProviderConfig;

    struct ProbeStub {
        name: String,
        healthy: bool,
    }

    #[async_trait]
    impl LlmProvider for ProbeStub {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> crate::ai::provider::Result<CompletionResponse> {
            Err("503".to_owned())
        }
        async fn health_check(&self) -> bool {
            self.healthy
        }
        fn provider_name(&self) -> &str {
            &self.name
        }
    }

    fn handler_with(providers: Vec<(&str, bool)>) -> RecoveryHandler {
        let mut cfg = AppConfig::default();
        let mut impls: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        for (name, healthy) in &providers {
            cfg.llm.providers.insert(
                (*name).to_owned(),
                ProviderConfig {
                    enabled: true,
                    default_model: format!("{name}-model"),
                    ..Default::default()
                },
            );
            cfg.llm.provider_priority.push((*name).to_owned());
            impls.insert(
                (*name).to_owned(),
                Arc::new(ProbeStub {
                    name: (*name).to_owned(),
                    healthy: *healthy,
                }),
            );
        }
        let config = Arc::new(RwLock::new(cfg));
        let router = Arc::new(LlmRouter::new(
            config.clone(),
            impls,
            Arc::new(CostTracker::new()),
        ));
        RecoveryHandler::new(config, router)
    }

    // ── Safe-key policy ───────────────────────────────────────────────────────

    #[test]
    fn safe_keys_accepted() {
        assert!(is_safe_key("llm.provider_priority"));
        assert!(is_safe_key("llm.providers.glm.enabled"));
        assert!(is_safe_key("llm.budget.daily_limit_usd"));
        assert!(is_safe_key("browser.enabled"));
        assert!(is_safe_key("gateway.session_timeout_hours"));
    }

    #[test]
    fn blocked_keys_rejected() {
        assert!(!is_safe_key("permission_mode"));
        assert!(!is_safe_key("shell.blacklist_patterns"));
        assert!(!is_safe_key("telegram.allowed_users"));
        assert!(!is_safe_key("storage.data_dir"));
        assert!(!is_safe_key("agent.max_steps"));
    }

    // ── State machine ─────────────────────────────────────────────────────────

    #[test]
    fn enter_exit_round_trip() {
        let handler = handler_with(vec![("glm", true)]);
        assert!(!handler.recovery_mode());
        let msg = handler.enter_recovery("manual");
        assert!(msg.contains("ACTIVE"));
        assert!(handler.recovery_mode());
        assert_eq!(handler.enter_recovery("again"), "Already in recovery mode.");
        let msg = handler.exit_recovery();
        assert!(msg.contains("OFF"));
        assert!(!handler.recovery_mode());
    }

    #[tokio::test]
    async fn non_recovery_text_returns_none() {
        let handler = handler_with(vec![("glm", true)]);
        assert!(handler.handle("hello there", "u1").await.is_none());
        assert!(handler.handle("", "u1").await.is_none());
    }

    // ── /config ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn config_get_reads_dot_keys() {
        let handler = handler_with(vec![("glm", true)]);
        let reply = handler
            .handle("/config get llm.budget.daily_limit_usd", "u1")
            .await
            .unwrap();
        assert!(reply.contains("10.0") || reply.contains("10"));
    }

    #[tokio::test]
    async fn config_set_safe_key_applies_in_memory() {
        let handler = handler_with(vec![("glm", true)]);
        let reply = handler
            .handle("/config set llm.budget.daily_limit_usd 25.5", "u1")
            .await
            .unwrap();
        assert!(reply.contains("Updated"));
        let cfg = handler.config.read().unwrap();
        assert_eq!(cfg.llm.budget.daily_limit_usd, 25.5);
    }

    #[tokio::test]
    async fn config_set_blocked_key_rejects_without_mutation() {
        let handler = handler_with(vec![("glm", true)]);
        let before = handler.config.read().unwrap().shell.blacklist_patterns.clone();
        let reply = handler
            .handle("/config set shell.blacklist_patterns []", "u1")
            .await
            .unwrap();
        assert!(reply.contains("Blocked"));
        assert_eq!(
            handler.config.read().unwrap().shell.blacklist_patterns,
            before
        );
    }

    #[tokio::test]
    async fn config_set_parses_json_values() {
        let handler = handler_with(vec![("glm", true)]);
        handler
            .handle("/config set llm.provider_priority [\"glm\"]", "u1")
            .await
            .unwrap();
        assert_eq!(
            handler.config.read().unwrap().llm.provider_priority,
            vec!["glm"]
        );
    }

    #[tokio::test]
    async fn config_reload_applies_only_llm_and_browser() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "llm:\n  budget:\n    daily_limit_usd: 42.0\nagent:\n  max_steps: 99\nbrowser:\n  enabled: true\n",
        )
        .unwrap();

        let handler = handler_with(vec![("glm", true)]);
        let handler = RecoveryHandler {
            config_path: Some(path),
            ..handler
        };
        let reply = handler.handle("/config reload", "u1").await.unwrap();
        assert!(reply.contains("reloaded"));

        let cfg = handler.config.read().unwrap();
        assert_eq!(cfg.llm.budget.daily_limit_usd, 42.0);
        assert!(cfg.browser.enabled);
        // Security-adjacent sections keep their running values.
        assert_eq!(cfg.agent.max_steps, 20);
    }

    // ── /provider ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn provider_disable_then_priority_reorder() {
        // The operator re-points providers while the model layer is down.
        let handler = handler_with(vec![("openrouter", false), ("ollama", true), ("glm", true)]);
        let reply = handler
            .handle("/provider disable openrouter", "u1")
            .await
            .unwrap();
        assert!(reply.contains("disabled"));
        assert!(!handler.config.read().unwrap().llm.providers["openrouter"].enabled);

        let reply = handler
            .handle("/provider priority ollama,glm", "u1")
            .await
            .unwrap();
        assert!(reply.contains("ollama -> glm"));
        assert_eq!(
            handler.config.read().unwrap().llm.provider_priority,
            vec!["ollama", "glm"]
        );
    }

    #[tokio::test]
    async fn provider_priority_space_separated() {
        let handler = handler_with(vec![("a", true), ("b", true)]);
        handler.handle("/provider priority b a", "u1").await.unwrap();
        assert_eq!(
            handler.config.read().unwrap().llm.provider_priority,
            vec!["b", "a"]
        );
    }

    #[tokio::test]
    async fn provider_unknown_name_rejected() {
        let handler = handler_with(vec![("glm", true)]);
        let reply = handler.handle("/provider enable nope", "u1").await.unwrap();
        assert!(reply.contains("Unknown provider"));
        let reply = handler
            .handle("/provider priority glm,ghost", "u1")
            .await
            .unwrap();
        assert!(reply.contains("Unknown provider: ghost"));
    }

    // ── /health ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn health_report_lists_priority_and_budget() {
        let handler = handler_with(vec![("glm", true), ("ollama", true)]);
        let reply = handler.handle("/health", "u1").await.unwrap();
        assert!(reply.contains("Provider Health"));
        assert!(reply.contains("Budget:"));
        assert!(reply.contains("glm -> ollama"));
    }

    #[tokio::test]
    async fn recheck_with_all_down_auto_enters_recovery() {
        let handler = handler_with(vec![("glm", false), ("ollama", false)]);
        let reply = handler.handle("/health recheck", "u1").await.unwrap();
        assert!(reply.contains("auto-entered recovery mode"));
        assert!(handler.recovery_mode());
    }

    #[tokio::test]
    async fn recheck_with_one_up_stays_normal() {
        let handler = handler_with(vec![("glm", false), ("ollama", true)]);
        handler.handle("/health recheck", "u1").await.unwrap();
        assert!(!handler.recovery_mode());
    }

    // ── Auto recovery detection ───────────────────────────────────────────────

    #[tokio::test]
    async fn check_auto_recovery_fires_when_all_down() {
        let handler = handler_with(vec![("glm", false), ("ollama", false)]);
        // Probe first so the health map reflects the outage.
        handler.router.health_check().await;
        let notice = handler.check_auto_recovery().unwrap();
        assert!(notice.contains("recovery mode"));
        assert!(handler.recovery_mode());
        // Second check is a no-op while active.
        assert!(handler.check_auto_recovery().is_none());
    }

    #[tokio::test]
    async fn check_auto_recovery_quiet_when_healthy() {
        let handler = handler_with(vec![("glm", true)]);
        handler.router.health_check().await;
        assert!(handler.check_auto_recovery().is_none());
    }

    // ── /recovery log ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn log_records_commands_and_caps_at_100() {
        let handler = handler_with(vec![("glm", true)]);
        for _ in 0..120 {
            handler.handle("/health", "u1").await.unwrap();
        }
        let state = handler.state.lock().unwrap();
        assert_eq!(state.log.len(), LOG_CAPACITY);
        drop(state);

        let reply = handler.handle("/recovery log", "u1").await.unwrap();
        assert!(reply.contains("Recovery Log"));
    }

    // ── /restart ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn restart_exits_recovery_when_a_provider_is_back() {
        let handler = handler_with(vec![("glm", true)]);
        handler.enter_recovery("test");
        let reply = handler.handle("/restart", "u1").await.unwrap();
        assert!(reply.contains("re-initialized"));
        assert!(!handler.recovery_mode());
    }
}
