//! `LlmRouter` — selects a provider and model for each completion, enforces
//! the spending budget, tracks provider health, and fails over.
//!
//! # Selection order
//! 1. Explicit `model_override` — provider inferred from the model name.
//! 2. `llm.routing[task_type]` — preferred provider, then its configured
//!    fallback, when enabled and healthy.
//! 3. The global `llm.provider_priority` walk — first enabled + healthy
//!    provider with a usable default model for the task type.
//! 4. [`RouterError::NoProviderAvailable`].
//!
//! The budget gate runs before any selection; a turn that is already over
//! budget never reaches a provider.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use thiserror::Error;

use crate::ai::cost::CostTracker;
use crate::ai::provider::LlmProvider;
use crate::ai::types::{CompletionRequest, CompletionResponse, Message, ToolSchema};
use crate::config::AppConfig;
use crate::runtime::Deadline;

/// Probe timeout for `health_check`.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("budget exceeded (daily ${daily:.2}, task ${task:.2})")]
    BudgetExceeded { daily: f64, task: f64 },

    #[error("no LLM provider available")]
    NoProviderAvailable,

    #[error("provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("completion cancelled by deadline")]
    Cancelled,
}

// ─── Health ───────────────────────────────────────────────────────────────────

/// Per-provider health record.  `healthy` starts true; a completion failure
/// flips it only for local providers, while `last_failed_at` is stamped for
/// every failure so recovery-mode detection sees cloud outages too.
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub last_failed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            healthy: true,
            last_failed_at: None,
        }
    }
}

// ─── LlmRouter ────────────────────────────────────────────────────────────────

pub struct LlmRouter {
    config: Arc<RwLock<AppConfig>>,
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    health: Mutex<HashMap<String, ProviderHealth>>,
    cost: Arc<CostTracker>,
}

impl LlmRouter {
    pub fn new(
        config: Arc<RwLock<AppConfig>>,
        providers: HashMap<String, Arc<dyn LlmProvider>>,
        cost: Arc<CostTracker>,
    ) -> Self {
        Self {
            config,
            providers,
            health: Mutex::new(HashMap::new()),
            cost,
        }
    }

    pub fn cost_tracker(&self) -> &Arc<CostTracker> {
        &self.cost
    }

    /// Route a completion to the appropriate provider.
    #[tracing::instrument(name = "router.complete", skip_all, fields(task_type))]
    pub async fn complete(
        &self,
        messages: Vec<Message>,
        task_type: &str,
        model_override: Option<&str>,
        tools: Option<Vec<ToolSchema>>,
        temperature: f32,
        max_tokens: Option<u32>,
        deadline: Option<Deadline>,
    ) -> Result<CompletionResponse, RouterError> {
        // Budget gate before any selection.
        let (daily_limit, task_limit) = {
            let cfg = self.config.read().unwrap_or_else(|e| e.into_inner());
            (
                cfg.llm.budget.daily_limit_usd,
                cfg.llm.budget.per_task_limit_usd,
            )
        };
        if !self.cost.within_budget(daily_limit, task_limit) {
            return Err(RouterError::BudgetExceeded {
                daily: self.cost.daily_total(),
                task: self.cost.task_total(),
            });
        }

        let (provider_name, model) = self.select_provider_and_model(task_type, model_override)?;
        log::info!("routing to {provider_name}/{model} for task_type={task_type}");

        let provider = self
            .providers
            .get(&provider_name)
            .ok_or(RouterError::NoProviderAvailable)?
            .clone();

        let mut request = CompletionRequest::new(&model, messages).with_temperature(temperature);
        if let Some(m) = max_tokens {
            request = request.with_max_tokens(m);
        }
        if let Some(t) = tools {
            request = request.with_tools(t);
        }

        let result = match deadline {
            Some(d) => {
                if d.expired() {
                    return Err(RouterError::Cancelled);
                }
                match tokio::time::timeout(d.remaining(), provider.complete(request)).await {
                    // Cancellation appends nothing to the ledger.
                    Err(_) => return Err(RouterError::Cancelled),
                    Ok(inner) => inner,
                }
            }
            None => provider.complete(request).await,
        };

        match result {
            Ok(response) => {
                self.cost.record(
                    &provider_name,
                    &response.model,
                    response.input_tokens,
                    response.output_tokens,
                    response.cost,
                    task_type,
                );
                Ok(response)
            }
            Err(message) => {
                log::error!("provider {provider_name} failed: {message}");
                self.mark_failed(&provider_name, provider.local());
                Err(RouterError::Provider {
                    provider: provider_name,
                    message,
                })
            }
        }
    }

    // ── Selection ────────────────────────────────────────────────────────────

    fn select_provider_and_model(
        &self,
        task_type: &str,
        model_override: Option<&str>,
    ) -> Result<(String, String), RouterError> {
        // 1. Explicit override.
        if let Some(model) = model_override {
            return Ok((infer_provider(model).to_owned(), model.to_owned()));
        }

        let cfg = self.config.read().unwrap_or_else(|e| e.into_inner());

        // 2. Per-task-type routing.
        if let Some(routing) = cfg.llm.routing.get(task_type) {
            if let (Some(name), Some(model)) =
                (&routing.preferred_provider, &routing.preferred_model)
            {
                if self.eligible(&cfg, name) {
                    return Ok((name.clone(), model.clone()));
                }
                if let Some(fallback) = &routing.fallback_provider {
                    if self.eligible(&cfg, fallback) {
                        let model = routing
                            .fallback_model
                            .clone()
                            .unwrap_or_else(|| model.clone());
                        return Ok((fallback.clone(), model));
                    }
                }
            }
        }

        // 3. Global priority walk.
        for name in &cfg.llm.provider_priority {
            if !self.eligible(&cfg, name) {
                continue;
            }
            if let Some(model) = self.default_model_for(&cfg, name, task_type) {
                return Ok((name.clone(), model));
            }
        }

        Err(RouterError::NoProviderAvailable)
    }

    fn eligible(&self, cfg: &AppConfig, name: &str) -> bool {
        cfg.llm
            .providers
            .get(name)
            .is_some_and(|p| p.enabled && self.is_healthy(name))
    }

    fn default_model_for(&self, cfg: &AppConfig, name: &str, task_type: &str) -> Option<String> {
        let provider_cfg = cfg.llm.providers.get(name)?;
        let routing = cfg.llm.routing.get(task_type);
        if provider_cfg.local {
            // Local providers only run when a local fallback model is named.
            return routing.and_then(|r| r.local_fallback.clone());
        }
        if !provider_cfg.default_model.is_empty() {
            return Some(provider_cfg.default_model.clone());
        }
        routing.and_then(|r| r.preferred_model.clone())
    }

    // ── Health ───────────────────────────────────────────────────────────────

    pub fn is_healthy(&self, name: &str) -> bool {
        self.health
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map_or(true, |h| h.healthy)
    }

    fn mark_failed(&self, name: &str, local: bool) {
        let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        let entry = health.entry(name.to_owned()).or_default();
        entry.last_failed_at = Some(chrono::Utc::now());
        // Cloud providers remain eligible after transient failures.
        if local {
            entry.healthy = false;
        }
    }

    /// Reset a provider's health record (used by `/provider enable`).
    pub fn reset_provider(&self, name: &str) {
        self.health
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }

    /// Snapshot of all health records for reporting.
    pub fn health_snapshot(&self) -> HashMap<String, ProviderHealth> {
        self.health
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run provider-specific probes in parallel (≤5 s each) and reset the
    /// healthy flag from the result.  Returns `name → healthy`.
    pub async fn health_check(&self) -> HashMap<String, bool> {
        let enabled: Vec<(String, Arc<dyn LlmProvider>)> = {
            let cfg = self.config.read().unwrap_or_else(|e| e.into_inner());
            self.providers
                .iter()
                .filter(|(name, _)| {
                    cfg.llm
                        .providers
                        .get(name.as_str())
                        .is_some_and(|p| p.enabled)
                })
                .map(|(name, p)| (name.clone(), p.clone()))
                .collect()
        };

        let probes = enabled.into_iter().map(|(name, provider)| async move {
            let healthy = tokio::time::timeout(PROBE_TIMEOUT, provider.health_check())
                .await
                .unwrap_or(false);
            (name, healthy)
        });
        let results: HashMap<String, bool> = futures::future::join_all(probes)
            .await
            .into_iter()
            .collect();

        {
            let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
            for (name, healthy) in &results {
                let entry = health.entry(name.clone()).or_default();
                entry.healthy = *healthy;
                if *healthy {
                    entry.last_failed_at = None;
                } else if entry.last_failed_at.is_none() {
                    entry.last_failed_at = Some(chrono::Utc::now());
                }
            }
        }

        log::info!("provider health: {results:?}");
        results
    }
}

/// Infer a provider from a model name: slash-qualified models route to
/// OpenRouter (unless `ollama/`-prefixed), `glm-*` to GLM, everything else
/// to the local Ollama.
pub fn infer_provider(model: &str) -> &'static str {
    if model.contains('/') && !model.starts_with("ollama/") {
        return "openrouter";
    }
    if model.starts_with("glm-") {
        return "glm";
    }
    "ollama"
}
