//! Gateway — routes inbound messages into the agent loop and broadcasts
//! results back.
//!
//! One conversation (`"channel:user"`) maps to one [`Agent`] with its own
//! history; a turn runs to completion before the next for that conversation
//! (the agent's history lock provides the sequencing), while different
//! conversations progress in parallel.  Recovery commands are dispatched
//! out-of-band before the loop so they keep working when every provider is
//! down.

pub mod manager;
pub mod traits;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub use manager::ChannelManager;
pub use traits::{Channel, ChannelMessage};

use crate::agent::{Agent, AgentResponse};
use crate::ai::router::LlmRouter;
use crate::config::AppConfig;
use crate::recovery::RecoveryHandler;
use crate::security::authority::{resolve_authority, AuthorityLevel};
use crate::tools::{ApprovalCallback, ToolExecutor};

pub struct Gateway {
    config: Arc<RwLock<AppConfig>>,
    router: Arc<LlmRouter>,
    executor: Arc<ToolExecutor>,
    recovery: Arc<RecoveryHandler>,
    channels: Arc<ChannelManager>,
    /// Conversation key `"channel:user"` → its agent loop.
    agents: tokio::sync::Mutex<HashMap<String, Arc<Agent>>>,
    approval: RwLock<Option<ApprovalCallback>>,
}

impl Gateway {
    pub fn new(
        config: Arc<RwLock<AppConfig>>,
        router: Arc<LlmRouter>,
        executor: Arc<ToolExecutor>,
        recovery: Arc<RecoveryHandler>,
    ) -> Self {
        Self {
            config,
            router,
            executor,
            recovery,
            channels: Arc::new(ChannelManager::new()),
            agents: tokio::sync::Mutex::new(HashMap::new()),
            approval: RwLock::new(None),
        }
    }

    pub fn channels(&self) -> &Arc<ChannelManager> {
        &self.channels
    }

    pub fn recovery(&self) -> &Arc<RecoveryHandler> {
        &self.recovery
    }

    /// Approval callback handed to every conversation's agent.
    pub fn set_approval_callback(&self, callback: ApprovalCallback) {
        *self.approval.write().unwrap_or_else(|e| e.into_inner()) = Some(callback.clone());
    }

    /// Route one inbound message and return the reply text.
    pub async fn dispatch(&self, channel: &str, user_id: &str, text: &str) -> String {
        let authority = {
            let cfg = self.config.read().unwrap_or_else(|e| e.into_inner());
            resolve_authority(channel, user_id, &cfg.authority)
        };
        // Logged text goes through the credential/PII sanitizer.
        log::debug!(
            "inbound {channel}:{user_id} ({authority:?}): {}",
            crate::security::sanitize(text)
        );

        // Out-of-band recovery commands first; OWNER only, and they work
        // with zero LLM involvement.
        if authority == AuthorityLevel::Owner && text.trim_start().starts_with('/') {
            if let Some(reply) = self.recovery.handle(text, user_id).await {
                return reply;
            }
        }

        let agent = self.agent_for(channel, user_id).await;
        let response: AgentResponse = agent.run(text, authority).await;
        response.content
    }

    async fn agent_for(&self, channel: &str, user_id: &str) -> Arc<Agent> {
        let key = format!("{channel}:{user_id}");
        let mut agents = self.agents.lock().await;
        if let Some(agent) = agents.get(&key) {
            return agent.clone();
        }
        let agent = Agent::new(
            self.config.clone(),
            self.router.clone(),
            self.executor.clone(),
        );
        if let Some(cb) = self
            .approval
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            agent.set_approval_callback(cb);
        }
        let agent = Arc::new(agent);
        agents.insert(key, agent.clone());
        agent
    }

    pub async fn conversation_count(&self) -> usize {
        self.agents.lock().await.len()
    }

    pub async fn clear_conversation(&self, channel: &str, user_id: &str) {
        let key = format!("{channel}:{user_id}");
        if let Some(agent) = self.agents.lock().await.get(&key) {
            agent.clear_conversation().await;
        }
    }

    /// One health-monitor tick: re-probe providers and auto-enter recovery
    /// when everything is down.  Returns the notification to broadcast, if
    /// any.
    pub async fn health_tick(&self) -> Option<String> {
        self.router.health_check().await;
        self.recovery.check_auto_recovery()
    }

    /// Pump inbound messages from every registered channel through the
    /// dispatcher, sending replies back on the originating channel.  Runs
    /// until all channel listeners close.
    pub async fn serve(self: Arc<Self>, health_interval: Duration) {
        let (mut rx, _handles) = self.channels.start_all(64).await;

        let monitor = {
            let gateway = Arc::clone(&self);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(health_interval).await;
                    if let Some(notice) = gateway.health_tick().await {
                        // Best-effort broadcast to every channel.
                        for name in gateway.channels.channel_names().await {
                            let _ = gateway.channels.send(&name, &notice, None).await;
                        }
                    }
                }
            })
        };

        while let Some(message) = rx.recv().await {
            let gateway = Arc::clone(&self);
            tokio::spawn(async move {
                let reply = gateway
                    .dispatch(&message.channel, &message.user_id, &message.content)
                    .await;
                if let Err(e) = gateway
                    .channels
                    .send(&message.channel, &reply, Some(&message.user_id))
                    .await
                {
                    log::warn!("reply send failed on '{}': {e}", message.channel);
                }
            });
        }
        monitor.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::ai::cost::CostTracker;
    use crate::ai::provider::LlmProvider;
    use crate::ai::types::{CompletionRequest, CompletionResponse, ToolCall};
    use crate::config::{AuthorityTierConfig, ProviderConfig};
    use crate::tools::traits::{PermissionLevel, Tool, ToolResult};
    use crate::tools::ToolRegistry;

    struct EchoProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> crate::ai::provider::Result<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let last_user = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == crate::ai::types::MessageRole::User)
                .and_then(|m| m.content.clone())
                .unwrap_or_default();
            Ok(CompletionResponse {
                content: Some(format!("echo: {last_user}")),
                model: request.model,
                provider: "mock".to_owned(),
                input_tokens: 1,
                output_tokens: 1,
                cost: 0.0,
                tool_calls: None,
            })
        }
        async fn health_check(&self) -> bool {
            false
        }
        fn provider_name(&self) -> &str {
            "mock"
        }
    }

    struct ShellToolStub;

    #[async_trait]
    impl Tool for ShellToolStub {
        fn name(&self) -> &str {
            "shell_execute"
        }
        fn description(&self) -> &str {
            "runs a command"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn permission_level(&self) -> PermissionLevel {
            PermissionLevel::Destructive
        }
        async fn execute(&self, _args: Value) -> Result<ToolResult, String> {
            Ok(ToolResult::ok(json!({"stdout": "ok"})))
        }
    }

    struct ToolThenTextProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for ToolThenTextProvider {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> crate::ai::provider::Result<CompletionResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let (content, tool_calls) = if n % 2 == 0 {
                (
                    None,
                    Some(vec![ToolCall::new("c1", "shell_execute", "{}")]),
                )
            } else {
                (Some("done".to_owned()), None)
            };
            Ok(CompletionResponse {
                content,
                model: request.model,
                provider: "mock".to_owned(),
                input_tokens: 1,
                output_tokens: 1,
                cost: 0.0,
                tool_calls,
            })
        }
        async fn health_check(&self) -> bool {
            false
        }
        fn provider_name(&self) -> &str {
            "mock"
        }
    }

    fn gateway_with(provider: Arc<dyn LlmProvider>, owners: Vec<&str>) -> Arc<Gateway> {
        let mut cfg = AppConfig::default();
        cfg.agent.permission_mode = crate::config::PermissionMode::FullAuto;
        cfg.llm.providers.insert(
            "mock".to_owned(),
            ProviderConfig {
                enabled: true,
                default_model: "mock-model".to_owned(),
                ..Default::default()
            },
        );
        cfg.llm.provider_priority = vec!["mock".to_owned()];
        cfg.authority.owner = AuthorityTierConfig {
            user_ids: owners.into_iter().map(str::to_owned).collect(),
        };
        let config = Arc::new(RwLock::new(cfg));

        let mut providers: StdHashMap<String, Arc<dyn LlmProvider>> = StdHashMap::new();
        providers.insert("mock".to_owned(), provider);
        let router = Arc::new(LlmRouter::new(
            config.clone(),
            providers,
            Arc::new(CostTracker::new()),
        ));
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(ShellToolStub)).unwrap();
        let executor = Arc::new(ToolExecutor::new(registry, config.clone()));
        let recovery = Arc::new(RecoveryHandler::new(config.clone(), router.clone()));
        Arc::new(Gateway::new(config, router, executor, recovery))
    }

    #[tokio::test]
    async fn dispatch_routes_through_agent() {
        let gateway = gateway_with(
            Arc::new(EchoProvider {
                calls: AtomicUsize::new(0),
            }),
            vec![],
        );
        let reply = gateway.dispatch("cli", "local", "hello").await;
        assert_eq!(reply, "echo: hello");
    }

    #[tokio::test]
    async fn conversations_are_isolated_per_channel_user() {
        let gateway = gateway_with(
            Arc::new(EchoProvider {
                calls: AtomicUsize::new(0),
            }),
            vec![],
        );
        gateway.dispatch("telegram", "111", "first").await;
        gateway.dispatch("telegram", "222", "second").await;
        assert_eq!(gateway.conversation_count().await, 2);
    }

    #[tokio::test]
    async fn recovery_command_bypasses_llm_for_owner() {
        let provider = Arc::new(EchoProvider {
            calls: AtomicUsize::new(0),
        });
        let gateway = gateway_with(provider.clone(), vec![]);
        let reply = gateway.dispatch("cli", "local", "/health").await;
        assert!(reply.contains("Provider Health"));
        assert_eq!(
            provider.calls.load(Ordering::SeqCst),
            0,
            "recovery commands must not touch the LLM"
        );
    }

    #[tokio::test]
    async fn recovery_command_from_public_goes_to_the_loop() {
        // telegram:999 is not in the owner list → PUBLIC; "/health" is just
        // text to the model.
        let provider = Arc::new(EchoProvider {
            calls: AtomicUsize::new(0),
        });
        let gateway = gateway_with(provider.clone(), vec!["telegram:1"]);
        let reply = gateway.dispatch("telegram", "999", "/health").await;
        assert_eq!(reply, "echo: /health");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn trusted_tier_filters_tools_at_dispatch() {
        // End-to-end: a TRUSTED user, and the model hallucinates
        // shell_execute, executor returns the authority error as a tool
        // reply, loop continues to the text turn.
        let gateway = gateway_with(
            Arc::new(ToolThenTextProvider {
                calls: AtomicUsize::new(0),
            }),
            vec!["telegram:1"],
        );
        {
            let config = gateway.config.clone();
            config.write().unwrap().authority.trusted = AuthorityTierConfig {
                user_ids: vec!["telegram:222".to_owned()],
            };
        }
        let reply = gateway.dispatch("telegram", "222", "run a command").await;
        assert_eq!(reply, "done");
    }

    #[tokio::test]
    async fn health_tick_enters_recovery_when_all_probes_fail() {
        // Every provider probe fails, so the monitor
        // auto-enters recovery and produces the help text.
        let gateway = gateway_with(
            Arc::new(EchoProvider {
                calls: AtomicUsize::new(0),
            }),
            vec![],
        );
        let notice = gateway.health_tick().await.unwrap();
        assert!(notice.contains("recovery mode"));
        assert!(gateway.recovery().recovery_mode());
    }

    #[tokio::test]
    async fn clear_conversation_only_clears_that_session() {
        let gateway = gateway_with(
            Arc::new(EchoProvider {
                calls: AtomicUsize::new(0),
            }),
            vec![],
        );
        gateway.dispatch("cli", "local", "hello").await;
        gateway.clear_conversation("cli", "local").await;
        let agents = gateway.agents.lock().await;
        let agent = agents.get("cli:local").unwrap();
        assert_eq!(agent.history_len().await, 0);
    }
}
