//! The agent loop — plan, execute, observe.
//!
//! ```text
//! build request (system prompt + history + tool schemas)
//!       │
//!       ▼
//! router.complete() ──► text? ──► append assistant turn, persist, return
//!       │
//!       ▼ tool calls present
//! append assistant turn (content = null)
//! for each call, in call order:
//!   executor.execute() → append tool reply bound by id
//!       │
//!       ▼
//! step += 1; under the caps? → repeat
//! ```
//!
//! Termination: normal text, step cap, time cap, budget cap, router
//! exhaustion, or three denials of the same tool.  Every terminal path
//! produces a final assistant text explaining the reason — errors never
//! reach the gateway as `Err`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::ai::router::{LlmRouter, RouterError};
use crate::ai::types::{Message, ToolCall};
use crate::config::AppConfig;
use crate::database::Store;
use crate::runtime::Deadline;
use crate::security::authority::{filter_tools_for_authority, AuthorityLevel};
use crate::tools::{ApprovalCallback, ToolExecutor, ToolResult};

use super::prompts::build_system_prompt;

/// Task type reported to the router for cost attribution.
const TASK_TYPE: &str = "agent";

/// Denials of the same tool name before the turn is abandoned.
const DENIAL_CEILING: usize = 3;

/// Outcome of one `run` invocation.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub content: String,
    pub steps_taken: usize,
    pub tool_calls_made: Vec<String>,
}

pub struct Agent {
    config: Arc<RwLock<AppConfig>>,
    router: Arc<LlmRouter>,
    executor: Arc<ToolExecutor>,
    store: Option<Arc<Store>>,
    /// Conversation history (user/assistant/tool turns; the system prompt is
    /// rebuilt per request).  Owned by this agent, never shared.
    history: tokio::sync::Mutex<Vec<Message>>,
    approval: RwLock<Option<ApprovalCallback>>,
}

impl Agent {
    pub fn new(
        config: Arc<RwLock<AppConfig>>,
        router: Arc<LlmRouter>,
        executor: Arc<ToolExecutor>,
    ) -> Self {
        Self {
            config,
            router,
            executor,
            store: None,
            history: tokio::sync::Mutex::new(Vec::new()),
            approval: RwLock::new(None),
        }
    }

    /// Attach the persistent store; the cost ledger is flushed into it at
    /// the end of each turn.
    pub fn with_store(mut self, store: Arc<Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn set_approval_callback(&self, callback: ApprovalCallback) {
        *self.approval.write().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Reset the conversation.
    pub async fn clear_conversation(&self) {
        self.history.lock().await.clear();
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    pub async fn history_snapshot(&self) -> Vec<Message> {
        self.history.lock().await.clone()
    }

    /// Run one user turn to completion.
    #[tracing::instrument(name = "agent.run", skip_all, fields(authority = ?authority))]
    pub async fn run(&self, user_message: &str, authority: AuthorityLevel) -> AgentResponse {
        self.router.cost_tracker().reset_task();

        let (system_prompt, max_steps, max_time, max_history) = {
            let cfg = self.config.read().unwrap_or_else(|e| e.into_inner());
            (
                build_system_prompt(&cfg),
                cfg.agent.max_steps,
                cfg.agent.max_time_seconds,
                cfg.agent.max_history,
            )
        };
        let deadline = Deadline::after(Duration::from_secs(max_time));

        // The filtered set is both the schema list shown to the model and
        // the whitelist re-checked at dispatch.
        let filtered = filter_tools_for_authority(self.executor.registry().descriptors(), authority);
        let tool_names: Vec<String> = filtered.into_iter().map(|d| d.name).collect();
        let schemas = self.executor.registry().schemas_for(&tool_names);

        let approval = self
            .approval
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut history = self.history.lock().await;
        history.push(Message::user(user_message));

        let mut steps = 0;
        let mut tool_calls_made: Vec<String> = Vec::new();
        let mut denials: HashMap<String, usize> = HashMap::new();
        let mut provider_retry_done = false;

        let response = loop {
            if deadline.expired() {
                break self.finish(
                    &mut history,
                    format!("stopping: the {max_time} s time limit for this task was reached"),
                    steps,
                    &tool_calls_made,
                    max_history,
                );
            }

            steps += 1;
            let mut request = vec![Message::system(&system_prompt)];
            request.extend(history.iter().cloned());

            let completion = self
                .router
                .complete(
                    request,
                    TASK_TYPE,
                    None,
                    if schemas.is_empty() {
                        None
                    } else {
                        Some(schemas.clone())
                    },
                    0.7,
                    None,
                    Some(deadline),
                )
                .await;

            let completion = match completion {
                Ok(c) => c,
                Err(RouterError::Provider { provider, message }) => {
                    // A failed local provider is now marked unhealthy, so
                    // one retry reaches the next candidate in the same turn.
                    let local = {
                        let cfg = self.config.read().unwrap_or_else(|e| e.into_inner());
                        cfg.llm.providers.get(&provider).is_some_and(|p| p.local)
                    };
                    if local && !provider_retry_done {
                        provider_retry_done = true;
                        continue;
                    }
                    break self.finish(
                        &mut history,
                        format!("error: provider {provider} failed: {message}"),
                        steps,
                        &tool_calls_made,
                        max_history,
                    );
                }
                Err(RouterError::Cancelled) => {
                    break self.finish(
                        &mut history,
                        format!("stopping: the {max_time} s time limit for this task was reached"),
                        steps,
                        &tool_calls_made,
                        max_history,
                    );
                }
                Err(e @ RouterError::BudgetExceeded { .. }) => {
                    break self.finish(
                        &mut history,
                        format!("error: {e}"),
                        steps,
                        &tool_calls_made,
                        max_history,
                    );
                }
                Err(e @ RouterError::NoProviderAvailable) => {
                    break self.finish(
                        &mut history,
                        format!("error: {e}"),
                        steps,
                        &tool_calls_made,
                        max_history,
                    );
                }
            };

            // Pure text: the terminal assistant turn.
            let calls: Vec<ToolCall> = match &completion.tool_calls {
                Some(calls) if !calls.is_empty() => calls.clone(),
                _ => {
                    let content = completion.content.unwrap_or_default();
                    break self.finish(
                        &mut history,
                        content,
                        steps,
                        &tool_calls_made,
                        max_history,
                    );
                }
            };

            // Tool-call turn: content is null, replies follow in call order.
            history.push(Message::assistant_tool_calls(calls.clone()));

            let mut ceiling_hit: Option<String> = None;
            for call in &calls {
                tool_calls_made.push(call.name.clone());
                let result = self
                    .executor
                    .execute(call, authority, approval.as_ref(), Some(deadline))
                    .await;

                if is_permission_denial(&result) {
                    let count = denials.entry(call.name.clone()).or_insert(0);
                    *count += 1;
                    if *count >= DENIAL_CEILING {
                        ceiling_hit = Some(call.name.clone());
                    }
                }

                let reply = serde_json::to_string(&result)
                    .unwrap_or_else(|e| format!("{{\"success\":false,\"error\":\"{e}\"}}"));
                history.push(Message::tool_reply(&call.id, reply));
            }

            if let Some(tool) = ceiling_hit {
                break self.finish(
                    &mut history,
                    format!(
                        "stopping: '{tool}' was denied {DENIAL_CEILING} times; \
                         tell me how you would like to proceed"
                    ),
                    steps,
                    &tool_calls_made,
                    max_history,
                );
            }

            if steps >= max_steps {
                break self.finish(
                    &mut history,
                    format!("stopping: reached the maximum of {max_steps} steps for this task"),
                    steps,
                    &tool_calls_made,
                    max_history,
                );
            }
        };
        drop(history);

        // Opportunistic ledger flush; loss of unflushed records is fine.
        if let Some(store) = &self.store {
            self.router.cost_tracker().flush(store);
        }

        response
    }

    /// Append the final assistant text, enforce the history cap, and build
    /// the response.
    fn finish(
        &self,
        history: &mut Vec<Message>,
        content: String,
        steps: usize,
        tool_calls_made: &[String],
        max_history: usize,
    ) -> AgentResponse {
        history.push(Message::assistant(&content));
        enforce_history_cap(history, max_history);
        AgentResponse {
            content,
            steps_taken: steps,
            tool_calls_made: tool_calls_made.to_vec(),
        }
    }
}

fn is_permission_denial(result: &ToolResult) -> bool {
    !result.success
        && result
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("permission denied"))
}

/// Evict oldest messages past the cap, keeping the conversation well
/// formed: an assistant turn with pending tool calls is evicted together
/// with its replies, and a reply never survives its call.
pub fn enforce_history_cap(history: &mut Vec<Message>, cap: usize) {
    use crate::ai::types::MessageRole;

    while history.len() > cap && !history.is_empty() {
        let removed = history.remove(0);
        if removed.role == MessageRole::Assistant
            && removed
                .tool_calls
                .as_ref()
                .is_some_and(|calls| !calls.is_empty())
        {
            while history
                .first()
                .is_some_and(|m| m.role == MessageRole::Tool)
            {
                history.remove(0);
            }
        }
    }
    // A tool reply must never lead the history (its call was evicted).
    while history
        .first()
        .is_some_and(|m| m.role == crate::ai::types::MessageRole::Tool)
    {
        history.remove(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::ai::cost::CostTracker;
    use crate::ai::provider::LlmProvider;
    use crate::ai::types::{CompletionRequest, CompletionResponse, MessageRole};
    use crate::config::{PermissionMode, ProviderConfig};
    use crate::tools::traits::{PermissionLevel, Tool};
    use crate::tools::ToolRegistry;

    // ── Scripted mock provider ────────────────────────────────────────────────

    enum Scripted {
        Text(&'static str),
        Calls(Vec<(&'static str, &'static str, &'static str)>),
    }

    struct MockProvider {
        script: Vec<Scripted>,
        index: AtomicUsize,
        requests_seen: std::sync::Mutex<Vec<Vec<Message>>>,
    }

    impl MockProvider {
        fn new(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script,
                index: AtomicUsize::new(0),
                requests_seen: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> crate::ai::provider::Result<CompletionResponse> {
            self.requests_seen
                .lock()
                .unwrap()
                .push(request.messages.clone());
            let i = self.index.fetch_add(1, Ordering::SeqCst);
            let step = self.script.get(i % self.script.len().max(1));
            let (content, tool_calls) = match step {
                Some(Scripted::Text(text)) => (Some((*text).to_owned()), None),
                Some(Scripted::Calls(calls)) => (
                    None,
                    Some(
                        calls
                            .iter()
                            .map(|(id, name, args)| ToolCall::new(*id, *name, *args))
                            .collect(),
                    ),
                ),
                None => (Some("no more responses".to_owned()), None),
            };
            Ok(CompletionResponse {
                content,
                model: request.model,
                provider: "mock".to_owned(),
                input_tokens: 10,
                output_tokens: 5,
                cost: 0.0,
                tool_calls,
            })
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }

    // ── Echo-style shell stub ─────────────────────────────────────────────────

    struct ShellStub;

    #[async_trait]
    impl Tool for ShellStub {
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
        async fn execute(&self, args: Value) -> Result<ToolResult, String> {
            let command = args.get("command").and_then(Value::as_str).unwrap_or("");
            let stdout = command.strip_prefix("echo ").map(|s| format!("{s}\n"));
            Ok(ToolResult::ok(json!({
                "stdout": stdout.unwrap_or_default(),
                "exit_code": 0,
            })))
        }
    }

    struct FileListStub;

    #[async_trait]
    impl Tool for FileListStub {
        fn name(&self) -> &str {
            "file_list"
        }
        fn description(&self) -> &str {
            "lists a directory"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn permission_level(&self) -> PermissionLevel {
            PermissionLevel::Safe
        }
        async fn execute(&self, _args: Value) -> Result<ToolResult, String> {
            Ok(ToolResult::ok(json!({ "entries": [] })))
        }
    }

    // ── Harness ───────────────────────────────────────────────────────────────

    fn agent_with(provider: Arc<MockProvider>, mode: PermissionMode) -> Agent {
        let mut cfg = AppConfig::default();
        cfg.agent.permission_mode = mode;
        cfg.llm.providers.insert(
            "mock".to_owned(),
            ProviderConfig {
                enabled: true,
                api_key: String::new(),
                base_url: String::new(),
                default_model: "mock-model".to_owned(),
                local: false,
            },
        );
        cfg.llm.provider_priority = vec!["mock".to_owned()];
        let config = Arc::new(RwLock::new(cfg));

        let mut providers: std::collections::HashMap<String, Arc<dyn LlmProvider>> =
            std::collections::HashMap::new();
        providers.insert("mock".to_owned(), provider);
        let router = Arc::new(LlmRouter::new(
            config.clone(),
            providers,
            Arc::new(CostTracker::new()),
        ));

        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(ShellStub)).unwrap();
        registry.register(Arc::new(FileListStub)).unwrap();
        let executor = Arc::new(ToolExecutor::new(registry, config.clone()));

        Agent::new(config, router, executor)
    }

    // ── S1: simple text turn ──────────────────────────────────────────────────

    #[tokio::test]
    async fn simple_text_turn() {
        let agent = agent_with(
            MockProvider::new(vec![Scripted::Text("hi there")]),
            PermissionMode::FullAuto,
        );
        let response = agent.run("hello", AuthorityLevel::Owner).await;
        assert_eq!(response.content, "hi there");
        assert_eq!(response.steps_taken, 1);
        assert!(response.tool_calls_made.is_empty());

        let history = agent.history_snapshot().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[1].role, MessageRole::Assistant);
    }

    // ── S2: tool then complete ────────────────────────────────────────────────

    #[tokio::test]
    async fn tool_call_then_complete() {
        let agent = agent_with(
            MockProvider::new(vec![
                Scripted::Calls(vec![(
                    "call_1",
                    "shell_execute",
                    r#"{"command": "echo hello"}"#,
                )]),
                Scripted::Text("Done: hello"),
            ]),
            PermissionMode::FullAuto,
        );
        let response = agent.run("echo hello via shell", AuthorityLevel::Owner).await;
        assert_eq!(response.steps_taken, 2);
        assert_eq!(response.tool_calls_made, vec!["shell_execute"]);
        assert_eq!(response.content, "Done: hello");

        // The pending tool call got exactly one reply, bound by id,
        // before the final assistant message.
        let history = agent.history_snapshot().await;
        let assistant_idx = history
            .iter()
            .position(|m| {
                m.role == MessageRole::Assistant && m.pending_tool_calls().first().is_some()
            })
            .unwrap();
        let reply = &history[assistant_idx + 1];
        assert_eq!(reply.role, MessageRole::Tool);
        assert_eq!(reply.tool_call_id.as_deref(), Some("call_1"));
        assert!(reply.content.as_deref().unwrap().contains("hello\\n"));
    }

    // ── S3: denial then retry ─────────────────────────────────────────────────

    #[tokio::test]
    async fn denial_then_approval_continues() {
        let agent = agent_with(
            MockProvider::new(vec![
                Scripted::Calls(vec![("call_1", "shell_execute", r#"{"command": "echo x"}"#)]),
                Scripted::Calls(vec![("call_2", "shell_execute", r#"{"command": "echo x"}"#)]),
                Scripted::Text("Task complete after retry."),
            ]),
            PermissionMode::AskAlways,
        );
        let decisions = Arc::new(AtomicUsize::new(0));
        let d = decisions.clone();
        agent.set_approval_callback(Arc::new(move |_, _, _| {
            d.fetch_add(1, Ordering::SeqCst) > 0 // deny first, approve after
        }));

        let response = agent.run("do something", AuthorityLevel::Owner).await;
        assert_eq!(response.steps_taken, 3);
        assert!(response.content.contains("complete"));
    }

    #[tokio::test]
    async fn three_denials_of_same_tool_stop_the_turn() {
        let agent = agent_with(
            MockProvider::new(vec![Scripted::Calls(vec![(
                "c",
                "shell_execute",
                r#"{"command": "echo x"}"#,
            )])]),
            PermissionMode::AskAlways,
        );
        agent.set_approval_callback(Arc::new(|_, _, _| false));
        let response = agent.run("do it", AuthorityLevel::Owner).await;
        assert_eq!(response.steps_taken, 3);
        assert!(response.content.contains("denied 3 times"));
    }

    // ── S4: step cap ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn step_cap_fires_after_exactly_max_steps() {
        let agent = agent_with(
            MockProvider::new(vec![Scripted::Calls(vec![(
                "c",
                "shell_execute",
                r#"{"command": "echo loop"}"#,
            )])]),
            PermissionMode::FullAuto,
        );
        {
            let binding = agent.config.clone();
            binding.write().unwrap().agent.max_steps = 3;
        }
        let response = agent.run("loop forever", AuthorityLevel::Owner).await;
        assert_eq!(response.steps_taken, 3);
        assert!(response.content.contains("maximum of 3 steps"));
    }

    // ── S5: budget exceeded before any call ───────────────────────────────────

    #[tokio::test]
    async fn budget_exceeded_terminates_without_llm_call() {
        let provider = MockProvider::new(vec![Scripted::Text("should never be seen")]);
        let agent = agent_with(provider.clone(), PermissionMode::FullAuto);
        // Exhaust the daily budget before the turn.
        agent
            .router
            .cost_tracker()
            .record("mock", "mock-model", 0, 0, 10.0, "agent");

        let response = agent.run("hello", AuthorityLevel::Owner).await;
        assert!(response.content.starts_with("error: budget exceeded"));
        assert_eq!(response.steps_taken, 1);
        assert!(
            provider.requests_seen.lock().unwrap().is_empty(),
            "no LLM call may occur once over budget"
        );
    }

    // ── Router failure surfaces as text ───────────────────────────────────────

    #[tokio::test]
    async fn no_provider_surfaces_error_text() {
        let agent = agent_with(
            MockProvider::new(vec![Scripted::Text("unused")]),
            PermissionMode::FullAuto,
        );
        agent.config.write().unwrap().llm.provider_priority.clear();
        let response = agent.run("hello", AuthorityLevel::Owner).await;
        assert!(response.content.starts_with("error:"));
        assert_eq!(response.steps_taken, 1);
    }

    // ── Authority: hallucinated tool gets a structured denial (S7) ────────────

    #[tokio::test]
    async fn trusted_tier_blocks_hallucinated_shell_call() {
        let agent = agent_with(
            MockProvider::new(vec![
                Scripted::Calls(vec![("c1", "shell_execute", r#"{"command": "echo x"}"#)]),
                Scripted::Text("Understood, I cannot run shell commands."),
            ]),
            PermissionMode::FullAuto,
        );
        let response = agent.run("try shell", AuthorityLevel::Trusted).await;
        // The loop continued after the denial and finished with text.
        assert_eq!(response.steps_taken, 2);

        let history = agent.history_snapshot().await;
        let reply = history
            .iter()
            .find(|m| m.role == MessageRole::Tool)
            .unwrap();
        assert!(reply.content.as_deref().unwrap().contains("authority denied"));
    }

    // ── Request shape: system first, schemas present ──────────────────────────

    #[tokio::test]
    async fn request_carries_system_prompt_and_history() {
        let provider = MockProvider::new(vec![Scripted::Text("one"), Scripted::Text("two")]);
        let agent = agent_with(provider.clone(), PermissionMode::FullAuto);
        agent.run("first message", AuthorityLevel::Owner).await;
        agent.run("second message", AuthorityLevel::Owner).await;

        let seen = provider.requests_seen.lock().unwrap();
        let second = &seen[1];
        assert_eq!(second[0].role, MessageRole::System);
        let users: Vec<&str> = second
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .filter_map(|m| m.content.as_deref())
            .collect();
        assert_eq!(users, vec!["first message", "second message"]);
    }

    #[tokio::test]
    async fn clear_conversation_resets_history() {
        let agent = agent_with(
            MockProvider::new(vec![Scripted::Text("ok")]),
            PermissionMode::FullAuto,
        );
        agent.run("remember this", AuthorityLevel::Owner).await;
        assert_eq!(agent.history_len().await, 2);
        agent.clear_conversation().await;
        assert_eq!(agent.history_len().await, 0);
    }

    // ── History cap ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn history_never_exceeds_cap() {
        let agent = agent_with(
            MockProvider::new(vec![Scripted::Text("ok")]),
            PermissionMode::FullAuto,
        );
        agent.config.write().unwrap().agent.max_history = 6;
        for i in 0..10 {
            agent
                .run(&format!("message {i}"), AuthorityLevel::Owner)
                .await;
        }
        assert!(agent.history_len().await <= 6);
    }

    #[test]
    fn eviction_removes_tool_call_turn_with_its_replies() {
        let mut history = vec![
            Message::user("old"),
            Message::assistant_tool_calls(vec![ToolCall::new("c1", "t", "{}")]),
            Message::tool_reply("c1", "r"),
            Message::user("newer"),
            Message::assistant("a"),
        ];
        enforce_history_cap(&mut history, 3);
        // Dropping the user puts the tool-call turn at the front; dropping
        // the turn takes its reply along.
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content.as_deref(), Some("newer"));
    }

    #[test]
    fn eviction_never_leaves_leading_tool_reply() {
        let mut history = vec![
            Message::assistant_tool_calls(vec![ToolCall::new("c1", "t", "{}")]),
            Message::tool_reply("c1", "r"),
            Message::user("u"),
            Message::assistant("a"),
        ];
        enforce_history_cap(&mut history, 3);
        assert!(history
            .first()
            .is_some_and(|m| m.role != MessageRole::Tool));
    }

    // ── Time cap ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn time_cap_fires_within_one_iteration() {
        let agent = agent_with(
            MockProvider::new(vec![Scripted::Calls(vec![(
                "c",
                "shell_execute",
                r#"{"command": "echo x"}"#,
            )])]),
            PermissionMode::FullAuto,
        );
        agent.config.write().unwrap().agent.max_time_seconds = 0;
        let response = agent.run("anything", AuthorityLevel::Owner).await;
        assert!(response.content.contains("time limit"));
        assert_eq!(response.steps_taken, 0);
    }

    // ── Malformed tool arguments are reported, loop continues ─────────────────

    #[tokio::test]
    async fn bad_tool_json_reported_as_structured_error() {
        let agent = agent_with(
            MockProvider::new(vec![
                Scripted::Calls(vec![("c1", "shell_execute", "{broken json")]),
                Scripted::Text("Let me correct those arguments."),
            ]),
            PermissionMode::FullAuto,
        );
        let response = agent.run("go", AuthorityLevel::Owner).await;
        assert_eq!(response.steps_taken, 2);
        let history = agent.history_snapshot().await;
        let reply = history
            .iter()
            .find(|m| m.role == MessageRole::Tool)
            .unwrap();
        assert!(reply
            .content
            .as_deref()
            .unwrap()
            .contains("invalid tool arguments"));
    }
}
