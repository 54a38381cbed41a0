//! Tool executor — the ordered dispatch pipeline between the agent loop and
//! tool bodies.
//!
//! ```text
//! tool_call
//!   │ 1. existence          unknown name → "unknown tool"
//!   │ 2. authority gate     OWNER all / TRUSTED read-only set / PUBLIC none
//!   │ 3. protected paths    file-mutating tools vs. protected list
//!   │ 4. permission prompt  SAFE auto-approves even in ask_always
//!   │ 5. payment gates      spending limits + amount-tiered approval
//!   │ 6. execute            deadline-bound; timeout → timed_out result
//!   ▼ 7. post-process       external results wrapped + injection-scanned
//! ToolResult
//! ```
//!
//! Every gate short-circuits on first failure; failures are structured tool
//! errors the model can react to, never panics or propagated errors.

use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::ai::types::ToolCall;
use crate::config::{AppConfig, PermissionMode};
use crate::payments::{ApprovalTier, PaymentAuditor, SpendingLimiter};
use crate::runtime::Deadline;
use crate::security::authority::{check_tool_authority, AuthorityLevel};
use crate::security::injection::wrap_tool_result;

use super::registry::ToolRegistry;
use super::traits::{PermissionLevel, ToolResult};

/// Approval prompt: `(tool_name, description, params) → approved`.
pub type ApprovalCallback = Arc<dyn Fn(&str, &str, &Value) -> bool + Send + Sync>;

/// Tools whose parameters name filesystem targets subject to the
/// protected-path list.
const FILE_MUTATING_TOOLS: &[(&str, &[&str])] = &[
    ("file_write", &["path"]),
    ("file_delete", &["path"]),
    ("file_move", &["source", "destination"]),
];

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    config: Arc<RwLock<AppConfig>>,
    limiter: Option<Arc<SpendingLimiter>>,
    auditor: Option<Arc<PaymentAuditor>>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, config: Arc<RwLock<AppConfig>>) -> Self {
        Self {
            registry,
            config,
            limiter: None,
            auditor: None,
        }
    }

    /// Attach the payment gates (enabled deployments only).
    pub fn with_payments(
        mut self,
        limiter: Arc<SpendingLimiter>,
        auditor: Arc<PaymentAuditor>,
    ) -> Self {
        self.limiter = Some(limiter);
        self.auditor = Some(auditor);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Dispatch one tool call.
    #[tracing::instrument(name = "executor.execute", skip_all, fields(tool = %call.name))]
    pub async fn execute(
        &self,
        call: &ToolCall,
        authority: AuthorityLevel,
        approval: Option<&ApprovalCallback>,
        deadline: Option<Deadline>,
    ) -> ToolResult {
        // 1. Existence.
        let Some(tool) = self.registry.get(&call.name) else {
            return ToolResult::err(format!("unknown tool '{}'", call.name));
        };

        // Argument decoding: malformed JSON becomes a structured error the
        // model can self-correct from.
        let args: Value = match serde_json::from_str(&call.arguments) {
            Ok(v) => v,
            Err(e) => {
                return ToolResult::err(format!(
                    "invalid tool arguments for '{}': {e}",
                    call.name
                ));
            }
        };

        // 2. Authority gate — defends against hallucinated tool names
        // outside the filtered set.
        if !check_tool_authority(&call.name, authority) {
            return ToolResult::err(format!(
                "authority denied: tool '{}' is not available at the {authority:?} tier",
                call.name
            ));
        }

        // 3. Protected-path check for file-mutating tools.
        if let Some(reason) = self.protected_path_violation(&call.name, &args) {
            return ToolResult::err(reason);
        }

        // 4. Permission prompt.  SAFE auto-approves even in strict mode.
        let mode = {
            let cfg = self.config.read().unwrap_or_else(|e| e.into_inner());
            cfg.agent.permission_mode
        };
        if needs_approval(tool.permission_level(), mode) {
            let approved = approval.is_some_and(|cb| cb(&call.name, tool.description(), &args));
            if !approved {
                return ToolResult::err(format!(
                    "permission denied: user did not approve '{}'",
                    call.name
                ));
            }
        }

        // 5. Payment-specific gates.
        let mut audit_id = None;
        if tool.is_payment() {
            match self.payment_gates(call, tool.description(), &args, mode, approval) {
                Ok(id) => audit_id = id,
                Err(result) => return *result,
            }
        }

        // 6. Execute under the turn deadline.
        let mut result = self.run_body(tool.as_ref(), args, deadline).await;

        // Close the audit protocol: pending → executed | failed.
        if let (Some(id), Some(auditor)) = (audit_id, &self.auditor) {
            if result.success {
                let tx_ref = result
                    .data
                    .as_ref()
                    .and_then(|d| d.get("transaction_ref"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                if let Err(e) = auditor.mark_executed(id, tx_ref) {
                    log::error!("payment audit update failed: {e}");
                }
            } else {
                let error = result.error.as_deref().unwrap_or("execution failed");
                if let Err(e) = auditor.mark_failed(id, error) {
                    log::error!("payment audit update failed: {e}");
                }
            }
        }

        // 7. Post-process: wrap external content and scan for injection.
        if let Some(data) = result.data.take() {
            result.data = Some(wrap_tool_result(&call.name, data));
        }
        result
    }

    async fn run_body(
        &self,
        tool: &dyn super::traits::Tool,
        args: Value,
        deadline: Option<Deadline>,
    ) -> ToolResult {
        let body = tool.execute(args);
        let outcome = match deadline {
            Some(d) => {
                if d.expired() {
                    return ToolResult::timed_out("turn deadline already elapsed");
                }
                match tokio::time::timeout(d.remaining(), body).await {
                    Ok(inner) => inner,
                    Err(_) => return ToolResult::timed_out("tool call hit the turn deadline"),
                }
            }
            None => body.await,
        };
        match outcome {
            Ok(result) => result,
            // Tool body failures never propagate.
            Err(message) => ToolResult::err(message),
        }
    }

    fn protected_path_violation(&self, tool_name: &str, args: &Value) -> Option<String> {
        let params = FILE_MUTATING_TOOLS
            .iter()
            .find(|(name, _)| *name == tool_name)
            .map(|(_, params)| *params)?;

        let cfg = self.config.read().unwrap_or_else(|e| e.into_inner());
        if cfg.protected_paths.is_empty() {
            return None;
        }
        for param in params {
            let Some(target) = args.get(*param).and_then(Value::as_str) else {
                continue;
            };
            for protected in &cfg.protected_paths {
                if target == protected || target.ends_with(protected.as_str()) {
                    return Some(format!(
                        "protected path: '{target}' cannot be modified by any tool"
                    ));
                }
            }
        }
        None
    }

    /// Spending limits + amount-tiered approval.  Returns the pending audit
    /// id on success, or the rejection result.
    fn payment_gates(
        &self,
        call: &ToolCall,
        description: &str,
        args: &Value,
        mode: PermissionMode,
        approval: Option<&ApprovalCallback>,
    ) -> Result<Option<i64>, Box<ToolResult>> {
        let (Some(limiter), Some(auditor)) = (&self.limiter, &self.auditor) else {
            return Err(Box::new(ToolResult::err(
                "payments are not enabled in this deployment",
            )));
        };

        let amount = args.get("amount").and_then(Value::as_f64).unwrap_or(0.0);
        let currency = args
            .get("currency")
            .and_then(Value::as_str)
            .unwrap_or("USD");
        let recipient = args
            .get("recipient")
            .and_then(Value::as_str)
            .unwrap_or("unknown");

        let check = limiter.check(amount, currency, recipient);
        if !check.allowed {
            return Err(Box::new(ToolResult::err(format!(
                "spending limit exceeded: {}",
                check.reason
            ))));
        }

        match limiter.approval_tier(amount) {
            ApprovalTier::Standard => {}
            ApprovalTier::AlwaysAsk | ApprovalTier::Confirm => {
                let approved =
                    approval.is_some_and(|cb| cb(&call.name, description, args));
                if !approved {
                    return Err(Box::new(ToolResult::err(format!(
                        "permission denied: payment of ${amount:.2} requires approval"
                    ))));
                }
            }
            ApprovalTier::Cooldown => {
                // No human can wait out the preview/execute delay in
                // full-auto mode.
                if mode == PermissionMode::FullAuto {
                    return Err(Box::new(ToolResult::err(format!(
                        "spending limit exceeded: ${amount:.2} falls in the cooldown tier, \
                         which is not allowed without a human in the loop"
                    ))));
                }
                let preview = approval.is_some_and(|cb| cb(&call.name, description, args));
                let confirm = preview && approval.is_some_and(|cb| cb(&call.name, description, args));
                if !confirm {
                    return Err(Box::new(ToolResult::err(format!(
                        "permission denied: cooldown-tier payment of ${amount:.2} was not \
                         confirmed twice"
                    ))));
                }
            }
        }

        let id = auditor
            .log_pending(
                &call.name,
                amount,
                currency,
                recipient,
                "payment",
                None,
                None,
            )
            .map_err(|e| Box::new(ToolResult::err(format!("payment audit failed: {e}"))))?;
        Ok(Some(id))
    }
}

/// Approval matrix: SAFE never asks; ask_always asks for everything else;
/// smart_auto asks for DESTRUCTIVE/CRITICAL; full_auto never asks.
fn needs_approval(level: PermissionLevel, mode: PermissionMode) -> bool {
    match (mode, level) {
        (_, PermissionLevel::Safe) => false,
        (PermissionMode::FullAuto, _) => false,
        (PermissionMode::AskAlways, _) => true,
        (PermissionMode::SmartAuto, PermissionLevel::Moderate) => false,
        (PermissionMode::SmartAuto, _) => true,
    }
}
