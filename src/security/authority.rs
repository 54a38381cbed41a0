//! Authority tier system for multi-user access control.
//!
//! Resolves who can do what from verified `(channel, user_id)` pairs.
//! Authority is enforced at the gateway BEFORE the executor's permission
//! prompts — the layers compose, they do not compete.
//!
//! Flow: inbound message → resolve authority → filter tool list →
//! permission check → execute.

use crate::config::AuthorityConfig;
use crate::tools::registry::ToolDescriptor;

/// User authority tiers — determine tool visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityLevel {
    Owner,
    Trusted,
    Public,
}

/// Read-only, safe tools that trusted users can access.  These never modify
/// state, execute code, or expose sensitive data.
pub const TRUSTED_TOOLS: &[&str] = &[
    // File system (read-only)
    "file_read",
    "file_list",
    // Knowledge
    "knowledge_search",
    // Goals (read-only)
    "goal_status",
    // Identity (read-only)
    "identity_status",
    // Hub
    "hub_search",
    // Skills (read-only)
    "skill_list",
    "skill_read",
    // Documents (read-only)
    "document_query",
    "document_collections",
    // Scheduling (read-only)
    "schedule_list",
    // Status queries
    "storage_status",
    "process_status",
    "health_status",
    // Payments (read-only)
    "payment_balance",
    "wallet_status",
    "payment_history",
    "payment_validate",
];

/// Resolve a user's authority tier.
///
/// Rules:
/// - CLI/local/direct channels are always OWNER (local process trust).
/// - An empty owner list means unconfigured mode — every user is OWNER.
/// - Otherwise `"channel:user_id"` or the bare `user_id` is matched against
///   the owner list, then the trusted list, else PUBLIC.
pub fn resolve_authority(
    channel: &str,
    user_id: &str,
    config: &AuthorityConfig,
) -> AuthorityLevel {
    if matches!(channel, "cli" | "local" | "direct") {
        return AuthorityLevel::Owner;
    }

    if config.owner.user_ids.is_empty() {
        return AuthorityLevel::Owner;
    }

    let composite = format!("{channel}:{user_id}");
    let matches_list = |ids: &[String]| {
        ids.iter()
            .any(|id| id == &composite || id == user_id)
    };

    if matches_list(&config.owner.user_ids) {
        return AuthorityLevel::Owner;
    }
    if matches_list(&config.trusted.user_ids) {
        return AuthorityLevel::Trusted;
    }
    AuthorityLevel::Public
}

/// Filter the tool list for an authority tier.
///
/// - OWNER: all tools.
/// - TRUSTED: only the read-only set.
/// - PUBLIC: no tools (chat only).
pub fn filter_tools_for_authority(
    tools: Vec<ToolDescriptor>,
    authority: AuthorityLevel,
) -> Vec<ToolDescriptor> {
    match authority {
        AuthorityLevel::Owner => tools,
        AuthorityLevel::Trusted => tools
            .into_iter()
            .filter(|t| TRUSTED_TOOLS.contains(&t.name.as_str()))
            .collect(),
        AuthorityLevel::Public => Vec::new(),
    }
}

/// Safety net re-check at dispatch: even when the model hallucinates a tool
/// outside its filtered list, this blocks execution.
pub fn check_tool_authority(tool_name: &str, authority: AuthorityLevel) -> bool {
    match authority {
        AuthorityLevel::Owner => true,
        AuthorityLevel::Trusted => TRUSTED_TOOLS.contains(&tool_name),
        AuthorityLevel::Public => false,
    }
}
