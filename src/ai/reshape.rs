//! Message reshaping for providers with restrictive sequence rules.
//!
//! Some APIs (GLM among them) reject sequences the canonical history allows:
//! - at most one `system` message, and only at index 0
//! - assistant messages carrying tool calls must have `content: null`
//! - at least one `user` message must be present
//! - exactly one tool reply per pending `tool_call_id`
//!
//! The reshaping lives here, in the adapter layer, so the router's
//! invariants stay independent of any particular vendor.  The transform is
//! idempotent: `reshape(reshape(m)) == reshape(m)`.

use super::types::{Message, MessageRole};

/// Placeholder inserted when a sequence contains no user message.
const PLACEHOLDER_USER: &str = "Please proceed.";

/// Apply the restricted-shape constraints to `messages`.
pub fn reshape_messages(messages: &[Message]) -> Vec<Message> {
    let mut result: Vec<Message> = Vec::with_capacity(messages.len());

    // Merge every system message into one at index 0, newline-joined.
    let system_parts: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .filter_map(|m| m.content.as_deref())
        .filter(|c| !c.is_empty())
        .collect();
    if !system_parts.is_empty() {
        result.push(Message::system(system_parts.join("\n\n")));
    }

    let mut seen_reply_ids: Vec<String> = Vec::new();
    for msg in messages.iter().filter(|m| m.role != MessageRole::System) {
        let mut formatted = msg.clone();

        // Tool-call assistant turns must carry null content, not "".
        if formatted.role == MessageRole::Assistant
            && formatted
                .tool_calls
                .as_ref()
                .is_some_and(|calls| !calls.is_empty())
        {
            formatted.content = None;
        }

        // One reply per tool_call_id: drop later duplicates.
        if formatted.role == MessageRole::Tool {
            if let Some(id) = formatted.tool_call_id.clone() {
                if seen_reply_ids.contains(&id) {
                    continue;
                }
                seen_reply_ids.push(id);
            }
        }

        result.push(formatted);
    }

    // At least one user message, inserted at the earliest valid position.
    let has_user = result.iter().any(|m| m.role == MessageRole::User);
    if !has_user {
        let insert_idx = usize::from(
            result
                .first()
                .is_some_and(|m| m.role == MessageRole::System),
        );
        result.insert(insert_idx, Message::user(PLACEHOLDER_USER));
    }

    result
}
