//! Channel abstractions for inbound/outbound messaging.
//!
//! A **channel** is any transport over which messages flow between the
//! agent core and an external peer — CLI, Telegram, Discord, Slack, or a
//! WebSocket gateway.  Each maps to a distinct channel name used by
//! authority resolution.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// ─── ChannelMessage ───────────────────────────────────────────────────────────

/// A message received from (or sent to) a channel peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: String,
    /// Which channel this message came from (`"cli"`, `"telegram"`, ...).
    pub channel: String,
    /// Verified platform user id of the sender.
    pub user_id: String,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Optional metadata (platform message id for reply threading, etc.).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ChannelMessage {
    pub fn new(
        channel: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel: channel.into(),
            user_id: user_id.into(),
            content: content.into(),
            timestamp: chrono::Utc::now(),
            metadata: HashMap::new(),
        }
    }
}


// ─── Channel trait ────────────────────────────────────────────────────────────

/// Transport abstraction.  Implementations are stored behind `Arc` in the
/// [`super::manager::ChannelManager`].
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel name — also the authority-resolution key.
    fn name(&self) -> &str;

    /// Send a reply to `recipient` (or the channel default).
    async fn send(&self, message: &str, recipient: Option<&str>) -> Result<(), String>;

    /// Listen for inbound messages, forwarding them on `tx` until the
    /// channel disconnects or `tx` is dropped.
    async fn listen(&self, tx: mpsc::Sender<ChannelMessage>) -> Result<(), String>;

    /// Lightweight health probe.
    async fn health_check(&self) -> bool;
}
