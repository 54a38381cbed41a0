//! `ChannelManager` — lifecycle management for registered channels.
//!
//! Keeps a registry of [`Channel`] instances, aggregates their inbound
//! messages into a single receiver, and exposes a send interface keyed by
//! channel name.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use super::traits::{Channel, ChannelMessage};

pub struct ChannelManager {
    channels: Arc<RwLock<HashMap<String, Arc<dyn Channel>>>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a channel.  Duplicate names are an error.
    pub async fn register(&self, channel: Arc<dyn Channel>) -> Result<(), String> {
        let name = channel.name().to_owned();
        let mut map = self.channels.write().await;
        if map.contains_key(&name) {
            return Err(format!("channel '{name}' is already registered"));
        }
        map.insert(name, channel);
        Ok(())
    }

    pub async fn unregister(&self, name: &str) -> bool {
        self.channels.write().await.remove(name).is_some()
    }

    pub async fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }

    /// Health of every registered channel.
    pub async fn health_all(&self) -> HashMap<String, bool> {
        let channels = self.channels.read().await;
        let mut result = HashMap::new();
        for (name, ch) in channels.iter() {
            result.insert(name.clone(), ch.health_check().await);
        }
        result
    }

    /// Send a reply via the named channel.
    pub async fn send(
        &self,
        channel_name: &str,
        message: &str,
        recipient: Option<&str>,
    ) -> Result<(), String> {
        let channels = self.channels.read().await;
        let ch = channels
            .get(channel_name)
            .ok_or_else(|| format!("channel '{channel_name}' not found"))?;
        ch.send(message, recipient).await
    }

    /// Start listening on every channel; inbound messages are aggregated
    /// into the returned receiver.
    pub async fn start_all(
        &self,
        buffer: usize,
    ) -> (mpsc::Receiver<ChannelMessage>, Vec<tokio::task::JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel::<ChannelMessage>(buffer);
        let channels = self.channels.read().await;

        let mut handles = Vec::new();
        for (name, ch) in channels.iter() {
            let tx_clone = tx.clone();
            let ch_clone = Arc::clone(ch);
            let name_clone = name.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = ch_clone.listen(tx_clone).await {
                    log::warn!("channel '{name_clone}' listen error: {e}");
                }
            }));
        }
        (rx, handles)
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}
