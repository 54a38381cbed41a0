//! Secret store behind the `vault:<name>` reference convention.
//!
//! Config values (MCP server env vars, provider headers) may name secrets
//! indirectly as `vault:github_token`; resolution happens at connection
//! time so raw secrets never sit in the config file.  Cryptographic
//! internals are the OS keychain's concern, not ours.

use std::collections::HashMap;
use std::sync::RwLock;

/// Prefix marking an indirect secret reference.
pub const VAULT_PREFIX: &str = "vault:";

pub trait Vault: Send + Sync {
    /// Look up a secret by name.  `None` when absent.
    fn get(&self, name: &str) -> Option<String>;
}

/// OS-keychain-backed vault.
pub struct KeyringVault {
    service: String,
}

impl KeyringVault {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl Vault for KeyringVault {
    fn get(&self, name: &str) -> Option<String> {
        let entry = keyring::Entry::new(&self.service, name).ok()?;
        entry.get_password().ok()
    }
}

/// In-memory vault for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryVault {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), value.into());
    }
}

impl Vault for MemoryVault {
    fn get(&self, name: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }
}

/// Resolve a possibly-indirect config value.
///
/// - plain values pass through unchanged;
/// - `vault:<name>` resolves through the vault;
/// - a missing vault entry yields `None` — callers drop the variable
///   silently rather than leaking the reference downstream.
pub fn resolve_value(value: &str, vault: &dyn Vault) -> Option<String> {
    match value.strip_prefix(VAULT_PREFIX) {
        Some(name) => vault.get(name),
        None => Some(value.to_owned()),
    }
}
