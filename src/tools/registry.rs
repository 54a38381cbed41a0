//! Central registry of available tools.
//!
//! Native tools register at startup; MCP tools register when their
//! connection becomes Connected and unregister when it closes permanently.
//! Descriptors are never mutated in place — re-registration of a taken name
//! is rejected (first wins).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use super::traits::{PermissionLevel, Tool, ToolOrigin};
use crate::ai::types::ToolSchema;

/// Immutable snapshot entry of a registered tool.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub permission_level: PermissionLevel,
    pub origin: ToolOrigin,
}

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool.  Name collisions are rejected — the first
    /// registration wins.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), String> {
        let name = tool.name().to_owned();
        let mut map = self.tools.write().unwrap_or_else(|e| e.into_inner());
        if map.contains_key(&name) {
            return Err(format!("tool '{name}' is already registered"));
        }
        map.insert(name, tool);
        Ok(())
    }

    /// Remove a tool by name (MCP connection closed).  Returns whether a
    /// tool was removed.
    pub fn unregister(&self, name: &str) -> bool {
        self.tools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Snapshot of `(name → descriptor)` for the loop and authority filter.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let map = self.tools.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<ToolDescriptor> = map
            .values()
            .map(|t| ToolDescriptor {
                name: t.name().to_owned(),
                description: t.description().to_owned(),
                input_schema: t.parameters_schema(),
                permission_level: t.permission_level(),
                origin: t.origin(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Schemas for a provider request, restricted to `names`.
    pub fn schemas_for(&self, names: &[String]) -> Vec<ToolSchema> {
        let map = self.tools.read().unwrap_or_else(|e| e.into_inner());
        names
            .iter()
            .filter_map(|name| map.get(name))
            .map(|t| ToolSchema {
                name: t.name().to_owned(),
                description: t.description().to_owned(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
