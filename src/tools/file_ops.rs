//! File tools: read, list, write, delete, move.
//!
//! Protected-path enforcement happens in the executor before these bodies
//! run; the write path additionally checks the storage quota here.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::runtime::StorageManager;

use super::traits::{PermissionLevel, Tool, ToolResult};

fn path_arg(args: &Value, key: &str) -> Result<String, String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| format!("missing required argument '{key}'"))
}

// ─── file_read ────────────────────────────────────────────────────────────────

pub struct FileReadTool;

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a text file and return its contents."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to the file." }
            },
            "required": ["path"]
        })
    }

    fn permission_level(&self) -> PermissionLevel {
        PermissionLevel::Safe
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let path = path_arg(&args, "path")?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(ToolResult::ok(json!({ "path": path, "content": content }))),
            Err(e) => Ok(ToolResult::err(format!("cannot read {path}: {e}"))),
        }
    }
}

// ─── file_list ────────────────────────────────────────────────────────────────

pub struct FileListTool;

#[async_trait]
impl Tool for FileListTool {
    fn name(&self) -> &str {
        "file_list"
    }

    fn description(&self) -> &str {
        "List the entries of a directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list." }
            },
            "required": ["path"]
        })
    }

    fn permission_level(&self) -> PermissionLevel {
        PermissionLevel::Safe
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let path = path_arg(&args, "path")?;
        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(rd) => rd,
            Err(e) => return Ok(ToolResult::err(format!("cannot list {path}: {e}"))),
        };
        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let kind = if entry.path().is_dir() { "dir" } else { "file" };
            names.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "kind": kind,
            }));
        }
        Ok(ToolResult::ok(json!({ "path": path, "entries": names })))
    }
}

// ─── file_write ───────────────────────────────────────────────────────────────

pub struct FileWriteTool {
    storage: Arc<StorageManager>,
}

impl FileWriteTool {
    pub fn new(storage: Arc<StorageManager>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write text content to a file, creating parent directories as needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    fn permission_level(&self) -> PermissionLevel {
        PermissionLevel::Moderate
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let path = path_arg(&args, "path")?;
        let content = args
            .get("content")
            .and_then(Value::as_str)
            .ok_or("missing required argument 'content'")?;

        if let Err(reason) = self.storage.validate_write(content.len() as u64) {
            return Ok(ToolResult::err(reason));
        }

        if let Some(parent) = Path::new(&path).parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::err(format!("cannot create parent dirs: {e}")));
            }
        }
        match tokio::fs::write(&path, content).await {
            Ok(()) => Ok(ToolResult::ok(
                json!({ "path": path, "bytes_written": content.len() }),
            )),
            Err(e) => Ok(ToolResult::err(format!("cannot write {path}: {e}"))),
        }
    }
}

// ─── file_delete ──────────────────────────────────────────────────────────────

pub struct FileDeleteTool;

#[async_trait]
impl Tool for FileDeleteTool {
    fn name(&self) -> &str {
        "file_delete"
    }

    fn description(&self) -> &str {
        "Delete a file or directory. Set recursive=true for non-empty directories."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "recursive": { "type": "boolean", "default": false }
            },
            "required": ["path"]
        })
    }

    fn permission_level(&self) -> PermissionLevel {
        PermissionLevel::Destructive
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let path = path_arg(&args, "path")?;
        let recursive = args
            .get("recursive")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let target = Path::new(&path);
        let result = if target.is_dir() {
            if recursive {
                tokio::fs::remove_dir_all(target).await
            } else {
                tokio::fs::remove_dir(target).await
            }
        } else {
            tokio::fs::remove_file(target).await
        };

        match result {
            Ok(()) => Ok(ToolResult::ok(json!({ "path": path, "deleted": true }))),
            Err(e) => Ok(ToolResult::err(format!("cannot delete {path}: {e}"))),
        }
    }
}

// ─── file_move ────────────────────────────────────────────────────────────────

pub struct FileMoveTool;

#[async_trait]
impl Tool for FileMoveTool {
    fn name(&self) -> &str {
        "file_move"
    }

    fn description(&self) -> &str {
        "Move or rename a file or directory, creating destination parents."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source": { "type": "string" },
                "destination": { "type": "string" }
            },
            "required": ["source", "destination"]
        })
    }

    fn permission_level(&self) -> PermissionLevel {
        PermissionLevel::Moderate
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let source = path_arg(&args, "source")?;
        let destination = path_arg(&args, "destination")?;

        if let Some(parent) = Path::new(&destination).parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::err(format!("cannot create parent dirs: {e}")));
            }
        }
        match tokio::fs::rename(&source, &destination).await {
            Ok(()) => Ok(ToolResult::ok(
                json!({ "source": source, "destination": destination }),
            )),
            Err(e) => Ok(ToolResult::err(format!(
                "cannot move {source} to {destination}: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;

    fn storage(dir: &Path) -> Arc<StorageManager> {
        let config = StorageConfig {
            data_dir: dir.to_string_lossy().into_owned(),
            ..Default::default()
        };
        Arc::new(StorageManager::new(config, dir))
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("note.txt");
        let write = FileWriteTool::new(storage(tmp.path()));
        let r = write
            .execute(json!({"path": path.to_str().unwrap(), "content": "hello"}))
            .await
            .unwrap();
        assert!(r.success);

        let read = FileReadTool;
        let r = read
            .execute(json!({"path": path.to_str().unwrap()}))
            .await
            .unwrap();
        assert_eq!(r.data.unwrap()["content"], "hello");
    }

    #[tokio::test]
    async fn read_missing_file_is_tool_failure_not_panic() {
        let r = FileReadTool
            .execute(json!({"path": "/no/such/file"}))
            .await
            .unwrap();
        assert!(!r.success);
    }

    #[tokio::test]
    async fn list_directory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "x").unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        let r = FileListTool
            .execute(json!({"path": tmp.path().to_str().unwrap()}))
            .await
            .unwrap();
        let entries = r.data.unwrap()["entries"].as_array().unwrap().len();
        assert_eq!(entries, 2);
    }

    #[tokio::test]
    async fn oversized_write_rejected_by_quota() {
        let tmp = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            data_dir: tmp.path().to_string_lossy().into_owned(),
            max_file_size_mb: 0,
            ..Default::default()
        };
        let write = FileWriteTool::new(Arc::new(StorageManager::new(config, tmp.path())));
        let r = write
            .execute(json!({"path": tmp.path().join("x").to_str().unwrap(), "content": "data"}))
            .await
            .unwrap();
        assert!(!r.success);
    }

    #[tokio::test]
    async fn delete_and_move() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("a.txt");
        std::fs::write(&src, "x").unwrap();
        let dst = tmp.path().join("moved/b.txt");

        let r = FileMoveTool
            .execute(json!({
                "source": src.to_str().unwrap(),
                "destination": dst.to_str().unwrap(),
            }))
            .await
            .unwrap();
        assert!(r.success);
        assert!(dst.exists());

        let r = FileDeleteTool
            .execute(json!({"path": dst.to_str().unwrap()}))
            .await
            .unwrap();
        assert!(r.success);
        assert!(!dst.exists());
    }
}
