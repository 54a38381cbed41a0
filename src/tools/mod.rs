pub mod executor;
pub mod file_ops;
pub mod registry;
pub mod shell;
pub mod traits;

use std::sync::Arc;

pub use executor::{ApprovalCallback, ToolExecutor};
pub use file_ops::{FileDeleteTool, FileListTool, FileMoveTool, FileReadTool, FileWriteTool};
pub use registry::{ToolDescriptor, ToolRegistry};
pub use shell::ShellExecuteTool;
pub use traits::{PermissionLevel, Tool, ToolOrigin, ToolResult};

use crate::config::ShellConfig;
use crate::runtime::{ProcessRegistry, StorageManager};

/// Register the built-in native tools.
pub fn register_native_tools(
    registry: &ToolRegistry,
    shell_config: ShellConfig,
    processes: Arc<ProcessRegistry>,
    storage: Arc<StorageManager>,
) {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(ShellExecuteTool::new(shell_config, processes)),
        Arc::new(FileReadTool),
        Arc::new(FileListTool),
        Arc::new(FileWriteTool::new(storage)),
        Arc::new(FileDeleteTool),
        Arc::new(FileMoveTool),
    ];
    for tool in tools {
        if let Err(e) = registry.register(tool) {
            log::warn!("native tool registration skipped: {e}");
        }
    }
}
