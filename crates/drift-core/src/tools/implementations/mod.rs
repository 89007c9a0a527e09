//! Built-in tool implementations

pub mod control;
pub mod custom;
pub mod delete_file;
pub mod list_files;
pub mod read_file;
pub mod run_code;
pub mod write_file;

use std::sync::Arc;

use crate::error::RuntimeError;
use crate::tools::registry::ToolRegistry;

pub use control::{CompleteTaskTool, ManageContextTool};
pub use custom::{load_custom_tools, CreateToolTool, CustomScriptTool, CustomToolSpec, DeleteToolTool};
pub use delete_file::DeleteFileTool;
pub use list_files::ListFilesTool;
pub use read_file::ReadFileTool;
pub use run_code::RunCodeTool;
pub use write_file::WriteFileTool;

/// Register the protected core tool set for a main agent.
pub fn register_core_tools(
    registry: &ToolRegistry,
    enable_code_execution: bool,
) -> Result<(), RuntimeError> {
    registry.register(Arc::new(ReadFileTool))?;
    registry.register(Arc::new(WriteFileTool))?;
    registry.register(Arc::new(ListFilesTool))?;
    registry.register(Arc::new(DeleteFileTool))?;
    if enable_code_execution {
        registry.register(Arc::new(RunCodeTool))?;
    }
    registry.register(Arc::new(CompleteTaskTool))?;
    registry.register(Arc::new(ManageContextTool))?;
    Ok(())
}
