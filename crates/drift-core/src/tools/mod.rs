//! Tool execution framework
//!
//! Provides the registry, the sandboxed workspace filesystem, argument
//! validation, and the built-in tool implementations.

pub mod implementations;
pub mod registry;
pub mod schema;
pub mod workspace;

pub use implementations::register_core_tools;
pub use registry::{
    parse_params, strip_description, Invocation, RegistrySnapshot, Tool, ToolCategory, ToolContext,
    ToolInfo, ToolOutcome, ToolRegistry, COMPLETE_TASK_TOOL, DESCRIPTION_FIELD, MANAGE_CONTEXT_TOOL,
};
pub use workspace::{FileEntry, WorkspaceFS};
