//! Tool implementations for skein.
//!
//! # Tools
//!
//! - **File** ([`file_tools`]): `read_file`, `write_file`, `edit_file` and
//!   `list_dir`, confined to the agent workspace.
//! - **Shell** ([`shell_tool`]): `exec` runs a command in the workspace
//!   with a timeout. Disabled with `tools.exec.enabled = false`.
//! - **Spawn** ([`spawn_tool`]): `spawn` runs an isolated nested agent on a
//!   sub-task and returns its final answer.

pub mod file_tools;
pub mod shell_tool;
pub mod spawn_tool;

use std::sync::Arc;

use skein_core::tools::registry::{ToolError, ToolRegistry};
use skein_llm::Model;
use skein_types::config::Config;
use tracing::debug;

use crate::file_tools::{EditFileTool, ListDirTool, ReadFileTool, Workspace, WriteFileTool};
use crate::shell_tool::ExecTool;
use crate::spawn_tool::SpawnTool;

/// Register all built-in tools with `registry`.
pub fn register_all(
    registry: &mut ToolRegistry,
    model: Arc<dyn Model>,
    config: &Config,
) -> Result<(), ToolError> {
    let workspace = Workspace::new(config.workspace_path());
    registry.register(Arc::new(ReadFileTool::new(workspace.clone())))?;
    registry.register(Arc::new(WriteFileTool::new(workspace.clone())))?;
    registry.register(Arc::new(EditFileTool::new(workspace.clone())))?;
    registry.register(Arc::new(ListDirTool::new(workspace)))?;

    if config.tools.exec.enabled {
        registry.register(Arc::new(ExecTool::new(
            config.workspace_path(),
            &config.tools.exec,
        )))?;
    }

    registry.register(Arc::new(SpawnTool::new(model, config)))?;
    debug!(tools = registry.len(), "registered built-in tools");
    Ok(())
}
