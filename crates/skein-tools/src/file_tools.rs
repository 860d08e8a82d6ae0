//! File tools: read, write, edit and list a directory.
//!
//! Every path argument is resolved against the agent workspace and must
//! stay inside it after symlinks are followed. Absolute paths and `..`
//! segments are accepted only when they resolve back into the workspace.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use skein_core::tools::registry::{Tool, ToolContext, ToolError};

/// Largest file `read_file` returns whole.
const MAX_READ_BYTES: u64 = 1024 * 1024;

/// Directory the file tools are confined to.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical workspace root, created on first use.
    async fn canonical_root(&self) -> Result<PathBuf, ToolError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("workspace unavailable: {e}")))?;
        tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("workspace unavailable: {e}")))
    }

    /// Resolve a path that must already exist.
    pub async fn resolve_existing(&self, path: &str) -> Result<PathBuf, ToolError> {
        let root = self.canonical_root().await?;
        let canonical = tokio::fs::canonicalize(root.join(path))
            .await
            .map_err(|_| ToolError::FileNotFound(path.to_string()))?;
        if !canonical.starts_with(&root) {
            return Err(escapes(path));
        }
        Ok(canonical)
    }

    /// Resolve a path that may not exist yet (write targets).
    ///
    /// The path is normalized lexically, then its deepest existing
    /// ancestor is canonicalized so a symlinked directory cannot lead
    /// outside the workspace either.
    pub async fn resolve_new(&self, path: &str) -> Result<PathBuf, ToolError> {
        let root = self.canonical_root().await?;
        let target = normalize(&root.join(path));
        if !target.starts_with(&root) || target == root {
            return Err(escapes(path));
        }

        let mut ancestor = target.as_path();
        while !tokio::fs::try_exists(ancestor).await.unwrap_or(false) {
            ancestor = ancestor.parent().ok_or_else(|| escapes(path))?;
        }
        let canonical_ancestor = tokio::fs::canonicalize(ancestor)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        if !canonical_ancestor.starts_with(&root) {
            return Err(escapes(path));
        }
        Ok(target)
    }
}

fn escapes(path: &str) -> ToolError {
    ToolError::InvalidPath(format!("path escapes workspace: {path}"))
}

/// Drop `.` and fold `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArgs(format!("missing required field: {field}")))
}

fn io_error(action: &str, path: &str, e: std::io::Error) -> ToolError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ToolError::FileNotFound(path.to_string())
    } else {
        ToolError::ExecutionFailed(format!("{action} failed: {e}"))
    }
}

// ── read_file ────────────────────────────────────────────────────────────

/// Read a UTF-8 text file inside the workspace.
pub struct ReadFileTool {
    workspace: Workspace,
}

impl ReadFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file in the workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path, relative to the workspace"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let path = required_str(&args, "path")?;
        let target = self.workspace.resolve_existing(path).await?;

        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|e| io_error("stat", path, e))?;
        if meta.is_dir() {
            return Err(ToolError::InvalidArgs(format!("{path} is a directory")));
        }
        if meta.len() > MAX_READ_BYTES {
            return Err(ToolError::ExecutionFailed(format!(
                "{path} is {} bytes; the limit is {MAX_READ_BYTES}",
                meta.len()
            )));
        }

        debug!(path = %target.display(), "reading file");
        let content = tokio::fs::read_to_string(&target)
            .await
            .map_err(|e| io_error("read", path, e))?;
        Ok(json!({ "content": content }))
    }
}

// ── write_file ───────────────────────────────────────────────────────────

/// Write a file inside the workspace, creating parent directories.
pub struct WriteFileTool {
    workspace: Workspace,
}

impl WriteFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file in the workspace. Creates parent directories and overwrites existing files."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path, relative to the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "Full new content of the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let target = self.workspace.resolve_new(path).await?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create directory", path, e))?;
        }
        debug!(path = %target.display(), bytes = content.len(), "writing file");
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| io_error("write", path, e))?;

        Ok(json!({
            "message": format!("wrote {} bytes to {path}", content.len())
        }))
    }
}

// ── edit_file ────────────────────────────────────────────────────────────

/// Replace one exact occurrence of `old_text` in a workspace file.
pub struct EditFileTool {
    workspace: Workspace,
}

impl EditFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace old_text with new_text in a workspace file. old_text must occur exactly once."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path, relative to the workspace"
                },
                "old_text": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Exact text to replace"
                },
                "new_text": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let path = required_str(&args, "path")?;
        let old_text = required_str(&args, "old_text")?;
        let new_text = required_str(&args, "new_text")?;
        let target = self.workspace.resolve_existing(path).await?;

        let content = tokio::fs::read_to_string(&target)
            .await
            .map_err(|e| io_error("read", path, e))?;

        match content.matches(old_text).count() {
            0 => {
                return Err(ToolError::InvalidArgs(format!(
                    "old_text not found in {path}"
                )));
            }
            1 => {}
            n => {
                return Err(ToolError::InvalidArgs(format!(
                    "old_text appears {n} times in {path}; add context to make it unique"
                )));
            }
        }

        debug!(path = %target.display(), "editing file");
        tokio::fs::write(&target, content.replacen(old_text, new_text, 1))
            .await
            .map_err(|e| io_error("write", path, e))?;
        Ok(json!({ "message": format!("edited {path}") }))
    }
}

// ── list_dir ─────────────────────────────────────────────────────────────

/// List a workspace directory, sorted by name.
pub struct ListDirTool {
    workspace: Workspace,
}

impl ListDirTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a workspace directory with name, is_dir and size."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path, relative to the workspace (default \".\")"
                }
            }
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let target = self.workspace.resolve_existing(path).await?;

        let mut reader = tokio::fs::read_dir(&target)
            .await
            .map_err(|e| io_error("list", path, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| io_error("list", path, e))?
        {
            let (is_dir, size) = match entry.metadata().await {
                Ok(m) => (m.is_dir(), m.len()),
                Err(_) => (false, 0),
            };
            entries.push((entry.file_name().to_string_lossy().into_owned(), is_dir, size));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        debug!(path = %target.display(), count = entries.len(), "listed directory");
        let entries: Vec<Value> = entries
            .into_iter()
            .map(|(name, is_dir, size)| json!({ "name": name, "is_dir": is_dir, "size": size }))
            .collect();
        Ok(json!({ "entries": entries }))
    }
}
