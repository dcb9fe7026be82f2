//! Tool adapters: one wrapper per external tool-provider process.

use std::{collections::BTreeSet, fmt, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{AdapterStartError, AdapterStopError, ResultParseError};
use crate::mcp::{LaunchSpec, McpServerConfig, ToolTransport, TransportHandle};

use super::definition::{ToolDefinition, ToolSet};

/// Lifecycle of an adapter. Adapters are one-shot: once stopped they are never
/// restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Uninitialized,
    Running,
    Stopped,
}

impl AdapterState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider of named tools.
///
/// Implemented by [`McpToolAdapter`] for subprocess-backed servers; other
/// provider kinds implement the same trait without touching the manager.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Identity, unique within one tool manager.
    fn server_id(&self) -> &str;

    /// Declared capability tags.
    fn capabilities(&self) -> &BTreeSet<String>;

    fn has_capability(&self, tag: &str) -> bool {
        self.capabilities().contains(tag)
    }

    /// Start the provider and return the tools it exposes.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterStartError`] if the provider cannot be launched or its
    /// tools cannot be listed. No partial tool set is returned.
    async fn start(&self) -> Result<ToolSet, AdapterStartError>;

    /// Stop the provider. Stopping a stopped or never-started adapter is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterStopError`] if the transport failed to close. Callers
    /// report it and carry on.
    async fn stop(&self) -> Result<(), AdapterStopError>;

    async fn state(&self) -> AdapterState;

    /// Render a raw invocation result as text for the model or the user.
    ///
    /// # Errors
    ///
    /// Returns [`ResultParseError`] when the payload is structurally invalid.
    fn parse_result(&self, raw: &Value) -> Result<String, ResultParseError> {
        render_tool_result(self.server_id(), raw)
    }
}

/// Render a raw tool result.
///
/// Explicit error statuses become a tagged failure string, content lists are
/// rendered item by item, and anything else is pretty-printed JSON.
///
/// # Errors
///
/// Returns [`ResultParseError`] if a content item has no string `type`.
pub fn render_tool_result(server_id: &str, raw: &Value) -> Result<String, ResultParseError> {
    let Some(obj) = raw.as_object() else {
        return Ok(pretty(raw));
    };

    if obj.get("status").and_then(Value::as_str) == Some("error") {
        let message = obj
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or("Unknown error");
        tracing::error!(server_id = %server_id, error = %message, "Tool execution failed");
        return Ok(format!("Tool execution failed: {message}"));
    }

    if obj.get("isError").and_then(Value::as_bool) == Some(true) {
        let message = match obj.get("content").and_then(Value::as_array) {
            Some(items) => render_content(server_id, items)?,
            None => String::new(),
        };
        let message = if message.is_empty() {
            "Unknown error".to_string()
        } else {
            message
        };
        tracing::error!(server_id = %server_id, error = %message, "Tool execution failed");
        return Ok(format!("Tool execution failed: {message}"));
    }

    if obj.get("status").and_then(Value::as_str) == Some("success") {
        if let Some(message) = obj.get("message").and_then(Value::as_str) {
            return Ok(message.to_string());
        }
    }

    if let Some(items) = obj.get("content").and_then(Value::as_array) {
        return render_content(server_id, items);
    }

    tracing::debug!(
        server_id = %server_id,
        "Result structure not recognized, serializing raw result"
    );
    Ok(pretty(raw))
}

fn render_content(server_id: &str, items: &[Value]) -> Result<String, ResultParseError> {
    let mut parts = Vec::with_capacity(items.len());

    for (idx, item) in items.iter().enumerate() {
        let kind = item
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ResultParseError {
                server_id: server_id.to_string(),
                reason: format!("content item {idx} has no type"),
            })?;

        let rendered = match kind {
            "text" => item
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            "resource" => match item.pointer("/resource/text").and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None => format!("[Unsupported content type: {kind}]"),
            },
            "image" => {
                let mime = item
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown type");
                format!("[Image data: {mime}]")
            }
            other => {
                tracing::warn!(server_id = %server_id, item_type = %other, "Unsupported content item type");
                format!("[Unsupported content type: {other}]")
            }
        };

        if !rendered.is_empty() {
            parts.push(rendered);
        }
    }

    Ok(parts.join("\n"))
}

fn pretty(raw: &Value) -> String {
    serde_json::to_string_pretty(raw).unwrap_or_else(|_| raw.to_string())
}

struct Slot {
    state: AdapterState,
    handle: Option<Arc<dyn TransportHandle>>,
}

/// Adapter for one MCP server launched as a child process.
pub struct McpToolAdapter {
    server_id: String,
    launch: LaunchSpec,
    capabilities: BTreeSet<String>,
    transport: Arc<dyn ToolTransport>,
    slot: Mutex<Slot>,
}

impl fmt::Debug for McpToolAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpToolAdapter")
            .field("server_id", &self.server_id)
            .field("command", &self.launch.command)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl McpToolAdapter {
    pub fn new(
        server_id: impl Into<String>,
        config: &McpServerConfig,
        transport: Arc<dyn ToolTransport>,
    ) -> Self {
        let server_id = server_id.into();
        let capabilities: BTreeSet<String> = config.capabilities.iter().cloned().collect();
        tracing::info!(
            server_id = %server_id,
            capabilities = ?capabilities,
            "Initialized tool adapter"
        );
        Self {
            server_id,
            launch: config.launch_spec(),
            capabilities,
            transport,
            slot: Mutex::new(Slot {
                state: AdapterState::Uninitialized,
                handle: None,
            }),
        }
    }
}

#[async_trait]
impl ToolAdapter for McpToolAdapter {
    fn server_id(&self) -> &str {
        &self.server_id
    }

    fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    async fn start(&self) -> Result<ToolSet, AdapterStartError> {
        let mut slot = self.slot.lock().await;
        if slot.state != AdapterState::Uninitialized {
            return Err(AdapterStartError::new(
                &self.server_id,
                format!("adapter is {} and cannot be restarted", slot.state),
            ));
        }

        tracing::info!(server_id = %self.server_id, command = %self.launch.command, "Starting tool server");
        let handle = self
            .transport
            .connect(&self.server_id, &self.launch)
            .await
            .map_err(|e| AdapterStartError::new(&self.server_id, e))?;

        let schemas = match handle.list_tools().await {
            Ok(schemas) => schemas,
            Err(e) => {
                if let Err(close_err) = handle.close().await {
                    tracing::warn!(
                        server_id = %self.server_id,
                        error = %close_err,
                        "Failed to close tool server after listing failed"
                    );
                }
                slot.state = AdapterState::Stopped;
                return Err(AdapterStartError::new(&self.server_id, e));
            }
        };

        let tools: ToolSet = schemas
            .into_iter()
            .map(|schema| ToolDefinition::new(schema, &self.server_id, Arc::clone(&handle)))
            .collect();

        tracing::info!(
            server_id = %self.server_id,
            tools = ?tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "Tool server started"
        );

        slot.handle = Some(handle);
        slot.state = AdapterState::Running;
        Ok(tools)
    }

    async fn stop(&self) -> Result<(), AdapterStopError> {
        let mut slot = self.slot.lock().await;
        if slot.state != AdapterState::Running {
            tracing::debug!(
                server_id = %self.server_id,
                state = %slot.state,
                "Tool server already stopped or never started"
            );
            return Ok(());
        }

        slot.state = AdapterState::Stopped;
        let Some(handle) = slot.handle.take() else {
            return Ok(());
        };

        match handle.close().await {
            Ok(()) => {
                tracing::info!(server_id = %self.server_id, "Tool server stopped");
                Ok(())
            }
            Err(e) => Err(AdapterStopError::new(&self.server_id, e)),
        }
    }

    async fn state(&self) -> AdapterState {
        self.slot.lock().await.state
    }
}
