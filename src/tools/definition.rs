//! Tool definitions and the merged per-turn namespace.

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::mcp::{ToolSchema, TransportHandle};

/// One callable tool as exposed by one adapter.
///
/// Names are unique within an adapter only. `server_id` identifies the owning
/// adapter for lookups; the definition does not own it.
///
/// `name` is the name offered to the model and used for routing; it only
/// contains `[a-zA-Z0-9_-]`. `remote_name` is the name the server listed.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub remote_name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
    pub server_id: String,
    invoker: Arc<dyn TransportHandle>,
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("remote_name", &self.remote_name)
            .field("server_id", &self.server_id)
            .finish()
    }
}

impl ToolDefinition {
    pub fn new(
        schema: ToolSchema,
        server_id: impl Into<String>,
        invoker: Arc<dyn TransportHandle>,
    ) -> Self {
        Self {
            name: sanitize_tool_name(&schema.name),
            remote_name: schema.name,
            description: schema.description,
            input_schema: schema.input_schema,
            server_id: server_id.into(),
            invoker,
        }
    }

    /// Execute the tool on its owning server.
    pub async fn invoke(&self, arguments: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        self.invoker.call_tool(&self.remote_name, arguments).await
    }

    /// `OpenAI` function-tool JSON for this definition, exposed as `exposed_name`.
    #[must_use]
    pub fn openai_tool_json(&self, exposed_name: &str) -> serde_json::Value {
        let params = if self.input_schema.is_object() {
            self.input_schema.clone()
        } else {
            serde_json::json!({"type": "object", "properties": {}})
        };
        serde_json::json!({
            "type": "function",
            "function": {
                "name": exposed_name,
                "description": self.description.as_deref().unwrap_or(""),
                "parameters": params
            }
        })
    }
}

/// Replace every character function-calling APIs reject with `_`.
fn sanitize_tool_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

/// Tools exposed by a single adapter, in the order the server listed them.
pub type ToolSet = Vec<ToolDefinition>;

/// Conflict-resolved mapping from tool name to the single chosen definition.
///
/// Built once per `setup_tools` call and never mutated afterwards; clones share
/// the same map.
#[derive(Debug, Clone, Default)]
pub struct ToolNamespace {
    tools: Arc<BTreeMap<String, ToolDefinition>>,
}

impl ToolNamespace {
    #[must_use]
    pub fn new(tools: BTreeMap<String, ToolDefinition>) -> Self {
        Self {
            tools: Arc::new(tools),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ToolDefinition)> {
        self.tools.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// All tools in `OpenAI` function schema format.
    #[must_use]
    pub fn openai_tools_json(&self) -> Vec<serde_json::Value> {
        self.tools
            .iter()
            .map(|(name, def)| def.openai_tool_json(name))
            .collect()
    }
}
