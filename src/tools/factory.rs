use std::sync::Arc;

use crate::mcp::{McpConfig, ToolTransport};

use super::adapter::{McpToolAdapter, ToolAdapter};

/// One adapter per configured server, in configuration order.
///
/// Nothing is launched here; servers start on `setup_tools`.
pub fn create_adapters(
    config: &McpConfig,
    transport: Arc<dyn ToolTransport>,
) -> Vec<Arc<dyn ToolAdapter>> {
    config
        .mcp_servers
        .iter()
        .map(|(id, server)| {
            let adapter: Arc<dyn ToolAdapter> =
                Arc::new(McpToolAdapter::new(id, server, Arc::clone(&transport)));
            adapter
        })
        .collect()
}
