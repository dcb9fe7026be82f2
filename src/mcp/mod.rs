//! Model Context Protocol (MCP) tool servers.
//!
//! This module loads tool-server configuration and launches servers as child
//! processes speaking MCP over stdio.
//!
//! # Configuration
//!
//! Servers are configured via `mcp-config.json`:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "filesystem": {
//!       "command": "npx",
//!       "args": ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"],
//!       "capabilities": ["filesystem"]
//!     },
//!     "search": {
//!       "command": "node",
//!       "args": ["search-server/index.js"],
//!       "env": { "SEARCH_API_KEY": "${SEARCH_API_KEY}" },
//!       "capabilities": ["search"]
//!     }
//!   }
//! }
//! ```

pub mod config;
pub mod transport;

pub use config::{LaunchSpec, McpConfig, McpServerConfig};
pub use transport::{RmcpTransport, ToolSchema, ToolTransport, TransportHandle};
