//! Waypoint
//!
//! A tool-using assistant backend. Each conversational turn starts the
//! configured MCP tool servers, merges their tools into one namespace, runs
//! the model (optionally as a two-phase stream), and shuts the servers down
//! once the response has been fully delivered.
//!
//! # Modules
//!
//! - [`mcp`]: tool-server configuration and the MCP transport
//! - [`tools`]: tool adapters and the per-turn tool manager
//! - [`llm`]: model invocation (drivers, tool loop, providers)
//! - [`pipeline`]: message preparation and the streaming protocol
//! - [`normalized`]: unified streaming event model
//! - [`server`]: HTTP surface

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]

pub mod config;
pub mod error;
pub mod llm;
pub mod mcp;
pub mod normalized;
pub mod pipeline;
pub mod server;
pub mod tools;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::mcp::{McpConfig, ToolTransport};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Global configuration.
    pub config: Arc<AppConfig>,
    /// Tool servers started for every turn.
    pub mcp: Arc<McpConfig>,
    /// How tool servers are launched.
    pub transport: Arc<dyn ToolTransport>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("mcp", &self.mcp)
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(config: AppConfig, mcp: McpConfig, transport: Arc<dyn ToolTransport>) -> Self {
        Self {
            config: Arc::new(config),
            mcp: Arc::new(mcp),
            transport,
        }
    }
}
