//! Tool adapters and the tool manager.
//!
//! An adapter wraps one external tool server: it starts and stops the server,
//! exposes its tools, and interprets its raw results. The [`ToolManager`]
//! drives every configured adapter for one conversational turn.
//!
//! # Lifecycle
//!
//! ```text
//! idle --setup_tools--> tools-set-up --cleanup_tools--> cleaned-up
//!   \___________________cleanup_tools__________________/
//! ```

pub mod adapter;
pub mod definition;
pub mod factory;
pub mod manager;

pub use adapter::{AdapterState, McpToolAdapter, ToolAdapter, render_tool_result};
pub use definition::{ToolDefinition, ToolNamespace, ToolSet};
pub use factory::create_adapters;
pub use manager::{
    ConflictResolution, ManagerState, PRIORITY_CAPABILITIES, ToolConflict, ToolLifecycle,
    ToolManager,
};
