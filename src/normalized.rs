//! Normalized event types for streaming model responses.
//!
//! This module defines a unified event model that abstracts over provider
//! wire formats and gives clients one consistent set of streaming events.
//!
//! # Event Types
//!
//! The [`NormalizedEvent`] enum covers:
//! - Message deltas for incremental text output
//! - Tool call lifecycle (delta, complete, result)
//! - Stream lifecycle (start, done, error)
//!
//! # Example
//!
//! ```rust
//! use waypoint::normalized::{NormalizedEvent, sse_event};
//!
//! let event = NormalizedEvent::MessageDelta {
//!     text: "Hello".to_string(),
//! };
//! let sse = sse_event(&event);
//! assert!(sse.contains("message.delta"));
//! ```

use serde::{Deserialize, Serialize};

/// Normalized streaming events.
///
/// `StreamStart` and `Done` are the stream boundaries. When two model phases
/// are merged into one output stream, the first keeps its start and the
/// second keeps its finish.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum NormalizedEvent {
    /// Indicates the start of a new streaming response.
    #[serde(rename = "stream.start")]
    StreamStart {
        /// Unique identifier for this request/response pair.
        request_id: String,
    },

    /// Incremental text delta from the assistant's response.
    #[serde(rename = "message.delta")]
    MessageDelta {
        /// The text fragment to append.
        text: String,
    },

    /// Incremental tool call delta (streaming tool call assembly).
    #[serde(rename = "tool_call.delta")]
    ToolCallDelta {
        /// Index of this tool call in the current batch.
        call_index: usize,
        /// Tool call ID (may arrive in first delta or later).
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Tool/function name (may arrive in first delta or later).
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Incremental arguments JSON fragment.
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments_delta: Option<String>,
    },

    /// Tool call is fully assembled and ready for execution.
    #[serde(rename = "tool_call.complete")]
    ToolCallComplete {
        call_index: usize,
        id: String,
        name: String,
        /// Complete arguments as JSON string.
        arguments_json: String,
    },

    /// Result from executing a tool.
    #[serde(rename = "tool_result")]
    ToolResult {
        /// Tool call ID this result corresponds to.
        id: String,
        name: String,
        /// Raw result payload as JSON text.
        content: String,
        #[serde(default = "default_true")]
        success: bool,
    },

    /// An error occurred during streaming.
    #[serde(rename = "error")]
    Error {
        message: String,
        /// Optional error code for programmatic handling.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Stream has completed successfully.
    #[serde(rename = "done")]
    Done,
}

fn default_true() -> bool {
    true
}

/// Convert a [`NormalizedEvent`] to an SSE-formatted string.
///
/// The output carries an `event:` line (for `EventSource` listeners) and a
/// `data:` line containing the JSON payload.
///
/// ```rust
/// use waypoint::normalized::{NormalizedEvent, sse_event};
///
/// let sse = sse_event(&NormalizedEvent::Done);
/// assert!(sse.contains("event: done"));
/// ```
pub fn sse_event(evt: &NormalizedEvent) -> String {
    let json = event_json(evt);
    let event_name = event_name(evt);

    format!("event: {event_name}\ndata: {json}\n\n")
}

/// JSON payload of an event, as carried in the SSE `data:` field.
pub fn event_json(evt: &NormalizedEvent) -> String {
    serde_json::to_string(evt).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "data": { "message": e.to_string() } }).to_string()
    })
}

/// Get the SSE event name for a [`NormalizedEvent`].
pub fn event_name(evt: &NormalizedEvent) -> &'static str {
    match evt {
        NormalizedEvent::StreamStart { .. } => "stream.start",
        NormalizedEvent::MessageDelta { .. } => "message.delta",
        NormalizedEvent::ToolCallDelta { .. } => "tool_call.delta",
        NormalizedEvent::ToolCallComplete { .. } => "tool_call.complete",
        NormalizedEvent::ToolResult { .. } => "tool_result",
        NormalizedEvent::Error { .. } => "error",
        NormalizedEvent::Done => "done",
    }
}
