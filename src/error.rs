//! Error taxonomy for tool adapters, the tool manager, and the provider pipeline.
//!
//! Failures local to one adapter or one tool result are absorbed by the
//! [`ToolManager`](crate::tools::ToolManager) and degrade gracefully. Failures
//! of the model invocation itself surface as [`ModelInvocationError`] and end
//! the turn.

use thiserror::Error;

/// Boxed cause carried by adapter errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A tool subprocess or its transport failed to initialise.
#[derive(Debug, Error)]
#[error("failed to start tool server '{server_id}': {source}")]
pub struct AdapterStartError {
    /// Server that failed.
    pub server_id: String,
    /// Underlying cause.
    #[source]
    pub source: BoxError,
}

impl AdapterStartError {
    pub fn new(server_id: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            server_id: server_id.into(),
            source: source.into(),
        }
    }
}

/// Closing a tool transport failed. Always non-fatal.
#[derive(Debug, Error)]
#[error("failed to stop tool server '{server_id}': {source}")]
pub struct AdapterStopError {
    /// Server that failed.
    pub server_id: String,
    /// Underlying cause.
    #[source]
    pub source: BoxError,
}

impl AdapterStopError {
    pub fn new(server_id: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            server_id: server_id.into(),
            source: source.into(),
        }
    }
}

/// A raw tool result could not be interpreted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("could not parse result of tool server '{server_id}': {reason}")]
pub struct ResultParseError {
    /// Server whose parser rejected the payload.
    pub server_id: String,
    /// What was wrong with the payload.
    pub reason: String,
}

/// The model call itself failed. Fatal to the current turn.
#[derive(Debug, Error)]
pub enum ModelInvocationError {
    /// HTTP transport failure or non-success status.
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a payload that could not be decoded.
    #[error("malformed model response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The backend broke the streaming protocol.
    #[error("model protocol error: {0}")]
    Protocol(String),

    /// The structured response was requested but the stream ended without one.
    #[error("model stream ended before a response was produced")]
    Incomplete,
}

/// Misuse of the tool manager's lifecycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolManagerError {
    /// `setup_tools` was called outside the `idle` state.
    #[error("tool manager cannot set up tools in state '{0}'")]
    InvalidState(&'static str),
}

/// Failures of a provider pipeline turn.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Tools(#[from] ToolManagerError),

    #[error(transparent)]
    Model(#[from] ModelInvocationError),

    /// The turn's task was aborted.
    #[error("stream orchestration task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A tool or model implementation panicked during the turn.
    #[error("turn aborted by a panic")]
    Panicked,
}

/// Provider selection failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FactoryError {
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("invalid base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("no model configured for provider '{0}'")]
    MissingModel(String),
}
