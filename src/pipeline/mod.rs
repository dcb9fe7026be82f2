//! Provider pipeline: turns conversation messages plus the turn's tools into
//! an assistant response.
//!
//! # Non-streaming
//!
//! Tools are set up, messages prepared, and the model invoked once with a
//! bounded step budget. Tools are cleaned up on every exit path.
//!
//! # Streaming
//!
//! Two invocations share one output stream:
//!
//! 1. **Analysis**: a short invocation deciding which tools are needed. Its
//!    events are merged without the `done` boundary.
//! 2. **Generation**: the prepared messages plus phase one's intermediate
//!    messages (reshaped per [`IntermediatePolicy`]). Its events are merged
//!    without the `stream.start` boundary.
//!
//! Both phases run in a spawned task that cleans tools up only after the
//! reader has consumed the combined stream or gone away.

pub mod factory;
pub mod messages;
pub mod stream;

pub use factory::{AiConfig, ProviderFactory};
pub use messages::{
    GeoLocation, IntermediatePolicy, RequestContext, SYSTEM_PROMPT, prepare_messages,
};
pub use stream::{
    DataStreamReader, DataStreamWriter, Drained, MergeOptions, STREAM_ERROR_CODE, StreamClosed,
    StreamCompletion, data_stream,
};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::llm::{LanguageModel, LlmResponse, Message, ModelRequest, ModelStream};
use crate::tools::{ToolLifecycle, ToolNamespace};

/// Returned when the model produced no usable text.
pub const FALLBACK_RESPONSE: &str = "I apologize, but I was unable to generate a response.";

/// System instruction for the streaming analysis phase.
pub const ANALYSIS_INSTRUCTION: &str =
    "Analyze the user request and determine required tools. Respond concisely if no tools are needed.";

/// One provider bound to one turn's tools.
#[derive(Clone)]
pub struct ProviderPipeline {
    label: String,
    model: Arc<dyn LanguageModel>,
    tools: Arc<dyn ToolLifecycle>,
    policy: IntermediatePolicy,
    settings: PipelineConfig,
}

impl std::fmt::Debug for ProviderPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderPipeline")
            .field("label", &self.label)
            .field("policy", &self.policy)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ProviderPipeline {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        tools: Arc<dyn ToolLifecycle>,
        policy: IntermediatePolicy,
        settings: PipelineConfig,
    ) -> Self {
        Self {
            label: "custom".to_string(),
            model,
            tools,
            policy,
            settings,
        }
    }

    /// Name used in logs.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn policy(&self) -> IntermediatePolicy {
        self.policy
    }

    /// Generate a complete response.
    ///
    /// Runs on its own task so tool cleanup completes even if the caller
    /// stops waiting.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if tools cannot be set up or the model call
    /// fails. Tools have been cleaned up in either case.
    pub async fn generate_response(
        &self,
        messages: Vec<Message>,
        ctx: &RequestContext,
    ) -> Result<LlmResponse, PipelineError> {
        let pipeline = self.clone();
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let outcome = catch_panic(pipeline.respond(messages, &ctx)).await;
            pipeline.tools.cleanup_tools().await;
            if let Err(e) = &outcome {
                tracing::error!(provider = %pipeline.label, error = %e, "Error generating response");
            }
            outcome
        })
        .await?
    }

    async fn respond(
        &self,
        messages: Vec<Message>,
        ctx: &RequestContext,
    ) -> Result<LlmResponse, PipelineError> {
        let tools = self.tools.setup_tools().await?;
        let prepared = prepare_messages(messages, ctx);

        tracing::info!(
            provider = %self.label,
            message_count = prepared.len(),
            tool_count = tools.len(),
            "Generating response"
        );

        let result = self
            .model
            .generate(ModelRequest {
                messages: prepared,
                tools,
                system: None,
                temperature: self.settings.temperature,
                max_steps: self.settings.max_steps,
            })
            .await?;

        let content = self.tools.parse_tool_results(&result);
        if content.trim().is_empty() {
            tracing::warn!(provider = %self.label, "Model produced no usable text; using fallback");
            return Ok(LlmResponse::assistant(FALLBACK_RESPONSE));
        }
        Ok(LlmResponse::assistant(content))
    }

    /// Start a two-phase streamed response written into `writer`.
    ///
    /// Returns once phase one is running. Tools stay alive until the reader
    /// paired with `writer` has consumed both phases (or been dropped); then
    /// the orchestration task cleans them up.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if tools cannot be set up or phase one cannot
    /// be started. An error record has been written and tools cleaned up.
    pub async fn generate_stream_response(
        &self,
        messages: Vec<Message>,
        ctx: &RequestContext,
        writer: DataStreamWriter,
    ) -> Result<StreamCompletion, PipelineError> {
        let started = catch_panic(self.start_analysis(messages, ctx)).await;
        let (analysis, prepared, tools) = match started {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!(provider = %self.label, error = %e, "Failed to start streaming response");
                self.tools.cleanup_tools().await;
                if writer.write_error(e.to_string()).is_err() {
                    tracing::warn!(provider = %self.label, "Failed to send error via data stream");
                }
                return Err(e);
            }
        };

        let pipeline = self.clone();
        let handle = tokio::spawn(async move {
            let outcome = catch_panic(pipeline.run_phases(analysis, prepared, tools, &writer)).await;
            if let Err(e) = &outcome {
                tracing::error!(provider = %pipeline.label, error = %e, "Error in streaming response");
                if writer.write_error(e.to_string()).is_err() {
                    tracing::warn!(provider = %pipeline.label, "Failed to send error via data stream");
                }
            }
            let drained = writer.drained();
            drop(writer);
            drained.wait().await;
            pipeline.tools.cleanup_tools().await;
            tracing::debug!(provider = %pipeline.label, "Stream drained; tools cleaned up");
            outcome
        });

        Ok(StreamCompletion::new(handle))
    }

    async fn start_analysis(
        &self,
        messages: Vec<Message>,
        ctx: &RequestContext,
    ) -> Result<(ModelStream, Vec<Message>, ToolNamespace), PipelineError> {
        let tools = self.tools.setup_tools().await?;
        let prepared = prepare_messages(messages, ctx);

        tracing::info!(
            provider = %self.label,
            phase = "analysis",
            message_count = prepared.len(),
            tool_count = tools.len(),
            "Starting streaming response"
        );

        let analysis = self
            .model
            .stream(ModelRequest {
                messages: prepared.clone(),
                tools: tools.clone(),
                system: Some(ANALYSIS_INSTRUCTION.to_string()),
                temperature: self.settings.analysis_temperature,
                max_steps: self.settings.analysis_max_steps,
            })
            .await?;
        Ok((analysis, prepared, tools))
    }

    async fn run_phases(
        &self,
        analysis: ModelStream,
        prepared: Vec<Message>,
        tools: ToolNamespace,
        writer: &DataStreamWriter,
    ) -> Result<(), PipelineError> {
        let ModelStream { events, response } = analysis;
        writer
            .merge(
                events,
                MergeOptions {
                    send_start: true,
                    send_finish: false,
                },
            )
            .await?;

        let analysis = response.await?;
        let intermediate = self.policy.apply(analysis.messages);
        tracing::info!(
            provider = %self.label,
            phase = "generation",
            tool_results = analysis.tool_results.len(),
            intermediate_messages = intermediate.len(),
            "Analysis finished; starting generation"
        );

        let mut messages = prepared;
        messages.extend(intermediate);

        let generation = self
            .model
            .stream(ModelRequest {
                messages,
                tools,
                system: None,
                temperature: self.settings.generation_temperature,
                max_steps: self.settings.generation_max_steps,
            })
            .await?;

        let ModelStream { events, response } = generation;
        writer
            .merge(
                events,
                MergeOptions {
                    send_start: false,
                    send_finish: true,
                },
            )
            .await?;
        let generated = response.await?;

        tracing::info!(
            provider = %self.label,
            text_length = generated.text.len(),
            tool_results = generated.tool_results.len(),
            "Streaming response complete"
        );
        Ok(())
    }
}

/// Turn a panic inside a turn into an error so cleanup still runs.
async fn catch_panic<T, F>(fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    AssertUnwindSafe(fut).catch_unwind().await.unwrap_or_else(|_| {
        tracing::error!("Panic during turn; cleaning up tools");
        Err(PipelineError::Panicked)
    })
}
