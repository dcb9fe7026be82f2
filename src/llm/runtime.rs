//! Bounded tool-call loop over an [`LlmDriver`].
//!
//! Each step streams one completion. If the model asks for tools, they are
//! executed against the request's [`ToolNamespace`](crate::tools::ToolNamespace),
//! results are fed back, and the next step starts, until the model answers
//! without tools or the step ceiling is reached.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::ModelInvocationError;
use crate::normalized::NormalizedEvent;

use super::{
    GenerationResult, LanguageModel, LlmDriver, LlmRequest, Message, ModelRequest, ModelStream,
    StepResponse, ToolCall, ToolCallFunction, ToolInvocationResult,
};

/// [`LanguageModel`] that runs a driver in a tool loop.
#[derive(Clone)]
pub struct ToolLoopModel {
    driver: Arc<dyn LlmDriver>,
}

impl std::fmt::Debug for ToolLoopModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolLoopModel").finish_non_exhaustive()
    }
}

impl ToolLoopModel {
    #[must_use]
    pub fn new(driver: Arc<dyn LlmDriver>) -> Self {
        Self { driver }
    }
}

#[async_trait::async_trait]
impl LanguageModel for ToolLoopModel {
    async fn generate(&self, req: ModelRequest) -> Result<GenerationResult, ModelInvocationError> {
        let ModelStream {
            mut events,
            response,
        } = self.stream(req).await?;

        while let Some(event) = events.next().await {
            event?;
        }
        Ok(response.await?.into())
    }

    async fn stream(&self, req: ModelRequest) -> Result<ModelStream, ModelInvocationError> {
        let (tx, rx) = oneshot::channel();
        let events = tool_loop(Arc::clone(&self.driver), req, tx);

        Ok(ModelStream {
            events: Box::pin(events),
            response: Box::pin(async move { rx.await.map_err(|_closed| ModelInvocationError::Incomplete) }),
        })
    }
}

#[allow(clippy::too_many_lines)]
fn tool_loop(
    driver: Arc<dyn LlmDriver>,
    req: ModelRequest,
    done: oneshot::Sender<StepResponse>,
) -> impl Stream<Item = Result<NormalizedEvent, ModelInvocationError>> + Send + 'static {
    let request_id = Uuid::new_v4().to_string();

    async_stream::stream! {
        let ModelRequest { messages, tools, system, temperature, max_steps } = req;
        let tool_json = tools.openai_tools_json();
        let max_steps = max_steps.max(1);

        tracing::info!(
            request_id = %request_id,
            message_count = messages.len(),
            tool_count = tool_json.len(),
            max_steps,
            temperature,
            "Starting model invocation"
        );

        yield Ok(NormalizedEvent::StreamStart { request_id: request_id.clone() });

        let mut wire: Vec<serde_json::Value> = system
            .iter()
            .map(|s| Message::system(s.clone()).to_wire())
            .chain(messages.iter().map(Message::to_wire))
            .collect();

        let mut produced: Vec<Message> = Vec::new();
        let mut tool_results: Vec<ToolInvocationResult> = Vec::new();
        let mut final_text = String::new();

        for step in 1..=max_steps {
            let llm_req = LlmRequest {
                messages: wire.clone(),
                tools: tool_json.clone(),
                temperature: Some(temperature),
            };

            let mut driver_stream = match driver.stream(llm_req).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(
                        request_id = %request_id,
                        step,
                        error = %e,
                        "Failed to create driver stream"
                    );
                    yield Err(e);
                    return;
                }
            };

            let mut text = String::new();
            let mut calls: Vec<ToolCall> = Vec::new();

            while let Some(result) = driver_stream.next().await {
                match result {
                    // Boundaries belong to the invocation, not the step.
                    Ok(NormalizedEvent::Done | NormalizedEvent::StreamStart { .. }) => {}
                    Ok(event) => {
                        match &event {
                            NormalizedEvent::MessageDelta { text: t } => text.push_str(t),
                            NormalizedEvent::ToolCallComplete { id, name, arguments_json, .. } => {
                                calls.push(ToolCall {
                                    id: id.clone(),
                                    call_type: "function".to_string(),
                                    function: ToolCallFunction {
                                        name: name.clone(),
                                        arguments: arguments_json.clone(),
                                    },
                                });
                            }
                            _ => {}
                        }
                        yield Ok(event);
                    }
                    Err(e) => {
                        tracing::error!(request_id = %request_id, step, error = %e, "Driver stream failed");
                        yield Err(e);
                        return;
                    }
                }
            }

            if calls.is_empty() {
                tracing::info!(
                    request_id = %request_id,
                    step,
                    text_length = text.len(),
                    "No tool calls to process, completing invocation"
                );
                if !text.is_empty() {
                    produced.push(Message::assistant(text.clone()));
                }
                final_text = text;
                break;
            }

            let assistant = Message {
                tool_calls: Some(calls.clone()),
                ..Message::assistant(text)
            };
            wire.push(assistant.to_wire());
            produced.push(assistant);

            for call in &calls {
                let tool_name = &call.function.name;
                let raw_args = call.function.arguments.trim();
                let parsed = if raw_args.is_empty() {
                    Ok(serde_json::json!({}))
                } else {
                    serde_json::from_str::<serde_json::Value>(raw_args)
                };
                let (args, invalid) = match parsed {
                    Ok(args) => (args, None),
                    Err(e) => (
                        serde_json::Value::String(call.function.arguments.clone()),
                        Some(format!("invalid arguments: {e}")),
                    ),
                };

                tracing::info!(
                    request_id = %request_id,
                    step,
                    tool_id = %call.id,
                    tool_name = %tool_name,
                    "Executing tool call"
                );

                let (raw, success) = match (invalid, tools.get(tool_name)) {
                    (Some(message), _) => {
                        tracing::warn!(
                            request_id = %request_id,
                            tool_id = %call.id,
                            tool_name = %tool_name,
                            error = %message,
                            "Tool call arguments are not valid JSON"
                        );
                        (serde_json::json!({ "status": "error", "message": message }), false)
                    }
                    (None, Some(def)) => match def.invoke(args.clone()).await {
                        Ok(raw) => (raw, true),
                        Err(e) => {
                            tracing::error!(
                                request_id = %request_id,
                                tool_id = %call.id,
                                tool_name = %tool_name,
                                server_id = %def.server_id,
                                error = %e,
                                "Tool call failed"
                            );
                            (serde_json::json!({ "status": "error", "message": e.to_string() }), false)
                        }
                    },
                    (None, None) => {
                        tracing::warn!(request_id = %request_id, tool_name = %tool_name, "Model requested an unknown tool");
                        (
                            serde_json::json!({ "status": "error", "message": format!("unknown tool: {tool_name}") }),
                            false,
                        )
                    }
                };

                let content = raw.to_string();
                yield Ok(NormalizedEvent::ToolResult {
                    id: call.id.clone(),
                    name: tool_name.clone(),
                    content: content.clone(),
                    success,
                });

                let msg = Message::tool(call.id.clone(), tool_name.clone(), content);
                wire.push(msg.to_wire());
                produced.push(msg);
                tool_results.push(ToolInvocationResult {
                    tool_call_id: call.id.clone(),
                    tool_name: tool_name.clone(),
                    args,
                    raw_result: raw,
                });
            }

            if step == max_steps {
                tracing::warn!(
                    request_id = %request_id,
                    max_steps,
                    "Step ceiling reached with tool calls outstanding"
                );
            }
        }

        let response = StepResponse {
            text: final_text,
            messages: produced,
            tool_results,
        };
        if done.send(response).is_err() {
            tracing::debug!(request_id = %request_id, "Response receiver dropped");
        }

        yield Ok(NormalizedEvent::Done);
    }
}
