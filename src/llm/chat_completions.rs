//! OpenAI-compatible Chat Completions driver.
//!
//! This module implements the [`LlmDriver`] trait for any endpoint that speaks
//! the Chat Completions protocol (`{base}/chat/completions`): `OpenAI`, the
//! Gemini compatibility endpoint, and Ollama. Responses are streamed and tool
//! call deltas are assembled into complete calls.

use std::collections::BTreeMap;

use futures::StreamExt;

use crate::error::ModelInvocationError;
use crate::normalized::NormalizedEvent;

use super::{DriverStream, LlmDriver, LlmRequest, LlmSettings};

/// Accumulated state for a streaming tool call.
#[derive(Default)]
struct ToolAccum {
    id: Option<String>,
    name: Option<String>,
    args: String,
}

/// Driver for the Chat Completions API.
///
/// Streams responses as [`NormalizedEvent`]s.
#[derive(Clone)]
pub struct ChatCompletionsDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsDriver")
            .field("base_url", &self.settings.base_url)
            .field("model", &self.settings.model)
            .field("provider", &self.settings.provider)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionsDriver {
    /// Create a new Chat Completions driver with the given settings.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }
}

#[async_trait::async_trait]
impl LlmDriver for ChatCompletionsDriver {
    async fn stream(&self, req: LlmRequest) -> Result<DriverStream, ModelInvocationError> {
        let url = self.settings.provider.build_chat_url(&self.settings.base_url);

        let mut body = serde_json::json!({
            "model": self.settings.model,
            "stream": true,
            "messages": req.messages,
        });
        if !req.tools.is_empty() {
            body["tools"] = serde_json::Value::Array(req.tools);
        }
        if let Some(t) = req.temperature {
            body["temperature"] = serde_json::json!(t);
        }

        let mut rb = self.http.post(&url).json(&body);
        if let Some(k) = &self.settings.api_key {
            rb = rb.bearer_auth(k);
        }

        tracing::debug!(
            url = %url,
            model = %self.settings.model,
            messages = body["messages"].as_array().map_or(0, Vec::len),
            "Sending chat completions request"
        );

        let resp = rb.send().await?.error_for_status()?;
        let byte_stream = resp.bytes_stream();

        let out = async_stream::try_stream! {
            let mut buf = Vec::<u8>::new();
            let mut tool_accum: BTreeMap<usize, ToolAccum> = BTreeMap::new();
            let mut calls_completed = false;

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

                while let Some(pos) = find_double_newline(&buf) {
                    let frame = buf.drain(..pos + 2).collect::<Vec<_>>();
                    let text = String::from_utf8_lossy(&frame);

                    for line in text.lines() {
                        let line = line.trim();
                        if !line.starts_with("data:") {
                            continue;
                        }
                        let data = line.trim_start_matches("data:").trim();

                        if data == "[DONE]" {
                            yield NormalizedEvent::Done;
                            continue;
                        }

                        let v: serde_json::Value = serde_json::from_str(data)?;
                        if let Some(message) = v.pointer("/error/message").and_then(|m| m.as_str()) {
                            Err(ModelInvocationError::Protocol(message.to_string()))?;
                        }
                        let choice = &v["choices"][0];
                        let delta = &choice["delta"];

                        // Assistant text delta
                        if let Some(s) = delta.get("content").and_then(|x| x.as_str()) {
                            if !s.is_empty() {
                                yield NormalizedEvent::MessageDelta { text: s.to_string() };
                            }
                        }

                        // Tool calls streaming deltas
                        if let Some(arr) = delta.get("tool_calls").and_then(|x| x.as_array()) {
                            for (pos, tc) in arr.iter().enumerate() {
                                let idx = tc
                                    .get("index")
                                    .and_then(serde_json::Value::as_u64)
                                    .map_or(pos, |i| usize::try_from(i).unwrap_or(pos));
                                let id = tc.get("id").and_then(|x| x.as_str()).map(ToString::to_string);
                                let name = tc.get("function")
                                    .and_then(|f| f.get("name"))
                                    .and_then(|x| x.as_str())
                                    .map(ToString::to_string);
                                let args_delta = tc.get("function")
                                    .and_then(|f| f.get("arguments"))
                                    .and_then(|x| x.as_str())
                                    .map(ToString::to_string);

                                let entry = tool_accum.entry(idx).or_default();
                                if entry.id.is_none() {
                                    entry.id.clone_from(&id);
                                }
                                if entry.name.is_none() {
                                    entry.name.clone_from(&name);
                                }
                                if let Some(ad) = &args_delta {
                                    entry.args.push_str(ad);
                                }

                                yield NormalizedEvent::ToolCallDelta {
                                    call_index: idx,
                                    id,
                                    name,
                                    arguments_delta: args_delta,
                                };
                            }
                        }

                        if choice.get("finish_reason").and_then(|x| x.as_str()) == Some("tool_calls")
                            && !calls_completed
                        {
                            calls_completed = true;
                            for event in complete_calls(&tool_accum) {
                                yield event;
                            }
                        }
                    }
                }
            }

            // Some compatible servers finish with "stop" even after tool calls.
            if !calls_completed {
                for event in complete_calls(&tool_accum) {
                    yield event;
                }
            }
        };

        Ok(Box::pin(out))
    }
}

fn complete_calls(accum: &BTreeMap<usize, ToolAccum>) -> Vec<NormalizedEvent> {
    accum
        .iter()
        .filter_map(|(idx, a)| {
            let name = a.name.clone()?;
            Some(NormalizedEvent::ToolCallComplete {
                call_index: *idx,
                id: a.id.clone().unwrap_or_else(|| format!("call_{idx}")),
                name,
                arguments_json: a.args.clone(),
            })
        })
        .collect()
}

/// Find the position of a double newline in the buffer.
fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}
