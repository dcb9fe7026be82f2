//! Fakes shared by unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use futures::stream;

use crate::error::{ModelInvocationError, ToolManagerError};
use crate::llm::{DriverStream, GenerationResult, LlmDriver, LlmRequest};
use crate::mcp::{ToolSchema, TransportHandle};
use crate::normalized::NormalizedEvent;
use crate::tools::{ToolDefinition, ToolLifecycle, ToolNamespace};

/// What a [`ScriptedDriver`] was asked to do.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<serde_json::Value>,
    pub tools: Vec<serde_json::Value>,
    pub temperature: Option<f32>,
}

/// Driver that replays one scripted event list per completion.
#[derive(Default)]
pub struct ScriptedDriver {
    steps: Mutex<VecDeque<Vec<NormalizedEvent>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    fail: bool,
}

impl ScriptedDriver {
    pub fn new(steps: Vec<Vec<NormalizedEvent>>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            ..Self::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmDriver for ScriptedDriver {
    async fn stream(&self, req: LlmRequest) -> Result<DriverStream, ModelInvocationError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            messages: req.messages,
            tools: req.tools,
            temperature: req.temperature,
        });
        if self.fail {
            return Err(ModelInvocationError::Protocol("backend unavailable".to_string()));
        }
        let events = self.steps.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}

pub fn text_step(chunks: &[&str]) -> Vec<NormalizedEvent> {
    chunks
        .iter()
        .map(|c| NormalizedEvent::MessageDelta {
            text: (*c).to_string(),
        })
        .chain(std::iter::once(NormalizedEvent::Done))
        .collect()
}

pub fn tool_call_step(id: &str, name: &str, args: &str) -> Vec<NormalizedEvent> {
    vec![
        NormalizedEvent::ToolCallDelta {
            call_index: 0,
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            arguments_delta: Some(args.to_string()),
        },
        NormalizedEvent::ToolCallComplete {
            call_index: 0,
            id: id.to_string(),
            name: name.to_string(),
            arguments_json: args.to_string(),
        },
        NormalizedEvent::Done,
    ]
}

/// Transport handle that answers every call with a fixed payload.
pub struct RecordingHandle {
    result: serde_json::Value,
    calls: Mutex<Vec<(String, serde_json::Value)>>,
    pub closed: AtomicUsize,
}

impl RecordingHandle {
    pub fn new(result: serde_json::Value) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportHandle for RecordingHandle {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolSchema>> {
        Ok(Vec::new())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));
        Ok(self.result.clone())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn schema(name: &str) -> ToolSchema {
    ToolSchema {
        name: name.to_string(),
        description: Some(format!("{name} tool")),
        input_schema: serde_json::json!({"type": "object", "properties": {}}),
    }
}

/// A namespace whose tools all belong to `server_id` and share one handle.
pub fn namespace_with(
    server_id: &str,
    names: &[&str],
    result: serde_json::Value,
) -> (ToolNamespace, Arc<RecordingHandle>) {
    let handle = RecordingHandle::new(result);
    let invoker: Arc<dyn TransportHandle> = Arc::<RecordingHandle>::clone(&handle);
    let tools: BTreeMap<String, ToolDefinition> = names
        .iter()
        .map(|n| {
            (
                (*n).to_string(),
                ToolDefinition::new(schema(n), server_id, Arc::clone(&invoker)),
            )
        })
        .collect();
    (ToolNamespace::new(tools), handle)
}

/// Lifecycle fake counting setup and cleanup calls.
#[derive(Default)]
pub struct CountingLifecycle {
    pub namespace: ToolNamespace,
    pub fail_setup: bool,
    pub setups: AtomicUsize,
    pub cleanups: AtomicUsize,
}

impl CountingLifecycle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_namespace(namespace: ToolNamespace) -> Arc<Self> {
        Arc::new(Self {
            namespace,
            ..Self::default()
        })
    }

    pub fn failing_setup() -> Arc<Self> {
        Arc::new(Self {
            fail_setup: true,
            ..Self::default()
        })
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolLifecycle for CountingLifecycle {
    async fn setup_tools(&self) -> Result<ToolNamespace, ToolManagerError> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        if self.fail_setup {
            return Err(ToolManagerError::InvalidState("cleaned-up"));
        }
        Ok(self.namespace.clone())
    }

    async fn cleanup_tools(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }

    fn parse_tool_results(&self, result: &GenerationResult) -> String {
        match &result.text {
            Some(text) if !text.trim().is_empty() => text.clone(),
            _ => result
                .tool_results
                .iter()
                .map(|r| r.raw_result.to_string())
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}
