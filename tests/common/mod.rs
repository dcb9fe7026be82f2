//! In-memory transport and model driver for end-to-end tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use futures::stream;

use waypoint::error::ModelInvocationError;
use waypoint::llm::{DriverStream, LlmDriver, LlmRequest};
use waypoint::mcp::{LaunchSpec, ToolSchema, ToolTransport, TransportHandle};
use waypoint::normalized::NormalizedEvent;

/// One fake tool server.
#[derive(Clone, Default)]
pub struct FakeServer {
    pub tools: Vec<String>,
    /// Raw result per tool name.
    pub results: HashMap<String, serde_json::Value>,
    pub fail_connect: bool,
}

impl FakeServer {
    pub fn with_tools(tools: &[&str]) -> Self {
        Self {
            tools: tools.iter().map(|t| (*t).to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn result(mut self, tool: &str, raw: serde_json::Value) -> Self {
        self.results.insert(tool.to_string(), raw);
        self
    }

    pub fn failing() -> Self {
        Self {
            fail_connect: true,
            ..Self::default()
        }
    }
}

/// Transport serving [`FakeServer`]s keyed by launch command.
#[derive(Default)]
pub struct FakeTransport {
    servers: HashMap<String, FakeServer>,
    pub connects: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    pub calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeTransport {
    pub fn new(servers: Vec<(&str, FakeServer)>) -> Arc<Self> {
        Arc::new(Self {
            servers: servers
                .into_iter()
                .map(|(cmd, s)| (cmd.to_string(), s))
                .collect(),
            ..Self::default()
        })
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolTransport for FakeTransport {
    async fn connect(
        &self,
        server_id: &str,
        launch: &LaunchSpec,
    ) -> anyhow::Result<Arc<dyn TransportHandle>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let server = self
            .servers
            .get(&launch.command)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such command: {}", launch.command))?;
        if server.fail_connect {
            anyhow::bail!("{server_id}: handshake failed");
        }
        Ok(Arc::new(FakeHandle {
            server_id: server_id.to_string(),
            server,
            closes: Arc::clone(&self.closes),
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct FakeHandle {
    server_id: String,
    server: FakeServer,
    closes: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl TransportHandle for FakeHandle {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolSchema>> {
        Ok(self
            .server
            .tools
            .iter()
            .map(|name| ToolSchema {
                name: name.clone(),
                description: None,
                input_schema: serde_json::json!({"type": "object"}),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        _arguments: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        self.calls
            .lock()
            .unwrap()
            .push((self.server_id.clone(), name.to_string()));
        Ok(self
            .server
            .results
            .get(name)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({"content": []})))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Driver replaying one scripted step per completion.
#[derive(Default)]
pub struct ScriptedDriver {
    steps: Mutex<VecDeque<Vec<NormalizedEvent>>>,
    pub requests: Mutex<Vec<Vec<serde_json::Value>>>,
    /// Function names offered per completion.
    pub offered: Mutex<Vec<Vec<String>>>,
}

impl ScriptedDriver {
    pub fn new(steps: Vec<Vec<NormalizedEvent>>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            ..Self::default()
        })
    }

    pub fn requests(&self) -> Vec<Vec<serde_json::Value>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn offered_tools(&self) -> Vec<Vec<String>> {
        self.offered.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmDriver for ScriptedDriver {
    async fn stream(&self, req: LlmRequest) -> Result<DriverStream, ModelInvocationError> {
        let names = req
            .tools
            .iter()
            .filter_map(|t| t["function"]["name"].as_str().map(str::to_string))
            .collect();
        self.offered.lock().unwrap().push(names);
        self.requests.lock().unwrap().push(req.messages);
        let events = self.steps.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}

pub fn text(chunk: &str) -> Vec<NormalizedEvent> {
    vec![
        NormalizedEvent::MessageDelta {
            text: chunk.to_string(),
        },
        NormalizedEvent::Done,
    ]
}

pub fn call(id: &str, name: &str, args: &str) -> Vec<NormalizedEvent> {
    vec![
        NormalizedEvent::ToolCallComplete {
            call_index: 0,
            id: id.to_string(),
            name: name.to_string(),
            arguments_json: args.to_string(),
        },
        NormalizedEvent::Done,
    ]
}
