mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;

use common::{FakeServer, FakeTransport, ScriptedDriver, call, text};
use waypoint::config::PipelineConfig;
use waypoint::llm::{Message, ToolLoopModel};
use waypoint::mcp::McpConfig;
use waypoint::normalized::NormalizedEvent;
use waypoint::pipeline::{
    FALLBACK_RESPONSE, IntermediatePolicy, ProviderPipeline, RequestContext, data_stream,
};
use waypoint::tools::{
    ConflictResolution, ManagerState, ToolLifecycle, ToolManager, create_adapters,
};

fn manager(config: &str, transport: &Arc<FakeTransport>) -> Arc<ToolManager> {
    let config = McpConfig::from_json(config).unwrap();
    Arc::new(ToolManager::new(create_adapters(&config, Arc::<FakeTransport>::clone(transport))))
}

fn pipeline(driver: &Arc<ScriptedDriver>, tools: &Arc<ToolManager>) -> ProviderPipeline {
    ProviderPipeline::new(
        Arc::new(ToolLoopModel::new(Arc::<ScriptedDriver>::clone(driver))),
        Arc::<ToolManager>::clone(tools),
        IntermediatePolicy::Passthrough,
        PipelineConfig::default(),
    )
}

#[tokio::test]
async fn test_shared_tool_routes_to_designated_server() {
    let transport = FakeTransport::new(vec![
        ("a-mcp", FakeServer::with_tools(&["search", "notes"])),
        ("b-mcp", FakeServer::with_tools(&["search"])),
    ]);
    let tools = manager(
        r#"{"mcpServers": {
            "a": {"command": "a-mcp"},
            "b": {"command": "b-mcp", "capabilities": ["search"]}
        }}"#,
        &transport,
    );

    let namespace = tools.setup_tools().await.unwrap();

    assert_eq!(namespace.get("search").unwrap().server_id, "b");
    assert_eq!(tools.routing_owner("search").as_deref(), Some("b"));
    assert_eq!(tools.routing_owner("notes").as_deref(), Some("a"));
    let conflicts = tools.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].candidates, ["a", "b"]);
    assert_eq!(conflicts[0].resolution, ConflictResolution::Designated);

    tools.cleanup_tools().await;
}

#[tokio::test]
async fn test_failed_server_is_absent_and_cleanup_is_idempotent() {
    let transport = FakeTransport::new(vec![
        ("broken-mcp", FakeServer::failing()),
        ("maps-mcp", FakeServer::with_tools(&["route", "geocode"])),
        ("files-mcp", FakeServer::with_tools(&["read_file"])),
    ]);
    let tools = manager(
        r#"{"mcpServers": {
            "broken": {"command": "broken-mcp"},
            "maps": {"command": "maps-mcp"},
            "files": {"command": "files-mcp", "capabilities": ["filesystem"]}
        }}"#,
        &transport,
    );

    let namespace = tools.setup_tools().await.unwrap();
    let names: Vec<_> = namespace.names().collect();
    assert_eq!(names, ["geocode", "read_file", "route"]);

    tools.cleanup_tools().await;
    tools.cleanup_tools().await;

    assert_eq!(transport.closes(), 2);
    assert_eq!(tools.state(), ManagerState::CleanedUp);
    assert!(tools.namespace().is_empty());
}

#[tokio::test]
async fn test_empty_generation_returns_fallback_and_cleans_up() {
    let transport = FakeTransport::new(vec![("maps-mcp", FakeServer::with_tools(&["route"]))]);
    let tools = manager(r#"{"mcpServers": {"maps": {"command": "maps-mcp"}}}"#, &transport);
    let driver = ScriptedDriver::new(vec![Vec::new()]);

    let resp = pipeline(&driver, &tools)
        .generate_response(vec![Message::user("Hello")], &RequestContext::default())
        .await
        .unwrap();

    assert_eq!(resp.content, FALLBACK_RESPONSE);
    assert_eq!(tools.state(), ManagerState::CleanedUp);
    assert_eq!(transport.closes(), 1);
}

#[tokio::test]
async fn test_tool_error_status_is_rendered() {
    let transport = FakeTransport::new(vec![(
        "files-mcp",
        FakeServer::with_tools(&["write_file"])
            .result("write_file", json!({"status": "error", "message": "disk full"})),
    )]);
    let tools = manager(
        r#"{"mcpServers": {"files": {"command": "files-mcp", "capabilities": ["filesystem"]}}}"#,
        &transport,
    );
    let driver = ScriptedDriver::new(vec![
        call("call_1", "write_file", r#"{"path":"plan.md"}"#),
        Vec::new(),
    ]);

    let resp = pipeline(&driver, &tools)
        .generate_response(vec![Message::user("Save my plan")], &RequestContext::default())
        .await
        .unwrap();

    assert!(resp.content.contains("disk full"));
    assert_eq!(transport.calls(), [("files".to_string(), "write_file".to_string())]);
    assert_eq!(transport.closes(), 1);
}

#[tokio::test]
async fn test_two_phase_stream_end_to_end() {
    let transport = FakeTransport::new(vec![(
        "weather-mcp",
        FakeServer::with_tools(&["forecast"]).result(
            "forecast",
            json!({"content": [{"type": "text", "text": "Porto: sunny, 21C"}]}),
        ),
    )]);
    let tools = manager(
        r#"{"mcpServers": {"weather": {"command": "weather-mcp"}}}"#,
        &transport,
    );
    let driver = ScriptedDriver::new(vec![
        call("call_1", "forecast", r#"{"city":"Porto"}"#),
        text("Checked the forecast."),
        text("Porto will be sunny at 21C."),
    ]);
    let (writer, reader) = data_stream();

    let completion = pipeline(&driver, &tools)
        .generate_stream_response(
            vec![Message::user("Weather in Porto tomorrow?")],
            &RequestContext::default(),
            writer,
        )
        .await
        .unwrap();

    let events: Vec<_> = reader.collect().await;
    completion.wait().await.unwrap();

    let starts = events
        .iter()
        .filter(|e| matches!(e, NormalizedEvent::StreamStart { .. }))
        .count();
    let dones = events
        .iter()
        .filter(|e| matches!(e, NormalizedEvent::Done))
        .count();
    assert_eq!(starts, 1);
    assert_eq!(dones, 1);
    assert!(matches!(events.first(), Some(NormalizedEvent::StreamStart { .. })));
    assert_eq!(events.last(), Some(&NormalizedEvent::Done));

    let texts: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            NormalizedEvent::MessageDelta { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, ["Checked the forecast.", "Porto will be sunny at 21C."]);
    assert!(events.iter().any(|e| matches!(
        e,
        NormalizedEvent::ToolResult { name, success: true, .. } if name == "forecast"
    )));

    // Phase 2 sees the prepared conversation plus phase 1's tool exchange.
    let phase2 = driver.requests().pop().unwrap();
    let roles: Vec<_> = phase2.iter().map(|m| m["role"].as_str().unwrap_or("")).collect();
    assert_eq!(roles, ["system", "user", "assistant", "tool", "assistant"]);

    assert_eq!(tools.state(), ManagerState::CleanedUp);
    assert_eq!(transport.closes(), 1);
}

#[tokio::test]
async fn test_tools_stay_alive_until_the_stream_is_read() {
    let transport = FakeTransport::new(vec![("maps-mcp", FakeServer::with_tools(&["route"]))]);
    let tools = manager(r#"{"mcpServers": {"maps": {"command": "maps-mcp"}}}"#, &transport);
    let driver = ScriptedDriver::new(vec![text("No tools needed."), text("Take the A1 north.")]);
    let (writer, mut reader) = data_stream();

    let completion = pipeline(&driver, &tools)
        .generate_stream_response(
            vec![Message::user("Drive to Porto?")],
            &RequestContext::default(),
            writer,
        )
        .await
        .unwrap();

    // Both phases are written into the buffer, but nothing has been read.
    let finished_early = tokio::time::timeout(Duration::from_millis(100), async {
        while !completion.is_finished() {
            tokio::task::yield_now().await;
        }
    })
    .await;
    assert!(finished_early.is_err());
    assert_eq!(driver.requests().len(), 2);
    assert_eq!(transport.closes(), 0);
    assert_eq!(tools.state(), ManagerState::ToolsSetUp);

    let mut events = Vec::new();
    while let Some(event) = reader.next().await {
        assert_eq!(transport.closes(), 0);
        events.push(event);
    }
    completion.wait().await.unwrap();

    assert_eq!(events.last(), Some(&NormalizedEvent::Done));
    assert_eq!(transport.closes(), 1);
    assert_eq!(tools.state(), ManagerState::CleanedUp);
}

#[tokio::test]
async fn test_dotted_tool_name_is_offered_sanitized_and_routed() {
    let transport = FakeTransport::new(vec![(
        "files-mcp",
        FakeServer::with_tools(&["fs.read"]).result(
            "fs.read",
            json!({"content": [{"type": "text", "text": "day 1: Lisbon"}]}),
        ),
    )]);
    let tools = manager(
        r#"{"mcpServers": {"files": {"command": "files-mcp", "capabilities": ["filesystem"]}}}"#,
        &transport,
    );
    let driver = ScriptedDriver::new(vec![
        call("call_1", "fs_read", r#"{"path":"plan.md"}"#),
        Vec::new(),
    ]);

    let resp = pipeline(&driver, &tools)
        .generate_response(vec![Message::user("Read my plan")], &RequestContext::default())
        .await
        .unwrap();

    assert_eq!(resp.content, "day 1: Lisbon");
    assert_eq!(driver.offered_tools()[0], ["fs_read"]);
    assert_eq!(transport.calls(), [("files".to_string(), "fs.read".to_string())]);
}
