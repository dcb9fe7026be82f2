//! Process-backed tool transport.
//!
//! A [`ToolTransport`] launches one tool server from a [`LaunchSpec`] and
//! returns a [`TransportHandle`] that lists tools, invokes them, and closes
//! the connection. [`RmcpTransport`] is the MCP-over-stdio implementation.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use rmcp::{model::CallToolRequestParam, service::ServiceExt, transport::TokioChildProcess};
use tokio::{process::Command, sync::RwLock};

use super::config::LaunchSpec;

/// A tool schema as exposed by a running server.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: Option<String>,
    /// JSON schema for the arguments. Opaque to the core.
    pub input_schema: serde_json::Value,
}

/// A live connection to one tool server.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolSchema>>;

    /// Call `name` with JSON `arguments`, returning the raw result payload.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value>;

    /// Close the connection and terminate the process. Idempotent.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Launches tool servers.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn connect(
        &self,
        server_id: &str,
        launch: &LaunchSpec,
    ) -> anyhow::Result<Arc<dyn TransportHandle>>;
}

type DynClientService = rmcp::service::RunningService<
    rmcp::service::RoleClient,
    Box<dyn rmcp::service::DynService<rmcp::service::RoleClient>>,
>;

/// MCP client over a child process's stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct RmcpTransport;

#[async_trait]
impl ToolTransport for RmcpTransport {
    async fn connect(
        &self,
        server_id: &str,
        launch: &LaunchSpec,
    ) -> anyhow::Result<Arc<dyn TransportHandle>> {
        let mut cmd = Command::new(&launch.command);
        cmd.args(&launch.args);
        for (k, v) in &launch.env {
            cmd.env(k, v);
        }

        let transport = TokioChildProcess::new(cmd)
            .with_context(|| format!("failed to spawn '{}'", launch.command))?;
        let service = ().into_dyn()
            .serve(transport)
            .await
            .with_context(|| format!("failed to connect stdio MCP server '{server_id}'"))?;

        Ok(Arc::new(RmcpHandle {
            server_id: server_id.to_string(),
            service: RwLock::new(Some(service)),
        }))
    }
}

struct RmcpHandle {
    server_id: String,
    service: RwLock<Option<DynClientService>>,
}

#[async_trait]
impl TransportHandle for RmcpHandle {
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let guard = self.service.read().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| anyhow!("tool server '{}' is closed", self.server_id))?;

        let res = service
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: arguments.as_object().cloned(),
            })
            .await
            .with_context(|| format!("tools/call failed for {}::{name}", self.server_id))?;

        Ok(serde_json::to_value(res)?)
    }

    async fn list_tools(&self) -> anyhow::Result<Vec<ToolSchema>> {
        let guard = self.service.read().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| anyhow!("tool server '{}' is closed", self.server_id))?;

        let result = service
            .list_tools(Default::default())
            .await
            .with_context(|| format!("tools/list failed for MCP server '{}'", self.server_id))?;

        Ok(result
            .tools
            .into_iter()
            .map(|t| ToolSchema {
                name: t.name.to_string(),
                description: t.description.map(|d| d.to_string()),
                input_schema: serde_json::Value::Object((*t.input_schema).clone()),
            })
            .collect())
    }

    async fn close(&self) -> anyhow::Result<()> {
        let Some(service) = self.service.write().await.take() else {
            return Ok(());
        };
        service
            .cancel()
            .await
            .with_context(|| format!("failed to close MCP server '{}'", self.server_id))?;
        Ok(())
    }
}
