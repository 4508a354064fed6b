use async_trait::async_trait;
use costscope_core::config::PricingConfig;
use costscope_core::credentials::AwsCredentials;
use costscope_core::{ToolError, ToolResultContent, ToolSpec};
use rmcp::model::{CallToolRequestParam, CallToolResult, Content, RawContent, Tool};
use rmcp::service::{Peer, RunningService};
use rmcp::transport::TokioChildProcess;
use rmcp::{RoleClient, ServiceExt};
use serde_json::{Map, Value};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::transport::{PricingTransport, RemoteCallOutput};

/// How to start the pricing MCP server as a stdio child process.
#[derive(Clone)]
pub struct PricingServerLaunch {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl PricingServerLaunch {
    pub fn from_config(config: &PricingConfig, credentials: &AwsCredentials, region: &str) -> Self {
        let mut env = credentials.to_process_env(region);
        env.push(("FASTMCP_LOG_LEVEL".to_string(), config.log_level.clone()));
        Self { command: config.command.clone(), args: config.args.clone(), env }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.command);
        command.args(&self.args).envs(self.env.iter().cloned()).kill_on_drop(true);
        command
    }
}

impl std::fmt::Debug for PricingServerLaunch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env_keys = self.env.iter().map(|(key, _)| key.as_str()).collect::<Vec<_>>();
        f.debug_struct("PricingServerLaunch")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("env_keys", &env_keys)
            .finish()
    }
}

/// MCP client session against the pricing server.
pub struct McpPricingTransport {
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
}

impl McpPricingTransport {
    pub async fn spawn(launch: &PricingServerLaunch) -> Result<Self, ToolError> {
        info!(
            event_name = "pricing.server.spawn",
            command = %launch.command,
            "starting pricing tool server"
        );

        let transport = TokioChildProcess::new(launch.command()).map_err(|error| {
            ToolError::Unavailable(format!("failed to spawn `{}`: {error}", launch.command))
        })?;
        let service = ().serve(transport).await.map_err(|error| {
            ToolError::Unavailable(format!("pricing server handshake failed: {error}"))
        })?;

        if let Some(info) = service.peer().peer_info() {
            debug!(
                event_name = "pricing.server.ready",
                server = %info.server_info.name,
                version = %info.server_info.version,
                "pricing tool server initialized"
            );
        }

        Ok(Self { peer: service.peer().clone(), service: Mutex::new(Some(service)) })
    }
}

#[async_trait]
impl PricingTransport for McpPricingTransport {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        let tools = self
            .peer
            .list_all_tools()
            .await
            .map_err(|error| ToolError::Unavailable(format!("tools/list failed: {error}")))?;
        Ok(tools.into_iter().map(map_tool).collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<RemoteCallOutput, ToolError> {
        let result = self
            .peer
            .call_tool(CallToolRequestParam { name: name.to_string().into(), arguments: Some(arguments) })
            .await
            .map_err(|error| ToolError::Invocation {
                tool: name.to_string(),
                message: format!("tools/call failed: {error}"),
            })?;
        Ok(map_call_result(result))
    }

    async fn close(&self) -> Result<(), ToolError> {
        let Some(service) = self.service.lock().await.take() else {
            return Ok(());
        };
        match service.cancel().await {
            Ok(reason) => {
                debug!(event_name = "pricing.server.closed", reason = ?reason, "pricing tool server stopped");
                Ok(())
            }
            Err(error) => {
                warn!(event_name = "pricing.server.close_failed", error = %error, "pricing tool server did not stop cleanly");
                Err(ToolError::Unavailable(format!("pricing server shutdown failed: {error}")))
            }
        }
    }
}

fn map_tool(tool: Tool) -> ToolSpec {
    ToolSpec {
        name: tool.name.to_string(),
        description: tool.description.as_deref().unwrap_or_default().to_string(),
        input_schema: Value::Object((*tool.input_schema).clone()),
    }
}

fn map_call_result(result: CallToolResult) -> RemoteCallOutput {
    let mut content = result.content.into_iter().map(map_content).collect::<Vec<_>>();
    if content.is_empty() {
        if let Some(value) = result.structured_content {
            content.push(ToolResultContent::Json { value });
        }
    }
    RemoteCallOutput { content, is_error: result.is_error.unwrap_or(false) }
}

fn map_content(content: Content) -> ToolResultContent {
    match content.raw {
        RawContent::Text(text) => ToolResultContent::Text { text: text.text },
        other => match serde_json::to_value(&other) {
            Ok(value) => ToolResultContent::Json { value },
            Err(error) => ToolResultContent::Text { text: format!("[unrenderable content: {error}]") },
        },
    }
}
