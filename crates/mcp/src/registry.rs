use std::collections::HashMap;
use std::sync::Arc;

use costscope_core::{ToolError, ToolInvocationRequest, ToolResult, ToolSpec, ToolStatus};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::schema::SchemaValidator;
use crate::tools::missing_pricing_tools;
use crate::transport::PricingTransport;

/// Externally hosted pricing tools behind a "list / invoke by name" contract.
///
/// The tool list is fetched once on [`ExternalToolRegistry::connect`]. After
/// [`ExternalToolRegistry::disconnect`] every invocation fails with
/// [`ToolError::Unavailable`].
pub struct ExternalToolRegistry {
    transport: RwLock<Option<Arc<dyn PricingTransport>>>,
    tools: Vec<ToolSpec>,
    validators: HashMap<String, SchemaValidator>,
}

impl ExternalToolRegistry {
    pub async fn connect(transport: Box<dyn PricingTransport>) -> Result<Self, ToolError> {
        let transport: Arc<dyn PricingTransport> = Arc::from(transport);
        let tools = match transport.list_tools().await {
            Ok(tools) => tools,
            Err(error) => {
                if let Err(close_error) = transport.close().await {
                    warn!(
                        event_name = "pricing.registry.close_failed",
                        error = %close_error,
                        "failed to close pricing transport after listing error"
                    );
                }
                return Err(error);
            }
        };

        let mut validators = HashMap::new();
        for spec in &tools {
            match SchemaValidator::compile(&spec.input_schema) {
                Ok(validator) => {
                    validators.insert(spec.name.clone(), validator);
                }
                Err(error) => warn!(
                    event_name = "pricing.registry.schema_skipped",
                    tool = %spec.name,
                    error = %error,
                    "tool schema does not compile; arguments will not be validated"
                ),
            }
        }

        let missing = missing_pricing_tools(&tools);
        if !missing.is_empty() {
            warn!(
                event_name = "pricing.registry.catalog_incomplete",
                missing = ?missing,
                "pricing server does not advertise every expected tool"
            );
        }

        info!(
            event_name = "pricing.registry.connected",
            tool_count = tools.len(),
            "pricing tool registry connected"
        );

        Ok(Self { transport: RwLock::new(Some(transport)), tools, validators })
    }

    pub fn list_tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|spec| spec.name == name)
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.read().await.is_some()
    }

    pub async fn invoke(&self, request: &ToolInvocationRequest) -> Result<ToolResult, ToolError> {
        let transport = self
            .transport
            .read()
            .await
            .clone()
            .ok_or_else(|| ToolError::Unavailable("pricing registry is disconnected".to_string()))?;

        if !self.has_tool(&request.name) {
            return Err(ToolError::UnknownTool(request.name.clone()));
        }

        let arguments = match &request.arguments {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(ToolError::SchemaViolation {
                    tool: request.name.clone(),
                    message: format!("arguments must be a JSON object, got {other}"),
                })
            }
        };

        if let Some(validator) = self.validators.get(&request.name) {
            validator.validate(&Value::Object(arguments.clone())).map_err(|message| {
                ToolError::SchemaViolation { tool: request.name.clone(), message }
            })?;
        }

        debug!(
            event_name = "pricing.tool.invoke",
            tool = %request.name,
            call_id = %request.call_id,
            "invoking pricing tool"
        );
        let output = transport.call_tool(&request.name, arguments).await?;

        if output.is_error {
            let message = output
                .content
                .iter()
                .map(|content| content.to_text())
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ToolError::Invocation { tool: request.name.clone(), message });
        }

        Ok(ToolResult {
            call_id: request.call_id.clone(),
            content: output.content,
            status: ToolStatus::Success,
        })
    }

    /// Closes the transport. Safe to call more than once; close failures are
    /// logged only.
    pub async fn disconnect(&self) {
        let Some(transport) = self.transport.write().await.take() else {
            return;
        };
        close_transport(transport).await;
    }
}

/// Dropping a still-connected registry hands the close to the current runtime,
/// so a cancelled request does not leave the pricing server running.
impl Drop for ExternalToolRegistry {
    fn drop(&mut self) {
        let Some(transport) = self.transport.get_mut().take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(
                    event_name = "pricing.registry.dropped_connected",
                    "pricing tool registry dropped while connected; closing in background"
                );
                runtime.spawn(close_transport(transport));
            }
            Err(_) => warn!(
                event_name = "pricing.registry.dropped_connected",
                "pricing tool registry dropped outside a runtime; transport released without close"
            ),
        }
    }
}

async fn close_transport(transport: Arc<dyn PricingTransport>) {
    match transport.close().await {
        Ok(()) => info!(event_name = "pricing.registry.disconnected", "pricing tool registry disconnected"),
        Err(error) => warn!(
            event_name = "pricing.registry.close_failed",
            error = %error,
            "pricing transport did not close cleanly"
        ),
    }
}
