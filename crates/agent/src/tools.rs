use std::collections::HashMap;
use std::sync::Arc;

use costscope_core::{EstimationError, ToolError, ToolInvocationRequest, ToolResult, ToolSpec};
use costscope_mcp::ExternalToolRegistry;
use tracing::warn;

use crate::calculation::CalculationTool;

/// Where a declared tool name is served from.
#[derive(Clone)]
pub enum ToolBinding {
    Local(CalculationTool),
    Remote(Arc<ExternalToolRegistry>),
}

impl ToolBinding {
    /// Remote pricing lookups are side-effect-free reads.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

/// Name to binding map built once per estimation.
pub struct ToolDispatcher {
    specs: Vec<ToolSpec>,
    bindings: HashMap<String, ToolBinding>,
}

impl ToolDispatcher {
    pub fn new(
        calculation: CalculationTool,
        registry: Arc<ExternalToolRegistry>,
    ) -> Result<Self, EstimationError> {
        let mut dispatcher = Self { specs: Vec::new(), bindings: HashMap::new() };
        for spec in registry.list_tools() {
            dispatcher.register(spec.clone(), ToolBinding::Remote(Arc::clone(&registry)))?;
        }
        dispatcher.register(CalculationTool::spec(), ToolBinding::Local(calculation))?;
        Ok(dispatcher)
    }

    fn register(&mut self, spec: ToolSpec, binding: ToolBinding) -> Result<(), EstimationError> {
        if self.bindings.contains_key(&spec.name) {
            return Err(EstimationError::ToolNameCollision(spec.name));
        }
        self.bindings.insert(spec.name.clone(), binding);
        self.specs.push(spec);
        Ok(())
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn binding(&self, name: &str) -> Option<&ToolBinding> {
        self.bindings.get(name)
    }

    pub fn is_read_only(&self, name: &str) -> bool {
        self.binding(name).is_some_and(ToolBinding::is_read_only)
    }

    /// Every failure comes back as a failed [`ToolResult`] for the model to adapt to.
    pub async fn dispatch(&self, request: &ToolInvocationRequest) -> ToolResult {
        let outcome = match self.bindings.get(&request.name) {
            Some(ToolBinding::Local(calculation)) => return calculation.invoke(request).await,
            Some(ToolBinding::Remote(registry)) => registry.invoke(request).await,
            None => Err(ToolError::UnknownTool(request.name.clone())),
        };

        outcome.unwrap_or_else(|error| {
            warn!(
                event_name = "agent.tool.failed",
                tool = %request.name,
                call_id = %request.call_id,
                error = %error,
                "tool call failed; reporting to reasoning engine"
            );
            ToolResult::failure(request.call_id.clone(), error.to_string())
        })
    }
}
