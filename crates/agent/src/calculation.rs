//! The one locally implemented tool: arithmetic in the sandbox.

use std::sync::Arc;

use costscope_core::{SandboxError, ToolInvocationRequest, ToolResult, ToolSpec};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::sandbox::SandboxSession;

pub const CALCULATION_TOOL_NAME: &str = "execute_cost_calculation";

pub const SANDBOX_NOT_INITIALIZED: &str = "Code interpreter not initialized";

/// Forwards calculation code to the shared sandbox session. Every outcome,
/// including an unavailable sandbox, comes back as text.
#[derive(Clone)]
pub struct CalculationTool {
    session: Arc<Mutex<SandboxSession>>,
}

impl CalculationTool {
    pub fn new(session: Arc<Mutex<SandboxSession>>) -> Self {
        Self { session }
    }

    pub fn spec() -> ToolSpec {
        ToolSpec::new(
            CALCULATION_TOOL_NAME,
            "Execute Python code that turns retrieved unit prices into cost figures. \
             Print every result you need; pricing tools are not reachable from this code.",
            json!({
                "type": "object",
                "properties": {
                    "calculation_code": {
                        "type": "string",
                        "description": "Python code performing the calculation"
                    },
                    "description": {
                        "type": "string",
                        "description": "What the calculation computes"
                    }
                },
                "required": ["calculation_code"]
            }),
        )
    }

    pub async fn execute_cost_calculation(&self, calculation_code: &str, description: &str) -> String {
        match self.run(calculation_code, description).await {
            Ok(output) => output,
            Err(error) => render_failure(&error),
        }
    }

    pub(crate) async fn invoke(&self, request: &ToolInvocationRequest) -> ToolResult {
        let call_id = request.call_id.clone();
        let Some(code) = request.arguments.get("calculation_code").and_then(Value::as_str) else {
            return ToolResult::failure(call_id, "missing required argument `calculation_code`");
        };
        let description =
            request.arguments.get("description").and_then(Value::as_str).unwrap_or_default();

        match self.run(code, description).await {
            Ok(output) => ToolResult::text(call_id, output),
            Err(error) => ToolResult::failure(call_id, render_failure(&error)),
        }
    }

    async fn run(&self, calculation_code: &str, description: &str) -> Result<String, SandboxError> {
        let mut session = self.session.lock().await;
        if !session.is_running() {
            return Err(SandboxError::NotRunning { state: session.state().as_str() });
        }

        info!(event_name = "calculation.execute", description, "executing cost calculation");
        debug!(code = calculation_code, "calculation code");

        let output = session.execute(calculation_code).await;
        match &output {
            Ok(text) => info!(event_name = "calculation.completed", output = %text, "calculation completed"),
            Err(error) => warn!(event_name = "calculation.failed", error = %error, "calculation failed"),
        }
        output
    }
}

fn render_failure(error: &SandboxError) -> String {
    match error {
        SandboxError::NotRunning { state } => format!("{SANDBOX_NOT_INITIALIZED} (sandbox is {state})"),
        other => format!("Calculation failed: {other}"),
    }
}
