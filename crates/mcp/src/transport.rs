use async_trait::async_trait;
use costscope_core::{ToolError, ToolResultContent, ToolSpec};
use serde_json::{Map, Value};

/// Raw outcome of one remote tool call, before it is bound to a call id.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteCallOutput {
    pub content: Vec<ToolResultContent>,
    pub is_error: bool,
}

impl RemoteCallOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self { content: vec![ToolResultContent::Text { text: text.into() }], is_error: false }
    }

    pub fn json(value: Value) -> Self {
        Self { content: vec![ToolResultContent::Json { value }], is_error: false }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { content: vec![ToolResultContent::Text { text: text.into() }], is_error: true }
    }
}

/// Connection to an independently hosted set of pricing tools.
#[async_trait]
pub trait PricingTransport: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<RemoteCallOutput, ToolError>;

    /// Tears down the connection and any process behind it.
    async fn close(&self) -> Result<(), ToolError>;
}
