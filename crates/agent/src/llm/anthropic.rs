//! Anthropic Messages API.

use async_trait::async_trait;
use costscope_core::config::LlmConfig;
use costscope_core::{CallId, ContentBlock, Message, ReasoningError, Role, ToolInvocationRequest, ToolSpec};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::http::{join_url, send_json};
use super::{events_for_turn, into_event_stream, EventStream, ModelRequest, ReasoningEngine, StopReason, StreamEvent, Usage};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicEngine {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    max_retries: u32,
}

impl AnthropicEngine {
    pub fn new(config: &LlmConfig) -> Result<Self, ReasoningError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|error| ReasoningError::Transport(error.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone().unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string()),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    fn body(&self, request: &ModelRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "system": request.system,
            "messages": request.messages.iter().filter_map(encode_message).collect::<Vec<_>>(),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.iter().map(encode_tool).collect());
        }
        body
    }
}

#[async_trait]
impl ReasoningEngine for AnthropicEngine {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn respond(&self, request: &ModelRequest) -> Result<EventStream, ReasoningError> {
        let url = join_url(&self.base_url, "/v1/messages");
        let body = self.body(request);
        let response = send_json(self.name(), self.max_retries, || {
            let builder = self
                .client
                .post(&url)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body);
            match &self.api_key {
                Some(key) => builder.header("x-api-key", key.expose_secret()),
                None => builder,
            }
        })
        .await?;
        Ok(into_event_stream(decode_response(&response)?))
    }
}

fn encode_tool(spec: &ToolSpec) -> Value {
    json!({"name": spec.name, "description": spec.description, "input_schema": spec.input_schema})
}

fn encode_message(message: &Message) -> Option<Value> {
    let role = match message.role {
        Role::Assistant => "assistant",
        Role::User | Role::ToolResult => "user",
        Role::System => return None,
    };
    let content = message
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text } => json!({"type": "text", "text": text}),
            ContentBlock::ToolUse(request) => json!({
                "type": "tool_use",
                "id": request.call_id.as_str(),
                "name": request.name,
                "input": request.arguments,
            }),
            ContentBlock::ToolResult(result) => json!({
                "type": "tool_result",
                "tool_use_id": result.call_id.as_str(),
                "content": result.text_content(),
                "is_error": result.is_failure(),
            }),
        })
        .collect::<Vec<_>>();
    Some(json!({"role": role, "content": content}))
}

fn decode_response(response: &Value) -> Result<Vec<StreamEvent>, ReasoningError> {
    let content = response
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| ReasoningError::Decode("response has no content array".to_string()))?;

    let mut blocks = Vec::new();
    let mut reasoning = String::new();
    for block in content {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                let text = block.get("text").and_then(Value::as_str).unwrap_or_default();
                blocks.push(ContentBlock::text(text));
            }
            Some("tool_use") => {
                let field = |key: &str| {
                    block.get(key).and_then(Value::as_str).map(str::to_string).ok_or_else(|| {
                        ReasoningError::Decode(format!("tool_use block is missing `{key}`"))
                    })
                };
                blocks.push(ContentBlock::ToolUse(ToolInvocationRequest {
                    call_id: CallId::new(field("id")?),
                    name: field("name")?,
                    arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
                }));
            }
            Some("thinking") => {
                reasoning.push_str(block.get("thinking").and_then(Value::as_str).unwrap_or_default());
            }
            _ => {}
        }
    }

    let stop_reason = response
        .get("stop_reason")
        .and_then(Value::as_str)
        .map(StopReason::from_provider)
        .unwrap_or(StopReason::EndTurn);
    let usage = response.get("usage").map(|usage| Usage {
        input_tokens: usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        output_tokens: usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
    });

    Ok(events_for_turn(blocks, Some(reasoning), stop_reason, usage))
}

#[cfg(test)]
mod tests {
    use costscope_core::{CallId, Message, ToolResult};
    use serde_json::json;

    use super::{decode_response, encode_message};
    use crate::llm::{collect_turn, into_event_stream, StopReason};

    #[tokio::test]
    async fn decodes_text_and_tool_use_blocks() {
        let response = json!({
            "content": [
                {"type": "thinking", "thinking": "Need EC2 prices."},
                {"type": "text", "text": "Let me look that up."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_pricing", "input": {"service_code": "AmazonEC2"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 40, "output_tokens": 12}
        });

        let turn = collect_turn(into_event_stream(decode_response(&response).unwrap())).await.unwrap();
        assert_eq!(turn.stop_reason, StopReason::ToolUse);
        assert_eq!(turn.message.joined_text().as_deref(), Some("Let me look that up."));
        assert_eq!(turn.tool_requests()[0].call_id, CallId::new("toolu_1"));
    }

    #[test]
    fn tool_results_are_sent_as_user_turns() {
        let encoded = encode_message(&Message::tool_results(vec![ToolResult::failure(
            CallId::new("toolu_1"),
            "sandbox is not running",
        )]))
        .unwrap();
        assert_eq!(encoded["role"], "user");
        assert_eq!(encoded["content"][0]["type"], "tool_result");
        assert_eq!(encoded["content"][0]["is_error"], true);
    }

    #[test]
    fn missing_content_is_a_decode_error() {
        assert!(decode_response(&json!({"stop_reason": "end_turn"})).is_err());
    }
}
