//! OpenAI-compatible chat completions (OpenAI and Ollama's `/v1` surface).

use async_trait::async_trait;
use costscope_core::config::{LlmConfig, LlmProvider};
use costscope_core::{CallId, ContentBlock, Message, ReasoningError, Role, ToolInvocationRequest, ToolSpec};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::http::{join_url, send_json};
use super::{events_for_turn, into_event_stream, EventStream, ModelRequest, ReasoningEngine, StopReason, Usage};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

pub struct OpenAiCompatibleEngine {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    max_retries: u32,
}

impl OpenAiCompatibleEngine {
    pub fn new(config: &LlmConfig) -> Result<Self, ReasoningError> {
        let default_base = match config.provider {
            LlmProvider::Ollama => OLLAMA_BASE_URL,
            _ => OPENAI_BASE_URL,
        };
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|error| ReasoningError::Transport(error.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone().unwrap_or_else(|| default_base.to_string()),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    fn body(&self, request: &ModelRequest) -> Value {
        let mut messages = vec![json!({"role": "system", "content": request.system})];
        for message in &request.messages {
            messages.extend(encode_message(message));
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
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
impl ReasoningEngine for OpenAiCompatibleEngine {
    fn name(&self) -> &'static str {
        "openai_compatible"
    }

    async fn respond(&self, request: &ModelRequest) -> Result<EventStream, ReasoningError> {
        let url = join_url(&self.base_url, "/v1/chat/completions");
        let body = self.body(request);
        let response = send_json(self.name(), self.max_retries, || {
            let builder = self.client.post(&url).json(&body);
            match &self.api_key {
                Some(key) => builder.bearer_auth(key.expose_secret()),
                None => builder,
            }
        })
        .await?;
        Ok(into_event_stream(decode_response(&response)?))
    }
}

fn encode_tool(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.input_schema,
        }
    })
}

fn encode_message(message: &Message) -> Vec<Value> {
    match message.role {
        Role::ToolResult => message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult(result) => {
                    let text = result.text_content();
                    let content = if result.is_failure() { format!("Error: {text}") } else { text };
                    Some(json!({"role": "tool", "tool_call_id": result.call_id.as_str(), "content": content}))
                }
                _ => None,
            })
            .collect(),
        Role::Assistant => {
            let mut encoded = json!({"role": "assistant", "content": message.joined_text()});
            let calls = message
                .tool_requests()
                .into_iter()
                .map(|request| {
                    json!({
                        "id": request.call_id.as_str(),
                        "type": "function",
                        "function": {"name": request.name, "arguments": request.arguments.to_string()}
                    })
                })
                .collect::<Vec<_>>();
            if !calls.is_empty() {
                encoded["tool_calls"] = Value::Array(calls);
            }
            vec![encoded]
        }
        Role::User | Role::System => {
            vec![json!({"role": message.role.as_str(), "content": message.joined_text().unwrap_or_default()})]
        }
    }
}

fn decode_response(response: &Value) -> Result<Vec<super::StreamEvent>, ReasoningError> {
    let choice = response
        .get("choices")
        .and_then(|choices| choices.get(0))
        .ok_or_else(|| ReasoningError::Decode("response has no choices".to_string()))?;
    let message = choice
        .get("message")
        .ok_or_else(|| ReasoningError::Decode("choice has no message".to_string()))?;

    let mut blocks = Vec::new();
    if let Some(text) = message.get("content").and_then(Value::as_str).filter(|text| !text.is_empty()) {
        blocks.push(ContentBlock::text(text));
    }
    let calls = message.get("tool_calls").and_then(Value::as_array).into_iter().flatten();
    for (index, call) in calls.enumerate() {
        let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
        let function = call
            .get("function")
            .ok_or_else(|| ReasoningError::Decode("tool call has no function".to_string()))?;
        let name = function
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ReasoningError::Decode("tool call has no name".to_string()))?;
        // Ollama returns arguments as an object, OpenAI as a JSON string.
        let arguments = match function.get("arguments") {
            Some(Value::String(raw)) if raw.trim().is_empty() => json!({}),
            Some(Value::String(raw)) => serde_json::from_str(raw).map_err(|error| {
                ReasoningError::Decode(format!("tool `{name}` arguments are not JSON: {error}"))
            })?,
            Some(other) => other.clone(),
            None => json!({}),
        };
        let call_id = if id.is_empty() { format!("call_{index}") } else { id.to_string() };
        blocks.push(ContentBlock::ToolUse(ToolInvocationRequest {
            call_id: CallId::new(call_id),
            name: name.to_string(),
            arguments,
        }));
    }

    let stop_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .map(StopReason::from_provider)
        .unwrap_or(StopReason::EndTurn);
    let usage = response.get("usage").map(|usage| Usage {
        input_tokens: token_count(usage, "prompt_tokens"),
        output_tokens: token_count(usage, "completion_tokens"),
    });
    let reasoning = message
        .get("reasoning_content")
        .or_else(|| message.get("reasoning"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(events_for_turn(blocks, reasoning, stop_reason, usage))
}

fn token_count(usage: &Value, key: &str) -> u32 {
    usage.get(key).and_then(Value::as_u64).unwrap_or(0) as u32
}
