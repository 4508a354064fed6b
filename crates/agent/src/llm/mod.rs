//! Reasoning engine boundary.
//!
//! Every provider is normalized into the [`StreamEvent`] vocabulary. The
//! orchestrator consumes a whole event stream through [`TurnAssembler`] and
//! only acts once message-stop has been observed; partial tool-call fragments
//! are never dispatched.

mod anthropic;
mod http;
mod openai;
pub mod scripted;

use async_trait::async_trait;
use costscope_core::config::{LlmConfig, LlmProvider};
use costscope_core::{CallId, ContentBlock, Message, ReasoningError, Role, ToolInvocationRequest, ToolSpec};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, trace};

pub use anthropic::AnthropicEngine;
pub use openai::OpenAiCompatibleEngine;
pub use scripted::ScriptedReasoningEngine;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    ToolUse,
    MaxTokens,
    EndTurn,
}

impl StopReason {
    /// Maps provider stop/finish reasons; anything unrecognized ends the turn.
    pub fn from_provider(raw: &str) -> Self {
        match raw {
            "tool_use" | "tool_calls" | "function_call" => Self::ToolUse,
            "max_tokens" | "length" => Self::MaxTokens,
            _ => Self::EndTurn,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ContentStart {
    Text,
    ToolUse { call_id: CallId, name: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ContentDelta {
    Text(String),
    /// Fragment of the JSON-encoded tool arguments.
    ToolInput(String),
    Reasoning(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    MessageStart { role: Role },
    ContentStart(ContentStart),
    ContentDelta(ContentDelta),
    ContentStop,
    MessageStop(StopReason),
    Metadata(Usage),
}

pub type EventStream = BoxStream<'static, Result<StreamEvent, ReasoningError>>;

/// One model call: transcript, tool declarations and sampling parameters.
#[derive(Clone, Debug)]
pub struct ModelRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ModelRequest {
    pub fn new(system: impl Into<String>, messages: Vec<Message>, tools: Vec<ToolSpec>) -> Self {
        Self { system: system.into(), messages, tools, temperature: 0.0, max_tokens: 4096 }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn respond(&self, request: &ModelRequest) -> Result<EventStream, ReasoningError>;
}

pub fn create_reasoning_engine(config: &LlmConfig) -> Result<Box<dyn ReasoningEngine>, ReasoningError> {
    Ok(match config.provider {
        LlmProvider::OpenAi | LlmProvider::Ollama => Box::new(OpenAiCompatibleEngine::new(config)?),
        LlmProvider::Anthropic => Box::new(AnthropicEngine::new(config)?),
    })
}

/// A fully materialized model turn.
#[derive(Clone, Debug, PartialEq)]
pub struct AssembledTurn {
    pub message: Message,
    pub stop_reason: StopReason,
    pub usage: Option<Usage>,
}

impl AssembledTurn {
    pub fn tool_requests(&self) -> Vec<ToolInvocationRequest> {
        self.message.tool_requests()
    }

    pub fn is_final(&self) -> bool {
        self.tool_requests().is_empty()
    }
}

enum OpenBlock {
    Text(String),
    ToolUse { call_id: CallId, name: String, input: String },
}

#[derive(Default)]
pub struct TurnAssembler {
    started: bool,
    open: Option<OpenBlock>,
    blocks: Vec<ContentBlock>,
    stop_reason: Option<StopReason>,
    usage: Option<Usage>,
    reasoning_chars: usize,
}

impl TurnAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: StreamEvent) -> Result<(), ReasoningError> {
        if let StreamEvent::Metadata(usage) = event {
            self.usage = Some(usage);
            return Ok(());
        }
        if self.stop_reason.is_some() {
            return Err(protocol(format!("content event after message-stop: {event:?}")));
        }

        match event {
            StreamEvent::MessageStart { role } => {
                if self.started {
                    return Err(protocol("second message-start in one turn"));
                }
                if role != Role::Assistant {
                    return Err(protocol(format!("turn started with role `{}`", role.as_str())));
                }
                self.started = true;
            }
            StreamEvent::ContentStart(start) => {
                self.require_started()?;
                self.close_block()?;
                self.open = Some(match start {
                    ContentStart::Text => OpenBlock::Text(String::new()),
                    ContentStart::ToolUse { call_id, name } => {
                        OpenBlock::ToolUse { call_id, name, input: String::new() }
                    }
                });
            }
            StreamEvent::ContentDelta(delta) => {
                self.require_started()?;
                self.apply_delta(delta)?;
            }
            StreamEvent::ContentStop => {
                self.require_started()?;
                self.close_block()?;
            }
            StreamEvent::MessageStop(reason) => {
                self.require_started()?;
                self.close_block()?;
                self.stop_reason = Some(reason);
            }
            StreamEvent::Metadata(_) => {}
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<AssembledTurn, ReasoningError> {
        let Some(stop_reason) = self.stop_reason.take() else {
            return Err(protocol("stream ended before message-stop"));
        };
        if self.reasoning_chars > 0 {
            trace!(reasoning_chars = self.reasoning_chars, "discarded reasoning fragments");
        }
        Ok(AssembledTurn { message: Message::assistant(self.blocks), stop_reason, usage: self.usage })
    }

    fn require_started(&self) -> Result<(), ReasoningError> {
        if self.started {
            Ok(())
        } else {
            Err(protocol("content event before message-start"))
        }
    }

    fn apply_delta(&mut self, delta: ContentDelta) -> Result<(), ReasoningError> {
        let fragment = match delta {
            ContentDelta::Reasoning(fragment) => {
                self.reasoning_chars += fragment.len();
                return Ok(());
            }
            ContentDelta::Text(fragment) => {
                // Some providers stream text without an explicit block start.
                let block = self.open.get_or_insert_with(|| OpenBlock::Text(String::new()));
                match block {
                    OpenBlock::Text(text) => {
                        text.push_str(&fragment);
                        return Ok(());
                    }
                    OpenBlock::ToolUse { name, .. } => {
                        return Err(protocol(format!("text delta inside tool-use block `{name}`")));
                    }
                }
            }
            ContentDelta::ToolInput(fragment) => fragment,
        };

        match &mut self.open {
            Some(OpenBlock::ToolUse { input, .. }) => {
                input.push_str(&fragment);
                Ok(())
            }
            _ => Err(protocol("tool input delta outside a tool-use block")),
        }
    }

    fn close_block(&mut self) -> Result<(), ReasoningError> {
        match self.open.take() {
            None => {}
            Some(OpenBlock::Text(text)) => {
                if !text.is_empty() {
                    self.blocks.push(ContentBlock::Text { text });
                }
            }
            Some(OpenBlock::ToolUse { call_id, name, input }) => {
                let arguments = if input.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&input).map_err(|error| {
                        protocol(format!("tool `{name}` arguments are not valid JSON: {error}"))
                    })?
                };
                self.blocks.push(ContentBlock::ToolUse(ToolInvocationRequest { call_id, name, arguments }));
            }
        }
        Ok(())
    }
}

/// Drains an event stream into one turn.
pub async fn collect_turn(mut events: EventStream) -> Result<AssembledTurn, ReasoningError> {
    let mut assembler = TurnAssembler::new();
    while let Some(event) = events.next().await {
        assembler.push(event?)?;
    }
    let turn = assembler.finish()?;
    debug!(
        stop_reason = ?turn.stop_reason,
        tool_requests = turn.tool_requests().len(),
        "assembled model turn"
    );
    Ok(turn)
}

/// Builds the event sequence for an already materialized provider response.
pub(crate) fn events_for_turn(
    blocks: Vec<ContentBlock>,
    reasoning: Option<String>,
    stop_reason: StopReason,
    usage: Option<Usage>,
) -> Vec<StreamEvent> {
    let mut events = vec![StreamEvent::MessageStart { role: Role::Assistant }];
    if let Some(reasoning) = reasoning.filter(|text| !text.is_empty()) {
        events.push(StreamEvent::ContentDelta(ContentDelta::Reasoning(reasoning)));
    }
    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                events.push(StreamEvent::ContentStart(ContentStart::Text));
                events.push(StreamEvent::ContentDelta(ContentDelta::Text(text)));
                events.push(StreamEvent::ContentStop);
            }
            ContentBlock::ToolUse(request) => {
                events.push(StreamEvent::ContentStart(ContentStart::ToolUse {
                    call_id: request.call_id,
                    name: request.name,
                }));
                events.push(StreamEvent::ContentDelta(ContentDelta::ToolInput(request.arguments.to_string())));
                events.push(StreamEvent::ContentStop);
            }
            ContentBlock::ToolResult(_) => {}
        }
    }
    events.push(StreamEvent::MessageStop(stop_reason));
    if let Some(usage) = usage {
        events.push(StreamEvent::Metadata(usage));
    }
    events
}

pub(crate) fn into_event_stream(events: Vec<StreamEvent>) -> EventStream {
    futures::stream::iter(events.into_iter().map(Ok)).boxed()
}

fn protocol(message: impl Into<String>) -> ReasoningError {
    ReasoningError::Protocol(message.into())
}
