//! Conversation data model shared by the orchestrator, the tool layers and
//! the reasoning-engine providers.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::TranscriptError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    ToolResult,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::ToolResult => "tool_result",
        }
    }
}

/// Stable identifier the reasoning engine assigns to each tool invocation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self { name: name.into(), description: description.into(), input_schema }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationRequest {
    pub call_id: CallId,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultContent {
    Text { text: String },
    Json { value: Value },
}

impl ToolResultContent {
    /// Renders the content as plain text for providers that only accept strings.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Json { value } => value.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Failure,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: CallId,
    pub content: Vec<ToolResultContent>,
    pub status: ToolStatus,
}

impl ToolResult {
    pub fn text(call_id: CallId, text: impl Into<String>) -> Self {
        Self {
            call_id,
            content: vec![ToolResultContent::Text { text: text.into() }],
            status: ToolStatus::Success,
        }
    }

    pub fn json(call_id: CallId, value: Value) -> Self {
        Self { call_id, content: vec![ToolResultContent::Json { value }], status: ToolStatus::Success }
    }

    pub fn failure(call_id: CallId, message: impl Into<String>) -> Self {
        Self {
            call_id,
            content: vec![ToolResultContent::Text { text: message.into() }],
            status: ToolStatus::Failure,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == ToolStatus::Failure
    }

    pub fn text_content(&self) -> String {
        self.content.iter().map(ToolResultContent::to_text).collect::<Vec<_>>().join("\n")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse(ToolInvocationRequest),
    ToolResult(ToolResult),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    fn is_empty(&self) -> bool {
        matches!(self, Self::Text { text } if text.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::text(text)])
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self::new(Role::ToolResult, results.into_iter().map(ContentBlock::ToolResult).collect())
    }

    pub fn is_blank(&self) -> bool {
        self.content.iter().all(ContentBlock::is_empty)
    }

    pub fn tool_requests(&self) -> Vec<ToolInvocationRequest> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Concatenates every text block in emission order.
    pub fn joined_text(&self) -> Option<String> {
        let parts = self
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();
        if parts.is_empty() {
            None
        } else {
            Some(parts.concat())
        }
    }
}

/// Ordered message history for one estimation request.
///
/// Blank messages are dropped on push and every tool result must answer a
/// tool invocation that was recorded earlier and not answered yet.
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    outstanding: HashSet<CallId>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) -> Result<(), TranscriptError> {
        if message.is_blank() {
            return Ok(());
        }

        let mut seen_in_message = HashSet::new();
        for block in &message.content {
            match block {
                ContentBlock::ToolUse(request) => {
                    if self.outstanding.contains(&request.call_id)
                        || !seen_in_message.insert(request.call_id.clone())
                    {
                        return Err(TranscriptError::DuplicateCallId(request.call_id.clone()));
                    }
                }
                ContentBlock::ToolResult(result) => {
                    if !self.outstanding.contains(&result.call_id) {
                        return Err(TranscriptError::UnmatchedToolResult(result.call_id.clone()));
                    }
                }
                ContentBlock::Text { .. } => {}
            }
        }

        for block in &message.content {
            match block {
                ContentBlock::ToolUse(request) => {
                    self.outstanding.insert(request.call_id.clone());
                }
                ContentBlock::ToolResult(result) => {
                    self.outstanding.remove(&result.call_id);
                }
                ContentBlock::Text { .. } => {}
            }
        }

        self.messages.push(message);
        Ok(())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_outstanding_calls(&self) -> bool {
        !self.outstanding.is_empty()
    }
}
