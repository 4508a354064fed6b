use std::time::Duration;

use thiserror::Error;

use crate::message::CallId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("tool result `{0}` does not answer an outstanding tool invocation")]
    UnmatchedToolResult(CallId),
    #[error("tool invocation id `{0}` is already in use")]
    DuplicateCallId(CallId),
}

/// Failures of a single tool call. These are fed back to the reasoning engine
/// as failed tool results and never end an estimation on their own.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool transport is not connected: {0}")]
    Unavailable(String),
    #[error("arguments for `{tool}` violate its schema: {message}")]
    SchemaViolation { tool: String, message: String },
    #[error("tool `{tool}` failed: {message}")]
    Invocation { tool: String, message: String },
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SandboxError {
    #[error("sandbox failed to start: {0}")]
    Start(String),
    #[error("sandbox session is already running")]
    AlreadyRunning,
    #[error("sandbox session is not running (state: {state})")]
    NotRunning { state: &'static str },
    #[error("sandbox execution failed: {0}")]
    Execution(String),
    #[error("sandbox execution timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReasoningError {
    #[error("reasoning engine request failed: {0}")]
    Transport(String),
    #[error("reasoning engine returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("reasoning engine response could not be decoded: {0}")]
    Decode(String),
    #[error("reasoning engine event stream violated protocol: {0}")]
    Protocol(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("no AWS credentials found (checked environment and profile `{profile}`)")]
    Missing { profile: String },
    #[error("could not read AWS credentials file `{path}`: {message}")]
    Unreadable { path: String, message: String },
}

/// Terminal failures of one `estimate_costs` call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EstimationError {
    #[error("AWS credentials unavailable: {0}")]
    CredentialsMissing(#[from] CredentialsError),
    #[error("estimation setup failed: {0}")]
    Setup(String),
    #[error("sandbox setup failed: {0}")]
    Sandbox(#[from] SandboxError),
    #[error("tool `{0}` is declared more than once")]
    ToolNameCollision(String),
    #[error(transparent)]
    Reasoning(#[from] ReasoningError),
    #[error(transparent)]
    Transcript(#[from] TranscriptError),
    #[error("agent loop did not converge after {iterations} model calls")]
    LoopDidNotConverge { iterations: u32 },
    #[error("estimation cancelled after {0:?}")]
    Cancelled(Duration),
}

impl EstimationError {
    /// Short machine-friendly class used in CLI payloads and log fields.
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::CredentialsMissing(_) => "credentials_missing",
            Self::Setup(_) => "setup",
            Self::Sandbox(_) => "sandbox_start",
            Self::ToolNameCollision(_) => "tool_name_collision",
            Self::Reasoning(_) => "reasoning",
            Self::Transcript(_) => "transcript",
            Self::LoopDidNotConverge { .. } => "loop_did_not_converge",
            Self::Cancelled(_) => "cancelled",
        }
    }

    /// Setup failures abort before any model call is attempted.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::CredentialsMissing(_)
                | Self::Setup(_)
                | Self::Sandbox(_)
                | Self::ToolNameCollision(_)
        )
    }
}
