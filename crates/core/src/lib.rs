//! Shared domain model and ambient stack for costscope: the conversation
//! data model, error taxonomy, layered configuration, AWS credential
//! discovery, and the estimation prompt templates.

pub mod config;
pub mod credentials;
pub mod diagnostics;
pub mod errors;
pub mod message;
pub mod prompts;

pub use credentials::{AwsCredentials, CredentialsProvider, DefaultCredentialsChain};
pub use diagnostics::{failure_report, is_failure_report, CorrelationId, NO_RESULT_MARKER};
pub use errors::{
    CredentialsError, EstimationError, ReasoningError, SandboxError, ToolError, TranscriptError,
};
pub use message::{
    CallId, ContentBlock, Message, Role, ToolInvocationRequest, ToolResult, ToolResultContent,
    ToolSpec, ToolStatus, Transcript,
};
