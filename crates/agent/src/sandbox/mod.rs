//! Stateful code-execution session used only by the calculation tool.
//!
//! The execution engine has no route back to the tool dispatcher, so code run
//! here cannot issue further tool calls.

mod process;
pub mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use costscope_core::SandboxError;
use tracing::{debug, info, warn};

pub use process::ProcessSandboxEngine;
pub use scripted::ScriptedSandboxEngine;

pub const DEFAULT_LANGUAGE: &str = "python";

/// One result event from an execution; only textual payloads are collected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SandboxEvent {
    pub text: Option<String>,
}

impl SandboxEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()) }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Starts execution sessions.
#[async_trait]
pub trait SandboxEngine: Send + Sync {
    async fn start(&self) -> Result<Box<dyn SandboxHandle>, SandboxError>;
}

/// A live execution session. Dropping it must release the underlying resources.
#[async_trait]
pub trait SandboxHandle: Send {
    async fn invoke(&mut self, code: &str, language: &str) -> Result<Vec<SandboxEvent>, SandboxError>;

    async fn stop(&mut self) -> Result<(), SandboxError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SandboxState {
    Uninitialized,
    Running,
    Stopped,
}

impl SandboxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

enum SessionState {
    Uninitialized,
    Running(Box<dyn SandboxHandle>),
    Stopped,
}

pub struct SandboxSession {
    engine: Arc<dyn SandboxEngine>,
    state: SessionState,
    language: String,
}

impl SandboxSession {
    pub fn new(engine: Arc<dyn SandboxEngine>) -> Self {
        Self { engine, state: SessionState::Uninitialized, language: DEFAULT_LANGUAGE.to_string() }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn state(&self) -> SandboxState {
        match self.state {
            SessionState::Uninitialized => SandboxState::Uninitialized,
            SessionState::Running(_) => SandboxState::Running,
            SessionState::Stopped => SandboxState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Running(_))
    }

    pub async fn start(&mut self) -> Result<(), SandboxError> {
        if self.is_running() {
            return Err(SandboxError::AlreadyRunning);
        }
        let handle = self.engine.start().await?;
        self.state = SessionState::Running(handle);
        info!(event_name = "sandbox.started", "sandbox session started");
        Ok(())
    }

    /// Runs `code` and joins every textual fragment in emission order.
    pub async fn execute(&mut self, code: &str) -> Result<String, SandboxError> {
        let state = self.state();
        let SessionState::Running(handle) = &mut self.state else {
            return Err(SandboxError::NotRunning { state: state.as_str() });
        };

        let events = handle.invoke(code, &self.language).await?;
        let fragments = events.into_iter().filter_map(|event| event.text).collect::<Vec<_>>();
        debug!(event_name = "sandbox.executed", fragments = fragments.len(), "sandbox execution finished");
        Ok(fragments.join("\n"))
    }

    /// Best-effort teardown. A second call is a no-op and failures are logged only.
    pub async fn stop(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Stopped);
        match previous {
            SessionState::Running(handle) => stop_handle(handle).await,
            other => self.state = other,
        }
    }
}

/// A session dropped while running (a cancelled request) is stopped on the
/// current runtime in the background.
impl Drop for SandboxSession {
    fn drop(&mut self) {
        let SessionState::Running(handle) = std::mem::replace(&mut self.state, SessionState::Stopped)
        else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(
                    event_name = "sandbox.dropped_running",
                    "sandbox session dropped while running; stopping in background"
                );
                runtime.spawn(stop_handle(handle));
            }
            Err(_) => warn!(
                event_name = "sandbox.dropped_running",
                "sandbox session dropped outside a runtime; releasing handle without stop"
            ),
        }
    }
}

async fn stop_handle(mut handle: Box<dyn SandboxHandle>) {
    match handle.stop().await {
        Ok(()) => info!(event_name = "sandbox.stopped", "sandbox session stopped"),
        Err(error) => warn!(
            event_name = "sandbox.stop_failed",
            error = %error,
            "sandbox session did not stop cleanly"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use costscope_core::SandboxError;

    use super::{SandboxEvent, SandboxSession, SandboxState, ScriptedSandboxEngine};

    #[tokio::test]
    async fn execute_requires_running_state() {
        let engine = ScriptedSandboxEngine::new();
        let mut session = SandboxSession::new(Arc::new(engine));

        let error = session.execute("print(1)").await.unwrap_err();
        assert_eq!(error, SandboxError::NotRunning { state: "uninitialized" });

        session.start().await.unwrap();
        session.stop().await;
        let error = session.execute("print(1)").await.unwrap_err();
        assert_eq!(error, SandboxError::NotRunning { state: "stopped" });
    }

    #[tokio::test]
    async fn joins_text_fragments_in_order() {
        let engine = ScriptedSandboxEngine::new().with_events(vec![
            SandboxEvent::text("hourly: 0.0104"),
            SandboxEvent::empty(),
            SandboxEvent::text("monthly: 7.488"),
        ]);
        let mut session = SandboxSession::new(Arc::new(engine));
        session.start().await.unwrap();

        let output = session.execute("print(0.0104 * 24 * 30)").await.unwrap();
        assert_eq!(output, "hourly: 0.0104\nmonthly: 7.488");
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let mut session = SandboxSession::new(Arc::new(ScriptedSandboxEngine::new()));
        session.start().await.unwrap();
        assert_eq!(session.start().await.unwrap_err(), SandboxError::AlreadyRunning);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let engine = ScriptedSandboxEngine::new();
        let probe = engine.probe();
        let mut session = SandboxSession::new(Arc::new(engine));
        session.start().await.unwrap();

        session.stop().await;
        session.stop().await;

        assert_eq!(session.state(), SandboxState::Stopped);
        assert_eq!(probe.stop_count(), 1);
    }

    #[tokio::test]
    async fn stop_failure_is_swallowed() {
        let engine = ScriptedSandboxEngine::new().failing_stop();
        let probe = engine.probe();
        let mut session = SandboxSession::new(Arc::new(engine));
        session.start().await.unwrap();

        session.stop().await;
        assert_eq!(session.state(), SandboxState::Stopped);
        assert_eq!(probe.stop_count(), 1);
    }

    #[tokio::test]
    async fn stop_before_start_keeps_session_startable() {
        let mut session = SandboxSession::new(Arc::new(ScriptedSandboxEngine::new()));
        session.stop().await;
        assert_eq!(session.state(), SandboxState::Uninitialized);
        session.start().await.unwrap();
        assert!(session.is_running());
    }

    #[tokio::test]
    async fn dropping_a_running_session_stops_it() {
        let engine = ScriptedSandboxEngine::new();
        let probe = engine.probe();
        let mut session = SandboxSession::new(Arc::new(engine));
        session.start().await.unwrap();

        drop(session);
        for _ in 0..100 {
            if probe.stop_count() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(probe.stop_count(), 1);
    }

    #[tokio::test]
    async fn dropping_a_stopped_session_does_not_stop_again() {
        let engine = ScriptedSandboxEngine::new();
        let probe = engine.probe();
        let mut session = SandboxSession::new(Arc::new(engine));
        session.start().await.unwrap();
        session.stop().await;

        drop(session);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(probe.stop_count(), 1);
    }
}
