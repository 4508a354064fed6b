//! In-memory sandbox engine with canned execution output.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use costscope_core::SandboxError;

use super::{SandboxEngine, SandboxEvent, SandboxHandle};

type OutputFn = dyn Fn(&str) -> Result<Vec<SandboxEvent>, SandboxError> + Send + Sync;

#[derive(Clone, Default)]
pub struct SandboxProbe {
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl SandboxProbe {
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().map(|codes| codes.clone()).unwrap_or_default()
    }
}

pub struct ScriptedSandboxEngine {
    output: Arc<OutputFn>,
    start_error: Option<SandboxError>,
    fail_stop: bool,
    probe: SandboxProbe,
}

impl Default for ScriptedSandboxEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSandboxEngine {
    pub fn new() -> Self {
        Self {
            output: Arc::new(|_| Ok(Vec::new())),
            start_error: None,
            fail_stop: false,
            probe: SandboxProbe::default(),
        }
    }

    pub fn with_events(self, events: Vec<SandboxEvent>) -> Self {
        self.with_output_fn(move |_| Ok(events.clone()))
    }

    pub fn with_output_fn(
        mut self,
        output: impl Fn(&str) -> Result<Vec<SandboxEvent>, SandboxError> + Send + Sync + 'static,
    ) -> Self {
        self.output = Arc::new(output);
        self
    }

    pub fn failing_start(mut self, message: impl Into<String>) -> Self {
        self.start_error = Some(SandboxError::Start(message.into()));
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn probe(&self) -> SandboxProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl SandboxEngine for ScriptedSandboxEngine {
    async fn start(&self) -> Result<Box<dyn SandboxHandle>, SandboxError> {
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.start_error {
            return Err(error.clone());
        }
        Ok(Box::new(ScriptedHandle {
            output: Arc::clone(&self.output),
            fail_stop: self.fail_stop,
            probe: self.probe.clone(),
        }))
    }
}

struct ScriptedHandle {
    output: Arc<OutputFn>,
    fail_stop: bool,
    probe: SandboxProbe,
}

#[async_trait]
impl SandboxHandle for ScriptedHandle {
    async fn invoke(&mut self, code: &str, _language: &str) -> Result<Vec<SandboxEvent>, SandboxError> {
        if let Ok(mut executed) = self.probe.executed.lock() {
            executed.push(code.to_string());
        }
        (self.output)(code)
    }

    async fn stop(&mut self) -> Result<(), SandboxError> {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            return Err(SandboxError::Execution("scripted stop failure".to_string()));
        }
        Ok(())
    }
}
