//! Deterministic reasoning engine driven by a script, for tests and demos.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use costscope_core::{CallId, ContentBlock, ReasoningError, ToolInvocationRequest};
use serde_json::Value;

use super::{events_for_turn, into_event_stream, EventStream, ModelRequest, ReasoningEngine, StopReason, StreamEvent};

type TurnFn = dyn Fn(usize, &ModelRequest) -> Result<Vec<StreamEvent>, ReasoningError> + Send + Sync;

/// Observes a scripted engine after it has been handed to an orchestrator.
#[derive(Clone, Default)]
pub struct EngineProbe {
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl EngineProbe {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|requests| requests.clone()).unwrap_or_default()
    }
}

pub struct ScriptedReasoningEngine {
    script: Box<TurnFn>,
    probe: EngineProbe,
}

impl ScriptedReasoningEngine {
    /// Replays the given turns in order; fails once the script runs out.
    pub fn from_turns(turns: Vec<Vec<ContentBlock>>) -> Self {
        let queue = Mutex::new(turns.into_iter().collect::<VecDeque<_>>());
        Self::from_fn(move |index, _| {
            let next = queue.lock().ok().and_then(|mut queue| queue.pop_front());
            match next {
                Some(blocks) => Ok(turn_events(blocks)),
                None => Err(ReasoningError::Protocol(format!("script exhausted at model call {}", index + 1))),
            }
        })
    }

    /// Computes each turn from the zero-based call index and the request.
    pub fn from_fn(
        script: impl Fn(usize, &ModelRequest) -> Result<Vec<StreamEvent>, ReasoningError> + Send + Sync + 'static,
    ) -> Self {
        Self { script: Box::new(script), probe: EngineProbe::default() }
    }

    pub fn probe(&self) -> EngineProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedReasoningEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn respond(&self, request: &ModelRequest) -> Result<EventStream, ReasoningError> {
        let index = self.probe.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.probe.requests.lock() {
            requests.push(request.clone());
        }
        (self.script)(index, request).map(into_event_stream)
    }
}

/// Events for one materialized turn; the stop reason follows its content.
pub fn turn_events(blocks: Vec<ContentBlock>) -> Vec<StreamEvent> {
    let stop_reason = if blocks.iter().any(|block| matches!(block, ContentBlock::ToolUse(_))) {
        StopReason::ToolUse
    } else {
        StopReason::EndTurn
    };
    events_for_turn(blocks, None, stop_reason, None)
}

pub fn tool_use(call_id: &str, name: &str, arguments: Value) -> ContentBlock {
    ContentBlock::ToolUse(ToolInvocationRequest {
        call_id: CallId::new(call_id),
        name: name.to_string(),
        arguments,
    })
}
