use costscope_core::config::AgentConfig;
use costscope_core::{
    CorrelationId, EstimationError, Message, ToolInvocationRequest, ToolResult, Transcript,
};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::llm::{collect_turn, ModelRequest, ReasoningEngine, StopReason};
use crate::tools::ToolDispatcher;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Upper bound on model calls for one estimation.
    pub max_iterations: u32,
    /// Run adjacent read-only pricing lookups of one turn concurrently.
    pub concurrent_lookups: bool,
    pub max_tokens: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self { max_iterations: 20, concurrent_lookups: false, max_tokens: 4096 }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AgentConfig, max_tokens: u32) -> Self {
        Self {
            max_iterations: config.max_iterations,
            concurrent_lookups: config.concurrent_lookups,
            max_tokens,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Init,
    AwaitingModelResponse,
    DispatchingTools,
    Done,
    Failed,
}

/// Plan-act-observe loop over one transcript.
pub struct AgentOrchestrator<'a> {
    engine: &'a dyn ReasoningEngine,
    tools: &'a ToolDispatcher,
    settings: OrchestratorSettings,
    correlation_id: CorrelationId,
    state: LoopState,
    model_calls: u32,
}

impl<'a> AgentOrchestrator<'a> {
    pub fn new(
        engine: &'a dyn ReasoningEngine,
        tools: &'a ToolDispatcher,
        settings: OrchestratorSettings,
        correlation_id: CorrelationId,
    ) -> Self {
        Self { engine, tools, settings, correlation_id, state: LoopState::Init, model_calls: 0 }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn model_calls(&self) -> u32 {
        self.model_calls
    }

    /// Runs until the model answers without tool requests. The returned
    /// transcript ends with that answer unless it was blank.
    pub async fn run(&mut self, system: &str, initial: Message) -> Result<Transcript, EstimationError> {
        let result = self.drive(system, initial).await;
        self.state = if result.is_ok() { LoopState::Done } else { LoopState::Failed };
        result
    }

    async fn drive(&mut self, system: &str, initial: Message) -> Result<Transcript, EstimationError> {
        let mut transcript = Transcript::new();
        transcript.push(initial)?;

        loop {
            if self.model_calls >= self.settings.max_iterations {
                warn!(
                    event_name = "agent.loop.cap_reached",
                    correlation_id = %self.correlation_id,
                    model_calls = self.model_calls,
                    "agent loop reached its iteration cap"
                );
                return Err(EstimationError::LoopDidNotConverge { iterations: self.model_calls });
            }

            self.state = LoopState::AwaitingModelResponse;
            let request = ModelRequest::new(system, transcript.messages().to_vec(), self.tools.specs().to_vec())
                .with_max_tokens(self.settings.max_tokens);
            self.model_calls += 1;
            debug!(
                event_name = "agent.model.request",
                correlation_id = %self.correlation_id,
                model_call = self.model_calls,
                messages = request.messages.len(),
                engine = self.engine.name(),
                "requesting model turn"
            );

            let turn = collect_turn(self.engine.respond(&request).await?).await?;
            let requests = turn.tool_requests();
            if turn.stop_reason == StopReason::MaxTokens {
                warn!(
                    event_name = "agent.model.truncated",
                    correlation_id = %self.correlation_id,
                    "model turn hit the token limit"
                );
            }
            transcript.push(turn.message)?;

            if requests.is_empty() {
                info!(
                    event_name = "agent.loop.done",
                    correlation_id = %self.correlation_id,
                    model_calls = self.model_calls,
                    "model produced a final answer"
                );
                return Ok(transcript);
            }

            self.state = LoopState::DispatchingTools;
            let results = self.dispatch_all(&requests).await;
            transcript.push(Message::tool_results(results))?;
        }
    }

    /// Results come back in request order regardless of execution strategy.
    async fn dispatch_all(&self, requests: &[ToolInvocationRequest]) -> Vec<ToolResult> {
        info!(
            event_name = "agent.tools.dispatch",
            correlation_id = %self.correlation_id,
            count = requests.len(),
            tools = ?requests.iter().map(|request| request.name.as_str()).collect::<Vec<_>>(),
            "dispatching tool requests"
        );

        let mut results = Vec::with_capacity(requests.len());
        if !self.settings.concurrent_lookups {
            for request in requests {
                results.push(self.tools.dispatch(request).await);
            }
            return results;
        }

        let mut index = 0;
        while index < requests.len() {
            if !self.tools.is_read_only(&requests[index].name) {
                results.push(self.tools.dispatch(&requests[index]).await);
                index += 1;
                continue;
            }
            let run_end = requests[index..]
                .iter()
                .position(|request| !self.tools.is_read_only(&request.name))
                .map_or(requests.len(), |offset| index + offset);
            let batch = requests[index..run_end].iter().map(|request| self.tools.dispatch(request));
            results.extend(join_all(batch).await);
            index = run_end;
        }
        results
    }
}
