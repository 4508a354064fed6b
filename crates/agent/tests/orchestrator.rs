use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use costscope_agent::llm::scripted::{tool_use, turn_events};
use costscope_agent::llm::ScriptedReasoningEngine;
use costscope_agent::sandbox::{SandboxEvent, SandboxSession, ScriptedSandboxEngine};
use costscope_agent::{
    AgentOrchestrator, CalculationTool, LoopState, OrchestratorSettings, ToolDispatcher,
    CALCULATION_TOOL_NAME,
};
use costscope_core::{
    CallId, ContentBlock, CorrelationId, EstimationError, Message, Role, ToolError, ToolResult,
    ToolSpec,
};
use costscope_mcp::fixtures::{pricing_catalog, ScriptedPricingTransport};
use costscope_mcp::{ExternalToolRegistry, PricingTransport, RemoteCallOutput};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

async fn dispatcher() -> ToolDispatcher {
    let engine = ScriptedSandboxEngine::new()
        .with_output_fn(|code| Ok(vec![SandboxEvent::text(format!("ran: {code}"))]));
    let session = Arc::new(Mutex::new(SandboxSession::new(Arc::new(engine))));
    session.lock().await.start().await.expect("sandbox start");

    let registry = ExternalToolRegistry::connect(Box::new(ScriptedPricingTransport::with_ec2_t3_micro_pricing()))
        .await
        .expect("connect");
    ToolDispatcher::new(CalculationTool::new(session), Arc::new(registry)).expect("dispatcher")
}

fn settings(concurrent_lookups: bool) -> OrchestratorSettings {
    OrchestratorSettings { max_iterations: 5, concurrent_lookups, max_tokens: 512 }
}

/// Deterministic mix of pricing reads, calculations, bad arguments and unknown tools.
fn interleaved_requests(count: usize, seed: usize) -> Vec<ContentBlock> {
    (0..count)
        .map(|i| {
            let id = format!("req-{seed}-{i}");
            match (i * 7 + seed) % 5 {
                0 => tool_use(&id, "get_pricing_service_codes", json!({})),
                1 => tool_use(&id, "get_pricing", json!({"service_code": "AmazonEC2", "region": "us-east-1"})),
                2 => tool_use(&id, CALCULATION_TOOL_NAME, json!({"calculation_code": format!("print({i})")})),
                3 => tool_use(&id, "get_pricing_attribute_values", json!({"service_code": "AmazonEC2"})),
                _ => tool_use(&id, "describe_everything", json!({})),
            }
        })
        .collect()
}

fn result_ids(message: &Message) -> Vec<CallId> {
    message
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolResult(result) => Some(result.call_id.clone()),
            _ => None,
        })
        .collect()
}

fn results(message: &Message) -> Vec<ToolResult> {
    message
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolResult(result) => Some(result.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn tool_results_follow_request_order() {
    for concurrent_lookups in [false, true] {
        for count in 1..=12 {
            for seed in 0..3 {
                let requests = interleaved_requests(count, seed);
                let expected = Message::assistant(requests.clone())
                    .tool_requests()
                    .into_iter()
                    .map(|request| request.call_id)
                    .collect::<Vec<_>>();

                let engine = ScriptedReasoningEngine::from_turns(vec![requests, vec![ContentBlock::text("done")]]);
                let tools = dispatcher().await;
                let mut orchestrator =
                    AgentOrchestrator::new(&engine, &tools, settings(concurrent_lookups), CorrelationId::new());

                let transcript = orchestrator
                    .run("system", Message::user("estimate"))
                    .await
                    .expect("loop converges");

                let messages = transcript.messages();
                assert_eq!(messages.len(), 4);
                assert_eq!(messages[2].role, Role::ToolResult);
                assert_eq!(
                    result_ids(&messages[2]),
                    expected,
                    "count={count} seed={seed} concurrent={concurrent_lookups}"
                );
                assert!(!transcript.has_outstanding_calls());
                assert_eq!(orchestrator.state(), LoopState::Done);
            }
        }
    }
}

/// Answers each lookup after a delay that shrinks with its start position, so
/// later lookups of a batch finish first.
struct SlowFirstTransport {
    batch_size: usize,
    started: Arc<AtomicUsize>,
    finished: Arc<std::sync::Mutex<Vec<usize>>>,
}

#[async_trait]
impl PricingTransport for SlowFirstTransport {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        Ok(pricing_catalog())
    }

    async fn call_tool(&self, _name: &str, _arguments: Map<String, Value>) -> Result<RemoteCallOutput, ToolError> {
        let position = self.started.fetch_add(1, Ordering::SeqCst);
        let delay = 10 * (self.batch_size.saturating_sub(position)) as u64;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.finished.lock().unwrap().push(position);
        Ok(RemoteCallOutput::text(format!("lookup {position}")))
    }

    async fn close(&self) -> Result<(), ToolError> {
        Ok(())
    }
}

#[tokio::test]
async fn concurrent_lookups_keep_request_order_when_later_ones_finish_first() {
    let count = 4;
    let finished = Arc::new(std::sync::Mutex::new(Vec::new()));
    let transport = SlowFirstTransport {
        batch_size: count,
        started: Arc::new(AtomicUsize::new(0)),
        finished: Arc::clone(&finished),
    };
    let registry = ExternalToolRegistry::connect(Box::new(transport)).await.expect("connect");
    let session = Arc::new(Mutex::new(SandboxSession::new(Arc::new(ScriptedSandboxEngine::new()))));
    let tools = ToolDispatcher::new(CalculationTool::new(session), Arc::new(registry)).expect("dispatcher");

    let requests = (0..count)
        .map(|i| tool_use(&format!("lookup-{i}"), "get_pricing_service_codes", json!({})))
        .collect::<Vec<_>>();
    let engine = ScriptedReasoningEngine::from_turns(vec![requests, vec![ContentBlock::text("done")]]);
    let mut orchestrator = AgentOrchestrator::new(&engine, &tools, settings(true), CorrelationId::new());

    let transcript = orchestrator.run("system", Message::user("estimate")).await.expect("converges");

    assert_eq!(*finished.lock().unwrap(), vec![3, 2, 1, 0]);
    let fed_back = results(&transcript.messages()[2]);
    let ids = fed_back.iter().map(|result| result.call_id.as_str().to_string()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["lookup-0", "lookup-1", "lookup-2", "lookup-3"]);
    let texts = fed_back.iter().map(ToolResult::text_content).collect::<Vec<_>>();
    assert_eq!(texts, vec!["lookup 0", "lookup 1", "lookup 2", "lookup 3"]);
}

#[tokio::test]
async fn tool_failures_are_fed_back_to_the_model() {
    let engine = ScriptedReasoningEngine::from_turns(vec![
        vec![
            tool_use("bad-args", "get_pricing", json!({"region": "us-east-1"})),
            tool_use("unknown", "get_spot_price", json!({})),
            tool_use("calc", CALCULATION_TOOL_NAME, json!({"calculation_code": "print(2 * 3)"})),
        ],
        vec![ContentBlock::text("Recovered.")],
    ]);
    let probe = engine.probe();
    let tools = dispatcher().await;
    let mut orchestrator = AgentOrchestrator::new(&engine, &tools, settings(false), CorrelationId::new());

    let transcript = orchestrator.run("system", Message::user("estimate")).await.expect("converges");
    let fed_back = results(&transcript.messages()[2]);

    assert!(fed_back[0].is_failure());
    assert!(fed_back[0].text_content().contains("violate its schema"));
    assert!(fed_back[1].is_failure());
    assert_eq!(fed_back[1].text_content(), "unknown tool `get_spot_price`");
    assert!(!fed_back[2].is_failure());
    assert_eq!(fed_back[2].text_content(), "ran: print(2 * 3)");

    // The second model call saw the failures.
    let second = &probe.requests()[1];
    assert_eq!(second.messages.last().map(|message| message.role), Some(Role::ToolResult));
    assert_eq!(transcript.last().and_then(Message::joined_text).as_deref(), Some("Recovered."));
}

#[tokio::test]
async fn cap_counts_model_calls_and_fails_the_loop() {
    let engine = ScriptedReasoningEngine::from_fn(|index, _| {
        Ok(turn_events(vec![tool_use(&format!("c-{index}"), "get_pricing_service_codes", json!({}))]))
    });
    let probe = engine.probe();
    let tools = dispatcher().await;
    let settings = OrchestratorSettings { max_iterations: 3, concurrent_lookups: false, max_tokens: 512 };
    let mut orchestrator = AgentOrchestrator::new(&engine, &tools, settings, CorrelationId::new());

    let error = orchestrator.run("system", Message::user("estimate")).await.unwrap_err();

    assert_eq!(error, EstimationError::LoopDidNotConverge { iterations: 3 });
    assert_eq!(probe.call_count(), 3);
    assert_eq!(orchestrator.model_calls(), 3);
    assert_eq!(orchestrator.state(), LoopState::Failed);
}

#[tokio::test]
async fn every_request_declares_all_tools_and_full_history() {
    let engine = ScriptedReasoningEngine::from_turns(vec![
        vec![tool_use("c-1", "get_pricing_service_codes", json!({}))],
        vec![ContentBlock::text("EC2 is available.")],
    ]);
    let probe = engine.probe();
    let tools = dispatcher().await;
    let mut orchestrator = AgentOrchestrator::new(&engine, &tools, settings(false), CorrelationId::new());
    orchestrator.run("be precise", Message::user("estimate")).await.expect("converges");

    let requests = probe.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].messages.len(), 1);
    assert_eq!(requests[1].messages.len(), 3);
    for request in &requests {
        assert_eq!(request.system, "be precise");
        assert_eq!(request.tools.len(), 5);
        assert_eq!(request.max_tokens, 512);
    }

    let codes: Value = serde_json::from_str(&results(&orchestrator_history(&requests[1]))[0].text_content())
        .expect("json result");
    assert_eq!(codes[0], "AmazonEC2");
}

fn orchestrator_history(request: &costscope_agent::llm::ModelRequest) -> Message {
    request.messages.last().cloned().expect("history")
}
