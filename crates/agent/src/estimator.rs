//! Public entry point: one architecture description in, one report out.

use std::backtrace::Backtrace;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use costscope_core::config::{AppConfig, PricingConfig};
use costscope_core::credentials::{AwsCredentials, CredentialsProvider, DefaultCredentialsChain};
use costscope_core::prompts::{cost_estimation_prompt, system_prompt_for_region};
use costscope_core::{
    failure_report, CorrelationId, EstimationError, Message, Role, ToolError, Transcript,
    NO_RESULT_MARKER,
};
use costscope_mcp::{ExternalToolRegistry, McpPricingTransport, PricingServerLaunch, PricingTransport};
use tokio::sync::Mutex;
use tracing::{error, info, info_span, Instrument};

use crate::calculation::CalculationTool;
use crate::llm::{create_reasoning_engine, ReasoningEngine};
use crate::runtime::{AgentOrchestrator, OrchestratorSettings};
use crate::sandbox::{ProcessSandboxEngine, SandboxEngine, SandboxSession};
use crate::tools::ToolDispatcher;

/// Opens a pricing transport for one estimation.
#[async_trait]
pub trait PricingConnector: Send + Sync {
    async fn connect(&self, credentials: &AwsCredentials) -> Result<Box<dyn PricingTransport>, ToolError>;
}

#[async_trait]
impl<F> PricingConnector for F
where
    F: Fn(&AwsCredentials) -> Result<Box<dyn PricingTransport>, ToolError> + Send + Sync,
{
    async fn connect(&self, credentials: &AwsCredentials) -> Result<Box<dyn PricingTransport>, ToolError> {
        self(credentials)
    }
}

/// Spawns the pricing MCP server with the resolved credentials.
pub struct McpPricingConnector {
    pricing: PricingConfig,
    region: String,
}

impl McpPricingConnector {
    pub fn new(pricing: PricingConfig, region: impl Into<String>) -> Self {
        Self { pricing, region: region.into() }
    }
}

#[async_trait]
impl PricingConnector for McpPricingConnector {
    async fn connect(&self, credentials: &AwsCredentials) -> Result<Box<dyn PricingTransport>, ToolError> {
        let launch = PricingServerLaunch::from_config(&self.pricing, credentials, &self.region);
        Ok(Box::new(McpPricingTransport::spawn(&launch).await?))
    }
}

#[derive(Clone, Debug)]
pub struct EstimatorSettings {
    pub region: String,
    pub orchestrator: OrchestratorSettings,
    pub request_timeout: Duration,
}

impl EstimatorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            region: config.aws.region.clone(),
            orchestrator: OrchestratorSettings::from_config(&config.agent, config.llm.max_tokens),
            request_timeout: config.agent.request_timeout(),
        }
    }
}

pub struct CostEstimator {
    settings: EstimatorSettings,
    credentials: Arc<dyn CredentialsProvider>,
    engine: Arc<dyn ReasoningEngine>,
    sandbox: Arc<dyn SandboxEngine>,
    pricing: Arc<dyn PricingConnector>,
}

impl CostEstimator {
    pub fn new(
        settings: EstimatorSettings,
        credentials: Arc<dyn CredentialsProvider>,
        engine: Arc<dyn ReasoningEngine>,
        sandbox: Arc<dyn SandboxEngine>,
        pricing: Arc<dyn PricingConnector>,
    ) -> Self {
        Self { settings, credentials, engine, sandbox, pricing }
    }

    /// Wires the production collaborators from configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, EstimationError> {
        let engine = create_reasoning_engine(&config.llm)
            .map_err(|error| EstimationError::Setup(format!("reasoning engine unavailable: {error}")))?;
        Ok(Self::new(
            EstimatorSettings::from_config(config),
            Arc::new(DefaultCredentialsChain::new(config.aws.profile.clone())),
            Arc::from(engine),
            Arc::new(ProcessSandboxEngine::from_config(&config.sandbox)),
            Arc::new(McpPricingConnector::new(config.pricing.clone(), config.aws.region.clone())),
        ))
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_reasoning_engine(mut self, engine: Arc<dyn ReasoningEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_sandbox_engine(mut self, sandbox: Arc<dyn SandboxEngine>) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_pricing_connector(mut self, pricing: Arc<dyn PricingConnector>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn settings(&self) -> &EstimatorSettings {
        &self.settings
    }

    /// Never fails: terminal errors are rendered into the returned text
    /// together with their cause chain and a backtrace.
    pub async fn estimate_costs(&self, architecture_description: &str) -> String {
        let correlation_id = CorrelationId::new();
        let span = info_span!("estimate_costs", correlation_id = %correlation_id);

        async {
            info!(
                event_name = "estimation.started",
                correlation_id = %correlation_id,
                description_chars = architecture_description.len(),
                "starting cost estimation"
            );
            match self.try_estimate(architecture_description, &correlation_id).await {
                Ok(report) => {
                    info!(event_name = "estimation.completed", correlation_id = %correlation_id, "cost estimation completed");
                    report
                }
                Err(failure) => {
                    error!(
                        event_name = "estimation.failed",
                        correlation_id = %correlation_id,
                        error_class = failure.error_class(),
                        error = %failure,
                        "cost estimation failed"
                    );
                    failure_report(&failure, &Backtrace::force_capture())
                }
            }
        }
        .instrument(span)
        .await
    }

    pub async fn try_estimate(
        &self,
        architecture_description: &str,
        correlation_id: &CorrelationId,
    ) -> Result<String, EstimationError> {
        // Credentials first: nothing is started without them.
        let credentials = self.credentials.credentials()?;

        let session = Arc::new(Mutex::new(SandboxSession::new(Arc::clone(&self.sandbox))));
        session.lock().await.start().await?;

        let result = self.run_with_sandbox(architecture_description, &credentials, &session, correlation_id).await;
        session.lock().await.stop().await;
        result
    }

    async fn run_with_sandbox(
        &self,
        architecture_description: &str,
        credentials: &AwsCredentials,
        session: &Arc<Mutex<SandboxSession>>,
        correlation_id: &CorrelationId,
    ) -> Result<String, EstimationError> {
        let transport = self
            .pricing
            .connect(credentials)
            .await
            .map_err(|error| EstimationError::Setup(format!("pricing tools unavailable: {error}")))?;
        let registry = Arc::new(
            ExternalToolRegistry::connect(transport)
                .await
                .map_err(|error| EstimationError::Setup(format!("pricing tools unavailable: {error}")))?,
        );

        let result = self
            .orchestrate(architecture_description, &registry, session, correlation_id)
            .await;
        registry.disconnect().await;
        result
    }

    async fn orchestrate(
        &self,
        architecture_description: &str,
        registry: &Arc<ExternalToolRegistry>,
        session: &Arc<Mutex<SandboxSession>>,
        correlation_id: &CorrelationId,
    ) -> Result<String, EstimationError> {
        let dispatcher = ToolDispatcher::new(CalculationTool::new(Arc::clone(session)), Arc::clone(registry))?;
        let mut orchestrator = AgentOrchestrator::new(
            self.engine.as_ref(),
            &dispatcher,
            self.settings.orchestrator,
            correlation_id.clone(),
        );

        let system = system_prompt_for_region(&self.settings.region);
        let initial = Message::user(cost_estimation_prompt(architecture_description));
        let transcript =
            tokio::time::timeout(self.settings.request_timeout, orchestrator.run(&system, initial))
                .await
                .map_err(|_| EstimationError::Cancelled(self.settings.request_timeout))??;

        Ok(final_answer(&transcript))
    }
}

/// Joined text of the final assistant message, or the no-result marker.
pub fn final_answer(transcript: &Transcript) -> String {
    transcript
        .last()
        .filter(|message| message.role == Role::Assistant)
        .and_then(Message::joined_text)
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| NO_RESULT_MARKER.to_string())
}

#[cfg(test)]
mod tests {
    use costscope_core::{CallId, ContentBlock, Message, ToolInvocationRequest, Transcript, NO_RESULT_MARKER};
    use serde_json::json;

    use super::final_answer;

    #[test]
    fn final_answer_joins_text_blocks() {
        let mut transcript = Transcript::new();
        transcript.push(Message::user("estimate")).unwrap();
        transcript
            .push(Message::assistant(vec![ContentBlock::text("Total: "), ContentBlock::text("$7.49")]))
            .unwrap();
        assert_eq!(final_answer(&transcript), "Total: $7.49");
    }

    #[test]
    fn missing_text_yields_marker() {
        let mut transcript = Transcript::new();
        transcript.push(Message::user("estimate")).unwrap();
        assert_eq!(final_answer(&transcript), NO_RESULT_MARKER);

        transcript
            .push(Message::assistant(vec![ContentBlock::ToolUse(ToolInvocationRequest {
                call_id: CallId::new("c-1"),
                name: "get_pricing".into(),
                arguments: json!({}),
            })]))
            .unwrap();
        assert_eq!(final_answer(&transcript), NO_RESULT_MARKER);
    }
}
