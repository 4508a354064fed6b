use std::time::Duration;

use costscope_agent::CostEstimator;
use costscope_core::config::{AppConfig, LoadOptions};
use costscope_core::is_failure_report;
use tracing::warn;

use crate::commands::scenarios;
use crate::commands::CommandResult;
use crate::logging::init_logging;

const COMMAND: &str = "estimate";

pub const EXIT_INVALID_INPUT: u8 = 2;
pub const EXIT_SETUP_FAILED: u8 = 3;
pub const EXIT_ESTIMATION_FAILED: u8 = 4;
pub const EXIT_INTERRUPTED: u8 = 130;

const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, Default)]
pub struct EstimateRequest {
    pub architecture: Option<String>,
    pub scenario: Option<String>,
}

/// Picks the architecture text: an explicit description wins, then a named
/// scenario, then the default scenario.
pub fn resolve_description(request: &EstimateRequest) -> Result<String, String> {
    if let Some(architecture) = &request.architecture {
        let trimmed = architecture.trim();
        if trimmed.is_empty() {
            return Err("architecture description must not be empty".to_string());
        }
        return Ok(trimmed.to_string());
    }

    match &request.scenario {
        Some(name) => scenarios::find(name)
            .map(|scenario| scenario.description.to_string())
            .ok_or_else(|| {
                format!("unknown scenario `{name}`; run `costscope scenarios` to list them")
            }),
        None => Ok(scenarios::default_scenario().description.to_string()),
    }
}

pub fn run(request: EstimateRequest) -> CommandResult {
    let description = match resolve_description(&request) {
        Ok(description) => description,
        Err(message) => {
            return CommandResult::failure(COMMAND, "invalid_input", message, EXIT_INVALID_INPUT)
        }
    };

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "config_validation",
                error.to_string(),
                EXIT_INVALID_INPUT,
            )
        }
    };
    init_logging(&config);

    let estimator = match CostEstimator::from_config(&config) {
        Ok(estimator) => estimator,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                error.error_class(),
                error.to_string(),
                EXIT_SETUP_FAILED,
            )
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime",
                format!("failed to initialize async runtime: {error}"),
                EXIT_SETUP_FAILED,
            )
        }
    };

    runtime.block_on(async {
        let finished = tokio::select! {
            result = run_with_estimator(&description, &estimator) => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        };
        if let Some(result) = finished {
            return result;
        }

        // The estimation future is gone; its sandbox and pricing guards have
        // queued their teardown on this runtime.
        warn!(event_name = "estimation.interrupted", "interrupted, tearing down estimation resources");
        drain_teardown(TEARDOWN_GRACE).await;
        CommandResult::failure(COMMAND, "interrupted", "estimation interrupted", EXIT_INTERRUPTED)
    })
}

async fn drain_teardown(grace: Duration) {
    let metrics = tokio::runtime::Handle::current().metrics();
    let drained = tokio::time::timeout(grace, async {
        while metrics.num_alive_tasks() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            event_name = "estimation.teardown_incomplete",
            pending_tasks = metrics.num_alive_tasks(),
            "teardown did not finish within the grace period"
        );
    }
}

/// Runs one estimation and maps the report onto an exit code. The report is
/// passed through as plain text.
pub async fn run_with_estimator(description: &str, estimator: &CostEstimator) -> CommandResult {
    let report = estimator.estimate_costs(description).await;
    let exit_code = if is_failure_report(&report) { EXIT_ESTIMATION_FAILED } else { 0 };
    CommandResult { exit_code, output: report }
}

#[cfg(test)]
mod tests {
    use super::{resolve_description, EstimateRequest};

    #[test]
    fn explicit_architecture_wins_and_is_trimmed() {
        let request = EstimateRequest {
            architecture: Some("  Two m5.large instances \n".to_string()),
            scenario: Some("static-site".to_string()),
        };
        assert_eq!(resolve_description(&request).as_deref(), Ok("Two m5.large instances"));
    }

    #[test]
    fn default_scenario_is_used_without_input() {
        assert_eq!(
            resolve_description(&EstimateRequest::default()).as_deref(),
            Ok("One EC2 t3.micro instance running 24/7")
        );
    }

    #[test]
    fn blank_architecture_and_unknown_scenario_are_rejected() {
        let blank = EstimateRequest { architecture: Some("   ".to_string()), scenario: None };
        assert!(resolve_description(&blank).is_err());

        let unknown = EstimateRequest { architecture: None, scenario: Some("mainframe".to_string()) };
        let error = resolve_description(&unknown).unwrap_err();
        assert!(error.contains("unknown scenario `mainframe`"));
    }
}
