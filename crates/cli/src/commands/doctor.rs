use std::sync::Arc;

use anyhow::{bail, Context};
use costscope_agent::sandbox::ProcessSandboxEngine;
use costscope_agent::SandboxSession;
use costscope_core::config::{AppConfig, LoadOptions};
use costscope_core::credentials::{
    AwsCredentials, CredentialSource, CredentialsProvider, DefaultCredentialsChain,
};
use costscope_mcp::{
    missing_pricing_tools, ExternalToolRegistry, McpPricingTransport, PricingServerLaunch,
};
use serde::Serialize;
use tokio::runtime::Runtime;

use crate::commands::CommandResult;

const INTERPRETER_PROBE: &str = "print(1 + 1)";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

/// Exit code is 1 when any check failed. Skipped checks do not fail the run.
pub fn run(json_output: bool, probe_pricing: bool) -> CommandResult {
    let report = build_report(probe_pricing);
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report(probe_pricing: bool) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            let credentials = DefaultCredentialsChain::new(config.aws.profile.clone()).credentials();
            checks.push(match &credentials {
                Ok(credentials) => DoctorCheck::pass("aws_credentials", describe_credentials(credentials)),
                Err(error) => DoctorCheck::fail("aws_credentials", error.to_string()),
            });
            checks.push(check_sandbox_interpreter(&config));
            checks.push(check_pricing_command(&config));
            checks.push(match (probe_pricing, credentials) {
                (false, _) => DoctorCheck::skipped(
                    "pricing_catalog",
                    "pass --probe-pricing to start the pricing server",
                ),
                (true, Err(_)) => DoctorCheck::skipped(
                    "pricing_catalog",
                    "skipped because AWS credentials are unavailable",
                ),
                (true, Ok(credentials)) => check_pricing_catalog(&config, &credentials),
            });
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in ["aws_credentials", "sandbox_interpreter", "pricing_command", "pricing_catalog"] {
                checks.push(DoctorCheck::skipped(name, "skipped because configuration did not load"));
            }
        }
    }

    let any_failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn describe_credentials(credentials: &AwsCredentials) -> String {
    let key_id = redact_key_id(&credentials.access_key_id);
    match &credentials.source {
        CredentialSource::Environment => format!("access key {key_id} from environment"),
        CredentialSource::SharedFile { path, profile } => {
            format!("access key {key_id} from profile `{profile}` in {}", path.display())
        }
        CredentialSource::Static => format!("access key {key_id} (static)"),
    }
}

fn redact_key_id(key_id: &str) -> String {
    let chars: Vec<char> = key_id.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("****{suffix}")
}

fn check_sandbox_interpreter(config: &AppConfig) -> DoctorCheck {
    let name = "sandbox_interpreter";
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => return DoctorCheck::fail(name, error),
    };

    match runtime.block_on(probe_interpreter(config)) {
        Ok(path) => DoctorCheck::pass(name, format!("`{path}` executed a calculation")),
        Err(error) => DoctorCheck::fail(name, format!("{error:#}")),
    }
}

async fn probe_interpreter(config: &AppConfig) -> anyhow::Result<String> {
    let path = which::which(&config.sandbox.interpreter)
        .with_context(|| format!("interpreter `{}` not found on PATH", config.sandbox.interpreter))?;

    let engine = ProcessSandboxEngine::from_config(&config.sandbox);
    let mut session = SandboxSession::new(Arc::new(engine));
    session.start().await.context("sandbox session did not start")?;
    let output = session.execute(INTERPRETER_PROBE).await;
    session.stop().await;

    let output = output.context("probe calculation failed")?;
    if output.trim() != "2" {
        bail!("probe calculation returned `{}` instead of `2`", output.trim());
    }
    Ok(path.display().to_string())
}

fn check_pricing_command(config: &AppConfig) -> DoctorCheck {
    match which::which(&config.pricing.command) {
        Ok(path) => DoctorCheck::pass("pricing_command", format!("found `{}`", path.display())),
        Err(error) => DoctorCheck::fail(
            "pricing_command",
            format!("`{}` not found on PATH: {error}", config.pricing.command),
        ),
    }
}

fn check_pricing_catalog(config: &AppConfig, credentials: &AwsCredentials) -> DoctorCheck {
    let name = "pricing_catalog";
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => return DoctorCheck::fail(name, error),
    };

    let result = runtime.block_on(async {
        let launch = PricingServerLaunch::from_config(&config.pricing, credentials, &config.aws.region);
        let transport = McpPricingTransport::spawn(&launch).await?;
        let registry = ExternalToolRegistry::connect(Box::new(transport)).await?;
        let advertised = registry.list_tools().len();
        let missing = missing_pricing_tools(registry.list_tools());
        registry.disconnect().await;
        Ok::<_, costscope_core::ToolError>((advertised, missing))
    });

    match result {
        Ok((advertised, missing)) if missing.is_empty() => {
            DoctorCheck::pass(name, format!("{advertised} tools advertised"))
        }
        Ok((_, missing)) => {
            DoctorCheck::fail(name, format!("missing pricing tools: {}", missing.join(", ")))
        }
        Err(error) => DoctorCheck::fail(name, error.to_string()),
    }
}

fn current_thread_runtime() -> Result<Runtime, String> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| format!("failed to initialize async runtime: {error}"))
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
