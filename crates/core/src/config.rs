use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "costscope.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub aws: AwsConfig,
    pub pricing: PricingConfig,
    pub sandbox: SandboxConfig,
    pub agent: AgentConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_tokens: u32,
}

#[derive(Clone, Debug)]
pub struct AwsConfig {
    pub region: String,
    pub profile: String,
}

#[derive(Clone, Debug)]
pub struct PricingConfig {
    pub command: String,
    pub args: Vec<String>,
    pub log_level: String,
}

#[derive(Clone, Debug)]
pub struct SandboxConfig {
    pub interpreter: String,
    pub execution_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub max_iterations: u32,
    pub concurrent_lookups: bool,
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub aws_region: Option<String>,
    pub aws_profile: Option<String>,
    pub max_iterations: Option<u32>,
    pub concurrent_lookups: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 120,
                max_retries: 2,
                max_tokens: 4096,
            },
            aws: AwsConfig { region: "us-east-1".to_string(), profile: "default".to_string() },
            pricing: PricingConfig {
                command: "uvx".to_string(),
                args: vec!["awslabs.aws-pricing-mcp-server@latest".to_string()],
                log_level: "ERROR".to_string(),
            },
            sandbox: SandboxConfig { interpreter: "python3".to_string(), execution_timeout_secs: 30 },
            agent: AgentConfig {
                max_iterations: 20,
                concurrent_lookups: false,
                request_timeout_secs: 600,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SandboxConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

impl AgentConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
        }

        if let Some(aws) = patch.aws {
            if let Some(region) = aws.region {
                self.aws.region = region;
            }
            if let Some(profile) = aws.profile {
                self.aws.profile = profile;
            }
        }

        if let Some(pricing) = patch.pricing {
            if let Some(command) = pricing.command {
                self.pricing.command = command;
            }
            if let Some(args) = pricing.args {
                self.pricing.args = args;
            }
            if let Some(log_level) = pricing.log_level {
                self.pricing.log_level = log_level;
            }
        }

        if let Some(sandbox) = patch.sandbox {
            if let Some(interpreter) = sandbox.interpreter {
                self.sandbox.interpreter = interpreter;
            }
            if let Some(execution_timeout_secs) = sandbox.execution_timeout_secs {
                self.sandbox.execution_timeout_secs = execution_timeout_secs;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(max_iterations) = agent.max_iterations {
                self.agent.max_iterations = max_iterations;
            }
            if let Some(concurrent_lookups) = agent.concurrent_lookups {
                self.agent.concurrent_lookups = concurrent_lookups;
            }
            if let Some(request_timeout_secs) = agent.request_timeout_secs {
                self.agent.request_timeout_secs = request_timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("COSTSCOPE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("COSTSCOPE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("COSTSCOPE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("COSTSCOPE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("COSTSCOPE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("COSTSCOPE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("COSTSCOPE_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("COSTSCOPE_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("COSTSCOPE_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("COSTSCOPE_LLM_MAX_TOKENS", &value)?;
        }

        if let Some(value) = read_env("COSTSCOPE_AWS_REGION") {
            self.aws.region = value;
        }
        if let Some(value) = read_env("COSTSCOPE_AWS_PROFILE") {
            self.aws.profile = value;
        }

        if let Some(value) = read_env("COSTSCOPE_PRICING_COMMAND") {
            self.pricing.command = value;
        }
        if let Some(value) = read_env("COSTSCOPE_PRICING_ARGS") {
            self.pricing.args = value.split_whitespace().map(str::to_string).collect();
        }
        if let Some(value) = read_env("COSTSCOPE_PRICING_LOG_LEVEL") {
            self.pricing.log_level = value;
        }

        if let Some(value) = read_env("COSTSCOPE_SANDBOX_INTERPRETER") {
            self.sandbox.interpreter = value;
        }
        if let Some(value) = read_env("COSTSCOPE_SANDBOX_EXECUTION_TIMEOUT_SECS") {
            self.sandbox.execution_timeout_secs =
                parse_u64("COSTSCOPE_SANDBOX_EXECUTION_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COSTSCOPE_AGENT_MAX_ITERATIONS") {
            self.agent.max_iterations = parse_u32("COSTSCOPE_AGENT_MAX_ITERATIONS", &value)?;
        }
        if let Some(value) = read_env("COSTSCOPE_AGENT_CONCURRENT_LOOKUPS") {
            self.agent.concurrent_lookups =
                parse_bool("COSTSCOPE_AGENT_CONCURRENT_LOOKUPS", &value)?;
        }
        if let Some(value) = read_env("COSTSCOPE_AGENT_REQUEST_TIMEOUT_SECS") {
            self.agent.request_timeout_secs =
                parse_u64("COSTSCOPE_AGENT_REQUEST_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("COSTSCOPE_LOGGING_LEVEL").or_else(|| read_env("COSTSCOPE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("COSTSCOPE_LOGGING_FORMAT").or_else(|| read_env("COSTSCOPE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(region) = overrides.aws_region {
            self.aws.region = region;
        }
        if let Some(profile) = overrides.aws_profile {
            self.aws.profile = profile;
        }
        if let Some(max_iterations) = overrides.max_iterations {
            self.agent.max_iterations = max_iterations;
        }
        if let Some(concurrent_lookups) = overrides.concurrent_lookups {
            self.agent.concurrent_lookups = concurrent_lookups;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_aws(&self.aws)?;
        validate_pricing(&self.pricing)?;
        validate_sandbox(&self.sandbox)?;
        validate_agent(&self.agent)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(CONFIG_FILE_NAME), PathBuf::from("config").join(CONFIG_FILE_NAME)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation("llm.max_tokens must be greater than zero".to_string()));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_aws(aws: &AwsConfig) -> Result<(), ConfigError> {
    if aws.region.trim().is_empty() {
        return Err(ConfigError::Validation("aws.region must not be empty".to_string()));
    }
    if aws.profile.trim().is_empty() {
        return Err(ConfigError::Validation("aws.profile must not be empty".to_string()));
    }
    Ok(())
}

fn validate_pricing(pricing: &PricingConfig) -> Result<(), ConfigError> {
    if pricing.command.trim().is_empty() {
        return Err(ConfigError::Validation(
            "pricing.command must name the pricing MCP server launcher (e.g. `uvx`)".to_string(),
        ));
    }
    Ok(())
}

fn validate_sandbox(sandbox: &SandboxConfig) -> Result<(), ConfigError> {
    if sandbox.interpreter.trim().is_empty() {
        return Err(ConfigError::Validation("sandbox.interpreter must not be empty".to_string()));
    }
    if sandbox.execution_timeout_secs == 0 || sandbox.execution_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "sandbox.execution_timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.max_iterations == 0 {
        return Err(ConfigError::Validation(
            "agent.max_iterations must be greater than zero".to_string(),
        ));
    }
    if agent.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "agent.request_timeout_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    aws: Option<AwsPatch>,
    pricing: Option<PricingPatch>,
    sandbox: Option<SandboxPatch>,
    agent: Option<AgentPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AwsPatch {
    region: Option<String>,
    profile: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PricingPatch {
    command: Option<String>,
    args: Option<Vec<String>>,
    log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SandboxPatch {
    interpreter: Option<String>,
    execution_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    max_iterations: Option<u32>,
    concurrent_lookups: Option<bool>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_without_any_input() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.llm.provider == LlmProvider::Ollama, "default provider should be ollama")?;
        ensure(config.aws.region == "us-east-1", "default region should be us-east-1")?;
        ensure(config.pricing.command == "uvx", "pricing server should launch through uvx")?;
        ensure(config.agent.max_iterations == 20, "default iteration cap should be 20")?;
        ensure(!config.agent.concurrent_lookups, "lookups should be sequential by default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_COSTSCOPE_API_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("costscope.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "anthropic"
api_key = "${TEST_COSTSCOPE_API_KEY}"
base_url = "https://api.anthropic.com"
model = "claude-3-7-sonnet-latest"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let api_key = config.llm.api_key.as_ref().map(|key| key.expose_secret().to_string());
            ensure(
                api_key.as_deref() == Some("sk-from-env"),
                "api key should be loaded from environment",
            )?;
            ensure(config.llm.provider == LlmProvider::Anthropic, "provider should come from file")
        })();

        clear_vars(&["TEST_COSTSCOPE_API_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COSTSCOPE_LOG_LEVEL", "warn");
        env::set_var("COSTSCOPE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&["COSTSCOPE_LOG_LEVEL", "COSTSCOPE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COSTSCOPE_AWS_REGION", "eu-west-1");
        env::set_var("COSTSCOPE_AGENT_MAX_ITERATIONS", "12");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("costscope.toml");
            fs::write(
                &path,
                r#"
[aws]
region = "ap-northeast-1"
profile = "pricing"

[agent]
max_iterations = 8
concurrent_lookups = true

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    max_iterations: Some(5),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.aws.region == "eu-west-1", "env region should win over file")?;
            ensure(config.aws.profile == "pricing", "file profile should win over default")?;
            ensure(config.agent.max_iterations == 5, "override iteration cap should win")?;
            ensure(config.agent.concurrent_lookups, "file should enable concurrent lookups")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")
        })();

        clear_vars(&["COSTSCOPE_AWS_REGION", "COSTSCOPE_AGENT_MAX_ITERATIONS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COSTSCOPE_LLM_PROVIDER", "openai");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })();

        clear_vars(&["COSTSCOPE_LLM_PROVIDER"]);
        result
    }

    #[test]
    fn zero_iteration_cap_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides { max_iterations: Some(0), ..ConfigOverrides::default() },
            ..LoadOptions::default()
        });
        ensure(
            matches!(result, Err(ConfigError::Validation(ref message)) if message.contains("agent.max_iterations")),
            "zero iteration cap should fail validation",
        )
    }

    #[test]
    fn invalid_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COSTSCOPE_AGENT_CONCURRENT_LOOKUPS", "sometimes");
        let result = AppConfig::load(LoadOptions::default());
        clear_vars(&["COSTSCOPE_AGENT_CONCURRENT_LOOKUPS"]);

        ensure(
            matches!(result, Err(ConfigError::InvalidEnvOverride { ref key, .. }) if key == "COSTSCOPE_AGENT_CONCURRENT_LOOKUPS"),
            "non-boolean override should be rejected",
        )
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COSTSCOPE_LLM_PROVIDER", "openai");
        env::set_var("COSTSCOPE_LLM_API_KEY", "sk-secret-value");
        env::set_var("COSTSCOPE_LLM_BASE_URL", "https://api.openai.com");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )
        })();

        clear_vars(&["COSTSCOPE_LLM_PROVIDER", "COSTSCOPE_LLM_API_KEY", "COSTSCOPE_LLM_BASE_URL"]);
        result
    }
}
