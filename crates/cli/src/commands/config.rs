use std::env;
use std::fs;
use std::path::Path;

use costscope_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Field {
    key_path: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key_path,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key_path, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let llm_api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_token(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    vec![
        field("llm.provider", &["COSTSCOPE_LLM_PROVIDER"], format!("{:?}", config.llm.provider)),
        field("llm.model", &["COSTSCOPE_LLM_MODEL"], config.llm.model.clone()),
        field(
            "llm.base_url",
            &["COSTSCOPE_LLM_BASE_URL"],
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        field("llm.api_key", &["COSTSCOPE_LLM_API_KEY"], llm_api_key),
        field(
            "llm.timeout_secs",
            &["COSTSCOPE_LLM_TIMEOUT_SECS"],
            config.llm.timeout_secs.to_string(),
        ),
        field("llm.max_retries", &["COSTSCOPE_LLM_MAX_RETRIES"], config.llm.max_retries.to_string()),
        field("llm.max_tokens", &["COSTSCOPE_LLM_MAX_TOKENS"], config.llm.max_tokens.to_string()),
        field("aws.region", &["COSTSCOPE_AWS_REGION"], config.aws.region.clone()),
        field("aws.profile", &["COSTSCOPE_AWS_PROFILE"], config.aws.profile.clone()),
        field("pricing.command", &["COSTSCOPE_PRICING_COMMAND"], config.pricing.command.clone()),
        field("pricing.args", &["COSTSCOPE_PRICING_ARGS"], config.pricing.args.join(" ")),
        field(
            "pricing.log_level",
            &["COSTSCOPE_PRICING_LOG_LEVEL"],
            config.pricing.log_level.clone(),
        ),
        field(
            "sandbox.interpreter",
            &["COSTSCOPE_SANDBOX_INTERPRETER"],
            config.sandbox.interpreter.clone(),
        ),
        field(
            "sandbox.execution_timeout_secs",
            &["COSTSCOPE_SANDBOX_EXECUTION_TIMEOUT_SECS"],
            config.sandbox.execution_timeout_secs.to_string(),
        ),
        field(
            "agent.max_iterations",
            &["COSTSCOPE_AGENT_MAX_ITERATIONS"],
            config.agent.max_iterations.to_string(),
        ),
        field(
            "agent.concurrent_lookups",
            &["COSTSCOPE_AGENT_CONCURRENT_LOOKUPS"],
            config.agent.concurrent_lookups.to_string(),
        ),
        field(
            "agent.request_timeout_secs",
            &["COSTSCOPE_AGENT_REQUEST_TIMEOUT_SECS"],
            config.agent.request_timeout_secs.to_string(),
        ),
        field(
            "logging.level",
            &["COSTSCOPE_LOGGING_LEVEL", "COSTSCOPE_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        field(
            "logging.format",
            &["COSTSCOPE_LOGGING_FORMAT", "COSTSCOPE_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn field(key_path: &'static str, env_keys: &'static [&'static str], value: String) -> Field {
    Field { key_path, env_keys, value }
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps a recognisable provider prefix (`sk-`, `sk-ant-`) and nothing else.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_token};

    #[test]
    fn tokens_keep_only_their_prefix() {
        assert_eq!(redact_token("sk-live-abcdef"), "sk-***");
        assert_eq!(redact_token("opaque"), "<redacted>");
        assert_eq!(redact_token("  "), "<empty>");
    }

    #[test]
    fn nested_paths_are_found_in_toml() {
        let doc: toml::Value = "[agent]\nmax_iterations = 5\n".parse().unwrap();
        assert!(contains_path(&doc, "agent.max_iterations"));
        assert!(!contains_path(&doc, "agent.request_timeout_secs"));
    }
}
