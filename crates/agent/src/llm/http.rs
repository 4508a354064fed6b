use std::time::Duration;

use costscope_core::ReasoningError;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::warn;

const BASE_RETRY_DELAY_MS: u64 = 250;

/// Sends a JSON request, retrying transport failures, 429 and 5xx responses.
pub(crate) async fn send_json(
    provider: &'static str,
    max_retries: u32,
    build: impl Fn() -> RequestBuilder,
) -> Result<Value, ReasoningError> {
    let mut attempt = 0;
    loop {
        match send_once(build()).await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_retries && is_retryable(&error) => {
                attempt += 1;
                let delay = Duration::from_millis(BASE_RETRY_DELAY_MS << attempt.min(6));
                warn!(
                    event_name = "llm.request.retry",
                    provider,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "reasoning engine request failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}

async fn send_once(request: RequestBuilder) -> Result<Value, ReasoningError> {
    let response =
        request.send().await.map_err(|error| ReasoningError::Transport(error.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ReasoningError::Status { status: status.as_u16(), body });
    }
    response.json::<Value>().await.map_err(|error| ReasoningError::Decode(error.to_string()))
}

fn is_retryable(error: &ReasoningError) -> bool {
    match error {
        ReasoningError::Transport(_) => true,
        ReasoningError::Status { status, .. } => {
            *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
        }
        ReasoningError::Decode(_) | ReasoningError::Protocol(_) => false,
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
