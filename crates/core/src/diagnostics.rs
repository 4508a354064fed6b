//! Failure rendering and request correlation.

use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

use uuid::Uuid;

pub const NO_RESULT_MARKER: &str = "No estimation result.";

const FAILURE_HEADLINE: &str = "Cost estimation failed: ";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Renders a terminal failure as one human-readable block: the description,
/// the error source chain, and the captured backtrace.
pub fn failure_report(error: &(dyn Error + 'static), backtrace: &Backtrace) -> String {
    let mut chain = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push(format!("  caused by: {cause}"));
        source = cause.source();
    }

    let mut report = format!("{FAILURE_HEADLINE}{error}\n\nDiagnostic trace:\n");
    if chain.is_empty() {
        report.push_str("  (no underlying cause)\n");
    } else {
        report.push_str(&chain.join("\n"));
        report.push('\n');
    }
    report.push_str("\nBacktrace:\n");
    report.push_str(&backtrace.to_string());
    report
}

/// True when `text` was produced by [`failure_report`].
pub fn is_failure_report(text: &str) -> bool {
    text.starts_with(FAILURE_HEADLINE)
}
