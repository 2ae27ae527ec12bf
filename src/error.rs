use thiserror::Error;

/// Errors raised by the refinement loop and its providers.
#[derive(Debug, Error)]
pub enum LoopError {
    /// The generation provider could not produce a candidate. Fatal to the run.
    #[error("Generation failed in {stage} stage: {message}")]
    Generation { stage: String, message: String },

    /// The critique provider returned unusable data. Fatal to the run.
    #[error("Critique failed in {stage} stage: {message}")]
    Critique { stage: String, message: String },

    /// The model-assisted refiner failed. Absorbed by the rule-based fallback.
    #[error("Model refinement failed: {0}")]
    Refinement(String),

    #[error("Run cancelled in {stage} stage after {completed} completed iterations")]
    Cancelled { stage: String, completed: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Score out of range: {0} (expected 0-10)")]
    ScoreOutOfRange(f64),

    #[error("Gemini client error: {0}")]
    Gemini(#[from] gemini_rust::ClientError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {message}\n\nRaw response:\n{raw_text}")]
    ParseWithContext { message: String, raw_text: String },

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Service unavailable: {message}. Attempted {attempts} retries.")]
    ServiceUnavailable { message: String, attempts: usize },

    #[error("Context error: {0}")]
    Context(String),
}

impl LoopError {
    /// Wrap a provider error as a generation failure for `stage`.
    ///
    /// Errors that already are generation failures pass through untouched.
    pub fn generation(stage: &str, err: LoopError) -> Self {
        match err {
            Self::Generation { .. } => err,
            other => Self::Generation {
                stage: stage.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Wrap a provider error as a critique failure for `stage`.
    pub fn critique(stage: &str, err: LoopError) -> Self {
        match err {
            Self::Critique { .. } => err,
            other => Self::Critique {
                stage: stage.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Create a parse error that keeps a truncated copy of the raw model text.
    pub fn parse_error(err: serde_json::Error, raw_text: &str) -> Self {
        Self::ParseWithContext {
            message: err.to_string(),
            raw_text: truncate_for_display(raw_text, 500),
        }
    }

    /// Check if this error is retryable at the network level.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::ServiceUnavailable { .. } => true,
            Self::Gemini(gemini_rust::ClientError::BadResponse { code, .. }) => {
                *code == 503 || *code == 429
            }
            _ => false,
        }
    }

    /// True when the run stopped because of a provider failure rather than cancellation.
    pub fn is_provider_failure(&self) -> bool {
        matches!(self, Self::Generation { .. } | Self::Critique { .. })
    }

    /// Get suggested retry delay in seconds, if applicable.
    pub fn retry_delay(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            Self::ServiceUnavailable { .. } => Some(5),
            Self::Gemini(gemini_rust::ClientError::BadResponse {
                code: 429,
                description,
            }) => description
                .as_ref()
                .and_then(|d| parse_retry_delay_from_error(d)),
            _ => None,
        }
    }
}

/// Parse retry delay from a Gemini 429 response body.
pub(crate) fn parse_retry_delay_from_error(description: &str) -> Option<u64> {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(description) {
        let details = json
            .get("error")
            .and_then(|e| e.get("details"))
            .and_then(|d| d.as_array());
        if let Some(details) = details {
            for detail in details {
                if detail.get("@type").and_then(|t| t.as_str())
                    == Some("type.googleapis.com/google.rpc.RetryInfo")
                {
                    if let Some(delay) = detail.get("retryDelay").and_then(|d| d.as_str()) {
                        return parse_duration_string(delay);
                    }
                }
            }
        }
    }

    // Handles: "Please retry in 57s.", "retry in 488.04ms"
    let lower = description.to_lowercase();
    let idx = lower.find("retry in ")?;
    let remainder = &lower[idx + "retry in ".len()..];
    let end = remainder
        .find(|c: char| !c.is_numeric() && c != '.' && c != 'm' && c != 's')
        .unwrap_or(remainder.len());
    parse_duration_string(remainder[..end].trim_end_matches('.'))
}

/// Parse duration strings like "44s", "44.5s", "500ms" into whole seconds.
fn parse_duration_string(s: &str) -> Option<u64> {
    let s = s.trim();

    if let Some(ms) = s.strip_suffix("ms").and_then(|v| v.parse::<f64>().ok()) {
        if ms <= 0.0 {
            return Some(0);
        }
        return Some(((ms / 1000.0).ceil() as u64).max(1));
    }

    s.strip_suffix('s')
        .and_then(|v| v.parse::<f64>().ok())
        .map(|secs| secs.ceil() as u64)
}

fn truncate_for_display(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}... [truncated, {} total chars]",
        &text[..cut],
        text.len()
    )
}

pub type Result<T> = std::result::Result<T, LoopError>;

/// Extension trait for adding context to errors.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn with_context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<LoopError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let base_err = e.into();
            LoopError::Context(format!("{}: {}", context.into(), base_err))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_from_retry_info() {
        let body = r#"{
            "error": {
                "code": 429,
                "details": [
                    {"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "44s"}
                ]
            }
        }"#;
        assert_eq!(parse_retry_delay_from_error(body), Some(44));
    }

    #[test]
    fn test_retry_delay_from_text() {
        assert_eq!(
            parse_retry_delay_from_error("Quota exceeded. Please retry in 57s."),
            Some(57)
        );
        assert_eq!(
            parse_retry_delay_from_error("retry in 488.04ms"),
            Some(1)
        );
        assert_eq!(parse_retry_delay_from_error("no hint here"), None);
    }

    #[test]
    fn test_generation_wrapping_keeps_original() {
        let original = LoopError::Generation {
            stage: "idea".into(),
            message: "timeout".into(),
        };
        let wrapped = LoopError::generation("scene", original);
        assert!(matches!(
            wrapped,
            LoopError::Generation { ref stage, .. } if stage == "idea"
        ));

        let wrapped = LoopError::generation("scene", LoopError::Validation("bad".into()));
        assert!(matches!(
            wrapped,
            LoopError::Generation { ref stage, ref message } if stage == "scene" && message.contains("bad")
        ));
    }

    #[test]
    fn test_truncate_for_display() {
        let long = "x".repeat(600);
        let err = LoopError::parse_error(
            serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
            &long,
        );
        match err {
            LoopError::ParseWithContext { raw_text, .. } => {
                assert!(raw_text.contains("truncated, 600 total chars"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
