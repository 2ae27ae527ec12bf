//! Providers backed by Gemini JSON-mode calls.
//!
//! [`GeminiJson`] owns the transport concerns: system instruction, temperature, transient
//! error retries, code-fence stripping and schema validation of the reply. The stage
//! providers in this module only format prompts and map replies.

mod providers;

use std::sync::Arc;

use gemini_rust::{Content, Gemini, GenerationConfig, Message, Role};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::{sleep, Duration};
use tracing::{debug, instrument, trace, warn};

pub use providers::{
    GeminiCritic, GeminiGenerator, GeminiRefiner, IdeaCritiqueWire, ImprovementApplied,
    IntoCritique, RefinementReply, SceneCritiqueWire,
};

use crate::{
    config::GeminiSettings,
    error::{LoopError, Result},
};

/// Handler used to short-circuit calls during tests.
///
/// The handler receives a lightweight view of the call and must return the raw model text.
pub type MockHandler = Arc<dyn Fn(MockRequest) -> Result<String> + Send + Sync>;

/// Minimal view of a call passed to [`MockHandler`].
#[derive(Debug, Clone)]
pub struct MockRequest {
    /// The target Rust type name (for logging/debugging only).
    pub target: String,
    pub system_instruction: String,
    pub prompt: String,
}

/// JSON-mode Gemini calls with schema-checked replies.
#[derive(Clone)]
pub struct GeminiJson {
    client: Arc<Gemini>,
    temperature: f32,
    network_retries: usize,
    mock_handler: Option<MockHandler>,
}

impl GeminiJson {
    pub fn new(settings: &GeminiSettings) -> Result<Self> {
        let client = Gemini::with_model(&settings.api_key, settings.model.clone())?;
        Ok(Self {
            client: Arc::new(client),
            temperature: settings.temperature,
            network_retries: settings.network_retries,
            mock_handler: None,
        })
    }

    /// Provide a mock handler to intercept all calls.
    pub fn with_mock(
        mut self,
        handler: impl Fn(MockRequest) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        self.mock_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Call the model and parse its reply as `T`.
    ///
    /// The JSON schema of `T` is appended to the prompt, and the reply is validated against
    /// it before deserialization so shape errors carry the offending text.
    #[instrument(skip_all, fields(reply_type = std::any::type_name::<T>()))]
    pub async fn call<T>(&self, system_instruction: &str, prompt: &str) -> Result<T>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let schema = serde_json::to_value(schemars::schema_for!(T))?;
        let prompt = format!(
            "{prompt}\n\nRespond with a single JSON object matching this schema:\n{}",
            serde_json::to_string_pretty(&schema)?
        );

        let text = match &self.mock_handler {
            Some(mock) => mock(MockRequest {
                target: std::any::type_name::<T>().to_string(),
                system_instruction: system_instruction.to_string(),
                prompt: prompt.clone(),
            })?,
            None => self.execute(system_instruction, &prompt).await?,
        };

        trace!(raw = %text, "Received model reply");
        parse_reply(&text, &schema)
    }

    async fn execute(&self, system_instruction: &str, prompt: &str) -> Result<String> {
        let mut last_err: Option<LoopError> = None;

        for net_try in 0..=self.network_retries {
            let request = self
                .client
                .generate_content()
                .with_system_instruction(system_instruction)
                .with_generation_config(GenerationConfig {
                    response_mime_type: Some("application/json".to_string()),
                    temperature: Some(self.temperature),
                    ..Default::default()
                })
                .with_message(Message {
                    role: Role::User,
                    content: Content::text(prompt).with_role(Role::User),
                });

            match request.execute().await {
                Ok(response) => return Ok(response.text()),
                Err(err) => {
                    let err = LoopError::Gemini(err);
                    if err.is_retryable() && net_try < self.network_retries {
                        let delay_ms = retry_delay_ms(&err, net_try);
                        warn!(
                            network_try = net_try + 1,
                            "Transient error ({}). Retrying after {}ms", err, delay_ms
                        );
                        sleep(Duration::from_millis(delay_ms)).await;
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| LoopError::ServiceUnavailable {
            message: "no response from model".to_string(),
            attempts: self.network_retries,
        }))
    }
}

/// Cap on the exponential backoff used when the server suggests no delay.
const MAX_BACKOFF_MS: u64 = 30_000;

fn retry_delay_ms(err: &LoopError, net_try: usize) -> u64 {
    match err.retry_delay() {
        Some(secs) => secs.saturating_mul(1000),
        None => {
            let exp = u32::try_from(net_try).unwrap_or(u32::MAX);
            2_u64
                .checked_pow(exp)
                .map_or(MAX_BACKOFF_MS, |factor| factor.saturating_mul(200))
                .min(MAX_BACKOFF_MS)
        }
    }
}

fn parse_reply<T: DeserializeOwned>(text: &str, schema: &Value) -> Result<T> {
    let cleaned = clean_json_text(text);
    let value: Value =
        serde_json::from_str(&cleaned).map_err(|e| LoopError::parse_error(e, &cleaned))?;

    let validator = jsonschema::validator_for(schema)
        .map_err(|e| LoopError::Validation(format!("invalid response schema: {e}")))?;
    if !validator.is_valid(&value) {
        let errors = validator
            .iter_errors(&value)
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        debug!(errors = %errors, "Model reply failed schema validation");
        return Err(LoopError::ParseWithContext {
            message: format!("reply does not match schema: {errors}"),
            raw_text: cleaned,
        });
    }

    serde_json::from_value(value).map_err(|e| LoopError::parse_error(e, &cleaned))
}

/// Strip markdown fences and surrounding prose from a model reply.
pub(crate) fn clean_json_text(text: &str) -> String {
    let text = text.trim();

    if let Some(start) = text.find("```") {
        if let Some(end) = text.rfind("```") {
            if start < end {
                // Skip the language tag after the opening fence.
                if let Some(newline) = text[start..end].find('\n') {
                    let content_start = start + newline + 1;
                    if content_start < end {
                        return text[content_start..end].trim().to_string();
                    }
                }
            }
        }
    }

    if let Some(start) = text.find(['{', '[']) {
        if let Some(end) = text.rfind(['}', ']']) {
            if start <= end {
                return text[start..=end].to_string();
            }
        }
    }
    text.to_string()
}
