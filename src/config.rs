use serde::{Deserialize, Serialize};

use crate::{
    critique::{Dimension, Score},
    error::{LoopError, Result},
};

/// Configuration for one refinement run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Maximum number of generate/critique cycles (default: 3)
    pub max_iterations: usize,
    /// Score at or above which a candidate is accepted outright (default: 8.0)
    pub quality_threshold: f64,
    /// Looser bar applied only once the budget is exhausted. `None` never relaxes.
    pub fallback_acceptable_threshold: Option<f64>,
    /// Force another cycle when the best candidate carries a critical issue.
    pub retry_on_critical: bool,
    /// Minimum pause between provider cycles, in milliseconds.
    pub call_spacing_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            quality_threshold: 8.0,
            fallback_acceptable_threshold: None,
            retry_on_critical: false,
            call_spacing_ms: 0,
        }
    }
}

impl LoopConfig {
    /// Story structure refinement: 7.5 over three iterations.
    pub fn idea() -> Self {
        Self {
            quality_threshold: 7.5,
            ..Self::default()
        }
    }

    /// Scene breakdown refinement: 8.0 over three iterations.
    pub fn scene() -> Self {
        Self::default()
    }

    /// Video validation: two retries after the first render, settling at 6.5.
    pub fn video() -> Self {
        Self {
            max_iterations: 3,
            quality_threshold: 8.0,
            fallback_acceptable_threshold: Some(6.5),
            retry_on_critical: true,
            call_spacing_ms: 0,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    pub fn with_fallback_threshold(mut self, threshold: f64) -> Self {
        self.fallback_acceptable_threshold = Some(threshold);
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.fallback_acceptable_threshold = None;
        self
    }

    pub fn with_retry_on_critical(mut self, enabled: bool) -> Self {
        self.retry_on_critical = enabled;
        self
    }

    pub fn with_call_spacing_ms(mut self, spacing_ms: u64) -> Self {
        self.call_spacing_ms = spacing_ms;
        self
    }

    /// Number of refinement retries allowed after the first attempt.
    pub fn max_retries(&self) -> usize {
        self.max_iterations.saturating_sub(1)
    }

    pub fn threshold(&self) -> Result<Score> {
        Score::new(self.quality_threshold).map_err(|_| {
            LoopError::Config(format!(
                "quality_threshold must be within 0-10, got {}",
                self.quality_threshold
            ))
        })
    }

    pub fn fallback(&self) -> Result<Option<Score>> {
        self.fallback_acceptable_threshold
            .map(|f| {
                Score::new(f).map_err(|_| {
                    LoopError::Config(format!(
                        "fallback_acceptable_threshold must be within 0-10, got {f}"
                    ))
                })
            })
            .transpose()
    }

    /// Check run preconditions.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(LoopError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        let threshold = self.threshold()?;
        if let Some(fallback) = self.fallback()? {
            if fallback > threshold {
                return Err(LoopError::Config(format!(
                    "fallback_acceptable_threshold ({fallback}) exceeds quality_threshold ({threshold})"
                )));
            }
        }
        Ok(())
    }
}

/// Sub-threshold and remedy for one dimension in the deterministic refiner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DimensionRule {
    pub dimension: Dimension,
    /// Scores strictly below this trigger the rule.
    pub below: f64,
    /// Negative attributes listed in the AVOID clause.
    #[serde(default)]
    pub avoid: Vec<String>,
}

impl DimensionRule {
    pub fn new(dimension: Dimension, below: f64) -> Self {
        Self {
            dimension,
            below,
            avoid: Vec::new(),
        }
    }

    pub fn with_avoid<I, T>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.avoid.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn triggered_by(&self, score: Score) -> bool {
        score.value() < self.below
    }
}

/// Rules consulted by the deterministic refiner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleBook {
    pub rules: Vec<DimensionRule>,
    /// Clause prepended when an identity dimension is weak.
    pub fidelity_clause: String,
    /// Clauses appended when a complexity dimension is weak.
    pub simplification_clauses: Vec<String>,
}

impl Default for RuleBook {
    fn default() -> Self {
        Self {
            rules: vec![
                DimensionRule::new(Dimension::Anatomy, 8.0).with_avoid([
                    "extra limbs",
                    "deformed hands",
                    "multiple hands",
                    "mutated fingers",
                    "extra fingers",
                    "distorted body",
                ]),
                DimensionRule::new(Dimension::Consistency, 7.5),
                DimensionRule::new(Dimension::Technical, 8.0),
                DimensionRule::new(Dimension::CharacterConsistency, 7.5),
                DimensionRule::new(Dimension::TechnicalFeasibility, 7.5),
                DimensionRule::new(Dimension::VisualCoherence, 7.0)
                    .with_avoid(["cluttered composition", "conflicting light sources"]),
                DimensionRule::new(Dimension::PacingQuality, 7.0),
            ],
            fidelity_clause:
                "CHARACTER APPEARANCE: Exactly matching the provided reference images.".to_string(),
            simplification_clauses: vec![
                "Simple, slow, smooth camera movement.".to_string(),
                "Minimal character motion, natural expressions.".to_string(),
            ],
        }
    }
}

impl RuleBook {
    pub fn rule_for(&self, dimension: Dimension) -> Option<&DimensionRule> {
        self.rules.iter().find(|r| r.dimension == dimension)
    }

    pub fn with_rule(mut self, rule: DimensionRule) -> Self {
        self.rules.retain(|r| r.dimension != rule.dimension);
        self.rules.push(rule);
        self
    }
}

/// Connection settings for the Gemini-backed providers.
#[derive(Clone, Debug)]
pub struct GeminiSettings {
    pub api_key: String,
    pub model: gemini_rust::Model,
    /// Sampling temperature (default: 0.7)
    pub temperature: f32,
    /// Network retries for transient generation failures (e.g., 503/429).
    pub network_retries: usize,
}

impl GeminiSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: gemini_rust::Model::Gemini25Flash,
            temperature: 0.7,
            network_retries: 3,
        }
    }

    /// Read the API key from `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| LoopError::Config("GEMINI_API_KEY is not set".to_string()))?;
        if key.trim().is_empty() {
            return Err(LoopError::Config("GEMINI_API_KEY is empty".to_string()));
        }
        Ok(Self::new(key))
    }

    pub fn with_model(mut self, model: gemini_rust::Model) -> Self {
        self.model = model;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_network_retries(mut self, retries: usize) -> Self {
        self.network_retries = retries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let idea = LoopConfig::idea();
        assert_eq!(idea.quality_threshold, 7.5);
        assert_eq!(idea.max_iterations, 3);
        assert!(idea.fallback_acceptable_threshold.is_none());

        let video = LoopConfig::video();
        assert_eq!(video.max_retries(), 2);
        assert_eq!(video.fallback_acceptable_threshold, Some(6.5));
        assert!(video.retry_on_critical);

        for config in [LoopConfig::idea(), LoopConfig::scene(), LoopConfig::video()] {
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(LoopConfig::default().with_max_iterations(0).validate().is_err());
        assert!(LoopConfig::default()
            .with_quality_threshold(10.5)
            .validate()
            .is_err());
        assert!(LoopConfig::default()
            .with_quality_threshold(7.0)
            .with_fallback_threshold(7.5)
            .validate()
            .is_err());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: LoopConfig =
            serde_json::from_str(r#"{"quality_threshold": 7.0}"#).unwrap();
        assert_eq!(config.quality_threshold, 7.0);
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.call_spacing_ms, 0);
        assert_eq!(config.with_call_spacing_ms(250).call_spacing_ms, 250);
    }

    #[test]
    fn test_rulebook_override() {
        let book = RuleBook::default().with_rule(DimensionRule::new(Dimension::Anatomy, 9.0));
        let rule = book.rule_for(Dimension::Anatomy).unwrap();
        assert_eq!(rule.below, 9.0);
        assert!(rule.avoid.is_empty());
        assert!(rule.triggered_by(Score::new(8.5).unwrap()));
        assert!(!rule.triggered_by(Score::new(9.0).unwrap()));
    }
}
