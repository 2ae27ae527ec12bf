//! Quality assessments produced by critique providers.
//!
//! Scores live on a fixed 0-10 scale. Every stage reports its dimensions through a
//! [`ScoreCard`] with a closed set of [`Dimension`]s, so rule evaluation stays exhaustive.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{LoopError, Result};

/// A quality score in `[0, 10]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Score(f64);

impl Score {
    pub const MIN: Score = Score(0.0);
    pub const MAX: Score = Score(10.0);

    /// Create a score, rejecting NaN and values outside `[0, 10]`.
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || !(0.0..=10.0).contains(&value) {
            return Err(LoopError::ScoreOutOfRange(value));
        }
        Ok(Self(value))
    }

    /// Create a score, clamping into range. NaN becomes zero.
    pub fn clamped(value: f64) -> Self {
        if value.is_nan() {
            return Self::MIN;
        }
        Self(value.clamp(0.0, 10.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Weighted sum of `(score, weight)` pairs, clamped into range.
    pub fn weighted(parts: &[(Score, f64)]) -> Self {
        Self::clamped(parts.iter().map(|(s, w)| s.0 * w).sum())
    }
}

impl TryFrom<f64> for Score {
    type Error = LoopError;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Score> for f64 {
    fn from(score: Score) -> f64 {
        score.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.0)
    }
}

/// How severe a reported issue is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "low")]
    Minor,
    #[serde(alias = "medium", alias = "high")]
    Major,
    Critical,
}

/// Closed set of quality dimensions across all stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Single holistic score for a story structure.
    Story,
    VisualCoherence,
    NarrativeFlow,
    CharacterConsistency,
    PacingQuality,
    TechnicalFeasibility,
    StyleAlignment,
    /// Structural correctness of bodies in a rendered clip.
    Anatomy,
    /// Fidelity of a rendered clip to its reference images.
    Consistency,
    /// Playback quality of a rendered clip.
    Technical,
}

/// What kind of remedy a weak dimension calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aspect {
    Identity,
    Complexity,
    Structure,
    Narrative,
    Style,
}

impl Dimension {
    pub fn label(self) -> &'static str {
        match self {
            Self::Story => "story",
            Self::VisualCoherence => "visual coherence",
            Self::NarrativeFlow => "narrative flow",
            Self::CharacterConsistency => "character consistency",
            Self::PacingQuality => "pacing quality",
            Self::TechnicalFeasibility => "technical feasibility",
            Self::StyleAlignment => "style alignment",
            Self::Anatomy => "anatomy",
            Self::Consistency => "consistency",
            Self::Technical => "technical",
        }
    }

    pub fn aspect(self) -> Aspect {
        match self {
            Self::CharacterConsistency | Self::Consistency => Aspect::Identity,
            Self::TechnicalFeasibility | Self::Technical | Self::PacingQuality => {
                Aspect::Complexity
            }
            Self::Anatomy | Self::VisualCoherence => Aspect::Structure,
            Self::Story | Self::NarrativeFlow => Aspect::Narrative,
            Self::StyleAlignment => Aspect::Style,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single defect reported by a critic or validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Issue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<Dimension>,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Issue {
    pub fn new(severity: Severity, description: impl Into<String>) -> Self {
        Self {
            dimension: None,
            severity,
            description: description.into(),
            suggestion: None,
        }
    }

    pub fn critical(description: impl Into<String>) -> Self {
        Self::new(Severity::Critical, description)
    }

    pub fn in_dimension(mut self, dimension: Dimension) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Per-stage fixed set of dimension scores.
pub trait ScoreCard: Clone + fmt::Debug + Serialize + Send + Sync + 'static {
    /// Every dimension this card scores, in a stable order.
    fn dimensions(&self) -> Vec<(Dimension, Score)>;

    /// The single aggregate score used for decisions.
    fn overall(&self) -> Score;

    fn get(&self, dimension: Dimension) -> Option<Score> {
        self.dimensions()
            .into_iter()
            .find(|(d, _)| *d == dimension)
            .map(|(_, s)| s)
    }
}

/// Structured assessment of one candidate.
///
/// `overall` is computed from the score card once, at construction, and cannot be set
/// independently. Whether it passes is always derived against a caller-supplied threshold.
#[derive(Debug, Clone, Serialize)]
pub struct CritiqueResult<C> {
    scores: C,
    overall: Score,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub suggestions: Vec<String>,
    pub issues: Vec<Issue>,
}

impl<C: ScoreCard> CritiqueResult<C> {
    pub fn new(scores: C) -> Self {
        let overall = scores.overall();
        Self {
            scores,
            overall,
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            suggestions: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn with_strengths(mut self, strengths: Vec<String>) -> Self {
        self.strengths = strengths;
        self
    }

    pub fn with_weaknesses(mut self, weaknesses: Vec<String>) -> Self {
        self.weaknesses = weaknesses;
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issues.push(issue);
        self
    }

    pub fn with_issues(mut self, issues: impl IntoIterator<Item = Issue>) -> Self {
        self.issues.extend(issues);
        self
    }

    pub fn scores(&self) -> &C {
        &self.scores
    }

    pub fn overall(&self) -> Score {
        self.overall
    }

    pub fn passes_threshold(&self, threshold: Score) -> bool {
        self.overall >= threshold
    }

    /// True when any reported issue is critical.
    pub fn has_critical(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }

    pub fn issues_with(&self, severity: Severity) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize)]
    struct Pair {
        a: Score,
        b: Score,
    }

    impl ScoreCard for Pair {
        fn dimensions(&self) -> Vec<(Dimension, Score)> {
            vec![(Dimension::Anatomy, self.a), (Dimension::Technical, self.b)]
        }

        fn overall(&self) -> Score {
            Score::weighted(&[(self.a, 0.5), (self.b, 0.5)])
        }
    }

    fn score(v: f64) -> Score {
        Score::new(v).unwrap()
    }

    #[test]
    fn test_score_range() {
        assert!(Score::new(10.0).is_ok());
        assert!(Score::new(0.0).is_ok());
        assert!(Score::new(10.01).is_err());
        assert!(Score::new(-0.1).is_err());
        assert!(Score::new(f64::NAN).is_err());
        assert_eq!(Score::clamped(12.0), Score::MAX);
        assert_eq!(Score::clamped(f64::NAN), Score::MIN);
    }

    #[test]
    fn test_score_deserialize_rejects_out_of_range() {
        assert!(serde_json::from_str::<Score>("7.5").is_ok());
        assert!(serde_json::from_str::<Score>("11").is_err());
    }

    #[test]
    fn test_overall_is_derived_from_scores() {
        let critique = CritiqueResult::new(Pair {
            a: score(8.0),
            b: score(6.0),
        });
        assert_eq!(critique.overall(), score(7.0));
        assert!(critique.passes_threshold(score(7.0)));
        assert!(!critique.passes_threshold(score(7.5)));
        assert_eq!(critique.scores().get(Dimension::Technical), Some(score(6.0)));
        assert_eq!(critique.scores().get(Dimension::Story), None);
    }

    #[test]
    fn test_critical_detection() {
        let critique = CritiqueResult::new(Pair {
            a: score(9.0),
            b: score(9.0),
        })
        .with_issue(Issue::new(Severity::Minor, "slight blur"));
        assert!(!critique.has_critical());

        let critique =
            critique.with_issue(Issue::critical("extra limb").in_dimension(Dimension::Anatomy));
        assert!(critique.has_critical());
        assert_eq!(critique.issues_with(Severity::Critical).count(), 1);
    }

    #[test]
    fn test_severity_aliases() {
        let sev: Severity = serde_json::from_str("\"medium\"").unwrap();
        assert_eq!(sev, Severity::Major);
        let sev: Severity = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(sev, Severity::Critical);
    }
}
