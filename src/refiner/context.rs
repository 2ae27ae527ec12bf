use serde::Serialize;
use serde_json::{json, Value};

use crate::{
    config::RuleBook,
    critique::{CritiqueResult, Dimension, Issue, Score, ScoreCard, Severity},
    error::{Result, ResultExt},
    stage::Stage,
};

/// How urgently the next request has to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Moderate,
    High,
    Critical,
}

/// A dimension scoring under its rule sub-threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeakDimension {
    pub dimension: Dimension,
    pub score: Score,
    pub below: f64,
}

/// Issues grouped by severity, most severe first when serialized.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IssueGroups {
    pub critical: Vec<Issue>,
    pub major: Vec<Issue>,
    pub minor: Vec<Issue>,
}

impl IssueGroups {
    fn from_issues(issues: &[Issue]) -> Self {
        let mut groups = Self::default();
        for issue in issues {
            match issue.severity {
                Severity::Critical => groups.critical.push(issue.clone()),
                Severity::Major => groups.major.push(issue.clone()),
                Severity::Minor => groups.minor.push(issue.clone()),
            }
        }
        groups
    }

    pub fn total(&self) -> usize {
        self.critical.len() + self.major.len() + self.minor.len()
    }
}

/// Everything a model-assisted refiner needs to rewrite a request.
#[derive(Debug, Clone)]
pub struct FeedbackContext<S: Stage> {
    pub request: S::Request,
    pub prompt: String,
    /// The latest candidate, serialized.
    pub candidate: Value,
    pub critique: CritiqueResult<S::Scores>,
    pub retry_count: usize,
    pub priority: Priority,
    pub issues: IssueGroups,
    pub weak_dimensions: Vec<WeakDimension>,
}

impl<S: Stage> FeedbackContext<S> {
    pub fn build(
        request: &S::Request,
        latest: &S::Candidate,
        critique: &CritiqueResult<S::Scores>,
        retry_count: usize,
        rules: &RuleBook,
    ) -> Result<Self> {
        let weak_dimensions = weak_dimensions(critique.scores(), rules);
        let issues = IssueGroups::from_issues(&critique.issues);
        let priority = priority_for(&issues, critique.scores(), &weak_dimensions);

        Ok(Self {
            request: request.clone(),
            prompt: S::prompt_of(request),
            candidate: serde_json::to_value(latest)
                .with_context(format!("serializing {} candidate", S::NAME))?,
            critique: critique.clone(),
            retry_count,
            priority,
            issues,
            weak_dimensions,
        })
    }

    /// Render the context as the JSON document sent to the model.
    pub fn to_json(&self) -> Value {
        let scores: serde_json::Map<String, Value> = self
            .critique
            .scores()
            .dimensions()
            .into_iter()
            .map(|(d, s)| (d.label().to_string(), json!(s.value())))
            .collect();

        json!({
            "stage": S::NAME,
            "original_prompt": self.prompt,
            "retry_count": self.retry_count,
            "priority": self.priority,
            "overall_score": self.critique.overall().value(),
            "scores": scores,
            "weak_dimensions": self.weak_dimensions,
            "strengths": self.critique.strengths,
            "weaknesses": self.critique.weaknesses,
            "suggestions": self.critique.suggestions,
            "issues": self.issues,
            "candidate": self.candidate,
        })
    }
}

pub(crate) fn weak_dimensions<C: ScoreCard>(scores: &C, rules: &RuleBook) -> Vec<WeakDimension> {
    scores
        .dimensions()
        .into_iter()
        .filter_map(|(dimension, score)| {
            let rule = rules.rule_for(dimension)?;
            rule.triggered_by(score).then_some(WeakDimension {
                dimension,
                score,
                below: rule.below,
            })
        })
        .collect()
}

fn priority_for<C: ScoreCard>(
    issues: &IssueGroups,
    scores: &C,
    weak: &[WeakDimension],
) -> Priority {
    if !issues.critical.is_empty() {
        Priority::Critical
    } else if !issues.major.is_empty() || scores.dimensions().iter().any(|(_, s)| s.value() < 7.0) {
        Priority::High
    } else if !weak.is_empty() {
        Priority::Moderate
    } else {
        Priority::Low
    }
}
