use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    critique::{CritiqueResult, Issue, Score, ScoreCard},
    error::{LoopError, Result, ResultExt},
    idea::StoryScores,
    provider::{Critic, Generator, ModelRefiner, ModelRevision},
    refiner::FeedbackContext,
    scene::SceneScores,
    stage::Stage,
};

use super::GeminiJson;

type RequestFormatter<R> = Arc<dyn Fn(&R) -> Result<String> + Send + Sync>;
type CandidateFormatter<C, R> = Arc<dyn Fn(&C, &R) -> Result<String> + Send + Sync>;

/// Generator for stages whose candidate is model-produced JSON.
pub struct GeminiGenerator<S: Stage> {
    json: GeminiJson,
    system_instruction: String,
    format: RequestFormatter<S::Request>,
}

impl<S: Stage> GeminiGenerator<S> {
    pub fn new(
        json: GeminiJson,
        system_instruction: impl Into<String>,
        format: impl Fn(&S::Request) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            json,
            system_instruction: system_instruction.into(),
            format: Arc::new(format),
        }
    }

    /// Send the serialized request as the prompt.
    pub fn with_json_prompt(json: GeminiJson, system_instruction: impl Into<String>) -> Self {
        Self::new(json, system_instruction, |request: &S::Request| {
            let request = serde_json::to_string_pretty(request)
                .with_context(format!("serializing {} request", S::NAME))?;
            Ok(format!("Request:\n{request}"))
        })
    }
}

#[async_trait]
impl<S> Generator<S> for GeminiGenerator<S>
where
    S: Stage,
    S::Candidate: DeserializeOwned + JsonSchema,
{
    async fn generate(&self, request: &S::Request) -> Result<S::Candidate> {
        let prompt = (self.format)(request)?;
        self.json.call(&self.system_instruction, &prompt).await
    }
}

/// Converts a stage-specific critic reply into a [`CritiqueResult`].
pub trait IntoCritique<C: ScoreCard> {
    fn into_critique(self) -> Result<CritiqueResult<C>>;
}

/// Critic for any stage whose critic reply shape is `W`.
pub struct GeminiCritic<S: Stage, W> {
    json: GeminiJson,
    system_instruction: String,
    format: CandidateFormatter<S::Candidate, S::Request>,
    _wire: PhantomData<fn() -> W>,
}

impl<S: Stage, W> GeminiCritic<S, W> {
    pub fn new(
        json: GeminiJson,
        system_instruction: impl Into<String>,
        format: impl Fn(&S::Candidate, &S::Request) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            json,
            system_instruction: system_instruction.into(),
            format: Arc::new(format),
            _wire: PhantomData,
        }
    }

    /// Send the serialized candidate and request as the prompt.
    pub fn with_json_prompt(json: GeminiJson, system_instruction: impl Into<String>) -> Self {
        Self::new(
            json,
            system_instruction,
            |candidate: &S::Candidate, request: &S::Request| {
                let candidate = serde_json::to_string_pretty(candidate)
                    .with_context(format!("serializing {} candidate", S::NAME))?;
                let request = serde_json::to_string_pretty(request)
                    .with_context(format!("serializing {} request", S::NAME))?;
                Ok(format!(
                    "Candidate:\n{candidate}\n\nGenerated from request:\n{request}"
                ))
            },
        )
    }
}

#[async_trait]
impl<S, W> Critic<S> for GeminiCritic<S, W>
where
    S: Stage,
    W: DeserializeOwned + JsonSchema + IntoCritique<S::Scores> + Send + 'static,
{
    async fn critique(
        &self,
        candidate: &S::Candidate,
        request: &S::Request,
    ) -> Result<CritiqueResult<S::Scores>> {
        let prompt = (self.format)(candidate, request)?;
        let wire: W = self.json.call(&self.system_instruction, &prompt).await?;
        wire.into_critique().map_err(|err| LoopError::Critique {
            stage: S::NAME.to_string(),
            message: err.to_string(),
        })
    }
}

/// Idea critic reply: one holistic score.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IdeaCritiqueWire {
    pub score: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

impl IntoCritique<StoryScores> for IdeaCritiqueWire {
    fn into_critique(self) -> Result<CritiqueResult<StoryScores>> {
        Ok(CritiqueResult::new(StoryScores::new(Score::new(self.score)?))
            .with_strengths(self.strengths)
            .with_weaknesses(self.weaknesses)
            .with_suggestions(self.suggestions)
            .with_issues(self.issues))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SceneCriteriaWire {
    pub visual_coherence: f64,
    pub narrative_flow: f64,
    pub character_consistency: f64,
    pub pacing_quality: f64,
    pub technical_feasibility: f64,
    pub style_alignment: f64,
}

/// Scene critic reply: six criteria, an optional overall and refinement priorities.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SceneCritiqueWire {
    #[serde(default)]
    pub overall_score: Option<f64>,
    pub criteria_scores: SceneCriteriaWire,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// What to focus on next, most important first.
    #[serde(default)]
    pub refinement_priorities: Vec<String>,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

impl IntoCritique<SceneScores> for SceneCritiqueWire {
    fn into_critique(self) -> Result<CritiqueResult<SceneScores>> {
        let c = &self.criteria_scores;
        let mut scores = SceneScores {
            visual_coherence: Score::new(c.visual_coherence)?,
            narrative_flow: Score::new(c.narrative_flow)?,
            character_consistency: Score::new(c.character_consistency)?,
            pacing_quality: Score::new(c.pacing_quality)?,
            technical_feasibility: Score::new(c.technical_feasibility)?,
            style_alignment: Score::new(c.style_alignment)?,
            reported_overall: None,
        };
        if let Some(overall) = self.overall_score {
            scores = scores.with_reported_overall(Score::new(overall)?);
        }

        let mut suggestions = self.refinement_priorities;
        for s in self.suggestions {
            if !suggestions.contains(&s) {
                suggestions.push(s);
            }
        }

        Ok(CritiqueResult::new(scores)
            .with_strengths(self.strengths)
            .with_weaknesses(self.weaknesses)
            .with_suggestions(suggestions)
            .with_issues(self.issues))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ImprovementApplied {
    #[serde(default = "default_category")]
    pub category: String,
    pub issue_addressed: String,
    pub improvement: String,
}

fn default_category() -> String {
    "general".to_string()
}

/// Reply of the model-assisted refiner.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RefinementReply {
    pub improved_prompt: String,
    #[serde(default)]
    pub improvements_applied: Vec<ImprovementApplied>,
    #[serde(default)]
    pub suggestions_used: Vec<String>,
    #[serde(default)]
    pub simplifications: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub expected_score_improvement: Option<f64>,
}

impl RefinementReply {
    pub fn into_revision(self) -> ModelRevision {
        let mut revision = ModelRevision::new(self.improved_prompt);
        for i in &self.improvements_applied {
            revision = revision.with_note(format!(
                "[{}] {}: {}",
                i.category, i.issue_addressed, i.improvement
            ));
        }
        if !self.suggestions_used.is_empty() {
            revision = revision.with_note(format!(
                "Critic suggestions incorporated: {}",
                self.suggestions_used.len()
            ));
        }
        for s in &self.simplifications {
            revision = revision.with_note(format!("[simplification] {s}"));
        }
        let fmt_opt = |v: Option<f64>| v.map(|v| format!("{v:.2}")).unwrap_or_else(|| "N/A".into());
        revision.with_note(format!(
            "Model confidence: {}, expected improvement: {}",
            fmt_opt(self.confidence),
            fmt_opt(self.expected_score_improvement)
        ))
    }
}

/// Model-assisted refiner that sends the structured feedback context to Gemini.
pub struct GeminiRefiner<S> {
    json: GeminiJson,
    system_instruction: String,
    _stage: PhantomData<fn() -> S>,
}

impl<S: Stage> GeminiRefiner<S> {
    pub fn new(json: GeminiJson, system_instruction: impl Into<String>) -> Self {
        Self {
            json,
            system_instruction: system_instruction.into(),
            _stage: PhantomData,
        }
    }
}

#[async_trait]
impl<S: Stage> ModelRefiner<S> for GeminiRefiner<S> {
    async fn refine(&self, context: &FeedbackContext<S>) -> Result<ModelRevision> {
        let prompt = format!(
            "Rewrite the original prompt so the next attempt fixes the reported problems.\n\nContext:\n{}",
            serde_json::to_string_pretty(&context.to_json())?
        );
        let reply: RefinementReply = self
            .json
            .call(&self.system_instruction, &prompt)
            .await
            .map_err(|err| LoopError::Refinement(err.to_string()))?;
        Ok(reply.into_revision())
    }
}
