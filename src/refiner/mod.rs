//! Prompt refinement with a model-assisted primary path and a deterministic fallback.

mod context;
mod rules;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

pub use context::{FeedbackContext, IssueGroups, Priority, WeakDimension};
pub use rules::{RuleBasedRefiner, RuleRevision};

use crate::{
    config::RuleBook,
    critique::CritiqueResult,
    error::{LoopError, Result},
    provider::{ModelRefiner, ModelRevision},
    stage::Stage,
};

/// Which strategy produced a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    Model,
    Rules,
    /// The model path failed and the rule path was used instead.
    RulesAfterModelFailure { error: String },
}

impl Provenance {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::RulesAfterModelFailure { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Revision {
    pub provenance: Provenance,
    pub notes: Vec<String>,
}

/// The next request and how it was produced.
#[derive(Debug, Clone)]
pub struct Refinement<S: Stage> {
    pub request: S::Request,
    pub revision: Revision,
}

/// Explicit two-step refinement chain: model first when configured, then rules.
pub struct PromptRefiner<S: Stage> {
    model: Option<Arc<dyn ModelRefiner<S>>>,
    rules: RuleBasedRefiner,
}

impl<S: Stage> PromptRefiner<S> {
    pub fn rules_only(book: RuleBook) -> Self {
        Self {
            model: None,
            rules: RuleBasedRefiner::new(book),
        }
    }

    pub fn with_model(mut self, model: Arc<dyn ModelRefiner<S>>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Build the next request. Never fails: a model failure falls back to the rules once.
    pub async fn refine(
        &self,
        request: &S::Request,
        latest: &S::Candidate,
        critique: &CritiqueResult<S::Scores>,
        retry_count: usize,
    ) -> Refinement<S> {
        let Some(model) = &self.model else {
            let rules = self.rules.refine::<S>(request, critique);
            return self.finish(request, latest, rules.prompt, Provenance::Rules, rules.notes);
        };

        match self
            .refine_with_model(model.as_ref(), request, latest, critique, retry_count)
            .await
        {
            Ok(revision) => {
                debug!(
                    stage = S::NAME,
                    notes = revision.notes.len(),
                    "Model refinement applied"
                );
                self.finish(request, latest, revision.prompt, Provenance::Model, revision.notes)
            }
            Err(err) => {
                warn!(
                    stage = S::NAME,
                    retry_count,
                    error = %err,
                    "Model refinement failed, using rule-based fallback"
                );
                let rules = self.rules.refine::<S>(request, critique);
                let mut notes = vec![format!(
                    "Used rule-based fallback due to model failure: {err}"
                )];
                notes.extend(rules.notes);
                self.finish(
                    request,
                    latest,
                    rules.prompt,
                    Provenance::RulesAfterModelFailure {
                        error: err.to_string(),
                    },
                    notes,
                )
            }
        }
    }

    async fn refine_with_model(
        &self,
        model: &dyn ModelRefiner<S>,
        request: &S::Request,
        latest: &S::Candidate,
        critique: &CritiqueResult<S::Scores>,
        retry_count: usize,
    ) -> Result<ModelRevision> {
        let context =
            FeedbackContext::<S>::build(request, latest, critique, retry_count, self.rules.book())?;
        debug!(
            stage = S::NAME,
            priority = ?context.priority,
            issues = context.issues.total(),
            "Requesting model refinement"
        );
        let revision = model.refine(&context).await?;
        if revision.prompt.trim().is_empty() {
            return Err(LoopError::Refinement(
                "model returned an empty prompt".to_string(),
            ));
        }
        Ok(revision)
    }

    fn finish(
        &self,
        request: &S::Request,
        latest: &S::Candidate,
        prompt: String,
        provenance: Provenance,
        notes: Vec<String>,
    ) -> Refinement<S> {
        Refinement {
            request: S::revise(request, latest, prompt),
            revision: Revision { provenance, notes },
        }
    }
}
