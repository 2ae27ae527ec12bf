//! Seams between the loop and the outside world.
//!
//! Generation and critique are opaque async calls. Closure wrappers make it easy to plug in
//! deterministic providers for tests and offline runs.

use async_trait::async_trait;

use crate::{
    critique::CritiqueResult,
    error::Result,
    refiner::FeedbackContext,
    stage::Stage,
};

/// Produces a candidate from a request.
#[async_trait]
pub trait Generator<S: Stage>: Send + Sync {
    async fn generate(&self, request: &S::Request) -> Result<S::Candidate>;
}

/// Assesses a candidate in the context of the request that produced it.
#[async_trait]
pub trait Critic<S: Stage>: Send + Sync {
    async fn critique(
        &self,
        candidate: &S::Candidate,
        request: &S::Request,
    ) -> Result<CritiqueResult<S::Scores>>;
}

/// Model-assisted prompt rewriting. Failures are absorbed by the rule-based fallback.
#[async_trait]
pub trait ModelRefiner<S: Stage>: Send + Sync {
    async fn refine(&self, context: &FeedbackContext<S>) -> Result<ModelRevision>;
}

/// A rewritten prompt plus the changes the model says it applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRevision {
    pub prompt: String,
    pub notes: Vec<String>,
}

impl ModelRevision {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            notes: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

/// Generator backed by a synchronous closure.
///
/// ```rust,ignore
/// let generator = FnGenerator(|req: &VideoRequest| -> Result<VideoClip> {
///     Ok(VideoClip::new(req.scene_number, "clip.mp4", req.expected_duration))
/// });
/// ```
pub struct FnGenerator<F>(pub F);

#[async_trait]
impl<S, F> Generator<S> for FnGenerator<F>
where
    S: Stage,
    F: Fn(&S::Request) -> Result<S::Candidate> + Send + Sync,
{
    async fn generate(&self, request: &S::Request) -> Result<S::Candidate> {
        (self.0)(request)
    }
}

/// Critic backed by a synchronous closure.
pub struct FnCritic<F>(pub F);

#[async_trait]
impl<S, F> Critic<S> for FnCritic<F>
where
    S: Stage,
    F: Fn(&S::Candidate, &S::Request) -> Result<CritiqueResult<S::Scores>> + Send + Sync,
{
    async fn critique(
        &self,
        candidate: &S::Candidate,
        request: &S::Request,
    ) -> Result<CritiqueResult<S::Scores>> {
        (self.0)(candidate, request)
    }
}

/// Model refiner backed by a synchronous closure.
pub struct FnModelRefiner<F>(pub F);

#[async_trait]
impl<S, F> ModelRefiner<S> for FnModelRefiner<F>
where
    S: Stage,
    F: Fn(&FeedbackContext<S>) -> Result<ModelRevision> + Send + Sync,
{
    async fn refine(&self, context: &FeedbackContext<S>) -> Result<ModelRevision> {
        (self.0)(context)
    }
}
