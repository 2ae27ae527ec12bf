use std::fmt::Debug;

use serde::Serialize;

use crate::{critique::ScoreCard, error::Result};

/// One instantiation of the refinement loop.
///
/// A stage fixes the request, candidate and score types the controller works with, and
/// knows how to read and rewrite the prompt text that refinement operates on.
pub trait Stage: Debug + Send + Sync + 'static {
    type Request: Clone + Debug + Serialize + Send + Sync + 'static;
    type Candidate: Debug + Serialize + Send + Sync + 'static;
    type Scores: ScoreCard;

    /// Short name used in logs and errors.
    const NAME: &'static str;

    /// The prompt text refinement starts from.
    fn prompt_of(request: &Self::Request) -> String;

    /// Build the next request around a refined prompt.
    fn revise(request: &Self::Request, latest: &Self::Candidate, prompt: String) -> Self::Request;

    /// Reject structurally invalid candidates before they are critiqued.
    fn check(request: &Self::Request, candidate: &Self::Candidate) -> Result<()> {
        let _ = (request, candidate);
        Ok(())
    }
}
