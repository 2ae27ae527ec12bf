//! Video quality validation with per-asset retry.
//!
//! Each clip is scored by three validators (anatomy, consistency, technical) whose weighted
//! sum drives an accept, retry or fail decision for that clip alone.

mod batch;
mod report;
mod validators;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use batch::{AssetOutcome, AssetStatus, BatchOutcome, VideoBatch};
pub use report::{QualityReport, QualityRow};
pub use validators::{
    ClipMetrics, ClipProbe, FnValidator, TechnicalValidator, Validator, ValidatorPanel,
    ValidatorReport,
};

use crate::{
    config::LoopConfig,
    critique::{Dimension, Score, ScoreCard},
    error::{LoopError, Result},
    policy::{decide, Verdict},
    stage::Stage,
};

pub const ANATOMY_WEIGHT: f64 = 0.40;
pub const CONSISTENCY_WEIGHT: f64 = 0.35;
pub const TECHNICAL_WEIGHT: f64 = 0.25;

/// Bar applied once a clip's retries are spent.
pub const VIDEO_FALLBACK_THRESHOLD: f64 = 6.5;
pub const VIDEO_MAX_RETRIES: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRequest {
    /// Position of the asset in the final cut, 1-based.
    pub scene_number: usize,
    pub prompt: String,
    #[serde(default)]
    pub reference_images: Vec<String>,
    /// Expected clip length in seconds.
    pub expected_duration: f64,
}

impl VideoRequest {
    pub fn new(scene_number: usize, prompt: impl Into<String>, expected_duration: f64) -> Self {
        Self {
            scene_number,
            prompt: prompt.into(),
            reference_images: Vec::new(),
            expected_duration,
        }
    }

    pub fn with_reference_image(mut self, uri: impl Into<String>) -> Self {
        self.reference_images.push(uri.into());
        self
    }
}

/// A rendered clip reference. The renderer owns the bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoClip {
    pub scene_number: usize,
    pub uri: String,
    /// Actual clip length in seconds.
    pub duration: f64,
}

impl VideoClip {
    pub fn new(scene_number: usize, uri: impl Into<String>, duration: f64) -> Self {
        Self {
            scene_number,
            uri: uri.into(),
            duration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoScores {
    pub anatomy: Score,
    pub consistency: Score,
    pub technical: Score,
}

impl VideoScores {
    pub fn new(anatomy: Score, consistency: Score, technical: Score) -> Self {
        Self {
            anatomy,
            consistency,
            technical,
        }
    }
}

impl ScoreCard for VideoScores {
    fn dimensions(&self) -> Vec<(Dimension, Score)> {
        vec![
            (Dimension::Anatomy, self.anatomy),
            (Dimension::Consistency, self.consistency),
            (Dimension::Technical, self.technical),
        ]
    }

    fn overall(&self) -> Score {
        Score::weighted(&[
            (self.anatomy, ANATOMY_WEIGHT),
            (self.consistency, CONSISTENCY_WEIGHT),
            (self.technical, TECHNICAL_WEIGHT),
        ])
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VideoStage;

impl Stage for VideoStage {
    type Request = VideoRequest;
    type Candidate = VideoClip;
    type Scores = VideoScores;

    const NAME: &'static str = "video";

    fn prompt_of(request: &VideoRequest) -> String {
        request.prompt.clone()
    }

    fn revise(request: &VideoRequest, _latest: &VideoClip, prompt: String) -> VideoRequest {
        VideoRequest {
            prompt,
            ..request.clone()
        }
    }

    fn check(request: &VideoRequest, clip: &VideoClip) -> Result<()> {
        if clip.scene_number != request.scene_number {
            return Err(LoopError::Validation(format!(
                "clip for scene {} returned for scene {}",
                clip.scene_number, request.scene_number
            )));
        }
        Ok(())
    }
}

/// Retry allowance for one asset, independent of every other asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryBudget {
    pub retry_count: usize,
    pub max_retries: usize,
}

impl RetryBudget {
    pub fn new(max_retries: usize) -> Self {
        Self {
            retry_count: 0,
            max_retries,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    pub fn remaining(&self) -> usize {
        self.max_retries.saturating_sub(self.retry_count)
    }

    /// The budget after `attempts` generations: every attempt past the first is a retry.
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.retry_count = attempts.saturating_sub(1).min(self.max_retries);
        self
    }

    /// Loop configuration with one attempt plus `max_retries` retries.
    pub fn loop_config(&self, quality_threshold: f64) -> LoopConfig {
        LoopConfig::video()
            .with_max_iterations(self.max_retries + 1)
            .with_quality_threshold(quality_threshold)
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(VIDEO_MAX_RETRIES)
    }
}

/// Accept, retry or fail one clip from its three validator scores.
///
/// `Decision::Continue` means retry. A critical issue forces a retry while the budget lasts.
pub fn decide_video(
    scores: &VideoScores,
    budget: RetryBudget,
    quality_threshold: Score,
    critical: bool,
) -> Verdict {
    decide(
        scores.overall(),
        budget.retry_count + 1,
        budget.max_retries + 1,
        quality_threshold,
        Some(Score::clamped(VIDEO_FALLBACK_THRESHOLD)),
        critical,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Decision;

    fn scores(a: f64, c: f64, t: f64) -> VideoScores {
        VideoScores::new(
            Score::new(a).unwrap(),
            Score::new(c).unwrap(),
            Score::new(t).unwrap(),
        )
    }

    #[test]
    fn test_weighted_overall() {
        let s = scores(9.0, 8.0, 6.0);
        assert!((s.overall().value() - 7.9).abs() < 1e-9);
    }

    #[test]
    fn test_decide_video_retry_then_fallback() {
        let threshold = Score::new(8.0).unwrap();
        let mid = scores(7.0, 7.0, 7.0);

        let first = decide_video(&mid, RetryBudget::new(2), threshold, false);
        assert_eq!(first.decision, Decision::Continue);

        let spent = RetryBudget::new(2).with_attempts(3);
        assert_eq!(spent.retry_count, 2);
        assert!(spent.exhausted());
        assert_eq!(RetryBudget::new(2).with_attempts(0).retry_count, 0);
        assert_eq!(spent.remaining(), 0);
        assert_eq!(RetryBudget::new(2).remaining(), 2);
        let last = decide_video(&mid, spent, threshold, false);
        assert_eq!(last.decision, Decision::Accept);

        let poor = decide_video(&scores(5.0, 5.0, 5.0), spent, threshold, false);
        assert_eq!(poor.decision, Decision::Fail);
    }

    #[test]
    fn test_critical_forces_retry() {
        let threshold = Score::new(8.0).unwrap();
        let verdict = decide_video(&scores(9.5, 9.5, 9.5), RetryBudget::new(2), threshold, true);
        assert_eq!(verdict.decision, Decision::Continue);
    }

    #[test]
    fn test_budget_maps_to_loop_config() {
        let config = RetryBudget::default().loop_config(8.0);
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.fallback_acceptable_threshold, Some(VIDEO_FALLBACK_THRESHOLD));
        assert!(config.retry_on_critical);
    }
}
