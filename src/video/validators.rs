use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::{
    critique::{CritiqueResult, Dimension, Issue, Score, Severity},
    error::{LoopError, Result},
    provider::Critic,
};

use super::{VideoClip, VideoRequest, VideoScores, VideoStage};

/// Tolerance between expected and actual clip length, in seconds.
const DURATION_TOLERANCE: f64 = 0.5;
const MIN_MOTION_QUALITY: f64 = 0.7;
const MIN_VISUAL_CLARITY: f64 = 0.7;

/// Result of one validator on one clip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatorReport {
    pub score: Score,
    pub issues: Vec<Issue>,
    pub suggestions: Vec<String>,
}

impl ValidatorReport {
    pub fn new(score: Score) -> Self {
        Self {
            score,
            issues: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issues.push(issue);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Scores a clip along a single dimension.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, clip: &VideoClip, request: &VideoRequest) -> Result<ValidatorReport>;
}

/// Validator backed by a synchronous closure.
pub struct FnValidator<F>(pub F);

#[async_trait]
impl<F> Validator for FnValidator<F>
where
    F: Fn(&VideoClip, &VideoRequest) -> Result<ValidatorReport> + Send + Sync,
{
    async fn validate(&self, clip: &VideoClip, request: &VideoRequest) -> Result<ValidatorReport> {
        (self.0)(clip, request)
    }
}

/// Measurements taken from a rendered clip, ratios in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClipMetrics {
    pub duration: f64,
    pub motion_quality: f64,
    pub visual_clarity: f64,
}

/// Measures a rendered clip.
#[async_trait]
pub trait ClipProbe: Send + Sync {
    async fn probe(&self, clip: &VideoClip) -> Result<ClipMetrics>;
}

/// Scores playback quality from probed metrics. No model involved.
pub struct TechnicalValidator<P> {
    probe: P,
}

impl<P: ClipProbe> TechnicalValidator<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }

    /// Duration within tolerance scores 10, otherwise 6 (weight 0.30); motion and clarity
    /// ratios scale to 10 (weight 0.35 each).
    pub fn score_metrics(metrics: &ClipMetrics, expected_duration: f64) -> ValidatorReport {
        let duration_ok = (metrics.duration - expected_duration).abs() <= DURATION_TOLERANCE;
        let duration_score = if duration_ok { 10.0 } else { 6.0 };
        let motion = metrics.motion_quality.clamp(0.0, 1.0);
        let clarity = metrics.visual_clarity.clamp(0.0, 1.0);

        let score =
            Score::clamped(duration_score * 0.30 + motion * 10.0 * 0.35 + clarity * 10.0 * 0.35);
        let mut report = ValidatorReport::new(score);

        if !duration_ok {
            report = report
                .with_issue(
                    Issue::new(
                        Severity::Major,
                        format!(
                            "Duration mismatch: {:.1}s vs expected {:.1}s",
                            metrics.duration, expected_duration
                        ),
                    )
                    .in_dimension(Dimension::Technical),
                )
                .with_suggestion(format!("Target a clip length of {expected_duration:.1}s"));
        }
        if motion < MIN_MOTION_QUALITY {
            report = report
                .with_issue(
                    Issue::new(Severity::Major, format!("Poor motion quality: {motion:.2}"))
                        .in_dimension(Dimension::Technical),
                )
                .with_suggestion("Reduce camera and character motion");
        }
        if clarity < MIN_VISUAL_CLARITY {
            report = report.with_issue(
                Issue::new(Severity::Minor, format!("Low visual clarity: {clarity:.2}"))
                    .in_dimension(Dimension::Technical),
            );
        }
        report
    }
}

#[async_trait]
impl<P: ClipProbe> Validator for TechnicalValidator<P> {
    async fn validate(&self, clip: &VideoClip, request: &VideoRequest) -> Result<ValidatorReport> {
        let metrics = self.probe.probe(clip).await?;
        Ok(Self::score_metrics(&metrics, request.expected_duration))
    }
}

/// Anatomy, consistency and technical validators combined into a video critic.
///
/// The three validators run concurrently on each clip; any one failing fails the critique.
#[derive(Clone)]
pub struct ValidatorPanel {
    anatomy: Arc<dyn Validator>,
    consistency: Arc<dyn Validator>,
    technical: Arc<dyn Validator>,
}

impl ValidatorPanel {
    pub fn new(
        anatomy: impl Validator + 'static,
        consistency: impl Validator + 'static,
        technical: impl Validator + 'static,
    ) -> Self {
        Self {
            anatomy: Arc::new(anatomy),
            consistency: Arc::new(consistency),
            technical: Arc::new(technical),
        }
    }

    pub async fn assess(
        &self,
        clip: &VideoClip,
        request: &VideoRequest,
    ) -> Result<CritiqueResult<VideoScores>> {
        let (anatomy, consistency, technical) = futures::try_join!(
            self.anatomy.validate(clip, request),
            self.consistency.validate(clip, request),
            self.technical.validate(clip, request),
        )?;

        debug!(
            scene = clip.scene_number,
            anatomy = %anatomy.score,
            consistency = %consistency.score,
            technical = %technical.score,
            "Validators finished"
        );

        let scores = VideoScores::new(anatomy.score, consistency.score, technical.score);
        let mut critique = CritiqueResult::new(scores);

        for (dimension, report) in [
            (Dimension::Anatomy, anatomy),
            (Dimension::Consistency, consistency),
            (Dimension::Technical, technical),
        ] {
            if report.issues.is_empty() && report.score.value() >= 8.0 {
                critique
                    .strengths
                    .push(format!("{dimension} scored {}", report.score));
            }
            for issue in report.issues {
                let issue = match issue.dimension {
                    Some(_) => issue,
                    None => issue.in_dimension(dimension),
                };
                if issue.severity >= Severity::Major {
                    critique
                        .weaknesses
                        .push(format!("{dimension}: {}", issue.description));
                }
                critique.issues.push(issue);
            }
            critique.suggestions.extend(report.suggestions);
        }

        Ok(critique)
    }
}

#[async_trait]
impl Critic<VideoStage> for ValidatorPanel {
    async fn critique(
        &self,
        candidate: &VideoClip,
        request: &VideoRequest,
    ) -> Result<CritiqueResult<VideoScores>> {
        self.assess(candidate, request).await.map_err(|err| match err {
            LoopError::Critique { .. } => err,
            other => LoopError::Critique {
                stage: "video".to_string(),
                message: format!("validation of scene {} failed: {other}", candidate.scene_number),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(duration: f64, motion: f64, clarity: f64) -> ClipMetrics {
        ClipMetrics {
            duration,
            motion_quality: motion,
            visual_clarity: clarity,
        }
    }

    #[test]
    fn test_technical_score_clean_clip() {
        let report = TechnicalValidator::<NoProbe>::score_metrics(&metrics(6.2, 1.0, 1.0), 6.0);
        assert!((report.score.value() - 10.0).abs() < 1e-9);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_technical_score_penalties() {
        let report = TechnicalValidator::<NoProbe>::score_metrics(&metrics(8.0, 0.6, 0.5), 6.0);
        // 6*0.30 + 6*0.35 + 5*0.35
        assert!((report.score.value() - 5.65).abs() < 1e-9);
        assert_eq!(report.issues.len(), 3);
        assert!(report.issues[0].description.starts_with("Duration mismatch"));
        assert_eq!(report.suggestions.len(), 2);
    }

    struct NoProbe;

    #[async_trait]
    impl ClipProbe for NoProbe {
        async fn probe(&self, _clip: &VideoClip) -> Result<ClipMetrics> {
            Err(LoopError::Validation("no probe".into()))
        }
    }

    fn fixed(
        score: f64,
    ) -> FnValidator<impl Fn(&VideoClip, &VideoRequest) -> Result<ValidatorReport>> {
        FnValidator(move |_: &VideoClip, _: &VideoRequest| -> Result<ValidatorReport> {
            Ok(ValidatorReport::new(Score::new(score)?))
        })
    }

    #[tokio::test]
    async fn test_panel_combines_reports() {
        let anatomy = FnValidator(|_: &VideoClip, _: &VideoRequest| -> Result<ValidatorReport> {
            Ok(ValidatorReport::new(Score::new(5.0)?)
                .with_issue(Issue::critical("six fingers on left hand"))
                .with_suggestion("Keep hands out of frame"))
        });
        let panel = ValidatorPanel::new(anatomy, fixed(9.0), fixed(8.0));

        let clip = VideoClip::new(1, "clip-1.mp4", 6.0);
        let request = VideoRequest::new(1, "A fox in snow", 6.0);
        let critique = panel.assess(&clip, &request).await.unwrap();

        assert!(critique.has_critical());
        assert_eq!(critique.issues[0].dimension, Some(Dimension::Anatomy));
        assert_eq!(critique.suggestions, vec!["Keep hands out of frame".to_string()]);
        assert!((critique.overall().value() - (5.0 * 0.40 + 9.0 * 0.35 + 8.0 * 0.25)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_panel_failure_is_critique_error() {
        let panel = ValidatorPanel::new(
            fixed(9.0),
            fixed(9.0),
            TechnicalValidator::new(NoProbe),
        );
        let clip = VideoClip::new(2, "clip-2.mp4", 6.0);
        let request = VideoRequest::new(2, "A fox in snow", 6.0);
        let err = Critic::<VideoStage>::critique(&panel, &clip, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, LoopError::Critique { .. }));
    }
}
