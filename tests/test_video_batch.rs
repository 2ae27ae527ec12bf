use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gemini_critique_loop::prelude::*;
use gemini_critique_loop::video::{AssetStatus, FnValidator, RetryBudget};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

type CallLog = Arc<Mutex<Vec<(usize, String)>>>;

/// Renderer stub: returns `scene-{n}-take-{k}.mp4` and logs every call.
fn renderer(
    log: CallLog,
) -> FnGenerator<impl Fn(&VideoRequest) -> Result<VideoClip> + Send + Sync> {
    FnGenerator(move |req: &VideoRequest| -> Result<VideoClip> {
        if req.scene_number == 9 {
            return Err(LoopError::ServiceUnavailable {
                message: "render farm offline".to_string(),
                attempts: 3,
            });
        }
        let mut calls = log.lock().unwrap();
        calls.push((req.scene_number, req.prompt.clone()));
        let take = calls.iter().filter(|(n, _)| *n == req.scene_number).count();
        Ok(VideoClip::new(
            req.scene_number,
            format!("scene-{}-take-{}.mp4", req.scene_number, take),
            req.expected_duration,
        ))
    })
}

fn fixed(
    score: f64,
) -> FnValidator<impl Fn(&VideoClip, &VideoRequest) -> Result<ValidatorReport> + Send + Sync> {
    FnValidator(move |_: &VideoClip, _: &VideoRequest| -> Result<ValidatorReport> {
        Ok(ValidatorReport::new(Score::new(score)?))
    })
}

/// Scene 2 renders extra fingers until the prompt carries an AVOID clause.
/// Scene 5 is hopeless.
fn anatomy(
) -> FnValidator<impl Fn(&VideoClip, &VideoRequest) -> Result<ValidatorReport> + Send + Sync> {
    FnValidator(|clip: &VideoClip, req: &VideoRequest| -> Result<ValidatorReport> {
        match clip.scene_number {
            2 if !req.prompt.contains("AVOID:") => Ok(ValidatorReport::new(Score::new(4.0)?)
                .with_issue(Issue::critical("Hand shows six fingers"))
                .with_suggestion("Keep hands out of frame")),
            5 => Ok(ValidatorReport::new(Score::new(2.0)?)),
            _ => Ok(ValidatorReport::new(Score::new(9.0)?)),
        }
    })
}

fn consistency(
) -> FnValidator<impl Fn(&VideoClip, &VideoRequest) -> Result<ValidatorReport> + Send + Sync> {
    FnValidator(|clip: &VideoClip, _: &VideoRequest| -> Result<ValidatorReport> {
        let score = if clip.scene_number == 5 { 5.0 } else { 9.0 };
        Ok(ValidatorReport::new(Score::new(score)?))
    })
}

fn batch(log: CallLog, technical: impl Validator + 'static) -> VideoBatch {
    let controller = RefinementController::<VideoStage>::builder()
        .with_generator(renderer(log))
        .with_critic(ValidatorPanel::new(anatomy(), consistency(), technical))
        .with_config(RetryBudget::default().loop_config(8.0))
        .build()
        .unwrap();
    VideoBatch::new(controller).with_concurrency(2)
}

fn request(scene: usize) -> VideoRequest {
    VideoRequest::new(scene, format!("Scene {scene}: the fox crosses the frozen river"), 6.0)
        .with_reference_image("refs/fox.png")
}

#[tokio::test]
async fn test_only_defective_asset_is_regenerated() {
    init_tracing();
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let outcome = batch(log.clone(), fixed(9.0))
        .run(vec![request(3), request(1), request(2)])
        .await;

    let calls = log.lock().unwrap().clone();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls.iter().filter(|(n, _)| *n == 1).count(), 1);
    assert_eq!(calls.iter().filter(|(n, _)| *n == 3).count(), 1);
    assert_eq!(calls.iter().filter(|(n, _)| *n == 2).count(), 2);

    // The retry prompt carries the anatomy remedies.
    let retry_prompt = &calls.iter().filter(|(n, _)| *n == 2).nth(1).unwrap().1;
    assert!(retry_prompt.contains("AVOID: extra limbs, deformed hands"));
    assert!(retry_prompt.contains("ADDRESS: Keep hands out of frame"));

    let uris: Vec<&str> = outcome.clips().iter().map(|c| c.uri.as_str()).collect();
    assert_eq!(
        uris,
        vec![
            "scene-1-take-1.mp4",
            "scene-2-take-2.mp4",
            "scene-3-take-1.mp4"
        ]
    );

    let second = outcome.asset(2).unwrap();
    assert_eq!(second.status(), AssetStatus::Accepted);
    assert_eq!(second.retries(), 1);
    assert_eq!(second.budget.remaining(), 1);
    assert!(second.replaced());
    assert_eq!(second.position, 2);

    for scene in [1, 3] {
        let asset = outcome.asset(scene).unwrap();
        assert_eq!(asset.attempts(), 1);
        assert!(!asset.replaced());
    }

    assert_eq!(outcome.count(AssetStatus::Accepted), 3);
    assert_eq!(outcome.metrics.runs, 3);
    assert_eq!(outcome.metrics.generate_calls, 4);
    assert_eq!(outcome.metrics.rule_refinements, 1);
    assert!(outcome.metrics.failures.is_empty());

    let report = outcome.report();
    assert_eq!(report.total, 4);
    assert_eq!(report.passed, 3);
    assert_eq!(report.retry, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.summary(), "3/4 scenes passed, 1 need retry, 0 failed");
}

#[tokio::test]
async fn test_hopeless_asset_fails_but_keeps_best_clip() {
    init_tracing();
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let outcome = batch(log.clone(), fixed(2.0))
        .run(vec![request(4), request(5)])
        .await;

    let hopeless = outcome.asset(5).unwrap();
    assert_eq!(hopeless.status(), AssetStatus::Failed);
    assert_eq!(hopeless.attempts(), 3);
    assert!(hopeless.budget.exhausted());
    assert_eq!(hopeless.budget.remaining(), 0);
    assert_eq!(hopeless.clip().unwrap().uri, "scene-5-take-1.mp4");

    // Scene 4 lands between the fallback and the quality bar and settles once retries run out.
    let settled = outcome.asset(4).unwrap();
    assert_eq!(settled.status(), AssetStatus::Accepted);
    assert_eq!(settled.attempts(), 3);
    let run = settled.outcome.as_ref().unwrap();
    assert_eq!(run.verdict.rationale, Rationale::SettledAtFallback);

    let report = outcome.report();
    assert_eq!(report.total, 6);
    assert_eq!(report.passed, 1);
    assert_eq!(report.retry, 4);
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn test_aborted_asset_does_not_block_others() {
    init_tracing();
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let outcome = batch(log, fixed(9.0))
        .run(vec![request(9), request(1)])
        .await;

    assert_eq!(outcome.assets.len(), 2);
    assert_eq!(outcome.asset(9).unwrap().status(), AssetStatus::Aborted);
    assert_eq!(outcome.asset(1).unwrap().status(), AssetStatus::Accepted);
    assert_eq!(outcome.clips().len(), 1);
    assert_eq!(outcome.metrics.failures.len(), 1);
    assert!(outcome.metrics.failures[0].starts_with("scene 9:"));
}

struct StaticProbe(ClipMetrics);

#[async_trait]
impl ClipProbe for StaticProbe {
    async fn probe(&self, _clip: &VideoClip) -> Result<ClipMetrics> {
        Ok(self.0)
    }
}

#[tokio::test]
async fn test_probe_backed_technical_validator() {
    init_tracing();
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let shaky = TechnicalValidator::new(StaticProbe(ClipMetrics {
        duration: 8.0,
        motion_quality: 0.4,
        visual_clarity: 0.9,
    }));
    let outcome = batch(log, shaky).run(vec![request(1)]).await;

    let asset = outcome.asset(1).unwrap();
    let first = &asset.history()[0];
    assert_eq!(first.critique.issues_with(Severity::Major).count(), 2);
    assert!(first
        .critique
        .issues
        .iter()
        .all(|i| i.dimension == Some(Dimension::Technical)));
    assert!(first
        .critique
        .suggestions
        .contains(&"Reduce camera and character motion".to_string()));
}
