//! Per-asset video validation with retries. Runs without an API key.

use gemini_critique_loop::prelude::*;
use gemini_critique_loop::video::{FnValidator, RetryBudget};

fn render(request: &VideoRequest) -> Result<VideoClip> {
    let take = if request.prompt.contains("AVOID:") { 2 } else { 1 };
    Ok(VideoClip::new(
        request.scene_number,
        format!("renders/scene-{}-take-{take}.mp4", request.scene_number),
        request.expected_duration,
    ))
}

fn anatomy(clip: &VideoClip, request: &VideoRequest) -> Result<ValidatorReport> {
    if clip.scene_number == 2 && !request.prompt.contains("AVOID:") {
        return Ok(ValidatorReport::new(Score::new(4.5)?)
            .with_issue(Issue::critical("Hand shows six fingers"))
            .with_suggestion("Keep hands out of frame"));
    }
    Ok(ValidatorReport::new(Score::new(9.0)?))
}

fn consistency(_clip: &VideoClip, _request: &VideoRequest) -> Result<ValidatorReport> {
    Ok(ValidatorReport::new(Score::new(8.8)?))
}

struct RenderProbe;

#[async_trait::async_trait]
impl ClipProbe for RenderProbe {
    async fn probe(&self, clip: &VideoClip) -> Result<ClipMetrics> {
        Ok(ClipMetrics {
            duration: clip.duration,
            motion_quality: 0.85,
            visual_clarity: 0.9,
        })
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let panel = ValidatorPanel::new(
        FnValidator(anatomy),
        FnValidator(consistency),
        TechnicalValidator::new(RenderProbe),
    );
    let controller = RefinementController::<VideoStage>::builder()
        .with_generator(FnGenerator(render))
        .with_critic(panel)
        .with_config(RetryBudget::default().loop_config(8.0))
        .build()?;

    let requests = (1..=3)
        .map(|n| {
            VideoRequest::new(n, format!("Scene {n}: the keeper climbs the stairs"), 6.0)
                .with_reference_image("refs/ines.png")
        })
        .collect();

    let outcome = VideoBatch::new(controller)
        .with_concurrency(2)
        .run(requests)
        .await;

    for asset in &outcome.assets {
        println!(
            "scene {}: {:?} after {} attempt(s), kept {:?}",
            asset.scene_number,
            asset.status(),
            asset.attempts(),
            asset.clip().map(|c| c.uri.as_str())
        );
    }
    println!();
    print!("{}", outcome.report());
    Ok(())
}
