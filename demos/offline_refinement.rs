//! Idea refinement with closure providers. Runs without an API key.

use gemini_critique_loop::idea::{Character, Sex, Voice};
use gemini_critique_loop::prelude::*;
use gemini_critique_loop::StoryScores;

fn draft(request: &IdeaRequest) -> Result<StoryStructure> {
    let plot = match &request.guidance {
        Some(guidance) if guidance.contains("ADDRESS") => {
            "The keeper's lantern fails on the night a trawler drifts toward the reef."
        }
        _ => "A keeper tends the light and talks to the wind.",
    };
    Ok(StoryStructure {
        characters: vec![Character {
            name: "Ines".to_string(),
            sex: Sex::Female,
            voice: Voice::Low,
            description: "Weathered oilskin coat, grey braid".to_string(),
        }],
        setting: "A lighthouse on a basalt reef".to_string(),
        plot: plot.to_string(),
    })
}

fn review(story: &StoryStructure, _request: &IdeaRequest) -> Result<CritiqueResult<StoryScores>> {
    if story.plot.contains("trawler") {
        return Ok(CritiqueResult::new(StoryScores::new(Score::new(8.4)?))
            .with_strengths(vec!["Concrete stakes".to_string()]));
    }
    Ok(CritiqueResult::new(StoryScores::new(Score::new(6.1)?))
        .with_weaknesses(vec!["Nothing is at risk".to_string()])
        .with_suggestions(vec!["Put a ship in danger".to_string()]))
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let controller = RefinementController::<IdeaStage>::builder()
        .with_generator(FnGenerator(draft))
        .with_critic(FnCritic(review))
        .with_config(LoopConfig::idea())
        .build()?;

    let result = controller
        .run(IdeaRequest::new("A lighthouse keeper befriends a storm", "Studio Ghibli"))
        .await?;

    println!("{}", result.critique_summary());
    println!();
    println!("{}", result.best_candidate());
    println!("Metrics: {:?}", result.metrics);
    Ok(())
}
