//! Scene breakdown refinement: a story becomes a numbered list of timed scenes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    critique::{Dimension, Score, ScoreCard},
    error::{LoopError, Result},
    idea::StoryStructure,
    stage::Stage,
};

pub const MAX_SCENES: usize = 12;
pub const MIN_SCENE_SECONDS: u32 = 5;
pub const MAX_SCENE_SECONDS: u32 = 8;

/// Request for a scene breakdown. Bounds are checked on construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneRequest {
    story: StoryStructure,
    number_of_scenes: usize,
    duration_per_scene: u32,
    style: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    draft: Option<SceneBatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    guidance: Option<String>,
}

impl SceneRequest {
    pub fn new(
        story: StoryStructure,
        number_of_scenes: usize,
        duration_per_scene: u32,
        style: impl Into<String>,
    ) -> Result<Self> {
        if !(1..=MAX_SCENES).contains(&number_of_scenes) {
            return Err(LoopError::Validation(format!(
                "number_of_scenes must be within 1-{MAX_SCENES}, got {number_of_scenes}"
            )));
        }
        if !(MIN_SCENE_SECONDS..=MAX_SCENE_SECONDS).contains(&duration_per_scene) {
            return Err(LoopError::Validation(format!(
                "duration_per_scene must be within {MIN_SCENE_SECONDS}-{MAX_SCENE_SECONDS}s, got {duration_per_scene}"
            )));
        }
        Ok(Self {
            story,
            number_of_scenes,
            duration_per_scene,
            style: style.into(),
            draft: None,
            guidance: None,
        })
    }

    pub fn story(&self) -> &StoryStructure {
        &self.story
    }

    pub fn number_of_scenes(&self) -> usize {
        self.number_of_scenes
    }

    pub fn duration_per_scene(&self) -> u32 {
        self.duration_per_scene
    }

    pub fn style(&self) -> &str {
        &self.style
    }

    pub fn draft(&self) -> Option<&SceneBatch> {
        self.draft.as_ref()
    }

    pub fn guidance(&self) -> Option<&str> {
        self.guidance.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DialogueLine {
    pub character: String,
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Scene {
    pub scene_number: usize,
    pub location: String,
    pub atmosphere: String,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub dialogue: Vec<DialogueLine>,
    #[serde(default)]
    pub key_actions: Vec<String>,
    pub key_visual_focus: String,
    pub sound_design: String,
    pub style: String,
}

/// Candidate of the scene stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SceneBatch {
    pub scenes: Vec<Scene>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl SceneBatch {
    /// Check the scene count and that scenes are numbered 1..n in order.
    pub fn validate(&self, expected: usize) -> Result<()> {
        if self.scenes.len() != expected {
            return Err(LoopError::Validation(format!(
                "expected {expected} scenes, got {}",
                self.scenes.len()
            )));
        }
        for (i, scene) in self.scenes.iter().enumerate() {
            if scene.scene_number != i + 1 {
                return Err(LoopError::Validation(format!(
                    "scene at position {} is numbered {}",
                    i + 1,
                    scene.scene_number
                )));
            }
        }
        Ok(())
    }

    /// Names used in scenes that do not belong to the story's cast.
    pub fn unknown_characters(&self, story: &StoryStructure) -> Vec<String> {
        let mut unknown: Vec<String> = Vec::new();
        for name in self.scenes.iter().flat_map(|s| &s.characters) {
            let known = story
                .characters
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(name));
            if !known && !unknown.contains(name) {
                unknown.push(name.clone());
            }
        }
        unknown
    }
}

/// Six weighted criteria scored by the scene critic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneScores {
    pub visual_coherence: Score,
    pub narrative_flow: Score,
    pub character_consistency: Score,
    pub pacing_quality: Score,
    pub technical_feasibility: Score,
    pub style_alignment: Score,
    /// Overall score as reported by the critic, preferred over the weighted sum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_overall: Option<Score>,
}

impl SceneScores {
    pub const WEIGHTS: [(Dimension, f64); 6] = [
        (Dimension::VisualCoherence, 0.20),
        (Dimension::NarrativeFlow, 0.20),
        (Dimension::CharacterConsistency, 0.15),
        (Dimension::PacingQuality, 0.20),
        (Dimension::TechnicalFeasibility, 0.15),
        (Dimension::StyleAlignment, 0.10),
    ];

    /// Weighted combination of the six criteria.
    pub fn weighted_overall(&self) -> Score {
        let dims = self.dimensions();
        let parts: Vec<(Score, f64)> = Self::WEIGHTS
            .iter()
            .zip(dims)
            .map(|((_, weight), (_, score))| (score, *weight))
            .collect();
        Score::weighted(&parts)
    }

    pub fn with_reported_overall(mut self, overall: Score) -> Self {
        self.reported_overall = Some(overall);
        self
    }
}

impl ScoreCard for SceneScores {
    fn dimensions(&self) -> Vec<(Dimension, Score)> {
        vec![
            (Dimension::VisualCoherence, self.visual_coherence),
            (Dimension::NarrativeFlow, self.narrative_flow),
            (Dimension::CharacterConsistency, self.character_consistency),
            (Dimension::PacingQuality, self.pacing_quality),
            (Dimension::TechnicalFeasibility, self.technical_feasibility),
            (Dimension::StyleAlignment, self.style_alignment),
        ]
    }

    fn overall(&self) -> Score {
        self.reported_overall
            .unwrap_or_else(|| self.weighted_overall())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SceneStage;

impl Stage for SceneStage {
    type Request = SceneRequest;
    type Candidate = SceneBatch;
    type Scores = SceneScores;

    const NAME: &'static str = "scene";

    fn prompt_of(request: &SceneRequest) -> String {
        request.guidance.clone().unwrap_or_else(|| {
            format!(
                "Break the story into {} scenes of {}s each in {} style.",
                request.number_of_scenes, request.duration_per_scene, request.style
            )
        })
    }

    fn revise(request: &SceneRequest, latest: &SceneBatch, prompt: String) -> SceneRequest {
        SceneRequest {
            draft: Some(latest.clone()),
            guidance: Some(prompt),
            ..request.clone()
        }
    }

    /// Scene count and numbering are hard errors. Characters outside the cast are only logged.
    fn check(request: &SceneRequest, candidate: &SceneBatch) -> Result<()> {
        candidate.validate(request.number_of_scenes)?;
        let unknown = candidate.unknown_characters(&request.story);
        if !unknown.is_empty() {
            warn!(characters = ?unknown, "Scenes use characters outside the story cast");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idea::{Character, Sex, Voice};

    fn story() -> StoryStructure {
        StoryStructure {
            characters: vec![Character {
                name: "Mira".into(),
                sex: Sex::Female,
                voice: Voice::Low,
                description: "tall, green coat".into(),
            }],
            setting: "Floating market".into(),
            plot: "Mira trades a memory for a map".into(),
        }
    }

    fn scene(n: usize, characters: &[&str]) -> Scene {
        Scene {
            scene_number: n,
            location: "Pier".into(),
            atmosphere: "Foggy dawn".into(),
            characters: characters.iter().map(|c| c.to_string()).collect(),
            dialogue: vec![],
            key_actions: vec!["Mira steps onto the boat".into()],
            key_visual_focus: "Lantern".into(),
            sound_design: "Water lapping".into(),
            style: "Watercolor".into(),
        }
    }

    fn s(v: f64) -> Score {
        Score::new(v).unwrap()
    }

    #[test]
    fn test_request_bounds() {
        assert!(SceneRequest::new(story(), 0, 6, "Watercolor").is_err());
        assert!(SceneRequest::new(story(), 13, 6, "Watercolor").is_err());
        assert!(SceneRequest::new(story(), 4, 4, "Watercolor").is_err());
        assert!(SceneRequest::new(story(), 4, 9, "Watercolor").is_err());
        let request = SceneRequest::new(story(), 12, 8, "Watercolor").unwrap();
        assert_eq!(request.number_of_scenes(), 12);
    }

    #[test]
    fn test_batch_numbering() {
        let batch = SceneBatch {
            scenes: vec![scene(1, &["Mira"]), scene(2, &["Mira"])],
            notes: None,
        };
        assert!(batch.validate(2).is_ok());
        assert!(batch.validate(3).is_err());

        let shuffled = SceneBatch {
            scenes: vec![scene(2, &[]), scene(1, &[])],
            notes: None,
        };
        assert!(shuffled.validate(2).is_err());
    }

    #[test]
    fn test_unknown_characters() {
        let batch = SceneBatch {
            scenes: vec![scene(1, &["mira", "Oskar"]), scene(2, &["Oskar"])],
            notes: None,
        };
        assert_eq!(batch.unknown_characters(&story()), vec!["Oskar".to_string()]);

        let request = SceneRequest::new(story(), 2, 6, "Watercolor").unwrap();
        assert!(SceneStage::check(&request, &batch).is_ok());
    }

    #[test]
    fn test_weighted_overall() {
        let scores = SceneScores {
            visual_coherence: s(10.0),
            narrative_flow: s(10.0),
            character_consistency: s(0.0),
            pacing_quality: s(10.0),
            technical_feasibility: s(0.0),
            style_alignment: s(10.0),
            reported_overall: None,
        };
        assert!((scores.overall().value() - 7.0).abs() < 1e-9);
        assert_eq!(scores.with_reported_overall(s(8.5)).overall(), s(8.5));
    }
}
