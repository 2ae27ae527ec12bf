//! Story structure refinement: an idea becomes characters, a setting and a plot.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    critique::{Dimension, Score, ScoreCard},
    error::{LoopError, Result},
    stage::Stage,
};

/// At most this many characters per story.
pub const MAX_CHARACTERS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Sex {
    Female,
    Male,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Voice {
    #[serde(rename = "High-pitched")]
    HighPitched,
    Low,
    Deep,
    Squeaky,
    Booming,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Character {
    pub name: String,
    pub sex: Sex,
    pub voice: Voice,
    /// Visual description used for reference images.
    pub description: String,
}

/// Candidate of the idea stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StoryStructure {
    pub characters: Vec<Character>,
    pub setting: String,
    pub plot: String,
}

impl StoryStructure {
    /// Logic violations that make the story unusable downstream.
    pub fn violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        if self.characters.is_empty() {
            violations.push("story has no characters".to_string());
        }
        if self.characters.len() > MAX_CHARACTERS {
            violations.push(format!(
                "story has {} characters, at most {MAX_CHARACTERS} allowed",
                self.characters.len()
            ));
        }
        if self.plot.trim().is_empty() {
            violations.push("plot is empty".to_string());
        }
        if self.setting.trim().is_empty() {
            violations.push("setting is empty".to_string());
        }
        violations
    }

    pub fn validate(&self) -> Result<()> {
        let violations = self.violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(LoopError::Validation(violations.join("; ")))
        }
    }
}

impl fmt::Display for StoryStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Setting: {}", self.setting)?;
        for c in &self.characters {
            writeln!(f, "- {} ({:?}, {:?} voice): {}", c.name, c.sex, c.voice, c.description)?;
        }
        write!(f, "Plot: {}", self.plot)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdeaRequest {
    pub idea: String,
    pub style: String,
    /// The story being refined, absent on the first cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<StoryStructure>,
    /// Refinement instructions accumulated across cycles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}

impl IdeaRequest {
    pub fn new(idea: impl Into<String>, style: impl Into<String>) -> Self {
        Self {
            idea: idea.into(),
            style: style.into(),
            draft: None,
            guidance: None,
        }
    }
}

/// The idea critic scores a story holistically.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StoryScores {
    pub story: Score,
}

impl StoryScores {
    pub fn new(story: Score) -> Self {
        Self { story }
    }
}

impl ScoreCard for StoryScores {
    fn dimensions(&self) -> Vec<(Dimension, Score)> {
        vec![(Dimension::Story, self.story)]
    }

    fn overall(&self) -> Score {
        self.story
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IdeaStage;

impl Stage for IdeaStage {
    type Request = IdeaRequest;
    type Candidate = StoryStructure;
    type Scores = StoryScores;

    const NAME: &'static str = "idea";

    fn prompt_of(request: &IdeaRequest) -> String {
        request
            .guidance
            .clone()
            .unwrap_or_else(|| request.idea.clone())
    }

    fn revise(request: &IdeaRequest, latest: &StoryStructure, prompt: String) -> IdeaRequest {
        IdeaRequest {
            draft: Some(latest.clone()),
            guidance: Some(prompt),
            ..request.clone()
        }
    }

    fn check(_: &IdeaRequest, candidate: &StoryStructure) -> Result<()> {
        candidate.validate()
    }
}
