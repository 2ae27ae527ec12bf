//! Generate, critique and refine loops for staged narrative video generation.
//!
//! A [`RefinementController`] repeatedly asks a generator for a candidate, has a critic score
//! it, consults the [`DecisionPolicy`](policy::DecisionPolicy) and, while the budget lasts,
//! rewrites the request through a model-assisted refiner with a deterministic fallback. The
//! best candidate is always returned together with the full history.
//!
//! Three stages ship with the crate: story ideas ([`IdeaStage`]), scene breakdowns
//! ([`SceneStage`]) and per-clip video validation ([`VideoStage`]).
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use gemini_critique_loop::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let json = GeminiJson::new(&GeminiSettings::from_env()?)?;
//!
//!     let controller = RefinementController::<IdeaStage>::builder()
//!         .with_generator(GeminiGenerator::with_json_prompt(
//!             json.clone(),
//!             "You write short stories.",
//!         ))
//!         .with_critic(GeminiCritic::<IdeaStage, IdeaCritiqueWire>::with_json_prompt(
//!             json.clone(),
//!             "You critique short stories.",
//!         ))
//!         .with_model_refiner(GeminiRefiner::new(json, "You refine prompts."))
//!         .with_config(LoopConfig::idea())
//!         .build()?;
//!
//!     let result = controller
//!         .run(IdeaRequest::new("A lighthouse keeper befriends a storm", "Studio Ghibli"))
//!         .await?;
//!     println!("{}", result.critique_summary());
//!     println!("{}", result.best_candidate());
//!     Ok(())
//! }
//! ```

pub mod cancellation;
pub mod config;
pub mod controller;
pub mod critique;
pub mod error;
pub mod gemini;
pub mod idea;
pub mod metrics;
pub mod policy;
pub mod provider;
pub mod refiner;
pub mod scene;
pub mod stage;
pub mod state;
pub mod video;

pub use cancellation::CancellationToken;
pub use config::{DimensionRule, GeminiSettings, LoopConfig, RuleBook};
pub use controller::{
    RefinementController, RefinementControllerBuilder, RunFailure, RunOutcome, RunResult,
};
pub use critique::{CritiqueResult, Dimension, Issue, Score, ScoreCard, Severity};
pub use error::{LoopError, Result, ResultExt};
pub use gemini::{GeminiCritic, GeminiGenerator, GeminiJson, GeminiRefiner};
pub use idea::{IdeaRequest, IdeaStage, StoryScores, StoryStructure};
pub use metrics::{BatchMetrics, RunMetrics};
pub use policy::{decide, Decision, DecisionPolicy, Rationale, Verdict};
pub use provider::{
    Critic, FnCritic, FnGenerator, FnModelRefiner, Generator, ModelRefiner, ModelRevision,
};
pub use refiner::{FeedbackContext, PromptRefiner, Provenance, Revision, RuleBasedRefiner};
pub use scene::{SceneBatch, SceneRequest, SceneScores, SceneStage};
pub use stage::Stage;
pub use state::{IterationRecord, RefinementState};
pub use video::{
    decide_video, BatchOutcome, QualityReport, RetryBudget, ValidatorPanel, VideoBatch,
    VideoClip, VideoRequest, VideoScores, VideoStage,
};

/// Prelude module for convenient imports.
///
/// ```rust
/// use gemini_critique_loop::prelude::*;
/// ```
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{GeminiSettings, LoopConfig, RuleBook};
    pub use crate::controller::{RefinementController, RunFailure, RunOutcome, RunResult};
    pub use crate::critique::{CritiqueResult, Dimension, Issue, Score, ScoreCard, Severity};
    pub use crate::error::{LoopError, Result, ResultExt};
    pub use crate::gemini::{
        GeminiCritic, GeminiGenerator, GeminiJson, GeminiRefiner, IdeaCritiqueWire,
        SceneCritiqueWire,
    };
    pub use crate::idea::{IdeaRequest, IdeaStage, StoryStructure};
    pub use crate::policy::{Decision, Rationale};
    pub use crate::provider::{
        Critic, FnCritic, FnGenerator, FnModelRefiner, Generator, ModelRevision,
    };
    pub use crate::refiner::{FeedbackContext, Provenance};
    pub use crate::scene::{SceneBatch, SceneRequest, SceneStage};
    pub use crate::stage::Stage;
    pub use crate::video::{
        ClipMetrics, ClipProbe, TechnicalValidator, Validator, ValidatorPanel, ValidatorReport,
        VideoBatch, VideoClip, VideoRequest, VideoStage,
    };

    // Re-export commonly used external types
    pub use gemini_rust::Model;
    pub use schemars::JsonSchema;
    pub use serde::{Deserialize, Serialize};
}
