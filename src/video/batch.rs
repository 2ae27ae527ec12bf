use std::{sync::Arc, time::Instant};

use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::{
    controller::{RefinementController, RunOutcome},
    metrics::BatchMetrics,
    policy::Decision,
    state::IterationRecord,
};

use super::{QualityReport, RetryBudget, VideoClip, VideoRequest, VideoStage};

/// Final state of one asset's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetStatus {
    Accepted,
    /// Budget spent below every bar. The best clip is still kept.
    Failed,
    /// A provider error or cancellation stopped the run.
    Aborted,
}

#[derive(Debug)]
pub struct AssetOutcome {
    pub scene_number: usize,
    /// Index of the request in the submitted batch.
    pub position: usize,
    pub outcome: RunOutcome<VideoStage>,
    /// Retries spent on this asset.
    pub budget: RetryBudget,
}

impl AssetOutcome {
    pub fn status(&self) -> AssetStatus {
        match &self.outcome {
            Ok(run) if run.final_decision() == Decision::Accept => AssetStatus::Accepted,
            Ok(_) => AssetStatus::Failed,
            Err(_) => AssetStatus::Aborted,
        }
    }

    /// The clip kept for this asset. Superseded attempts only live in the history.
    pub fn clip(&self) -> Option<&VideoClip> {
        self.outcome.as_ref().ok().map(|run| run.best_candidate())
    }

    pub fn history(&self) -> &[IterationRecord<VideoStage>] {
        match &self.outcome {
            Ok(run) => run.history(),
            Err(failure) => failure.history(),
        }
    }

    pub fn attempts(&self) -> usize {
        self.history().len()
    }

    pub fn retries(&self) -> usize {
        self.budget.retry_count
    }

    /// True when a retry produced the clip that was kept.
    pub fn replaced(&self) -> bool {
        matches!(&self.outcome, Ok(run) if run.best().iteration > 1)
    }
}

/// Outcomes of every asset, ordered by scene number.
#[derive(Debug)]
pub struct BatchOutcome {
    pub assets: Vec<AssetOutcome>,
    pub metrics: BatchMetrics,
}

impl BatchOutcome {
    /// The ordered output collection: one kept clip per completed asset.
    pub fn clips(&self) -> Vec<&VideoClip> {
        self.assets.iter().filter_map(AssetOutcome::clip).collect()
    }

    pub fn asset(&self, scene_number: usize) -> Option<&AssetOutcome> {
        self.assets.iter().find(|a| a.scene_number == scene_number)
    }

    pub fn count(&self, status: AssetStatus) -> usize {
        self.assets.iter().filter(|a| a.status() == status).count()
    }

    pub fn report(&self) -> QualityReport {
        QualityReport::from_assets(&self.assets)
    }
}

/// Runs one video refinement loop per asset, concurrently up to a limit.
///
/// Runs share the controller's providers but nothing else. The ordered collection is
/// assembled only after every run has finished.
pub struct VideoBatch {
    controller: Arc<RefinementController<VideoStage>>,
    concurrency: usize,
}

impl VideoBatch {
    pub fn new(controller: RefinementController<VideoStage>) -> Self {
        Self::shared(Arc::new(controller))
    }

    pub fn shared(controller: Arc<RefinementController<VideoStage>>) -> Self {
        Self {
            controller,
            concurrency: 4,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[instrument(skip_all, fields(assets = requests.len(), concurrency = self.concurrency))]
    pub async fn run(&self, requests: Vec<VideoRequest>) -> BatchOutcome {
        let started = Instant::now();
        let max_retries = self.controller.config().max_retries();

        let mut assets = stream::iter(requests.into_iter().enumerate().map(
            |(position, request)| {
                let controller = self.controller.clone();
                async move {
                    let scene_number = request.scene_number;
                    let outcome = controller.run(request).await;
                    let mut asset = AssetOutcome {
                        scene_number,
                        position,
                        outcome,
                        budget: RetryBudget::new(max_retries),
                    };
                    asset.budget = asset.budget.with_attempts(asset.attempts());
                    asset
                }
            },
        ))
        .buffer_unordered(self.concurrency)
        .collect::<Vec<_>>()
        .await;

        assets.sort_by_key(|a| (a.scene_number, a.position));

        let mut metrics = BatchMetrics::default();
        for asset in &assets {
            match &asset.outcome {
                Ok(run) => {
                    metrics.absorb(&run.metrics);
                    debug!(
                        scene = asset.scene_number,
                        decision = ?run.final_decision(),
                        retries_left = asset.budget.remaining(),
                        "Asset run finished"
                    );
                }
                Err(failure) => {
                    metrics.absorb(&failure.metrics);
                    let scene = asset.scene_number;
                    if failure.error.is_provider_failure() {
                        warn!(scene, error = %failure.error, "Asset run aborted");
                    } else {
                        info!(scene, error = %failure.error, "Asset run stopped");
                    }
                    metrics.record_failure(format!("scene {scene}: {}", failure.error));
                }
            }
        }
        metrics.elapsed = started.elapsed();

        let outcome = BatchOutcome { assets, metrics };
        info!(
            accepted = outcome.count(AssetStatus::Accepted),
            failed = outcome.count(AssetStatus::Failed),
            aborted = outcome.count(AssetStatus::Aborted),
            "Video batch finished"
        );
        outcome
    }
}
