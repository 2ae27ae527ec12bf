//! The generate, critique, decide, refine loop.

use std::{fmt, sync::Arc, time::Instant};

use serde::Serialize;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::{
    cancellation::CancellationToken,
    config::{LoopConfig, RuleBook},
    critique::{Score, ScoreCard},
    error::{LoopError, Result},
    metrics::RunMetrics,
    policy::{Decision, DecisionPolicy, Verdict},
    provider::{Critic, Generator, ModelRefiner},
    refiner::PromptRefiner,
    stage::Stage,
    state::{IterationRecord, RefinementState},
};

/// Result of a run, or the failure that aborted it.
pub type RunOutcome<S> = std::result::Result<RunResult<S>, RunFailure<S>>;

/// Drives one stage's refinement loop against shared providers.
///
/// Each call to [`run`](Self::run) owns fresh state, so one controller can serve many
/// concurrent runs.
pub struct RefinementController<S: Stage> {
    generator: Arc<dyn Generator<S>>,
    critic: Arc<dyn Critic<S>>,
    refiner: PromptRefiner<S>,
    config: LoopConfig,
    cancellation: Option<CancellationToken>,
}

impl<S: Stage> RefinementController<S> {
    pub fn builder() -> RefinementControllerBuilder<S> {
        RefinementControllerBuilder::new()
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run the loop with the controller's configuration.
    pub async fn run(&self, request: S::Request) -> RunOutcome<S> {
        self.run_with(request, &self.config).await
    }

    /// Run the loop with a per-call configuration.
    pub async fn run_with(&self, request: S::Request, config: &LoopConfig) -> RunOutcome<S> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();

        let policy = match DecisionPolicy::from_config(config) {
            Ok(policy) => policy,
            Err(err) => {
                let state = RefinementState::new(0);
                return Err(RunFailure::from_state(err, state, RunMetrics::default(), run_id));
            }
        };

        self.drive(run_id, request, config, policy, started).await
    }

    #[instrument(skip_all, fields(stage = S::NAME, run_id = %run_id))]
    async fn drive(
        &self,
        run_id: Uuid,
        request: S::Request,
        config: &LoopConfig,
        policy: DecisionPolicy,
        started: Instant,
    ) -> RunOutcome<S> {
        let mut state = RefinementState::<S>::new(policy.max_iterations);
        let mut metrics = RunMetrics::default();
        let mut current = request;

        debug!(
            max_iterations = policy.max_iterations,
            threshold = %policy.quality_threshold,
            model_refiner = self.refiner.has_model(),
            "Starting refinement run"
        );

        let verdict = loop {
            if self.is_cancelled() {
                let err = LoopError::Cancelled {
                    stage: S::NAME.to_string(),
                    completed: state.iteration_count(),
                };
                return Err(self.abort(err, state, metrics, run_id, started));
            }

            if state.iteration_count() > 0 && config.call_spacing_ms > 0 {
                sleep(Duration::from_millis(config.call_spacing_ms)).await;
            }

            let iteration = state.iteration_count() + 1;

            metrics.record_generate();
            let generated = self
                .generator
                .generate(&current)
                .await
                .and_then(|candidate| S::check(&current, &candidate).map(|_| candidate));
            let candidate = match generated {
                Ok(candidate) => candidate,
                Err(err) => {
                    let err = LoopError::generation(S::NAME, err);
                    return Err(self.abort(err, state, metrics, run_id, started));
                }
            };

            metrics.record_critique();
            let critique = match self.critic.critique(&candidate, &current).await {
                Ok(critique) => critique,
                Err(err) => {
                    let err = LoopError::critique(S::NAME, err);
                    return Err(self.abort(err, state, metrics, run_id, started));
                }
            };

            debug!(
                iteration,
                overall = %critique.overall(),
                critical = critique.has_critical(),
                "Critique received"
            );

            // Critical defects in the newest candidate force a retry. The best score decides.
            let latest_critical = critique.has_critical();
            if state.record(current.clone(), candidate, critique) {
                info!(iteration, best = %best_overall(&state), "New best candidate");
            }

            let hard_fail = config.retry_on_critical && latest_critical;
            let verdict = policy.decide(best_overall(&state), state.iteration_count(), hard_fail);

            if verdict.is_terminal() {
                info!(
                    decision = ?verdict.decision,
                    rationale = ?verdict.rationale,
                    iterations = verdict.iteration_count,
                    "Run finished"
                );
                break verdict;
            }

            debug!(iteration, rationale = ?verdict.rationale, "Refining request");
            let refinement = match state.latest() {
                Some(latest) => {
                    self.refiner
                        .refine(
                            &current,
                            &latest.candidate,
                            &latest.critique,
                            state.iteration_count() - 1,
                        )
                        .await
                }
                None => break verdict,
            };

            metrics.record_refinement(&refinement.revision.provenance);
            state.annotate_latest(refinement.revision);
            current = refinement.request;
        };

        metrics.elapsed = started.elapsed();
        let (history, best) = state.into_parts();
        match best {
            Some(best) => Ok(RunResult {
                run_id,
                history,
                best,
                verdict,
                metrics,
            }),
            None => {
                let err = LoopError::Context(format!("{} run produced no candidate", S::NAME));
                error!(error = %err, "Run aborted");
                Err(RunFailure {
                    error: err,
                    history,
                    best: None,
                    metrics,
                    run_id,
                })
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    fn abort(
        &self,
        err: LoopError,
        state: RefinementState<S>,
        mut metrics: RunMetrics,
        run_id: Uuid,
        started: Instant,
    ) -> RunFailure<S> {
        metrics.elapsed = started.elapsed();
        error!(
            error = %err,
            completed = state.iteration_count(),
            "Run aborted"
        );
        RunFailure::from_state(err, state, metrics, run_id)
    }
}

fn best_overall<S: Stage>(state: &RefinementState<S>) -> Score {
    state.best().map_or(Score::MIN, IterationRecord::overall)
}

/// Builder for [`RefinementController`].
pub struct RefinementControllerBuilder<S: Stage> {
    generator: Option<Arc<dyn Generator<S>>>,
    critic: Option<Arc<dyn Critic<S>>>,
    model_refiner: Option<Arc<dyn ModelRefiner<S>>>,
    rules: RuleBook,
    config: LoopConfig,
    cancellation: Option<CancellationToken>,
}

impl<S: Stage> Default for RefinementControllerBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Stage> RefinementControllerBuilder<S> {
    pub fn new() -> Self {
        Self {
            generator: None,
            critic: None,
            model_refiner: None,
            rules: RuleBook::default(),
            config: LoopConfig::default(),
            cancellation: None,
        }
    }

    pub fn with_generator(self, generator: impl Generator<S> + 'static) -> Self {
        self.with_shared_generator(Arc::new(generator))
    }

    pub fn with_shared_generator(mut self, generator: Arc<dyn Generator<S>>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_critic(self, critic: impl Critic<S> + 'static) -> Self {
        self.with_shared_critic(Arc::new(critic))
    }

    pub fn with_shared_critic(mut self, critic: Arc<dyn Critic<S>>) -> Self {
        self.critic = Some(critic);
        self
    }

    /// Enable the model-assisted refinement path ahead of the rules.
    pub fn with_model_refiner(self, refiner: impl ModelRefiner<S> + 'static) -> Self {
        self.with_shared_model_refiner(Arc::new(refiner))
    }

    pub fn with_shared_model_refiner(mut self, refiner: Arc<dyn ModelRefiner<S>>) -> Self {
        self.model_refiner = Some(refiner);
        self
    }

    pub fn with_rules(mut self, rules: RuleBook) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn build(self) -> Result<RefinementController<S>> {
        self.config.validate()?;
        let generator = self.generator.ok_or_else(|| {
            LoopError::Config(format!("{} controller requires a generator", S::NAME))
        })?;
        let critic = self.critic.ok_or_else(|| {
            LoopError::Config(format!("{} controller requires a critic", S::NAME))
        })?;

        let mut refiner = PromptRefiner::rules_only(self.rules);
        if let Some(model) = self.model_refiner {
            refiner = refiner.with_model(model);
        }

        Ok(RefinementController {
            generator,
            critic,
            refiner,
            config: self.config,
            cancellation: self.cancellation,
        })
    }
}

/// A completed run: the best candidate, the full history and the final decision.
#[derive(Debug, Serialize)]
#[serde(bound = "")]
pub struct RunResult<S: Stage> {
    pub run_id: Uuid,
    history: Vec<IterationRecord<S>>,
    best: usize,
    pub verdict: Verdict,
    pub metrics: RunMetrics,
}

impl<S: Stage> RunResult<S> {
    pub fn best(&self) -> &IterationRecord<S> {
        &self.history[self.best]
    }

    pub fn best_candidate(&self) -> &S::Candidate {
        &self.best().candidate
    }

    pub fn best_score(&self) -> Score {
        self.best().overall()
    }

    /// Consume the result, keeping only the best candidate.
    pub fn into_best(mut self) -> S::Candidate {
        self.history.swap_remove(self.best).candidate
    }

    pub fn history(&self) -> &[IterationRecord<S>] {
        &self.history
    }

    pub fn iterations(&self) -> usize {
        self.history.len()
    }

    pub fn final_decision(&self) -> Decision {
        self.verdict.decision
    }

    pub fn is_accepted(&self) -> bool {
        self.verdict.decision == Decision::Accept
    }

    pub fn is_failed(&self) -> bool {
        self.verdict.decision == Decision::Fail
    }

    /// Human-readable account of every cycle and the final decision.
    pub fn critique_summary(&self) -> String {
        let mut lines = vec![format!(
            "{} run {}: {:?} ({:?}) after {}/{} iterations",
            S::NAME,
            self.run_id,
            self.verdict.decision,
            self.verdict.rationale,
            self.verdict.iteration_count,
            self.verdict.max_iterations,
        )];

        for record in &self.history {
            let dims = record
                .critique
                .scores()
                .dimensions()
                .into_iter()
                .map(|(d, s)| format!("{d} {s}"))
                .collect::<Vec<_>>()
                .join(", ");
            let marker = if record.iteration == self.best + 1 { " *" } else { "" };
            let mut line = format!(
                "  #{} overall {} [{dims}]{marker}",
                record.iteration,
                record.overall()
            );
            let critical = record
                .critique
                .issues_with(crate::critique::Severity::Critical)
                .count();
            if critical > 0 {
                line.push_str(&format!(" critical issues: {critical}"));
            }
            if let Some(revision) = &record.revision {
                line.push_str(&format!(" -> refined via {:?}", revision.provenance));
            }
            lines.push(line);
        }

        let best = self.best();
        if !best.critique.weaknesses.is_empty() {
            lines.push(format!("  weaknesses: {}", best.critique.weaknesses.join("; ")));
        }
        lines.join("\n")
    }
}

/// A run aborted by a provider error, cancellation or invalid configuration.
///
/// The partial history and the best candidate seen so far stay available.
#[derive(Debug)]
pub struct RunFailure<S: Stage> {
    pub error: LoopError,
    history: Vec<IterationRecord<S>>,
    best: Option<usize>,
    pub metrics: RunMetrics,
    pub run_id: Uuid,
}

impl<S: Stage> RunFailure<S> {
    fn from_state(
        error: LoopError,
        state: RefinementState<S>,
        metrics: RunMetrics,
        run_id: Uuid,
    ) -> Self {
        let (history, best) = state.into_parts();
        Self {
            error,
            history,
            best,
            metrics,
            run_id,
        }
    }

    pub fn best(&self) -> Option<&IterationRecord<S>> {
        self.best.map(|i| &self.history[i])
    }

    pub fn history(&self) -> &[IterationRecord<S>] {
        &self.history
    }

    pub fn into_error(self) -> LoopError {
        self.error
    }
}

impl<S: Stage> fmt::Display for RunFailure<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} run {} aborted after {} iterations: {}",
            S::NAME,
            self.run_id,
            self.history.len(),
            self.error
        )
    }
}

impl<S: Stage> std::error::Error for RunFailure<S> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
