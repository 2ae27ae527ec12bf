//! Counters collected while a run executes.

use std::time::Duration;

use serde::Serialize;

use crate::refiner::Provenance;

/// Provider and refinement counts for one run.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RunMetrics {
    /// Generation provider calls, including failed ones.
    pub generate_calls: usize,
    /// Critique provider calls, including failed ones.
    pub critique_calls: usize,
    /// Refinements produced by the model path.
    pub model_refinements: usize,
    /// Refinements produced by the rule path, fallbacks included.
    pub rule_refinements: usize,
    /// Rule refinements that replaced a failed model call.
    pub fallback_refinements: usize,
    pub elapsed: Duration,
}

impl RunMetrics {
    pub fn record_generate(&mut self) {
        self.generate_calls += 1;
    }

    pub fn record_critique(&mut self) {
        self.critique_calls += 1;
    }

    pub fn record_refinement(&mut self, provenance: &Provenance) {
        match provenance {
            Provenance::Model => self.model_refinements += 1,
            Provenance::Rules => self.rule_refinements += 1,
            Provenance::RulesAfterModelFailure { .. } => {
                self.rule_refinements += 1;
                self.fallback_refinements += 1;
            }
        }
    }

    pub fn refine_calls(&self) -> usize {
        self.model_refinements + self.rule_refinements
    }
}

/// Metrics summed across the runs of a batch, collected after every run finished.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct BatchMetrics {
    pub runs: usize,
    pub generate_calls: usize,
    pub critique_calls: usize,
    pub model_refinements: usize,
    pub rule_refinements: usize,
    pub fallback_refinements: usize,
    /// Wall-clock time of the whole batch.
    pub elapsed: Duration,
    /// Messages of runs that aborted with an error.
    pub failures: Vec<String>,
}

impl BatchMetrics {
    pub fn absorb(&mut self, run: &RunMetrics) {
        self.runs += 1;
        self.generate_calls += run.generate_calls;
        self.critique_calls += run.critique_calls;
        self.model_refinements += run.model_refinements;
        self.rule_refinements += run.rule_refinements;
        self.fallback_refinements += run.fallback_refinements;
    }

    pub fn record_failure(&mut self, error: String) {
        self.failures.push(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_counts_as_rule_refinement() {
        let mut metrics = RunMetrics::default();
        metrics.record_refinement(&Provenance::Model);
        metrics.record_refinement(&Provenance::RulesAfterModelFailure {
            error: "timeout".into(),
        });
        assert_eq!(metrics.refine_calls(), 2);
        assert_eq!(metrics.fallback_refinements, 1);

        let mut batch = BatchMetrics::default();
        batch.absorb(&metrics);
        batch.absorb(&metrics);
        assert_eq!(batch.runs, 2);
        assert_eq!(batch.model_refinements, 2);
    }
}
