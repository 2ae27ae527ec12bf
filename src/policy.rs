//! Termination policy for the refinement loop.
//!
//! The policy is a pure function of the current best score, how many cycles have run, the
//! budget and the thresholds. It never touches providers or run state.

use std::fmt;

use serde::Serialize;

use crate::{config::LoopConfig, critique::Score, error::Result};

/// Outcome of consulting the policy after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    /// Run another cycle. For video assets this is a retry.
    Continue,
    Fail,
}

/// Why the policy reached its decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rationale {
    MetThreshold,
    /// Budget exhausted but the fallback bar was met.
    SettledAtFallback,
    /// A critical defect forces another cycle regardless of score.
    CriticalDefect,
    BelowThreshold,
    BudgetExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Verdict {
    pub decision: Decision,
    pub rationale: Rationale,
    pub overall: Score,
    pub iteration_count: usize,
    pub max_iterations: usize,
}

impl Verdict {
    pub fn is_terminal(&self) -> bool {
        self.decision != Decision::Continue
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} ({:?}) at {} after {}/{} iterations",
            self.decision, self.rationale, self.overall, self.iteration_count, self.max_iterations
        )
    }
}

/// Thresholds and budget for one run, validated once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionPolicy {
    pub quality_threshold: Score,
    pub fallback_acceptable_threshold: Option<Score>,
    pub max_iterations: usize,
}

impl DecisionPolicy {
    pub fn from_config(config: &LoopConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            quality_threshold: config.threshold()?,
            fallback_acceptable_threshold: config.fallback()?,
            max_iterations: config.max_iterations,
        })
    }

    pub fn decide(&self, overall: Score, iteration_count: usize, hard_fail: bool) -> Verdict {
        decide(
            overall,
            iteration_count,
            self.max_iterations,
            self.quality_threshold,
            self.fallback_acceptable_threshold,
            hard_fail,
        )
    }
}

/// Decide whether to accept, continue or fail.
///
/// A hard failure is checked first while budget remains, so a critical defect forces another
/// cycle even for a candidate that clears the threshold. Once the budget is spent the
/// candidate is judged on its score alone: the quality threshold, then the fallback bar.
pub fn decide(
    overall: Score,
    iteration_count: usize,
    max_iterations: usize,
    quality_threshold: Score,
    fallback_acceptable_threshold: Option<Score>,
    hard_fail: bool,
) -> Verdict {
    let exhausted = iteration_count >= max_iterations;

    let (decision, rationale) = if hard_fail && !exhausted {
        (Decision::Continue, Rationale::CriticalDefect)
    } else if overall >= quality_threshold {
        (Decision::Accept, Rationale::MetThreshold)
    } else if exhausted {
        match fallback_acceptable_threshold {
            Some(fallback) if overall >= fallback => {
                (Decision::Accept, Rationale::SettledAtFallback)
            }
            _ => (Decision::Fail, Rationale::BudgetExhausted),
        }
    } else {
        (Decision::Continue, Rationale::BelowThreshold)
    };

    Verdict {
        decision,
        rationale,
        overall,
        iteration_count,
        max_iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: f64) -> Score {
        Score::new(v).unwrap()
    }

    #[test]
    fn test_accepts_at_threshold() {
        let v = decide(s(8.0), 1, 3, s(8.0), None, false);
        assert_eq!(v.decision, Decision::Accept);
        assert_eq!(v.rationale, Rationale::MetThreshold);
    }

    #[test]
    fn test_continues_below_threshold_with_budget() {
        let v = decide(s(7.9), 1, 3, s(8.0), Some(s(6.5)), false);
        assert_eq!(v.decision, Decision::Continue);
        assert!(!v.is_terminal());
    }

    #[test]
    fn test_exhaustion_uses_fallback() {
        let v = decide(s(7.0), 2, 2, s(8.0), Some(s(6.5)), false);
        assert_eq!(v.decision, Decision::Accept);
        assert_eq!(v.rationale, Rationale::SettledAtFallback);

        let v = decide(s(4.0), 2, 2, s(8.0), Some(s(6.5)), false);
        assert_eq!(v.decision, Decision::Fail);

        let v = decide(s(7.0), 2, 2, s(8.0), None, false);
        assert_eq!(v.decision, Decision::Fail);
        assert_eq!(v.rationale, Rationale::BudgetExhausted);
    }

    #[test]
    fn test_hard_fail_overrides_high_score_while_budget_remains() {
        let v = decide(s(9.0), 1, 3, s(8.0), Some(s(6.5)), true);
        assert_eq!(v.decision, Decision::Continue);
        assert_eq!(v.rationale, Rationale::CriticalDefect);

        let v = decide(s(9.0), 3, 3, s(8.0), Some(s(6.5)), true);
        assert_eq!(v.decision, Decision::Accept);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = DecisionPolicy::from_config(&LoopConfig::video()).unwrap();
        assert_eq!(policy.max_iterations, 3);
        assert_eq!(policy.fallback_acceptable_threshold, Some(s(6.5)));
        let zero = LoopConfig::default().with_max_iterations(0);
        assert!(DecisionPolicy::from_config(&zero).is_err());
    }
}
