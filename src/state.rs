use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    critique::{CritiqueResult, Score},
    refiner::Revision,
    stage::Stage,
};

/// One completed generate/critique cycle.
#[derive(Debug, Serialize)]
#[serde(bound = "")]
pub struct IterationRecord<S: Stage> {
    /// 1-based cycle number.
    pub iteration: usize,
    pub request: S::Request,
    pub candidate: S::Candidate,
    pub critique: CritiqueResult<S::Scores>,
    /// How the request for the next cycle was produced, if there was one.
    pub revision: Option<Revision>,
    pub timestamp: DateTime<Utc>,
}

impl<S: Stage> IterationRecord<S> {
    pub fn overall(&self) -> Score {
        self.critique.overall()
    }
}

/// Per-run state owned by the controller.
///
/// History is append-only. The best candidate is tracked incrementally as an index into it.
#[derive(Debug)]
pub struct RefinementState<S: Stage> {
    history: Vec<IterationRecord<S>>,
    best: Option<usize>,
}

impl<S: Stage> RefinementState<S> {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            history: Vec::with_capacity(max_iterations),
            best: None,
        }
    }

    pub fn iteration_count(&self) -> usize {
        self.history.len()
    }

    /// Append a cycle. Returns true when it became the new best.
    pub fn record(
        &mut self,
        request: S::Request,
        candidate: S::Candidate,
        critique: CritiqueResult<S::Scores>,
    ) -> bool {
        let record = IterationRecord {
            iteration: self.history.len() + 1,
            request,
            candidate,
            critique,
            revision: None,
            timestamp: Utc::now(),
        };

        // Strictly higher only, so ties keep the first-seen candidate.
        let improved = match self.best() {
            None => true,
            Some(best) => record.overall() > best.overall(),
        };

        self.history.push(record);
        if improved {
            self.best = Some(self.history.len() - 1);
        }
        improved
    }

    /// Attach the refinement that produced the next request to the latest record.
    pub fn annotate_latest(&mut self, revision: Revision) {
        if let Some(last) = self.history.last_mut() {
            last.revision = Some(revision);
        }
    }

    pub fn best(&self) -> Option<&IterationRecord<S>> {
        self.best.map(|i| &self.history[i])
    }

    pub fn latest(&self) -> Option<&IterationRecord<S>> {
        self.history.last()
    }

    pub fn history(&self) -> &[IterationRecord<S>] {
        &self.history
    }

    pub fn into_parts(self) -> (Vec<IterationRecord<S>>, Option<usize>) {
        (self.history, self.best)
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;
    use crate::critique::{Dimension, Issue, ScoreCard};

    #[derive(Debug, Clone, Serialize)]
    struct Single(Score);

    impl ScoreCard for Single {
        fn dimensions(&self) -> Vec<(Dimension, Score)> {
            vec![(Dimension::Story, self.0)]
        }

        fn overall(&self) -> Score {
            self.0
        }
    }

    #[derive(Debug, Clone)]
    struct Toy;

    impl Stage for Toy {
        type Request = String;
        type Candidate = String;
        type Scores = Single;
        const NAME: &'static str = "toy";

        fn prompt_of(request: &String) -> String {
            request.clone()
        }

        fn revise(_: &String, _: &String, prompt: String) -> String {
            prompt
        }
    }

    fn critique(v: f64) -> CritiqueResult<Single> {
        CritiqueResult::new(Single(Score::new(v).unwrap()))
    }

    #[test]
    fn test_best_only_moves_on_strict_improvement() {
        let mut state = RefinementState::<Toy>::new(4);
        assert!(state.record("r".into(), "a".into(), critique(6.0)));
        assert!(!state.record("r".into(), "b".into(), critique(6.0)));
        assert!(!state.record("r".into(), "c".into(), critique(5.0)));
        assert!(state.record("r".into(), "d".into(), critique(7.0)));

        assert_eq!(state.best().unwrap().candidate, "d");
        assert_eq!(state.iteration_count(), 4);
        let iterations: Vec<usize> = state.history().iter().map(|r| r.iteration).collect();
        assert_eq!(iterations, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_tie_keeps_first() {
        let mut state = RefinementState::<Toy>::new(2);
        state.record("r".into(), "first".into(), critique(8.0));
        state.record("r".into(), "second".into(), critique(8.0));
        assert_eq!(state.best().unwrap().candidate, "first");
        assert_eq!(state.into_parts().1, Some(0));
    }

    #[test]
    fn test_clean_retry_below_critical_best_does_not_replace_it() {
        let mut state = RefinementState::<Toy>::new(3);
        state.record(
            "r".into(),
            "broken".into(),
            critique(9.0).with_issue(Issue::critical("extra limb")),
        );
        assert!(!state.record("r".into(), "clean".into(), critique(7.0)));
        assert_eq!(state.best().unwrap().candidate, "broken");
        assert!(!state.latest().unwrap().critique.has_critical());
    }
}
