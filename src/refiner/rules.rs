use crate::{
    config::RuleBook,
    critique::{Aspect, CritiqueResult, ScoreCard},
    stage::Stage,
};

use super::context::weak_dimensions;

/// Most critic suggestions folded into a rule-based prompt.
const MAX_FOLDED_SUGGESTIONS: usize = 3;

/// Deterministic prompt rewriting driven by a [`RuleBook`]. Never fails.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedRefiner {
    book: RuleBook,
}

/// Output of the rule-based path.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleRevision {
    pub prompt: String,
    pub notes: Vec<String>,
}

impl RuleBasedRefiner {
    pub fn new(book: RuleBook) -> Self {
        Self { book }
    }

    pub fn book(&self) -> &RuleBook {
        &self.book
    }

    pub fn refine<S: Stage>(
        &self,
        request: &S::Request,
        critique: &CritiqueResult<S::Scores>,
    ) -> RuleRevision {
        self.compose(&S::prompt_of(request), critique)
    }

    /// Compose a prompt from the base text and the weak dimensions of `critique`.
    pub fn compose<C: ScoreCard>(&self, base: &str, critique: &CritiqueResult<C>) -> RuleRevision {
        let weak = weak_dimensions(critique.scores(), &self.book);
        let mut notes = Vec::new();
        let mut improvements: Vec<String> = Vec::new();
        let mut avoid: Vec<String> = Vec::new();

        let identity = weak.iter().any(|w| w.dimension.aspect() == Aspect::Identity);
        let complexity = weak.iter().any(|w| w.dimension.aspect() == Aspect::Complexity);

        for w in &weak {
            let Some(rule) = self.book.rule_for(w.dimension) else {
                continue;
            };
            if rule.avoid.is_empty() {
                continue;
            }
            for item in &rule.avoid {
                if !avoid.contains(item) {
                    avoid.push(item.clone());
                }
            }
            notes.push(format!("Added negative prompts for {}", w.dimension));
        }

        if identity {
            improvements.push("Exactly matching the reference character shown.".to_string());
            notes.push("Strengthened reference matching instruction".to_string());
        }

        if complexity {
            improvements.extend(self.book.simplification_clauses.iter().cloned());
            notes.push("Simplified motion complexity".to_string());
        }

        let mut parts: Vec<String> = Vec::new();
        if identity {
            parts.push(self.book.fidelity_clause.clone());
        }
        parts.push(base.to_string());
        if !improvements.is_empty() {
            parts.push(format!("\n{}", improvements.join(" ")));
        }

        let folded: Vec<&str> = critique
            .suggestions
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .take(MAX_FOLDED_SUGGESTIONS)
            .collect();
        if !folded.is_empty() {
            parts.push(format!("ADDRESS: {}", folded.join("; ")));
            notes.push(format!("Folded {} critic suggestions into prompt", folded.len()));
        }

        if !avoid.is_empty() {
            parts.push(format!("AVOID: {}", avoid.join(", ")));
            notes.push("Added negative prompt".to_string());
        }

        RuleRevision {
            prompt: parts.join("\n"),
            notes,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;
    use crate::critique::{Dimension, Score};

    #[derive(Debug, Clone, Serialize)]
    struct Clip {
        anatomy: Score,
        consistency: Score,
        technical: Score,
    }

    impl ScoreCard for Clip {
        fn dimensions(&self) -> Vec<(Dimension, Score)> {
            vec![
                (Dimension::Anatomy, self.anatomy),
                (Dimension::Consistency, self.consistency),
                (Dimension::Technical, self.technical),
            ]
        }

        fn overall(&self) -> Score {
            Score::weighted(&[
                (self.anatomy, 0.40),
                (self.consistency, 0.35),
                (self.technical, 0.25),
            ])
        }
    }

    fn critique(a: f64, c: f64, t: f64) -> CritiqueResult<Clip> {
        CritiqueResult::new(Clip {
            anatomy: Score::new(a).unwrap(),
            consistency: Score::new(c).unwrap(),
            technical: Score::new(t).unwrap(),
        })
    }

    #[test]
    fn test_clean_scores_leave_prompt_untouched() {
        let refiner = RuleBasedRefiner::default();
        let revision = refiner.compose("A cat on a roof.", &critique(9.0, 9.0, 9.0));
        assert_eq!(revision.prompt, "A cat on a roof.");
        assert!(revision.notes.is_empty());
    }

    #[test]
    fn test_all_rules_compose_in_order() {
        let refiner = RuleBasedRefiner::default();
        let revision = refiner.compose("A cat on a roof.", &critique(6.0, 6.0, 6.0));

        let lines: Vec<&str> = revision.prompt.lines().collect();
        assert_eq!(
            lines[0],
            "CHARACTER APPEARANCE: Exactly matching the provided reference images."
        );
        assert_eq!(lines[1], "A cat on a roof.");
        assert_eq!(lines[2], "");
        assert!(lines[3].starts_with("Exactly matching the reference character shown."));
        assert!(lines[3].contains("Simple, slow, smooth camera movement."));
        assert_eq!(
            lines[4],
            "AVOID: extra limbs, deformed hands, multiple hands, mutated fingers, extra fingers, distorted body"
        );
        assert!(revision.notes.contains(&"Added negative prompt".to_string()));
    }

    #[test]
    fn test_suggestions_are_folded() {
        let refiner = RuleBasedRefiner::default();
        let c = critique(9.0, 9.0, 9.0).with_suggestions(vec![
            "slow the pan".into(),
            " ".into(),
            "warmer light".into(),
        ]);
        let revision = refiner.compose("Base.", &c);
        assert_eq!(revision.prompt, "Base.\nADDRESS: slow the pan; warmer light");
    }

    #[test]
    fn test_rule_path_is_deterministic() {
        let refiner = RuleBasedRefiner::default();
        let c = critique(7.0, 8.0, 5.0).with_suggestions(vec!["steady camera".into()]);
        assert_eq!(refiner.compose("Base.", &c), refiner.compose("Base.", &c));
    }
}
