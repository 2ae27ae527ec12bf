use std::fmt;

use serde::Serialize;

use crate::{
    critique::{Dimension, ScoreCard},
    policy::Decision,
};

use super::AssetOutcome;

/// One validation of one clip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityRow {
    pub scene_number: usize,
    pub attempt: usize,
    pub decision: Decision,
    pub overall: f64,
    pub anatomy: f64,
    pub consistency: f64,
    pub technical: f64,
    pub issues: usize,
}

/// Statistics over every validation performed in a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub total: usize,
    pub passed: usize,
    pub retry: usize,
    pub failed: usize,
    /// Percentage of validations that passed.
    pub pass_rate: f64,
    pub average_overall: f64,
    pub average_anatomy: f64,
    pub average_consistency: f64,
    pub average_technical: f64,
    pub rows: Vec<QualityRow>,
}

impl QualityReport {
    pub fn from_assets(assets: &[AssetOutcome]) -> Self {
        let mut rows = Vec::new();

        for asset in assets {
            let final_decision = match &asset.outcome {
                Ok(run) => run.final_decision(),
                Err(_) => Decision::Fail,
            };
            for record in asset.history() {
                // A record that led to a refinement was a retry.
                let decision = if record.revision.is_some() {
                    Decision::Continue
                } else {
                    final_decision
                };
                let scores = record.critique.scores();
                let score = |d: Dimension| scores.get(d).map(|s| s.value()).unwrap_or(0.0);
                rows.push(QualityRow {
                    scene_number: asset.scene_number,
                    attempt: record.iteration,
                    decision,
                    overall: record.overall().value(),
                    anatomy: score(Dimension::Anatomy),
                    consistency: score(Dimension::Consistency),
                    technical: score(Dimension::Technical),
                    issues: record.critique.issues.len(),
                });
            }
        }

        let total = rows.len();
        let count = |d: Decision| rows.iter().filter(|r| r.decision == d).count();
        let average = |f: fn(&QualityRow) -> f64| {
            if total == 0 {
                0.0
            } else {
                rows.iter().map(f).sum::<f64>() / total as f64
            }
        };

        let passed = count(Decision::Accept);
        Self {
            total,
            passed,
            retry: count(Decision::Continue),
            failed: count(Decision::Fail),
            pass_rate: if total == 0 {
                0.0
            } else {
                passed as f64 / total as f64 * 100.0
            },
            average_overall: average(|r| r.overall),
            average_anatomy: average(|r| r.anatomy),
            average_consistency: average(|r| r.consistency),
            average_technical: average(|r| r.technical),
            rows,
        }
    }

    pub fn summary(&self) -> String {
        if self.total == 0 {
            return "No validations performed".to_string();
        }
        format!(
            "{}/{} scenes passed, {} need retry, {} failed",
            self.passed, self.total, self.retry, self.failed
        )
    }
}

impl fmt::Display for QualityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary())?;
        if self.total == 0 {
            return Ok(());
        }
        writeln!(
            f,
            "pass rate {:.1}% | overall {:.1}/10 | anatomy {:.1}/10 | consistency {:.1}/10 | technical {:.1}/10",
            self.pass_rate,
            self.average_overall,
            self.average_anatomy,
            self.average_consistency,
            self.average_technical
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "  scene {} attempt {}: {:?} overall {:.1} (anatomy {:.1}, consistency {:.1}, technical {:.1}) issues {}",
                row.scene_number,
                row.attempt,
                row.decision,
                row.overall,
                row.anatomy,
                row.consistency,
                row.technical,
                row.issues
            )?;
        }
        Ok(())
    }
}
