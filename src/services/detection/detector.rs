// Detector
// validate -> segment -> score whole text -> score lines -> aggregate -> classify

use crate::models::{DetectionReport, LineScore};
use crate::services::oracle::ScoringOracle;
use crate::services::text_processor::{count_alnum_chars, has_alnum, split_lines};
use std::time::Instant;
use tracing::{debug, info};

use super::aggregation::aggregate_line_perplexities;
use super::perplexity::PerplexityEstimator;
use super::policy::ClassificationPolicy;
use super::DetectError;

/// Minimum number of ASCII alphanumeric characters a text needs to be scored
pub const DEFAULT_MIN_ALNUM_CHARS: usize = 100;

/// Outcome of one detection: the report, its verdict, and the per-line scores
/// the report was aggregated from.
#[derive(Debug, Clone)]
pub struct Detection {
    pub report: DetectionReport,
    pub verdict: String,
    pub lines: Vec<LineScore>,
}

#[derive(Debug, Clone)]
pub struct Detector {
    estimator: PerplexityEstimator,
    policy: ClassificationPolicy,
    min_alnum_chars: usize,
}

impl Detector {
    pub fn new(
        estimator: PerplexityEstimator,
        policy: ClassificationPolicy,
        min_alnum_chars: usize,
    ) -> Result<Self, DetectError> {
        policy.validate()?;
        if min_alnum_chars == 0 {
            return Err(DetectError::InvalidConfig(
                "minimum alphanumeric characters must be positive".to_string(),
            ));
        }
        Ok(Self {
            estimator,
            policy,
            min_alnum_chars,
        })
    }

    pub fn estimator(&self) -> &PerplexityEstimator {
        &self.estimator
    }

    pub fn policy(&self) -> &ClassificationPolicy {
        &self.policy
    }

    pub fn min_alnum_chars(&self) -> usize {
        self.min_alnum_chars
    }

    /// Fails with `InputTooShort` before touching the oracle when the text has
    /// fewer alphanumeric characters than the configured minimum.
    pub fn validate(&self, text: &str) -> Result<(), DetectError> {
        if count_alnum_chars(text) < self.min_alnum_chars {
            return Err(DetectError::InputTooShort {
                min_chars: self.min_alnum_chars,
            });
        }
        Ok(())
    }

    pub fn detect(&self, text: &str, oracle: &dyn ScoringOracle) -> Result<Detection, DetectError> {
        let t0 = Instant::now();
        self.validate(text)?;

        let segments = split_lines(text);
        let perplexity = self.estimator.estimate(text, oracle)?;

        let mut lines: Vec<LineScore> = Vec::with_capacity(segments.len());
        for (index, line) in segments.iter().enumerate() {
            if !has_alnum(line) {
                debug!(index, "detect.line_skipped");
                continue;
            }
            let ppl = self.estimator.estimate(line, oracle)?;
            lines.push(LineScore {
                index,
                text: line.to_string(),
                perplexity: ppl,
            });
        }

        let per_line: Vec<f64> = lines.iter().map(|l| l.perplexity).collect();
        let stats = aggregate_line_perplexities(&per_line)?;
        let verdict = self.policy.classify(stats.mean);

        info!(
            segments = segments.len(),
            scored_lines = stats.count,
            perplexity,
            perplexity_per_line = stats.mean,
            burstiness = stats.burstiness,
            label = verdict.label.as_u8(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "detect.completed"
        );

        Ok(Detection {
            report: DetectionReport {
                perplexity,
                perplexity_per_line: stats.mean,
                burstiness: stats.burstiness,
                label: verdict.label,
            },
            verdict: verdict.text.to_string(),
            lines,
        })
    }
}
