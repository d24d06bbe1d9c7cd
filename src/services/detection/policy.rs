// Classification Policy
// Ordered threshold table mapping mean per-line perplexity to a verdict and label.

use crate::models::Label;
use serde::{Deserialize, Serialize};

use super::DetectError;

pub const VERDICT_AI: &str = "The Text is generated by AI.";
pub const VERDICT_MIXED: &str =
    "The Text most probably contains parts which are generated by AI. (requires more text for better judgment)";
pub const VERDICT_HUMAN: &str = "The Text is written by a Human.";

/// One tier of the policy: applies to scores strictly below `upper_bound`.
///
/// `None` marks the open-ended final tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictRule {
    pub upper_bound: Option<f64>,
    pub verdict: String,
    pub label: Label,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationPolicy {
    pub rules: Vec<VerdictRule>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict<'a> {
    pub text: &'a str,
    pub label: Label,
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        Self {
            rules: vec![
                VerdictRule {
                    upper_bound: Some(60.0),
                    verdict: VERDICT_AI.to_string(),
                    label: Label::Ai,
                },
                VerdictRule {
                    upper_bound: Some(80.0),
                    verdict: VERDICT_MIXED.to_string(),
                    label: Label::Ai,
                },
                VerdictRule {
                    upper_bound: None,
                    verdict: VERDICT_HUMAN.to_string(),
                    label: Label::Human,
                },
            ],
        }
    }
}

impl ClassificationPolicy {
    /// Check that bounds are finite and strictly ascending and that the table ends
    /// with exactly one open-ended rule, so every score lands in one tier.
    pub fn validate(&self) -> Result<(), DetectError> {
        let Some((last, bounded)) = self.rules.split_last() else {
            return Err(DetectError::InvalidConfig(
                "classification policy has no rules".to_string(),
            ));
        };
        if last.upper_bound.is_some() {
            return Err(DetectError::InvalidConfig(
                "last classification rule must have no upper bound".to_string(),
            ));
        }

        let mut prev = f64::NEG_INFINITY;
        for rule in bounded {
            let bound = rule.upper_bound.ok_or_else(|| {
                DetectError::InvalidConfig(
                    "only the last classification rule may be open-ended".to_string(),
                )
            })?;
            if !bound.is_finite() || bound <= prev {
                return Err(DetectError::InvalidConfig(format!(
                    "classification bounds must be finite and ascending, got {} after {}",
                    bound, prev
                )));
            }
            prev = bound;
        }
        Ok(())
    }

    /// Pick the first tier whose upper bound is above `score`.
    ///
    /// Assumes a validated policy; an empty table falls back to the AI verdict.
    pub fn classify(&self, score: f64) -> Verdict<'_> {
        self.rules
            .iter()
            .find(|rule| rule.upper_bound.is_none_or(|bound| score < bound))
            .or_else(|| self.rules.last())
            .map(|rule| Verdict {
                text: rule.verdict.as_str(),
                label: rule.label,
            })
            .unwrap_or(Verdict {
                text: VERDICT_AI,
                label: Label::Ai,
            })
    }
}
