// Detection Module
// Perplexity-based AI text detection core, organized into submodules:
// - perplexity: strided sliding-window perplexity estimation
// - aggregation: mean / burstiness over per-line perplexities
// - policy: threshold table mapping perplexity to verdict and label
// - detector: the validate -> segment -> score -> classify pipeline

pub mod perplexity;
pub mod aggregation;
pub mod policy;
pub mod detector;

use crate::services::oracle::OracleError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    /// Not enough alphanumeric content to judge; the caller can fix this.
    #[error("Please input more text (minimum {min_chars} characters)")]
    InputTooShort { min_chars: usize },

    /// No line survived filtering, so mean and burstiness are undefined.
    #[error("no line contained scorable text; per-line perplexity is undefined")]
    EmptyScoreSet,

    #[error("tokenizer produced no tokens")]
    EmptyTokenSequence,

    #[error("perplexity is not finite: {0}")]
    NonFinitePerplexity(f64),

    #[error("scoring oracle failed: {0}")]
    Oracle(#[from] OracleError),

    #[error("invalid detector configuration: {0}")]
    InvalidConfig(String),
}

impl DetectError {
    /// True for user-correctable input problems, as opposed to internal failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InputTooShort { .. })
    }
}

pub use aggregation::{aggregate_line_perplexities, LineStatistics};
pub use detector::{Detection, Detector, DEFAULT_MIN_ALNUM_CHARS};
pub use perplexity::{plan_windows, PerplexityEstimator, Window, DEFAULT_STRIDE};
pub use policy::{ClassificationPolicy, Verdict, VerdictRule};
