// Core Services

pub mod text_processor;
pub mod config_store;
pub mod oracle;
pub mod detection;

pub use text_processor::*;
pub use config_store::*;
pub use oracle::*;

// Re-export detection types
pub use detection::{
    aggregate_line_perplexities,
    plan_windows,
    ClassificationPolicy,
    DetectError,
    Detection,
    Detector,
    PerplexityEstimator,
    VerdictRule,
    Window,
};
