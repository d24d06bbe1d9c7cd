// Aggregation Logic
// Collapses per-line perplexities into the mean and burstiness signals

use super::DetectError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineStatistics {
    /// Arithmetic mean of the per-line perplexities
    pub mean: f64,
    /// Maximum per-line perplexity
    pub burstiness: f64,
    pub count: usize,
}

/// Mean and maximum of the per-line perplexities.
///
/// An empty set has neither, so it is an error rather than a zero or NaN report.
pub fn aggregate_line_perplexities(values: &[f64]) -> Result<LineStatistics, DetectError> {
    if values.is_empty() {
        return Err(DetectError::EmptyScoreSet);
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let burstiness = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    Ok(LineStatistics {
        mean,
        burstiness,
        count: values.len(),
    })
}
