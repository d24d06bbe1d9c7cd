// Perplexity Estimator
// Strided sliding-window evaluation for token sequences longer than the
// oracle's context window.

use crate::services::oracle::{OracleError, ScoringOracle};
use tracing::debug;

use super::DetectError;

/// Default stride between window starts, in tokens
pub const DEFAULT_STRIDE: usize = 512;

/// A contiguous token range `[begin, end)` whose trailing `target_len` tokens are scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub begin: usize,
    pub end: usize,
    pub target_len: usize,
}

/// Lay out the evaluation windows for a sequence of `seq_len` tokens.
///
/// Window starts advance by `stride`; each window spans at most `context_limit`
/// tokens and scores only the tokens past the previous window's end, so every
/// token is scored exactly once. The last window always ends at `seq_len` and
/// the layout stops there.
pub fn plan_windows(seq_len: usize, context_limit: usize, stride: usize) -> Vec<Window> {
    let mut windows = Vec::new();
    if context_limit == 0 || stride == 0 {
        return windows;
    }

    let mut prev_end = 0;
    let mut begin = 0;
    while begin < seq_len {
        let end = (begin + context_limit).min(seq_len);
        windows.push(Window {
            begin,
            end,
            target_len: end - prev_end,
        });
        prev_end = end;
        if end == seq_len {
            break;
        }
        begin += stride;
    }
    windows
}

#[derive(Debug, Clone)]
pub struct PerplexityEstimator {
    context_limit: usize,
    stride: usize,
    truncate: bool,
}

impl PerplexityEstimator {
    /// `truncate` drops the fractional part of every result, which is what the
    /// default classification thresholds are calibrated against.
    pub fn new(context_limit: usize, stride: usize, truncate: bool) -> Result<Self, DetectError> {
        if context_limit == 0 {
            return Err(DetectError::InvalidConfig(
                "context limit must be at least one token".to_string(),
            ));
        }
        if stride == 0 || stride > context_limit {
            return Err(DetectError::InvalidConfig(format!(
                "stride must be between 1 and the context limit ({}), got {}",
                context_limit, stride
            )));
        }
        Ok(Self {
            context_limit,
            stride,
            truncate,
        })
    }

    pub fn context_limit(&self) -> usize {
        self.context_limit
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn truncates(&self) -> bool {
        self.truncate
    }

    /// Perplexity of `text` under the oracle.
    ///
    /// Any oracle failure aborts the estimate; there is no partial result.
    pub fn estimate(&self, text: &str, oracle: &dyn ScoringOracle) -> Result<f64, DetectError> {
        let input_ids = oracle.tokenize(text)?;
        self.estimate_tokens(&input_ids, oracle)
    }

    /// Perplexity of an already tokenized sequence.
    pub fn estimate_tokens(
        &self,
        input_ids: &[u32],
        oracle: &dyn ScoringOracle,
    ) -> Result<f64, DetectError> {
        let seq_len = input_ids.len();
        if seq_len == 0 {
            return Err(DetectError::EmptyTokenSequence);
        }

        let windows = plan_windows(seq_len, self.context_limit, self.stride);
        let mut nlls: Vec<f64> = Vec::with_capacity(windows.len());
        for window in &windows {
            let loss = oracle.score(&input_ids[window.begin..window.end], window.target_len)?;
            if !loss.is_finite() || loss < 0.0 {
                return Err(OracleError::InvalidLoss(loss).into());
            }
            debug!(
                begin = window.begin,
                end = window.end,
                target_len = window.target_len,
                loss,
                "perplexity.window"
            );
            nlls.push(loss * window.target_len as f64);
        }

        // The terminal window always ends at seq_len.
        let ppl = (nlls.iter().sum::<f64>() / seq_len as f64).exp();
        if !ppl.is_finite() {
            return Err(DetectError::NonFinitePerplexity(ppl));
        }

        Ok(if self.truncate { ppl.trunc() } else { ppl })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Returns a constant loss and records every window it was asked to score.
    struct RecordingOracle {
        loss: f64,
        context: usize,
        calls: Mutex<Vec<(usize, usize)>>,
    }

    impl RecordingOracle {
        fn new(loss: f64, context: usize) -> Self {
            Self {
                loss,
                context,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl ScoringOracle for RecordingOracle {
        fn model_id(&self) -> &str {
            "recording"
        }

        fn max_context_length(&self) -> usize {
            self.context
        }

        fn tokenize(&self, text: &str) -> Result<Vec<u32>, OracleError> {
            Ok(text.split_whitespace().map(|w| w.len() as u32).collect())
        }

        fn score(&self, window: &[u32], target_len: usize) -> Result<f64, OracleError> {
            self.calls.lock().unwrap().push((window.len(), target_len));
            Ok(self.loss)
        }
    }

    struct FailingOracle;

    impl ScoringOracle for FailingOracle {
        fn model_id(&self) -> &str {
            "failing"
        }

        fn max_context_length(&self) -> usize {
            8
        }

        fn tokenize(&self, text: &str) -> Result<Vec<u32>, OracleError> {
            Ok(vec![1; text.len()])
        }

        fn score(&self, _window: &[u32], _target_len: usize) -> Result<f64, OracleError> {
            Err(OracleError::Unavailable("out of memory".to_string()))
        }
    }

    fn expected_window_count(seq_len: usize, context: usize, stride: usize) -> usize {
        1 + seq_len.saturating_sub(context).div_ceil(stride)
    }

    #[test]
    fn test_plan_windows_long_sequence() {
        let windows = plan_windows(2500, 1024, 512);
        assert_eq!(
            windows,
            vec![
                Window {
                    begin: 0,
                    end: 1024,
                    target_len: 1024,
                },
                Window {
                    begin: 512,
                    end: 1536,
                    target_len: 512,
                },
                Window {
                    begin: 1024,
                    end: 2048,
                    target_len: 512,
                },
                Window {
                    begin: 1536,
                    end: 2500,
                    target_len: 452,
                },
            ]
        );
    }

    #[test]
    fn test_plan_windows_short_sequence_single_window() {
        assert_eq!(
            plan_windows(10, 1024, 512),
            vec![Window {
                begin: 0,
                end: 10,
                target_len: 10,
            }]
        );
        assert!(plan_windows(0, 1024, 512).is_empty());
    }

    #[test]
    fn test_plan_windows_exact_multiple_has_no_empty_window() {
        let windows = plan_windows(2048, 512, 512);
        assert_eq!(windows.len(), 4);
        assert!(windows.iter().all(|w| w.target_len > 0));
        assert_eq!(windows.iter().filter(|w| w.end == 2048).count(), 1);
    }

    #[test]
    fn test_plan_windows_invariants() {
        for &(seq_len, context, stride) in &[
            (1, 4, 1),
            (7, 4, 2),
            (100, 16, 16),
            (1000, 1024, 512),
            (5000, 1024, 512),
            (4097, 1024, 1000),
            (333, 20, 7),
        ] {
            let windows = plan_windows(seq_len, context, stride);
            assert_eq!(windows.len(), expected_window_count(seq_len, context, stride));
            assert_eq!(windows.iter().map(|w| w.target_len).sum::<usize>(), seq_len);
            assert_eq!(windows.iter().filter(|w| w.end == seq_len).count(), 1);
            assert_eq!(windows.last().map(|w| w.end), Some(seq_len));

            let mut prev_end = 0;
            for w in &windows {
                assert!(w.end - w.begin <= context);
                assert_eq!(w.target_len, w.end - prev_end);
                assert!(w.target_len <= w.end - w.begin);
                prev_end = w.end;
            }
        }
    }

    #[test]
    fn test_window_count_matches_ceil_when_stride_equals_context() {
        for seq_len in [1usize, 511, 512, 513, 2048, 3000] {
            assert_eq!(plan_windows(seq_len, 512, 512).len(), seq_len.div_ceil(512));
        }
    }

    #[test]
    fn test_estimate_constant_loss() {
        let oracle = RecordingOracle::new(3.0_f64.ln(), 1024);
        let estimator = PerplexityEstimator::new(1024, 512, false).unwrap();
        let ppl = estimator.estimate("one two three four", &oracle).unwrap();
        assert!((ppl - 3.0).abs() < 1e-9);
        assert_eq!(*oracle.calls.lock().unwrap(), vec![(4, 4)]);
    }

    #[test]
    fn test_estimate_strides_over_long_input() {
        let text = vec!["tok"; 10].join(" ");
        let oracle = RecordingOracle::new(2.0, 4);
        let estimator = PerplexityEstimator::new(4, 2, false).unwrap();
        let ppl = estimator.estimate(&text, &oracle).unwrap();

        assert_eq!(
            *oracle.calls.lock().unwrap(),
            vec![(4, 4), (4, 2), (4, 2), (4, 2)]
        );
        assert!((ppl - 2.0_f64.exp()).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_truncates() {
        let oracle = RecordingOracle::new(46.7_f64.ln(), 1024);
        let estimator = PerplexityEstimator::new(1024, 512, true).unwrap();
        assert_eq!(estimator.estimate("some words here", &oracle).unwrap(), 46.0);
    }

    #[test]
    fn test_estimate_is_idempotent() {
        let oracle = RecordingOracle::new(4.1, 16);
        let estimator = PerplexityEstimator::new(16, 8, true).unwrap();
        let text = "the same passage scored twice gives the same answer every single time";
        let first = estimator.estimate(text, &oracle).unwrap();
        let second = estimator.estimate(text, &oracle).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_token_sequence_is_an_error() {
        let oracle = RecordingOracle::new(1.0, 16);
        let estimator = PerplexityEstimator::new(16, 8, true).unwrap();
        assert!(matches!(
            estimator.estimate("   ", &oracle),
            Err(DetectError::EmptyTokenSequence)
        ));
        assert!(oracle.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_oracle_failure_aborts() {
        let estimator = PerplexityEstimator::new(8, 4, true).unwrap();
        let err = estimator.estimate("abcdefghijklmnop", &FailingOracle).unwrap_err();
        assert!(matches!(err, DetectError::Oracle(OracleError::Unavailable(_))));
    }

    #[test]
    fn test_invalid_loss_rejected() {
        let oracle = RecordingOracle::new(f64::NAN, 16);
        let estimator = PerplexityEstimator::new(16, 8, true).unwrap();
        let err = estimator.estimate("a b c", &oracle).unwrap_err();
        assert!(matches!(err, DetectError::Oracle(OracleError::InvalidLoss(_))));

        let oracle = RecordingOracle::new(-0.5, 16);
        assert!(estimator.estimate("a b c", &oracle).is_err());
    }

    #[test]
    fn test_overflow_is_non_finite() {
        let oracle = RecordingOracle::new(1.0e6, 16);
        let estimator = PerplexityEstimator::new(16, 8, false).unwrap();
        assert!(matches!(
            estimator.estimate("a b c", &oracle),
            Err(DetectError::NonFinitePerplexity(_))
        ));
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(PerplexityEstimator::new(0, 1, true).is_err());
        assert!(PerplexityEstimator::new(1024, 0, true).is_err());
        assert!(PerplexityEstimator::new(512, 1024, true).is_err());
        assert!(PerplexityEstimator::new(1024, 1024, true).is_ok());
    }
}
