use thiserror::Error;

/// Invalid run setup. Always surfaced before the first trial.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("jittered ITI bounds are inverted: min {min_ms} ms > max {max_ms} ms")]
    InvalidItiBounds { min_ms: f64, max_ms: f64 },

    #[error("ITI duration must be a finite, non-negative number of ms, got {0}")]
    NegativeIti(f64),

    #[error("palette needs at least two distinct colors, got {0}")]
    PaletteTooSmall(usize),

    #[error("block length {0} is not supported (use 8 or 15)")]
    UnsupportedBlockLength(usize),

    #[error("block lengths add up to {actual} trials but total_trials is {expected}")]
    BlockLengthMismatch { expected: usize, actual: usize },

    #[error("run has no blocks")]
    EmptyRun,

    #[error("congruency ratio must lie in [0, 1], got {0}")]
    InvalidRatio(f64),

    #[error("rest probability must lie in [0, 1], got {0}")]
    InvalidRestProbability(f64),

    #[error("{paradigm} paradigm requires contrast mode {expected}")]
    ContrastModeMismatch {
        paradigm: &'static str,
        expected: &'static str,
    },

    #[error("response timeout must be greater than zero")]
    ZeroResponseTimeout,
}
