use serde::Serialize;

use crate::stimulus::ContrastMode;
use crate::trial::TrialSpec;

/// An ordered group of trials sharing one contrast mode.
///
/// `length` is taken from the trial list, so the two cannot disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockSpec {
    index: usize,
    length: usize,
    contrast_mode: ContrastMode,
    congruency_ratio: f64,
    trials: Vec<TrialSpec>,
    /// Rest period that follows this block, resolved at planning time.
    rest_after_ms: Option<f64>,
}

impl BlockSpec {
    pub fn new(
        index: usize,
        contrast_mode: ContrastMode,
        congruency_ratio: f64,
        trials: Vec<TrialSpec>,
        rest_after_ms: Option<f64>,
    ) -> Self {
        Self {
            index,
            length: trials.len(),
            contrast_mode,
            congruency_ratio,
            trials,
            rest_after_ms,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn contrast_mode(&self) -> ContrastMode {
        self.contrast_mode
    }

    pub fn congruency_ratio(&self) -> f64 {
        self.congruency_ratio
    }

    pub fn trials(&self) -> &[TrialSpec] {
        &self.trials
    }

    pub fn rest_after_ms(&self) -> Option<f64> {
        self.rest_after_ms
    }

    pub fn congruent_count(&self) -> usize {
        self.trials
            .iter()
            .filter(|t| t.stimulus.is_congruent())
            .count()
    }
}
