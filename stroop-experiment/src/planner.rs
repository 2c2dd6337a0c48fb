use rand::Rng;
use serde::Serialize;
use stroop_core::{BlockSpec, ContrastMode};
use tracing::{debug, info};

use crate::catalog::StimulusCatalog;
use crate::config::{CongruencyDesign, ContrastSelection, InvalidConfig, RestPlacement, RunConfig};
use crate::sequencer::{BlockRequest, SequenceOutcome, TrialSequencer};

/// Most blocks in a row one contrast mode may take in a merged run.
pub const MAX_SAME_MODE_BLOCKS: usize = 2;

/// The resolved run: every block, trial and ITI fixed in advance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunPlan {
    pub blocks: Vec<BlockSpec>,
    pub outcomes: Vec<SequenceOutcome>,
}

impl RunPlan {
    pub fn total_trials(&self) -> usize {
        self.blocks.iter().map(BlockSpec::length).sum()
    }

    pub fn fallbacks(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| **o == SequenceOutcome::Fallback)
            .count()
    }

    pub fn contrast_sequence(&self) -> Vec<ContrastMode> {
        self.blocks.iter().map(BlockSpec::contrast_mode).collect()
    }
}

pub struct BlockPlanner<'a> {
    config: &'a RunConfig,
    catalog: StimulusCatalog,
}

impl<'a> BlockPlanner<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self {
            config,
            catalog: StimulusCatalog::new(config.palette.clone()),
        }
    }

    /// Validates the configuration and lays out the whole run.
    pub fn plan<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<RunPlan, InvalidConfig> {
        self.config.validate()?;
        let cfg = self.config;

        let modes = match cfg.contrast {
            ContrastSelection::Both => merged_contrast_sequence(&cfg.block_lengths),
            selection => {
                let mode = selection.single().unwrap_or(ContrastMode::HighContrast);
                vec![mode; cfg.block_lengths.len()]
            }
        };
        let ratios = congruency_ratios(cfg.congruency, &modes);
        let sequencer = TrialSequencer::new(&self.catalog, cfg.iti);
        let last = cfg.block_lengths.len() - 1;

        let mut blocks = Vec::with_capacity(cfg.block_lengths.len());
        let mut outcomes = Vec::with_capacity(cfg.block_lengths.len());
        let mut next_trial = 0;
        for (i, (&length, &mode)) in cfg.block_lengths.iter().zip(&modes).enumerate() {
            let req = BlockRequest {
                block_index: i,
                length,
                congruency_ratio: ratios[i],
                contrast_mode: mode,
                first_trial_index: next_trial,
                feedback_enabled: cfg.feedback_enabled,
            };
            let (trials, outcome) = sequencer.generate(&req, rng);
            let rest_after_ms = if i == last { None } else { self.rest_after(rng) };
            debug!(
                block = i,
                length,
                contrast = %mode,
                ratio = ratios[i],
                ?outcome,
                ?rest_after_ms,
                "block planned"
            );
            next_trial += trials.len();
            blocks.push(BlockSpec::new(i, mode, ratios[i], trials, rest_after_ms));
            outcomes.push(outcome);
        }

        let plan = RunPlan { blocks, outcomes };
        info!(
            paradigm = %cfg.paradigm,
            blocks = plan.blocks.len(),
            trials = plan.total_trials(),
            fallbacks = plan.fallbacks(),
            "run planned"
        );
        Ok(plan)
    }

    fn rest_after<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<f64> {
        let rest = self.config.rest.as_ref()?;
        let take = match rest.placement {
            RestPlacement::BetweenBlocks => true,
            RestPlacement::Random { probability } => rng.random_bool(probability.clamp(0.0, 1.0)),
        };
        take.then(|| rest.duration.next(rng))
    }
}

/// Contrast mode per block for a merged run.
///
/// Greedy length balancing: each block goes to the mode with fewer trials
/// so far. Ties go to the mode the previous block did not use, High for the
/// first block. A mode never takes more than [`MAX_SAME_MODE_BLOCKS`] in a
/// row, so every window of four blocks holds both modes.
pub fn merged_contrast_sequence(lengths: &[usize]) -> Vec<ContrastMode> {
    let mut high = 0usize;
    let mut low = 0usize;
    let mut prev: Option<ContrastMode> = None;
    let mut streak = 0usize;
    let mut out = Vec::with_capacity(lengths.len());

    for &len in lengths {
        let mut mode = if high < low {
            ContrastMode::HighContrast
        } else if low < high {
            ContrastMode::LowContrast
        } else {
            prev.map_or(ContrastMode::HighContrast, |p| p.other())
        };
        if prev == Some(mode) && streak >= MAX_SAME_MODE_BLOCKS {
            mode = mode.other();
        }

        streak = if prev == Some(mode) { streak + 1 } else { 1 };
        prev = Some(mode);
        match mode {
            ContrastMode::HighContrast => high += len,
            ContrastMode::LowContrast => low += len,
        }
        out.push(mode);
    }
    out
}

/// Congruent share per block.
fn congruency_ratios(design: CongruencyDesign, modes: &[ContrastMode]) -> Vec<f64> {
    match design {
        CongruencyDesign::Mixed { ratio } => vec![ratio; modes.len()],
        CongruencyDesign::Alternating => {
            let mut seen_high = 0usize;
            let mut seen_low = 0usize;
            modes
                .iter()
                .map(|mode| {
                    let n = match mode {
                        ContrastMode::HighContrast => &mut seen_high,
                        ContrastMode::LowContrast => &mut seen_low,
                    };
                    let ratio = if *n % 2 == 0 { 1.0 } else { 0.0 };
                    *n += 1;
                    ratio
                })
                .collect()
        }
    }
}
