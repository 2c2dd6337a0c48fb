use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;
use stroop_core::{Congruency, ContrastMode, StimulusItem, TrialSpec};
use tracing::{debug, warn};

use crate::catalog::{CongruencyQuota, StimulusCatalog};
use crate::iti::ItiPolicy;

/// Longest allowed run of one congruency class.
pub const MAX_CONGRUENCY_RUN: usize = 2;
/// Reshuffles tried before giving up on the run constraint.
pub const SHUFFLE_ATTEMPTS: usize = 100;
/// Redraws tried to break up an immediate word/ink repeat.
pub const REPEAT_REDRAWS: usize = 5;

/// What to generate for one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockRequest {
    pub block_index: usize,
    pub length: usize,
    pub congruency_ratio: f64,
    pub contrast_mode: ContrastMode,
    /// Run-wide index of the block's first trial.
    pub first_trial_index: usize,
    pub feedback_enabled: bool,
}

/// How the block order was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SequenceOutcome {
    /// A shuffle met the run constraint after this many attempts.
    Constrained { attempts: usize },
    /// No shuffle met it; the last unconstrained shuffle was kept.
    Fallback,
}

pub struct TrialSequencer<'a> {
    catalog: &'a StimulusCatalog,
    iti: ItiPolicy,
}

impl<'a> TrialSequencer<'a> {
    pub fn new(catalog: &'a StimulusCatalog, iti: ItiPolicy) -> Self {
        Self { catalog, iti }
    }

    /// Ordered trials for one block.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        req: &BlockRequest,
        rng: &mut R,
    ) -> (Vec<TrialSpec>, SequenceOutcome) {
        let mut quota = CongruencyQuota::for_block(req.length, req.congruency_ratio);
        let mut items: Vec<StimulusItem> = (0..req.length)
            .map(|_| self.catalog.pick(&mut quota, req.contrast_mode, rng))
            .collect();

        let outcome = constrained_shuffle(&mut items, rng);
        if outcome == SequenceOutcome::Fallback {
            let congruent = items.iter().filter(|i| i.is_congruent()).count();
            if congruent == 0 || congruent == items.len() {
                debug!(block = req.block_index, "single-class block, run constraint not applicable");
            } else {
                warn!(
                    block = req.block_index,
                    congruent,
                    length = items.len(),
                    "no shuffle met the congruency run limit, using unconstrained order"
                );
            }
        }
        self.break_repeats(&mut items, rng);

        let trials = items
            .into_iter()
            .enumerate()
            .map(|(i, stimulus)| TrialSpec {
                index: req.first_trial_index + i,
                block_index: req.block_index,
                stimulus,
                iti_ms: self.iti.next(rng),
                feedback_enabled: req.feedback_enabled,
                contrast_mode: req.contrast_mode,
            })
            .collect();
        (trials, outcome)
    }

    /// Redraws an item that repeats its predecessor's pair, keeping its
    /// congruency so the block's counts and run structure are unchanged.
    fn break_repeats<R: Rng + ?Sized>(&self, items: &mut [StimulusItem], rng: &mut R) {
        for i in 1..items.len() {
            let prev = items[i - 1];
            let mut tries = 0;
            while items[i].same_pair(&prev) && tries < REPEAT_REDRAWS {
                items[i] = self
                    .catalog
                    .item(items[i].congruency(), items[i].contrast_mode(), rng);
                tries += 1;
            }
        }
    }
}

/// Longest run of equal congruency in `items`.
pub fn longest_run(items: &[StimulusItem]) -> usize {
    let mut longest = 0;
    let mut run = 0;
    let mut last: Option<Congruency> = None;
    for item in items {
        let c = item.congruency();
        run = if last == Some(c) { run + 1 } else { 1 };
        last = Some(c);
        longest = longest.max(run);
    }
    longest
}

/// Shuffles until no class runs longer than [`MAX_CONGRUENCY_RUN`], giving
/// up after [`SHUFFLE_ATTEMPTS`].
pub fn constrained_shuffle<R: Rng + ?Sized>(
    items: &mut [StimulusItem],
    rng: &mut R,
) -> SequenceOutcome {
    for attempt in 1..=SHUFFLE_ATTEMPTS {
        items.shuffle(rng);
        if longest_run(items) <= MAX_CONGRUENCY_RUN {
            return SequenceOutcome::Constrained { attempts: attempt };
        }
    }
    SequenceOutcome::Fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn request(length: usize, ratio: f64) -> BlockRequest {
        BlockRequest {
            block_index: 0,
            length,
            congruency_ratio: ratio,
            contrast_mode: ContrastMode::HighContrast,
            first_trial_index: 0,
            feedback_enabled: false,
        }
    }

    #[test]
    fn eight_trial_half_block_with_fixed_iti() {
        let catalog = StimulusCatalog::default();
        let seq = TrialSequencer::new(&catalog, ItiPolicy::fixed(500.0));
        let mut rng = StdRng::seed_from_u64(11);
        let (trials, _) = seq.generate(&request(8, 0.5), &mut rng);
        assert_eq!(trials.len(), 8);
        assert_eq!(trials.iter().filter(|t| t.stimulus.is_congruent()).count(), 4);
        assert!(trials.iter().all(|t| t.iti_ms == 500.0));
        let idx: Vec<usize> = trials.iter().map(|t| t.index).collect();
        assert_eq!(idx, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn congruent_count_is_floor_of_ratio_times_length() {
        let catalog = StimulusCatalog::default();
        let seq = TrialSequencer::new(&catalog, ItiPolicy::fixed(0.0));
        let mut rng = StdRng::seed_from_u64(5);
        for len in [8, 15] {
            for ratio in [0.0, 0.2, 0.25, 0.5, 0.6, 0.75, 1.0] {
                let (trials, _) = seq.generate(&request(len, ratio), &mut rng);
                let congruent = trials.iter().filter(|t| t.stimulus.is_congruent()).count();
                assert_eq!(congruent, (ratio * len as f64).floor() as usize, "{len} {ratio}");
            }
        }
    }

    #[test]
    fn balanced_blocks_never_run_three_deep() {
        let catalog = StimulusCatalog::default();
        let seq = TrialSequencer::new(&catalog, ItiPolicy::fixed(0.0));
        let mut rng = StdRng::seed_from_u64(2024);
        for _ in 0..50 {
            for (len, ratio) in [(8, 0.5), (15, 0.5)] {
                let (trials, outcome) = seq.generate(&request(len, ratio), &mut rng);
                assert!(matches!(outcome, SequenceOutcome::Constrained { .. }));
                let items: Vec<StimulusItem> = trials.iter().map(|t| t.stimulus).collect();
                assert!(longest_run(&items) <= MAX_CONGRUENCY_RUN);
            }
        }
    }

    #[test]
    fn pathological_ratio_falls_back() {
        let catalog = StimulusCatalog::default();
        let seq = TrialSequencer::new(&catalog, ItiPolicy::fixed(0.0));
        let mut rng = StdRng::seed_from_u64(1);
        // 7 congruent vs 1 incongruent cannot avoid a run of three.
        let (trials, outcome) = seq.generate(&request(8, 0.875), &mut rng);
        assert_eq!(outcome, SequenceOutcome::Fallback);
        assert_eq!(trials.len(), 8);
        assert_eq!(trials.iter().filter(|t| t.stimulus.is_congruent()).count(), 7);
    }

    #[test]
    fn immediate_repeats_are_broken_up() {
        let catalog = StimulusCatalog::default();
        let seq = TrialSequencer::new(&catalog, ItiPolicy::fixed(0.0));
        let mut rng = StdRng::seed_from_u64(77);
        let mut repeats = 0;
        for _ in 0..100 {
            let (trials, _) = seq.generate(&request(15, 1.0), &mut rng);
            repeats += trials
                .windows(2)
                .filter(|w| w[0].stimulus.same_pair(&w[1].stimulus))
                .count();
        }
        // Four congruent pairs, five redraws: a surviving repeat needs six
        // consecutive 1-in-4 hits.
        assert!(repeats < 5, "{repeats} repeats left");
    }

    #[test]
    fn longest_run_counts_equal_neighbours() {
        use stroop_core::ColorName::*;
        let c = StimulusItem::new(Red, Red, ContrastMode::HighContrast);
        let i = StimulusItem::new(Red, Blue, ContrastMode::HighContrast);
        assert_eq!(longest_run(&[]), 0);
        assert_eq!(longest_run(&[c, c, i, c, c, c]), 3);
        assert_eq!(longest_run(&[c, i, i, c]), 2);
    }
}
