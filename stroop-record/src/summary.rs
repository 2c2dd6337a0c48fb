use std::collections::BTreeMap;

use serde::Serialize;
use stroop_core::{Congruency, ContrastMode, TrialResult};

/// Per contrast × congruency statistics. RTs are over correct trials only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CellStats {
    pub count: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub mean_rt_ms: Option<f64>,
    pub median_rt_ms: Option<f64>,
}

/// Derived view of a trial log. Never stored on its own; recomputing it
/// from the same log gives the same value, bit for bit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub n_trials: usize,
    pub n_responses: usize,
    pub n_timeouts: usize,
    /// Correct trials over all trials; timeouts count as not correct.
    pub accuracy: f64,
    pub cells: BTreeMap<(ContrastMode, Congruency), CellStats>,
    /// Incongruent minus congruent mean RT, per contrast mode.
    pub stroop_effect: BTreeMap<ContrastMode, Option<f64>>,
}

impl SessionSummary {
    pub fn from_results(results: &[TrialResult]) -> Self {
        let n_trials = results.len();
        let n_timeouts = results.iter().filter(|r| r.is_timed_out()).count();
        let n_correct = results.iter().filter(|r| r.is_correct()).count();

        let mut groups: BTreeMap<(ContrastMode, Congruency), Vec<&TrialResult>> = BTreeMap::new();
        for r in results {
            let contrast = r.spec().contrast_mode;
            // Both congruency cells exist for every contrast that appears.
            for g in [Congruency::Congruent, Congruency::Incongruent] {
                groups.entry((contrast, g)).or_default();
            }
            groups
                .entry((contrast, r.spec().stimulus.congruency()))
                .or_default()
                .push(r);
        }

        let cells: BTreeMap<_, _> = groups
            .into_iter()
            .map(|(key, trials)| (key, cell_stats(&trials)))
            .collect();

        let mut stroop_effect = BTreeMap::new();
        for &(contrast, _) in cells.keys() {
            let mean = |g| cells.get(&(contrast, g)).and_then(|c: &CellStats| c.mean_rt_ms);
            let effect = match (mean(Congruency::Incongruent), mean(Congruency::Congruent)) {
                (Some(i), Some(c)) => Some(i - c),
                _ => None,
            };
            stroop_effect.insert(contrast, effect);
        }

        Self {
            n_trials,
            n_responses: n_trials - n_timeouts,
            n_timeouts,
            accuracy: ratio(n_correct, n_trials),
            cells,
            stroop_effect,
        }
    }

    pub fn cell(&self, contrast: ContrastMode, congruency: Congruency) -> Option<&CellStats> {
        self.cells.get(&(contrast, congruency))
    }

    pub fn stroop_effect(&self, contrast: ContrastMode) -> Option<f64> {
        self.stroop_effect.get(&contrast).copied().flatten()
    }

    /// `(measure, value)` pairs in output order. Missing values are empty.
    pub fn measures(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let contrasts: Vec<ContrastMode> = self.stroop_effect.keys().copied().collect();
        for contrast in contrasts {
            for g in [Congruency::Congruent, Congruency::Incongruent] {
                let Some(cell) = self.cell(contrast, g) else {
                    continue;
                };
                let prefix = format!("{}_contrast_{}", contrast.label(), g.label());
                out.push((format!("{prefix}_trials"), cell.count.to_string()));
                out.push((format!("{prefix}_correct"), cell.correct.to_string()));
                out.push((format!("{prefix}_accuracy"), cell.accuracy.to_string()));
                out.push((format!("{prefix}_mean_rt_ms"), opt(cell.mean_rt_ms)));
                out.push((format!("{prefix}_median_rt_ms"), opt(cell.median_rt_ms)));
            }
            out.push((
                format!("{}_contrast_stroop_effect_ms", contrast.label()),
                opt(self.stroop_effect(contrast)),
            ));
        }
        out.push(("total_trials".into(), self.n_trials.to_string()));
        out.push(("timeouts".into(), self.n_timeouts.to_string()));
        out.push(("overall_accuracy".into(), self.accuracy.to_string()));
        out
    }
}

fn cell_stats(trials: &[&TrialResult]) -> CellStats {
    let correct: Vec<&&TrialResult> = trials.iter().filter(|r| r.is_correct()).collect();
    let mut rts: Vec<f64> = correct
        .iter()
        .filter_map(|r| r.reaction_time_ms())
        .collect();
    let mean_rt_ms = if rts.is_empty() {
        None
    } else {
        Some(rts.iter().sum::<f64>() / rts.len() as f64)
    };
    rts.sort_by(f64::total_cmp);
    CellStats {
        count: trials.len(),
        correct: correct.len(),
        accuracy: ratio(correct.len(), trials.len()),
        mean_rt_ms,
        median_rt_ms: median(&rts),
    }
}

fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

fn opt(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}
