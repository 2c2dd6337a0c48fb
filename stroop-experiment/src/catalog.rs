use rand::Rng;
use rand::seq::IndexedRandom;
use stroop_core::{ColorName, Congruency, ContrastMode, Palette, StimulusItem};

/// Remaining congruent/incongruent draws for one block.
///
/// The congruent count is `floor(ratio * length)`, the rest incongruent, so a
/// block that draws exactly `length` items hits the ratio exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CongruencyQuota {
    congruent: usize,
    incongruent: usize,
}

impl CongruencyQuota {
    pub fn for_block(length: usize, ratio: f64) -> Self {
        let ratio = ratio.clamp(0.0, 1.0);
        // Nudge so that e.g. 0.29 * 100 lands on 29, not 28.
        let congruent = ((ratio * length as f64) + 1e-9).floor() as usize;
        let congruent = congruent.min(length);
        Self {
            congruent,
            incongruent: length - congruent,
        }
    }

    pub fn congruent(&self) -> usize {
        self.congruent
    }

    pub fn incongruent(&self) -> usize {
        self.incongruent
    }

    pub fn remaining(&self) -> usize {
        self.congruent + self.incongruent
    }

    /// Draws a class without replacement, weighted by what is left.
    pub fn take<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Congruency> {
        let total = self.remaining();
        if total == 0 {
            return None;
        }
        if rng.random_range(0..total) < self.congruent {
            self.congruent -= 1;
            Some(Congruency::Congruent)
        } else {
            self.incongruent -= 1;
            Some(Congruency::Incongruent)
        }
    }
}

/// The closed set of word/ink pairs a run draws from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StimulusCatalog {
    palette: Palette,
}

impl StimulusCatalog {
    pub fn new(palette: Palette) -> Self {
        Self { palette }
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Every pair in the catalog for one contrast mode.
    pub fn items(&self, contrast: ContrastMode) -> Vec<StimulusItem> {
        let colors = self.palette.colors();
        colors
            .iter()
            .flat_map(|&w| colors.iter().map(move |&ink| StimulusItem::new(w, ink, contrast)))
            .collect()
    }

    /// Draws the next item of a block, consuming one slot of `quota`. An
    /// exhausted quota falls back to a fair coin.
    pub fn pick<R: Rng + ?Sized>(
        &self,
        quota: &mut CongruencyQuota,
        contrast: ContrastMode,
        rng: &mut R,
    ) -> StimulusItem {
        let class = quota.take(rng).unwrap_or_else(|| {
            if rng.random_bool(0.5) {
                Congruency::Congruent
            } else {
                Congruency::Incongruent
            }
        });
        self.item(class, contrast, rng)
    }

    /// A random item of the given congruency.
    pub fn item<R: Rng + ?Sized>(
        &self,
        class: Congruency,
        contrast: ContrastMode,
        rng: &mut R,
    ) -> StimulusItem {
        let colors = self.palette.colors();
        let word = *colors.choose(rng).unwrap_or(&ColorName::Red);
        let ink = match class {
            Congruency::Congruent => word,
            Congruency::Incongruent => {
                let others: Vec<ColorName> =
                    colors.iter().copied().filter(|&c| c != word).collect();
                *others.choose(rng).unwrap_or(&word)
            }
        };
        StimulusItem::new(word, ink, contrast)
    }
}
