//! Dry runs without a participant: a headless screen and a response model
//! that answers whatever the screen shows.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use rand::Rng;
use rand::seq::IndexedRandom;
use stroop_core::{ContrastMode, FeedbackKind, Palette, StimulusItem};
use stroop_experiment::{DeviceError, InputBackend, KeyEvent, PresentationSurface};
use stroop_timing::Timer;
use tracing::{debug, info};

/// Reaction-time and accuracy model of the simulated participant.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseModel {
    pub base_rt_ms: f64,
    pub incongruent_cost_ms: f64,
    pub low_contrast_cost_ms: f64,
    pub rt_sd_ms: f64,
    pub min_rt_ms: f64,
    pub accuracy_congruent: f64,
    pub accuracy_incongruent: f64,
    /// Chance of not answering at all.
    pub miss_rate: f64,
}

impl Default for ResponseModel {
    fn default() -> Self {
        Self {
            base_rt_ms: 620.0,
            incongruent_cost_ms: 90.0,
            low_contrast_cost_ms: 40.0,
            rt_sd_ms: 110.0,
            min_rt_ms: 200.0,
            accuracy_congruent: 0.97,
            accuracy_incongruent: 0.9,
            miss_rate: 0.02,
        }
    }
}

impl ResponseModel {
    /// Draws one reaction time. The noise is Irwin-Hall (sum of four
    /// uniforms), close enough to normal for a dry run.
    pub fn reaction_time<R: Rng + ?Sized>(&self, item: &StimulusItem, rng: &mut R) -> f64 {
        let mut mean = self.base_rt_ms;
        if !item.is_congruent() {
            mean += self.incongruent_cost_ms;
        }
        if item.contrast_mode() == ContrastMode::LowContrast {
            mean += self.low_contrast_cost_ms;
        }
        let z: f64 = (0..4).map(|_| rng.random::<f64>()).sum::<f64>() - 2.0;
        // Irwin-Hall(4) has variance 1/3.
        let noise = z * 3f64.sqrt() * self.rt_sd_ms;
        (mean + noise).max(self.min_rt_ms)
    }

    /// Key pressed for `item`, or `None` for a miss.
    pub fn choose_key<R: Rng + ?Sized>(
        &self,
        item: &StimulusItem,
        palette: &Palette,
        rng: &mut R,
    ) -> Option<char> {
        if rng.random_bool(self.miss_rate.clamp(0.0, 1.0)) {
            return None;
        }
        let accuracy = if item.is_congruent() {
            self.accuracy_congruent
        } else {
            self.accuracy_incongruent
        };
        if rng.random_bool(accuracy.clamp(0.0, 1.0)) {
            return Some(item.correct_key());
        }
        let wrong: Vec<char> = palette
            .colors()
            .iter()
            .map(|c| c.response_key())
            .filter(|&k| k != item.correct_key())
            .collect();
        wrong.choose(rng).copied()
    }
}

#[derive(Debug, Default)]
struct Display {
    /// Stimulus and onset not yet seen by the participant.
    fresh: Option<(StimulusItem, u64)>,
}

/// Headless surface. Each draw costs one simulated frame.
pub struct SimulatedScreen<C> {
    clock: C,
    frame: Duration,
    display: Rc<RefCell<Display>>,
}

impl<C: Timer> PresentationSurface for SimulatedScreen<C> {
    fn draw_fixation(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn draw_stimulus(&mut self, item: &StimulusItem) -> Result<u64, DeviceError> {
        self.clock.sleep(self.frame);
        let onset = self.clock.now();
        self.display.borrow_mut().fresh = Some((*item, onset));
        Ok(onset)
    }

    fn draw_feedback(&mut self, _kind: FeedbackKind) -> Result<(), DeviceError> {
        Ok(())
    }

    fn draw_rest(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn show_message(&mut self, text: &str) -> Result<(), DeviceError> {
        info!(message = %text.replace('\n', " "), "screen message");
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Answers the stimulus on the paired [`SimulatedScreen`] according to a
/// [`ResponseModel`].
pub struct SimulatedParticipant<C, R> {
    clock: C,
    display: Rc<RefCell<Display>>,
    model: ResponseModel,
    palette: Palette,
    rng: R,
    /// Key and the time it will be pressed.
    planned: Option<(char, u64)>,
}

impl<C: Timer, R: Rng> InputBackend for SimulatedParticipant<C, R> {
    fn poll_key(&mut self, timeout: Duration) -> Result<Option<KeyEvent>, DeviceError> {
        let fresh = self.display.borrow_mut().fresh.take();
        if let Some((item, onset)) = fresh {
            self.planned = self
                .model
                .choose_key(&item, &self.palette, &mut self.rng)
                .map(|key| {
                    let rt = self.model.reaction_time(&item, &mut self.rng);
                    (key, onset + (rt * 1e6) as u64)
                });
            debug!(planned = ?self.planned, "simulated response");
        }

        let now = self.clock.now();
        let horizon = now.saturating_add(timeout.as_nanos() as u64);
        match self.planned {
            Some((key, at)) if at <= horizon => {
                self.clock.sleep(Duration::from_nanos(at.saturating_sub(now)));
                self.planned = None;
                Ok(Some(KeyEvent {
                    key,
                    timestamp_ns: self.clock.now(),
                }))
            }
            _ => {
                self.clock.sleep(timeout);
                Ok(None)
            }
        }
    }

    fn discard_pending(&mut self) -> Result<(), DeviceError> {
        self.planned = None;
        Ok(())
    }
}

/// A screen and a participant sharing one display.
pub fn simulated_devices<C: Timer, R: Rng>(
    clock: C,
    model: ResponseModel,
    palette: Palette,
    rng: R,
) -> (SimulatedScreen<C>, SimulatedParticipant<C, R>) {
    let display = Rc::new(RefCell::new(Display::default()));
    let screen = SimulatedScreen {
        clock: clock.clone(),
        frame: Duration::from_micros(16_667),
        display: Rc::clone(&display),
    };
    let participant = SimulatedParticipant {
        clock,
        display,
        model,
        palette,
        rng,
        planned: None,
    };
    (screen, participant)
}
