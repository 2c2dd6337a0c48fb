use std::time::Duration;

use stroop_core::{FeedbackKind, Palette, TrialResult, TrialSpec, TrialState};
use stroop_sync::{MarkerBus, MarkerCode};
use stroop_timing::Timer;
use tracing::{debug, info, trace};

use crate::config::RunConfig;
use crate::devices::{AbortSignal, DeviceError, InputBackend, KeyEvent, PresentationSurface};

/// Longest single sleep between abort checks.
const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Fixed per-trial durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialTiming {
    pub fixation: Duration,
    pub blank: Duration,
    pub response_timeout: Duration,
    pub feedback: Duration,
}

impl TrialTiming {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            fixation: Duration::from_millis(config.fixation_ms),
            blank: Duration::from_millis(config.blank_ms),
            response_timeout: Duration::from_millis(config.response_timeout_ms),
            feedback: Duration::from_millis(config.feedback_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrialOutcome {
    Completed(TrialResult),
    /// The abort signal was raised mid-trial. Nothing is recorded.
    Aborted,
}

enum Response {
    Key(KeyEvent),
    Timeout,
    Aborted,
}

/// Drives one trial at a time through
/// `Idle -> Fixation -> StimulusOnset -> AwaitingResponse -> (Feedback) -> Iti -> Idle`.
///
/// Every wait is bounded and checks the abort signal at least every
/// [`WAIT_SLICE`]. Markers are handed to the bus and never waited on.
pub struct TrialRunner<P, I, C> {
    surface: P,
    input: I,
    clock: C,
    bus: MarkerBus,
    abort: AbortSignal,
    timing: TrialTiming,
    palette: Palette,
    state: TrialState,
}

impl<P, I, C> TrialRunner<P, I, C>
where
    P: PresentationSurface,
    I: InputBackend,
    C: Timer,
{
    pub fn new(
        surface: P,
        input: I,
        clock: C,
        bus: MarkerBus,
        abort: AbortSignal,
        timing: TrialTiming,
        palette: Palette,
    ) -> Self {
        Self {
            surface,
            input,
            clock,
            bus,
            abort,
            timing,
            palette,
            state: TrialState::Idle,
        }
    }

    pub fn state(&self) -> TrialState {
        self.state
    }

    pub fn bus(&self) -> &MarkerBus {
        &self.bus
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn surface_mut(&mut self) -> &mut P {
        &mut self.surface
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_raised()
    }

    /// Stamps `code` with the current time and queues it.
    pub fn emit(&self, code: MarkerCode) {
        self.bus.emit(code, self.clock.now());
    }

    /// Sleeps for `d` in short slices, reading pending input between them.
    /// Returns `false` if aborted first.
    pub fn wait(&mut self, d: Duration) -> Result<bool, DeviceError> {
        let deadline = self.clock.now().saturating_add(d.as_nanos() as u64);
        loop {
            self.input.check_abort()?;
            if self.abort.is_raised() {
                return Ok(false);
            }
            let now = self.clock.now();
            if now >= deadline {
                return Ok(true);
            }
            self.clock
                .sleep(Duration::from_nanos(deadline - now).min(WAIT_SLICE));
        }
    }

    pub fn run_trial(&mut self, spec: &TrialSpec) -> Result<TrialOutcome, DeviceError> {
        let contrast = spec.contrast_mode;

        self.input.check_abort()?;
        if self.abort.is_raised() {
            return Ok(self.abandon(spec));
        }
        if !self.timing.fixation.is_zero() {
            self.enter(TrialState::Fixation);
            self.surface.draw_fixation()?;
            if !self.wait(self.timing.fixation)? {
                return Ok(self.abandon(spec));
            }
        }
        if !self.timing.blank.is_zero() {
            self.surface.clear()?;
            if !self.wait(self.timing.blank)? {
                return Ok(self.abandon(spec));
            }
        }

        self.input.discard_pending()?;
        self.enter(TrialState::StimulusOnset);
        let requested = self.clock.now();
        let onset = self.surface.draw_stimulus(&spec.stimulus)?;
        self.clock
            .record_frame(Duration::from_nanos(onset.saturating_sub(requested)));
        self.bus
            .emit(MarkerCode::Onset(contrast, spec.stimulus.congruency()), onset);

        self.enter(TrialState::AwaitingResponse);
        let result = match self.await_response(onset)? {
            Response::Key(ev) => {
                let r = TrialResult::responded(
                    spec.clone(),
                    onset,
                    ev.key.to_ascii_lowercase(),
                    ev.timestamp_ns,
                );
                self.bus.emit(
                    MarkerCode::Response {
                        contrast,
                        correct: r.is_correct(),
                    },
                    ev.timestamp_ns,
                );
                r
            }
            Response::Timeout => {
                self.emit(MarkerCode::Timeout(contrast));
                TrialResult::timed_out(spec.clone(), onset)
            }
            Response::Aborted => return Ok(self.abandon(spec)),
        };

        if spec.feedback_enabled {
            self.enter(TrialState::Feedback);
            let kind = FeedbackKind::for_response(result.correct());
            self.surface.draw_feedback(kind)?;
            self.emit(MarkerCode::Feedback(contrast, kind));
            if !self.wait(self.timing.feedback)? {
                return Ok(self.abandon(spec));
            }
        }

        self.enter(TrialState::Iti);
        self.surface.clear()?;
        self.emit(MarkerCode::ItiStart(contrast));
        let iti = Duration::try_from_secs_f64(spec.iti_ms / 1000.0).unwrap_or_default();
        if !self.wait(iti)? {
            return Ok(self.abandon(spec));
        }

        self.enter(TrialState::Idle);
        debug!(
            trial = spec.index,
            block = spec.block_index,
            condition = %spec.stimulus.condition_code(),
            key = ?result.response_key(),
            rt_ms = ?result.reaction_time_ms(),
            correct = ?result.correct(),
            "trial complete"
        );
        Ok(TrialOutcome::Completed(result))
    }

    /// Shows the rest screen after block `block_number` (1-based).
    /// Returns `false` if aborted during the rest.
    pub fn rest(&mut self, block_number: usize, ms: f64) -> Result<bool, DeviceError> {
        info!(after_block = block_number, secs = ms / 1000.0, "rest period");
        self.emit(MarkerCode::RestStart(block_number));
        self.surface.draw_rest()?;
        let done = self.wait(Duration::try_from_secs_f64(ms / 1000.0).unwrap_or_default())?;
        if done {
            self.emit(MarkerCode::RestEnd(block_number));
            self.surface.clear()?;
        }
        Ok(done)
    }

    /// Terminal state; no more trials run.
    pub fn finish(&mut self) {
        self.enter(TrialState::RunComplete);
    }

    fn await_response(&mut self, onset: u64) -> Result<Response, DeviceError> {
        let deadline = onset.saturating_add(self.timing.response_timeout.as_nanos() as u64);
        loop {
            if self.abort.is_raised() {
                return Ok(Response::Aborted);
            }
            let now = self.clock.now();
            if now >= deadline {
                return Ok(Response::Timeout);
            }
            let slice = Duration::from_nanos(deadline - now).min(WAIT_SLICE);
            match self.input.poll_key(slice)? {
                Some(ev) if ev.timestamp_ns > deadline => return Ok(Response::Timeout),
                Some(ev) if self.palette.contains_key(ev.key) => return Ok(Response::Key(ev)),
                Some(ev) => trace!(key = ?ev.key, "ignoring key outside the response set"),
                None => {}
            }
        }
    }

    fn abandon(&mut self, spec: &TrialSpec) -> TrialOutcome {
        info!(trial = spec.index, state = ?self.state, "abort raised, discarding trial");
        self.enter(TrialState::RunComplete);
        TrialOutcome::Aborted
    }

    fn enter(&mut self, next: TrialState) {
        trace!(from = ?self.state, to = ?next, "trial state");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use stroop_core::{ColorName, ContrastMode, StimulusItem};
    use stroop_sync::{BusOptions, MarkerStream, MemoryTransport};
    use stroop_timing::ManualTimer;

    /// Frame appears 2 ms after the draw call.
    struct Screen {
        clock: ManualTimer,
        feedback: Vec<FeedbackKind>,
        clears: usize,
        abort_on_clear: Option<(usize, AbortSignal)>,
    }

    impl PresentationSurface for Screen {
        fn draw_fixation(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn draw_stimulus(&mut self, _item: &StimulusItem) -> Result<u64, DeviceError> {
            self.clock.advance(Duration::from_millis(2));
            Ok(self.clock.now())
        }
        fn draw_feedback(&mut self, kind: FeedbackKind) -> Result<(), DeviceError> {
            self.feedback.push(kind);
            Ok(())
        }
        fn draw_rest(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn show_message(&mut self, _text: &str) -> Result<(), DeviceError> {
            Ok(())
        }
        fn clear(&mut self) -> Result<(), DeviceError> {
            self.clears += 1;
            if let Some((n, signal)) = &self.abort_on_clear {
                if self.clears == *n {
                    signal.raise();
                }
            }
            Ok(())
        }
    }

    /// Presses each scripted key after its delay; `None` stays silent.
    struct Keys {
        clock: ManualTimer,
        script: VecDeque<Option<(char, u64)>>,
        armed: Option<(char, u64)>,
        abort_after_ms: Option<(u64, AbortSignal)>,
    }

    impl InputBackend for Keys {
        fn poll_key(&mut self, timeout: Duration) -> Result<Option<KeyEvent>, DeviceError> {
            if let Some((ms, signal)) = &self.abort_after_ms {
                if self.clock.now() >= ms * 1_000_000 {
                    signal.raise();
                }
            }
            let Some((key, at)) = self.armed else {
                self.clock.sleep(timeout);
                return Ok(None);
            };
            let now = self.clock.now();
            if at <= now + timeout.as_nanos() as u64 {
                self.clock.set(at.max(now));
                self.armed = None;
                return Ok(Some(KeyEvent {
                    key,
                    timestamp_ns: self.clock.now(),
                }));
            }
            self.clock.sleep(timeout);
            Ok(None)
        }

        fn discard_pending(&mut self) -> Result<(), DeviceError> {
            // Next scripted press is relative to the upcoming onset (+2 ms frame).
            self.armed = self
                .script
                .pop_front()
                .flatten()
                .map(|(k, rt_ms)| (k, self.clock.now() + 2_000_000 + rt_ms * 1_000_000));
            Ok(())
        }
    }

    fn spec(feedback: bool) -> TrialSpec {
        TrialSpec {
            index: 0,
            block_index: 0,
            stimulus: StimulusItem::new(ColorName::Red, ColorName::Green, ContrastMode::LowContrast),
            iti_ms: 1000.0,
            feedback_enabled: feedback,
            contrast_mode: ContrastMode::LowContrast,
        }
    }

    const ESC: char = '\u{1b}';

    /// Keys typed at fixed times. Like a terminal, Esc only raises the
    /// abort signal once the queue is read.
    struct TypedKeys {
        clock: ManualTimer,
        abort: AbortSignal,
        typed: VecDeque<(char, u64)>,
    }

    impl TypedKeys {
        fn read(&mut self) -> Option<KeyEvent> {
            let now = self.clock.now();
            while let Some(&(key, at)) = self.typed.front() {
                if at > now {
                    break;
                }
                self.typed.pop_front();
                if key == ESC {
                    self.abort.raise();
                } else {
                    return Some(KeyEvent {
                        key,
                        timestamp_ns: at,
                    });
                }
            }
            None
        }
    }

    impl InputBackend for TypedKeys {
        fn poll_key(&mut self, timeout: Duration) -> Result<Option<KeyEvent>, DeviceError> {
            if let Some(ev) = self.read() {
                return Ok(Some(ev));
            }
            self.clock.sleep(timeout);
            Ok(self.read())
        }

        fn discard_pending(&mut self) -> Result<(), DeviceError> {
            while self.read().is_some() {}
            Ok(())
        }

        fn check_abort(&mut self) -> Result<(), DeviceError> {
            self.discard_pending()
        }
    }

    fn ms(v: u64) -> u64 {
        v * 1_000_000
    }

    fn runner_with<I: InputBackend>(
        make_input: impl FnOnce(ManualTimer, AbortSignal) -> I,
    ) -> (TrialRunner<Screen, I, ManualTimer>, ManualTimer, MemoryTransport, AbortSignal) {
        let clock = ManualTimer::new();
        let transport = MemoryTransport::new();
        let bus = MarkerBus::start(
            transport.clone(),
            clock.clone(),
            BusOptions {
                keepalive: None,
                ..BusOptions::default()
            },
        );
        let abort = AbortSignal::new();
        let screen = Screen {
            clock: clock.clone(),
            feedback: Vec::new(),
            clears: 0,
            abort_on_clear: None,
        };
        let input = make_input(clock.clone(), abort.clone());
        let timing = TrialTiming {
            fixation: Duration::from_millis(500),
            blank: Duration::from_millis(100),
            response_timeout: Duration::from_millis(2000),
            feedback: Duration::from_millis(500),
        };
        let r = TrialRunner::new(screen, input, clock.clone(), bus, abort.clone(), timing, Palette::default());
        (r, clock, transport, abort)
    }

    fn runner(
        script: Vec<Option<(char, u64)>>,
    ) -> (TrialRunner<Screen, Keys, ManualTimer>, ManualTimer, MemoryTransport, AbortSignal) {
        runner_with(|clock, _| Keys {
            clock,
            script: script.into(),
            armed: None,
            abort_after_ms: None,
        })
    }

    fn typed_runner(
        typed: Vec<(char, u64)>,
    ) -> (TrialRunner<Screen, TypedKeys, ManualTimer>, ManualTimer, MemoryTransport, AbortSignal) {
        runner_with(|clock, abort| TypedKeys {
            clock,
            abort,
            typed: typed.into(),
        })
    }

    fn event_codes(bus: &MarkerBus, transport: &MemoryTransport) -> Vec<String> {
        assert!(bus.drain(Duration::from_secs(2)));
        transport
            .delivered_on(MarkerStream::Events)
            .iter()
            .map(|m| m.code.wire())
            .collect()
    }

    #[test]
    fn correct_response_with_feedback() {
        let (mut r, clock, transport, _) = runner(vec![Some(('G', 640))]);
        let outcome = r.run_trial(&spec(true)).unwrap();
        let TrialOutcome::Completed(result) = outcome else {
            panic!("trial aborted");
        };
        assert_eq!(result.response_key(), Some('g'));
        assert_eq!(result.correct(), Some(true));
        assert_eq!(result.reaction_time_ms(), Some(640.0));
        // fixation + blank + frame
        assert_eq!(result.onset_ns(), 602_000_000);
        assert_eq!(r.state(), TrialState::Idle);
        assert_eq!(r.surface_mut().feedback, vec![FeedbackKind::Correct]);
        // onset + rt + feedback + iti
        assert_eq!(clock.now(), 602_000_000 + 640_000_000 + 500_000_000 + 1_000_000_000);
        assert_eq!(event_codes(r.bus(), &transport), vec!["102", "103", "106", "108"]);
        assert_eq!(r.clock().timing_stats().samples, 1);
    }

    #[test]
    fn silence_times_out() {
        let (mut r, _clock, transport, _) = runner(vec![None]);
        let TrialOutcome::Completed(result) = r.run_trial(&spec(false)).unwrap() else {
            panic!("trial aborted");
        };
        assert!(result.is_timed_out());
        assert_eq!(result.response_key(), None);
        assert_eq!(result.reaction_time_ms(), None);
        assert_eq!(result.correct(), None);
        assert_eq!(event_codes(r.bus(), &transport), vec!["102", "105", "108"]);
    }

    #[test]
    fn timeout_feedback_reports_no_response() {
        let (mut r, _clock, transport, _) = runner(vec![None]);
        r.run_trial(&spec(true)).unwrap();
        assert_eq!(r.surface_mut().feedback, vec![FeedbackKind::NoResponse]);
        assert_eq!(event_codes(r.bus(), &transport), vec!["102", "105", "109", "108"]);
    }

    #[test]
    fn keys_outside_the_palette_are_ignored() {
        let (mut r, _clock, _transport, _) = runner(vec![Some(('x', 300))]);
        let TrialOutcome::Completed(result) = r.run_trial(&spec(false)).unwrap() else {
            panic!("trial aborted");
        };
        assert!(result.is_timed_out());
    }

    #[test]
    fn abort_during_iti_discards_the_trial() {
        let (mut r, _clock, transport, abort) = runner(vec![Some(('r', 400))]);
        // First clear is the blank, second opens the ITI.
        r.surface.abort_on_clear = Some((2, abort.clone()));
        let outcome = r.run_trial(&spec(false)).unwrap();
        assert_eq!(outcome, TrialOutcome::Aborted);
        assert_eq!(r.state(), TrialState::RunComplete);
        assert_eq!(event_codes(r.bus(), &transport), vec!["102", "104", "108"]);
    }

    #[test]
    fn abort_while_waiting_for_a_key() {
        let (mut r, _clock, _transport, abort) = runner(vec![None]);
        r.input.abort_after_ms = Some((1_000, abort.clone()));
        assert_eq!(r.run_trial(&spec(false)).unwrap(), TrialOutcome::Aborted);
        assert!(r.is_aborted());
    }

    #[test]
    fn rest_emits_start_and_end() {
        let (mut r, clock, transport, _) = runner(vec![]);
        assert!(r.rest(3, 20_000.0).unwrap());
        assert_eq!(clock.now(), 20_000_000_000);
        assert_eq!(event_codes(r.bus(), &transport), vec!["3003", "4003"]);
    }

    #[test]
    fn escape_typed_during_the_iti_aborts_the_trial() {
        // Onset at 602 ms, answered at 1002 ms, ITI runs to 2002 ms.
        let (mut r, clock, transport, abort) =
            typed_runner(vec![('g', ms(1002)), (ESC, ms(1400))]);
        assert_eq!(r.run_trial(&spec(false)).unwrap(), TrialOutcome::Aborted);
        assert!(abort.is_raised());
        assert_eq!(r.state(), TrialState::RunComplete);
        assert!(clock.now() >= ms(1400) && clock.now() <= ms(1410), "{}", clock.now());
        assert_eq!(event_codes(r.bus(), &transport), vec!["102", "103", "108"]);
    }

    #[test]
    fn escape_typed_between_trials_stops_before_the_next_onset() {
        let (mut r, _clock, transport, _) = typed_runner(vec![(ESC, 0)]);
        assert_eq!(r.run_trial(&spec(true)).unwrap(), TrialOutcome::Aborted);
        assert_eq!(r.surface_mut().clears, 0);
        assert!(event_codes(r.bus(), &transport).is_empty());
    }

    #[test]
    fn escape_typed_during_rest_ends_it_early() {
        let (mut r, clock, transport, _) = typed_runner(vec![(ESC, ms(5000))]);
        assert!(!r.rest(2, 20_000.0).unwrap());
        assert!(clock.now() < ms(5010), "{}", clock.now());
        assert_eq!(event_codes(r.bus(), &transport), vec!["3002"]);
    }
}
