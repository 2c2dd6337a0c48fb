use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use stroop_core::{FeedbackKind, Paradigm, StimulusItem, TrialState};
use stroop_experiment::{
    AbortSignal, BlockPlanner, DeviceError, Experiment, InputBackend, ItiPolicy, KeyEvent,
    PresentationSurface, RestConfig, RestPlacement, RunConfig, RunError, TrialRunner,
    TrialTiming,
};
use stroop_record::{CsvSink, MemorySink, RunStatus, SessionInfo, SessionRecorder, TrialSink};
use stroop_sync::{BusOptions, MarkerBus, MarkerStream, MemoryTransport};
use stroop_timing::{ManualTimer, Timer};

#[derive(Default)]
struct Screen {
    stimuli: Vec<StimulusItem>,
    /// Stimulus on screen and its onset, until the participant answers.
    showing: Option<(StimulusItem, u64)>,
    rests: usize,
    messages: Vec<String>,
    abort_in_iti_of: Option<(usize, AbortSignal)>,
}

/// Shared between the scripted screen and the scripted participant.
type Shared = Rc<RefCell<Screen>>;

struct ScriptedSurface {
    clock: ManualTimer,
    screen: Shared,
}

impl PresentationSurface for ScriptedSurface {
    fn draw_fixation(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn draw_stimulus(&mut self, item: &StimulusItem) -> Result<u64, DeviceError> {
        self.clock.advance(Duration::from_millis(1));
        let onset = self.clock.now();
        let mut s = self.screen.borrow_mut();
        s.stimuli.push(*item);
        s.showing = Some((*item, onset));
        Ok(onset)
    }

    fn draw_feedback(&mut self, _kind: FeedbackKind) -> Result<(), DeviceError> {
        Ok(())
    }

    fn draw_rest(&mut self) -> Result<(), DeviceError> {
        self.screen.borrow_mut().rests += 1;
        Ok(())
    }

    fn show_message(&mut self, text: &str) -> Result<(), DeviceError> {
        self.screen.borrow_mut().messages.push(text.to_string());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DeviceError> {
        let s = self.screen.borrow();
        if let Some((trial, signal)) = &s.abort_in_iti_of {
            // The clear after trial `trial`'s stimulus opens its ITI.
            if s.stimuli.len() == *trial {
                signal.raise();
            }
        }
        Ok(())
    }
}

/// Answers correctly after `rt_ms`, except every `silent_every`-th trial.
struct ScriptedParticipant {
    clock: ManualTimer,
    screen: Shared,
    rt_ms: u64,
    silent_every: usize,
}

impl InputBackend for ScriptedParticipant {
    fn poll_key(&mut self, timeout: Duration) -> Result<Option<KeyEvent>, DeviceError> {
        let mut s = self.screen.borrow_mut();
        let trial = s.stimuli.len();
        let silent = self.silent_every > 0 && trial % self.silent_every == 0;
        if let (Some((item, onset)), false) = (s.showing, silent) {
            let at = onset + self.rt_ms * 1_000_000;
            let now = self.clock.now();
            if at <= now + timeout.as_nanos() as u64 {
                self.clock.set(at.max(now));
                s.showing = None;
                return Ok(Some(KeyEvent {
                    key: item.correct_key(),
                    timestamp_ns: self.clock.now(),
                }));
            }
        }
        self.clock.sleep(timeout);
        Ok(None)
    }

    fn discard_pending(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

struct Rig<S: TrialSink> {
    experiment: Experiment<ScriptedSurface, ScriptedParticipant, ManualTimer, S>,
    screen: Shared,
    abort: AbortSignal,
}

fn info(config: &RunConfig) -> SessionInfo {
    SessionInfo {
        participant: config.participant.clone(),
        session: config.session.clone(),
        paradigm: config.paradigm,
    }
}

fn rig<S: TrialSink>(config: &RunConfig, transport: MemoryTransport, sink: S) -> Rig<S> {
    let plan = BlockPlanner::new(config)
        .plan(&mut StdRng::seed_from_u64(7))
        .expect("valid config");
    let clock = ManualTimer::new();
    let bus = MarkerBus::start(
        transport,
        clock.clone(),
        BusOptions {
            keepalive: None,
            connect_retry_delay: Duration::ZERO,
            ..BusOptions::default()
        },
    );
    let screen: Shared = Rc::default();
    let abort = AbortSignal::new();
    let surface = ScriptedSurface {
        clock: clock.clone(),
        screen: screen.clone(),
    };
    let participant = ScriptedParticipant {
        clock: clock.clone(),
        screen: screen.clone(),
        rt_ms: 550,
        silent_every: 4,
    };
    let runner = TrialRunner::new(
        surface,
        participant,
        clock,
        bus,
        abort.clone(),
        TrialTiming::from_config(config),
        config.palette.clone(),
    );
    let recorder = SessionRecorder::new(info(config), sink);
    Rig {
        experiment: Experiment::new(plan, runner, recorder),
        screen,
        abort,
    }
}

fn two_block_config(paradigm: Paradigm) -> RunConfig {
    let mut c = RunConfig::preset(paradigm);
    c.block_lengths = vec![8, 8];
    c.rest = Some(RestConfig {
        duration: ItiPolicy::fixed(2000.0),
        placement: RestPlacement::BetweenBlocks,
    });
    c
}

fn codes(transport: &MemoryTransport, stream: MarkerStream) -> Vec<String> {
    transport
        .delivered_on(stream)
        .iter()
        .map(|m| m.code.wire())
        .collect()
}

#[test]
fn standard_session_runs_every_trial_in_order() {
    let config = two_block_config(Paradigm::Standard);
    let transport = MemoryTransport::new();
    let mut rig = rig(&config, transport.clone(), MemorySink::new());

    let report = rig.experiment.run().unwrap();
    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.trials_planned, 16);
    assert_eq!(report.trials_completed, 16);
    assert_eq!(report.blocks_completed, 2);
    assert_eq!(report.summary.n_timeouts, 4);
    assert_eq!(report.summary.accuracy, 12.0 / 16.0);
    assert_eq!(report.onset_latency.samples, 16);
    assert_eq!(report.onset_latency.mean_ns, 1_000_000.0);

    let recorder = rig.experiment.recorder();
    let order: Vec<usize> = recorder.results().iter().map(|r| r.spec().index).collect();
    assert_eq!(order, (0..16).collect::<Vec<_>>());
    let planned: Vec<StimulusItem> = rig
        .experiment
        .plan()
        .blocks
        .iter()
        .flat_map(|b| b.trials().iter().map(|t| t.stimulus))
        .collect();
    assert_eq!(rig.screen.borrow().stimuli, planned);
    assert_eq!(rig.screen.borrow().rests, 1);

    let sink = recorder.sink();
    assert_eq!(sink.rows.len(), 16);
    assert_eq!(sink.append_calls, 2);
    assert_eq!(sink.summaries.len(), 1);
    assert_eq!(sink.summaries[0].0, RunStatus::Complete);
    assert_eq!(rig.experiment.runner().state(), TrialState::RunComplete);

    let control = codes(&transport, MarkerStream::Control);
    assert_eq!(
        control,
        ["900", "901", "902", "800", "801", "802", "803", "804"]
    );

    let events = codes(&transport, MarkerStream::Events);
    assert_eq!(&events[..2], ["0", "1001"]);
    assert_eq!(&events[events.len() - 2..], ["2002", "999"]);
    let rest = events.iter().position(|c| c == "3001").unwrap();
    assert_eq!(&events[rest - 1..rest + 3], ["2001", "3001", "4001", "1002"]);

    let count = |set: &[&str]| events.iter().filter(|c| set.contains(&c.as_str())).count();
    assert_eq!(count(&["201", "202"]), 16);
    assert_eq!(count(&["203", "204", "205"]), 16);
    assert_eq!(count(&["205"]), 4);
    assert_eq!(count(&["206", "207", "209"]), 16);
    assert_eq!(count(&["208"]), 16);
    assert!(rig.screen.borrow().messages.iter().any(|m| m.contains("complete")));
}

#[test]
fn abort_mid_iti_keeps_completed_trials_only() {
    let mut config = two_block_config(Paradigm::RandomizedIti);
    config.rest = None;
    let transport = MemoryTransport::new();
    let mut rig = rig(&config, transport.clone(), MemorySink::new());
    rig.screen.borrow_mut().abort_in_iti_of = Some((11, rig.abort.clone()));

    let report = rig.experiment.run().unwrap();
    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(report.trials_completed, 10);
    assert_eq!(report.blocks_completed, 1);

    let recorder = rig.experiment.recorder();
    assert_eq!(recorder.pending(), 0);
    let rows: Vec<usize> = recorder.sink().rows.iter().map(|r| r.trial_index).collect();
    assert_eq!(rows, (0..10).collect::<Vec<_>>());
    assert_eq!(recorder.sink().summaries[0].0, RunStatus::Aborted);
    assert_eq!(rig.experiment.runner().state(), TrialState::RunComplete);

    let events = codes(&transport, MarkerStream::Events);
    assert!(events.contains(&"1002".to_string()));
    assert!(!events.contains(&"2002".to_string()));
    assert_eq!(events.last().map(String::as_str), Some("999"));
    // Eleven onsets went out, the eleventh trial was never recorded.
    assert_eq!(events.iter().filter(|c| *c == "201" || *c == "202").count(), 11);
}

#[test]
fn failed_flush_halts_the_run_but_keeps_results() {
    let config = two_block_config(Paradigm::RandomizedIti);
    let mut sink = MemorySink::new();
    sink.fail_next(2);
    let mut rig = rig(&config, MemoryTransport::new(), sink);

    let err = rig.experiment.run().unwrap_err();
    assert!(matches!(err, RunError::Persistence(_)), "{err}");

    let recorder = rig.experiment.recorder();
    assert_eq!(recorder.results().len(), 8);
    // The shutdown path retried and saved what it had.
    assert_eq!(recorder.sink().rows.len(), 8);
    assert_eq!(recorder.sink().summaries[0].0, RunStatus::Aborted);
}

#[test]
fn missing_marker_stream_does_not_stop_the_run() {
    let mut config = two_block_config(Paradigm::Extended);
    config.block_lengths = vec![15, 15];
    let mut rig = rig(&config, MemoryTransport::unreachable(), MemorySink::new());

    let report = rig.experiment.run().unwrap();
    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.trials_completed, 30);
    assert!(!report.markers.connected);
    assert!(report.markers.local_only > 0);
    assert_eq!(report.markers.sent, 0);
}

#[test]
fn merged_session_writes_csv_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RunConfig::preset(Paradigm::Merged);
    config.block_lengths = vec![8, 15];
    config.rest = None;
    config.participant = "P42".into();
    let sink = CsvSink::create(dir.path(), &info(&config)).unwrap();
    let raw = sink.raw_path().to_path_buf();
    let summary = sink.summary_path().to_path_buf();
    let mut rig = rig(&config, MemoryTransport::new(), sink);

    let report = rig.experiment.run().unwrap();
    assert_eq!(report.trials_completed, 23);

    let raw_text = std::fs::read_to_string(&raw).unwrap();
    assert_eq!(raw_text.lines().count(), 24);
    assert!(raw_text.lines().nth(1).unwrap().contains(",high,"));
    assert!(raw_text.lines().last().unwrap().contains(",low,"));
    assert!(raw.ends_with("stroop_merged_raw_P42_001.csv"));

    let summary_text = std::fs::read_to_string(&summary).unwrap();
    assert!(summary_text.contains("status,complete"));
    assert!(summary_text.contains("high_contrast_stroop_effect_ms"));
    assert!(summary_text.contains("low_contrast_stroop_effect_ms"));
}
