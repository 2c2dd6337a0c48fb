use std::time::Duration;

use stroop_core::{BlockSpec, TrialState};
use stroop_record::{RunStatus, SessionRecorder, SessionSummary, TrialSink};
use stroop_sync::{BusStats, MarkerCode, MarkerStream};
use stroop_timing::{Timer, TimingStats};
use tracing::{error, info, warn};

use crate::devices::{InputBackend, PresentationSurface};
use crate::error::RunError;
use crate::planner::RunPlan;
use crate::state::{TrialOutcome, TrialRunner};

const TEST_PULSES: u8 = 5;
const TEST_PULSE_GAP: Duration = Duration::from_millis(100);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// What happened, for the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub status: RunStatus,
    pub trials_planned: usize,
    pub trials_completed: usize,
    pub blocks_completed: usize,
    pub fallback_blocks: usize,
    pub summary: SessionSummary,
    /// Draw request to confirmed frame, per onset.
    pub onset_latency: TimingStats,
    pub markers: BusStats,
}

/// One session: the plan, the runner that executes it and the recorder
/// that keeps the results.
pub struct Experiment<P, I, C, S: TrialSink> {
    plan: RunPlan,
    runner: TrialRunner<P, I, C>,
    recorder: SessionRecorder<S>,
    blocks_completed: usize,
}

impl<P, I, C, S> Experiment<P, I, C, S>
where
    P: PresentationSurface,
    I: InputBackend,
    C: Timer,
    S: TrialSink,
{
    pub fn new(plan: RunPlan, runner: TrialRunner<P, I, C>, recorder: SessionRecorder<S>) -> Self {
        Self {
            plan,
            runner,
            recorder,
            blocks_completed: 0,
        }
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    pub fn recorder(&self) -> &SessionRecorder<S> {
        &self.recorder
    }

    pub fn runner(&self) -> &TrialRunner<P, I, C> {
        &self.runner
    }

    /// Runs every planned trial in order, or until aborted.
    ///
    /// Results are flushed after each block and once more at the end, aborted
    /// or not. On error the recorder still holds every completed trial.
    pub fn run(&mut self) -> Result<RunReport, RunError> {
        info!(
            participant = %self.recorder.info().participant,
            session = %self.recorder.info().session,
            paradigm = %self.recorder.info().paradigm,
            blocks = self.plan.blocks.len(),
            trials = self.plan.total_trials(),
            "session starting"
        );
        self.announce();

        let status = match self.run_blocks() {
            Ok(status) => status,
            Err(e) => {
                error!("run halted: {e}");
                self.close(RunStatus::Aborted);
                if let Err(pe) = self.recorder.finalize(RunStatus::Aborted) {
                    error!("could not save partial data: {pe}");
                }
                return Err(e);
            }
        };

        self.close(status);
        let summary = self.recorder.finalize(status)?;
        let report = RunReport {
            status,
            trials_planned: self.plan.total_trials(),
            trials_completed: self.recorder.results().len(),
            blocks_completed: self.blocks_completed,
            fallback_blocks: self.plan.fallbacks(),
            summary,
            onset_latency: self.runner.clock().timing_stats(),
            markers: self.runner.bus().stats(),
        };
        log_report(&report);

        let farewell = match status {
            RunStatus::Complete => "Thank you! The task is complete.",
            RunStatus::Aborted => "The task was stopped.",
        };
        if let Err(e) = self.runner.surface_mut().show_message(farewell) {
            warn!("could not show closing message: {e}");
        }
        Ok(report)
    }

    /// Housekeeping markers ahead of the first block.
    fn announce(&self) {
        let r = &self.runner;
        r.emit(MarkerCode::SystemInit);
        for stream in MarkerStream::ALL {
            r.emit(MarkerCode::StreamConnect(stream));
        }
        for i in 0..TEST_PULSES {
            r.emit(MarkerCode::TestPulse(i));
            r.clock().sleep(TEST_PULSE_GAP);
        }
        r.emit(MarkerCode::ExperimentStart);
    }

    fn run_blocks(&mut self) -> Result<RunStatus, RunError> {
        let Self {
            plan,
            runner,
            recorder,
            blocks_completed,
        } = self;

        for block in &plan.blocks {
            if runner.is_aborted() {
                return Ok(RunStatus::Aborted);
            }
            let n = block.index() + 1;
            log_block_start(block);
            runner.emit(MarkerCode::BlockStart(n));

            for spec in block.trials() {
                match runner.run_trial(spec)? {
                    TrialOutcome::Completed(result) => recorder.record(result),
                    TrialOutcome::Aborted => {
                        info!(block = n, completed = recorder.results().len(), "run aborted");
                        return Ok(RunStatus::Aborted);
                    }
                }
            }

            runner.emit(MarkerCode::BlockEnd(n));
            recorder.flush()?;
            *blocks_completed += 1;
            info!(block = n, "block complete");

            if let Some(ms) = block.rest_after_ms() {
                if !runner.rest(n, ms)? {
                    return Ok(RunStatus::Aborted);
                }
            }
        }
        Ok(RunStatus::Complete)
    }

    fn close(&mut self, status: RunStatus) {
        if self.runner.state() != TrialState::RunComplete {
            self.runner.finish();
        }
        self.runner.emit(MarkerCode::ExperimentComplete);
        if !self.runner.bus().drain(DRAIN_TIMEOUT) {
            warn!("marker queue did not drain before shutdown");
        }
        info!(%status, "session closed");
    }
}

fn log_block_start(block: &BlockSpec) {
    info!(
        block = block.index() + 1,
        contrast = %block.contrast_mode(),
        length = block.length(),
        congruent = block.congruent_count(),
        ratio = block.congruency_ratio(),
        "block starting"
    );
}

fn log_report(r: &RunReport) {
    info!(
        status = %r.status,
        trials = r.trials_completed,
        planned = r.trials_planned,
        accuracy = r.summary.accuracy,
        timeouts = r.summary.n_timeouts,
        "run finished"
    );
    info!(
        samples = r.onset_latency.samples,
        mean_ms = r.onset_latency.mean_ns / 1e6,
        jitter_ms = r.onset_latency.jitter_ns / 1e6,
        max_ms = r.onset_latency.max_ns / 1e6,
        "onset latency"
    );
    info!(
        connected = r.markers.connected,
        sent = r.markers.sent,
        failed = r.markers.failed,
        dropped = r.markers.dropped,
        local_only = r.markers.local_only,
        "marker delivery"
    );
}
