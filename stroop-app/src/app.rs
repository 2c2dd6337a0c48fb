use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stroop_core::ContrastMode;
use stroop_experiment::{
    AbortSignal, BlockPlanner, ContrastSelection, Experiment, InputBackend, PresentationSurface,
    RunConfig, RunPlan, RunReport, TrialRunner, TrialTiming,
};
use stroop_record::{CsvSink, SessionInfo, SessionRecorder};
use stroop_sync::{BusOptions, MarkerBus, UdpTransport};
use stroop_timing::{HighPrecisionTimer, ManualTimer, Timer};
use tracing::info;

use crate::simulate::{ResponseModel, simulated_devices};
use crate::terminal::{TerminalKeyboard, TerminalSurface};

/// How the session is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Terminal,
    Simulated { fast: bool },
}

/// Where the data went.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub report: RunReport,
    pub seed: u64,
    pub raw_path: PathBuf,
    pub summary_path: PathBuf,
}

pub struct App {
    config: RunConfig,
    mode: Mode,
    seed: u64,
    plan: RunPlan,
}

impl App {
    /// Validates the configuration and plans every block before anything is
    /// shown.
    pub fn new(config: RunConfig, mode: Mode) -> Result<Self> {
        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        let plan = BlockPlanner::new(&config)
            .plan(&mut StdRng::seed_from_u64(seed))
            .context("invalid run configuration")?;
        info!(
            seed,
            paradigm = %config.paradigm,
            blocks = plan.blocks.len(),
            trials = plan.total_trials(),
            "session planned"
        );
        Ok(Self {
            config,
            mode,
            seed,
            plan,
        })
    }

    pub fn plan(&self) -> &RunPlan {
        &self.plan
    }

    /// Runs the session. Returns `None` if the experimenter quit at the
    /// start screen.
    pub fn run(self) -> Result<Option<Outcome>> {
        match self.mode {
            Mode::Terminal => {
                let clock = HighPrecisionTimer::new();
                let abort = AbortSignal::new();
                let mut surface =
                    TerminalSurface::open(clock.clone()).context("opening terminal")?;
                let mut keyboard = TerminalKeyboard::new(clock.clone(), abort.clone());
                surface.show_message(&instructions(&self.config))?;
                if !keyboard.wait_for_start()? {
                    info!("quit before the first trial");
                    return Ok(None);
                }
                self.execute(surface, keyboard, clock, abort).map(Some)
            }
            Mode::Simulated { fast } => {
                let rng = StdRng::seed_from_u64(self.seed.wrapping_add(1));
                let palette = self.config.palette.clone();
                if fast {
                    let clock = ManualTimer::new();
                    let (screen, participant) =
                        simulated_devices(clock.clone(), ResponseModel::default(), palette, rng);
                    self.execute(screen, participant, clock, AbortSignal::new())
                        .map(Some)
                } else {
                    let clock = HighPrecisionTimer::new();
                    let (screen, participant) =
                        simulated_devices(clock.clone(), ResponseModel::default(), palette, rng);
                    self.execute(screen, participant, clock, AbortSignal::new())
                        .map(Some)
                }
            }
        }
    }

    fn execute<P, I, C>(self, surface: P, input: I, clock: C, abort: AbortSignal) -> Result<Outcome>
    where
        P: PresentationSurface,
        I: InputBackend,
        C: Timer + 'static,
    {
        let Self {
            config, seed, plan, ..
        } = self;
        let info = SessionInfo {
            participant: config.participant.clone(),
            session: config.session.clone(),
            paradigm: config.paradigm,
        };
        let sink = CsvSink::create(&config.output_dir, &info).with_context(|| {
            format!("preparing output files in {}", config.output_dir.display())
        })?;
        let raw_path = sink.raw_path().to_path_buf();
        let summary_path = sink.summary_path().to_path_buf();

        let bus = start_bus(&config, clock.clone())?;
        let runner = TrialRunner::new(
            surface,
            input,
            clock,
            bus,
            abort,
            TrialTiming::from_config(&config),
            config.palette.clone(),
        );
        let recorder = SessionRecorder::new(info, sink);
        let mut experiment = Experiment::new(plan, runner, recorder);
        let report = experiment.run().context("session failed")?;

        Ok(Outcome {
            report,
            seed,
            raw_path,
            summary_path,
        })
    }
}

fn start_bus<C: Timer + 'static>(config: &RunConfig, clock: C) -> Result<MarkerBus> {
    let Some(address) = &config.sync.address else {
        info!("marker sending disabled; markers are logged locally");
        return Ok(MarkerBus::local_only());
    };
    let target = address
        .to_socket_addrs()
        .with_context(|| format!("resolving marker address {address}"))?
        .next()
        .ok_or_else(|| anyhow!("marker address {address} resolved to nothing"))?;
    let opts = BusOptions {
        keepalive: (config.sync.keepalive_secs > 0)
            .then(|| Duration::from_secs(config.sync.keepalive_secs)),
        ..BusOptions::default()
    };
    Ok(MarkerBus::start(UdpTransport::new(target), clock, opts))
}

/// Start screen text for the configured palette and contrast.
pub fn instructions(config: &RunConfig) -> String {
    let keys: Vec<String> = config
        .palette
        .colors()
        .iter()
        .map(|c| format!("{} = {}", c.response_key().to_ascii_uppercase(), c.name()))
        .collect();
    let version = match config.contrast {
        ContrastSelection::HighContrast => contrast_title(ContrastMode::HighContrast),
        ContrastSelection::LowContrast => contrast_title(ContrastMode::LowContrast),
        ContrastSelection::Both => "MIXED CONTRAST".to_string(),
    };
    let mut text = String::from(
        "Welcome to the Stroop Task!\n\n\
         You will see color words printed in different colors.\n\
         Respond to the COLOR of the text, not the word itself.\n\n",
    );
    text.push_str(&keys.join("\n"));
    text.push_str(&format!("\n\nThis is the {version} version of the task.\n"));
    if config.rest.is_some() {
        text.push_str("There will be short rest screens between blocks.\n");
    }
    text.push_str("\nPress SPACE to start. (Press ESC at any time to exit)");
    text
}

fn contrast_title(mode: ContrastMode) -> String {
    format!("{} CONTRAST", mode.label().to_uppercase())
}
