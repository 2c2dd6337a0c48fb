use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueHint};
use stroop_core::Paradigm;
use stroop_experiment::{RunConfig, RunConfigFile};

#[derive(Parser, Debug)]
#[command(name = "stroop", version, about = "Stroop task runner with marker synchronization")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a session on this terminal, or a simulated one
    Run(RunArgs),

    /// Print the block plan for a configuration as JSON
    Plan(PlanArgs),

    /// Log marker datagrams to CSV, for checking the sync path
    Listen(ListenArgs),
}

/// Where the run configuration comes from.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// standard, randomized-iti, extended or merged. Overrides the file.
    #[arg(long, short)]
    pub paradigm: Option<Paradigm>,

    /// JSON file with any subset of the run configuration
    #[arg(long, short, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Seed for stimulus order and ITI draws
    #[arg(long)]
    pub seed: Option<u64>,
}

impl ConfigArgs {
    /// Preset, then file overlay, then flags.
    pub fn resolve(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfigFile::load(path)
                .with_context(|| format!("loading {}", path.display()))?
                .resolve(self.paradigm),
            None => RunConfig::preset(self.paradigm.unwrap_or_default()),
        };
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        Ok(config)
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[arg(long)]
    pub participant: Option<String>,

    #[arg(long)]
    pub session: Option<String>,

    /// Directory for the raw and summary CSV files
    #[arg(long, short, value_hint = ValueHint::DirPath)]
    pub out: Option<PathBuf>,

    /// Marker receiver address (host:port)
    #[arg(long, conflicts_with = "no_markers")]
    pub marker_addr: Option<String>,

    /// Log markers locally instead of sending them
    #[arg(long)]
    pub no_markers: bool,

    /// Replace the participant and the screen with a response model
    #[arg(long)]
    pub simulate: bool,

    /// With --simulate: use a virtual clock so the session finishes at once
    #[arg(long, requires = "simulate")]
    pub fast: bool,
}

impl RunArgs {
    pub fn resolve(&self) -> Result<RunConfig> {
        let mut config = self.config.resolve()?;
        if let Some(p) = &self.participant {
            config.participant = p.clone();
        }
        if let Some(s) = &self.session {
            config.session = s.clone();
        }
        if let Some(out) = &self.out {
            config.output_dir = out.clone();
        }
        if let Some(addr) = &self.marker_addr {
            config.sync.address = Some(addr.clone());
        }
        if self.no_markers {
            config.sync.address = None;
        }
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ListenArgs {
    #[arg(long, default_value = "127.0.0.1:16571")]
    pub bind: SocketAddr,

    /// CSV destination; stdout when absent
    #[arg(long, short, value_hint = ValueHint::FilePath)]
    pub out: Option<PathBuf>,

    /// Stop after this many markers
    #[arg(long)]
    pub count: Option<usize>,
}
