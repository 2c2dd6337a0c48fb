mod app;
mod cli;
mod logging;
mod simulate;
mod terminal;

use std::fs::File;
use std::io::{self, Write};
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stroop_core::ContrastMode;
use stroop_experiment::BlockPlanner;
use stroop_sync::MarkerReceiver;

use app::{App, Mode, Outcome};
use cli::{Cli, Command, ListenArgs, PlanArgs, RunArgs};
use logging::LogTarget;

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args),
        Command::Plan(args) => plan(args),
        Command::Listen(args) => listen(args),
    }
}

fn run(args: RunArgs) -> Result<()> {
    let config = args.resolve()?;
    let mode = if args.simulate {
        Mode::Simulated { fast: args.fast }
    } else {
        Mode::Terminal
    };
    let target = match mode {
        Mode::Terminal => LogTarget::in_dir(&config.output_dir),
        Mode::Simulated { .. } => LogTarget::Stderr,
    };
    logging::init(&target)?;

    println!("=== STROOP TASK ===");
    println!("Platform: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    if let LogTarget::File(path) = &target {
        println!("Log: {}", path.display());
    }

    let app = App::new(config, mode)?;
    println!(
        "Planned: {} blocks, {} trials",
        app.plan().blocks.len(),
        app.plan().total_trials()
    );
    match app.run()? {
        Some(outcome) => print_outcome(&outcome),
        None => println!("Quit before the first trial. Nothing was recorded."),
    }
    Ok(())
}

fn print_outcome(o: &Outcome) {
    let r = &o.report;
    println!();
    println!("Status:    {}", r.status);
    println!("Seed:      {}", o.seed);
    println!(
        "Trials:    {}/{} ({} blocks, {} timeouts)",
        r.trials_completed, r.trials_planned, r.blocks_completed, r.summary.n_timeouts
    );
    println!("Accuracy:  {:.1}%", r.summary.accuracy * 100.0);
    for mode in ContrastMode::ALL {
        if let Some(effect) = r.summary.stroop_effect(mode) {
            println!("Stroop effect ({} contrast): {effect:.1} ms", mode.label());
        }
    }
    let t = &r.onset_latency;
    if t.samples > 0 {
        println!(
            "Onset latency: mean {:.3} ms, jitter {:.3} ms, max {:.3} ms",
            t.mean_ns / 1e6,
            t.jitter_ns / 1e6,
            t.max_ns / 1e6
        );
    }
    let m = &r.markers;
    println!(
        "Markers:   {} sent, {} failed, {} dropped, {} local only",
        m.sent, m.failed, m.dropped, m.local_only
    );
    if r.fallback_blocks > 0 {
        println!("Blocks using the fallback order: {}", r.fallback_blocks);
    }
    println!("Raw data:  {}", o.raw_path.display());
    println!("Summary:   {}", o.summary_path.display());
}

fn plan(args: PlanArgs) -> Result<()> {
    logging::init(&LogTarget::Stderr)?;
    let config = args.config.resolve()?;
    let seed = config.seed.unwrap_or_else(|| rand::rng().random());
    let plan = BlockPlanner::new(&config)
        .plan(&mut StdRng::seed_from_u64(seed))
        .context("invalid run configuration")?;
    let json = serde_json::to_string_pretty(&plan)?;
    let mut out = io::stdout().lock();
    writeln!(out, "{json}")?;
    Ok(())
}

fn listen(args: ListenArgs) -> Result<()> {
    logging::init(&LogTarget::Stderr)?;
    let out: Box<dyn Write> = match &args.out {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };
    let mut receiver = MarkerReceiver::bind(args.bind, out)
        .with_context(|| format!("binding {}", args.bind))?;
    match args.count {
        Some(n) => {
            while receiver.received() < n {
                receiver.receive_one()?;
            }
        }
        // Runs until the process is interrupted; every row is flushed.
        None => {
            receiver.run(&AtomicBool::new(false))?;
        }
    }
    receiver.into_inner()?.flush()?;
    Ok(())
}
