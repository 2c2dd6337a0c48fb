use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use pprof::criterion::{Output, PProfProfiler};
use rand::SeedableRng;
use rand::rngs::StdRng;
use stroop_core::{ContrastMode, Paradigm};
use stroop_experiment::{
    BlockPlanner, BlockRequest, ItiPolicy, RunConfig, StimulusCatalog, TrialSequencer,
    merged_contrast_sequence,
};

pub fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");
    group.sample_size(60);

    for paradigm in Paradigm::ALL {
        let config = RunConfig::preset(paradigm);
        group.bench_function(paradigm.slug(), |b| {
            b.iter_batched(
                || StdRng::seed_from_u64(17),
                |mut rng| {
                    let plan = BlockPlanner::new(black_box(&config)).plan(&mut rng);
                    black_box(plan)
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

pub fn bench_sequencer(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequencer");
    let catalog = StimulusCatalog::default();
    let sequencer = TrialSequencer::new(&catalog, ItiPolicy::jittered(800.0, 1200.0));

    for (name, length, ratio) in [
        ("balanced_8", 8, 0.5),
        ("balanced_15", 15, 0.5),
        // never satisfiable: measures the full retry budget
        ("fallback_15", 15, 0.9),
    ] {
        let req = BlockRequest {
            block_index: 0,
            length,
            congruency_ratio: ratio,
            contrast_mode: ContrastMode::HighContrast,
            first_trial_index: 0,
            feedback_enabled: false,
        };
        group.bench_function(name, |b| {
            let mut rng = StdRng::seed_from_u64(5);
            b.iter(|| black_box(sequencer.generate(black_box(&req), &mut rng)));
        });
    }

    group.bench_function("merged_contrast_64", |b| {
        let lengths = [8, 15, 15, 8].repeat(16);
        b.iter(|| black_box(merged_contrast_sequence(black_box(&lengths))));
    });
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .with_profiler(PProfProfiler::new(100, Output::Flamegraph(None)))
        .confidence_level(0.95)
        .noise_threshold(0.02)
        .significance_level(0.05);
    targets = bench_plan, bench_sequencer
}

criterion_main!(benches);
