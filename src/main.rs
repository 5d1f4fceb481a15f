//! Tiling sampler CLI - Draw samples from a JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::path::PathBuf;
use std::time::Instant;

use tiling_sampler::{
    compute::{
        CftpPhase, CpuGrowth, GrowthDiagram, Histogram, SampleCollector, TilingEngine,
        entropy_seed, gpu::GpuGrowth, growth_uniforms,
    },
    schema::{RegionSpec, SamplerConfig},
};

/// Diagrams drawn for the last-passage histogram.
const GROWTH_RUNS: u32 = 100;

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [samples]", args[0]);
        eprintln!();
        eprintln!("Draw exact and chain samples from a JSON configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to sampler configuration file");
        eprintln!("  samples      Number of observables to collect (default: 10000)");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);
    let samples: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10_000);

    let mut config = SamplerConfig::from_file(&config_path).unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    });
    let seed = *config.seed.get_or_insert_with(entropy_seed);

    println!("Tiling Sampler");
    println!("==============");
    println!("Region: {:?}", config.region);
    println!("Bias q: {}", config.bias);
    println!("Seed: {}", seed);
    println!();

    run_exact(&config, seed);

    if matches!(config.region, RegionSpec::LatticePath { .. }) {
        run_chains(&config, samples);
    }

    run_growth(&config, seed);
}

fn run_exact(config: &SamplerConfig, seed: u64) {
    let engine = TilingEngine::from_config(config).unwrap_or_else(|e| {
        eprintln!("Error initialising region: {}", e);
        std::process::exit(1);
    });

    println!("Coupling from the past...");
    let start = Instant::now();
    let result = engine.run_cftp_observed(seed, |progress| {
        if let CftpPhase::Running { horizon } = progress.phase {
            println!("  Epoch {}: horizon {}", progress.epoch, horizon);
        }
    });

    match result {
        Ok(sample) => {
            let records = engine
                .export_configuration(&sample.config)
                .unwrap_or_default();
            let statistic = engine.statistic(&sample.config).unwrap_or_default();
            println!(
                "  Coalesced at horizon {} after {} epochs ({:.2}s)",
                sample.horizon,
                sample.epochs,
                start.elapsed().as_secs_f32()
            );
            println!("  Records: {}", records.len());
            println!("  Statistic: {}", statistic);
        }
        Err(e) => println!("  {}", e),
    }
    println!();
}

fn run_chains(config: &SamplerConfig, samples: usize) {
    let mut collector = SampleCollector::with_gpu(config.clone()).unwrap_or_else(|e| {
        eprintln!("Error creating sampler: {}", e);
        std::process::exit(1);
    });

    println!(
        "Collecting {} samples ({} steps per chain, backend: {})...",
        samples,
        config.sampling.steps_per_chain,
        collector.backend_name()
    );
    let start = Instant::now();
    let result = collector.collect_observed(samples, |progress, _| {
        let elapsed = start.elapsed().as_secs_f32();
        println!(
            "  Batch {}: {}/{} on {}, {:.0} samples/s",
            progress.batches,
            progress.collected,
            progress.requested,
            progress.backend,
            progress.collected as f32 / elapsed
        );
    });

    match result {
        Ok(set) => {
            println!();
            println!("Height at position {}:", set.observe_at);
            print_histogram(&set.histogram);
            if set.fell_back {
                println!("  (GPU batch failed; remaining batches ran on CPU)");
            }
        }
        Err(e) => println!("  {}", e),
    }
    println!();
}

fn run_growth(config: &SamplerConfig, seed: u64) {
    let growth = config.growth;
    println!(
        "Growth diagram {}x{} ({:?})...",
        growth.size, growth.size, growth.law
    );
    let uniforms = growth_uniforms(growth.size, &growth.law, seed);
    let start = Instant::now();

    let gpu_diagram = if config.gpu.enabled {
        pollster::block_on(GpuGrowth::new(&config.gpu))
            .and_then(|gpu| gpu.run(growth.size, &growth.law, &uniforms))
            .map_err(|e| log::warn!("GPU growth unavailable, using CPU: {e}"))
            .ok()
    } else {
        None
    };
    let (diagram, backend): (GrowthDiagram, &str) = match gpu_diagram {
        Some(diagram) => (diagram, "gpu"),
        None => (CpuGrowth::new().run(growth.size, &growth.law, &uniforms), "cpu"),
    };

    let partition = diagram.partition();
    let total: u32 = partition.iter().sum();
    println!(
        "  Done on {} in {:.3}s",
        backend,
        start.elapsed().as_secs_f32()
    );
    println!("  Total weight: {}", total);
    println!("  Last-passage time: {}", diagram.first_row());
    println!(
        "  Shape: {:?}",
        &partition[..partition.len().min(12)]
    );

    let rows = CpuGrowth::new().sample_first_rows(growth.size, &growth.law, seed, GROWTH_RUNS);
    println!();
    println!("Last-passage time over {} diagrams:", rows.len());
    print_histogram(&Histogram::from_samples(&rows, config.sampling.histogram_bins));
}

fn print_histogram(histogram: &Histogram) {
    let peak = histogram.counts.iter().copied().max().unwrap_or(0).max(1);
    for (i, &count) in histogram.counts.iter().enumerate() {
        let bar = "#".repeat((count * 40 / peak) as usize);
        println!(
            "  {:>8.1} | {:<40} {}",
            histogram.bin_start(i),
            bar,
            count
        );
    }
}

fn print_example_config() {
    let config = SamplerConfig {
        region: RegionSpec::LatticePath { right: 32, up: 32 },
        seed: Some(1),
        ..Default::default()
    };

    println!("Example configuration (config.json):");
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_default()
    );
}
