// Scenario Runner - Load and execute scenario YAML files
//
// Usage:
//   cargo run --bin scenario_runner scenarios/small_network.yaml
//   cargo run --bin scenario_runner scenarios/  (runs all .yaml files in directory)
//   cargo run --bin scenario_runner scenarios/small_network.yaml --seed 1234

mod scenario;

use scenario::{ScenarioConfig, ScenarioRunner};
use simple_logger::SimpleLogger;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize logger: {}", e);
            std::process::exit(1);
        });

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <scenario.yaml | directory/> [--seed SEED]", args[0]);
        eprintln!("\nExamples:");
        eprintln!("  {} scenarios/small_network.yaml", args[0]);
        eprintln!("  {} scenarios/", args[0]);
        eprintln!("  {} scenarios/small_network.yaml --seed 0x2a", args[0]);
        std::process::exit(1);
    }

    let path = Path::new(&args[1]);

    // Parse optional seed
    let seed: Option<u64> = if args.len() >= 4 && args[2] == "--seed" {
        Some(parse_seed(&args[3]))
    } else {
        None
    };

    if path.is_file() {
        run_scenario_file(path, seed);
    } else if path.is_dir() {
        run_scenario_directory(path, seed);
    } else {
        eprintln!("Error: Path does not exist: {}", path.display());
        std::process::exit(1);
    }
}

fn run_scenario_directory(dir: &Path, seed: Option<u64>) {
    let mut scenarios: Vec<PathBuf> = Vec::new();

    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|s| s.to_str());
            if ext == Some("yaml") || ext == Some("yml") {
                scenarios.push(path);
            }
        }
    }

    scenarios.sort();

    if scenarios.is_empty() {
        eprintln!("No .yaml files found in {}", dir.display());
        std::process::exit(1);
    }

    println!("Found {} scenario(s) to run\n", scenarios.len());

    for (i, scenario_path) in scenarios.iter().enumerate() {
        println!("\n{}/{} Running: {}\n", i + 1, scenarios.len(), scenario_path.display());
        run_scenario_file(scenario_path, seed);
    }
}

fn run_scenario_file(path: &Path, seed: Option<u64>) {
    println!("Loading scenario from: {}", path.display());

    let mut config = ScenarioConfig::load(path).unwrap_or_else(|e| {
        eprintln!("Failed to load {}: {}", path.display(), e);
        std::process::exit(1);
    });

    if let Some(seed) = seed {
        config.run.seed = seed;
    }
    if config.meta.name.is_none() {
        config.meta.name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string);
    }

    if let Some(ref desc) = config.meta.description {
        println!("{}\n", desc);
    }

    println!("Configuration:");
    println!("  Seed: {}", config.run.seed);
    println!("  Duration: {:.0}s (warm-up {:.0}s)", config.run.duration_secs, config.run.warmup_secs);
    println!("  Nodes: {} ({} links each)", config.nodes.count, config.nodes.connections_per_node);
    println!("  Latency: {}ms, Bandwidth: {:.0} B/s", config.network.latency_ms, config.network.bandwidth);
    println!("\nStarting simulation...\n");

    let result = ScenarioRunner::new(config).run().unwrap_or_else(|e| {
        eprintln!("Scenario {} failed: {}", path.display(), e);
        std::process::exit(1);
    });

    result.print_summary();
}

/// Decimal, or hex with a `0x` prefix
fn parse_seed(text: &str) -> u64 {
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };

    parsed.unwrap_or_else(|e| {
        eprintln!("Invalid seed {}: {}", text, e);
        std::process::exit(1);
    })
}
