//! CLI binary for the statecheck search driver.
//!
//! Explores every interleaving of the racy counter demo program and reports
//! the states, transitions and property violations found.
//!
//! # Usage
//!
//! ```bash
//! # Exhaustive search over two workers
//! statecheck-explore run
//!
//! # Three workers, precise allocation contexts, randomized CG order
//! statecheck-explore run --threads 3 --context precise --randomize seeded --seed 7
//!
//! # Save the report as JSON
//! statecheck-explore run --output results/
//!
//! # Remove snapshot files left behind by interrupted runs
//! statecheck-explore sweep
//!
//! # Same, before a search that owns its storage directory
//! statecheck-explore run --storage-dir /var/tmp/run1 --sweep
//! ```

use clap::{Parser, Subcommand};
use statecheck_core::{CoreConfig, SnapshotStore};
use statecheck_explore::demo::RacyCounter;
use statecheck_explore::report::format_report;
use statecheck_explore::search::{Search, SearchConfig};
use std::fs;

#[derive(Parser)]
#[command(name = "statecheck-explore")]
#[command(about = "Depth-first state-space search over a demo concurrent program")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a search.
    Run {
        /// Number of worker threads in the demo program.
        #[arg(short, long, default_value = "2")]
        threads: u32,

        /// Seed for randomized choice generators.
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// CG visitation order: "none", "permute" or "seeded".
        #[arg(short, long, default_value = "none")]
        randomize: String,

        /// Allocation context: "hashed" or "precise".
        #[arg(short, long, default_value = "hashed")]
        context: String,

        /// Do not expand states deeper than this.
        #[arg(short, long)]
        max_depth: Option<usize>,

        /// Stop at the first end state.
        #[arg(long)]
        stop_on_first_end: bool,

        /// Where snapshots are kept: "file" or "memory".
        #[arg(long, default_value = "file")]
        offload: String,

        /// Snapshot directory (defaults to <tmp>/statecheck/storage).
        #[arg(long)]
        storage_dir: Option<String>,

        /// Remove orphaned snapshot files before searching. Other searches
        /// must not be using the same storage directory.
        #[arg(long)]
        sweep: bool,

        /// Round-trip the search through a snapshot every N new states.
        #[arg(long)]
        snapshot_every: Option<u64>,

        /// Output directory for the JSON report.
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Remove orphaned snapshot files.
    Sweep {
        /// Snapshot directory (defaults to <tmp>/statecheck/storage).
        #[arg(long)]
        storage_dir: Option<String>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            threads,
            seed,
            randomize,
            context,
            max_depth,
            stop_on_first_end,
            offload,
            storage_dir,
            sweep,
            snapshot_every,
            output,
        } => cmd_run(
            threads,
            seed,
            randomize,
            context,
            max_depth,
            stop_on_first_end,
            offload,
            storage_dir,
            sweep,
            snapshot_every,
            output,
        ),
        Commands::Sweep { storage_dir } => cmd_sweep(storage_dir),
    }
}

fn core_config(props: &[(&str, &str)]) -> CoreConfig {
    match CoreConfig::from_properties(props.iter().copied()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    threads: u32,
    seed: u64,
    randomize: String,
    context: String,
    max_depth: Option<usize>,
    stop_on_first_end: bool,
    offload: String,
    storage_dir: Option<String>,
    sweep: bool,
    snapshot_every: Option<u64>,
    output: Option<String>,
) {
    if threads == 0 {
        eprintln!("Error: at least one worker thread is required");
        std::process::exit(1);
    }

    if let Some(ref output_dir) = output {
        if let Err(e) = fs::create_dir_all(output_dir) {
            eprintln!("Error: failed to create output directory: {}", e);
            std::process::exit(1);
        }
    }

    let seed_text = seed.to_string();
    let mut props = vec![
        ("cg.randomize", randomize.as_str()),
        ("cg.seed", seed_text.as_str()),
        ("allocation.context", context.as_str()),
        ("state.storage.offload", offload.as_str()),
    ];
    if let Some(ref dir) = storage_dir {
        props.push(("state.storage.dir", dir.as_str()));
    }
    let core = core_config(&props);

    eprintln!("═══════════════════════════════════════════════════════════════════════");
    eprintln!("  Statecheck Search");
    eprintln!("═══════════════════════════════════════════════════════════════════════");
    eprintln!();
    eprintln!("Configuration:");
    eprintln!("  Program:        racy counter, {} worker(s)", threads);
    eprintln!("  Seed:           {}", seed);
    eprintln!("  Randomize:      {}", randomize);
    eprintln!("  Alloc context:  {}", context);
    eprintln!("  Offload:        {}", offload);
    if let Some(depth) = max_depth {
        eprintln!("  Max depth:      {}", depth);
    }
    if let Some(every) = snapshot_every {
        eprintln!("  Snapshot every: {} new states", every);
    }
    eprintln!("  Storage:        {}", core.storage_dir().display());
    eprintln!();

    let config = SearchConfig {
        core,
        max_depth,
        stop_on_first_end,
        snapshot_every,
    };

    let mut search = match Search::new(config, RacyCounter::new(threads)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: failed to set up search: {}", e);
            std::process::exit(1);
        }
    };

    if sweep {
        match search.sweep_storage() {
            Ok(n) => eprintln!("Removed {} orphaned snapshot file(s)", n),
            Err(e) => eprintln!("Warning: failed to sweep snapshot storage: {}", e),
        }
    }

    let report = match search.run() {
        Ok(r) => r,
        Err(e) => {
            eprintln!();
            eprintln!("Search failed: {}", e);
            std::process::exit(1);
        }
    };

    let formatted = format_report(&report);
    println!("{}", formatted);

    if let Some(output_dir) = output {
        let report_path = format!("{}/report.json", output_dir);
        let saved = serde_json::to_string_pretty(&report)
            .map_err(|e| e.to_string())
            .and_then(|json| fs::write(&report_path, json).map_err(|e| e.to_string()));
        match saved {
            Ok(()) => eprintln!("Saved report to: {}", report_path),
            Err(e) => eprintln!("Warning: failed to save report: {}", e),
        }
    }

    // Exit with error code if violations found
    if report.has_violations() {
        std::process::exit(1);
    }
}

fn cmd_sweep(storage_dir: Option<String>) {
    let mut props = Vec::new();
    if let Some(ref dir) = storage_dir {
        props.push(("state.storage.dir", dir.as_str()));
    }
    let core = core_config(&props);

    let removed = SnapshotStore::from_config(&core).and_then(|store| store.sweep());
    match removed {
        Ok(n) => eprintln!(
            "Removed {} snapshot file(s) from {}",
            n,
            core.storage_dir().display()
        ),
        Err(e) => {
            eprintln!("Error: sweep failed: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_does_not_sweep_by_default() {
        let cli = Cli::try_parse_from(["statecheck-explore", "run"]).unwrap();
        match cli.command {
            Commands::Run {
                sweep, storage_dir, ..
            } => {
                assert!(!sweep);
                assert!(storage_dir.is_none());
            }
            Commands::Sweep { .. } => panic!("expected run command"),
        }
    }

    #[test]
    fn test_run_sweep_flag() {
        let cli = Cli::try_parse_from([
            "statecheck-explore",
            "run",
            "--storage-dir",
            "/tmp/own",
            "--sweep",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                sweep, storage_dir, ..
            } => {
                assert!(sweep);
                assert_eq!(storage_dir.as_deref(), Some("/tmp/own"));
            }
            Commands::Sweep { .. } => panic!("expected run command"),
        }
    }

    #[test]
    fn test_sweep_command() {
        let cli = Cli::try_parse_from(["statecheck-explore", "sweep"]).unwrap();
        assert!(matches!(cli.command, Commands::Sweep { storage_dir: None }));
    }
}
