//! sprectest - Batch runner for speaker recognition test scripts.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sprec_engine::{save_report, EngineConfig, TestEngine};
use tracing_subscriber::EnvFilter;

/// Batch runner for speaker recognition and verification test scripts.
#[derive(Parser, Debug)]
#[command(name = "sprectest")]
#[command(about = "Batch runner for speaker recognition test scripts")]
struct Args {
    /// Test script to execute
    script: PathBuf,

    /// Root directory of the per-feature-set speaker data
    #[arg(short, long, default_value = "data")]
    data: PathBuf,

    /// Output directory for result and manifest files
    #[arg(short = 'o', long, default_value = "results")]
    out: PathBuf,

    /// Write a JSON run report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Quiet mode (warnings and errors only)
    #[arg(short = 'q', long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let engine = TestEngine::new(EngineConfig {
        data_dir: args.data.clone(),
        out_dir: args.out.clone(),
    });

    let report = engine
        .run(&args.script)
        .with_context(|| format!("running script {}", args.script.display()))?;

    if !args.quiet {
        println!(
            "=== {} test(s), {} training load(s), {} background load(s) ===",
            report.tests.len(),
            report.train_loads,
            report.background_loads
        );
        for t in &report.tests {
            match (t.correct, t.incorrect, t.trials) {
                (Some(c), Some(i), _) => println!("  {} ({}): {} / {}", t.label, t.kind, c, c + i),
                (_, _, Some(n)) => println!("  {} ({}): {} trial(s)", t.label, t.kind, n),
                _ => println!("  {} ({})", t.label, t.kind),
            }
        }
    }

    if let Some(path) = &args.report {
        save_report(&report, path)?;
        println!("\nReport saved to {}", path.display());
    }

    Ok(())
}
