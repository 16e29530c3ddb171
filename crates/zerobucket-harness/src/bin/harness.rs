//! CLI entrypoint for the zerobucket harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use zerobucket_core::config;
use zerobucket_harness::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
use zerobucket_harness::workload::run_stress;
use zerobucket_harness::{Geometry, HarnessError, StressConfig};

/// Stress and inspection tooling for zerobucket.
#[derive(Debug, Parser)]
#[command(name = "zerobucket-harness")]
#[command(about = "Stress and geometry harness for the zerobucket allocator")]
struct Cli {
    /// Write JSONL records here instead of stdout.
    #[arg(long, global = true)]
    log: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a multi-threaded allocate/verify/release workload.
    Stress {
        #[arg(long, default_value_t = 4)]
        threads: usize,
        #[arg(long, default_value_t = 50_000)]
        ops: usize,
        /// Largest request in bytes.
        #[arg(long, default_value_t = 64 * 1024)]
        max_size: usize,
        /// Live blocks kept per worker.
        #[arg(long, default_value_t = 256)]
        window: usize,
        #[arg(long, default_value_t = 0xB0C7_E7A1_10C5_EED5)]
        seed: u64,
        /// Release blocks on partner threads.
        #[arg(long)]
        handoff: bool,
        /// Override the pages mapped per preallocation run.
        #[arg(long)]
        prealloc: Option<usize>,
    },
    /// Show the size class and page cost of each request size.
    Classify {
        #[arg(required = true)]
        sizes: Vec<usize>,
    },
    /// Show page size, header sizes and the run length in effect.
    Geometry,
}

fn run(cli: Cli) -> Result<bool, HarnessError> {
    let mut log = match &cli.log {
        Some(path) => LogEmitter::to_file(path, "harness")?,
        None => LogEmitter::to_stdout("harness"),
    };

    match cli.command {
        Command::Stress {
            threads,
            ops,
            max_size,
            window,
            seed,
            handoff,
            prealloc,
        } => {
            if let Some(pages) = prealloc {
                config::set_prealloc_pages(pages);
            }
            let stress = StressConfig {
                threads,
                ops_per_thread: ops,
                max_size,
                window,
                seed,
                handoff,
            };
            log.emit(LogLevel::Debug, "stress_start")?;
            let report = match run_stress(&stress) {
                Ok(report) => report,
                Err(err) => {
                    log.emit_entry(LogEntry::failure("stress", &err))?;
                    return Err(err);
                }
            };
            let passed = report.passed();
            let (level, outcome) = if passed {
                (LogLevel::Info, Outcome::Pass)
            } else {
                (LogLevel::Error, Outcome::Fail)
            };
            log.emit_entry(
                LogEntry::new("", level, "stress")
                    .with_outcome(outcome)
                    .with_duration_ms(report.elapsed_ms)
                    .with_details(serde_json::to_value(&report)?),
            )?;
            Ok(passed)
        }
        Command::Classify { sizes } => {
            let geometry = Geometry::current();
            for size in sizes {
                let entry = match geometry.route(size) {
                    Ok(report) => LogEntry::new("", LogLevel::Info, "classify")
                        .with_details(serde_json::to_value(&report)?),
                    Err(err) => LogEntry::new("", LogLevel::Warn, "classify")
                        .with_outcome(Outcome::Fail)
                        .with_details(serde_json::json!({ "size": size, "error": err.to_string() })),
                };
                log.emit_entry(entry)?;
            }
            Ok(true)
        }
        Command::Geometry => {
            let geometry = Geometry::current();
            log.emit_entry(
                LogEntry::new("", LogLevel::Info, "geometry")
                    .with_details(serde_json::to_value(&geometry)?),
            )?;
            Ok(true)
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    if !run(cli)? {
        return Err("stress run observed dirty or corrupted blocks".into());
    }
    Ok(())
}
