//! dfopt Command Line Interface
//!
//! Usage:
//!   dfopt [OPTIONS] <input-file>
//!   dfopt --help
//!
//! Examples:
//!   dfopt kernel.json                               # Parallelize with defaults
//!   dfopt --max-unroll-factor=16 kernel.json        # Larger root budget
//!   dfopt --tile-size=4 --point-loop-only kernel.json
//!   dfopt --simplify-copy --skip-parallelize --emit=json kernel.json

use clap::{Parser, ValueEnum};
use dfopt::transform::{LoopTiling, ParallelizeReport, Transform};
use dfopt::ParallelizeConfig;
use serde::Serialize;
use std::path::PathBuf;
use std::fs;
use anyhow::{Result, Context};
use log::{info, debug, error};

/// dfopt - Dataflow Node Parallelization
#[derive(Parser, Debug)]
#[command(name = "dfopt")]
#[command(version)]
#[command(about = "Parallelizes loop bands of dataflow nodes and removes redundant copies", long_about = None)]
struct Cli {
    /// Input function (JSON)
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Root parallel budget
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
    max_unroll_factor: u64,

    /// Only unroll the point loops of tiled bands
    #[arg(long)]
    point_loop_only: bool,

    /// Use the same factor for every node
    #[arg(long)]
    no_complexity_aware: bool,

    /// Do not unify factors of correlated nodes
    #[arg(long)]
    no_correlation_aware: bool,

    /// Tile every band before parallelizing (comma-separated, outermost first)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    tile_size: Option<Vec<u64>>,

    /// Eliminate redundant buffer copies
    #[arg(long)]
    simplify_copy: bool,

    /// Do not run dataflow node parallelization
    #[arg(long)]
    skip_parallelize: bool,

    /// What to emit
    #[arg(long, default_value = "ir")]
    emit: EmitKind,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmitKind {
    /// Textual IR
    Ir,
    /// Function as JSON
    Json,
    /// Pass decisions as JSON
    Report,
}

/// What the passes did, for `--emit=report`.
#[derive(Debug, Default, Serialize)]
struct RunSummary {
    tiled: bool,
    parallelize: Option<ParallelizeReport>,
    copies_eliminated: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("dfopt v{}", dfopt::VERSION);
    debug!("Input file: {:?}", cli.input);

    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read input file: {:?}", cli.input))?;
    let mut func = dfopt::load_func(&source)
        .with_context(|| format!("Failed to load {:?}", cli.input))?;

    let config = build_config(&cli);
    debug!("Parallelize config: {:?}", config);

    let mut summary = RunSummary::default();

    if let Some(sizes) = &cli.tile_size {
        let tiling = LoopTiling::new(sizes.clone());
        if tiling.is_legal(&func) {
            summary.tiled = tiling.apply(&mut func)?;
        } else {
            info!("Nothing to tile");
        }
    }

    if !cli.skip_parallelize {
        info!("Parallelizing...");
        match dfopt::parallelize(&mut func, &config) {
            Ok(report) => summary.parallelize = Some(report),
            Err(e) => {
                error!("Parallelization failed: {:#}", e);
                return Err(e);
            }
        }
    }

    if cli.simplify_copy {
        info!("Simplifying copies...");
        summary.copies_eliminated = dfopt::simplify_copies(&mut func);
    }

    func.verify().context("Transformed function is malformed")?;

    let output = match cli.emit {
        EmitKind::Ir => dfopt::ir::print_func(&func),
        EmitKind::Json => serde_json::to_string_pretty(&func)?,
        EmitKind::Report => serde_json::to_string_pretty(&summary)?,
    };
    write_output(&cli.output, &output)
}

fn build_config(cli: &Cli) -> ParallelizeConfig {
    ParallelizeConfig {
        max_unroll_factor: cli.max_unroll_factor,
        point_loop_only: cli.point_loop_only,
        complexity_aware: !cli.no_complexity_aware,
        correlation_aware: !cli.no_correlation_aware,
    }
}

fn write_output(path: &Option<PathBuf>, content: &str) -> Result<()> {
    match path {
        Some(p) => {
            fs::write(p, content)
                .with_context(|| format!("Failed to write output file: {:?}", p))?;
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
