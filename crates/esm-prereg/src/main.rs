//! Command-line entry point
//!
//! ```bash
//! esm-prereg --data esm.csv --config run.toml --output results.csv
//! RUST_LOG=debug esm-prereg --data esm.csv --frequentist-only --format json
//! ```

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use esm_core::DataFrame;
use esm_prereg::{AnalysisPlan, Pipeline, RunConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Csv,
    Json,
    Table,
}

#[derive(Parser, Debug)]
#[command(name = "esm-prereg")]
#[command(about = "Fit the preregistered ESM models and tabulate the hypothesis tests")]
#[command(version)]
struct Args {
    /// Input CSV, one row per subject and day
    #[arg(short, long)]
    data: PathBuf,

    /// Run configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output file; standard output when absent
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    format: Format,

    /// Skip the Bayesian fits
    #[arg(long)]
    frequentist_only: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    if args.frequentist_only {
        config.frequentist_only = true;
    }

    let raw = DataFrame::read_csv(&args.data)
        .with_context(|| format!("failed to load {}", args.data.display()))?;
    tracing::info!(rows = raw.nrows(), columns = raw.ncols(), "loaded data");

    let plan = AnalysisPlan::preregistered()?;
    let table = Pipeline::new(config, plan).run(&raw);

    let failures = table.failures().count();
    if failures > 0 {
        tracing::warn!(failures, "some results could not be computed");
    }

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    };
    match args.format {
        Format::Csv => table.write_csv(&mut out)?,
        Format::Json => writeln!(out, "{}", table.to_json()?)?,
        Format::Table => write!(out, "{}", table)?,
    }
    out.flush()?;
    Ok(())
}
