//! Quality-control summary for an HBN BIDS dataset and its fMRIPrep run
//!
//! Usage:
//!   hbn-qc <bids_dir> <fmriprep_dir> <jobs_dir> <out_dir>
//!
//!   # restrict to listed subjects, override thresholds
//!   hbn-qc --subject-list subjects.txt --config qc.toml bids/ fmriprep/ logs/ qc/
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;

use hbn_qc_core::{PipelineInputs, QcConfig, SubjectFilter};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Check raw data, fMRIPrep reports, job logs and head motion per subject"
)]
struct Cli {
    /// Raw BIDS directory
    bids_dir: PathBuf,

    /// fMRIPrep output directory
    fmriprep_dir: PathBuf,

    /// Directory with scheduler .out files
    jobs_dir: PathBuf,

    /// Output directory for the CSV tables
    out_dir: PathBuf,

    /// File listing the subjects to check (one sub-<label> per line)
    #[arg(long)]
    subject_list: Option<PathBuf>,

    /// Participant registry (default: <bids_dir>/participants.tsv)
    #[arg(long)]
    participants: Option<PathBuf>,

    /// TOML file overriding thresholds, globs and markers
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Stderr)
        .init();

    let config = match &cli.config {
        Some(path) => QcConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => QcConfig::default(),
    };
    log::debug!("{config:?}");

    let mut inputs = PipelineInputs::new(cli.bids_dir, cli.fmriprep_dir, cli.jobs_dir, cli.out_dir);
    inputs.participants = cli.participants;
    if let Some(path) = &cli.subject_list {
        inputs.subjects = SubjectFilter::from_file(path)
            .with_context(|| format!("failed to read subject list {}", path.display()))?;
    }

    let report = hbn_qc_core::run(&inputs, &config).context("QC run aborted")?;
    if cli.json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        print!("{report}");
    }

    let failed: Vec<String> = report
        .failures()
        .map(|s| format!("{}: {}", s.stage, s.error.as_deref().unwrap_or("")))
        .collect();
    if !failed.is_empty() {
        bail!("{} stage(s) failed\n  {}", failed.len(), failed.join("\n  "));
    }
    Ok(())
}
