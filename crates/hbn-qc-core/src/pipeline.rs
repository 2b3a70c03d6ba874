//! Orchestration of the four checks and the summary join
//!
//! Stages run in a fixed order and write their own outputs as soon as they
//! finish. A failing stage is recorded in the [`RunReport`] and the remaining
//! stages still run; the summary joins whatever succeeded. Files a failed
//! stage wrote in an earlier run are removed.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use serde::Serialize;

use crate::completion::{self, CompletionTable, check_pages};
use crate::config::QcConfig;
use crate::error::{QcError, QcResult};
use crate::io::write_table;
use crate::jobs::{self, JobTable, check_jobs};
use crate::motion::{self, OutlierTable, detect_motion};
use crate::presence::{self, PresenceTable, detect_all};
use crate::subject::SubjectFilter;
use crate::summary::{SUMMARY_FILE, outer_join};
use crate::table::{Breakdown, SubjectTable};

/// Input locations for one run.
#[derive(Clone, Debug)]
pub struct PipelineInputs {
    /// Raw BIDS root (`sub-*/anat|func|fmap`)
    pub bids_dir: PathBuf,
    /// fMRIPrep output root (report pages and confound tables)
    pub fmriprep_dir: PathBuf,
    /// Directory of scheduler `.out` logs
    pub jobs_dir: PathBuf,
    pub out_dir: PathBuf,
    /// Registry override; defaults to `<bids_dir>/participants.tsv`
    pub participants: Option<PathBuf>,
    pub subjects: SubjectFilter,
}

impl PipelineInputs {
    pub fn new(
        bids_dir: PathBuf,
        fmriprep_dir: PathBuf,
        jobs_dir: PathBuf,
        out_dir: PathBuf,
    ) -> Self {
        Self {
            bids_dir,
            fmriprep_dir,
            jobs_dir,
            out_dir,
            participants: None,
            subjects: SubjectFilter::All,
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.participants.clone().unwrap_or_else(|| self.bids_dir.join("participants.tsv"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Presence,
    Completion,
    Jobs,
    Motion,
    Summary,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Presence => "presence",
            Stage::Completion => "completion",
            Stage::Jobs => "jobs",
            Stage::Motion => "motion",
            Stage::Summary => "summary",
        };
        f.write_str(name)
    }
}

/// Outcome of one stage.
#[derive(Clone, Debug, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub ok: bool,
    pub rows: usize,
    /// Items left out of the stage's table (unknown folders, unusable logs)
    pub dropped: usize,
    pub outputs: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageReport {
    fn failed(stage: Stage, err: &QcError) -> Self {
        error!("{stage} stage failed: {err}");
        Self {
            stage,
            ok: false,
            rows: 0,
            dropped: 0,
            outputs: Vec::new(),
            error: Some(err.to_string()),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub out_dir: PathBuf,
    pub stages: Vec<StageReport>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.stages.iter().all(|s| s.ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StageReport> {
        self.stages.iter().filter(|s| !s.ok)
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "output: {}", self.out_dir.display())?;
        for s in &self.stages {
            if s.ok {
                writeln!(f, "  {:<10} ok      rows={:<6} dropped={}", s.stage, s.rows, s.dropped)?;
            } else {
                writeln!(f, "  {:<10} FAILED  {}", s.stage, s.error.as_deref().unwrap_or(""))?;
            }
        }
        Ok(())
    }
}

/// A stage result that knows which files it persists.
pub trait StageOutput: SubjectTable {
    /// Every file name the stage may write, whether or not this run produced it.
    fn output_files() -> Vec<String>;

    fn breakdowns(&self) -> Vec<Breakdown>;

    fn dropped(&self) -> usize {
        0
    }
}

impl StageOutput for PresenceTable {
    fn output_files() -> Vec<String> {
        presence::output_files()
    }

    fn breakdowns(&self) -> Vec<Breakdown> {
        PresenceTable::breakdowns(self)
    }

    fn dropped(&self) -> usize {
        self.ignored_folders + self.skipped_subjects
    }
}

impl StageOutput for CompletionTable {
    fn output_files() -> Vec<String> {
        completion::output_files()
    }

    fn breakdowns(&self) -> Vec<Breakdown> {
        CompletionTable::breakdowns(self)
    }
}

impl StageOutput for JobTable {
    fn output_files() -> Vec<String> {
        jobs::output_files()
    }

    fn breakdowns(&self) -> Vec<Breakdown> {
        JobTable::breakdowns(self)
    }

    fn dropped(&self) -> usize {
        self.dropped.len()
    }
}

impl StageOutput for OutlierTable {
    fn output_files() -> Vec<String> {
        motion::output_files()
    }

    fn breakdowns(&self) -> Vec<Breakdown> {
        OutlierTable::breakdowns(self)
    }
}

fn write_breakdowns(out_dir: &Path, breakdowns: &[Breakdown]) -> QcResult<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(breakdowns.len());
    for breakdown in breakdowns {
        let path = out_dir.join(&breakdown.file_name);
        write_table(&path, &breakdown.table)?;
        written.push(path);
    }
    written.sort();
    Ok(written)
}

/// Delete a failed stage's files left over from an earlier run.
fn remove_outputs(out_dir: &Path, files: &[String]) {
    for file in files {
        let path = out_dir.join(file);
        match std::fs::remove_file(&path) {
            Ok(()) => info!("removed stale {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not remove stale {}: {e}", path.display()),
        }
    }
}

/// Persist a stage result, turning both compute and write errors into a failed report.
fn finish_stage<T: StageOutput>(
    stage: Stage,
    out_dir: &Path,
    result: QcResult<T>,
) -> (StageReport, Option<T>) {
    let output = match result {
        Ok(output) => output,
        Err(err) => {
            remove_outputs(out_dir, &T::output_files());
            return (StageReport::failed(stage, &err), None);
        }
    };
    let breakdowns = output.breakdowns();
    match write_breakdowns(out_dir, &breakdowns) {
        Ok(outputs) => {
            let report = StageReport {
                stage,
                ok: true,
                rows: output.to_table().len(),
                dropped: output.dropped(),
                outputs,
                error: None,
            };
            info!("{stage}: wrote {} files", report.outputs.len());
            (report, Some(output))
        }
        Err(err) => {
            remove_outputs(out_dir, &T::output_files());
            (StageReport::failed(stage, &err), None)
        }
    }
}

/// Run every check and the summary join.
///
/// Only an unusable output directory is returned as `Err`; stage failures
/// are reported in the [`RunReport`].
pub fn run(inputs: &PipelineInputs, config: &QcConfig) -> QcResult<RunReport> {
    config.validate()?;
    let out_dir = inputs.out_dir.as_path();
    std::fs::create_dir_all(out_dir).map_err(|e| QcError::io(out_dir, e))?;

    let filter = &inputs.subjects;
    let (presence_report, presence) = finish_stage(
        Stage::Presence,
        out_dir,
        detect_all(&inputs.bids_dir, &config.presence, filter),
    );
    let (completion_report, completion) = finish_stage(
        Stage::Completion,
        out_dir,
        check_pages(&inputs.fmriprep_dir, &inputs.registry_path(), &config.completion, filter),
    );
    let (jobs_report, jobs) =
        finish_stage(Stage::Jobs, out_dir, check_jobs(&inputs.jobs_dir, &config.jobs, filter));
    let (motion_report, motion) = finish_stage(
        Stage::Motion,
        out_dir,
        detect_motion(&inputs.fmriprep_dir, &config.motion, filter),
    );

    let mut parts: Vec<&dyn SubjectTable> = Vec::new();
    if let Some(t) = &presence {
        parts.push(t);
    }
    if let Some(t) = &completion {
        parts.push(t);
    }
    if let Some(t) = &jobs {
        parts.push(t);
    }
    if let Some(t) = &motion {
        parts.push(t);
    }
    let summary = outer_join(&parts);
    let summary_path = out_dir.join(SUMMARY_FILE);
    let summary_report = match write_table(&summary_path, &summary) {
        Ok(()) => StageReport {
            stage: Stage::Summary,
            ok: true,
            rows: summary.len(),
            dropped: 0,
            outputs: vec![summary_path],
            error: None,
        },
        Err(err) => {
            remove_outputs(out_dir, &[SUMMARY_FILE.to_string()]);
            StageReport::failed(Stage::Summary, &err)
        }
    };
    info!("summary: {} subjects from {} components", summary.len(), parts.len());

    Ok(RunReport {
        out_dir: out_dir.to_path_buf(),
        stages: vec![
            presence_report,
            completion_report,
            jobs_report,
            motion_report,
            summary_report,
        ],
    })
}
