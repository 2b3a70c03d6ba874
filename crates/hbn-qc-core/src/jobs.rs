//! Job-log completion estimate
//!
//! Scheduler `.out` files from fMRIPrep runs are the only trace of a job that
//! never produced outputs. The subject is recovered from the command line
//! echoed into the log (`participant_label NDAR...`) and the log size is used
//! as a progress proxy: reruns are collapsed to the largest log per subject.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use log::{info, warn};
use serde::Serialize;

use crate::config::JobsConfig;
use crate::error::{QcError, QcResult};
use crate::fsglob::{glob_dir, is_file};
use crate::subject::{SubjectFilter, SubjectId};
use crate::table::{Breakdown, SubjectTable, Table};

/// Suffixes of the persisted views, in write order.
const VIEWS: [&str; 3] = ["incomp", "comp", "all"];

const STEM: &str = "out-size";

/// File names this check writes.
pub fn output_files() -> Vec<String> {
    VIEWS.iter().map(|view| Breakdown::file_name(STEM, view)).collect()
}

/// Ordinal completion status derived from log size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum JobStatus {
    NotStarted,
    PartialOrError,
    LikelyComplete,
}

impl JobStatus {
    /// `size < started` -> not started, `started <= size < completed` -> partial,
    /// `size >= completed` -> likely complete.
    pub fn classify(size_kb: f64, config: &JobsConfig) -> Self {
        if size_kb < config.started_threshold_kb {
            return JobStatus::NotStarted;
        }
        if size_kb < config.completed_threshold_kb {
            return JobStatus::PartialOrError;
        }
        JobStatus::LikelyComplete
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::NotStarted => "not started",
            JobStatus::PartialOrError => "partial/error",
            JobStatus::LikelyComplete => "likely complete",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One log file as found on disk.
#[derive(Clone, Debug, PartialEq)]
pub struct JobLog {
    pub file_name: String,
    /// Characters following the marker; `None` when the marker is absent
    pub fragment: Option<String>,
    pub size_kb: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropReason {
    NoMarker,
    PrefixMismatch,
    InvalidLabel,
}

/// A log left out of the results, kept so callers can report drop counts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DroppedLog {
    pub file_name: String,
    pub fragment: Option<String>,
    pub reason: DropReason,
}

/// Largest log per subject and its classification.
#[derive(Clone, Debug, PartialEq)]
pub struct JobRecord {
    pub subject: SubjectId,
    pub size_kb: f64,
    pub log_file: String,
    pub n_logs: usize,
    pub status: JobStatus,
}

#[derive(Clone, Debug, Default)]
pub struct JobTable {
    pub records: Vec<JobRecord>,
    pub dropped: Vec<DroppedLog>,
    /// Logs kept under a label cut short by the `sub-` prefix
    pub truncated: Vec<String>,
}

/// Take up to `len` characters after the first `marker` in `content`.
pub fn extract_fragment(content: &str, marker: &str, len: usize) -> Option<String> {
    let (_, rest) = content.split_once(marker)?;
    Some(rest.chars().take(len).collect())
}

/// Read one log: text content for the id fragment, byte size for the estimate.
pub fn read_log(path: &Path, config: &JobsConfig) -> QcResult<JobLog> {
    let bytes = std::fs::read(path).map_err(|e| QcError::io(path, e))?;
    let content = String::from_utf8_lossy(&bytes);
    Ok(JobLog {
        file_name: path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string(),
        fragment: extract_fragment(&content, &config.marker, config.id_length),
        size_kb: bytes.len() as f64 / 1000.0,
    })
}

/// Map a fragment to a participant id, or say why it is rejected.
pub fn resolve_subject(
    fragment: Option<&str>,
    config: &JobsConfig,
) -> Result<SubjectId, DropReason> {
    let fragment = fragment.ok_or(DropReason::NoMarker)?;
    let label = fragment.strip_prefix("sub-").unwrap_or(fragment);
    if !label.starts_with(&config.id_prefix) {
        return Err(DropReason::PrefixMismatch);
    }
    SubjectId::from_label(label).map_err(|_| DropReason::InvalidLabel)
}

/// True when a `sub-` prefix consumed part of the fixed-width fragment, so the
/// label is shorter than `id_length` and likely matches no other evidence.
pub fn is_truncated(fragment: &str, config: &JobsConfig) -> bool {
    fragment
        .strip_prefix("sub-")
        .is_some_and(|label| label.chars().count() < config.id_length)
}

/// Filter logs to known subjects, then keep the largest log per subject.
pub fn summarize(logs: Vec<JobLog>, config: &JobsConfig, filter: &SubjectFilter) -> JobTable {
    let mut dropped = Vec::new();
    let mut truncated = Vec::new();
    let mut by_subject: BTreeMap<SubjectId, JobRecord> = BTreeMap::new();
    for log in logs {
        let subject = match resolve_subject(log.fragment.as_deref(), config) {
            Ok(subject) => subject,
            Err(reason) => {
                warn!(
                    "dropping job log {} ({reason:?}, fragment {:?})",
                    log.file_name, log.fragment
                );
                dropped.push(DroppedLog {
                    file_name: log.file_name,
                    fragment: log.fragment,
                    reason,
                });
                continue;
            }
        };
        if !filter.accepts(&subject) {
            continue;
        }
        if log.fragment.as_deref().is_some_and(|f| is_truncated(f, config)) {
            warn!(
                "job log {}: label of {subject} is under {} characters",
                log.file_name, config.id_length
            );
            truncated.push(log.file_name.clone());
        }
        by_subject
            .entry(subject.clone())
            .and_modify(|record| {
                record.n_logs += 1;
                if log.size_kb > record.size_kb {
                    record.size_kb = log.size_kb;
                    record.log_file = log.file_name.clone();
                }
            })
            .or_insert_with(|| JobRecord {
                subject,
                size_kb: log.size_kb,
                log_file: log.file_name.clone(),
                n_logs: 1,
                status: JobStatus::NotStarted,
            });
    }
    let records = by_subject
        .into_values()
        .map(|mut record| {
            record.status = JobStatus::classify(record.size_kb, config);
            record
        })
        .collect();
    JobTable {
        records,
        dropped,
        truncated,
    }
}

/// Scan `jobs_dir` for log files and build the job table.
pub fn check_jobs(
    jobs_dir: &Path,
    config: &JobsConfig,
    filter: &SubjectFilter,
) -> QcResult<JobTable> {
    if !jobs_dir.is_dir() {
        warn!("job-log directory {} is not a directory", jobs_dir.display());
    }
    let logs = glob_dir(jobs_dir, &[config.log_glob.as_str()], Some(&is_file))?
        .iter()
        .map(|path| read_log(path, config))
        .collect::<QcResult<Vec<_>>>()?;
    let n_logs = logs.len();
    let table = summarize(logs, config, filter);
    info!(
        "jobs: {} logs, {} subjects, {} dropped, {} incomplete",
        n_logs,
        table.records.len(),
        table.dropped.len(),
        table.incomplete().len()
    );
    Ok(table)
}

impl JobTable {
    pub fn incomplete(&self) -> HashSet<&SubjectId> {
        self.records
            .iter()
            .filter(|r| r.status != JobStatus::LikelyComplete)
            .map(|r| &r.subject)
            .collect()
    }

    /// `all`, `incomp` and `comp` views.
    pub fn breakdowns(&self) -> Vec<Breakdown> {
        let all = self.to_table();
        let [incomp, comp, all_rows] = VIEWS;
        let incomplete = self.incomplete();
        vec![
            Breakdown::new(STEM, incomp, all.select(&incomplete)),
            Breakdown::new(STEM, comp, all.exclude(&incomplete)),
            Breakdown::new(STEM, all_rows, all),
        ]
    }
}

impl SubjectTable for JobTable {
    fn component(&self) -> &'static str {
        "jobs"
    }

    fn to_table(&self) -> Table {
        let columns = ["log_file", "n_logs", "size_kb", "status"].map(String::from).to_vec();
        let mut table = Table::new(columns);
        for r in &self.records {
            table.push_row(
                r.subject.clone(),
                vec![
                    Some(r.log_file.clone()),
                    Some(r.n_logs.to_string()),
                    Some(format!("{:.3}", r.size_kb)),
                    Some(r.status.to_string()),
                ],
            );
        }
        table
    }
}
