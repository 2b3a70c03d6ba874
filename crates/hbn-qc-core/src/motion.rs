//! Head-motion outliers from fMRIPrep confound tables
//!
//! Each `sub-*/func/*_desc-confounds_timeseries.tsv` yields one mean
//! framewise displacement per subject and task (plus run, when present).
//! The first timepoint has no predecessor to be displaced from, so leading
//! rows are skipped before averaging. Per task, subjects above
//! `mean + multiplier * spread` of the group are flagged.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::LazyLock;

use log::{info, warn};
use regex::Regex;
use serde::Serialize;

use crate::config::{MotionConfig, SpreadEstimator};
use crate::error::{QcError, QcResult};
use crate::fsglob::{glob_dir, is_dir, is_file};
use crate::io::read_table;
use crate::subject::{SubjectFilter, SubjectId};
use crate::table::{Breakdown, SubjectTable, Table};

/// Suffixes of the persisted views, in write order.
const VIEWS: [&str; 1] = ["all"];

const STEM: &str = "motion-outliers";

/// File names this check writes.
pub fn output_files() -> Vec<String> {
    VIEWS.iter().map(|view| Breakdown::file_name(STEM, view)).collect()
}

static CONFOUNDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        concat!(
            r"^sub-(?P<subject>[a-zA-Z\d]+)_task-(?P<task>[a-zA-Z\d]+)(?:_run-(?P<run>\d+))?",
            r"_desc-(?P<description>[a-zA-Z\d]+)_(?P<suffix>[a-zA-Z\d]+)\.tsv(?:\.gz)?$",
        ),
    )
    .expect("invalid CONFOUNDS_RE pattern")
});

/// Entities of a confound file name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfoundName {
    pub subject: String,
    pub task: String,
    pub run: Option<String>,
    pub description: String,
    pub suffix: String,
}

impl ConfoundName {
    pub fn parse(file_name: &str) -> Option<Self> {
        let caps = CONFOUNDS_RE.captures(file_name)?;
        let get = |name: &str| caps.name(name).map(|m| m.as_str().to_string());
        Some(ConfoundName {
            subject: get("subject")?,
            task: get("task")?,
            run: get("run"),
            description: get("description")?,
            suffix: get("suffix")?,
        })
    }

    /// Column key: `rest` or `rest_run-1`.
    pub fn task_key(&self) -> String {
        match &self.run {
            Some(run) => format!("{}_run-{run}", self.task),
            None => self.task.clone(),
        }
    }
}

fn is_missing(cell: &str) -> bool {
    cell.is_empty() || cell.eq_ignore_ascii_case("n/a") || cell.eq_ignore_ascii_case("nan")
}

/// Mean of `config.column` after skipping the warm-up rows.
///
/// Missing cells (`n/a`, `NaN`, empty) are left out of the mean; `None` when
/// nothing is left to average.
pub fn mean_displacement(path: &Path, config: &MotionConfig) -> QcResult<Option<f64>> {
    let raw = read_table(path, b'\t')?;
    let cells = raw.column(&config.column).ok_or_else(|| QcError::Confound {
        path: path.to_path_buf(),
        reason: format!("missing {:?} column", config.column),
    })?;
    let mut sum = 0.0;
    let mut n = 0usize;
    for (row, cell) in cells.enumerate().skip(config.skip_rows) {
        let cell = cell.trim();
        if is_missing(cell) {
            continue;
        }
        let value: f64 = cell.parse().map_err(|_| QcError::Confound {
            path: path.to_path_buf(),
            reason: format!("data row {}: {:?} is not a number", row + 1, cell),
        })?;
        sum += value;
        n += 1;
    }
    Ok((n > 0).then(|| sum / n as f64))
}

/// Mean displacement per task key for one subject.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplacementRecord {
    pub subject: SubjectId,
    pub by_task: BTreeMap<String, f64>,
}

/// Read every confound table in `<subject_dir>/func`.
///
/// A file that matches the confound glob but not the naming pattern aborts
/// the whole motion check.
pub fn subject_displacement(
    subject_dir: &Path,
    subject: SubjectId,
    config: &MotionConfig,
) -> QcResult<DisplacementRecord> {
    let mut by_task = BTreeMap::new();
    let func_dir = subject_dir.join("func");
    for path in glob_dir(&func_dir, &[config.confound_glob.as_str()], Some(&is_file))? {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let name = ConfoundName::parse(file_name)
            .ok_or_else(|| QcError::MalformedConfoundName { path: path.clone() })?;
        let key = name.task_key();
        let Some(mean) = mean_displacement(&path, config)? else {
            warn!("{}: no usable {} values", path.display(), config.column);
            continue;
        };
        if by_task.insert(key.clone(), mean).is_some() {
            warn!("{subject}: duplicate confound table for {key}, using {}", path.display());
        }
    }
    Ok(DisplacementRecord { subject, by_task })
}

/// Subjects x task keys; a missing combination has no entry.
#[derive(Clone, Debug, Default)]
pub struct DisplacementTable {
    pub records: Vec<DisplacementRecord>,
}

impl DisplacementTable {
    pub fn task_keys(&self) -> BTreeSet<&str> {
        self.records.iter().flat_map(|r| r.by_task.keys().map(String::as_str)).collect()
    }

    /// Non-null values of one task column.
    pub fn values(&self, task: &str) -> Vec<f64> {
        self.records.iter().filter_map(|r| r.by_task.get(task).copied()).collect()
    }
}

/// Group statistics for one task column.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GroupBound {
    pub n: usize,
    pub mean: f64,
    /// `None` when the estimator is undefined for `n` values
    pub spread: Option<f64>,
    pub upper: Option<f64>,
}

/// Mean, spread and upper bound over the non-null values of a task.
pub fn group_bound(
    values: &[f64],
    multiplier: f64,
    estimator: SpreadEstimator,
) -> Option<GroupBound> {
    if values.is_empty() {
        return None;
    }
    let n = values.len();
    let mean = values.iter().sum::<f64>() / n as f64;
    let spread = match estimator {
        SpreadEstimator::LegacyMean => Some(mean),
        SpreadEstimator::SampleStd if n < 2 => None,
        SpreadEstimator::SampleStd => {
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            Some((ss / (n - 1) as f64).sqrt())
        }
    };
    Some(GroupBound {
        n,
        mean,
        spread,
        upper: spread.map(|s| mean + multiplier * s),
    })
}

/// Per-subject verdicts. `None` means no value (or no bound) for that task.
#[derive(Clone, Debug, PartialEq)]
pub struct OutlierRecord {
    pub subject: SubjectId,
    pub flags: BTreeMap<String, Option<bool>>,
}

#[derive(Clone, Debug, Default)]
pub struct OutlierTable {
    pub tasks: Vec<String>,
    pub bounds: BTreeMap<String, GroupBound>,
    pub records: Vec<OutlierRecord>,
}

/// Replace every task column by an `is outlier` verdict.
pub fn flag_outliers(displacement: &DisplacementTable, config: &MotionConfig) -> OutlierTable {
    let tasks: Vec<String> = displacement.task_keys().into_iter().map(str::to_string).collect();
    let mut bounds = BTreeMap::new();
    for task in &tasks {
        let values = displacement.values(task);
        if let Some(bound) = group_bound(&values, config.multiplier, config.spread) {
            info!(
                "motion: {task} n={} mean={:.4} upper={}",
                bound.n,
                bound.mean,
                bound.upper.map_or_else(|| "undefined".to_string(), |u| format!("{u:.4}"))
            );
            bounds.insert(task.clone(), bound);
        }
    }
    let records = displacement
        .records
        .iter()
        .map(|record| OutlierRecord {
            subject: record.subject.clone(),
            flags: tasks
                .iter()
                .map(|task| {
                    let upper = bounds.get(task).and_then(|b: &GroupBound| b.upper);
                    let verdict = match (record.by_task.get(task), upper) {
                        (Some(value), Some(upper)) => Some(*value > upper),
                        _ => None,
                    };
                    (task.clone(), verdict)
                })
                .collect(),
        })
        .collect();
    OutlierTable {
        tasks,
        bounds,
        records,
    }
}

/// Collect displacement for every subject folder under `root`.
pub fn collect_displacement(
    root: &Path,
    config: &MotionConfig,
    filter: &SubjectFilter,
) -> QcResult<DisplacementTable> {
    if !root.is_dir() {
        warn!("processing-output root {} is not a directory", root.display());
    }
    let mut records = Vec::new();
    for subject_dir in glob_dir(root, &[config.subject_glob.as_str()], Some(&is_dir))? {
        let name = subject_dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let subject = match SubjectId::parse(name) {
            Ok(subject) => subject,
            Err(e) => {
                warn!("skipping {}: {e}", subject_dir.display());
                continue;
            }
        };
        if !filter.accepts(&subject) {
            continue;
        }
        let record = subject_displacement(&subject_dir, subject, config)?;
        if !record.by_task.is_empty() {
            records.push(record);
        }
    }
    records.sort_by(|a, b| a.subject.cmp(&b.subject));
    Ok(DisplacementTable { records })
}

/// Displacement collection followed by outlier flagging.
pub fn detect_motion(
    root: &Path,
    config: &MotionConfig,
    filter: &SubjectFilter,
) -> QcResult<OutlierTable> {
    let displacement = collect_displacement(root, config, filter)?;
    let table = flag_outliers(&displacement, config);
    info!(
        "motion: {} subjects, {} task keys, {} outlier flags",
        table.records.len(),
        table.tasks.len(),
        table.records.iter().flat_map(|r| r.flags.values()).filter(|f| **f == Some(true)).count()
    );
    Ok(table)
}

impl OutlierTable {
    pub fn breakdowns(&self) -> Vec<Breakdown> {
        vec![Breakdown::new(STEM, VIEWS[0], self.to_table())]
    }
}

impl SubjectTable for OutlierTable {
    fn component(&self) -> &'static str {
        "motion"
    }

    fn to_table(&self) -> Table {
        let columns = self.tasks.iter().map(|t| format!("{t}_is_outlier")).collect();
        let mut table = Table::new(columns);
        for record in &self.records {
            let cells = self
                .tasks
                .iter()
                .map(|t| record.flags.get(t).copied().flatten().map(|f| f.to_string()))
                .collect();
            table.push_row(record.subject.clone(), cells);
        }
        table
    }
}
