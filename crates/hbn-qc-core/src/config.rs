//! Pipeline configuration
//!
//! All thresholds, globs and markers live here instead of being scattered as
//! literals. Every section has defaults matching the HBN fMRIPrep layout, so a
//! TOML file only needs the keys it changes:
//!
//! ```toml
//! [jobs]
//! completed_threshold_kb = 2500.0
//!
//! [motion]
//! spread = "sample-std"
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QcError, QcResult};

/// One raw-data category to look for inside a subject folder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatatypeSpec {
    /// Sub-folder name (`anat`, `func`, `fmap`)
    pub category: String,
    /// Presence-flag column; the count column is `<flag>_files`
    pub flag: String,
    /// File-name glob counted inside the category folder
    pub glob: String,
}

impl DatatypeSpec {
    pub fn new(category: &str, flag: &str, glob: &str) -> Self {
        Self {
            category: category.to_string(),
            flag: flag.to_string(),
            glob: glob.to_string(),
        }
    }

    pub fn count_column(&self) -> String {
        format!("{}_files", self.flag)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PresenceConfig {
    pub datatypes: Vec<DatatypeSpec>,
    /// Categories whose absence excludes a subject
    pub mandatory: Vec<String>,
    pub subject_glob: String,
}

impl PresenceConfig {
    /// Look up a datatype spec by its category folder name.
    pub fn datatype(&self, category: &str) -> Option<&DatatypeSpec> {
        self.datatypes.iter().find(|spec| spec.category == category)
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            datatypes: vec![
                DatatypeSpec::new("anat", "t1", "*T1w.nii.gz*"),
                DatatypeSpec::new("func", "func", "*bold.nii.gz*"),
                DatatypeSpec::new("fmap", "fmap", "*fMRI_epi.nii.gz*"),
            ],
            mandatory: vec!["anat".to_string(), "fmap".to_string()],
            subject_glob: "sub-*".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompletionConfig {
    pub page_glob: String,
    pub id_column: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            page_glob: "*.html*".to_string(),
            id_column: "participant_id".to_string(),
        }
    }
}

/// Job-log heuristics. Sizes are in kilobytes (bytes / 1000).
///
/// A fMRIPrep log under `started_threshold_kb` never got past argument
/// parsing; one at or above `completed_threshold_kb` has the full report
/// trail of a finished run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobsConfig {
    pub log_glob: String,
    pub marker: String,
    /// Characters taken after the marker
    pub id_length: usize,
    /// Required label prefix (after an optional `sub-`)
    pub id_prefix: String,
    pub started_threshold_kb: f64,
    pub completed_threshold_kb: f64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            log_glob: "*.out*".to_string(),
            marker: "participant_label ".to_string(),
            id_length: 12,
            id_prefix: "NDA".to_string(),
            started_threshold_kb: 10.0,
            completed_threshold_kb: 4000.0,
        }
    }
}

/// How the group spread used in the outlier bound is estimated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpreadEstimator {
    /// Spread equals the group mean. Matches historical HBN reports.
    #[default]
    LegacyMean,
    /// Sample standard deviation (n - 1 denominator).
    SampleStd,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MotionConfig {
    pub subject_glob: String,
    pub confound_glob: String,
    pub column: String,
    /// Leading data rows discarded before averaging
    pub skip_rows: usize,
    /// Bound is `mean + multiplier * spread`
    pub multiplier: f64,
    pub spread: SpreadEstimator,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            subject_glob: "sub*".to_string(),
            confound_glob: "*.tsv*".to_string(),
            column: "framewise_displacement".to_string(),
            skip_rows: 1,
            multiplier: 2.0,
            spread: SpreadEstimator::LegacyMean,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QcConfig {
    pub presence: PresenceConfig,
    pub completion: CompletionConfig,
    pub jobs: JobsConfig,
    pub motion: MotionConfig,
}

impl QcConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> QcResult<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| QcError::io(path, e))?;
        let config: QcConfig = toml::from_str(&data).map_err(|source| QcError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> QcResult<()> {
        let mut categories = HashSet::new();
        let mut columns = HashSet::new();
        for spec in &self.presence.datatypes {
            if spec.category.is_empty() || spec.flag.is_empty() || spec.glob.is_empty() {
                return Err(QcError::Config(format!("incomplete datatype spec: {spec:?}")));
            }
            if !categories.insert(spec.category.as_str()) {
                return Err(QcError::Config(format!(
                    "duplicate datatype category {:?}",
                    spec.category
                )));
            }
            for column in [spec.flag.clone(), spec.count_column()] {
                if !columns.insert(column.clone()) {
                    return Err(QcError::Config(format!("duplicate presence column {column:?}")));
                }
            }
        }
        for category in &self.presence.mandatory {
            if self.presence.datatype(category).is_none() {
                return Err(QcError::Config(format!(
                    "mandatory category {category:?} has no datatype spec"
                )));
            }
        }

        let jobs = &self.jobs;
        if jobs.marker.is_empty() {
            return Err(QcError::Config("jobs.marker must not be empty".into()));
        }
        if jobs.id_length == 0 {
            return Err(QcError::Config("jobs.id_length must be >= 1".into()));
        }
        if !(jobs.started_threshold_kb >= 0.0
            && jobs.started_threshold_kb < jobs.completed_threshold_kb)
        {
            return Err(QcError::Config(format!(
                "job thresholds must satisfy 0 <= started ({}) < completed ({})",
                jobs.started_threshold_kb, jobs.completed_threshold_kb
            )));
        }

        if !(self.motion.multiplier >= 0.0) {
            return Err(QcError::Config("motion.multiplier must be >= 0".into()));
        }
        if self.motion.column.is_empty() {
            return Err(QcError::Config("motion.column must not be empty".into()));
        }
        if self.completion.id_column.is_empty() {
            return Err(QcError::Config("completion.id_column must not be empty".into()));
        }
        Ok(())
    }
}
