//! Raw-data presence detection
//!
//! For every `sub-*` folder of a BIDS root, count the files of each known
//! datatype category (`anat`, `func`, `fmap`, ...). A category folder that
//! does not exist contributes nothing for that subject: its cells stay null
//! instead of turning into a fabricated "no"/0.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use log::{debug, info, warn};

use crate::config::{DatatypeSpec, PresenceConfig};
use crate::error::QcResult;
use crate::fsglob::{glob_dir, is_dir};
use crate::subject::{SubjectFilter, SubjectId};
use crate::table::{Breakdown, SubjectTable, Table, yes_no};

/// Suffixes of the persisted views, in write order.
const VIEWS: [&str; 3] = ["exclude", "include", "all"];

const STEM: &str = "BIDS-count";

/// File names this check writes.
pub fn output_files() -> Vec<String> {
    VIEWS.iter().map(|view| Breakdown::file_name(STEM, view)).collect()
}

/// Files found for one category folder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresenceCount {
    pub files: usize,
}

impl PresenceCount {
    pub fn present(&self) -> bool {
        self.files > 0
    }
}

/// Per-subject counts keyed by category. Categories without a folder are absent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresenceRecord {
    pub subject: SubjectId,
    pub counts: BTreeMap<String, PresenceCount>,
}

/// The full presence table plus drop bookkeeping.
#[derive(Clone, Debug)]
pub struct PresenceTable {
    specs: Vec<DatatypeSpec>,
    mandatory: Vec<String>,
    pub records: Vec<PresenceRecord>,
    /// Sub-folders whose name matched no datatype category
    pub ignored_folders: usize,
    /// `sub-*` folders whose name is not a valid participant id
    pub skipped_subjects: usize,
}

/// Count the datatype files of one subject folder.
///
/// Returns the record and the number of sub-folders ignored because their
/// name is not a known category.
pub fn detect_subject(
    subject_dir: &Path,
    subject: SubjectId,
    config: &PresenceConfig,
) -> QcResult<(PresenceRecord, usize)> {
    let mut counts = BTreeMap::new();
    let mut ignored = 0;
    for datatype_dir in glob_dir(subject_dir, &["*"], Some(&is_dir))? {
        let name = datatype_dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let Some(spec) = config.datatype(name) else {
            debug!("{subject}: ignoring folder {}", datatype_dir.display());
            ignored += 1;
            continue;
        };
        let files = glob_dir(&datatype_dir, &[spec.glob.as_str()], None)?.len();
        counts.insert(spec.category.clone(), PresenceCount { files });
    }
    Ok((PresenceRecord { subject, counts }, ignored))
}

/// Build the presence table for every subject folder under `bids_dir`.
pub fn detect_all(
    bids_dir: &Path,
    config: &PresenceConfig,
    filter: &SubjectFilter,
) -> QcResult<PresenceTable> {
    if !bids_dir.is_dir() {
        warn!("raw-data root {} is not a directory", bids_dir.display());
    }
    let mut table = PresenceTable {
        specs: config.datatypes.clone(),
        mandatory: config.mandatory.clone(),
        records: Vec::new(),
        ignored_folders: 0,
        skipped_subjects: 0,
    };
    for subject_dir in glob_dir(bids_dir, &[config.subject_glob.as_str()], Some(&is_dir))? {
        let name = subject_dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let subject = match SubjectId::parse(name) {
            Ok(subject) => subject,
            Err(e) => {
                warn!("skipping {}: {e}", subject_dir.display());
                table.skipped_subjects += 1;
                continue;
            }
        };
        if !filter.accepts(&subject) {
            continue;
        }
        let (record, ignored) = detect_subject(&subject_dir, subject, config)?;
        table.ignored_folders += ignored;
        table.records.push(record);
    }
    table.records.sort_by(|a, b| a.subject.cmp(&b.subject));
    info!(
        "presence: {} subjects, {} excluded, {} unknown folders ignored",
        table.records.len(),
        table.excluded().len(),
        table.ignored_folders
    );
    Ok(table)
}

impl PresenceTable {
    /// Subjects missing files for any mandatory category.
    ///
    /// A missing category folder counts as zero files here, even though the
    /// table itself leaves those cells null.
    pub fn excluded(&self) -> HashSet<&SubjectId> {
        self.records
            .iter()
            .filter(|record| {
                self.mandatory.iter().any(|category| {
                    record.counts.get(category).is_none_or(|count| !count.present())
                })
            })
            .map(|record| &record.subject)
            .collect()
    }

    /// Datatype specs observed for at least one subject, in configured order.
    fn observed_specs(&self) -> Vec<&DatatypeSpec> {
        self.specs
            .iter()
            .filter(|spec| self.records.iter().any(|r| r.counts.contains_key(&spec.category)))
            .collect()
    }

    /// `all`, `exclude` and `include` views.
    pub fn breakdowns(&self) -> Vec<Breakdown> {
        let all = self.to_table();
        let [exclude, include, all_rows] = VIEWS;
        let excluded = self.excluded();
        vec![
            Breakdown::new(STEM, exclude, all.select(&excluded)),
            Breakdown::new(STEM, include, all.exclude(&excluded)),
            Breakdown::new(STEM, all_rows, all),
        ]
    }
}

impl SubjectTable for PresenceTable {
    fn component(&self) -> &'static str {
        "presence"
    }

    fn to_table(&self) -> Table {
        let specs = self.observed_specs();
        let columns = specs.iter().flat_map(|s| [s.flag.clone(), s.count_column()]).collect();
        let mut table = Table::new(columns);
        for record in &self.records {
            let cells = specs
                .iter()
                .flat_map(|spec| match record.counts.get(&spec.category) {
                    Some(count) => [Some(yes_no(count.present())), Some(count.files.to_string())],
                    None => [None, None],
                })
                .collect();
            table.push_row(record.subject.clone(), cells);
        }
        table
    }
}
