//! fMRIPrep report-page check
//!
//! fMRIPrep writes one `sub-<label>.html` report per finished subject at the
//! top of its output directory. Each participant in the registry gets a
//! yes/no flag for that page; the registry's own columns and row order are
//! carried through unchanged.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use log::{info, warn};

use crate::config::CompletionConfig;
use crate::error::{QcError, QcResult};
use crate::fsglob::{glob_dir, is_file};
use crate::io::{delimiter_for, read_table};
use crate::subject::{SubjectFilter, SubjectId};
use crate::table::{Breakdown, SubjectTable, Table, yes_no};

/// Suffixes of the persisted views, in write order.
const VIEWS: [&str; 3] = ["no", "yes", "all"];

const STEM: &str = "html-check";

/// File names this check writes.
pub fn output_files() -> Vec<String> {
    VIEWS.iter().map(|view| Breakdown::file_name(STEM, view)).collect()
}
const PAGE_COLUMN: &str = "html";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionRecord {
    pub subject: SubjectId,
    /// Registry cells other than the id column, aligned with `CompletionTable::extra_columns`
    pub extra: Vec<String>,
    pub has_page: bool,
}

#[derive(Clone, Debug, Default)]
pub struct CompletionTable {
    pub extra_columns: Vec<String>,
    pub records: Vec<CompletionRecord>,
}

/// Registry of expected participants loaded from `participants.tsv`.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    pub extra_columns: Vec<String>,
    pub rows: Vec<(SubjectId, Vec<String>)>,
}

impl Registry {
    /// Load the registry. Any failure here is fatal for the completion check.
    pub fn load(path: &Path, id_column: &str) -> QcResult<Self> {
        let registry_err = |reason: String| QcError::Registry {
            path: path.to_path_buf(),
            reason,
        };
        let raw = read_table(path, delimiter_for(path)).map_err(|e| registry_err(e.to_string()))?;
        let id_idx = raw
            .column_index(id_column)
            .ok_or_else(|| registry_err(format!("missing {id_column:?} column")))?;

        let extra_columns = raw
            .headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id_idx)
            .map(|(_, h)| h.clone())
            .collect();
        let mut seen = HashSet::new();
        let mut rows = Vec::with_capacity(raw.rows.len());
        for (line, row) in raw.rows.into_iter().enumerate() {
            let raw_id = row.get(id_idx).map(|s| s.trim()).unwrap_or_default();
            let subject = SubjectId::parse(raw_id)
                .map_err(|e| registry_err(format!("data row {}: {e}", line + 1)))?;
            if !seen.insert(subject.clone()) {
                warn!("{}: duplicate participant {subject}, keeping first row", path.display());
                continue;
            }
            let extra =
                row.into_iter().enumerate().filter(|(i, _)| *i != id_idx).map(|(_, v)| v).collect();
            rows.push((subject, extra));
        }
        Ok(Registry {
            extra_columns,
            rows,
        })
    }
}

/// Stems of page files directly under `output_root` (`sub-X.html` -> `sub-X`).
pub fn find_pages(output_root: &Path, page_glob: &str) -> QcResult<BTreeSet<String>> {
    Ok(glob_dir(output_root, &[page_glob], Some(&is_file))?
        .iter()
        .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
        .collect())
}

/// Flag each registered participant by whether its report page exists.
pub fn check_registry(
    registry: Registry,
    pages: &BTreeSet<String>,
    filter: &SubjectFilter,
) -> CompletionTable {
    let records = registry
        .rows
        .into_iter()
        .filter(|(subject, _)| filter.accepts(subject))
        .map(|(subject, extra)| CompletionRecord {
            has_page: pages.contains(subject.as_str()),
            subject,
            extra,
        })
        .collect();
    CompletionTable {
        extra_columns: registry.extra_columns,
        records,
    }
}

/// Load the registry at `registry_path` and check pages under `output_root`.
pub fn check_pages(
    output_root: &Path,
    registry_path: &Path,
    config: &CompletionConfig,
    filter: &SubjectFilter,
) -> QcResult<CompletionTable> {
    let registry = Registry::load(registry_path, &config.id_column)?;
    let pages = find_pages(output_root, &config.page_glob)?;
    let table = check_registry(registry, &pages, filter);
    info!(
        "completion: {} registered, {} without a report page",
        table.records.len(),
        table.missing().len()
    );
    Ok(table)
}

impl CompletionTable {
    pub fn missing(&self) -> HashSet<&SubjectId> {
        self.records.iter().filter(|r| !r.has_page).map(|r| &r.subject).collect()
    }

    /// `all`, `no` and `yes` views.
    pub fn breakdowns(&self) -> Vec<Breakdown> {
        let all = self.to_table();
        let [no, yes, all_rows] = VIEWS;
        let missing = self.missing();
        vec![
            Breakdown::new(STEM, no, all.select(&missing)),
            Breakdown::new(STEM, yes, all.exclude(&missing)),
            Breakdown::new(STEM, all_rows, all),
        ]
    }
}

impl SubjectTable for CompletionTable {
    fn component(&self) -> &'static str {
        "completion"
    }

    fn to_table(&self) -> Table {
        let mut columns = self.extra_columns.clone();
        columns.push(PAGE_COLUMN.to_string());
        let mut table = Table::new(columns);
        for record in &self.records {
            let mut cells: Vec<_> = record.extra.iter().map(|v| Some(v.clone())).collect();
            cells.push(Some(yes_no(record.has_page)));
            table.push_row(record.subject.clone(), cells);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn id(s: &str) -> SubjectId {
        SubjectId::parse(s).unwrap()
    }

    #[test]
    fn flags_pages_and_keeps_registry_order() {
        let td = TempDir::new().unwrap();
        let out = td.path().join("fmriprep");
        fs::create_dir(&out).unwrap();
        fs::write(out.join("sub-B.html"), "<html/>").unwrap();
        fs::create_dir(out.join("sub-C")).unwrap();
        let registry = td.path().join("participants.tsv");
        fs::write(&registry, "participant_id\tage\nsub-C\t9\nsub-B\t11\nsub-A\t7\n").unwrap();

        let config = CompletionConfig::default();
        let table = check_pages(&out, &registry, &config, &SubjectFilter::All).unwrap();
        let flat = table.to_table();
        assert_eq!(flat.columns(), ["age", "html"]);
        let order: Vec<_> = flat.subject_ids().map(SubjectId::as_str).collect();
        assert_eq!(order, ["sub-C", "sub-B", "sub-A"]);
        assert_eq!(flat.get(&id("sub-B"), "html"), Some(&Some("yes".into())));
        // a subject folder is not a page
        assert_eq!(flat.get(&id("sub-C"), "html"), Some(&Some("no".into())));
        assert_eq!(flat.get(&id("sub-A"), "age"), Some(&Some("7".into())));

        let views = table.breakdowns();
        assert_eq!(views[0].file_name, "html-check_no.csv");
        assert_eq!(views[0].table.len(), 2);
        assert_eq!(views[1].table.len(), 1);
        assert_eq!(views[2].table.len(), 3);
    }

    #[test]
    fn missing_registry_is_fatal() {
        let td = TempDir::new().unwrap();
        let err = check_pages(
            td.path(),
            &td.path().join("participants.tsv"),
            &CompletionConfig::default(),
            &SubjectFilter::All,
        )
        .unwrap_err();
        assert!(matches!(err, QcError::Registry { .. }));
        assert!(err.to_string().contains("participants.tsv"));
    }

    #[test]
    fn registry_without_id_column_is_fatal() {
        let td = TempDir::new().unwrap();
        let registry = td.path().join("participants.csv");
        fs::write(&registry, "subject,age\nsub-A,7\n").unwrap();
        let err = Registry::load(&registry, "participant_id").unwrap_err();
        assert!(err.to_string().contains("participant_id"));
    }

    #[test]
    fn empty_registry_gives_empty_table() {
        let td = TempDir::new().unwrap();
        let registry = td.path().join("participants.tsv");
        fs::write(&registry, "participant_id\n").unwrap();
        let config = CompletionConfig::default();
        let table = check_pages(td.path(), &registry, &config, &SubjectFilter::All).unwrap();
        assert!(table.records.is_empty());
        assert!(table.breakdowns().iter().all(|b| b.table.is_empty()));
    }

    #[test]
    fn duplicate_registry_rows_keep_first() {
        let td = TempDir::new().unwrap();
        let registry = td.path().join("participants.tsv");
        fs::write(&registry, "participant_id\tsex\nsub-A\tF\nsub-A\tM\n").unwrap();
        let loaded = Registry::load(&registry, "participant_id").unwrap();
        assert_eq!(loaded.rows, vec![(id("sub-A"), vec!["F".to_string()])]);
    }
}
