//! Outer join of the component tables into one row per subject

use std::collections::{BTreeMap, HashSet};

use crate::subject::SubjectId;
use crate::table::{Cell, INDEX_COLUMN, SubjectTable, Table};

pub const SUMMARY_FILE: &str = "qc-summary_all.csv";

/// Join `parts` on participant id.
///
/// The key space is the union of all parts' subjects, sorted. Cells a part
/// has no row for stay null. A column name already taken by an earlier part
/// is emitted as `<component>_<column>`.
pub fn outer_join(parts: &[&dyn SubjectTable]) -> Table {
    let tables: Vec<(&'static str, Table)> =
        parts.iter().map(|p| (p.component(), p.to_table())).collect();

    let mut taken: HashSet<String> = HashSet::from([INDEX_COLUMN.to_string()]);
    let mut columns = Vec::new();
    for (component, table) in &tables {
        for column in table.columns() {
            let mut name = column.clone();
            if taken.contains(&name) {
                name = format!("{component}_{column}");
            }
            let base = name.clone();
            let mut n = 2;
            while taken.contains(&name) {
                name = format!("{base}_{n}");
                n += 1;
            }
            taken.insert(name.clone());
            columns.push(name);
        }
    }

    let width = columns.len();
    let mut rows: BTreeMap<SubjectId, Vec<Cell>> = BTreeMap::new();
    let mut offset = 0;
    for (_, table) in &tables {
        for (id, cells) in table.rows() {
            let row = rows.entry(id.clone()).or_insert_with(|| vec![None; width]);
            row[offset..offset + cells.len()].clone_from_slice(cells);
        }
        offset += table.columns().len();
    }

    let mut joined = Table::new(columns);
    for (id, cells) in rows {
        joined.push_row(id, cells);
    }
    joined
}
