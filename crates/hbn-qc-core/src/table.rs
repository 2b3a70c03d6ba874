//! Subject-keyed tables shared by every QC component

use std::collections::HashSet;

use crate::subject::SubjectId;

/// Name of the index column written first in every output table.
pub const INDEX_COLUMN: &str = "participant_id";

/// A nullable cell. `None` means "no evidence", never "no" or zero.
pub type Cell = Option<String>;

/// Rows of nullable cells keyed by participant id, in insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<(SubjectId, Vec<Cell>)>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, id: SubjectId, cells: Vec<Cell>) {
        debug_assert_eq!(cells.len(), self.columns.len(), "row width mismatch for {id}");
        self.rows.push((id, cells));
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> impl Iterator<Item = (&SubjectId, &[Cell])> {
        self.rows.iter().map(|(id, cells)| (id, cells.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn subject_ids(&self) -> impl Iterator<Item = &SubjectId> {
        self.rows.iter().map(|(id, _)| id)
    }

    /// Cell lookup by subject and column name.
    pub fn get(&self, id: &SubjectId, column: &str) -> Option<&Cell> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.iter().find(|(row_id, _)| row_id == id).map(|(_, cells)| &cells[col])
    }

    /// Rows whose subject is in `ids`, keeping column layout and order.
    pub fn select(&self, ids: &HashSet<&SubjectId>) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|(id, _)| ids.contains(id)).cloned().collect(),
        }
    }

    /// Rows whose subject is not in `ids`.
    pub fn exclude(&self, ids: &HashSet<&SubjectId>) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|(id, _)| !ids.contains(id)).cloned().collect(),
        }
    }
}

/// A component result that can be flattened to a [`Table`].
pub trait SubjectTable {
    /// Short component name, used to namespace colliding summary columns.
    fn component(&self) -> &'static str;

    fn to_table(&self) -> Table;
}

/// One persisted view of a component table (`<stem>_<suffix>.csv`).
#[derive(Clone, Debug)]
pub struct Breakdown {
    pub file_name: String,
    pub table: Table,
}

impl Breakdown {
    pub fn new(stem: &str, suffix: &str, table: Table) -> Self {
        Self {
            file_name: Self::file_name(stem, suffix),
            table,
        }
    }

    pub fn file_name(stem: &str, suffix: &str) -> String {
        format!("{stem}_{suffix}.csv")
    }
}

/// Render a boolean as the `yes`/`no` flag used by presence and completion tables.
pub fn yes_no(value: bool) -> String {
    let flag = if value { "yes" } else { "no" };
    flag.to_string()
}
