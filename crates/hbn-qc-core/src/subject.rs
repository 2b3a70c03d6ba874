//! Participant identifiers and subject-list filtering

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::error::{QcError, QcResult};

const SUBJECT_PREFIX: &str = "sub-";

/// A BIDS participant id in its prefixed form, e.g. `sub-NDARAA075AMK`.
///
/// The label after `sub-` must be non-empty and ASCII alphanumeric.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    /// Parse a prefixed id (`sub-<label>`).
    pub fn parse(raw: &str) -> QcResult<Self> {
        let label = raw
            .strip_prefix(SUBJECT_PREFIX)
            .ok_or_else(|| QcError::InvalidSubjectId(raw.to_string()))?;
        Self::from_label(label).map_err(|_| QcError::InvalidSubjectId(raw.to_string()))
    }

    /// Build an id from a bare label (`NDARAA075AMK` -> `sub-NDARAA075AMK`).
    pub fn from_label(label: &str) -> QcResult<Self> {
        if is_valid_label(label) {
            Ok(SubjectId(format!("{SUBJECT_PREFIX}{label}")))
        } else {
            Err(QcError::InvalidSubjectId(label.to_string()))
        }
    }

    /// Full prefixed form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Optional restriction of the subject universe.
///
/// `SubjectFilter::All` accepts everyone; `Only` accepts the listed ids.
#[derive(Clone, Debug, Default)]
pub enum SubjectFilter {
    #[default]
    All,
    Only(BTreeSet<SubjectId>),
}

impl SubjectFilter {
    /// Load a subject list: one `sub-<label>` per line, `#` comments and blank lines skipped.
    pub fn from_file(path: &Path) -> QcResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| QcError::io(path, e))?;
        Self::parse_list(&content)
    }

    pub fn parse_list(content: &str) -> QcResult<Self> {
        let mut ids = BTreeSet::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            ids.insert(SubjectId::parse(line)?);
        }
        Ok(SubjectFilter::Only(ids))
    }

    pub fn accepts(&self, id: &SubjectId) -> bool {
        match self {
            SubjectFilter::All => true,
            SubjectFilter::Only(ids) => ids.contains(id),
        }
    }
}
