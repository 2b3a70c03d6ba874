//! Directory globbing

use std::path::{Path, PathBuf};

use crate::error::{QcError, QcResult};

const MATCH_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: true,
};

/// List entries directly under `root` whose names match any of `patterns`.
///
/// `root` is escaped, so brackets or asterisks in the dataset path are taken
/// literally. Hidden entries (`.DS_Store`, AppleDouble `._*` files) only match
/// a pattern that starts with a literal dot. Results are sorted and
/// de-duplicated; a missing `root` yields an empty list. `accept` filters the
/// matches (e.g. directories only).
pub fn glob_dir(
    root: &Path,
    patterns: &[&str],
    accept: Option<&dyn Fn(&Path) -> bool>,
) -> QcResult<Vec<PathBuf>> {
    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
    let mut out = Vec::new();
    for pattern in patterns {
        let full = format!("{escaped_root}/{pattern}");
        let paths = glob::glob_with(&full, MATCH_OPTIONS).map_err(|source| QcError::Glob {
            pattern: full.clone(),
            source,
        })?;
        for entry in paths {
            let path = entry.map_err(|e| QcError::io(e.path().to_path_buf(), e.into_error()))?;
            if accept.is_none_or(|f| f(path.as_path())) {
                out.push(path);
            }
        }
    }
    out.sort();
    out.dedup();
    Ok(out)
}

/// `accept` predicate selecting directories.
pub fn is_dir(path: &Path) -> bool {
    path.is_dir()
}

/// `accept` predicate selecting regular files.
pub fn is_file(path: &Path) -> bool {
    path.is_file()
}
