//! Table I/O (gzip aware)

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::error::{QcError, QcResult};
use crate::table::{INDEX_COLUMN, Table};

const READER_BUF_CAP: usize = 128 * 1024; // 128 KiB

/// Open `path` for reading, decompressing `.gz` files on the fly.
pub fn open_reader<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead>> {
    let p = path.as_ref();
    let f = File::open(p)?;
    if is_gzip(p) {
        let dec = flate2::read::GzDecoder::new(f);
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, dec)));
    }
    Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, f)))
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gz"))
}

/// Field delimiter implied by a file name: tab for `.tsv`/`.tsv.gz`, comma otherwise.
pub fn delimiter_for(path: &Path) -> u8 {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_ascii_lowercase();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    if name.ends_with(".tsv") { b'\t' } else { b',' }
}

/// A delimited file loaded as header + string rows.
#[derive(Clone, Debug, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn column<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a str> + 'a> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| row.get(idx).map(String::as_str).unwrap_or("")))
    }
}

/// Read a delimited table with a header row.
pub fn read_table(path: &Path, delimiter: u8) -> QcResult<RawTable> {
    let reader = open_reader(path).map_err(|e| QcError::io(path, e))?;
    let mut rdr = csv::ReaderBuilder::new().delimiter(delimiter).from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| QcError::csv(path, e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| QcError::csv(path, e))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(RawTable { headers, rows })
}

/// Write `table` as CSV with the participant id as first column. Null cells are empty.
pub fn write_table(path: &Path, table: &Table) -> QcResult<()> {
    let mut out = csv::Writer::from_path(path).map_err(|e| QcError::csv(path, e))?;
    let header = std::iter::once(INDEX_COLUMN).chain(table.columns().iter().map(String::as_str));
    out.write_record(header).map_err(|e| QcError::csv(path, e))?;
    for (id, cells) in table.rows() {
        let record =
            std::iter::once(id.as_str()).chain(cells.iter().map(|c| c.as_deref().unwrap_or("")));
        out.write_record(record).map_err(|e| QcError::csv(path, e))?;
    }
    out.flush().map_err(|e| QcError::io(path, e))?;
    Ok(())
}
