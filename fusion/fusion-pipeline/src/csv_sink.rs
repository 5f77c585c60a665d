use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// CSV writer whose header is the union of all keys observed so far.
///
/// Rows are supplied as key/value sets; a row introducing a new key extends
/// the header, and the file is rewritten in place so the first line always
/// covers every column. Array-valued fields render space-separated within
/// their cell.
pub struct UnionCsvWriter {
    path: PathBuf,
    /// column name -> column index
    header: HashMap<String, usize>,
    rows: Vec<Vec<String>>,
}

impl UnionCsvWriter {
    pub fn create(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            header: HashMap::new(),
            rows: Vec::new(),
        }
    }

    /// Append one frame's row and flush the file. `values` pairs a column
    /// key with the (possibly multi-element) cell content.
    pub fn write_row(&mut self, values: &[(String, Vec<String>)]) -> Result<()> {
        let mut header_updated = false;
        for (key, _) in values {
            if !self.header.contains_key(key) {
                let idx = self.header.len();
                self.header.insert(key.clone(), idx);
                header_updated = true;
            }
        }

        let mut row = vec![String::new(); self.header.len()];
        for (key, cell) in values {
            row[self.header[key]] = cell.join(" ");
        }
        self.rows.push(row);

        if header_updated {
            self.rewrite_all()
        } else {
            self.append_last_row()
        }
    }

    fn header_names(&self) -> Vec<String> {
        let mut names = vec![String::new(); self.header.len()];
        for (name, &idx) in &self.header {
            names[idx] = name.clone();
        }
        names
    }

    /// Rewrite the whole file: header line, then every row padded to the
    /// current column count.
    fn rewrite_all(&self) -> Result<()> {
        let mut writer = csv::Writer::from_path(&self.path)?;
        writer.write_record(self.header_names())?;
        let width = self.header.len();
        for row in &self.rows {
            let mut padded = row.clone();
            padded.resize(width, String::new());
            writer.write_record(&padded)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn append_last_row(&self) -> Result<()> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(self.header_names())?;
        }
        if let Some(row) = self.rows.last() {
            let mut padded = row.clone();
            padded.resize(self.header.len(), String::new());
            writer.write_record(&padded)?;
        }
        writer.flush()?;
        Ok(())
    }
}
