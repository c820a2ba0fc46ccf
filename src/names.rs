//! River system names keyed by way id, loaded from an `id,rsystem` CSV.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};

const HEADER: &str = "id,rsystem";

/// Read-only id → name table. Each distinct name is stored once and shared
/// by every id that refers to it.
#[derive(Debug, Default)]
pub struct RiverNameTable {
    names: HashSet<Arc<str>>,
    by_id: HashMap<i64, Arc<str>>,
}

impl RiverNameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| Error::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file, path)
    }

    /// Parse CSV content from `reader`; `origin` names the input in errors.
    pub fn from_reader<R: Read>(reader: R, origin: &Path) -> Result<Self> {
        let mut reader = BufReader::new(reader);

        let mut header = String::new();
        reader.read_line(&mut header)?;
        let header = header.trim_end_matches(['\n', '\r']);
        if header.is_empty() {
            return Err(Error::FileFormat(format!(
                "Can't read from file {}",
                origin.display()
            )));
        }
        if header != HEADER {
            return Err(Error::FileFormat(format!("Wrong csv header: {}", header)));
        }

        let mut rows = csv::ReaderBuilder::new()
            .has_headers(false)
            .quoting(false)
            .flexible(true)
            .from_reader(reader);

        let mut table = Self::new();
        for result in rows.records() {
            let record = result.map_err(|err| Error::Parse {
                path: origin.to_path_buf(),
                line: err.position().map(|p| p.line() + 1).unwrap_or(0),
                message: err.to_string(),
            })?;
            // Lines are counted after the header we consumed ourselves.
            let line = record.position().map(|p| p.line() + 1).unwrap_or(0);

            let raw_id = record.get(0).unwrap_or("").trim();
            let id = raw_id.parse::<i64>().map_err(|err| Error::Parse {
                path: origin.to_path_buf(),
                line,
                message: format!("invalid id '{}': {}", raw_id, err),
            })?;
            if record.len() < 2 {
                return Err(Error::Parse {
                    path: origin.to_path_buf(),
                    line,
                    message: format!("missing name for id {}", id),
                });
            }

            let name = record.iter().skip(1).collect::<Vec<_>>().join(",");
            table.insert(id, name.trim());
        }

        tracing::info!(
            "Loaded {} river system ids ({} distinct names) from {:?}",
            table.len(),
            table.distinct_names(),
            origin
        );
        Ok(table)
    }

    /// Associate `name` with `id`. The first name seen for an id is kept.
    pub fn insert(&mut self, id: i64, name: &str) {
        let interned = match self.names.get(name) {
            Some(existing) => Arc::clone(existing),
            None => {
                let fresh: Arc<str> = Arc::from(name);
                self.names.insert(Arc::clone(&fresh));
                fresh
            }
        };
        self.by_id.entry(id).or_insert(interned);
    }

    /// Name for `id`, or an empty string when the id is unknown.
    pub fn lookup(&self, id: i64) -> &str {
        self.by_id.get(&id).map(|name| &**name).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn distinct_names(&self) -> usize {
        self.names.len()
    }
}
