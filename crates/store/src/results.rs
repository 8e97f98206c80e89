//! Result files: one pretty-printed JSON array of records per search.

use std::path::{Path, PathBuf};

use pipeline::{OutputName, ResultRecord, ResultStore, StoreError};
use tracing::debug;

use crate::fs::{read_json, write_json_atomic};

/// Directory of result files.
#[derive(Debug, Clone)]
pub struct JsonResultStore {
    dir: PathBuf,
}

impl JsonResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_of(&self, name: &OutputName) -> PathBuf {
        self.dir.join(name.as_str())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ResultStore for JsonResultStore {
    fn load(&self, name: &OutputName) -> Result<Vec<ResultRecord>, StoreError> {
        let path = self.path_of(name);
        let records: Vec<ResultRecord> = read_json(&path)?.unwrap_or_default();
        debug!(path = %path.display(), records = records.len(), "result file loaded");
        Ok(records)
    }

    fn save(&self, name: &OutputName, records: &[ResultRecord]) -> Result<(), StoreError> {
        let path = self.path_of(name);
        write_json_atomic(&path, records)?;
        debug!(path = %path.display(), records = records.len(), "result file written");
        Ok(())
    }
}
