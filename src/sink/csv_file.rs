use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use super::{ensure_parent, ColumnSet, Sink};
use crate::extractor::ChannelRecord;

pub struct CsvSink {
    path: PathBuf,
    columns: ColumnSet,
}

impl CsvSink {
    pub fn new(path: PathBuf, columns: ColumnSet) -> Self {
        CsvSink { path, columns }
    }
}

impl Sink for CsvSink {
    fn write(&self, records: &[ChannelRecord]) -> Result<()> {
        ensure_parent(&self.path)?;
        let mut wtr = csv::Writer::from_path(&self.path)
            .with_context(|| format!("Failed to create {}", self.path.display()))?;
        wtr.write_record(self.columns.headers())?;
        for r in records {
            wtr.write_record(self.columns.row(r))?;
        }
        wtr.flush()?;
        info!(rows = records.len(), "Wrote {}", self.path.display());
        Ok(())
    }

    fn target(&self) -> &Path {
        &self.path
    }
}
