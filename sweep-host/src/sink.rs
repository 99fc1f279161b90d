//! CSV persistence for completed sweep points.
//!
//! Files live at `<data_dir>/measurements_<YYYY-MM-DD>/<CHANNEL>.csv` and are
//! only ever appended to; the header is written when a file is created.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use sweep_core::emulator::ChannelType;
use sweep_core::sweep::PointResult;
use tracing::debug;

use crate::config::CsvMode;
use crate::error::HostError;

const SUMMARY_HEADER: [&str; 4] = ["sent", "received", "snr", "mcs"];
const RECORDS_HEADER: [&str; 3] = ["record", "snr", "mcs"];

#[derive(Clone, Debug)]
pub struct CsvSink {
    root: PathBuf,
    mode: CsvMode,
}

impl CsvSink {
    pub fn new(root: impl Into<PathBuf>, mode: CsvMode) -> Self {
        Self {
            root: root.into(),
            mode,
        }
    }

    #[must_use]
    pub fn path_for(&self, date: NaiveDate, channel: ChannelType) -> PathBuf {
        self.root
            .join(format!("measurements_{}", date.format("%Y-%m-%d")))
            .join(format!("{channel}.csv"))
    }

    /// Appends `result` to today's file for its channel.
    ///
    /// # Errors
    ///
    /// Directory creation, file and CSV write failures.
    pub fn persist(&self, result: &PointResult) -> Result<Option<PathBuf>, HostError> {
        self.persist_on(Local::now().date_naive(), result)
    }

    /// Returns the file written, or `None` when the point produced no row.
    ///
    /// # Errors
    ///
    /// Directory creation, file and CSV write failures.
    pub fn persist_on(
        &self,
        date: NaiveDate,
        result: &PointResult,
    ) -> Result<Option<PathBuf>, HostError> {
        let snr = result.point.snr.to_string();
        let mcs = result.point.mcs.to_string();
        let rows: Vec<Vec<String>> = match self.mode {
            CsvMode::Summary => match (result.sent, result.received) {
                (Some(sent), Some(received)) => vec![vec![
                    sent.to_string(),
                    received.to_string(),
                    snr,
                    mcs,
                ]],
                _ => Vec::new(),
            },
            CsvMode::Records => result
                .records
                .iter()
                .map(|record| vec![record.to_string(), snr.clone(), mcs.clone()])
                .collect(),
        };
        if rows.is_empty() {
            debug!(point = %result.point, mode = ?self.mode, "nothing to persist");
            return Ok(None);
        }

        let path = self.path_for(date, result.channel);
        self.append(&path, &rows)?;
        debug!(point = %result.point, rows = rows.len(), path = %path.display(), "point persisted");
        Ok(Some(path))
    }

    fn append(&self, path: &Path, rows: &[Vec<String>]) -> Result<(), HostError> {
        let io_error = |source| HostError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_error)?;
        }
        let fresh = !fs::metadata(path).is_ok_and(|meta| meta.len() > 0);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_error)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if fresh {
            match self.mode {
                CsvMode::Summary => writer.write_record(SUMMARY_HEADER)?,
                CsvMode::Records => writer.write_record(RECORDS_HEADER)?,
            }
        }
        for row in rows {
            writer.write_record(row)?;
        }
        writer.flush().map_err(io_error)
    }
}
