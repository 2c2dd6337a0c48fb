use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use stroop_core::{Paradigm, TrialResult};
use thiserror::Error;
use tracing::{info, warn};

use crate::recorder::{RunStatus, SessionInfo};
use crate::summary::SessionSummary;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode rows: {0}")]
    Csv(#[from] csv::Error),
}

impl PersistenceError {
    fn io(path: &Path, source: io::Error) -> Self {
        PersistenceError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Durable destination for trial rows and the end-of-run summary.
pub trait TrialSink {
    /// Appends rows. Either all of `results` land or an error is returned.
    fn append(&mut self, results: &[TrialResult]) -> Result<(), PersistenceError>;

    fn write_summary(
        &mut self,
        info: &SessionInfo,
        status: RunStatus,
        summary: &SessionSummary,
    ) -> Result<(), PersistenceError>;
}

/// One raw-data row. Column names are part of the file format.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialRow {
    pub trial_index: usize,
    pub contrast_mode: &'static str,
    pub word: &'static str,
    pub ink_color: &'static str,
    pub congruent: bool,
    /// Stimulus onset, ns on the run clock.
    pub onset_timestamp: u64,
    pub response_key: Option<char>,
    pub reaction_time_ms: Option<f64>,
    pub correct: Option<bool>,
    pub timed_out: bool,
    /// Inter-trial interval in ms.
    pub iti: f64,
    pub block_index: usize,
}

impl From<&TrialResult> for TrialRow {
    fn from(r: &TrialResult) -> Self {
        let spec = r.spec();
        TrialRow {
            trial_index: spec.index,
            contrast_mode: spec.contrast_mode.label(),
            word: spec.stimulus.word().word(),
            ink_color: spec.stimulus.ink().name(),
            congruent: spec.stimulus.is_congruent(),
            onset_timestamp: r.onset_ns(),
            response_key: r.response_key(),
            reaction_time_ms: r.reaction_time_ms(),
            correct: r.correct(),
            timed_out: r.is_timed_out(),
            iti: spec.iti_ms,
            block_index: spec.block_index,
        }
    }
}

#[derive(Serialize)]
struct MeasureRow<'a> {
    measure: &'a str,
    value: &'a str,
}

/// CSV files under one output directory:
/// `stroop_<paradigm>_raw_<participant>_<session>.csv` and the matching
/// `_summary_` file.
#[derive(Debug)]
pub struct CsvSink {
    raw_path: PathBuf,
    summary_path: PathBuf,
    raw: File,
    header_written: bool,
    /// Next append stops after this many bytes and fails.
    #[cfg(test)]
    short_write_at: Option<usize>,
}

impl CsvSink {
    /// Creates the directory and truncates the raw file.
    pub fn create(dir: &Path, info: &SessionInfo) -> Result<Self, PersistenceError> {
        fs::create_dir_all(dir).map_err(|e| PersistenceError::io(dir, e))?;
        let raw_path = dir.join(file_name(info.paradigm, "raw", info));
        let summary_path = dir.join(file_name(info.paradigm, "summary", info));
        let raw = File::create(&raw_path).map_err(|e| PersistenceError::io(&raw_path, e))?;
        info!(raw = %raw_path.display(), summary = %summary_path.display(), "recording to csv");
        Ok(Self {
            raw_path,
            summary_path,
            raw,
            header_written: false,
            #[cfg(test)]
            short_write_at: None,
        })
    }

    pub fn raw_path(&self) -> &Path {
        &self.raw_path
    }

    pub fn summary_path(&self) -> &Path {
        &self.summary_path
    }

    fn write_batch(&mut self, bytes: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if let Some(n) = self.short_write_at.take() {
            self.raw.write_all(&bytes[..n.min(bytes.len())])?;
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short write"));
        }
        self.raw.write_all(bytes)?;
        self.raw.sync_data()
    }

    /// Cuts the raw file back to `len` bytes and moves the cursor there.
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.raw.set_len(len)?;
        self.raw.seek(SeekFrom::Start(len))?;
        Ok(())
    }
}

fn file_name(paradigm: Paradigm, kind: &str, info: &SessionInfo) -> String {
    format!(
        "stroop_{}_{kind}_{}_{}.csv",
        paradigm.slug(),
        info.participant,
        info.session
    )
}

impl TrialSink for CsvSink {
    fn append(&mut self, results: &[TrialResult]) -> Result<(), PersistenceError> {
        // Encode the whole batch first so a failed write never leaves half a row.
        let mut w = csv::WriterBuilder::new()
            .has_headers(!self.header_written)
            .from_writer(Vec::new());
        for r in results {
            w.serialize(TrialRow::from(r))?;
        }
        let bytes = w
            .into_inner()
            .map_err(|e| PersistenceError::io(&self.raw_path, e.into_error()))?;

        // A partial write is cut off again so a retry starts from the last
        // complete batch.
        let len = self
            .raw
            .stream_position()
            .map_err(|e| PersistenceError::io(&self.raw_path, e))?;
        if let Err(e) = self.write_batch(&bytes) {
            if let Err(te) = self.truncate_to(len) {
                warn!(path = %self.raw_path.display(), "could not roll back partial write: {te}");
            }
            return Err(PersistenceError::io(&self.raw_path, e));
        }
        self.header_written = true;
        Ok(())
    }

    fn write_summary(
        &mut self,
        info: &SessionInfo,
        status: RunStatus,
        summary: &SessionSummary,
    ) -> Result<(), PersistenceError> {
        let mut w = csv::Writer::from_writer(Vec::new());
        for (measure, value) in summary_rows(info, status, summary) {
            w.serialize(MeasureRow {
                measure: &measure,
                value: &value,
            })?;
        }
        let bytes = w
            .into_inner()
            .map_err(|e| PersistenceError::io(&self.summary_path, e.into_error()))?;

        let path = &self.summary_path;
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| PersistenceError::io(path, e))?;
        f.write_all(&bytes)
            .and_then(|_| f.sync_all())
            .map_err(|e| PersistenceError::io(path, e))?;
        Ok(())
    }
}

/// Summary file contents: session identity, then the computed measures.
pub(crate) fn summary_rows(
    info: &SessionInfo,
    status: RunStatus,
    summary: &SessionSummary,
) -> Vec<(String, String)> {
    let mut rows = vec![
        ("participant".to_string(), info.participant.clone()),
        ("session".to_string(), info.session.clone()),
        ("paradigm".to_string(), info.paradigm.to_string()),
        ("status".to_string(), status.label().to_string()),
    ];
    rows.extend(summary.measures());
    rows
}

/// In-memory sink with injectable write failures.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub rows: Vec<TrialRow>,
    pub summaries: Vec<(RunStatus, Vec<(String, String)>)>,
    pub append_calls: usize,
    fail_next: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` writes fail.
    pub fn fail_next(&mut self, n: usize) {
        self.fail_next = n;
    }

    fn injected(&mut self) -> Result<(), PersistenceError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(PersistenceError::Io {
                path: "<memory>".into(),
                source: io::Error::other("injected write failure"),
            });
        }
        Ok(())
    }
}

impl TrialSink for MemorySink {
    fn append(&mut self, results: &[TrialResult]) -> Result<(), PersistenceError> {
        self.append_calls += 1;
        self.injected()?;
        self.rows.extend(results.iter().map(TrialRow::from));
        Ok(())
    }

    fn write_summary(
        &mut self,
        info: &SessionInfo,
        status: RunStatus,
        summary: &SessionSummary,
    ) -> Result<(), PersistenceError> {
        self.injected()?;
        self.summaries
            .push((status, summary_rows(info, status, summary)));
        Ok(())
    }
}
