use std::fmt;

use stroop_core::{Paradigm, TrialResult};
use tracing::{debug, error, warn};

use crate::sink::{PersistenceError, TrialSink};
use crate::summary::SessionSummary;

/// Who and what is being recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub participant: String,
    pub session: String,
    pub paradigm: Paradigm,
}

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Complete,
    Aborted,
}

impl RunStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Complete => "complete",
            RunStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Append-only trial log for one session.
///
/// Results are held in memory until [`flush`](Self::flush) hands the
/// unflushed tail to the sink. A failed write is retried once before the
/// error is returned.
pub struct SessionRecorder<S: TrialSink> {
    info: SessionInfo,
    log: Vec<TrialResult>,
    flushed: usize,
    sink: S,
}

impl<S: TrialSink> SessionRecorder<S> {
    pub fn new(info: SessionInfo, sink: S) -> Self {
        Self {
            info,
            log: Vec::new(),
            flushed: 0,
            sink,
        }
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Appends one completed trial. Never overwrites an earlier entry.
    pub fn record(&mut self, result: TrialResult) {
        debug!(
            trial = result.spec().index,
            correct = ?result.correct(),
            rt_ms = ?result.reaction_time_ms(),
            "trial recorded"
        );
        self.log.push(result);
    }

    pub fn results(&self) -> &[TrialResult] {
        &self.log
    }

    /// Results recorded but not yet durable.
    pub fn pending(&self) -> usize {
        self.log.len() - self.flushed
    }

    pub fn summarize(&self) -> SessionSummary {
        SessionSummary::from_results(&self.log)
    }

    /// Writes every unflushed result. Returns how many rows were written.
    pub fn flush(&mut self) -> Result<usize, PersistenceError> {
        let pending = &self.log[self.flushed..];
        if pending.is_empty() {
            return Ok(0);
        }
        let n = pending.len();
        retry_once("trial rows", || self.sink.append(pending))?;
        self.flushed += n;
        debug!(rows = n, total = self.flushed, "trial log flushed");
        Ok(n)
    }

    /// Flushes the remaining rows and writes the summary.
    pub fn finalize(&mut self, status: RunStatus) -> Result<SessionSummary, PersistenceError> {
        self.flush()?;
        let summary = self.summarize();
        retry_once("summary", || {
            self.sink.write_summary(&self.info, status, &summary)
        })?;
        Ok(summary)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

fn retry_once<F>(what: &str, mut write: F) -> Result<(), PersistenceError>
where
    F: FnMut() -> Result<(), PersistenceError>,
{
    match write() {
        Ok(()) => Ok(()),
        Err(first) => {
            warn!("writing {what} failed ({first}), retrying once");
            write().inspect_err(|e| error!("writing {what} failed again: {e}"))
        }
    }
}
