pub mod recorder;
pub mod sink;
pub mod summary;

pub use recorder::{RunStatus, SessionInfo, SessionRecorder};
pub use sink::{CsvSink, MemorySink, PersistenceError, TrialRow, TrialSink};
pub use summary::{CellStats, SessionSummary};
