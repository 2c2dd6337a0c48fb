use stroop_record::PersistenceError;
use thiserror::Error;

use crate::config::InvalidConfig;
use crate::devices::DeviceError;

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] InvalidConfig),

    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Trial data could not be made durable. The run stops here.
    #[error("failed to persist trial data: {0}")]
    Persistence(#[from] PersistenceError),
}
