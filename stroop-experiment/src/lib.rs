pub mod catalog;
pub mod config;
pub mod devices;
pub mod error;
pub mod iti;
pub mod planner;
pub mod run;
pub mod sequencer;
pub mod state;

pub use catalog::{CongruencyQuota, StimulusCatalog};
pub use config::{
    CongruencyDesign, ConfigLoadError, ContrastSelection, InvalidConfig, RestConfig,
    RestPlacement, RunConfig, RunConfigFile, SyncConfig,
};
pub use devices::{AbortSignal, DeviceError, InputBackend, KeyEvent, PresentationSurface};
pub use error::RunError;
pub use iti::ItiPolicy;
pub use planner::{BlockPlanner, RunPlan, merged_contrast_sequence};
pub use run::{Experiment, RunReport};
pub use sequencer::{BlockRequest, SequenceOutcome, TrialSequencer};
pub use state::{TrialOutcome, TrialRunner, TrialTiming};
