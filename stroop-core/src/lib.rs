pub mod block;
pub mod error;
pub mod paradigm;
pub mod stimulus;
pub mod trial;

pub use block::BlockSpec;
pub use error::ConfigError;
pub use paradigm::Paradigm;
pub use stimulus::{ColorName, Congruency, ContrastMode, Palette, StimulusItem};
pub use trial::{FeedbackKind, TrialResult, TrialSpec, TrialState};
