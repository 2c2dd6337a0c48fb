use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stroop_core::{ConfigError, ContrastMode, Palette, Paradigm};
use thiserror::Error;

use crate::iti::ItiPolicy;

/// Which contrast modes a run presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContrastSelection {
    HighContrast,
    LowContrast,
    Both,
}

impl ContrastSelection {
    pub fn label(&self) -> &'static str {
        match self {
            ContrastSelection::HighContrast => "HighContrast",
            ContrastSelection::LowContrast => "LowContrast",
            ContrastSelection::Both => "Both",
        }
    }

    /// The fixed mode of a single-contrast run.
    pub fn single(&self) -> Option<ContrastMode> {
        match self {
            ContrastSelection::HighContrast => Some(ContrastMode::HighContrast),
            ContrastSelection::LowContrast => Some(ContrastMode::LowContrast),
            ContrastSelection::Both => None,
        }
    }
}

/// How congruent and incongruent trials are spread over blocks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CongruencyDesign {
    /// Every block mixes both classes at `ratio` congruent.
    Mixed { ratio: f64 },
    /// Pure congruent and pure incongruent blocks, alternating within each
    /// contrast mode's own sequence, congruent first.
    Alternating,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RestPlacement {
    BetweenBlocks,
    /// After each block with this probability.
    Random { probability: f64 },
}

/// Neutral rest periods between blocks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RestConfig {
    pub duration: ItiPolicy,
    pub placement: RestPlacement,
}

/// Where markers go. No address means local-only logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub address: Option<String>,
    pub keepalive_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            address: Some("127.0.0.1:16571".into()),
            keepalive_secs: 5,
        }
    }
}

/// Everything a run needs, resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub paradigm: Paradigm,
    pub contrast: ContrastSelection,
    pub feedback_enabled: bool,
    pub iti: ItiPolicy,
    pub block_lengths: Vec<usize>,
    pub total_trials: Option<usize>,
    pub response_timeout_ms: u64,
    pub fixation_ms: u64,
    pub blank_ms: u64,
    pub feedback_ms: u64,
    pub congruency: CongruencyDesign,
    pub rest: Option<RestConfig>,
    pub palette: Palette,
    pub seed: Option<u64>,
    pub participant: String,
    pub session: String,
    pub output_dir: PathBuf,
    pub sync: SyncConfig,
}

pub const SUPPORTED_BLOCK_LENGTHS: [usize; 2] = [8, 15];

impl RunConfig {
    /// Defaults for one paradigm.
    pub fn preset(paradigm: Paradigm) -> Self {
        let jitter = ItiPolicy::jittered(800.0, 1200.0);
        let (iti, block_lengths, contrast) = match paradigm {
            Paradigm::Standard => (ItiPolicy::fixed(1000.0), vec![8; 6], ContrastSelection::HighContrast),
            Paradigm::RandomizedIti => (jitter, vec![8; 6], ContrastSelection::HighContrast),
            Paradigm::Extended => (jitter, vec![15; 6], ContrastSelection::HighContrast),
            Paradigm::Merged => (
                jitter,
                [8, 15].repeat(8),
                ContrastSelection::Both,
            ),
        };
        let placement = if paradigm.interleaves_contrast() {
            RestPlacement::Random { probability: 0.25 }
        } else {
            RestPlacement::BetweenBlocks
        };

        Self {
            paradigm,
            contrast,
            feedback_enabled: paradigm.feedback_enabled(),
            iti,
            block_lengths,
            total_trials: None,
            response_timeout_ms: 2000,
            fixation_ms: 500,
            blank_ms: 100,
            feedback_ms: 500,
            congruency: CongruencyDesign::Alternating,
            rest: Some(RestConfig {
                duration: ItiPolicy::jittered(18_000.0, 22_000.0),
                placement,
            }),
            palette: Palette::default(),
            seed: None,
            participant: "P01".into(),
            session: "001".into(),
            output_dir: PathBuf::from("data"),
            sync: SyncConfig::default(),
        }
    }

    pub fn total_planned_trials(&self) -> usize {
        self.block_lengths.iter().sum()
    }

    /// Checks the whole configuration and reports every problem found.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        let mut problems = Vec::new();

        if let Err(e) = self.iti.validate() {
            problems.push(e);
        }
        if self.block_lengths.is_empty() {
            problems.push(ConfigError::EmptyRun);
        }
        for &len in &self.block_lengths {
            if !SUPPORTED_BLOCK_LENGTHS.contains(&len) {
                problems.push(ConfigError::UnsupportedBlockLength(len));
            }
        }
        if let Some(expected) = self.total_trials {
            let actual = self.total_planned_trials();
            if expected != actual {
                problems.push(ConfigError::BlockLengthMismatch { expected, actual });
            }
        }
        if self.response_timeout_ms == 0 {
            problems.push(ConfigError::ZeroResponseTimeout);
        }
        if let CongruencyDesign::Mixed { ratio } = self.congruency {
            if !(0.0..=1.0).contains(&ratio) {
                problems.push(ConfigError::InvalidRatio(ratio));
            }
        }
        if let Some(rest) = &self.rest {
            if let Err(e) = rest.duration.validate() {
                problems.push(e);
            }
            if let RestPlacement::Random { probability } = rest.placement {
                if !(0.0..=1.0).contains(&probability) {
                    problems.push(ConfigError::InvalidRestProbability(probability));
                }
            }
        }
        if self.palette.len() < 2 {
            problems.push(ConfigError::PaletteTooSmall(self.palette.len()));
        }
        let merged = self.paradigm.interleaves_contrast();
        let both = self.contrast == ContrastSelection::Both;
        if merged != both {
            problems.push(ConfigError::ContrastModeMismatch {
                paradigm: self.paradigm.name(),
                expected: if merged { "Both" } else { "HighContrast or LowContrast" },
            });
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(InvalidConfig(problems))
        }
    }
}

/// Every problem `validate` found.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct InvalidConfig(pub Vec<ConfigError>);

impl fmt::Display for InvalidConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid run configuration")?;
        for (i, e) in self.0.iter().enumerate() {
            write!(f, "{} {e}", if i == 0 { ":" } else { ";" })?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// On-disk form of [`RunConfig`]. Every field is optional and overrides the
/// paradigm preset when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfigFile {
    pub paradigm: Option<Paradigm>,
    pub contrast: Option<ContrastSelection>,
    pub feedback_enabled: Option<bool>,
    pub iti: Option<ItiPolicy>,
    pub block_lengths: Option<Vec<usize>>,
    pub total_trials: Option<usize>,
    pub response_timeout_ms: Option<u64>,
    pub fixation_ms: Option<u64>,
    pub blank_ms: Option<u64>,
    pub feedback_ms: Option<u64>,
    pub congruency: Option<CongruencyDesign>,
    /// `null` disables rests.
    #[serde(with = "double_option")]
    pub rest: Option<Option<RestConfig>>,
    pub palette: Option<Palette>,
    pub seed: Option<u64>,
    pub participant: Option<String>,
    pub session: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub sync: Option<SyncConfig>,
}

impl RunConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigLoadError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Applies the overlay. `paradigm` wins over the file's own choice.
    pub fn resolve(self, paradigm: Option<Paradigm>) -> RunConfig {
        let paradigm = paradigm.or(self.paradigm).unwrap_or_default();
        let mut c = RunConfig::preset(paradigm);
        macro_rules! overlay {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = self.$field { c.$field = v; })*
            };
        }
        overlay!(
            contrast,
            feedback_enabled,
            iti,
            block_lengths,
            response_timeout_ms,
            fixation_ms,
            blank_ms,
            feedback_ms,
            congruency,
            rest,
            palette,
            participant,
            session,
            output_dir,
            sync,
        );
        if self.total_trials.is_some() {
            c.total_trials = self.total_trials;
        }
        if self.seed.is_some() {
            c.seed = self.seed;
        }
        c
    }
}

/// Tells a missing field apart from an explicit `null`.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T: Serialize, S: Serializer>(
        v: &Option<Option<T>>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        match v {
            Some(inner) => inner.serialize(s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, T: Deserialize<'de>, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Option<T>>, D::Error> {
        Option::<T>::deserialize(d).map(Some)
    }
}
