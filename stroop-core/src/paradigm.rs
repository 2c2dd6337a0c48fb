use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Task variants. Each is a configuration value, not a separate program.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Paradigm {
    #[default]
    Standard,
    #[serde(rename = "RandomizedITI", alias = "RandomizedIti")]
    RandomizedIti,
    Extended,
    Merged,
}

impl Paradigm {
    pub const ALL: [Paradigm; 4] = [
        Paradigm::Standard,
        Paradigm::RandomizedIti,
        Paradigm::Extended,
        Paradigm::Merged,
    ];

    /// Only the standard variant shows correct/incorrect feedback.
    pub fn feedback_enabled(&self) -> bool {
        matches!(self, Paradigm::Standard)
    }

    /// Merged design runs both contrast modes in one session.
    pub fn interleaves_contrast(&self) -> bool {
        matches!(self, Paradigm::Merged)
    }

    /// Name as written in configuration files and summaries.
    pub fn name(&self) -> &'static str {
        match self {
            Paradigm::Standard => "Standard",
            Paradigm::RandomizedIti => "RandomizedITI",
            Paradigm::Extended => "Extended",
            Paradigm::Merged => "Merged",
        }
    }

    /// Short lowercase name used in file names.
    pub fn slug(&self) -> &'static str {
        match self {
            Paradigm::Standard => "standard",
            Paradigm::RandomizedIti => "randomized_iti",
            Paradigm::Extended => "extended",
            Paradigm::Merged => "merged",
        }
    }
}

impl fmt::Display for Paradigm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Paradigm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match norm.as_str() {
            "standard" => Ok(Paradigm::Standard),
            "randomizediti" | "randomized" | "rditi" => Ok(Paradigm::RandomizedIti),
            "extended" => Ok(Paradigm::Extended),
            "merged" | "merge" => Ok(Paradigm::Merged),
            _ => Err(format!(
                "unknown paradigm '{s}' (expected standard, randomized-iti, extended or merged)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_standard_gives_feedback() {
        let with_feedback: Vec<_> = Paradigm::ALL
            .into_iter()
            .filter(Paradigm::feedback_enabled)
            .collect();
        assert_eq!(with_feedback, vec![Paradigm::Standard]);
    }

    #[test]
    fn parses_cli_spellings() {
        assert_eq!("randomized-iti".parse::<Paradigm>(), Ok(Paradigm::RandomizedIti));
        assert_eq!("Merged".parse::<Paradigm>(), Ok(Paradigm::Merged));
        assert!("stroop".parse::<Paradigm>().is_err());
    }

    #[test]
    fn display_and_parse_agree_on_names() {
        for p in Paradigm::ALL {
            assert_eq!(p.to_string(), p.name());
            assert_eq!(p.name().parse::<Paradigm>(), Ok(p));
        }
    }

    #[test]
    fn serde_uses_config_names() {
        let json = serde_json::to_string(&Paradigm::RandomizedIti).unwrap();
        assert_eq!(json, "\"RandomizedITI\"");
        let back: Paradigm = serde_json::from_str("\"Extended\"").unwrap();
        assert_eq!(back, Paradigm::Extended);
    }
}
