use rand::Rng;
use serde::{Deserialize, Serialize};
use stroop_core::ConfigError;

/// Inter-trial interval policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ItiPolicy {
    /// Same duration for every trial.
    Fixed { ms: f64 },
    /// Independent uniform draws on `[min_ms, max_ms]`.
    Jittered { min_ms: f64, max_ms: f64 },
}

impl ItiPolicy {
    pub fn fixed(ms: f64) -> Self {
        ItiPolicy::Fixed { ms }
    }

    pub fn jittered(min_ms: f64, max_ms: f64) -> Self {
        ItiPolicy::Jittered { min_ms, max_ms }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let check = |v: f64| {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                Err(ConfigError::NegativeIti(v))
            }
        };
        match *self {
            ItiPolicy::Fixed { ms } => check(ms),
            ItiPolicy::Jittered { min_ms, max_ms } => {
                check(min_ms)?;
                check(max_ms)?;
                if min_ms > max_ms {
                    return Err(ConfigError::InvalidItiBounds { min_ms, max_ms });
                }
                Ok(())
            }
        }
    }

    /// Next duration in ms. Never negative, even for an unvalidated policy.
    pub fn next<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            ItiPolicy::Fixed { ms } => ms.max(0.0),
            ItiPolicy::Jittered { min_ms, max_ms } => {
                if min_ms < max_ms {
                    rng.random_range(min_ms..=max_ms).max(0.0)
                } else {
                    min_ms.max(0.0)
                }
            }
        }
    }
}
