//! Marker codes sent to the physiological recording system.
//!
//! Codes travel as decimal strings. Trial-level events add an offset to a
//! contrast base (100 low, 200 high); block and rest boundaries carry the
//! 1-based block number in the thousands ranges.

use std::fmt;

use stroop_core::{Congruency, ContrastMode, FeedbackKind};

/// The two fixed marker channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerStream {
    /// Experiment events: trials, blocks, rests, start and end.
    Events,
    /// Housekeeping: init, connect, test pulses, keepalive.
    Control,
}

impl MarkerStream {
    pub const ALL: [MarkerStream; 2] = [MarkerStream::Events, MarkerStream::Control];

    pub fn name(&self) -> &'static str {
        match self {
            MarkerStream::Events => "StroopMarkers",
            MarkerStream::Control => "StroopControl",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        MarkerStream::ALL.into_iter().find(|s| s.name() == name)
    }

    pub(crate) fn slot(&self) -> usize {
        match self {
            MarkerStream::Events => 0,
            MarkerStream::Control => 1,
        }
    }
}

impl fmt::Display for MarkerStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const KEEPALIVE: &str = "KEEPALIVE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerCode {
    ExperimentStart,
    ExperimentComplete,
    SystemInit,
    StreamConnect(MarkerStream),
    TestPulse(u8),
    /// 1-based block number.
    BlockStart(usize),
    BlockEnd(usize),
    RestStart(usize),
    RestEnd(usize),
    Onset(ContrastMode, Congruency),
    Response { contrast: ContrastMode, correct: bool },
    Timeout(ContrastMode),
    Feedback(ContrastMode, FeedbackKind),
    ItiStart(ContrastMode),
    Keepalive,
}

fn contrast_base(c: ContrastMode) -> u32 {
    match c {
        ContrastMode::LowContrast => 100,
        ContrastMode::HighContrast => 200,
    }
}

impl MarkerCode {
    /// Numeric code, `None` for the keepalive string marker.
    pub fn code(&self) -> Option<u32> {
        use MarkerCode::*;
        Some(match *self {
            ExperimentStart => 0,
            ExperimentComplete => 999,
            SystemInit => 900,
            StreamConnect(MarkerStream::Events) => 901,
            StreamConnect(MarkerStream::Control) => 902,
            TestPulse(i) => 800 + u32::from(i),
            BlockStart(n) => 1000 + n as u32,
            BlockEnd(n) => 2000 + n as u32,
            RestStart(n) => 3000 + n as u32,
            RestEnd(n) => 4000 + n as u32,
            Onset(c, Congruency::Congruent) => contrast_base(c) + 1,
            Onset(c, Congruency::Incongruent) => contrast_base(c) + 2,
            Response { contrast, correct: true } => contrast_base(contrast) + 3,
            Response { contrast, correct: false } => contrast_base(contrast) + 4,
            Timeout(c) => contrast_base(c) + 5,
            Feedback(c, FeedbackKind::Correct) => contrast_base(c) + 6,
            Feedback(c, FeedbackKind::Incorrect) => contrast_base(c) + 7,
            ItiStart(c) => contrast_base(c) + 8,
            Feedback(c, FeedbackKind::NoResponse) => contrast_base(c) + 9,
            Keepalive => return None,
        })
    }

    /// String placed on the wire.
    pub fn wire(&self) -> String {
        match self.code() {
            Some(c) => c.to_string(),
            None => KEEPALIVE.to_string(),
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        use MarkerCode::*;
        if s == KEEPALIVE {
            return Some(Keepalive);
        }
        let n: u32 = s.parse().ok()?;
        let code = match n {
            0 => ExperimentStart,
            999 => ExperimentComplete,
            900 => SystemInit,
            901 => StreamConnect(MarkerStream::Events),
            902 => StreamConnect(MarkerStream::Control),
            800..=899 => TestPulse((n - 800) as u8),
            1000..=1999 => BlockStart((n - 1000) as usize),
            2000..=2999 => BlockEnd((n - 2000) as usize),
            3000..=3999 => RestStart((n - 3000) as usize),
            4000..=4999 => RestEnd((n - 4000) as usize),
            101..=109 | 201..=209 => {
                let contrast = if n < 200 {
                    ContrastMode::LowContrast
                } else {
                    ContrastMode::HighContrast
                };
                match n % 100 {
                    1 => Onset(contrast, Congruency::Congruent),
                    2 => Onset(contrast, Congruency::Incongruent),
                    3 => Response { contrast, correct: true },
                    4 => Response { contrast, correct: false },
                    5 => Timeout(contrast),
                    6 => Feedback(contrast, FeedbackKind::Correct),
                    7 => Feedback(contrast, FeedbackKind::Incorrect),
                    8 => ItiStart(contrast),
                    _ => Feedback(contrast, FeedbackKind::NoResponse),
                }
            }
            _ => return None,
        };
        Some(code)
    }

    pub fn stream(&self) -> MarkerStream {
        use MarkerCode::*;
        match self {
            SystemInit | StreamConnect(_) | TestPulse(_) | Keepalive => MarkerStream::Control,
            _ => MarkerStream::Events,
        }
    }

    /// Human readable description for logs and the receiver CSV.
    pub fn label(&self) -> String {
        use MarkerCode::*;
        match self {
            ExperimentStart => "experiment_start".into(),
            ExperimentComplete => "experiment_complete".into(),
            SystemInit => "system_init".into(),
            StreamConnect(s) => format!("connect_{}", s.name()),
            TestPulse(i) => format!("test_pulse_{i}"),
            BlockStart(n) => format!("block_{n}_start"),
            BlockEnd(n) => format!("block_{n}_end"),
            RestStart(n) => format!("rest_{n}_start"),
            RestEnd(n) => format!("rest_{n}_end"),
            Onset(c, g) => format!("{c}_{}_onset", g.label()),
            Response { contrast, correct } => format!(
                "{contrast}_response_{}",
                if *correct { "correct" } else { "incorrect" }
            ),
            Timeout(c) => format!("{c}_no_response"),
            Feedback(c, k) => format!("{c}_feedback_{}", feedback_label(*k)),
            ItiStart(c) => format!("{c}_iti_start"),
            Keepalive => "keepalive".into(),
        }
    }
}

fn feedback_label(k: FeedbackKind) -> &'static str {
    match k {
        FeedbackKind::Correct => "correct",
        FeedbackKind::Incorrect => "incorrect",
        FeedbackKind::NoResponse => "no_response",
    }
}

impl fmt::Display for MarkerCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.wire(), self.label())
    }
}

/// A code stamped with the time of the event it marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    pub code: MarkerCode,
    pub timestamp_ns: u64,
}

impl Marker {
    pub fn new(code: MarkerCode, timestamp_ns: u64) -> Self {
        Self { code, timestamp_ns }
    }

    /// Datagram payload: `stream \t code \t timestamp_ns`.
    pub fn encode(&self) -> String {
        format!(
            "{}\t{}\t{}",
            self.code.stream().name(),
            self.code.wire(),
            self.timestamp_ns
        )
    }

    pub fn decode(payload: &str) -> Option<(MarkerStream, Marker)> {
        let mut parts = payload.trim_end().split('\t');
        let stream = MarkerStream::from_name(parts.next()?)?;
        let code = MarkerCode::from_wire(parts.next()?)?;
        let timestamp_ns = parts.next()?.parse().ok()?;
        Some((stream, Marker::new(code, timestamp_ns)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trial_codes_depend_on_contrast() {
        let high = MarkerCode::Onset(ContrastMode::HighContrast, Congruency::Incongruent);
        let low = MarkerCode::Onset(ContrastMode::LowContrast, Congruency::Incongruent);
        assert_eq!(high.wire(), "202");
        assert_eq!(low.wire(), "102");
        assert_eq!(
            MarkerCode::Timeout(ContrastMode::LowContrast).code(),
            Some(105)
        );
    }

    #[test]
    fn block_codes_do_not_collide_with_trial_codes() {
        assert_eq!(MarkerCode::BlockStart(16).code(), Some(1016));
        assert_eq!(MarkerCode::BlockEnd(16).code(), Some(2016));
        assert_eq!(MarkerCode::RestEnd(3).code(), Some(4003));
    }

    #[test]
    fn housekeeping_goes_to_control_stream() {
        assert_eq!(MarkerCode::Keepalive.stream(), MarkerStream::Control);
        assert_eq!(MarkerCode::TestPulse(2).stream(), MarkerStream::Control);
        assert_eq!(MarkerCode::ExperimentStart.stream(), MarkerStream::Events);
        assert_eq!(MarkerCode::Keepalive.wire(), "KEEPALIVE");
    }

    #[test]
    fn wire_codes_parse_back() {
        for code in [
            MarkerCode::ExperimentComplete,
            MarkerCode::TestPulse(4),
            MarkerCode::BlockStart(7),
            MarkerCode::Response {
                contrast: ContrastMode::HighContrast,
                correct: false,
            },
            MarkerCode::Feedback(ContrastMode::LowContrast, FeedbackKind::NoResponse),
            MarkerCode::Keepalive,
        ] {
            assert_eq!(MarkerCode::from_wire(&code.wire()), Some(code));
        }
        assert_eq!(MarkerCode::from_wire("hello"), None);
        assert_eq!(MarkerCode::from_wire("150"), None);
    }

    #[test]
    fn payload_decodes() {
        let m = Marker::new(MarkerCode::ItiStart(ContrastMode::HighContrast), 123_456);
        let payload = m.encode();
        assert_eq!(payload, "StroopMarkers\t208\t123456");
        assert_eq!(Marker::decode(&payload), Some((MarkerStream::Events, m)));
        assert_eq!(Marker::decode("Nope\t1\t2"), None);
    }
}
