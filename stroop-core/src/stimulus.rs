use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigError;

/// Color vocabulary shared by the words and the ink colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorName {
    Red,
    Green,
    Blue,
    Yellow,
}

impl ColorName {
    pub const ALL: [ColorName; 4] = [
        ColorName::Red,
        ColorName::Green,
        ColorName::Blue,
        ColorName::Yellow,
    ];

    /// Text shown on screen when this color is the word.
    pub fn word(&self) -> &'static str {
        match self {
            ColorName::Red => "RED",
            ColorName::Green => "GREEN",
            ColorName::Blue => "BLUE",
            ColorName::Yellow => "YELLOW",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColorName::Red => "red",
            ColorName::Green => "green",
            ColorName::Blue => "blue",
            ColorName::Yellow => "yellow",
        }
    }

    /// Key the participant presses to report this ink color.
    pub fn response_key(&self) -> char {
        match self {
            ColorName::Red => 'r',
            ColorName::Green => 'g',
            ColorName::Blue => 'b',
            ColorName::Yellow => 'y',
        }
    }

    pub fn from_key(key: char) -> Option<Self> {
        let key = key.to_ascii_lowercase();
        ColorName::ALL.into_iter().find(|c| c.response_key() == key)
    }

    /// Ink RGB for a contrast mode. Low contrast uses 70% channel intensity.
    pub fn rgb(&self, contrast: ContrastMode) -> [u8; 3] {
        let on = match contrast {
            ContrastMode::HighContrast => 255,
            ContrastMode::LowContrast => 178,
        };
        match self {
            ColorName::Red => [on, 0, 0],
            ColorName::Green => [0, on, 0],
            ColorName::Blue => [0, 0, on],
            ColorName::Yellow => [on, on, 0],
        }
    }
}

impl fmt::Display for ColorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Saturated vs. desaturated presentation of the ink colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContrastMode {
    HighContrast,
    LowContrast,
}

impl ContrastMode {
    pub const ALL: [ContrastMode; 2] = [ContrastMode::HighContrast, ContrastMode::LowContrast];

    pub fn label(&self) -> &'static str {
        match self {
            ContrastMode::HighContrast => "high",
            ContrastMode::LowContrast => "low",
        }
    }

    pub fn other(&self) -> Self {
        match self {
            ContrastMode::HighContrast => ContrastMode::LowContrast,
            ContrastMode::LowContrast => ContrastMode::HighContrast,
        }
    }
}

impl fmt::Display for ContrastMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Congruency {
    Congruent,
    Incongruent,
}

impl Congruency {
    pub fn label(&self) -> &'static str {
        match self {
            Congruency::Congruent => "congruent",
            Congruency::Incongruent => "incongruent",
        }
    }
}

/// One word/ink pair. Congruency is derived from the pair and cannot drift;
/// items are only built through [`StimulusItem::new`], never deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StimulusItem {
    word: ColorName,
    ink: ColorName,
    congruent: bool,
    contrast_mode: ContrastMode,
}

impl StimulusItem {
    pub fn new(word: ColorName, ink: ColorName, contrast_mode: ContrastMode) -> Self {
        Self {
            word,
            ink,
            congruent: word == ink,
            contrast_mode,
        }
    }

    pub fn word(&self) -> ColorName {
        self.word
    }

    pub fn ink(&self) -> ColorName {
        self.ink
    }

    pub fn is_congruent(&self) -> bool {
        self.congruent
    }

    pub fn congruency(&self) -> Congruency {
        if self.congruent {
            Congruency::Congruent
        } else {
            Congruency::Incongruent
        }
    }

    pub fn contrast_mode(&self) -> ContrastMode {
        self.contrast_mode
    }

    pub fn correct_key(&self) -> char {
        self.ink.response_key()
    }

    /// Word and ink joined, e.g. `redgreen`.
    pub fn condition_code(&self) -> String {
        format!("{}{}", self.word.name(), self.ink.name())
    }

    /// Same pair shown in either contrast counts as the same stimulus.
    pub fn same_pair(&self, other: &StimulusItem) -> bool {
        self.word == other.word && self.ink == other.ink
    }
}

/// Closed set of colors a run draws from. Holds at least two distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ColorName>", into = "Vec<ColorName>")]
pub struct Palette(Vec<ColorName>);

impl Palette {
    pub fn new(colors: Vec<ColorName>) -> Result<Self, ConfigError> {
        let mut distinct: Vec<ColorName> = Vec::with_capacity(colors.len());
        for c in colors {
            if !distinct.contains(&c) {
                distinct.push(c);
            }
        }
        if distinct.len() < 2 {
            return Err(ConfigError::PaletteTooSmall(distinct.len()));
        }
        Ok(Self(distinct))
    }

    pub fn colors(&self) -> &[ColorName] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains_key(&self, key: char) -> bool {
        ColorName::from_key(key).is_some_and(|c| self.0.contains(&c))
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self(ColorName::ALL.to_vec())
    }
}

impl TryFrom<Vec<ColorName>> for Palette {
    type Error = ConfigError;

    fn try_from(colors: Vec<ColorName>) -> Result<Self, Self::Error> {
        Palette::new(colors)
    }
}

impl From<Palette> for Vec<ColorName> {
    fn from(p: Palette) -> Self {
        p.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn congruency_follows_the_pair() {
        let c = StimulusItem::new(ColorName::Red, ColorName::Red, ContrastMode::HighContrast);
        let i = StimulusItem::new(ColorName::Red, ColorName::Blue, ContrastMode::LowContrast);
        assert!(c.is_congruent());
        assert_eq!(i.congruency(), Congruency::Incongruent);
        assert_eq!(i.correct_key(), 'b');
        assert_eq!(i.condition_code(), "redblue");
    }

    #[test]
    fn keys_map_back_to_colors() {
        for c in ColorName::ALL {
            assert_eq!(ColorName::from_key(c.response_key()), Some(c));
        }
        assert_eq!(ColorName::from_key('Y'), Some(ColorName::Yellow));
        assert_eq!(ColorName::from_key('x'), None);
    }

    #[test]
    fn palette_needs_two_distinct_colors() {
        assert!(matches!(
            Palette::new(vec![ColorName::Red, ColorName::Red]),
            Err(ConfigError::PaletteTooSmall(1))
        ));
        assert!(matches!(Palette::new(vec![]), Err(ConfigError::PaletteTooSmall(0))));
        let p = Palette::new(vec![ColorName::Red, ColorName::Green, ColorName::Red]).unwrap();
        assert_eq!(p.colors(), &[ColorName::Red, ColorName::Green]);
        assert!(p.contains_key('g'));
        assert!(!p.contains_key('b'));
    }

    #[test]
    fn palette_rejects_bad_json() {
        let err = serde_json::from_str::<Palette>(r#"["red"]"#);
        assert!(err.is_err());
        let ok: Palette = serde_json::from_str(r#"["red","blue"]"#).unwrap();
        assert_eq!(ok.len(), 2);
    }

    #[test]
    fn low_contrast_is_dimmer() {
        assert_eq!(ColorName::Yellow.rgb(ContrastMode::HighContrast), [255, 255, 0]);
        assert_eq!(ColorName::Yellow.rgb(ContrastMode::LowContrast), [178, 178, 0]);
    }
}
