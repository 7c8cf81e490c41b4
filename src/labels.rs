//! Closed vocabulary of sketch categories.
//!
//! The declaration order of [`ClassLabel`] is the index order of the
//! classifier's output vector. Reordering the variants without retraining the
//! persisted snapshot silently shifts every prediction, so the order is pinned
//! by a unit test.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of categories the classifier scores.
pub const CLASS_COUNT: usize = 25;

/// Raised when a label string is not part of the vocabulary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("unknown label \"{label}\"")]
    Unknown { label: String },
}

/// One category of the fixed, ordered sketch vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassLabel {
    Airplane,
    Ambulance,
    Angel,
    Ant,
    Anvil,
    Camera,
    Car,
    Cat,
    Circle,
    Clock,
    Cookie,
    Crown,
    Donut,
    Eye,
    Fish,
    Guitar,
    Hamburger,
    Parachute,
    Popsicle,
    Spider,
    Square,
    Star,
    Tent,
    Tree,
    Triangle,
}

const ALL: [ClassLabel; CLASS_COUNT] = [
    ClassLabel::Airplane,
    ClassLabel::Ambulance,
    ClassLabel::Angel,
    ClassLabel::Ant,
    ClassLabel::Anvil,
    ClassLabel::Camera,
    ClassLabel::Car,
    ClassLabel::Cat,
    ClassLabel::Circle,
    ClassLabel::Clock,
    ClassLabel::Cookie,
    ClassLabel::Crown,
    ClassLabel::Donut,
    ClassLabel::Eye,
    ClassLabel::Fish,
    ClassLabel::Guitar,
    ClassLabel::Hamburger,
    ClassLabel::Parachute,
    ClassLabel::Popsicle,
    ClassLabel::Spider,
    ClassLabel::Square,
    ClassLabel::Star,
    ClassLabel::Tent,
    ClassLabel::Tree,
    ClassLabel::Triangle,
];

impl ClassLabel {
    /// Every label in output-index order.
    #[must_use]
    pub const fn all() -> &'static [Self; CLASS_COUNT] {
        &ALL
    }

    /// Position of this label in the classifier output.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Label at `index` in the classifier output, if in range.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        ALL.get(index).copied()
    }

    /// Lowercase identifier shared with the training corpus.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Airplane => "airplane",
            Self::Ambulance => "ambulance",
            Self::Angel => "angel",
            Self::Ant => "ant",
            Self::Anvil => "anvil",
            Self::Camera => "camera",
            Self::Car => "car",
            Self::Cat => "cat",
            Self::Circle => "circle",
            Self::Clock => "clock",
            Self::Cookie => "cookie",
            Self::Crown => "crown",
            Self::Donut => "donut",
            Self::Eye => "eye",
            Self::Fish => "fish",
            Self::Guitar => "guitar",
            Self::Hamburger => "hamburger",
            Self::Parachute => "parachute",
            Self::Popsicle => "popsicle",
            Self::Spider => "spider",
            Self::Square => "square",
            Self::Star => "star",
            Self::Tent => "tent",
            Self::Tree => "tree",
            Self::Triangle => "triangle",
        }
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassLabel {
    type Err = LabelError;

    /// Parses a label, ignoring surrounding whitespace and case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ALL.iter()
            .copied()
            .find(|label| label.as_str() == wanted)
            .ok_or_else(|| LabelError::Unknown {
                label: s.to_owned(),
            })
    }
}
