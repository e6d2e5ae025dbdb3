//! Diagnostic class labels
//!
//! The order of [`ClassLabel::ALL`] is the index-to-label mapping of the
//! classifier output. It must match the class order the checkpoint was
//! trained with (alphabetical folder order of the training set).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::error::TriageError;

/// Number of diagnostic classes
pub const NUM_CLASSES: usize = 4;

/// Class names in model output order
pub const CLASS_NAMES: [&str; NUM_CLASSES] = ["glioma", "meningioma", "no_tumor", "pituitary"];

/// One of the four triage categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassLabel {
    Glioma,
    Meningioma,
    NoTumor,
    Pituitary,
}

impl ClassLabel {
    /// All labels, in model output order
    pub const ALL: [ClassLabel; NUM_CLASSES] = [
        ClassLabel::Glioma,
        ClassLabel::Meningioma,
        ClassLabel::NoTumor,
        ClassLabel::Pituitary,
    ];

    /// Label for an output index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Output index of this label
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        CLASS_NAMES[self.index()]
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassLabel {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CLASS_NAMES
            .iter()
            .position(|name| *name == s)
            .and_then(Self::from_index)
            .ok_or_else(|| TriageError::Config(format!("unknown class label '{}'", s)))
    }
}
