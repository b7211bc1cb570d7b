//! Emotion labels and the score-to-label mapping.
//!
//! The order of a [`LabelTable`] must match the model's output ordering, so
//! the table is shipped inside the model manifest rather than hard-coded at
//! the call site. [`LabelTable::CANONICAL`] is the FER-2013 ordering used
//! when a manifest does not list its labels.

use crate::types::{ScoreVector, NUM_CLASSES};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One of the seven facial-emotion categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Angry,
    Disgust,
    Fear,
    Happy,
    Neutral,
    Sad,
    Surprise,
}

impl EmotionLabel {
    pub const ALL: [EmotionLabel; NUM_CLASSES] = [
        EmotionLabel::Angry,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Happy,
        EmotionLabel::Neutral,
        EmotionLabel::Sad,
        EmotionLabel::Surprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Angry => "angry",
            EmotionLabel::Disgust => "disgust",
            EmotionLabel::Fear => "fear",
            EmotionLabel::Happy => "happy",
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Surprise => "surprise",
        }
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MapperError {
    #[error("invalid score vector: expected {expected} scores, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("invalid score vector: every score is NaN")]
    NotANumber,
}

/// Index-to-label mapping for a model's output vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<EmotionLabel>", into = "Vec<EmotionLabel>")]
pub struct LabelTable([EmotionLabel; NUM_CLASSES]);

impl LabelTable {
    pub const CANONICAL: LabelTable = LabelTable(EmotionLabel::ALL);

    /// Label at output index `index`, if in range.
    pub fn get(&self, index: usize) -> Option<EmotionLabel> {
        self.0.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = EmotionLabel> + '_ {
        self.0.iter().copied()
    }

    /// Map a score vector to the label of its highest score.
    ///
    /// Ties resolve to the lowest index. NaN scores never win.
    pub fn map(&self, scores: &ScoreVector) -> Result<EmotionLabel, MapperError> {
        if scores.len() != NUM_CLASSES {
            return Err(MapperError::WrongLength {
                expected: NUM_CLASSES,
                actual: scores.len(),
            });
        }
        let index = argmax(scores.as_slice()).ok_or(MapperError::NotANumber)?;
        Ok(self.0[index])
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::CANONICAL
    }
}

impl TryFrom<Vec<EmotionLabel>> for LabelTable {
    type Error = MapperError;

    fn try_from(labels: Vec<EmotionLabel>) -> Result<Self, Self::Error> {
        let actual = labels.len();
        let table: [EmotionLabel; NUM_CLASSES] =
            labels.try_into().map_err(|_| MapperError::WrongLength {
                expected: NUM_CLASSES,
                actual,
            })?;
        Ok(Self(table))
    }
}

impl From<LabelTable> for Vec<EmotionLabel> {
    fn from(table: LabelTable) -> Self {
        table.0.to_vec()
    }
}

/// Index of the first maximum, skipping NaN. `None` if nothing is comparable.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, best_v)) if v <= best_v => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}
