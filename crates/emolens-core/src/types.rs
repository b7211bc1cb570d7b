use serde::Serialize;

/// Side length of the square model input.
pub const INPUT_SIZE: u32 = 48;
/// Number of pixels in a resized image (48 * 48).
pub const PIXEL_COUNT: usize = (INPUT_SIZE * INPUT_SIZE) as usize;
/// Logical tensor layout: [batch, height, width, channel].
pub const INPUT_SHAPE: [usize; 4] = [1, INPUT_SIZE as usize, INPUT_SIZE as usize, 1];
/// Number of emotion classes the model scores.
pub const NUM_CLASSES: usize = 7;

/// Raw per-class scores from one forward pass.
///
/// Values are relative class scores, not necessarily probabilities. The
/// length is only checked when the vector is mapped to a label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreVector(Vec<f32>);

impl ScoreVector {
    pub fn new(scores: Vec<f32>) -> Self {
        Self(scores)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
