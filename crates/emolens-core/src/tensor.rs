//! Pixel-to-tensor conversion for the 48x48 grayscale model input.
//!
//! Each pixel becomes the plain mean of its red, green and blue channels,
//! kept on the 0–255 scale. The model was trained on unnormalized input, so
//! there is deliberately no division by 255 and no mean subtraction here.

use crate::resizer::ResizedImage;
use crate::types::{INPUT_SHAPE, INPUT_SIZE, PIXEL_COUNT};
use image::RgbImage;
use ndarray::ArrayView4;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("resized image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error("expected a 48x48 image ({expected} pixels), got {width}x{height} ({actual} pixels)")]
    ShapeMismatch {
        expected: usize,
        actual: usize,
        width: u32,
        height: u32,
    },
    #[error("tensor task failed: {0}")]
    Task(String),
}

/// Grayscale model input: exactly 2304 intensities, logical shape [1, 48, 48, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct PixelTensor {
    data: Vec<f32>,
}

/// Summary statistics, used for diagnostics output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TensorStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

impl PixelTensor {
    /// Wrap a flat row-major buffer. Fails unless it holds exactly 2304 values.
    pub fn from_vec(data: Vec<f32>) -> Result<Self, TensorError> {
        if data.len() != PIXEL_COUNT {
            return Err(TensorError::ShapeMismatch {
                expected: PIXEL_COUNT,
                actual: data.len(),
                width: data.len() as u32,
                height: 1,
            });
        }
        Ok(Self { data })
    }

    pub fn shape(&self) -> [usize; 4] {
        INPUT_SHAPE
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// NHWC view for the inference runtime.
    pub fn view(&self) -> Result<ArrayView4<'_, f32>, ndarray::ShapeError> {
        ArrayView4::from_shape(INPUT_SHAPE, &self.data)
    }

    pub fn stats(&self) -> TensorStats {
        let (min, max, sum) = self.data.iter().fold(
            (f32::INFINITY, f32::NEG_INFINITY, 0.0f64),
            |(min, max, sum), &v| (min.min(v), max.max(v), sum + v as f64),
        );
        TensorStats {
            min,
            max,
            mean: (sum / self.data.len() as f64) as f32,
        }
    }
}

pub struct TensorBuilder;

impl TensorBuilder {
    /// Decode a resized image and convert it to a grayscale tensor.
    pub fn build(resized: &ResizedImage) -> Result<PixelTensor, TensorError> {
        let rgb = image::load_from_memory(resized.bytes())?.to_rgb8();
        Self::from_rgb(&rgb)
    }

    /// [`TensorBuilder::build`] on the blocking pool.
    pub async fn build_async(resized: ResizedImage) -> Result<PixelTensor, TensorError> {
        tokio::task::spawn_blocking(move || Self::build(&resized))
            .await
            .map_err(|e| TensorError::Task(e.to_string()))?
    }

    /// Convert decoded pixels, row-major, with `(r + g + b) / 3.0` per pixel.
    pub fn from_rgb(rgb: &RgbImage) -> Result<PixelTensor, TensorError> {
        let (width, height) = rgb.dimensions();
        let actual = width as usize * height as usize;
        if width != INPUT_SIZE || height != INPUT_SIZE {
            return Err(TensorError::ShapeMismatch {
                expected: PIXEL_COUNT,
                actual,
                width,
                height,
            });
        }

        let data = rgb
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                (r as f32 + g as f32 + b as f32) / 3.0
            })
            .collect();

        PixelTensor::from_vec(data)
    }
}
