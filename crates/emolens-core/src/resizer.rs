//! Upload resizing: any decodable image in, a 48x48 JPEG out.

use crate::types::INPUT_SIZE;
use crate::upload::RawImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_JPEG_QUALITY: u8 = 100;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not a supported image type")]
    UnsupportedType(String),
    #[error("image decoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("jpeg encoding failed: {0}")]
    Encode(String),
    #[error("decode task failed: {0}")]
    Task(String),
}

/// A 48x48 JPEG-encoded image, ready for tensor construction.
#[derive(Debug, Clone)]
pub struct ResizedImage {
    bytes: Vec<u8>,
}

impl ResizedImage {
    /// Wrap already-encoded bytes. Dimensions are checked when the tensor is built.
    pub fn from_encoded(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Stretches uploads to exactly 48x48 and re-encodes them as JPEG.
///
/// The aspect ratio is not preserved. Resampling is bilinear. Transparent
/// pixels are composited onto opaque black before resampling.
#[derive(Debug, Clone, Copy)]
pub struct ImageResizer {
    quality: u8,
    filter: FilterType,
}

impl Default for ImageResizer {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl ImageResizer {
    /// `quality` is clamped to the JPEG range 1–100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            filter: FilterType::Triangle,
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn resize(&self, raw: &RawImage) -> Result<ResizedImage, DecodeError> {
        self.resize_bytes(raw.bytes())
    }

    /// Decode, stretch and re-encode on the blocking pool.
    pub async fn resize_async(&self, raw: &RawImage) -> Result<ResizedImage, DecodeError> {
        let resizer = *self;
        let bytes: Arc<[u8]> = raw.shared_bytes();
        tokio::task::spawn_blocking(move || resizer.resize_bytes(&bytes))
            .await
            .map_err(|e| DecodeError::Task(e.to_string()))?
    }

    pub fn resize_bytes(&self, bytes: &[u8]) -> Result<ResizedImage, DecodeError> {
        let decoded = image::load_from_memory(bytes)?;
        tracing::debug!(
            width = decoded.width(),
            height = decoded.height(),
            color = ?decoded.color(),
            "decoded upload"
        );

        let rgb = DynamicImage::ImageRgb8(flatten_on_black(&decoded))
            .resize_exact(INPUT_SIZE, INPUT_SIZE, self.filter)
            .to_rgb8();

        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode_image(&rgb)
            .map_err(|e| DecodeError::Encode(e.to_string()))?;

        Ok(ResizedImage { bytes: out })
    }
}

/// Composite onto black: each channel becomes `c * a / 255`.
fn flatten_on_black(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let blend = |c: u8| ((c as u16 * a as u16 + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}
