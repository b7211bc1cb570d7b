//! emolens-core — Facial-emotion classification pipeline.
//!
//! Stretches an uploaded photo to 48x48, averages RGB into an unnormalized
//! grayscale tensor, and classifies it into one of seven emotions with an
//! ONNX model via ONNX Runtime.

pub mod labels;
pub mod model;
pub mod resizer;
pub mod tensor;
pub mod types;
pub mod upload;

pub use labels::{EmotionLabel, LabelTable, MapperError};
pub use model::{
    Classifier, InferenceError, LoadError, LoadedModel, ModelCache, ModelLoader, ModelManifest,
    OnnxClassifier, OnnxLoader,
};
pub use resizer::{DecodeError, ImageResizer, ResizedImage};
pub use tensor::{PixelTensor, TensorBuilder, TensorError};
pub use types::ScoreVector;
pub use upload::{Preview, RawImage};
