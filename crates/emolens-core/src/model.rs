//! Facial-emotion classifier via ONNX Runtime.
//!
//! A model artifact is a JSON manifest (`model.json`) plus the ONNX weight
//! file it names. The manifest also records the input shape the network was
//! exported with and the label table matching its output order, so the two
//! cannot drift apart. [`ModelCache`] loads the artifact on first use and
//! keeps the session until the manifest changes.

use crate::labels::LabelTable;
use crate::tensor::PixelTensor;
use crate::types::{ScoreVector, INPUT_SHAPE};
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Manifest location used when nothing else is configured.
pub const DEFAULT_MANIFEST_PATH: &str = "./model.json";
const ONNX_FORMAT: &str = "onnx";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("model manifest not found: {0}")]
    ManifestNotFound(String),
    #[error("model weights not found: {0} (referenced by the manifest)")]
    WeightsNotFound(String),
    #[error("malformed model manifest {path}: {reason}")]
    Malformed { path: String, reason: String },
    #[error("unsupported model format {0:?}, expected \"onnx\"")]
    UnsupportedFormat(String),
    #[error("ort: {0}")]
    Runtime(String),
    #[error("model load task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("input shape {actual:?} does not match model input {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("inference failed: {0}")]
    Failed(String),
    #[error("model produced no output")]
    NoOutput,
}

/// Describes a trained classifier artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    #[serde(default = "default_format")]
    pub format: String,
    pub version: String,
    /// Weight file, relative to the manifest's directory unless absolute.
    pub weights: PathBuf,
    #[serde(default = "default_input_shape")]
    pub input_shape: Vec<usize>,
    #[serde(default)]
    pub labels: LabelTable,
}

fn default_format() -> String {
    ONNX_FORMAT.to_string()
}

fn default_input_shape() -> Vec<usize> {
    INPUT_SHAPE.to_vec()
}

impl ModelManifest {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoadError::ManifestNotFound(path.display().to_string()),
            _ => LoadError::Malformed {
                path: path.display().to_string(),
                reason: e.to_string(),
            },
        })?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, LoadError> {
        let manifest: Self = serde_json::from_str(text).map_err(|e| LoadError::Malformed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        if manifest.format != ONNX_FORMAT {
            return Err(LoadError::UnsupportedFormat(manifest.format));
        }
        Ok(manifest)
    }

    /// Resolve the weight file against the manifest's location.
    pub fn weights_path(&self, manifest_path: &Path) -> PathBuf {
        if self.weights.is_absolute() {
            return self.weights.clone();
        }
        manifest_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&self.weights)
    }
}

/// A loaded network that maps one tensor to one score vector.
pub trait Classifier: Send + Sync {
    fn predict(&self, input: &PixelTensor) -> Result<ScoreVector, InferenceError>;
}

/// Turns a manifest into a ready classifier. Called on the blocking pool.
pub trait ModelLoader: Send + Sync + 'static {
    fn load(
        &self,
        manifest: &ModelManifest,
        weights: &Path,
    ) -> Result<Arc<dyn Classifier>, LoadError>;
}

/// Reject a tensor whose shape differs from the model's declared input.
fn check_input_shape(expected: &[usize], input: &PixelTensor) -> Result<(), InferenceError> {
    let actual = input.shape();
    if expected != actual.as_slice() {
        return Err(InferenceError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

/// ONNX Runtime session for a [1, 48, 48, 1] grayscale classifier.
pub struct OnnxClassifier {
    session: Mutex<Session>,
}

impl OnnxClassifier {
    pub fn load(weights: &Path, intra_threads: usize) -> Result<Self, LoadError> {
        if !weights.exists() {
            return Err(LoadError::WeightsNotFound(weights.display().to_string()));
        }
        let session = Session::builder()
            .map_err(|e| LoadError::Runtime(e.to_string()))?
            .with_intra_threads(intra_threads.max(1))
            .map_err(|e| LoadError::Runtime(e.to_string()))?
            .commit_from_file(weights)
            .map_err(|e| LoadError::Runtime(e.to_string()))?;

        tracing::info!(
            path = %weights.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded emotion model"
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&self, input: &PixelTensor) -> Result<ScoreVector, InferenceError> {
        let view = input
            .view()
            .map_err(|e| InferenceError::Failed(format!("input view: {e}")))?;
        let tensor = TensorRef::from_array_view(view)
            .map_err(|e| InferenceError::Failed(format!("input tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| InferenceError::Failed("session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| InferenceError::Failed(e.to_string()))?;

        let (_, value) = outputs.iter().next().ok_or(InferenceError::NoOutput)?;
        let (_, scores) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Failed(format!("score extraction: {e}")))?;

        Ok(ScoreVector::new(scores.to_vec()))
    }
}

/// Production loader: ONNX Runtime on the CPU.
#[derive(Debug, Clone, Copy)]
pub struct OnnxLoader {
    intra_threads: usize,
}

impl OnnxLoader {
    pub fn new(intra_threads: usize) -> Self {
        Self { intra_threads }
    }
}

impl Default for OnnxLoader {
    fn default() -> Self {
        Self::new(1)
    }
}

impl ModelLoader for OnnxLoader {
    fn load(
        &self,
        manifest: &ModelManifest,
        weights: &Path,
    ) -> Result<Arc<dyn Classifier>, LoadError> {
        tracing::debug!(input_shape = ?manifest.input_shape, "loading onnx classifier");
        Ok(Arc::new(OnnxClassifier::load(weights, self.intra_threads)?))
    }
}

/// A classifier together with the manifest it was loaded from.
pub struct LoadedModel {
    manifest: ModelManifest,
    classifier: Arc<dyn Classifier>,
}

impl LoadedModel {
    pub fn new(manifest: ModelManifest, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            manifest,
            classifier,
        }
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    pub fn labels(&self) -> &LabelTable {
        &self.manifest.labels
    }

    /// Forward pass on the blocking pool, after checking the declared input shape.
    pub async fn predict(self: Arc<Self>, input: PixelTensor) -> Result<ScoreVector, InferenceError> {
        check_input_shape(&self.manifest.input_shape, &input)?;
        tokio::task::spawn_blocking(move || self.classifier.predict(&input))
            .await
            .map_err(|e| InferenceError::Failed(format!("inference task: {e}")))?
    }
}

/// Load-once model handle shared by every upload.
///
/// The manifest is re-read on each request; the weights are reloaded only
/// when the manifest differs from the one the cached session came from.
pub struct ModelCache<L> {
    loader: Arc<L>,
    manifest_path: PathBuf,
    current: tokio::sync::Mutex<Option<Arc<LoadedModel>>>,
}

impl<L: ModelLoader> ModelCache<L> {
    pub fn new(loader: L, manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            loader: Arc::new(loader),
            manifest_path: manifest_path.into(),
            current: tokio::sync::Mutex::new(None),
        }
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub async fn get(&self) -> Result<Arc<LoadedModel>, LoadError> {
        let path = self.manifest_path.clone();
        let manifest = tokio::task::spawn_blocking(move || ModelManifest::load(&path))
            .await
            .map_err(|e| LoadError::Task(e.to_string()))??;

        // Held across the load so concurrent uploads share a single load.
        let mut current = self.current.lock().await;
        if let Some(model) = current.as_ref() {
            if model.manifest == manifest {
                return Ok(Arc::clone(model));
            }
            tracing::info!(
                old = model.version(),
                new = %manifest.version,
                "model manifest changed; reloading"
            );
        }

        let weights = manifest.weights_path(&self.manifest_path);
        let loader = Arc::clone(&self.loader);
        let for_loader = manifest.clone();
        let classifier = tokio::task::spawn_blocking(move || loader.load(&for_loader, &weights))
            .await
            .map_err(|e| LoadError::Task(e.to_string()))??;

        tracing::info!(
            manifest = %self.manifest_path.display(),
            version = %manifest.version,
            "model ready"
        );

        let model = Arc::new(LoadedModel::new(manifest, classifier));
        *current = Some(Arc::clone(&model));
        Ok(model)
    }

    /// Drop the cached session; the next request reloads it.
    pub async fn invalidate(&self) {
        self.current.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::EmotionLabel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedClassifier(Vec<f32>);

    impl Classifier for FixedClassifier {
        fn predict(&self, _input: &PixelTensor) -> Result<ScoreVector, InferenceError> {
            Ok(ScoreVector::new(self.0.clone()))
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        loads: Arc<AtomicUsize>,
    }

    impl ModelLoader for CountingLoader {
        fn load(
            &self,
            _manifest: &ModelManifest,
            _weights: &Path,
        ) -> Result<Arc<dyn Classifier>, LoadError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FixedClassifier(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0])))
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("emolens-model-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_manifest(dir: &Path, version: &str) -> PathBuf {
        let path = dir.join("model.json");
        let json = serde_json::json!({
            "format": "onnx",
            "version": version,
            "weights": "emotion.onnx",
        });
        std::fs::write(&path, json.to_string()).unwrap();
        path
    }

    #[test]
    fn test_manifest_defaults() {
        let manifest = ModelManifest::parse(
            r#"{"version": "fer-1", "weights": "emotion.onnx"}"#,
            Path::new("model.json"),
        )
        .unwrap();
        assert_eq!(manifest.format, "onnx");
        assert_eq!(manifest.input_shape, vec![1, 48, 48, 1]);
        assert_eq!(manifest.labels, LabelTable::CANONICAL);
    }

    #[test]
    fn test_manifest_custom_labels() {
        let manifest = ModelManifest::parse(
            r#"{"version": "v2", "weights": "w.onnx",
                "labels": ["happy","sad","angry","fear","disgust","surprise","neutral"]}"#,
            Path::new("model.json"),
        )
        .unwrap();
        assert_eq!(manifest.labels.get(0), Some(EmotionLabel::Happy));
        assert_eq!(manifest.labels.get(6), Some(EmotionLabel::Neutral));
    }

    #[test]
    fn test_manifest_wrong_label_count_is_malformed() {
        let err = ModelManifest::parse(
            r#"{"version": "v", "weights": "w.onnx", "labels": ["happy","sad"]}"#,
            Path::new("model.json"),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }), "got {err:?}");
    }

    #[test]
    fn test_manifest_unknown_label_is_malformed() {
        let err = ModelManifest::parse(
            r#"{"version": "v", "weights": "w.onnx",
                "labels": ["angry","disgust","fear","happy","neutral","sad","bored"]}"#,
            Path::new("model.json"),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));
    }

    #[test]
    fn test_manifest_unsupported_format() {
        let err = ModelManifest::parse(
            r#"{"format": "tfjs-layers", "version": "v", "weights": "group1-shard1of1.bin"}"#,
            Path::new("model.json"),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedFormat(ref f) if f == "tfjs-layers"));
    }

    #[test]
    fn test_manifest_missing_file() {
        let err = ModelManifest::load(Path::new("/no/such/dir/model.json")).unwrap_err();
        assert!(matches!(err, LoadError::ManifestNotFound(_)));
    }

    #[test]
    fn test_weights_path_resolution() {
        let manifest = ModelManifest::parse(
            r#"{"version": "v", "weights": "emotion.onnx"}"#,
            Path::new("x"),
        )
        .unwrap();
        assert_eq!(
            manifest.weights_path(Path::new("/srv/models/model.json")),
            PathBuf::from("/srv/models/emotion.onnx")
        );
        assert_eq!(
            manifest.weights_path(Path::new("model.json")),
            PathBuf::from("emotion.onnx")
        );
    }

    #[test]
    fn test_onnx_loader_missing_weights() {
        let manifest = ModelManifest::parse(
            r#"{"version": "v", "weights": "missing.onnx"}"#,
            Path::new("x"),
        )
        .unwrap();
        let result = OnnxLoader::default().load(&manifest, Path::new("/no/such/missing.onnx"));
        assert!(matches!(result, Err(LoadError::WeightsNotFound(_))));
    }

    #[tokio::test]
    async fn test_cache_loads_once() {
        let dir = scratch_dir("once");
        let manifest = write_manifest(&dir, "v1");
        let loader = CountingLoader::default();
        let loads = Arc::clone(&loader.loads);
        let cache = ModelCache::new(loader, &manifest);

        let a = cache.get().await.unwrap();
        let b = cache.get().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(a.version(), "v1");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_cache_reloads_on_version_change() {
        let dir = scratch_dir("version");
        let manifest = write_manifest(&dir, "v1");
        let loader = CountingLoader::default();
        let loads = Arc::clone(&loader.loads);
        let cache = ModelCache::new(loader, &manifest);

        cache.get().await.unwrap();
        write_manifest(&dir, "v2");
        let model = cache.get().await.unwrap();
        assert_eq!(model.version(), "v2");
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_cache_invalidate_forces_reload() {
        let dir = scratch_dir("invalidate");
        let manifest = write_manifest(&dir, "v1");
        let loader = CountingLoader::default();
        let loads = Arc::clone(&loader.loads);
        let cache = ModelCache::new(loader, &manifest);

        cache.get().await.unwrap();
        cache.invalidate().await;
        cache.get().await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_cache_missing_manifest_is_load_error() {
        let cache = ModelCache::new(CountingLoader::default(), "/no/such/dir/model.json");
        let err = cache.get().await.err().unwrap();
        assert!(matches!(err, LoadError::ManifestNotFound(_)));
    }

    #[tokio::test]
    async fn test_loaded_model_predicts_on_blocking_pool() {
        let manifest = ModelManifest::parse(r#"{"version": "v", "weights": "w"}"#, Path::new("x"))
            .unwrap();
        let model = Arc::new(LoadedModel::new(
            manifest,
            Arc::new(FixedClassifier(vec![0.1, 0.9, 0.0, 0.0, 0.0, 0.0, 0.0])),
        ));
        let input = PixelTensor::from_vec(vec![0.0; 2304]).unwrap();
        let scores = Arc::clone(&model).predict(input).await.unwrap();
        assert_eq!(model.labels().map(&scores).unwrap(), EmotionLabel::Disgust);
    }

    #[tokio::test]
    async fn test_declared_shape_mismatch_is_inference_error() {
        let manifest = ModelManifest::parse(
            r#"{"version": "nchw", "weights": "w", "input_shape": [1, 1, 48, 48]}"#,
            Path::new("x"),
        )
        .unwrap();
        let model = Arc::new(LoadedModel::new(
            manifest,
            Arc::new(FixedClassifier(vec![0.0; 7])),
        ));
        let input = PixelTensor::from_vec(vec![0.0; 2304]).unwrap();
        let err = model.predict(input).await.unwrap_err();
        match err {
            InferenceError::ShapeMismatch { expected, actual } => {
                assert_eq!(expected, vec![1, 1, 48, 48]);
                assert_eq!(actual, vec![1, 48, 48, 1]);
            }
            other => panic!("expected shape mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_check_input_shape_accepts_default() {
        let input = PixelTensor::from_vec(vec![0.0; 2304]).unwrap();
        assert!(check_input_shape(&INPUT_SHAPE, &input).is_ok());
    }
}
