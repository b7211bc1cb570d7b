use emolens_core::model::DEFAULT_MANIFEST_PATH;
use emolens_core::resizer::DEFAULT_JPEG_QUALITY;
use emolens_core::{ImageResizer, OnnxLoader};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Application configuration.
///
/// Loaded from an optional TOML file named by `EMOLENS_CONFIG`, then
/// overridden by `EMOLENS_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the model manifest (default: ./model.json).
    pub model_path: PathBuf,
    /// JPEG quality for the 48x48 re-encode (1–100).
    pub jpeg_quality: u8,
    /// ONNX Runtime intra-op threads.
    pub intra_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MANIFEST_PATH),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            intra_threads: 1,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let base = match std::env::var("EMOLENS_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        Ok(base.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply `EMOLENS_*` overrides. Unparseable values keep the current setting.
    pub fn with_overrides(self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            model_path: lookup("EMOLENS_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(self.model_path),
            jpeg_quality: parse_or(&lookup, "EMOLENS_JPEG_QUALITY", self.jpeg_quality),
            intra_threads: parse_or(&lookup, "EMOLENS_INTRA_THREADS", self.intra_threads),
        }
    }

    pub fn resizer(&self) -> ImageResizer {
        ImageResizer::new(self.jpeg_quality)
    }

    pub fn loader(&self) -> OnnxLoader {
        OnnxLoader::new(self.intra_threads)
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.model_path, PathBuf::from("./model.json"));
        assert_eq!(config.jpeg_quality, 100);
        assert_eq!(config.intra_threads, 1);
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default().with_overrides(env(&[
            ("EMOLENS_MODEL_PATH", "/srv/fer/model.json"),
            ("EMOLENS_JPEG_QUALITY", "85"),
            ("EMOLENS_INTRA_THREADS", " 4 "),
        ]));
        assert_eq!(config.model_path, PathBuf::from("/srv/fer/model.json"));
        assert_eq!(config.jpeg_quality, 85);
        assert_eq!(config.intra_threads, 4);
    }

    #[test]
    fn test_bad_env_values_keep_current() {
        let config = Config::default().with_overrides(env(&[
            ("EMOLENS_JPEG_QUALITY", "lossless"),
            ("EMOLENS_INTRA_THREADS", "-2"),
        ]));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_toml_partial_file_uses_defaults() {
        let config: Config = toml::from_str("jpeg_quality = 90\n").unwrap();
        assert_eq!(config.jpeg_quality, 90);
        assert_eq!(config.model_path, PathBuf::from("./model.json"));
    }

    #[test]
    fn test_from_file_errors() {
        let err = Config::from_file(Path::new("/no/such/emolens.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));

        let path = std::env::temp_dir().join(format!("emolens-config-{}.toml", std::process::id()));
        std::fs::write(&path, "jpeg_quality = \"high\"\n").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_resizer_uses_quality() {
        let config = Config {
            jpeg_quality: 70,
            ..Config::default()
        };
        assert_eq!(config.resizer().quality(), 70);
    }
}
