use crate::detector::{is_valid_threshold, SCRFD_CONFIDENCE_THRESHOLD};
use crate::types::FaceSelection;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";
const DEFAULT_INTRA_THREADS: usize = 2;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid `{key}` in config file {path}: {reason}")]
    Invalid {
        path: PathBuf,
        key: &'static str,
        reason: String,
    },
}

/// Runtime configuration: where the models live and how detection behaves.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD model file name (or absolute path) relative to `model_dir`.
    pub detector_model: PathBuf,
    /// ArcFace model file name (or absolute path) relative to `model_dir`.
    pub recognizer_model: PathBuf,
    /// Minimum detector score for a face to count.
    pub confidence_threshold: f32,
    /// Which face to embed when several are found.
    pub face_selection: FaceSelection,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            detector_model: PathBuf::from(DETECTOR_MODEL_FILE),
            recognizer_model: PathBuf::from(RECOGNIZER_MODEL_FILE),
            confidence_threshold: SCRFD_CONFIDENCE_THRESHOLD,
            face_selection: FaceSelection::First,
            intra_threads: DEFAULT_INTRA_THREADS,
        }
    }
}

/// Optional on-disk overrides. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    model_dir: Option<PathBuf>,
    detector_model: Option<PathBuf>,
    recognizer_model: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    face_selection: Option<FaceSelection>,
    intra_threads: Option<usize>,
}

impl Config {
    /// Load configuration from defaults, the TOML file named by
    /// `FACEREC_CONFIG` (if any), then `FACEREC_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var_os("FACEREC_CONFIG").map(PathBuf::from);
        Self::from_sources(file.as_deref(), |key| std::env::var(key).ok())
    }

    /// Layer an optional config file and an environment lookup over the defaults.
    pub fn from_sources<F>(file: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config {
            model_dir: model_dir_from(&env),
            ..Config::default()
        };

        if let Some(path) = file {
            config.apply_file(path)?;
        }

        if let Some(dir) = env("FACEREC_MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_parse::<f32, _>(&env, "FACEREC_CONFIDENCE_THRESHOLD") {
            if is_valid_threshold(v) {
                config.confidence_threshold = v;
            } else {
                tracing::warn!(
                    key = "FACEREC_CONFIDENCE_THRESHOLD",
                    value = v,
                    "ignoring confidence threshold outside 0.0..=1.0"
                );
            }
        }
        if let Some(v) = env_parse::<FaceSelection, _>(&env, "FACEREC_FACE_SELECTION") {
            config.face_selection = v;
        }
        if let Some(v) = env_parse::<usize, _>(&env, "FACEREC_INTRA_THREADS") {
            config.intra_threads = v;
        }

        tracing::debug!(?config, "configuration resolved");
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.detector_model {
            self.detector_model = v;
        }
        if let Some(v) = file.recognizer_model {
            self.recognizer_model = v;
        }
        if let Some(v) = file.confidence_threshold {
            if !is_valid_threshold(v) {
                return Err(ConfigError::Invalid {
                    path: path.to_path_buf(),
                    key: "confidence_threshold",
                    reason: format!("expected a number in 0.0..=1.0, got {v}"),
                });
            }
            self.confidence_threshold = v;
        }
        if let Some(v) = file.face_selection {
            self.face_selection = v;
        }
        if let Some(v) = file.intra_threads {
            self.intra_threads = v;
        }
        Ok(())
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.recognizer_model)
    }
}

/// Default model directory: `$FACEREC_MODEL_DIR`, else
/// `$XDG_DATA_HOME/facerec/models`, else `~/.local/share/facerec/models`.
pub fn default_model_dir() -> PathBuf {
    model_dir_from(|key| std::env::var(key).ok())
}

fn model_dir_from<F>(env: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = env("FACEREC_MODEL_DIR") {
        return PathBuf::from(dir);
    }

    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facerec")
        .join("models")
}

/// Parse an environment value, warning and ignoring it when malformed.
fn env_parse<T, F>(env: &F, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = env(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid environment override");
            None
        }
    }
}
