use likeness_core::{DetectorMode, ARCFACE_DEFAULT_TOLERANCE};
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Path to the enrolled-faces store file.
    pub store_path: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Euclidean distance tolerance for a positive match.
    pub tolerance: f32,
    /// Detector mode used when no `--mode` flag is given.
    pub detector_mode: DetectorMode,
}

impl Config {
    /// Load configuration from `LIKENESS_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("likeness");

        let store_path = std::env::var("LIKENESS_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("encodings.json"));

        let model_dir = std::env::var("LIKENESS_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let detector_mode = match std::env::var("LIKENESS_DETECTOR_MODE") {
            Ok(v) => v.parse().unwrap_or_else(|e: String| {
                tracing::warn!(error = %e, "ignoring LIKENESS_DETECTOR_MODE");
                DetectorMode::default()
            }),
            Err(_) => DetectorMode::default(),
        };

        Self {
            store_path,
            model_dir,
            tolerance: env_f32("LIKENESS_TOLERANCE", ARCFACE_DEFAULT_TOLERANCE),
            detector_mode,
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
