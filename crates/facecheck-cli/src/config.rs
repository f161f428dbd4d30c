//! Layered configuration for the `facecheck` binary.
//!
//! Priority (lowest to highest):
//! 1. Built-in defaults
//! 2. XDG config: `$XDG_CONFIG_HOME/facecheck/config.toml`
//! 3. Project-local: `./.facecheck.toml`
//! 4. `FACECHECK_*` environment variables
//! 5. CLI flags
//!
//! Missing files are ignored. Values that fail to parse are logged and the
//! lower layer's value is kept.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use facecheck_core::{AnalysisConfiguration, DetectorBackend, DistanceMetric, ModelName};
use serde::Deserialize;
use tracing::{debug, info, warn};

pub const ENV_MODEL_DIR: &str = "FACECHECK_MODEL_DIR";
pub const ENV_MODEL: &str = "FACECHECK_MODEL";
pub const ENV_DETECTOR: &str = "FACECHECK_DETECTOR";
pub const ENV_METRIC: &str = "FACECHECK_METRIC";
pub const ENV_INTRA_THREADS: &str = "FACECHECK_INTRA_THREADS";

const PROJECT_FILE: &str = ".facecheck.toml";

/// Contents of one TOML config file. Every field is optional so files can
/// be merged.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub analysis: AnalysisSection,
    pub models: ModelsSection,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisSection {
    /// Recognition model, e.g. "VGG-Face" or "arcface".
    pub model: Option<String>,
    pub detector: Option<String>,
    pub metric: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsSection {
    /// Directory holding the ONNX model files.
    pub dir: Option<PathBuf>,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: Option<usize>,
}

impl FileConfig {
    /// Read the XDG and project-local files, the latter taking precedence.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(path) = xdg_config_path() {
            if path.exists() {
                info!(path = %path.display(), "loading XDG config");
                if let Some(file) = load_file(&path) {
                    config = file;
                }
            } else {
                debug!(path = %path.display(), "XDG config not found");
            }
        }

        let project = PathBuf::from(PROJECT_FILE);
        if project.exists() {
            info!(path = %project.display(), "loading project config");
            if let Some(file) = load_file(&project) {
                config.merge(file);
            }
        }

        config
    }

    /// Values present in `other` override those in `self`.
    fn merge(&mut self, other: Self) {
        self.analysis.model = other.analysis.model.or_else(|| self.analysis.model.take());
        self.analysis.detector = other.analysis.detector.or_else(|| self.analysis.detector.take());
        self.analysis.metric = other.analysis.metric.or_else(|| self.analysis.metric.take());
        self.models.dir = other.models.dir.or_else(|| self.models.dir.take());
        self.models.intra_threads = other.models.intra_threads.or(self.models.intra_threads);
    }
}

/// Values given on the command line.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub model: Option<ModelName>,
    pub detector: Option<DetectorBackend>,
    pub metric: Option<DistanceMetric>,
    pub model_dir: Option<PathBuf>,
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub configuration: AnalysisConfiguration,
    pub model_dir: PathBuf,
    pub intra_threads: usize,
}

impl Config {
    /// Resolve every layer against the real filesystem and process environment.
    pub fn load(overrides: &Overrides) -> Self {
        Self::resolve(FileConfig::load(), |key| std::env::var(key).ok(), overrides)
    }

    /// Apply files, then environment (looked up through `env`), then flags.
    pub fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>, overrides: &Overrides) -> Self {
        let mut config = Self::default();

        apply(&mut config.configuration.model_name, file.analysis.model, "analysis.model");
        apply(&mut config.configuration.detector_backend, file.analysis.detector, "analysis.detector");
        apply(&mut config.configuration.distance_metric, file.analysis.metric, "analysis.metric");
        if let Some(dir) = file.models.dir {
            config.model_dir = dir;
        }
        if let Some(threads) = file.models.intra_threads {
            config.intra_threads = threads;
        }

        apply(&mut config.configuration.model_name, env(ENV_MODEL), ENV_MODEL);
        apply(&mut config.configuration.detector_backend, env(ENV_DETECTOR), ENV_DETECTOR);
        apply(&mut config.configuration.distance_metric, env(ENV_METRIC), ENV_METRIC);
        apply(&mut config.intra_threads, env(ENV_INTRA_THREADS), ENV_INTRA_THREADS);
        if let Some(dir) = env(ENV_MODEL_DIR).filter(|d| !d.is_empty()) {
            config.model_dir = PathBuf::from(dir);
        }

        if let Some(model) = overrides.model {
            config.configuration.model_name = model;
        }
        if let Some(detector) = overrides.detector {
            config.configuration.detector_backend = detector;
        }
        if let Some(metric) = overrides.metric {
            config.configuration.distance_metric = metric;
        }
        if let Some(dir) = &overrides.model_dir {
            config.model_dir = dir.clone();
        }

        config.intra_threads = config.intra_threads.max(1);
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            configuration: AnalysisConfiguration::default(),
            model_dir: facecheck_core::default_model_dir(),
            intra_threads: 4,
        }
    }
}

/// Parse `raw` into `target`, keeping the current value on failure.
fn apply<T>(target: &mut T, raw: Option<String>, source: &str)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = raw else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(e) => warn!(source, value = %raw, error = %e, "ignoring invalid setting"),
    }
}

fn xdg_config_path() -> Option<PathBuf> {
    let base = std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|d| !d.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("facecheck").join("config.toml"))
}

fn load_file(path: &Path) -> Option<FileConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read config file");
            return None;
        }
    };

    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse config file");
            None
        }
    }
}
