// Configuration loading and parsing (pipeline.toml, registry.toml).

use draftvision_core::engine::EngineOptions;
use draftvision_core::investment::Deviation;
use draftvision_core::model::{ModelOptions, NoiseOptions, OutcomeProxy};
use draftvision_core::preprocess::PreprocessOptions;
use draftvision_core::registry::{RegistryError, SchemaRegistry};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid position registry {path}: {source}")]
    InvalidRegistry {
        path: PathBuf,
        source: RegistryError,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineOptions,
    pub registry: SchemaRegistry,
    pub data_paths: DataPaths,
    pub output: OutputConfig,
}

// ---------------------------------------------------------------------------
// pipeline.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire pipeline.toml file.
#[derive(Debug, Clone, Deserialize)]
struct PipelineFile {
    #[serde(default)]
    preprocess: PreprocessOptions,
    #[serde(default)]
    model: ModelSection,
    #[serde(default)]
    noise: NoiseOptions,
    #[serde(default)]
    investment: InvestmentSection,
    data_paths: DataPaths,
    output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct ModelSection {
    #[serde(default)]
    proxy: OutcomeProxy,
    #[serde(default = "default_ridge_lambda")]
    ridge_lambda: f64,
    #[serde(default = "default_min_training_samples")]
    min_training_samples: usize,
    #[serde(default)]
    undrafted_pick: Option<u32>,
}

fn default_ridge_lambda() -> f64 {
    ModelOptions::default().ridge_lambda
}

fn default_min_training_samples() -> usize {
    ModelOptions::default().min_training_samples
}

impl Default for ModelSection {
    fn default() -> Self {
        let defaults = ModelOptions::default();
        Self {
            proxy: defaults.proxy,
            ridge_lambda: defaults.ridge_lambda,
            min_training_samples: defaults.min_training_samples,
            undrafted_pick: defaults.undrafted_pick,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct InvestmentSection {
    #[serde(default)]
    deviation: Deviation,
}

/// Input CSV locations.
#[derive(Debug, Clone, Deserialize)]
pub struct DataPaths {
    pub training: String,
    pub prospects: String,
    pub investment: String,
}

/// Where results are written.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub database: String,
    pub rankings_json: String,
    pub models_json: String,
    /// Keep only this position in the rankings output (global ranks kept).
    #[serde(default)]
    pub position_filter: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/pipeline.toml` and
/// (optionally) `config/registry.toml`, relative to `base_dir`. Without a
/// registry file the built-in position registry is used.
pub(crate) fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- pipeline.toml (required) ---
    let pipeline_path = config_dir.join("pipeline.toml");
    let pipeline_text = read_file(&pipeline_path)?;
    let pipeline: PipelineFile =
        toml::from_str(&pipeline_text).map_err(|e| ConfigError::ParseError {
            path: pipeline_path.clone(),
            source: e,
        })?;

    // --- registry.toml (optional) ---
    let registry_path = config_dir.join("registry.toml");
    let registry = if registry_path.exists() {
        let registry_text = read_file(&registry_path)?;
        SchemaRegistry::from_toml_str(&registry_text).map_err(|e| ConfigError::InvalidRegistry {
            path: registry_path.clone(),
            source: e,
        })?
    } else {
        SchemaRegistry::builtin()
    };

    let engine = EngineOptions {
        preprocess: pipeline.preprocess,
        model: ModelOptions {
            proxy: pipeline.model.proxy,
            ridge_lambda: pipeline.model.ridge_lambda,
            min_training_samples: pipeline.model.min_training_samples,
            undrafted_pick: pipeline.model.undrafted_pick,
            noise: pipeline.noise,
        },
        investment: pipeline.investment.deviation,
    };

    let config = Config {
        engine,
        registry,
        data_paths: pipeline.data_paths,
        output: pipeline.output,
    };

    validate(&config)?;

    Ok(config)
}

/// Seed `config/` from the shipped `defaults/` so a fresh checkout runs
/// without manual setup. Files already in `config/` are left alone, and
/// `.example` files are never copied. Returns the files written.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.is_dir() {
        if config_dir.is_dir() {
            return Ok(Vec::new());
        }
        return Err(bootstrap_error(format!(
            "no defaults/ or config/ under {}; pipeline.toml has nowhere to come from",
            base_dir.display()
        )));
    }

    std::fs::create_dir_all(&config_dir)
        .map_err(|e| bootstrap_error(format!("cannot create {}: {e}", config_dir.display())))?;

    let mut shipped = Vec::new();
    let listing = std::fs::read_dir(&defaults_dir)
        .map_err(|e| bootstrap_error(format!("cannot list {}: {e}", defaults_dir.display())))?;
    for entry in listing {
        let path = entry
            .map_err(|e| bootstrap_error(format!("cannot list {}: {e}", defaults_dir.display())))?
            .path();
        let is_example = path.extension().is_some_and(|ext| ext == "example");
        if path.is_file() && !is_example {
            shipped.push(path);
        }
    }
    shipped.sort();

    let mut written = Vec::new();
    for source in shipped {
        let Some(name) = source.file_name() else {
            continue;
        };
        let target = config_dir.join(name);
        if copy_if_missing(&source, &target)? {
            written.push(target);
        }
    }
    Ok(written)
}

fn bootstrap_error(message: String) -> ConfigError {
    ConfigError::DefaultsCopyError { message }
}

/// Copy `source` to `target` unless `target` exists. `create_new` keeps two
/// concurrent runs from overwriting each other's edits.
fn copy_if_missing(source: &Path, target: &Path) -> Result<bool, ConfigError> {
    use std::io::Write;

    let mut dest = match std::fs::OpenOptions::new().write(true).create_new(true).open(target) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(bootstrap_error(format!("cannot create {}: {e}", target.display()))),
    };
    let content = std::fs::read(source)
        .map_err(|e| bootstrap_error(format!("cannot read {}: {e}", source.display())))?;
    dest.write_all(&content)
        .map_err(|e| bootstrap_error(format!("cannot write {}: {e}", target.display())))?;
    Ok(true)
}

/// Load config relative to `base_dir`, copying defaults first.
pub fn load_config_in(base_dir: &Path) -> Result<Config, ConfigError> {
    ensure_config_files(base_dir)?;
    load_config_from(base_dir)
}

/// Convenience wrapper: loads config relative to the current working directory.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    load_config_in(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let model = &config.engine.model;

    // One-hot columns are collinear with the intercept, so an unpenalized
    // fit is singular for any group with a categorical field.
    if !model.ridge_lambda.is_finite() || model.ridge_lambda <= 0.0 {
        return Err(ConfigError::ValidationError {
            field: "model.ridge_lambda".into(),
            message: format!("must be a finite value > 0, got {}", model.ridge_lambda),
        });
    }

    if model.min_training_samples == 0 {
        return Err(ConfigError::ValidationError {
            field: "model.min_training_samples".into(),
            message: "must be > 0".into(),
        });
    }

    if model.undrafted_pick == Some(0) {
        return Err(ConfigError::ValidationError {
            field: "model.undrafted_pick".into(),
            message: "must be >= 1 when set".into(),
        });
    }

    let magnitude = model.noise.magnitude;
    if !magnitude.is_finite() || magnitude < 0.0 {
        return Err(ConfigError::ValidationError {
            field: "noise.magnitude".into(),
            message: format!("must be a finite value >= 0, got {magnitude}"),
        });
    }

    let paths: &[(&str, &str)] = &[
        ("data_paths.training", config.data_paths.training.as_str()),
        ("data_paths.prospects", config.data_paths.prospects.as_str()),
        ("data_paths.investment", config.data_paths.investment.as_str()),
        ("output.database", config.output.database.as_str()),
        ("output.rankings_json", config.output.rankings_json.as_str()),
        ("output.models_json", config.output.models_json.as_str()),
    ];
    for (name, value) in paths {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must not be empty".into(),
            });
        }
    }

    if let Some(filter) = &config.output.position_filter {
        if config.registry.resolve(filter).is_err() {
            return Err(ConfigError::ValidationError {
                field: "output.position_filter".into(),
                message: format!("position `{filter}` is not in the registry"),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
