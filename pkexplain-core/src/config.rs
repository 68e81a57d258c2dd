//! Configuration system for pkexplain.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/pkexplain/config.toml` and/or
//! `.pkexplain/config.toml` in the workspace directory.

use crate::accuracy::Tolerances;
use crate::error::ConfigError;
use crate::explain::DEFAULT_ADDITIVITY_TOLERANCE;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Persisted model location.
    #[serde(default)]
    pub model: ModelConfig,
    /// Feature schema override.
    #[serde(default)]
    pub schema: SchemaConfig,
    /// Attribution engine settings.
    #[serde(default)]
    pub attribution: AttributionConfig,
    /// Tolerance bands for accuracy reports.
    #[serde(default)]
    pub accuracy: Tolerances,
    /// Log output settings (consumed by front ends).
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Model artifact configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the JSON model artifact.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Feature schema configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// TOML or JSON schema file; the built-in concentration schema is used when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Attribution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionConfig {
    /// Tolerance for `baseline + Σ contributions == prediction`, scaled by
    /// `max(1, |prediction|)`: relative above 1 mg/L, absolute below it.
    #[serde(default = "default_additivity_tolerance")]
    pub additivity_tolerance: f64,
    /// Number of contributions front ends display.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Settings for the opt-in sampling explainer.
    #[serde(default)]
    pub sampling: SamplingConfig,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            additivity_tolerance: default_additivity_tolerance(),
            top_n: default_top_n(),
            sampling: SamplingConfig::default(),
        }
    }
}

fn default_additivity_tolerance() -> f64 {
    DEFAULT_ADDITIVITY_TOLERANCE
}

fn default_top_n() -> usize {
    5
}

/// Permutation-sampling explainer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_permutations")]
    pub permutations: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            permutations: default_permutations(),
        }
    }
}

fn default_seed() -> u64 {
    42
}

fn default_permutations() -> usize {
    64
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default stderr filter when no verbosity flag is given.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also write JSON logs to a daily rolling file.
    #[serde(default)]
    pub json_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_file: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl PipelineConfig {
    /// Reject values no pipeline can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tolerance = self.attribution.additivity_tolerance;
        if !tolerance.is_finite() || tolerance <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "attribution.additivity_tolerance".to_string(),
                reason: format!("must be a positive number, got {tolerance}"),
            });
        }
        if self.attribution.sampling.permutations == 0 {
            return Err(ConfigError::Invalid {
                key: "attribution.sampling.permutations".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        self.accuracy
            .validate()
            .map_err(|e| ConfigError::Invalid {
                key: "accuracy".to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `PKEXPLAIN_`)
/// 3. Workspace-local config (`.pkexplain/config.toml`)
/// 4. User config (`~/.config/pkexplain/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&PipelineConfig>,
) -> Result<PipelineConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "pkexplain", "pkexplain") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".pkexplain").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // PKEXPLAIN_MODEL__PATH, PKEXPLAIN_ACCURACY__RELATIVE_TOLERANCE, etc.
    figment = figment.merge(Env::prefixed("PKEXPLAIN_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: PipelineConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}
