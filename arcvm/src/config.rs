//! Runtime configuration, loaded from TOML.
//!
//! ```toml
//! [evaluator]
//! max-steps = 1000000
//! trace-steps = false
//!
//! [logging]
//! filter = "arcvm=debug"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ArcvmConfig {
    pub evaluator: EvaluatorConfig,
    pub logging: LoggingConfig,
}

/// Limits and diagnostics for the trampoline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EvaluatorConfig {
    /// Maximum trampoline iterations per evaluation; unlimited when absent.
    pub max_steps: Option<u64>,
    /// Emit a trace event for every trampoline step.
    pub trace_steps: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when no environment
    /// override is set.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "warn".to_string(),
        }
    }
}

impl ArcvmConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }
}

impl EvaluatorConfig {
    pub fn with_max_steps(max_steps: u64) -> Self {
        EvaluatorConfig {
            max_steps: Some(max_steps),
            ..Self::default()
        }
    }
}
