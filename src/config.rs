use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const DEFAULT_MAX_STEPS: usize = 1024;
pub const DEFAULT_MAX_CALL_DEPTH: usize = 512;

/// Runtime settings, usually read from a `prime-runtime.toml`.
///
/// ```toml
/// [scheduler]
/// max_steps = 256
///
/// [impls]
/// duplicate_allowlist = ["Error::ProcError", "Show::Point"]
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerConfig,
    pub evaluator: EvaluatorConfig,
    pub impls: ImplConfig,
    pub host: HostConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Tasks run per `proc_flush()` before control returns to the caller.
    pub max_steps: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub max_call_depth: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImplConfig {
    /// `Interface::Type` pairs allowed to have overlapping unnamed impls.
    pub duplicate_allowlist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct HostConfig {
    /// Collect `print` output in memory instead of writing to stdout.
    pub capture_output: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            evaluator: EvaluatorConfig::default(),
            impls: ImplConfig::default(),
            host: HostConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl Default for ImplConfig {
    fn default() -> Self {
        Self {
            duplicate_allowlist: vec!["Error::ProcError".into(), "Clone::String".into()],
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {error}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("invalid runtime config{}: {message}", .path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default())]
    Parse {
        path: Option<PathBuf>,
        message: String,
    },
    #[error("invalid runtime config: {0}")]
    Invalid(String),
}

impl RuntimeConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(source).map_err(|error| ConfigError::Parse {
            path: None,
            message: error.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_toml_str(&content).map_err(|error| match error {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: Some(path.to_path_buf()),
                message,
            },
            other => other,
        })
    }

    pub fn allows_duplicate(&self, interface: &str, target: &str) -> bool {
        let key = format!("{interface}::{target}");
        self.impls
            .duplicate_allowlist
            .iter()
            .any(|entry| entry == &key)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.max_steps == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_steps must be at least 1".into(),
            ));
        }
        if self.evaluator.max_call_depth == 0 {
            return Err(ConfigError::Invalid(
                "evaluator.max_call_depth must be at least 1".into(),
            ));
        }
        if let Some(entry) = self
            .impls
            .duplicate_allowlist
            .iter()
            .find(|entry| entry.split("::").count() != 2)
        {
            return Err(ConfigError::Invalid(format!(
                "allowlist entry `{entry}` must look like `Interface::Type`"
            )));
        }
        Ok(())
    }
}
