use crate::{config::ConfigError, runtime::error::RuntimeError};
use miette::{Diagnostic, Report};
use std::fmt;
use std::sync::Once;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "PRIME_LOG";

static TRACING: Once = Once::new();

/// Installs a `tracing` subscriber filtered by `PRIME_LOG` (default `warn`).
/// Safe to call more than once.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_test_writer()
            .try_init();
    });
}

/// Owned snapshot of a [`RuntimeError`] that can cross into a miette report.
#[derive(Debug, Clone)]
pub struct RuntimeDiagnostic {
    pub message: String,
    pub code: String,
    pub help: Option<String>,
    pub fatal: bool,
}

impl From<&RuntimeError> for RuntimeDiagnostic {
    fn from(error: &RuntimeError) -> Self {
        Self {
            message: error.to_string(),
            code: error
                .code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "prime::runtime".into()),
            help: error.help().map(|help| help.to_string()),
            fatal: error.is_fatal(),
        }
    }
}

impl fmt::Display for RuntimeDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RuntimeDiagnostic {}

impl Diagnostic for RuntimeDiagnostic {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(&self.code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.help
            .as_ref()
            .map(|help| Box::new(help) as Box<dyn fmt::Display + 'a>)
    }
}

#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(prime::config))]
pub struct ConfigDiagnostic {
    message: String,
    #[help]
    help: Option<String>,
}

impl From<&ConfigError> for ConfigDiagnostic {
    fn from(error: &ConfigError) -> Self {
        let help = match error {
            ConfigError::Io { .. } => Some("check the path passed to RuntimeConfig::load".into()),
            ConfigError::Parse { .. } => {
                Some("see the [scheduler], [evaluator], [impls] and [host] sections".into())
            }
            ConfigError::Invalid(_) => None,
        };
        Self {
            message: error.to_string(),
            help,
        }
    }
}

pub fn render_runtime_error(error: &RuntimeError) -> String {
    format!("{:?}", Report::new(RuntimeDiagnostic::from(error)))
}

pub fn report_runtime_error(error: &RuntimeError) {
    tracing::error!(fatal = error.is_fatal(), "{}", error);
    eprintln!("{}", render_runtime_error(error));
}

pub fn report_config_error(error: &ConfigError) {
    eprintln!("{:?}", Report::new(ConfigDiagnostic::from(error)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_keeps_code_and_fatality() {
        let diagnostic = RuntimeDiagnostic::from(&RuntimeError::StackOverflow { limit: 4 });
        assert_eq!(diagnostic.code, "prime::stack_overflow");
        assert!(diagnostic.fatal);
        assert!(render_runtime_error(&RuntimeError::UnknownSymbol {
            name: "missing".into()
        })
        .contains("missing"));
    }
}
