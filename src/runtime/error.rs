use crate::runtime::value::Value;
use miette::Diagnostic;
use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error, Diagnostic)]
pub enum RuntimeError {
    /// A user-level `raise`. The value is always an error record.
    #[error("{}", raised_message(.value))]
    #[diagnostic(code(prime::raise))]
    Raise { value: Value },
    #[error("Unknown symbol `{name}`")]
    #[diagnostic(code(prime::unknown_symbol))]
    UnknownSymbol { name: String },
    #[error("`{name}` is already declared in this scope")]
    #[diagnostic(code(prime::redeclaration))]
    Redeclaration { name: String },
    #[error("Type mismatch: {message}")]
    #[diagnostic(code(prime::type_mismatch))]
    TypeMismatch { message: String },
    #[error("Function `{name}` expected {expected} arguments but received {received}")]
    #[diagnostic(code(prime::arity))]
    ArityMismatch {
        name: String,
        expected: usize,
        received: usize,
    },
    #[error("Pattern mismatch: {message}")]
    #[diagnostic(code(prime::pattern))]
    PatternMismatch { message: String },
    #[error("Duplicate implementation of `{interface}` for `{target}`")]
    #[diagnostic(
        code(prime::duplicate_impl),
        help("list the `Interface::Type` pair in [impls].duplicate_allowlist to permit it")
    )]
    DuplicateImpl { interface: String, target: String },
    #[error("Constraint violated: `{type_name}` does not implement `{interface}`")]
    #[diagnostic(code(prime::constraint))]
    ConstraintViolation { type_name: String, interface: String },
    #[error("Operation not supported: {message}")]
    #[diagnostic(code(prime::unsupported))]
    Unsupported { message: String },
    #[error("extern `{name}` is not implemented for this host")]
    #[diagnostic(code(prime::host))]
    HostNotImplemented { name: String },
    #[error("`{operation}` would block outside of a task")]
    #[diagnostic(code(prime::would_block))]
    WouldBlock { operation: String },
    #[error("{message}")]
    #[diagnostic(code(prime::cancelled))]
    Cancelled { message: String },
    #[error("Re-entrant resume: {message}")]
    #[diagnostic(code(prime::reentrancy))]
    Reentrancy { message: String },
    #[error("Call depth exceeded {limit}")]
    #[diagnostic(code(prime::stack_overflow))]
    StackOverflow { limit: usize },
    #[error("Internal signal `{signal}` escaped {boundary}")]
    #[diagnostic(code(prime::signal_leak), help("this is an evaluator bug"))]
    SignalLeak { signal: String, boundary: String },
}

fn raised_message(value: &Value) -> String {
    match value {
        Value::Error(error) => error.message.clone(),
        other => other.to_string(),
    }
}

impl RuntimeError {
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        RuntimeError::TypeMismatch {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        RuntimeError::Unsupported {
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        RuntimeError::Cancelled {
            message: message.into(),
        }
    }

    /// Errors `rescue` and task boundaries must not swallow.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RuntimeError::Cancelled { .. }
                | RuntimeError::Reentrancy { .. }
                | RuntimeError::StackOverflow { .. }
                | RuntimeError::SignalLeak { .. }
        )
    }
}
