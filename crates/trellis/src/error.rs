//! Error types for expression evaluation and bindings.

/// Result type alias for binding operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing, evaluating or binding expressions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An error from the observation or lifecycle layer.
    #[error(transparent)]
    Core(#[from] trellis_core::Error),

    /// The expression text could not be parsed.
    #[error("Parse error at {position}: {message}")]
    Parse {
        /// What went wrong.
        message: String,
        /// Character offset into the source text.
        position: usize,
    },

    /// A scope without a binding context was used.
    #[error("Cannot bind or evaluate against a null or undefined scope")]
    NullScope,

    /// A call target did not resolve to a function.
    #[error("'{name}' is not a function")]
    NotAFunction {
        /// The name that was called.
        name: String,
    },

    /// An operator token the evaluator does not know.
    #[error("Unknown operator '{0}'")]
    UnknownOperator(String),

    /// A `| name` value converter is not registered.
    #[error("Value converter '{0}' not found")]
    ValueConverterNotFound(String),

    /// A `& name` binding behavior is not registered.
    #[error("Binding behavior '{0}' not found")]
    BindingBehaviorNotFound(String),

    /// The same binding behavior was applied twice to one binding.
    #[error("Binding behavior '{0}' is already applied to this binding")]
    BehaviorAlreadyApplied(String),

    /// A required service is missing from the service locator.
    #[error("Service locator does not provide '{0}'")]
    MissingLocator(String),

    /// A for-of statement was given a value that cannot be iterated.
    #[error("Cannot iterate over a value of type {0}")]
    NotIterable(&'static str),

    /// A binding instruction cannot be turned into a binding.
    #[error("Invalid binding instruction: {0}")]
    InvalidInstruction(String),
}

impl Error {
    /// Create a parse error.
    pub fn parse(message: impl Into<String>, position: usize) -> Self {
        Self::Parse {
            message: message.into(),
            position,
        }
    }

    /// Create a not-a-function error.
    pub fn not_a_function(name: impl Into<String>) -> Self {
        Self::NotAFunction { name: name.into() }
    }
}

impl From<Error> for trellis_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Core(core) => core,
            other => trellis_core::Error::host(other.to_string()),
        }
    }
}

static_assertions::assert_impl_all!(Error: Send, Sync, Clone);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::parse("Unexpected token ')'", 4).to_string(),
            "Parse error at 4: Unexpected token ')'"
        );
        assert_eq!(Error::not_a_function("save").to_string(), "'save' is not a function");
        assert_eq!(Error::NotIterable("boolean").to_string(), "Cannot iterate over a value of type boolean");
    }

    #[test]
    fn test_core_errors_pass_through() {
        let err: Error = trellis_core::Error::host("boom").into();
        assert_eq!(err.to_string(), "boom");
        assert!(matches!(err, Error::Core(_)));
        let back: trellis_core::Error = err.into();
        assert_eq!(back, trellis_core::Error::host("boom"));
    }

    #[test]
    fn test_binding_errors_surface_as_host_errors() {
        let core: trellis_core::Error = Error::NullScope.into();
        assert_eq!(core.to_string(), Error::NullScope.to_string());
    }
}
