//! Error types for scriptbridge

use std::io;
use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, ScriptError>;

/// Failure reported by an engine adapter, before the facade attaches the
/// language id and function name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Diagnostic raised by the interpreter (syntax error, thrown exception, ...)
    #[error("{0}")]
    Script(String),

    /// The requested function is not defined in the active context
    #[error("function not defined")]
    MissingFunction,

    /// A value could not be converted across the engine boundary
    #[error("{0}")]
    Conversion(String),
}

/// Result type for engine adapters.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Coarse classification of a [`ScriptError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No interpreter is registered under the language id
    EngineNotFound,
    /// Script source failed to parse or raised during top-level evaluation
    EvaluationError,
    /// The function is absent, or the engine cannot invoke functions at all
    FunctionNotFound,
    /// The function raised while running
    InvocationError,
    /// The script stream could not be read
    SourceRead,
    /// Invalid configuration
    Config,
}

/// Main error type for scriptbridge
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("no script engine registered for language `{language}`")]
    EngineNotFound { language: String },

    #[error("{language} evaluation failed: {message}")]
    Evaluation { language: String, message: String },

    #[error("function `{function}` is not defined by the {language} script")]
    FunctionNotFound { language: String, function: String },

    #[error("engine `{engine}` for {language} does not support function invocation")]
    NotInvocable { language: String, engine: String },

    #[error("{language} function `{function}` failed: {message}")]
    Invocation {
        language: String,
        function: String,
        message: String,
    },

    #[error("failed to read {language} script source: {source}")]
    SourceRead {
        language: String,
        #[source]
        source: io::Error,
    },

    #[error("config error: {0}")]
    Config(String),
}

impl ScriptError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EngineNotFound { .. } => ErrorKind::EngineNotFound,
            Self::Evaluation { .. } => ErrorKind::EvaluationError,
            Self::FunctionNotFound { .. } | Self::NotInvocable { .. } => {
                ErrorKind::FunctionNotFound
            }
            Self::Invocation { .. } => ErrorKind::InvocationError,
            Self::SourceRead { .. } => ErrorKind::SourceRead,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn evaluation(language: &str, err: EngineError) -> Self {
        Self::Evaluation {
            language: language.to_string(),
            message: err.to_string(),
        }
    }

    /// Attach call-site context to an adapter failure raised by `invoke_function`.
    pub(crate) fn from_invocation(language: &str, function: &str, err: EngineError) -> Self {
        match err {
            EngineError::MissingFunction => Self::function_not_found(language, function),
            other => Self::invocation(language, function, other.to_string()),
        }
    }

    pub(crate) fn function_not_found(language: &str, function: &str) -> Self {
        Self::FunctionNotFound {
            language: language.to_string(),
            function: function.to_string(),
        }
    }

    pub(crate) fn invocation(language: &str, function: &str, message: impl Into<String>) -> Self {
        Self::Invocation {
            language: language.to_string(),
            function: function.to_string(),
            message: message.into(),
        }
    }
}

impl From<toml::de::Error> for ScriptError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
