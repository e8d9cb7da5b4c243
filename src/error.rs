use crate::error_code::ErrorCode;
use std::time::Duration;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Configuration key or request slot that caused the error (e.g., "max_batch_size", "window[3]")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., window sequence, permit counts)
    pub details: Option<String>,
    /// Source of the error (e.g., "isolated_executor", "request_collapser")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for collapsing, isolation and streaming.
///
/// The type is `Clone` because one batch failure resolves every request of its window.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Execution rejected: {message}{}", format_context(.context))]
    Rejected {
        message: String,
        context: ErrorContext,
    },

    #[error("Execution short-circuited: circuit breaker open")]
    ShortCircuited,

    #[error("Execution timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },

    #[error("Execution failed: {message}{}", format_context(.context))]
    Execution {
        message: String,
        context: ErrorContext,
    },

    #[error("Batch mapping error: expected {expected} results, got {actual}")]
    Mapping { expected: usize, actual: usize },

    /// Raised by `Subscriber::check_cancelled` so producers can stop with `?`.
    #[error("Stream cancelled")]
    Cancelled,

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn rejected(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Rejected {
            message: msg.into(),
            context,
        }
    }

    /// Wrap a failure raised by injected domain logic.
    pub fn execution(msg: impl Into<String>) -> Self {
        Error::Execution {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn execution_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Execution {
            message: msg.into(),
            context,
        }
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Error::Runtime {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Rejected { .. } => ErrorCode::Rejected,
            Error::ShortCircuited => ErrorCode::ShortCircuited,
            Error::Timeout { .. } => ErrorCode::Timeout,
            Error::Execution { .. } => ErrorCode::ExecutionFailure,
            Error::Mapping { .. } => ErrorCode::MappingError,
            Error::Cancelled => ErrorCode::Cancelled,
            Error::Configuration { .. } => ErrorCode::Configuration,
            Error::Runtime { .. } => ErrorCode::Runtime,
        }
    }

    /// Whether a configured fallback may replace this error with a value.
    pub fn is_fallbackable(&self) -> bool {
        self.code().fallbackable()
    }

    pub fn is_retryable(&self) -> bool {
        self.code().retryable()
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Rejected { context, .. }
            | Error::Execution { context, .. }
            | Error::Configuration { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}

/// Conversion used for failures returned by injected batch and producer functions.
///
/// Functions that already fail with [`Error`] keep their variant; anything else that
/// can be displayed becomes [`Error::Execution`].
pub trait IntoExecutionError {
    fn into_execution_error(self) -> Error;
}

impl IntoExecutionError for Error {
    fn into_execution_error(self) -> Error {
        self
    }
}

impl IntoExecutionError for String {
    fn into_execution_error(self) -> Error {
        Error::execution(self)
    }
}

impl IntoExecutionError for &'static str {
    fn into_execution_error(self) -> Error {
        Error::execution(self)
    }
}

impl IntoExecutionError for std::io::Error {
    fn into_execution_error(self) -> Error {
        Error::execution(self.to_string())
    }
}

impl IntoExecutionError for Box<dyn std::error::Error + Send + Sync> {
    fn into_execution_error(self) -> Error {
        Error::execution(self.to_string())
    }
}
