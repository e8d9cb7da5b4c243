//! Stable error codes for collapsing and isolation failures.
//!
//! Every [`crate::Error`] maps onto exactly one [`ErrorCode`]. The code carries the
//! metadata callers need to decide what to do next: whether a fallback may mask
//! it, whether resubmitting could succeed, and which category it belongs to.
//!
//! ## Error Code Categories
//!
//! | Prefix | Category    | Description                                  |
//! |--------|-------------|----------------------------------------------|
//! | E1xxx  | admission   | Work refused before it started               |
//! | E2xxx  | deadline    | Work exceeded its execution timeout          |
//! | E3xxx  | execution   | Injected batch/producer function failed      |
//! | E4xxx  | invariant   | Contract violations and cancellation         |
//! | E5xxx  | operational | Configuration problems                       |
//! | E9xxx  | unknown     | Catch-all runtime failures                   |
//!
//! ## Example
//!
//! ```rust
//! use collapser_rs::error_code::ErrorCode;
//!
//! let code = ErrorCode::from_name("timeout").unwrap();
//! assert_eq!(code.code(), "E2001");
//! assert!(code.fallbackable());
//! assert_eq!(code.category(), "deadline");
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// E1001: concurrency bound reached
    Rejected,
    /// E1002: circuit breaker open
    ShortCircuited,
    /// E2001: execution timeout elapsed
    Timeout,
    /// E3001: the unit of work returned an error or panicked
    ExecutionFailure,
    /// E4001: batch result length differs from the window size
    MappingError,
    /// E4002: stream session cancelled
    Cancelled,
    /// E5001: invalid configuration
    Configuration,
    /// E9999: anything else
    Runtime,
}

impl ErrorCode {
    /// Returns the canonical code string (e.g., `"E1001"`).
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Rejected => "E1001",
            Self::ShortCircuited => "E1002",
            Self::Timeout => "E2001",
            Self::ExecutionFailure => "E3001",
            Self::MappingError => "E4001",
            Self::Cancelled => "E4002",
            Self::Configuration => "E5001",
            Self::Runtime => "E9999",
        }
    }

    /// Returns the standard name (e.g., `"short_circuited"`).
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::ShortCircuited => "short_circuited",
            Self::Timeout => "timeout",
            Self::ExecutionFailure => "execution_failure",
            Self::MappingError => "mapping_error",
            Self::Cancelled => "cancelled",
            Self::Configuration => "configuration",
            Self::Runtime => "runtime",
        }
    }

    /// Whether a configured fallback may substitute a result for this error.
    ///
    /// Mapping errors are never fallbackable: they mean the batch function is broken.
    #[inline]
    pub fn fallbackable(&self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::ShortCircuited | Self::Timeout | Self::ExecutionFailure
        )
    }

    /// Whether resubmitting the same request later could succeed.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::ShortCircuited | Self::Timeout
        )
    }

    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Rejected | Self::ShortCircuited => "admission",
            Self::Timeout => "deadline",
            Self::ExecutionFailure => "execution",
            Self::MappingError | Self::Cancelled => "invariant",
            Self::Configuration => "operational",
            Self::Runtime => "unknown",
        }
    }

    /// Maps a standard name back to its code. Unknown names return `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        let code = match name {
            "rejected" => Self::Rejected,
            "short_circuited" => Self::ShortCircuited,
            "timeout" => Self::Timeout,
            "execution_failure" => Self::ExecutionFailure,
            "mapping_error" => Self::MappingError,
            "cancelled" => Self::Cancelled,
            "configuration" => Self::Configuration,
            "runtime" => Self::Runtime,
            _ => return None,
        };
        Some(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
