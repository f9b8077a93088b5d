//! Error types for the semloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each capability boundary has its own error enum; the loop decides
//! from these whether a failure is folded back into the transcript
//! or ends the run.

use thiserror::Error;

/// The top-level error type for semloop operations outside a run.
///
/// Inside a run, failures are values on the transcript; this type covers
/// process setup such as starting the gateway.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- I/O ---
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a model invocation.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    /// Generic failure with an explicit, provider-supplied retry flag.
    #[error("Provider failure: {message}")]
    Failed { message: String, retriable: bool },
}

impl ProviderError {
    /// Whether the loop may try the model again after this error.
    ///
    /// Transient conditions (overload, timeouts, network faults, 5xx) are
    /// retriable; anything that would fail identically on the next call is not.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::AuthenticationFailed(_) | Self::ModelNotFound(_) | Self::NotConfigured(_) => {
                false
            }
            Self::Failed { retriable, .. } => *retriable,
        }
    }
}

/// Failure of a tool invocation. Always folded back into the transcript.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Unknown sub-action '{sub_action}' for tool {tool_name}")]
    UnknownSubAction {
        tool_name: String,
        sub_action: String,
    },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Failure to turn a parsed action into a validated tool request.
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    /// No registered descriptor matches the action name. Fatal for the run.
    #[error("Unknown action '{name}' (available: {})", available.join(", "))]
    UnknownAction {
        name: String,
        available: Vec<String>,
    },

    /// The input could not be coerced to the descriptor's schema.
    /// The model is asked to correct itself.
    #[error("Invalid input for '{action}': {}", violations.join("; "))]
    SchemaMismatch {
        action: String,
        violations: Vec<String>,
    },

    /// The descriptor's own schema is not a valid JSON Schema document.
    #[error("Tool '{action}' declares an invalid input schema: {reason}")]
    InvalidSchema { action: String, reason: String },
}

impl ResolutionError {
    /// Only schema mismatches are worth feeding back to the model.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::SchemaMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn provider_retriable_classification() {
        assert!(ProviderError::RateLimited { retry_after_secs: 5 }.is_retriable());
        assert!(ProviderError::Timeout("slow".into()).is_retriable());
        assert!(
            ProviderError::ApiError {
                status_code: 503,
                message: "overloaded".into()
            }
            .is_retriable()
        );
        assert!(
            !ProviderError::ApiError {
                status_code: 400,
                message: "bad request".into()
            }
            .is_retriable()
        );
        assert!(!ProviderError::AuthenticationFailed("no key".into()).is_retriable());
        assert!(
            !ProviderError::Failed {
                message: "gone".into(),
                retriable: false
            }
            .is_retriable()
        );
    }

    #[test]
    fn resolution_error_retriability() {
        let unknown = ResolutionError::UnknownAction {
            name: "fly".into(),
            available: vec!["math__evaluate".into(), "clock".into()],
        };
        assert!(!unknown.is_retriable());
        assert!(unknown.to_string().contains("math__evaluate, clock"));

        let mismatch = ResolutionError::SchemaMismatch {
            action: "clock".into(),
            violations: vec!["\"offset_hours\" is a required property".into()],
        };
        assert!(mismatch.is_retriable());
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = ToolError::UnknownSubAction {
            tool_name: "math".into(),
            sub_action: "integrate".into(),
        };
        assert!(err.to_string().contains("integrate"));
        assert!(err.to_string().contains("math"));
    }

    #[test]
    fn setup_errors_convert_with_question_mark() {
        fn bind() -> Result<()> {
            let listener: std::io::Result<()> =
                Err(std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken"));
            listener?;
            Ok(())
        }
        fn provider() -> Result<()> {
            let selected: std::result::Result<(), ProviderError> =
                Err(ProviderError::NotConfigured("openrouter".into()));
            selected?;
            Ok(())
        }

        assert!(matches!(bind(), Err(Error::Io(_))));
        let err = provider().unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::NotConfigured(_))));
        assert!(err.to_string().contains("openrouter"));
    }
}
