//! Distance oracle error types.

use std::fmt;

/// Errors from a distance oracle.
#[derive(Debug)]
pub enum OracleError {
    /// HTTP request failed (network error, timeout, etc.)
    Http(reqwest::Error),

    /// JSON deserialization failed
    Json {
        message: String,
        body: Option<String>,
    },

    /// API returned an error status code
    ApiError { status: u16, message: String },

    /// Rate limited by the API
    RateLimited,

    /// Invalid API key or unauthorized
    Unauthorized,

    /// The response matrix does not have the requested shape
    Shape { expected: (usize, usize), got: (usize, usize) },

    /// A request asked for more pairs than one call allows
    TooManyPairs { pairs: usize, limit: usize },
}

impl OracleError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            OracleError::Http(_) | OracleError::RateLimited => true,
            OracleError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleError::Http(e) => write!(f, "HTTP error: {e}"),
            OracleError::Json { message, body } => {
                write!(f, "JSON parse error: {message}")?;
                if let Some(body) = body {
                    write!(f, " (body: {body})")?;
                }
                Ok(())
            }
            OracleError::ApiError { status, message } => {
                write!(f, "API error {status}: {message}")
            }
            OracleError::RateLimited => write!(f, "rate limited by route matrix API"),
            OracleError::Unauthorized => write!(f, "unauthorized (invalid API key)"),
            OracleError::Shape { expected, got } => write!(
                f,
                "matrix shape mismatch: expected {}x{}, got {}x{}",
                expected.0, expected.1, got.0, got.1
            ),
            OracleError::TooManyPairs { pairs, limit } => {
                write!(f, "{pairs} pairs requested, limit is {limit}")
            }
        }
    }
}

impl std::error::Error for OracleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OracleError::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        OracleError::Http(err)
    }
}
