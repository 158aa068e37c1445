//! Transport errors of the Gemini client.

use thiserror::Error;

/// Errors that can occur while calling the Gemini API.
///
/// They never reach a caller of the evaluator: they are turned into a
/// degraded outcome there.
#[derive(Debug, Error)]
pub enum GeminiError {
    /// HTTP 429. `retry_after_ms` is taken from `Retry-After` when present.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Any other non-success status, with the response body as message.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// DNS, connection, timeout or body decoding failure.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}
