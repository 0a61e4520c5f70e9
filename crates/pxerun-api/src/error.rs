use thiserror::Error;

/// Top-level error type for the `pxerun-api` crate.
///
/// Covers every failure mode of the provider REST surface: authentication,
/// transport, structured API errors and response decoding.
/// `pxerun-core` maps these into run-level diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// API token rejected by the provider (HTTP 401).
    #[error("Invalid API key")]
    InvalidApiKey,

    /// The API token cannot be carried in an HTTP header.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The HTTP client could not be constructed.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Provider API ────────────────────────────────────────────────
    /// Structured error from the provider API.
    ///
    /// The provider answers failures with `{"errors": ["..."]}`; the
    /// messages are joined with `; `.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Api { status: 404, .. } => true,
            _ => false,
        }
    }
}
