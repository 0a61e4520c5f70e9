// ── Core error types ──
//
// Run-level errors from pxerun-core. Each variant names the step that
// failed so the operator knows what was (and was not) provisioned.
// The `From<pxerun_api::Error>` impl translates transport-layer errors
// into domain-appropriate variants.

use std::net::SocketAddr;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Local inputs ─────────────────────────────────────────────────
    #[error("Cannot open cmdline file {path}: {source}")]
    Cmdline {
        path: String,
        #[source]
        source: std::io::Error,
    },

    // ── Asset validation ─────────────────────────────────────────────
    #[error("Asset {url} is unreachable: {reason}")]
    AssetUnreachable { url: String, reason: String },

    #[error("Asset {url} returned HTTP {status}")]
    AssetStatus { url: String, status: u16 },

    // ── File server ──────────────────────────────────────────────────
    #[error("Cannot listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    // ── Provider ─────────────────────────────────────────────────────
    #[error("Cannot connect to provider at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Provider request timed out")]
    Timeout,

    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    #[error("Unable to delete device {device_id}: {reason}")]
    DeleteFailed { device_id: String, reason: String },

    // ── Console ──────────────────────────────────────────────────────
    #[error("Can't open known_hosts file {path}: {source}")]
    KnownHosts {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No host key for {host} in known_hosts")]
    HostKeyNotFound { host: String },

    #[error("Error parsing host key for {host}: {reason}")]
    HostKeyInvalid { host: String, reason: String },

    #[error("Host key presented by {host} does not match known_hosts")]
    HostKeyMismatch { host: String },

    #[error("SSH agent: {message}")]
    Agent { message: String },

    #[error("SSH {step} failed: {reason}")]
    Ssh { step: &'static str, reason: String },

    #[error("Terminal I/O failed: {0}")]
    Terminal(#[source] std::io::Error),

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn ssh(step: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Ssh {
            step,
            reason: err.to_string(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<pxerun_api::Error> for CoreError {
    fn from(err: pxerun_api::Error) -> Self {
        match err {
            pxerun_api::Error::InvalidApiKey => CoreError::AuthenticationFailed {
                message: "Invalid API key".into(),
            },
            pxerun_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            pxerun_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            pxerun_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            pxerun_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            pxerun_api::Error::Api { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            pxerun_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
