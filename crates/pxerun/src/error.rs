//! CLI error types with miette diagnostics.
//!
//! Maps `ConfigError` and `CoreError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use pxerun_config::ConfigError;
use pxerun_core::CoreError;

/// Every failure exits 1; clap itself exits 2 on usage errors.
pub mod exit_code {
    pub const FAILURE: i32 = 1;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Missing required setting: {setting}")]
    #[diagnostic(
        code(pxerun::missing_setting),
        help("Pass {flag} or set {env}.")
    )]
    MissingSetting {
        setting: &'static str,
        flag: &'static str,
        env: &'static str,
    },

    #[error("Combination of keep={keep} and console={console} makes little sense")]
    #[diagnostic(
        code(pxerun::contradictory_flags),
        help("Without a console the machine would be deleted right after booting. Use --keep or --console=true.")
    )]
    Contradictory { keep: bool, console: bool },

    #[error(transparent)]
    #[diagnostic(code(pxerun::config))]
    Config(ConfigError),

    // ── Local files ──────────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(
        code(pxerun::cmdline),
        help("Run pxerun from the directory holding <NAME>-cmdline, or pass the right NAME.")
    )]
    Cmdline(CoreError),

    #[error("{0}")]
    #[diagnostic(
        code(pxerun::bind),
        help("Pick another address with --serve, e.g. --serve :8081")
    )]
    Bind(CoreError),

    // ── Assets ───────────────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(
        code(pxerun::asset),
        help(
            "The machine fetches its kernel and initrd from --base-url.\n\
             Check that <base-url>/<name>-kernel and <base-url>/<name>-initrd.img exist."
        )
    )]
    Asset(CoreError),

    // ── Provider ─────────────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(
        code(pxerun::auth_failed),
        help("Verify your API key (--api-key or PACKET_API_KEY).")
    )]
    Auth(CoreError),

    #[error("{0}")]
    #[diagnostic(code(pxerun::api_error))]
    Api(CoreError),

    #[error("{0}")]
    #[diagnostic(
        code(pxerun::delete_failed),
        help("The machine is still running and billed. Delete it from the Packet console.")
    )]
    DeleteFailed(CoreError),

    // ── Console ──────────────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(
        code(pxerun::host_key),
        help("Connect once with ssh to record the gateway's host key in ~/.ssh/known_hosts.")
    )]
    HostKey(CoreError),

    #[error("{0}")]
    #[diagnostic(
        code(pxerun::ssh_agent),
        help("Start an ssh-agent, add your Packet key with ssh-add and check SSH_AUTH_SOCK.")
    )]
    Agent(CoreError),

    #[error("{0}")]
    #[diagnostic(code(pxerun::console))]
    Console(CoreError),

    #[error("{0}")]
    #[diagnostic(code(pxerun::error))]
    Other(CoreError),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Missing { setting, flag, env } => {
                Self::MissingSetting { setting, flag, env }
            }
            ConfigError::Contradictory { keep, console } => Self::Contradictory { keep, console },
            other => Self::Config(other),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Cmdline { .. } => Self::Cmdline(err),
            CoreError::Bind { .. } => Self::Bind(err),
            CoreError::AssetUnreachable { .. } | CoreError::AssetStatus { .. } => Self::Asset(err),
            CoreError::AuthenticationFailed { .. } => Self::Auth(err),
            CoreError::Api { .. } | CoreError::ConnectionFailed { .. } | CoreError::Timeout => {
                Self::Api(err)
            }
            CoreError::DeleteFailed { .. } => Self::DeleteFailed(err),
            CoreError::KnownHosts { .. }
            | CoreError::HostKeyNotFound { .. }
            | CoreError::HostKeyInvalid { .. }
            | CoreError::HostKeyMismatch { .. } => Self::HostKey(err),
            CoreError::Agent { .. } => Self::Agent(err),
            CoreError::Ssh { .. } | CoreError::Terminal(_) => Self::Console(err),
            CoreError::Config { .. } | CoreError::Internal(_) => Self::Other(err),
        }
    }
}
