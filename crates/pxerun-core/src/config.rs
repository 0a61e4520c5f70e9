// ── Resolved run settings ──
//
// These types describe *what* to provision and *how* to reach the provider.
// They carry credential data and never touch disk or the environment.
// pxerun-config resolves flags, env and file into a `Settings` and hands it in.

use std::net::SocketAddr;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

/// Artifact prefix used when none is given on the command line.
pub const DEFAULT_PREFIX: &str = "packet";

/// Fully resolved settings for a single run.
///
/// Immutable once built: the runner and every component only read it.
#[derive(Debug, Clone)]
pub struct Settings {
    /// URL the kernel and initrd are fetched from by the booting machine.
    pub base_url: String,
    /// Facility code (e.g. `ams1`).
    pub zone: String,
    /// Plan slug (e.g. `baremetal_0`).
    pub machine: String,
    /// Provider API token.
    pub api_key: SecretString,
    pub project_id: String,
    /// Hostname given to the new device.
    pub hostname: String,
    /// Name the kernel/initrd assets are published under.
    pub name: String,
    /// Prefix of the local artifacts (`<prefix>-cmdline`).
    pub prefix: String,
    /// Boot from iPXE on every power cycle.
    pub always_pxe: bool,
    /// Keep the device after the run instead of deleting it.
    pub keep: bool,
    /// Attach the serial console over SSH.
    pub console: bool,
    /// Serve the assets locally on this address.
    pub serve: Option<SocketAddr>,
    /// Provider API endpoint.
    pub api_url: Url,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
}
