//! Serial-over-SSH console bridge.
//!
//! The provider exposes each machine's serial console through an SSH
//! gateway per facility (`sos.<facility>.packet.net`), logging in as the
//! device ID. The bridge verifies the gateway against `known_hosts`,
//! authenticates with the local agent, then relays a raw-mode terminal
//! until the remote shell exits.

use std::future::Future;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use pxerun_api::types::Device;
use ssh2::{Channel, PtyModeOpcode, PtyModes, Session};
use tracing::{debug, info, warn};

use crate::error::CoreError;

pub const SOS_PORT: u16 = 22;

/// Terminal size used when the real one cannot be determined.
pub const DEFAULT_TERMINAL_SIZE: (u16, u16) = (80, 40);

const PTY_TERM: &str = "vt100";
const RELAY_IDLE: Duration = Duration::from_millis(10);

/// Gateway hostname for a facility code.
pub fn sos_host(facility_code: &str) -> String {
    format!("sos.{facility_code}.packet.net")
}

// ── ConsoleTarget ────────────────────────────────────────────────────

/// Where and as whom to open the console session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleTarget {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl ConsoleTarget {
    pub fn for_device(device: &Device) -> Self {
        Self {
            user: device.id.clone(),
            host: sos_host(&device.facility.code),
            port: SOS_PORT,
        }
    }

    /// Command an operator can run to reach the console by hand.
    pub fn ssh_command(&self) -> String {
        format!("ssh {}@{}", self.user, self.host)
    }
}

/// Opens an interactive remote shell and blocks until it closes.
pub trait Console {
    fn attach(&self, target: &ConsoleTarget)
    -> impl Future<Output = Result<(), CoreError>> + Send;
}

// ── known_hosts ──────────────────────────────────────────────────────

/// `~/.ssh/known_hosts` for the current user.
pub fn default_known_hosts() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".ssh").join("known_hosts"))
}

/// Find the key for `host` in known_hosts `contents`.
///
/// Only lines with exactly three space-separated fields are considered;
/// the first one whose host field contains `host` wins.
pub fn lookup_host_key(contents: &str, host: &str) -> Result<ssh_key::PublicKey, CoreError> {
    for line in contents.lines() {
        let fields: Vec<&str> = line.split(' ').collect();
        let &[hosts, algorithm, key] = fields.as_slice() else {
            continue;
        };
        if !hosts.contains(host) {
            continue;
        }
        return ssh_key::PublicKey::from_openssh(&format!("{algorithm} {key}")).map_err(|e| {
            CoreError::HostKeyInvalid {
                host: host.to_owned(),
                reason: e.to_string(),
            }
        });
    }

    Err(CoreError::HostKeyNotFound {
        host: host.to_owned(),
    })
}

fn expected_host_key(known_hosts: &Path, host: &str) -> Result<Vec<u8>, CoreError> {
    let contents = std::fs::read_to_string(known_hosts).map_err(|source| CoreError::KnownHosts {
        path: known_hosts.display().to_string(),
        source,
    })?;
    let key = lookup_host_key(&contents, host)?;
    debug!(host, fingerprint = %key.fingerprint(ssh_key::HashAlg::Sha256), "Expecting host key");
    key.to_bytes().map_err(|e| CoreError::HostKeyInvalid {
        host: host.to_owned(),
        reason: e.to_string(),
    })
}

// ── Terminal ─────────────────────────────────────────────────────────

/// Local terminal size as (columns, rows), or the 80x40 fallback.
pub fn terminal_size() -> (u16, u16) {
    match crossterm::terminal::size() {
        Ok(size) => size,
        Err(e) => {
            warn!("Error getting terminal size. Ignored. {e}");
            DEFAULT_TERMINAL_SIZE
        }
    }
}

/// Raw mode for as long as the guard lives; the previous mode comes back on drop.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self, CoreError> {
        crossterm::terminal::enable_raw_mode().map_err(CoreError::Terminal)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = crossterm::terminal::disable_raw_mode() {
            warn!(error = %e, "Failed to restore terminal mode");
        }
    }
}

// ── SosConsole ───────────────────────────────────────────────────────

/// Console over the provider's SSH gateway, using libssh2.
#[derive(Debug, Clone)]
pub struct SosConsole {
    known_hosts: Option<PathBuf>,
}

impl SosConsole {
    pub fn new(known_hosts: PathBuf) -> Self {
        Self {
            known_hosts: Some(known_hosts),
        }
    }

    /// Console verifying against the current user's `~/.ssh/known_hosts`.
    ///
    /// A missing home directory only fails once a session is attached.
    pub fn from_home() -> Self {
        Self {
            known_hosts: default_known_hosts(),
        }
    }
}

impl Console for SosConsole {
    async fn attach(&self, target: &ConsoleTarget) -> Result<(), CoreError> {
        let known_hosts = self.known_hosts.clone().ok_or_else(|| CoreError::Config {
            message: "cannot determine home directory for known_hosts".into(),
        })?;
        let target = target.clone();
        tokio::task::spawn_blocking(move || open_session(&known_hosts, &target))
            .await
            .map_err(|e| CoreError::Internal(format!("console task failed: {e}")))?
    }
}

fn open_session(known_hosts: &Path, target: &ConsoleTarget) -> Result<(), CoreError> {
    info!("console: {}", target.ssh_command());

    // connecting
    let expected = expected_host_key(known_hosts, &target.host)?;
    let tcp = TcpStream::connect((target.host.as_str(), target.port))
        .map_err(|e| CoreError::ssh("dial", e))?;
    let mut session = Session::new().map_err(|e| CoreError::ssh("session setup", e))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| CoreError::ssh("handshake", e))?;

    verify_host_key(
        &target.host,
        session.host_key().map(|(key, _)| key),
        &expected,
    )?;

    // authenticated
    authenticate_with_agent(&session, &target.user)?;

    // session-open
    let mut channel = session
        .channel_session()
        .map_err(|e| CoreError::ssh("session", e))?;

    // interactive
    let (cols, rows) = terminal_size();
    let mut modes = PtyModes::new();
    modes.set_boolean(PtyModeOpcode::ECHO, false);
    modes.set_boolean(PtyModeOpcode::IGNCR, true);
    channel
        .request_pty(
            PTY_TERM,
            Some(modes),
            Some((u32::from(cols), u32::from(rows), 0, 0)),
        )
        .map_err(|e| CoreError::ssh("request for PTY", e))?;

    let _raw = RawModeGuard::enable()?;
    channel
        .shell()
        .map_err(|e| CoreError::ssh("start shell", e))?;
    relay(&session, &mut channel)?;

    // closed
    session.set_blocking(true);
    if let Err(e) = channel.wait_close() {
        debug!(error = %e, "console channel did not close cleanly");
    }
    debug!(exit_status = ?channel.exit_status().ok(), "console closed");
    Ok(())
}

/// Compare the key blob the server presented with the known_hosts entry.
fn verify_host_key(host: &str, presented: Option<&[u8]>, expected: &[u8]) -> Result<(), CoreError> {
    let presented =
        presented.ok_or_else(|| CoreError::ssh("handshake", "server presented no host key"))?;
    if presented == expected {
        Ok(())
    } else {
        Err(CoreError::HostKeyMismatch {
            host: host.to_owned(),
        })
    }
}

/// Try every identity the agent at `SSH_AUTH_SOCK` offers.
fn authenticate_with_agent(session: &Session, user: &str) -> Result<(), CoreError> {
    let agent_err = |e: ssh2::Error| CoreError::Agent {
        message: e.to_string(),
    };

    let mut agent = session.agent().map_err(agent_err)?;
    agent.connect().map_err(|e| CoreError::Agent {
        message: format!("Failed to dial ssh-agent: {e}"),
    })?;
    agent.list_identities().map_err(agent_err)?;

    let identities = agent.identities().map_err(agent_err)?;
    let offered = offer_identities(user, &identities, |identity| {
        debug!(identity = identity.comment(), "offering agent identity");
        agent.userauth(user, identity)
    });
    let _ = agent.disconnect();
    offered
}

/// Offer identities in order until the server accepts one.
fn offer_identities<I>(
    user: &str,
    identities: &[I],
    mut userauth: impl FnMut(&I) -> Result<(), ssh2::Error>,
) -> Result<(), CoreError> {
    for identity in identities {
        match userauth(identity) {
            Ok(()) => return Ok(()),
            Err(e) => debug!(error = %e, "agent identity rejected"),
        }
    }
    Err(CoreError::ssh(
        "authentication",
        format!("no agent identity accepted for user {user}"),
    ))
}

// ── Relay ────────────────────────────────────────────────────────────

/// Pump stdin into the channel and the channel's stdout/stderr out,
/// until the remote side sends EOF.
fn relay(session: &Session, channel: &mut Channel) -> Result<(), CoreError> {
    let stdin = spawn_stdin_reader();
    session.set_blocking(false);

    // Unlocked handles: the file server may log to stderr meanwhile.
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let mut buf = [0u8; 8192];
    let mut stdin_open = true;

    loop {
        let mut busy = copy_available(channel, &mut buf, &mut stdout)?;
        busy |= copy_available(&mut channel.stderr(), &mut buf, &mut stderr)?;

        while stdin_open {
            match stdin.try_recv() {
                Ok(bytes) => {
                    write_nonblocking(channel, &bytes)?;
                    busy = true;
                }
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    stdin_open = false;
                    let _ = channel.send_eof();
                }
            }
        }

        if channel.eof() {
            return Ok(());
        }
        if !busy {
            thread::sleep(RELAY_IDLE);
        }
    }
}

fn copy_available(
    from: &mut impl Read,
    buf: &mut [u8],
    to: &mut impl Write,
) -> Result<bool, CoreError> {
    match from.read(buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            let chunk = buf.get(..n).unwrap_or_default();
            to.write_all(chunk).map_err(CoreError::Terminal)?;
            to.flush().map_err(CoreError::Terminal)?;
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(CoreError::ssh("read", e)),
    }
}

fn write_nonblocking(channel: &mut Channel, mut bytes: &[u8]) -> Result<(), CoreError> {
    while !bytes.is_empty() {
        match channel.write(bytes) {
            Ok(n) => bytes = bytes.get(n..).unwrap_or_default(),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(RELAY_IDLE),
            Err(e) => return Err(CoreError::ssh("write", e)),
        }
    }
    Ok(())
}

/// Blocking stdin reads happen on their own thread; the channel closes
/// when stdin hits EOF or errors.
fn spawn_stdin_reader() -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("console-stdin".into())
        .spawn(move || {
            let mut stdin = io::stdin();
            let mut buf = [0u8; 1024];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) | Err(_) => return,
                    Ok(n) => {
                        if tx.send(buf.get(..n).unwrap_or_default().to_vec()).is_err() {
                            return;
                        }
                    }
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "cannot read stdin, console is output only");
    }
    rx
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::collections::HashMap;

    use pxerun_api::types::Facility;

    use super::*;

    const ED25519: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl";

    #[test]
    fn target_for_device() {
        let device = Device {
            id: "dev-1".into(),
            hostname: String::new(),
            state: String::new(),
            facility: Facility {
                id: String::new(),
                code: "ewr1".into(),
                name: String::new(),
            },
            always_pxe: true,
            extra: HashMap::new(),
        };

        let target = ConsoleTarget::for_device(&device);
        assert_eq!(target.host, "sos.ewr1.packet.net");
        assert_eq!(target.port, 22);
        assert_eq!(target.ssh_command(), "ssh dev-1@sos.ewr1.packet.net");
    }

    #[test]
    fn finds_key_by_substring() {
        let contents = format!(
            "github.com ssh-ed25519 {ED25519}\n\
             sos.ams1.packet.net,147.75.0.1 ssh-ed25519 {ED25519}\n"
        );
        let key = lookup_host_key(&contents, "sos.ams1.packet.net").unwrap();
        assert_eq!(key.algorithm(), ssh_key::Algorithm::Ed25519);
    }

    #[test]
    fn skips_lines_without_three_fields() {
        let contents = format!(
            "sos.ams1.packet.net ssh-ed25519 {ED25519} a-comment\n\
             sos.ams1.packet.net\n"
        );
        assert!(matches!(
            lookup_host_key(&contents, "sos.ams1.packet.net"),
            Err(CoreError::HostKeyNotFound { .. })
        ));
    }

    #[test]
    fn missing_host_is_not_found() {
        let contents = format!("sos.ewr1.packet.net ssh-ed25519 {ED25519}\n");
        match lookup_host_key(&contents, "sos.ams1.packet.net") {
            Err(CoreError::HostKeyNotFound { host }) => assert_eq!(host, "sos.ams1.packet.net"),
            other => panic!("expected HostKeyNotFound, got: {other:?}"),
        }
    }

    #[test]
    fn first_match_wins_even_if_malformed() {
        let contents = format!(
            "sos.ams1.packet.net ssh-ed25519 not-base64!\n\
             sos.ams1.packet.net ssh-ed25519 {ED25519}\n"
        );
        assert!(matches!(
            lookup_host_key(&contents, "sos.ams1.packet.net"),
            Err(CoreError::HostKeyInvalid { .. })
        ));
    }

    #[test]
    fn unreadable_known_hosts_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("known_hosts");
        assert!(matches!(
            expected_host_key(&missing, "sos.ams1.packet.net"),
            Err(CoreError::KnownHosts { .. })
        ));
    }

    #[test]
    fn expected_key_is_wire_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        std::fs::write(&path, format!("sos.ams1.packet.net ssh-ed25519 {ED25519}\n")).unwrap();

        let blob = expected_host_key(&path, "sos.ams1.packet.net").unwrap();
        // string "ssh-ed25519" (4 + 11 bytes) followed by the 32-byte key (4 + 32).
        assert_eq!(blob.len(), 51);
        assert_eq!(blob.get(4..15).unwrap(), b"ssh-ed25519");
    }

    fn sos_key_blob() -> Vec<u8> {
        let contents = format!("sos.ams1.packet.net ssh-ed25519 {ED25519}\n");
        lookup_host_key(&contents, "sos.ams1.packet.net")
            .unwrap()
            .to_bytes()
            .unwrap()
    }

    #[test]
    fn presented_key_matching_known_hosts_is_accepted() {
        let expected = sos_key_blob();
        verify_host_key("sos.ams1.packet.net", Some(expected.as_slice()), &expected).unwrap();
    }

    #[test]
    fn presented_key_differing_from_known_hosts_is_rejected() {
        let expected = sos_key_blob();
        let mut presented = expected.clone();
        if let Some(last) = presented.last_mut() {
            *last ^= 0xff;
        }
        match verify_host_key("sos.ams1.packet.net", Some(presented.as_slice()), &expected) {
            Err(CoreError::HostKeyMismatch { host }) => assert_eq!(host, "sos.ams1.packet.net"),
            other => panic!("expected HostKeyMismatch, got: {other:?}"),
        }
    }

    #[test]
    fn missing_presented_key_fails_handshake() {
        let expected = sos_key_blob();
        assert!(matches!(
            verify_host_key("sos.ams1.packet.net", None, &expected),
            Err(CoreError::Ssh { step: "handshake", .. })
        ));
    }

    fn denied() -> ssh2::Error {
        ssh2::Error::new(ssh2::ErrorCode::Session(-18), "Username/PublicKey combination invalid")
    }

    #[test]
    fn first_accepted_identity_stops_the_search() {
        let mut tried = Vec::new();
        let result = offer_identities("dev-1", &["laptop", "yubikey", "spare"], |id| {
            tried.push(*id);
            if *id == "yubikey" {
                Ok(())
            } else {
                Err(denied())
            }
        });
        result.unwrap();
        assert_eq!(tried, ["laptop", "yubikey"]);
    }

    #[test]
    fn no_accepted_identity_fails_authentication() {
        let err = offer_identities("dev-1", &["laptop", "spare"], |_| Err(denied())).unwrap_err();
        match err {
            CoreError::Ssh { step, reason } => {
                assert_eq!(step, "authentication");
                assert!(reason.contains("dev-1"));
            }
            other => panic!("expected Ssh error, got: {other:?}"),
        }
    }

    #[test]
    fn empty_agent_fails_authentication() {
        let none: [&str; 0] = [];
        assert!(matches!(
            offer_identities("dev-1", &none, |_| Ok(())),
            Err(CoreError::Ssh { step: "authentication", .. })
        ));
    }

    #[tokio::test]
    async fn attach_without_home_fails_before_dialing() {
        let console = SosConsole { known_hosts: None };
        let target = ConsoleTarget {
            user: "dev-1".into(),
            host: "sos.ams1.packet.net".into(),
            port: SOS_PORT,
        };
        assert!(matches!(
            console.attach(&target).await,
            Err(CoreError::Config { .. })
        ));
    }

    #[test]
    fn copy_available_forwards_bytes() {
        let mut input: &[u8] = b"hello";
        let mut out = Vec::new();
        let mut buf = [0u8; 16];
        assert!(copy_available(&mut input, &mut buf, &mut out).unwrap());
        assert_eq!(out, b"hello");
        assert!(!copy_available(&mut input, &mut buf, &mut out).unwrap());
    }
}
