//! Configuration resolution for pxerun.
//!
//! Each string setting is taken from the first source that provides it:
//! an explicit command-line flag (one that differs from the built-in
//! default), a `PACKET_*` environment variable, the TOML config file, and
//! finally the built-in default. The result is a `pxerun_core::Settings`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub use pxerun_core::Settings;

pub const DEFAULT_ZONE: &str = "ams1";
pub const DEFAULT_MACHINE: &str = "baremetal_0";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub use pxerun_api::DEFAULT_API_URL;
pub use pxerun_core::DEFAULT_PREFIX;

const ENV_PREFIX: &str = "PACKET_";
const ENV_KEYS: [&str; 8] = [
    "base_url",
    "zone",
    "machine",
    "api_key",
    "project_id",
    "hostname",
    "name",
    "api_url",
];

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {setting}")]
    Missing {
        setting: &'static str,
        flag: &'static str,
        env: &'static str,
    },

    #[error("combination of keep={keep} and console={console} makes little sense")]
    Contradictory { keep: bool, console: bool },

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── Defaults ────────────────────────────────────────────────────────

/// Defaults that depend on the local environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaults {
    pub hostname: String,
}

impl Defaults {
    /// Look up the current user once and derive the defaults from it.
    pub fn detect() -> Self {
        let user = ["USER", "LOGNAME", "USERNAME"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()));
        Self::for_user(user.as_deref())
    }

    pub fn for_user(user: Option<&str>) -> Self {
        let hostname = match user {
            Some(user) => format!("{user}-pxerun"),
            None => "pxerun".into(),
        };
        Self { hostname }
    }
}

// ── Layers ──────────────────────────────────────────────────────────

/// The string settings, as any one source provides them.
///
/// The same shape is read from the config file and the environment, and
/// written by the defaults and flag layers.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl Layer {
    fn defaults(defaults: &Defaults, prefix: &str) -> Self {
        Self {
            zone: Some(DEFAULT_ZONE.into()),
            machine: Some(DEFAULT_MACHINE.into()),
            hostname: Some(defaults.hostname.clone()),
            name: Some(prefix.into()),
            api_url: Some(DEFAULT_API_URL.into()),
            ..Self::default()
        }
    }

    /// Drop every value equal to the corresponding default, so a flag
    /// repeating its default does not shadow the environment.
    fn without_defaults(mut self, defaults: &Self) -> Self {
        fn strip(value: &mut Option<String>, default: Option<&String>) {
            if value.is_some() && value.as_ref() == default {
                *value = None;
            }
        }
        strip(&mut self.zone, defaults.zone.as_ref());
        strip(&mut self.machine, defaults.machine.as_ref());
        strip(&mut self.hostname, defaults.hostname.as_ref());
        strip(&mut self.name, defaults.name.as_ref());
        strip(&mut self.api_url, defaults.api_url.as_ref());
        self
    }
}

/// Values given on the command line.
#[derive(Debug, Clone)]
pub struct Overrides {
    /// String settings; `None` when the flag was not given.
    pub layer: Layer,
    /// Artifact prefix (positional).
    pub prefix: String,
    pub always_pxe: bool,
    pub keep: bool,
    pub console: bool,
    /// Raw `--serve` value, e.g. `:8080`.
    pub serve: Option<String>,
    pub timeout_secs: u64,
    /// Explicit config file; the platform default is used otherwise.
    pub config_file: Option<PathBuf>,
}

impl Default for Overrides {
    fn default() -> Self {
        Self {
            layer: Layer::default(),
            prefix: DEFAULT_PREFIX.into(),
            always_pxe: true,
            keep: false,
            console: true,
            serve: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            config_file: None,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("", "", "pxerun").map_or_else(
        || PathBuf::from(".pxerun.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Resolution ──────────────────────────────────────────────────────

/// Merge every source into one `Layer`, highest precedence last.
pub fn figment(overrides: &Overrides, defaults: &Defaults, file: &Path) -> Figment {
    let base = Layer::defaults(defaults, &overrides.prefix);
    let flags = overrides.layer.clone().without_defaults(&base);

    Figment::new()
        .merge(Serialized::defaults(base))
        .merge(Toml::file(file))
        .merge(Serialized::defaults(env_layer()))
        .merge(Serialized::defaults(flags))
}

/// `PACKET_*` variables as raw strings, so `12345` or `true` stay text.
fn env_layer() -> Layer {
    let mut layer = Layer::default();
    for (key, value) in Env::prefixed(ENV_PREFIX).only(&ENV_KEYS).iter() {
        // An empty variable counts as unset.
        if value.is_empty() {
            continue;
        }
        let slot = match key.as_str().to_ascii_lowercase().as_str() {
            "base_url" => &mut layer.base_url,
            "zone" => &mut layer.zone,
            "machine" => &mut layer.machine,
            "api_key" => &mut layer.api_key,
            "project_id" => &mut layer.project_id,
            "hostname" => &mut layer.hostname,
            "name" => &mut layer.name,
            "api_url" => &mut layer.api_url,
            _ => continue,
        };
        *slot = Some(value);
    }
    layer
}

/// Resolve and validate the settings for one run.
pub fn resolve(overrides: &Overrides, defaults: &Defaults) -> Result<Settings, ConfigError> {
    let file = overrides.config_file.clone().unwrap_or_else(config_path);
    let layer: Layer = figment(overrides, defaults, &file).extract()?;
    build_settings(layer, overrides, defaults)
}

fn build_settings(
    layer: Layer,
    overrides: &Overrides,
    defaults: &Defaults,
) -> Result<Settings, ConfigError> {
    let base_url = required(layer.base_url, "base URL", "--base-url", "PACKET_BASE_URL")?;
    let base_url = pxerun_core::boot::trim_base_url(&base_url).to_owned();
    let api_key = required(layer.api_key, "API key", "--api-key", "PACKET_API_KEY")?;
    let project_id = required(
        layer.project_id,
        "project ID",
        "--project-id",
        "PACKET_PROJECT_ID",
    )?;

    if !overrides.keep && !overrides.console {
        return Err(ConfigError::Contradictory {
            keep: overrides.keep,
            console: overrides.console,
        });
    }

    let api_url = or_default(layer.api_url, DEFAULT_API_URL);
    let api_url = Url::parse(&api_url).map_err(|e| ConfigError::Validation {
        field: "api_url".into(),
        reason: format!("{api_url}: {e}"),
    })?;

    let serve = overrides.serve.as_deref().map(parse_serve).transpose()?;

    Ok(Settings {
        base_url,
        zone: or_default(layer.zone, DEFAULT_ZONE),
        machine: or_default(layer.machine, DEFAULT_MACHINE),
        api_key: SecretString::from(api_key),
        project_id,
        hostname: or_default(layer.hostname, &defaults.hostname),
        name: or_default(layer.name, &overrides.prefix),
        prefix: overrides.prefix.clone(),
        always_pxe: overrides.always_pxe,
        keep: overrides.keep,
        console: overrides.console,
        serve,
        api_url,
        timeout: Duration::from_secs(overrides.timeout_secs),
    })
}

fn required(
    value: Option<String>,
    setting: &'static str,
    flag: &'static str,
    env: &'static str,
) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing { setting, flag, env })
}

// An empty value from any source counts as unset.
fn or_default(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_owned())
}

fn parse_serve(raw: &str) -> Result<SocketAddr, ConfigError> {
    pxerun_core::parse_listen_addr(raw).map_err(|e| ConfigError::Validation {
        field: "serve".into(),
        reason: format!("{raw}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use figment::Jail;
    use secrecy::ExposeSecret;

    use super::*;

    fn defaults() -> Defaults {
        Defaults::for_user(Some("alice"))
    }

    fn overrides() -> Overrides {
        Overrides {
            config_file: Some(PathBuf::from("pxerun.toml")),
            ..Overrides::default()
        }
    }

    fn set_mandatory_env(jail: &mut Jail) {
        jail.set_env("PACKET_BASE_URL", "https://images.example.com/boot");
        jail.set_env("PACKET_API_KEY", "key-from-env");
        jail.set_env("PACKET_PROJECT_ID", "proj-env");
    }

    fn resolve_in_jail(overrides: &Overrides) -> Result<Settings, ConfigError> {
        resolve(overrides, &defaults())
    }

    #[test]
    fn hostname_default_uses_username() {
        assert_eq!(Defaults::for_user(Some("bob")).hostname, "bob-pxerun");
        assert_eq!(Defaults::for_user(None).hostname, "pxerun");
    }

    #[test]
    fn builtin_defaults_apply() {
        Jail::expect_with(|jail| {
            set_mandatory_env(jail);
            let s = resolve_in_jail(&overrides()).unwrap();
            assert_eq!(s.zone, "ams1");
            assert_eq!(s.machine, "baremetal_0");
            assert_eq!(s.hostname, "alice-pxerun");
            assert_eq!(s.name, "packet");
            assert_eq!(s.prefix, "packet");
            assert_eq!(s.api_url.as_str(), "https://api.packet.net/");
            assert_eq!(s.timeout, Duration::from_secs(30));
            assert!(s.always_pxe);
            assert!(s.console);
            assert!(!s.keep);
            assert!(s.serve.is_none());
            assert_eq!(s.api_key.expose_secret(), "key-from-env");
            Ok(())
        });
    }

    #[test]
    fn flag_equal_to_default_yields_to_env() {
        Jail::expect_with(|jail| {
            set_mandatory_env(jail);
            jail.set_env("PACKET_ZONE", "ewr1");
            let mut o = overrides();
            o.layer.zone = Some(DEFAULT_ZONE.into());
            let s = resolve_in_jail(&o).unwrap();
            assert_eq!(s.zone, "ewr1");
            Ok(())
        });
    }

    #[test]
    fn explicit_flag_beats_env() {
        Jail::expect_with(|jail| {
            set_mandatory_env(jail);
            jail.set_env("PACKET_ZONE", "ewr1");
            jail.set_env("PACKET_API_KEY", "env-key");
            let mut o = overrides();
            o.layer.zone = Some("sjc1".into());
            o.layer.api_key = Some("flag-key".into());
            let s = resolve_in_jail(&o).unwrap();
            assert_eq!(s.zone, "sjc1");
            assert_eq!(s.api_key.expose_secret(), "flag-key");
            Ok(())
        });
    }

    #[test]
    fn env_beats_config_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "pxerun.toml",
                r#"
                    base_url = "https://file.example.com"
                    api_key = "file-key"
                    project_id = "proj-file"
                    machine = "c3.small.x86"
                    zone = "nrt1"
                "#,
            )?;
            jail.set_env("PACKET_ZONE", "ewr1");
            let s = resolve_in_jail(&overrides()).unwrap();
            assert_eq!(s.base_url, "https://file.example.com");
            assert_eq!(s.project_id, "proj-file");
            assert_eq!(s.machine, "c3.small.x86");
            assert_eq!(s.zone, "ewr1");
            Ok(())
        });
    }

    #[test]
    fn image_name_defaults_to_prefix() {
        Jail::expect_with(|jail| {
            set_mandatory_env(jail);
            let mut o = overrides();
            o.prefix = "linuxkit".into();
            assert_eq!(resolve_in_jail(&o).unwrap().name, "linuxkit");

            jail.set_env("PACKET_NAME", "published");
            assert_eq!(resolve_in_jail(&o).unwrap().name, "published");
            Ok(())
        });
    }

    #[test]
    fn missing_mandatory_setting_is_reported() {
        Jail::expect_with(|jail| {
            jail.set_env("PACKET_BASE_URL", "https://images.example.com");
            jail.set_env("PACKET_PROJECT_ID", "proj");
            let err = resolve_in_jail(&overrides()).unwrap_err();
            assert!(
                matches!(err, ConfigError::Missing { flag: "--api-key", .. }),
                "got {err:?}"
            );
            Ok(())
        });
    }

    #[test]
    fn empty_env_counts_as_missing() {
        Jail::expect_with(|jail| {
            set_mandatory_env(jail);
            jail.set_env("PACKET_BASE_URL", "");
            let err = resolve_in_jail(&overrides()).unwrap_err();
            assert!(
                matches!(err, ConfigError::Missing { flag: "--base-url", .. }),
                "got {err:?}"
            );
            Ok(())
        });
    }

    #[test]
    fn delete_without_console_is_rejected() {
        Jail::expect_with(|jail| {
            set_mandatory_env(jail);
            let mut o = overrides();
            o.console = false;
            let err = resolve_in_jail(&o).unwrap_err();
            assert!(
                matches!(
                    err,
                    ConfigError::Contradictory {
                        keep: false,
                        console: false
                    }
                ),
                "got {err:?}"
            );

            o.keep = true;
            assert!(resolve_in_jail(&o).is_ok());
            Ok(())
        });
    }

    #[test]
    fn serve_address_is_parsed() {
        Jail::expect_with(|jail| {
            set_mandatory_env(jail);
            let mut o = overrides();
            o.serve = Some(":8080".into());
            let s = resolve_in_jail(&o).unwrap();
            assert_eq!(s.serve, Some("0.0.0.0:8080".parse().unwrap()));

            o.serve = Some("nonsense".into());
            assert!(matches!(
                resolve_in_jail(&o),
                Err(ConfigError::Validation { .. })
            ));
            Ok(())
        });
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        Jail::expect_with(|jail| {
            set_mandatory_env(jail);
            jail.create_file("pxerun.toml", "zone = [unterminated")?;
            assert!(matches!(
                resolve_in_jail(&overrides()),
                Err(ConfigError::Figment(_))
            ));
            Ok(())
        });
    }

    #[test]
    fn env_values_stay_strings() {
        Jail::expect_with(|jail| {
            set_mandatory_env(jail);
            jail.set_env("PACKET_PROJECT_ID", "12345");
            jail.set_env("PACKET_HOSTNAME", "1234");
            jail.set_env("PACKET_MACHINE", "true");
            jail.set_env("PACKET_API_KEY", "1.5");
            let s = resolve_in_jail(&overrides()).unwrap();
            assert_eq!(s.project_id, "12345");
            assert_eq!(s.hostname, "1234");
            assert_eq!(s.machine, "true");
            assert_eq!(s.api_key.expose_secret(), "1.5");
            Ok(())
        });
    }

    #[test]
    fn empty_env_does_not_shadow_config_file() {
        Jail::expect_with(|jail| {
            set_mandatory_env(jail);
            jail.create_file("pxerun.toml", "zone = \"nrt1\"")?;
            jail.set_env("PACKET_ZONE", "");
            assert_eq!(resolve_in_jail(&overrides()).unwrap().zone, "nrt1");
            Ok(())
        });
    }

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        Jail::expect_with(|jail| {
            set_mandatory_env(jail);
            jail.set_env("PACKET_BASE_URL", "http://h/files/");
            assert_eq!(resolve_in_jail(&overrides()).unwrap().base_url, "http://h/files");
            Ok(())
        });
    }

    #[test]
    fn unrelated_packet_env_is_ignored() {
        Jail::expect_with(|jail| {
            set_mandatory_env(jail);
            jail.set_env("PACKET_SOMETHING_ELSE", "x");
            assert!(resolve_in_jail(&overrides()).is_ok());
            Ok(())
        });
    }
}
