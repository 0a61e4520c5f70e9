//! iPXE boot script rendering and the asset names it refers to.

use std::fmt;
use std::path::Path;

use tracing::debug;

use crate::error::CoreError;

pub const KERNEL_SUFFIX: &str = "-kernel";
pub const INITRD_SUFFIX: &str = "-initrd.img";
pub const CMDLINE_SUFFIX: &str = "-cmdline";

/// Parameters every network-booted kernel needs; the artifact's own
/// command line is appended after them.
pub const BASE_KERNEL_PARAMS: &str = "ip=dhcp nomodeset ro serial console=ttyS1,115200";

/// Read `<prefix>-cmdline` from `dir` verbatim.
pub fn read_cmdline(dir: &Path, prefix: &str) -> Result<String, CoreError> {
    let path = dir.join(format!("{prefix}{CMDLINE_SUFFIX}"));
    std::fs::read_to_string(&path).map_err(|source| CoreError::Cmdline {
        path: path.display().to_string(),
        source,
    })
}

/// Base URL without trailing slashes; asset paths are appended with one.
pub fn trim_base_url(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}

// ── Asset URLs ───────────────────────────────────────────────────────

/// Remote locations of the two boot assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetUrls {
    pub kernel: String,
    pub initrd: String,
}

impl AssetUrls {
    pub fn new(base_url: &str, name: &str) -> Self {
        let base = trim_base_url(base_url);
        Self {
            kernel: format!("{base}/{name}{KERNEL_SUFFIX}"),
            initrd: format!("{base}/{name}{INITRD_SUFFIX}"),
        }
    }

    /// Kernel first, then initrd.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        [self.kernel.as_str(), self.initrd.as_str()].into_iter()
    }
}

// ── BootScript ───────────────────────────────────────────────────────

/// Rendered iPXE script, handed to the provider as user data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootScript(String);

impl BootScript {
    /// Render the script that DHCPs, then chain-loads `<name>-kernel` and
    /// `<name>-initrd.img` from `base_url`.
    ///
    /// Trailing line breaks of `cmdline` are dropped so the `set` line
    /// stays a single line.
    pub fn render(base_url: &str, cmdline: &str, name: &str) -> Self {
        let base_url = trim_base_url(base_url);
        let cmdline = cmdline.trim_end_matches(['\r', '\n']);

        let mut script = String::from("#!ipxe\n\n");
        script.push_str("dhcp\n");
        script.push_str(&format!("set base-url {base_url}\n"));
        script.push_str(&format!("set kernel-params {BASE_KERNEL_PARAMS} {cmdline}\n"));
        script.push_str(&format!(
            "kernel ${{base-url}}/{name}{KERNEL_SUFFIX} ${{kernel-params}}\n"
        ));
        script.push_str(&format!("initrd ${{base-url}}/{name}{INITRD_SUFFIX}\n"));
        script.push_str("boot");

        debug!("Using userData of:\n{script}");
        Self(script)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BootScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
