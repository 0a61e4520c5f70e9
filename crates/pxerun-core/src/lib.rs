// pxerun-core: Boot script, asset checks, file server, console and the run itself.

pub mod assets;
pub mod boot;
pub mod config;
pub mod console;
pub mod error;
pub mod lifecycle;
pub mod runner;
pub mod serve;

// ── Primary re-exports ──────────────────────────────────────────────
pub use boot::{AssetUrls, BootScript, read_cmdline};
pub use config::{DEFAULT_PREFIX, Settings};
pub use console::{Console, ConsoleTarget, SosConsole};
pub use error::CoreError;
pub use lifecycle::Provisioner;
pub use runner::Runner;
pub use serve::{FileServer, ServeFiles, parse_listen_addr};
