//! Clap derive structures for the `pxerun` CLI.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// pxerun -- boot a bare-metal machine from your own kernel and initrd
#[derive(Debug, Parser)]
#[command(
    name = "pxerun",
    version,
    about = "Boot an image on a Packet bare-metal machine via iPXE",
    long_about = "Provision a Packet (Equinix Metal) machine, boot it from\n\
        <base-url>/<name>-kernel and <base-url>/<name>-initrd.img with the\n\
        kernel command line from ./<prefix>-cmdline, optionally serve those\n\
        files locally and attach the serial console, then delete the machine.\n\n\
        String settings fall back to PACKET_* environment variables and the\n\
        config file when the flag is not given."
)]
pub struct Cli {
    /// Base URL the kernel and initrd are fetched from [env: PACKET_BASE_URL]
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Packet facility to boot in [env: PACKET_ZONE] [default: ams1]
    #[arg(long)]
    pub zone: Option<String>,

    /// Packet plan (machine type) [env: PACKET_MACHINE] [default: baremetal_0]
    #[arg(long)]
    pub machine: Option<String>,

    /// Packet API key [env: PACKET_API_KEY]
    #[arg(long)]
    pub api_key: Option<String>,

    /// Packet project ID [env: PACKET_PROJECT_ID]
    #[arg(long)]
    pub project_id: Option<String>,

    /// Hostname of the new machine [env: PACKET_HOSTNAME] [default: <user>-pxerun]
    #[arg(long)]
    pub hostname: Option<String>,

    /// Name the kernel and initrd are published under [env: PACKET_NAME] [default: NAME]
    #[arg(long)]
    pub img_name: Option<String>,

    /// Boot from iPXE on every reboot
    #[arg(long, action = ArgAction::Set, default_value_t = true, value_name = "BOOL")]
    pub always_pxe: bool,

    /// Serve the kernel and initrd on this address, e.g. :8080
    #[arg(long, value_name = "ADDR")]
    pub serve: Option<String>,

    /// Attach the serial console over SSH
    #[arg(long, action = ArgAction::Set, default_value_t = true, value_name = "BOOL")]
    pub console: bool,

    /// Keep the machine after exiting
    #[arg(long)]
    pub keep: bool,

    /// Packet API endpoint [env: PACKET_API_URL] [default: https://api.packet.net/]
    #[arg(long, value_name = "URL")]
    pub api_url: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30, value_name = "SECS")]
    pub timeout: u64,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short = 'v', action = ArgAction::Count)]
    pub verbose: u8,

    /// Prefix of the local artifacts (reads ./<NAME>-cmdline)
    #[arg(default_value = "packet")]
    pub name: String,
}
