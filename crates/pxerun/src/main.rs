mod cli;
mod error;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use pxerun_api::{PacketClient, TransportConfig};
use pxerun_config::{Defaults, Layer, Overrides, Settings};
use pxerun_core::{BootScript, Runner, SosConsole, read_cmdline};

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(error::exit_code::FAILURE);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let settings = pxerun_config::resolve(&overrides(cli), &Defaults::detect())?;

    let work_dir = std::env::current_dir().map_err(|e| pxerun_core::CoreError::Cmdline {
        path: ".".into(),
        source: e,
    })?;
    let cmdline = read_cmdline(&work_dir, &settings.prefix)?;
    let boot = BootScript::render(&settings.base_url, &cmdline, &settings.name);

    let runner = build_runner(settings, work_dir)?;
    runner.run(&boot, interrupted()).await?;
    Ok(())
}

fn build_runner(
    settings: Settings,
    work_dir: std::path::PathBuf,
) -> Result<Runner<PacketClient, SosConsole>, CliError> {
    let transport = TransportConfig::with_timeout(settings.timeout);
    let provider =
        PacketClient::from_api_key(settings.api_url.as_str(), &settings.api_key, &transport)
            .map_err(pxerun_core::CoreError::from)?;
    let http = transport
        .build_client()
        .map_err(pxerun_core::CoreError::from)?;
    let console = SosConsole::from_home();

    Ok(Runner::new(settings, provider, console, http, work_dir))
}

fn overrides(cli: Cli) -> Overrides {
    Overrides {
        layer: Layer {
            base_url: cli.base_url,
            zone: cli.zone,
            machine: cli.machine,
            api_key: cli.api_key,
            project_id: cli.project_id,
            hostname: cli.hostname,
            name: cli.img_name,
            api_url: cli.api_url,
        },
        prefix: cli.name,
        always_pxe: cli.always_pxe,
        keep: cli.keep,
        console: cli.console,
        serve: cli.serve,
        timeout_secs: cli.timeout,
        config_file: cli.config,
    }
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c, stopping now");
    }
}
