// ── Run orchestration ──
//
// One linear pass: optional file server, asset checks, create device,
// console (or wait), then cleanup. Cleanup (server shutdown, device
// delete) runs on every path once its resource exists; the first error
// wins.

use std::future::Future;
use std::path::PathBuf;

use pxerun_api::types::Device;
use tracing::{debug, info, warn};

use crate::assets;
use crate::boot::{AssetUrls, BootScript};
use crate::config::Settings;
use crate::console::{Console, ConsoleTarget};
use crate::error::CoreError;
use crate::lifecycle::{self, Provisioner};
use crate::serve::{FileServer, SHUTDOWN_GRACE, ServeFiles};

/// Drives a single provision → boot → teardown cycle.
pub struct Runner<P, C> {
    settings: Settings,
    provisioner: P,
    console: C,
    http: reqwest::Client,
    work_dir: PathBuf,
}

impl<P: Provisioner, C: Console> Runner<P, C> {
    /// `http` is used for the asset HEAD checks; `work_dir` is where the
    /// served files live.
    pub fn new(
        settings: Settings,
        provisioner: P,
        console: C,
        http: reqwest::Client,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            settings,
            provisioner,
            console,
            http,
            work_dir,
        }
    }

    /// Run the whole cycle.
    ///
    /// `interrupt` resolves when the operator asks to stop; it is only
    /// awaited when files are served and no console is attached.
    pub async fn run<F>(&self, boot: &BootScript, interrupt: F) -> Result<(), CoreError>
    where
        F: Future<Output = ()>,
    {
        let server = self.start_server().await?;

        let provisioned = self.provision(boot).await;
        let attached = match &provisioned {
            Ok(device) => self.attach(device, interrupt, server.is_some()).await,
            Err(_) => Ok(()),
        };

        if let Some(server) = server {
            server.shutdown(SHUTDOWN_GRACE).await;
        }

        let device = provisioned?;
        let released = self.release(&device).await;
        attached.and(released)
    }

    async fn start_server(&self) -> Result<Option<FileServer>, CoreError> {
        let Some(addr) = self.settings.serve else {
            return Ok(None);
        };
        let files = ServeFiles::new(&self.work_dir, &self.settings.name);
        FileServer::start(addr, files).await.map(Some)
    }

    async fn provision(&self, boot: &BootScript) -> Result<Device, CoreError> {
        let urls = AssetUrls::new(&self.settings.base_url, &self.settings.name);
        assets::validate(&self.http, &urls).await?;

        let req = lifecycle::device_request(&self.settings, boot);
        let device = self.provisioner.create_instance(&req).await?;
        info!(device_id = %device.id, facility = %device.facility.code, "Device created");

        match serde_json::to_string_pretty(&device) {
            Ok(json) => debug!("{json}"),
            Err(e) => debug!(error = %e, "cannot render device JSON"),
        }
        Ok(device)
    }

    async fn attach<F>(&self, device: &Device, interrupt: F, serving: bool) -> Result<(), CoreError>
    where
        F: Future<Output = ()>,
    {
        let target = ConsoleTarget::for_device(device);

        if self.settings.console {
            return self.console.attach(&target).await;
        }

        info!("Machine booting");
        info!("Access the console with: {}", target.ssh_command());

        // Files are only served while we wait here.
        if serving {
            info!("Hit ctrl-c to stop http server");
            interrupt.await;
        }
        Ok(())
    }

    async fn release(&self, device: &Device) -> Result<(), CoreError> {
        if self.settings.keep {
            info!(device_id = %device.id, "Keeping device");
            return Ok(());
        }

        match self.provisioner.delete_instance(&device.id).await {
            Ok(()) => {
                info!(device_id = %device.id, "Device deleted");
                Ok(())
            }
            Err(e) => {
                warn!(device_id = %device.id, "Device must be deleted manually");
                Err(CoreError::DeleteFailed {
                    device_id: device.id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}
