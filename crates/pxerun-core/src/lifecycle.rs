// ── Instance lifecycle ──
//
// Narrow seam over the provider: create one device, delete it later.
// `PacketClient` is the production implementation; tests plug in fakes.

use std::future::Future;

use pxerun_api::PacketClient;
use pxerun_api::types::{BILLING_HOURLY, Device, DeviceCreateRequest, OS_CUSTOM_IPXE};

use crate::boot::BootScript;
use crate::config::Settings;
use crate::error::CoreError;

/// Creates and deletes provider instances.
pub trait Provisioner {
    /// Create a single device. Called at most once per run, never retried.
    fn create_instance(
        &self,
        req: &DeviceCreateRequest,
    ) -> impl Future<Output = Result<Device, CoreError>> + Send;

    /// Delete a device by identifier.
    fn delete_instance(&self, device_id: &str)
    -> impl Future<Output = Result<(), CoreError>> + Send;
}

impl Provisioner for PacketClient {
    async fn create_instance(&self, req: &DeviceCreateRequest) -> Result<Device, CoreError> {
        Ok(self.create_device(req).await?)
    }

    async fn delete_instance(&self, device_id: &str) -> Result<(), CoreError> {
        Ok(self.delete_device(device_id).await?)
    }
}

/// Build the create request for `settings`, carrying `boot` as user data.
pub fn device_request(settings: &Settings, boot: &BootScript) -> DeviceCreateRequest {
    DeviceCreateRequest {
        hostname: settings.hostname.clone(),
        plan: settings.machine.clone(),
        facility: settings.zone.clone(),
        operating_system: OS_CUSTOM_IPXE.into(),
        billing_cycle: BILLING_HOURLY.into(),
        project_id: settings.project_id.clone(),
        userdata: boot.as_str().to_owned(),
        tags: Vec::new(),
        always_pxe: settings.always_pxe,
    }
}
