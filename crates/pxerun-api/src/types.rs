//! Wire types for the Packet device endpoints.
//!
//! Field names are snake_case on the wire, matching the Rust names.
//! Responses carry many more fields than modelled here; the interesting
//! subset is typed and the rest is kept in `extra`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operating-system slug that boots the machine from iPXE user data.
pub const OS_CUSTOM_IPXE: &str = "custom_ipxe";

/// Billing cycle used for short-lived machines.
pub const BILLING_HOURLY: &str = "hourly";

// ── Requests ─────────────────────────────────────────────────────────

/// Body of `POST /projects/{id}/devices`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCreateRequest {
    pub hostname: String,
    pub plan: String,
    pub facility: String,
    pub operating_system: String,
    pub billing_cycle: String,
    pub project_id: String,
    /// Opaque payload handed to the boot firmware (here: an iPXE script).
    pub userdata: String,
    pub tags: Vec<String>,
    /// Boot from the network on every power cycle, not just the first.
    pub always_pxe: bool,
}

// ── Responses ────────────────────────────────────────────────────────

/// Facility reference embedded in a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    #[serde(default)]
    pub id: String,
    /// Short facility code, e.g. `ams1`.
    pub code: String,
    #[serde(default)]
    pub name: String,
}

/// A provisioned device, as returned by `POST /projects/{id}/devices`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub hostname: String,
    /// Provisioning state, e.g. `queued`, `provisioning`, `active`.
    #[serde(default)]
    pub state: String,
    pub facility: Facility,
    #[serde(default)]
    pub always_pxe: bool,
    /// Catch-all for additional fields not modeled above.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Error envelope: `{"errors": ["..."]}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(default)]
    pub errors: Vec<String>,
}
