//! API data transfer objects.
//!
//! These types define the API contract shared between the server and
//! clients. Read-side bodies reuse the library's own types
//! (`DeviceSnapshot`, `TargetReadout`, `DeviceStatus`); only the
//! request bodies live here.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::power::{NightMode, PowerProfile, SolarMode};

/// Partial update to a device's control inputs. Absent fields are
/// left unchanged; fields are applied in struct order.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct DevicePatchRequest {
    /// Automation master switch. Enabling also clears an emergency
    /// stop.
    pub automation_enabled: Option<bool>,
    /// Watt source selection; setting it clears any night mode.
    pub mode: Option<SolarMode>,
    /// Night-mode override.
    pub night_mode: Option<NightMode>,
    /// Available solar watts for manual mode (0 to 50000).
    pub solar_watts: Option<f64>,
    /// Apply a profile immediately.
    pub profile: Option<PowerProfile>,
}

/// Desired state for one hashboard.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, ToSchema)]
pub struct BoardPutRequest {
    pub enabled: bool,
}
