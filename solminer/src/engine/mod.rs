//! Per-device reconciliation engine: the single writer that turns a
//! power target into device commands.

mod commands;
mod controller;
mod hysteresis;
mod reconcile;

pub use commands::EngineCommand;
pub use controller::{DeviceController, DeviceHandle, DeviceIo, DeviceStatus};
pub use hysteresis::StandbyDebounce;
pub use reconcile::{PlannedAction, plan};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::power::{NightMode, OperatingTarget, SolarMode};
use crate::safety::OverrideReason;

/// The latest operating target plus the inputs that produced it,
/// published for the read API after every automation cycle.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TargetReadout {
    pub target: OperatingTarget,
    pub mode: SolarMode,
    pub night_mode: Option<NightMode>,
    /// Stored manual solar watts (input to manual mode).
    pub solar_watts: f64,
    /// Watts before performance scaling (manual value or curve output).
    pub input_watts: f64,
    /// Watts the breakpoint mapping actually saw.
    pub effective_watts: f64,
    pub safety_override: Option<OverrideReason>,
    pub automation_enabled: bool,
    pub emergency_stopped: bool,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String)]
    pub computed_at: OffsetDateTime,
}
