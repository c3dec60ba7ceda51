//! Command types sent from API handlers to a device's control loop.
//!
//! Each command carries a oneshot reply channel so the handler can
//! await the result and translate it into an HTTP response.

use tokio::sync::oneshot;

use crate::Result;
use crate::power::{NightMode, PowerProfile, SolarMode};

/// Commands from the API to a device controller.
pub enum EngineCommand {
    /// Store the available solar watts used in manual mode.
    SetSolarPower { watts: f64, reply: oneshot::Sender<Result<()>> },

    /// Switch between manual and sun-curve watt sources. Clears any
    /// night-mode override.
    SetMode { mode: SolarMode, reply: oneshot::Sender<Result<()>> },

    /// Enable or disable one hashboard right away.
    SetBoardEnabled {
        index: usize,
        enabled: bool,
        reply: oneshot::Sender<Result<()>>,
    },

    /// Apply a power profile right away. Automation may supersede it
    /// on its next cycle.
    SetProfile {
        profile: PowerProfile,
        reply: oneshot::Sender<Result<()>>,
    },

    /// Set or clear the night-mode override.
    SetNightMode {
        mode: Option<NightMode>,
        reply: oneshot::Sender<Result<()>>,
    },

    /// Toggle the automation master switch.
    SetAutomationEnabled { enabled: bool, reply: oneshot::Sender<Result<()>> },

    /// Cut power now: all boards off, automation disabled, hysteresis
    /// bypassed.
    EmergencyStop { reply: oneshot::Sender<Result<()>> },

    /// Reboot the device firmware.
    Reboot { reply: oneshot::Sender<Result<()>> },
}
