//! Target-vs-observed diff.
//!
//! Produces the minimal command plan that moves the device to the
//! target. Anything the snapshot already shows as satisfied is
//! skipped, so re-planning against a converged device yields an empty
//! plan and an unchanged target sends nothing.

use crate::power::{OperatingTarget, PowerProfile};
use crate::snapshot::DeviceSnapshot;

/// One device command the engine intends to send, in plan order.
#[derive(Clone, Debug, PartialEq)]
pub enum PlannedAction {
    DisableBoard(usize),
    SetProfile(PowerProfile),
    /// Cap overall draw via the firmware web endpoint.
    SetPowerLimit { watts: u32 },
    EnableBoard(usize),
    /// Hand the firmware's thermal manager a target temperature.
    SetAtm { target_celsius: f64 },
}

/// Diff `target` against the observed `snapshot`.
///
/// `observed_profile` is the best current knowledge of the active
/// profile (reported by the device, falling back to the last profile
/// this engine applied); `None` means unknown, which plans a set to
/// converge. The device never reports its watt cap, so
/// `applied_power_limit` is the last cap this engine delivered and the
/// diff is against that memory. `ensure_atm` is passed by the caller
/// only while the thermal interlock is active and not yet applied.
///
/// Plan order sheds load before adding it: board disables, then the
/// profile change and watt cap, then board enables, then the thermal
/// target.
pub fn plan(
    target: &OperatingTarget,
    snapshot: &DeviceSnapshot,
    observed_profile: Option<PowerProfile>,
    applied_power_limit: Option<u32>,
    ensure_atm: Option<f64>,
) -> Vec<PlannedAction> {
    let mut actions = Vec::new();

    // Boards the snapshot does not report are never commanded; acting
    // on unknown state is how reconcilers flap.
    for (index, &desired) in target.boards_enabled.iter().enumerate() {
        if let Some(board) = snapshot.board(index) {
            if !desired && board.enabled {
                actions.push(PlannedAction::DisableBoard(index));
            }
        }
    }

    // A standby device has every board off; its profile is moot.
    if !target.standby && observed_profile != Some(target.profile) {
        actions.push(PlannedAction::SetProfile(target.profile));
    }

    if !target.standby {
        if let Some(watts) = target.power_limit_watts {
            if applied_power_limit != Some(watts) {
                actions.push(PlannedAction::SetPowerLimit { watts });
            }
        }
    }

    for (index, &desired) in target.boards_enabled.iter().enumerate() {
        if let Some(board) = snapshot.board(index) {
            if desired && !board.enabled {
                actions.push(PlannedAction::EnableBoard(index));
            }
        }
    }

    if let Some(target_celsius) = ensure_atm {
        actions.push(PlannedAction::SetAtm { target_celsius });
    }

    actions
}
