//! Temperature interlock.
//!
//! Applied after the power target is computed and before it is
//! reconciled, so a safety clamp always wins over the solar target.
//! The interlock is pure: it looks at the hottest observed reading and
//! rewrites the target, leaving escalation across cycles to emerge
//! from the observed board state it is handed.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::AutomationConfig;
use crate::power::{OperatingTarget, PowerProfile};

/// Why the engine deviated from the computed power target.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum OverrideReason {
    /// Hottest reading at or above the protection threshold; profile
    /// clamped to ultra-eco.
    TempProtection { temperature_c: f64 },
    /// Hottest reading at or above the critical threshold; one board
    /// shed on top of the profile clamp.
    EmergencyCooling { temperature_c: f64 },
    /// Operator-initiated stop; everything off until re-enabled.
    EmergencyStop,
}

/// Clamp `target` against the latest observed temperature.
///
/// `observed_enabled` is the per-board enabled state from the last
/// snapshot. Critical cycles shed the hottest-loaded board still
/// running, so consecutive critical cycles walk down the boards one at
/// a time instead of cutting everything at once.
///
/// An absent temperature reading leaves the interlock idle: acting on
/// missing data would turn every stats hiccup into a power cut.
pub fn apply_interlock(
    mut target: OperatingTarget,
    max_temperature_c: Option<f64>,
    observed_enabled: Option<&[bool]>,
    config: &AutomationConfig,
) -> (OperatingTarget, Option<OverrideReason>) {
    let Some(temperature_c) = max_temperature_c else {
        return (target, None);
    };
    if target.standby || temperature_c < config.temp_protection_celsius {
        return (target, None);
    }

    target.profile = PowerProfile::UltraEco;

    if temperature_c < config.critical_temp_celsius {
        return (target, Some(OverrideReason::TempProtection { temperature_c }));
    }

    // A critical cycle never powers anything up: start from the
    // boards actually running, then shed the highest-index one. Each
    // critical cycle takes one more board.
    let running: Vec<bool> = observed_enabled
        .map(<[bool]>::to_vec)
        .unwrap_or_else(|| target.boards_enabled.clone());
    for (index, slot) in target.boards_enabled.iter_mut().enumerate() {
        *slot = *slot && running.get(index).copied().unwrap_or(*slot);
    }
    if let Some(index) = target.boards_enabled.iter().rposition(|&on| on) {
        target.boards_enabled[index] = false;
    }

    (target, Some(OverrideReason::EmergencyCooling { temperature_c }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_target() -> OperatingTarget {
        OperatingTarget {
            profile: PowerProfile::MaxPower,
            boards_enabled: vec![true, true, true],
            standby: false,
            power_limit_watts: Some(4200),
        }
    }

    #[test]
    fn cool_device_passes_through_untouched() {
        let target = running_target();
        let (clamped, reason) =
            apply_interlock(target.clone(), Some(68.0), None, &AutomationConfig::default());
        assert_eq!(clamped, target);
        assert_eq!(reason, None);
    }

    #[test]
    fn protection_threshold_clamps_profile_but_keeps_boards() {
        let (clamped, reason) = apply_interlock(
            running_target(),
            Some(75.0),
            None,
            &AutomationConfig::default(),
        );
        assert_eq!(clamped.profile, PowerProfile::UltraEco);
        assert_eq!(clamped.enabled_boards(), 3);
        assert!(!clamped.standby);
        assert_eq!(reason, Some(OverrideReason::TempProtection { temperature_c: 75.0 }));
    }

    #[test]
    fn critical_threshold_sheds_the_highest_running_board() {
        let (clamped, reason) = apply_interlock(
            running_target(),
            Some(81.5),
            Some(&[true, true, true]),
            &AutomationConfig::default(),
        );
        assert_eq!(clamped.profile, PowerProfile::UltraEco);
        assert_eq!(clamped.boards_enabled, vec![true, true, false]);
        assert_eq!(
            reason,
            Some(OverrideReason::EmergencyCooling { temperature_c: 81.5 })
        );
    }

    #[test]
    fn consecutive_critical_cycles_walk_down_the_boards() {
        // Board 2 was already shed last cycle; the next critical cycle
        // takes board 1.
        let (clamped, _) = apply_interlock(
            running_target(),
            Some(82.0),
            Some(&[true, true, false]),
            &AutomationConfig::default(),
        );
        assert_eq!(clamped.boards_enabled, vec![true, false, false]);
    }

    #[test]
    fn critical_without_observed_state_sheds_from_the_target() {
        // devs failed this cycle: the target itself is the best guess
        // of what is running.
        let (clamped, reason) = apply_interlock(
            running_target(),
            Some(82.0),
            None,
            &AutomationConfig::default(),
        );
        assert_eq!(clamped.boards_enabled, vec![true, true, false]);
        assert!(matches!(
            reason,
            Some(OverrideReason::EmergencyCooling { .. })
        ));
    }

    #[test]
    fn safety_clamp_beats_a_high_power_target() {
        // Solar says max power, thermals say no.
        let (clamped, reason) = apply_interlock(
            running_target(),
            Some(79.0),
            None,
            &AutomationConfig::default(),
        );
        assert_eq!(clamped.profile, PowerProfile::UltraEco);
        assert!(reason.is_some());
    }

    #[test]
    fn absent_temperature_leaves_the_interlock_idle() {
        let target = running_target();
        let (clamped, reason) =
            apply_interlock(target.clone(), None, None, &AutomationConfig::default());
        assert_eq!(clamped, target);
        assert_eq!(reason, None);
    }

    #[test]
    fn standby_target_needs_no_clamping() {
        let target = OperatingTarget::standby(3);
        let (clamped, reason) =
            apply_interlock(target.clone(), Some(90.0), None, &AutomationConfig::default());
        assert_eq!(clamped, target);
        assert_eq!(reason, None);
    }
}
