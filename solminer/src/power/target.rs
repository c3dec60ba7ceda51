//! The pure mapping from solar/mode inputs to a desired operating
//! point. No I/O, total over its inputs, so it can be property-tested
//! without a device.

use serde::{Deserialize, Serialize};
use strum::Display;
use utoipa::ToSchema;

use crate::config::{AutomationConfig, PowerPolicy};

use super::curve::curve_watts;
use super::profile::PowerProfile;

/// Valid range for a configured solar watt value.
pub const MAX_SOLAR_WATTS: f64 = 50_000.0;

/// How the watt target is chosen.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SolarMode {
    /// A stored watt value set by the operator (or an external solar
    /// meter feeding the API).
    Manual,
    /// Watts derived from the fixed time-of-day curve.
    SunCurve,
}

/// Reduced-power override for the hours a panel array is dark.
/// Layered on top of the solar mode; cleared when the mode is set.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum NightMode {
    #[strum(serialize = "30")]
    #[serde(rename = "30")]
    Thirty,
    #[strum(serialize = "15")]
    #[serde(rename = "15")]
    Fifteen,
    #[strum(serialize = "standby")]
    #[serde(rename = "standby")]
    Standby,
}

impl NightMode {
    /// Fraction of nameplate draw the mode allows.
    pub fn fraction(self) -> f64 {
        match self {
            NightMode::Thirty => 0.30,
            NightMode::Fifteen => 0.15,
            NightMode::Standby => 0.0,
        }
    }
}

/// The desired device state. Recomputed every automation cycle from
/// current inputs, never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OperatingTarget {
    pub profile: PowerProfile,
    /// One entry per hashboard, index-aligned with the device.
    pub boards_enabled: Vec<bool>,
    pub standby: bool,
    pub power_limit_watts: Option<u32>,
}

impl OperatingTarget {
    pub fn standby(board_count: usize) -> Self {
        Self {
            profile: PowerProfile::UltraEco,
            boards_enabled: vec![false; board_count],
            standby: true,
            power_limit_watts: None,
        }
    }

    pub fn enabled_boards(&self) -> usize {
        self.boards_enabled.iter().filter(|&&on| on).count()
    }
}

/// A target plus the watt figures that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct ComputedTarget {
    pub target: OperatingTarget,
    /// Raw watt input before performance scaling.
    pub input_watts: f64,
    /// After performance scaling and clamping; what the breakpoints saw.
    pub effective_watts: f64,
}

/// Map (mode, night override, watts, local hour) to an operating
/// point.
///
/// Manual and sun-curve modes differ only in where the watt figure
/// comes from; both feed the same breakpoint mapping. Standby
/// debouncing is deliberately not applied here -- the reconciliation
/// engine owns hysteresis.
pub fn compute_target(
    mode: SolarMode,
    night_mode: Option<NightMode>,
    manual_watts: f64,
    hour: u8,
    config: &AutomationConfig,
    policy: &PowerPolicy,
) -> ComputedTarget {
    let input_watts = match night_mode {
        Some(night) => policy.nominal_power_watts * night.fraction(),
        None => match mode {
            SolarMode::Manual => manual_watts,
            SolarMode::SunCurve => curve_watts(hour, policy.curve_max_watts),
        },
    };

    let effective_watts =
        (input_watts * config.performance_factor()).clamp(0.0, MAX_SOLAR_WATTS);

    // Night mode is explicit operator intent to run low, so it skips
    // the auto-standby threshold (except the standby night mode, which
    // lands at zero watts anyway).
    let below_minimum =
        night_mode.is_none() && effective_watts < config.minimum_power_watts;

    if effective_watts <= 0.0 || below_minimum {
        return ComputedTarget {
            target: OperatingTarget::standby(policy.board_count),
            input_watts,
            effective_watts,
        };
    }

    let power_limit_watts = Some(effective_watts.round() as u32);

    let target = if effective_watts >= policy.solar_max_watts {
        OperatingTarget {
            profile: PowerProfile::MaxPower,
            boards_enabled: vec![true; policy.board_count],
            standby: false,
            power_limit_watts,
        }
    } else {
        // Highest breakpoint at or below the effective watts; a value
        // under the lowest row still runs the lowest row rather than
        // flapping to standby.
        let row = policy
            .breakpoints
            .iter()
            .rev()
            .find(|row| effective_watts >= row.watts)
            .or_else(|| policy.breakpoints.first());

        match row {
            Some(row) => OperatingTarget {
                profile: row.profile,
                boards_enabled: (0..policy.board_count)
                    .map(|index| index < row.boards)
                    .collect(),
                standby: false,
                power_limit_watts,
            },
            // Empty table: run balanced on everything.
            None => OperatingTarget {
                profile: PowerProfile::Balanced,
                boards_enabled: vec![true; policy.board_count],
                standby: false,
                power_limit_watts,
            },
        }
    };

    ComputedTarget { target, input_watts, effective_watts }
}
