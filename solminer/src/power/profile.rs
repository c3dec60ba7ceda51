//! Firmware power profiles.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;

/// Clock-delta presets. This firmware family validates exactly three
/// deltas (-2, 0, +2); arbitrary integers are rejected.
///
/// Variant order gives the power ordering used by the target
/// calculator: `UltraEco < Balanced < MaxPower`.
#[derive(
    Clone, Copy, Debug, Display, EnumString, PartialEq, Eq, PartialOrd, Ord,
    Serialize, Deserialize, ToSchema,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PowerProfile {
    UltraEco,
    Balanced,
    MaxPower,
}

impl PowerProfile {
    /// The clock delta this profile selects.
    pub fn delta(self) -> i8 {
        match self {
            PowerProfile::UltraEco => -2,
            PowerProfile::Balanced => 0,
            PowerProfile::MaxPower => 2,
        }
    }

    pub fn from_delta(delta: i8) -> Option<Self> {
        match delta {
            -2 => Some(PowerProfile::UltraEco),
            0 => Some(PowerProfile::Balanced),
            2 => Some(PowerProfile::MaxPower),
            _ => None,
        }
    }

    /// The `profileset` parameter form, e.g. `delta,-2`.
    pub fn firmware_parameter(self) -> String {
        format!("delta,{}", self.delta())
    }

    /// Best-effort parse of the profile name reported by `config`.
    /// Accepts both the snake_case names and the `delta,N` form;
    /// anything else (custom named profiles) is unknown.
    pub fn from_firmware_name(name: &str) -> Option<Self> {
        if let Ok(profile) = name.parse() {
            return Some(profile);
        }
        let delta = name.strip_prefix("delta,")?.parse::<i8>().ok()?;
        Self::from_delta(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(PowerProfile::UltraEco, "delta,-2")]
    #[test_case(PowerProfile::Balanced, "delta,0")]
    #[test_case(PowerProfile::MaxPower, "delta,2")]
    fn firmware_parameter_form(profile: PowerProfile, expected: &str) {
        assert_eq!(profile.firmware_parameter(), expected);
    }

    #[test]
    fn ordering_follows_power_draw() {
        assert!(PowerProfile::UltraEco < PowerProfile::Balanced);
        assert!(PowerProfile::Balanced < PowerProfile::MaxPower);
    }

    #[test]
    fn parses_reported_profile_names() {
        assert_eq!(
            PowerProfile::from_firmware_name("ultra_eco"),
            Some(PowerProfile::UltraEco)
        );
        assert_eq!(
            PowerProfile::from_firmware_name("delta,2"),
            Some(PowerProfile::MaxPower)
        );
        assert_eq!(PowerProfile::from_firmware_name("delta,1"), None);
        assert_eq!(PowerProfile::from_firmware_name("custom-oc"), None);
    }
}
