//! Power-target calculation: profiles, the sun curve, and the pure
//! watt-to-operating-point mapping.

mod curve;
mod profile;
mod target;

pub use curve::{curve_fraction, curve_watts};
pub use profile::PowerProfile;
pub use target::{
    ComputedTarget, MAX_SOLAR_WATTS, NightMode, OperatingTarget, SolarMode, compute_target,
};
