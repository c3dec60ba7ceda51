//! Daemon configuration.
//!
//! Loaded once at startup from a JSON file. `DeviceEndpoint` and
//! `AutomationConfig` persist for the device's configured lifetime;
//! the control loop reads them every cycle but never mutates the
//! endpoint.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::power::PowerProfile;

pub const DEFAULT_TCP_PORT: u16 = 4028;
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Where and how to reach one miner.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeviceEndpoint {
    pub host: String,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Accepted for forward compatibility; LuxOS requires no
    /// authentication and these are never transmitted.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Per-attempt network timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl DeviceEndpoint {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            tcp_port: DEFAULT_TCP_PORT,
            http_port: DEFAULT_HTTP_PORT,
            username: None,
            password: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Knobs for the per-device control loop.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Master switch; an emergency stop clears it.
    pub enabled: bool,

    /// Below this watt target the device goes to standby.
    pub minimum_power_watts: f64,

    /// At or above this board temperature the interlock forces the
    /// ultra-eco profile.
    pub temp_protection_celsius: f64,

    /// At or above this temperature the interlock also sheds a board.
    pub critical_temp_celsius: f64,

    /// Target handed to the firmware's thermal management (`atmset`)
    /// while the interlock is active.
    pub atm_target_celsius: f64,

    /// How often the target is recomputed and reconciled.
    pub automation_interval_minutes: u64,

    /// Fast display poll; independent of (and shorter than) the
    /// automation interval.
    pub poll_interval_secs: u64,

    /// Scales effective watts before breakpoint mapping (50--130).
    pub performance_percent: u16,

    /// Immediate re-poll attempts after a failed poll, within one tick.
    pub max_poll_retries: u32,

    /// Consecutive failed cycles before the device is surfaced as
    /// unreachable. The loop keeps retrying regardless.
    pub max_consecutive_failures: u32,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            minimum_power_watts: 1000.0,
            temp_protection_celsius: 75.0,
            critical_temp_celsius: 80.0,
            atm_target_celsius: 60.0,
            automation_interval_minutes: 10,
            poll_interval_secs: 30,
            performance_percent: 100,
            max_poll_retries: 2,
            max_consecutive_failures: 3,
        }
    }
}

impl AutomationConfig {
    /// Performance percent clamped to the validated 50--130 range.
    pub fn performance_factor(&self) -> f64 {
        f64::from(self.performance_percent.clamp(50, 130)) / 100.0
    }

    /// Number of fast poll ticks between automation runs (at least 1).
    pub fn automation_every_n_ticks(&self) -> u64 {
        let automation_secs = self.automation_interval_minutes.max(1) * 60;
        (automation_secs / self.poll_interval_secs.max(1)).max(1)
    }
}

/// One row of the watt breakpoint table: at or above `watts`, run
/// `boards` boards on `profile`.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct Breakpoint {
    pub watts: f64,
    pub boards: usize,
    pub profile: PowerProfile,
}

/// Policy mapping available watts to an operating point.
///
/// The exact cutoffs are deployment-specific (panel size, miner
/// model), so they are configuration rather than constants.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PowerPolicy {
    /// At or above this, max-power profile with all boards.
    pub solar_max_watts: f64,

    /// Peak of the sun curve (watts at the noon segment).
    pub curve_max_watts: f64,

    /// Nameplate draw used to scale night-mode percentages.
    pub nominal_power_watts: f64,

    /// Hashboards fitted to the device.
    pub board_count: usize,

    /// Sorted ascending by watts. Rows at or above `solar_max_watts`
    /// are shadowed by the solar-max rule.
    pub breakpoints: Vec<Breakpoint>,
}

impl Default for PowerPolicy {
    fn default() -> Self {
        // Defaults sized for an S19j-class miner on a ~5 kW array.
        Self {
            solar_max_watts: 4200.0,
            curve_max_watts: 5000.0,
            nominal_power_watts: 3250.0,
            board_count: 3,
            breakpoints: vec![
                Breakpoint { watts: 800.0, boards: 1, profile: PowerProfile::UltraEco },
                Breakpoint { watts: 1500.0, boards: 2, profile: PowerProfile::UltraEco },
                Breakpoint { watts: 2500.0, boards: 3, profile: PowerProfile::Balanced },
            ],
        }
    }
}

/// Top-level daemon configuration file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    pub devices: Vec<DeviceEndpoint>,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub policy: PowerPolicy,
    #[serde(default = "default_api_listen")]
    pub api_listen: String,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_api_listen() -> String {
    "127.0.0.1:7786".to_string()
}
