//! Typed view of the latest poll results.
//!
//! The firmware reports everything as loose key/value sections; this
//! module narrows them to explicit optional fields so consumers can
//! tell "zero hashrate" from "unknown". A snapshot is built wholesale
//! from one poll cycle and never partially updated.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::power::PowerProfile;
use crate::protocol::{Command, CommandResponse};

/// Per-hashboard status from `devs`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BoardStatus {
    pub index: usize,
    pub hashrate_ths: Option<f64>,
    pub temperature_c: Option<f64>,
    pub frequency_mhz: Option<f64>,
    pub voltage: Option<f64>,
    pub enabled: bool,
}

/// One poll cycle's observed device state. Fields are `None` when the
/// command that carries them failed or omitted them -- never defaulted
/// to zero.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceSnapshot {
    pub hashrate_ths: Option<f64>,
    pub power_watts: Option<f64>,
    pub boards: Vec<BoardStatus>,
    /// Hottest reading across the device (stats `temp_max`, falling
    /// back to the hottest board).
    pub max_temperature_c: Option<f64>,
    pub fan_rpm: Option<u32>,
    pub uptime_secs: Option<u64>,
    pub active_pool: Option<String>,
    pub firmware_version: Option<String>,
    pub api_version: Option<String>,
    /// Profile reported by `config`, when it names a known preset.
    pub profile: Option<PowerProfile>,
    /// Poll commands that failed this cycle.
    pub missing: Vec<Command>,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String)]
    pub captured_at: OffsetDateTime,
}

impl DeviceSnapshot {
    /// True when every poll command failed; such a cycle counts as a
    /// failed poll rather than a snapshot.
    pub fn is_empty(&self) -> bool {
        self.missing.len() == PollResults::COMMANDS.len()
    }

    pub fn board(&self, index: usize) -> Option<&BoardStatus> {
        self.boards.iter().find(|board| board.index == index)
    }
}

/// Results of one poll cycle, one slot per command. `None` = the
/// command failed; order of collection is irrelevant, all are
/// read-only.
#[derive(Debug, Default)]
pub struct PollResults {
    pub summary: Option<CommandResponse>,
    pub stats: Option<CommandResponse>,
    pub devs: Option<CommandResponse>,
    pub pools: Option<CommandResponse>,
    pub config: Option<CommandResponse>,
    pub version: Option<CommandResponse>,
}

impl PollResults {
    pub const COMMANDS: [Command; 6] = [
        Command::Summary,
        Command::Stats,
        Command::Devs,
        Command::Pools,
        Command::Config,
        Command::Version,
    ];

    /// Slot for one poll command's result.
    pub fn slot_mut(&mut self, command: Command) -> Option<&mut Option<CommandResponse>> {
        match command {
            Command::Summary => Some(&mut self.summary),
            Command::Stats => Some(&mut self.stats),
            Command::Devs => Some(&mut self.devs),
            Command::Pools => Some(&mut self.pools),
            Command::Config => Some(&mut self.config),
            Command::Version => Some(&mut self.version),
            _ => None,
        }
    }

    pub fn build(&self, captured_at: OffsetDateTime) -> DeviceSnapshot {
        let mut snapshot = DeviceSnapshot {
            hashrate_ths: None,
            power_watts: None,
            boards: Vec::new(),
            max_temperature_c: None,
            fan_rpm: None,
            uptime_secs: None,
            active_pool: None,
            firmware_version: None,
            api_version: None,
            profile: None,
            missing: self.missing(),
            captured_at,
        };

        if let Some(summary) = section_first(&self.summary, "SUMMARY") {
            // GH/s on the wire.
            snapshot.hashrate_ths = num(summary.get("GHS av")).map(|ghs| ghs / 1000.0);
            snapshot.uptime_secs = num(summary.get("Elapsed")).map(|secs| secs as u64);
            snapshot.power_watts = num(summary.get("Power"));
        }

        if let Some(stats) = self.stats.as_ref().and_then(mining_stats_entry) {
            snapshot.max_temperature_c = num(stats.get("temp_max"));
            snapshot.fan_rpm = max_fan_rpm(stats);
        }

        if let Some(devs) = self.devs.as_ref().and_then(|r| r.section("DEVS")) {
            snapshot.boards = devs
                .iter()
                .enumerate()
                .map(|(position, dev)| board_status(position, dev))
                .collect();

            // stats is authoritative for max temperature; boards are
            // the fallback when it failed.
            if snapshot.max_temperature_c.is_none() {
                snapshot.max_temperature_c = snapshot
                    .boards
                    .iter()
                    .filter_map(|board| board.temperature_c)
                    .fold(None, |hottest, temp| {
                        Some(hottest.map_or(temp, |h: f64| h.max(temp)))
                    });
            }
        }

        if let Some(pools) = self.pools.as_ref().and_then(|r| r.section("POOLS")) {
            snapshot.active_pool = pools
                .iter()
                .find(|pool| pool.get("Status").and_then(Value::as_str) == Some("Alive"))
                .or_else(|| pools.first())
                .and_then(|pool| pool.get("Stratum URL"))
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        if let Some(config) = section_first(&self.config, "CONFIG") {
            snapshot.profile = config
                .get("Profile")
                .and_then(Value::as_str)
                .and_then(PowerProfile::from_firmware_name);
        }

        if let Some(version) = section_first(&self.version, "VERSION") {
            snapshot.firmware_version = version
                .get("LUXminer")
                .and_then(Value::as_str)
                .map(str::to_string);
            snapshot.api_version = version
                .get("API")
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        snapshot
    }

    fn missing(&self) -> Vec<Command> {
        let slots = [
            (Command::Summary, self.summary.is_some()),
            (Command::Stats, self.stats.is_some()),
            (Command::Devs, self.devs.is_some()),
            (Command::Pools, self.pools.is_some()),
            (Command::Config, self.config.is_some()),
            (Command::Version, self.version.is_some()),
        ];
        slots
            .into_iter()
            .filter_map(|(command, present)| (!present).then_some(command))
            .collect()
    }
}

fn board_status(position: usize, dev: &Value) -> BoardStatus {
    BoardStatus {
        index: num(dev.get("ASC"))
            .or_else(|| num(dev.get("ID")))
            .map(|id| id as usize)
            .unwrap_or(position),
        hashrate_ths: num(dev.get("MHS av")).map(|mhs| mhs / 1.0e6),
        temperature_c: num(dev.get("Temperature")),
        frequency_mhz: num(dev.get("Frequency")),
        voltage: num(dev.get("Voltage")),
        enabled: dev.get("Enabled").and_then(Value::as_str) == Some("Y")
            || dev.get("Status").and_then(Value::as_str) == Some("Alive"),
    }
}

/// The STATS array mixes a firmware-identification entry with the
/// mining entry; pick the one carrying temperatures.
fn mining_stats_entry(response: &CommandResponse) -> Option<&serde_json::Map<String, Value>> {
    response
        .section("STATS")?
        .iter()
        .filter_map(Value::as_object)
        .find(|entry| entry.contains_key("temp_max"))
}

fn max_fan_rpm(stats: &serde_json::Map<String, Value>) -> Option<u32> {
    stats
        .iter()
        .filter(|(key, _)| key.starts_with("fan") && key[3..].chars().all(|c| c.is_ascii_digit()))
        .filter_map(|(_, value)| num(Some(value)))
        .map(|rpm| rpm as u32)
        .max()
}

fn section_first<'a>(
    response: &'a Option<CommandResponse>,
    name: &str,
) -> Option<&'a serde_json::Map<String, Value>> {
    response
        .as_ref()?
        .section(name)?
        .first()
        .and_then(Value::as_object)
}

/// Numbers arrive as numbers or quoted strings depending on firmware
/// version; accept both.
fn num(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Transport;
    use serde_json::json;

    fn response(value: Value) -> Option<CommandResponse> {
        let payload = value.as_object().unwrap().clone();
        Some(CommandResponse::from_payload(Transport::Tcp, payload).unwrap())
    }

    fn status_ok() -> Value {
        json!([{"STATUS": "S", "Code": 11, "Msg": "ok"}])
    }

    fn full_polls() -> PollResults {
        PollResults {
            summary: response(json!({
                "STATUS": status_ok(),
                "SUMMARY": [{"GHS av": 95300.0, "Elapsed": 86400, "Power": 3200.5}],
            })),
            stats: response(json!({
                "STATUS": status_ok(),
                "STATS": [
                    {"BMMiner": "luxos", "Type": "S19j Pro+"},
                    {"temp_max": 68.0, "frequency": 525, "fan1": 4920, "fan2": 5040, "fan_num": 2},
                ],
            })),
            devs: response(json!({
                "STATUS": status_ok(),
                "DEVS": [
                    {"ASC": 0, "MHS av": 31000000.0, "Temperature": 65.5, "Frequency": 525.0,
                     "Voltage": 13.4, "Status": "Alive", "Enabled": "Y"},
                    {"ASC": 1, "MHS av": 32100000.0, "Temperature": 68.0, "Frequency": 525.0,
                     "Voltage": 13.4, "Status": "Alive", "Enabled": "Y"},
                    {"ASC": 2, "MHS av": 0.0, "Temperature": "41.0", "Frequency": 0.0,
                     "Voltage": 0.0, "Status": "Dead", "Enabled": "N"},
                ],
            })),
            pools: response(json!({
                "STATUS": status_ok(),
                "POOLS": [
                    {"Stratum URL": "stratum.example:3333", "Status": "Dead"},
                    {"Stratum URL": "solo.pool.example:3333", "Status": "Alive"},
                ],
            })),
            config: response(json!({
                "STATUS": status_ok(),
                "CONFIG": [{"Model": "S19j Pro+", "Profile": "delta,0"}],
            })),
            version: response(json!({
                "STATUS": status_ok(),
                "VERSION": [{"LUXminer": "2024.5.1", "API": "3.7", "Type": "S19j Pro+"}],
            })),
        }
    }

    #[test]
    fn full_poll_populates_every_field() {
        let snapshot = full_polls().build(OffsetDateTime::UNIX_EPOCH);

        assert_eq!(snapshot.hashrate_ths, Some(95.3));
        assert_eq!(snapshot.power_watts, Some(3200.5));
        assert_eq!(snapshot.uptime_secs, Some(86400));
        assert_eq!(snapshot.max_temperature_c, Some(68.0));
        assert_eq!(snapshot.fan_rpm, Some(5040));
        assert_eq!(snapshot.active_pool.as_deref(), Some("solo.pool.example:3333"));
        assert_eq!(snapshot.firmware_version.as_deref(), Some("2024.5.1"));
        assert_eq!(snapshot.api_version.as_deref(), Some("3.7"));
        assert_eq!(snapshot.profile, Some(PowerProfile::Balanced));
        assert!(snapshot.missing.is_empty());
        assert!(!snapshot.is_empty());

        assert_eq!(snapshot.boards.len(), 3);
        let board0 = snapshot.board(0).unwrap();
        assert_eq!(board0.hashrate_ths, Some(31.0));
        assert!(board0.enabled);
        let board2 = snapshot.board(2).unwrap();
        // String-typed temperature still parses.
        assert_eq!(board2.temperature_c, Some(41.0));
        assert!(!board2.enabled);
    }

    #[test]
    fn stats_failure_leaves_temperature_absent_not_zero() {
        let polls = PollResults {
            summary: full_polls().summary,
            ..PollResults::default()
        };
        let snapshot = polls.build(OffsetDateTime::UNIX_EPOCH);

        assert_eq!(snapshot.hashrate_ths, Some(95.3));
        assert_eq!(snapshot.max_temperature_c, None);
        assert_eq!(snapshot.fan_rpm, None);
        assert!(snapshot.boards.is_empty());
        assert!(snapshot.missing.contains(&Command::Stats));
        assert!(snapshot.missing.contains(&Command::Devs));
        assert!(!snapshot.missing.contains(&Command::Summary));
    }

    #[test]
    fn board_temperatures_back_fill_max_when_stats_failed() {
        let polls = PollResults {
            devs: full_polls().devs,
            ..PollResults::default()
        };
        let snapshot = polls.build(OffsetDateTime::UNIX_EPOCH);
        assert_eq!(snapshot.max_temperature_c, Some(68.0));
    }

    #[test]
    fn all_commands_failed_is_an_empty_snapshot() {
        let snapshot = PollResults::default().build(OffsetDateTime::UNIX_EPOCH);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.missing.len(), PollResults::COMMANDS.len());
        assert_eq!(snapshot.hashrate_ths, None);
    }

    #[test]
    fn unknown_profile_names_are_left_unset() {
        let polls = PollResults {
            config: response(json!({
                "STATUS": status_ok(),
                "CONFIG": [{"Profile": "factory-tuned"}],
            })),
            ..PollResults::default()
        };
        let snapshot = polls.build(OffsetDateTime::UNIX_EPOCH);
        assert_eq!(snapshot.profile, None);
    }
}
