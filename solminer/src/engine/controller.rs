//! One control loop per device.
//!
//! The controller is the only writer to its device. It owns a fast
//! poll tick, gates automation to every Nth tick, and services
//! operator commands from the API between ticks. Everything observed
//! is published on watch channels; the API layer never touches the
//! device directly.

use std::future::Future;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::{AutomationConfig, PowerPolicy};
use crate::error::Result;
use crate::power::{
    MAX_SOLAR_WATTS, NightMode, OperatingTarget, PowerProfile, SolarMode, compute_target,
};
use crate::protocol::{Command, CommandRequest, CommandResponse, ProtocolClient};
use crate::safety::{OverrideReason, apply_interlock};
use crate::snapshot::{DeviceSnapshot, PollResults};
use crate::tracing::prelude::*;

use super::commands::EngineCommand;
use super::hysteresis::StandbyDebounce;
use super::reconcile::{self, PlannedAction};
use super::TargetReadout;

const COMMAND_QUEUE_DEPTH: usize = 16;

/// Device I/O as the controller sees it. `ProtocolClient` is the real
/// implementation; tests script a fake device.
pub trait DeviceIo: Send + Sync + 'static {
    fn send(
        &self,
        request: &CommandRequest,
    ) -> impl Future<Output = Result<CommandResponse>> + Send;

    fn set_board_enabled(
        &self,
        board: usize,
        enabled: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    fn set_power_limit(&self, watts: u32) -> impl Future<Output = Result<()>> + Send;
}

impl DeviceIo for ProtocolClient {
    fn send(
        &self,
        request: &CommandRequest,
    ) -> impl Future<Output = Result<CommandResponse>> + Send {
        ProtocolClient::send(self, request)
    }

    fn set_board_enabled(
        &self,
        board: usize,
        enabled: bool,
    ) -> impl Future<Output = Result<()>> + Send {
        ProtocolClient::set_board_enabled(self, board, enabled)
    }

    fn set_power_limit(&self, watts: u32) -> impl Future<Output = Result<()>> + Send {
        ProtocolClient::set_power_limit(self, watts)
    }
}

/// Reachability summary for the device listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeviceStatus {
    pub id: String,
    pub host: String,
    pub reachable: bool,
    pub consecutive_failures: u32,
    pub automation_enabled: bool,
    pub emergency_stopped: bool,
}

/// The API side of a running controller.
#[derive(Clone)]
pub struct DeviceHandle {
    pub id: String,
    pub commands: mpsc::Sender<EngineCommand>,
    pub snapshot: watch::Receiver<Option<DeviceSnapshot>>,
    pub target: watch::Receiver<Option<TargetReadout>>,
    pub status: watch::Receiver<DeviceStatus>,
}

pub struct DeviceController<IO> {
    id: String,
    io: IO,
    automation: AutomationConfig,
    policy: PowerPolicy,

    mode: SolarMode,
    night_mode: Option<NightMode>,
    solar_watts: f64,
    emergency_stopped: bool,

    hysteresis: StandbyDebounce,
    /// Last non-standby target, held while a standby flip is pending.
    last_target: Option<OperatingTarget>,
    /// Last profile this engine applied; fallback when the device does
    /// not report one.
    last_applied_profile: Option<PowerProfile>,
    /// Last watt cap delivered; the device never reports it back.
    last_applied_power_limit: Option<u32>,
    /// The interlock's thermal target has been handed to the firmware.
    atm_applied: bool,

    ticks: u64,
    /// Run automation on the next tick regardless of gating (set by
    /// operator commands so input takes effect within one poll).
    automation_requested: bool,
    consecutive_failures: u32,
    cached: Option<DeviceSnapshot>,
    /// The cached snapshot may drive automation for one failed cycle
    /// only.
    cache_spent: bool,

    commands_rx: mpsc::Receiver<EngineCommand>,
    snapshot_tx: watch::Sender<Option<DeviceSnapshot>>,
    target_tx: watch::Sender<Option<TargetReadout>>,
    status_tx: watch::Sender<DeviceStatus>,
}

impl<IO: DeviceIo> DeviceController<IO> {
    pub fn new(
        id: impl Into<String>,
        host: impl Into<String>,
        io: IO,
        automation: AutomationConfig,
        policy: PowerPolicy,
    ) -> (Self, DeviceHandle) {
        let id = id.into();
        let host = host.into();

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (target_tx, target_rx) = watch::channel(None);
        let (status_tx, status_rx) = watch::channel(DeviceStatus {
            id: id.clone(),
            host,
            reachable: false,
            consecutive_failures: 0,
            automation_enabled: automation.enabled,
            emergency_stopped: false,
        });

        let hold = Duration::from_secs(automation.automation_interval_minutes.max(1) * 60);

        let controller = Self {
            id: id.clone(),
            io,
            hysteresis: StandbyDebounce::new(hold),
            automation,
            policy,
            mode: SolarMode::Manual,
            night_mode: None,
            solar_watts: 0.0,
            emergency_stopped: false,
            last_target: None,
            last_applied_profile: None,
            last_applied_power_limit: None,
            atm_applied: false,
            ticks: 0,
            automation_requested: false,
            consecutive_failures: 0,
            cached: None,
            cache_spent: false,
            commands_rx,
            snapshot_tx,
            target_tx,
            status_tx,
        };

        let handle = DeviceHandle {
            id,
            commands: commands_tx,
            snapshot: snapshot_rx,
            target: target_rx,
            status: status_rx,
        };

        (controller, handle)
    }

    pub async fn run(mut self, cancellation: CancellationToken) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.automation.poll_interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(device = %self.id, "Device controller started");

        loop {
            tokio::select! {
                // Operator commands (emergency stop among them) win
                // over scheduled polls.
                biased;
                _ = cancellation.cancelled() => {
                    break;
                }
                command = self.commands_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        info!(device = %self.id, "Device controller stopped");
    }

    async fn tick(&mut self) {
        self.ticks += 1;
        // First tick runs automation immediately, then every Nth.
        let automation_due = (self.ticks - 1) % self.automation.automation_every_n_ticks() == 0
            || self.automation_requested;

        match self.poll().await {
            Some(snapshot) => {
                if self.consecutive_failures > 0 {
                    info!(device = %self.id, "Device reachable again");
                }
                self.consecutive_failures = 0;
                self.cache_spent = false;
                self.snapshot_tx.send_replace(Some(snapshot.clone()));
                self.cached = Some(snapshot.clone());

                if automation_due {
                    self.automation_requested = false;
                    self.automation_cycle(&snapshot, local_hour()).await;
                }
            }
            None => {
                self.consecutive_failures += 1;
                warn!(
                    device = %self.id,
                    consecutive_failures = self.consecutive_failures,
                    "Poll failed"
                );

                if automation_due {
                    match self.cached.clone() {
                        Some(cached) if !self.cache_spent => {
                            self.cache_spent = true;
                            info!(device = %self.id, "Automation running on cached state");
                            self.automation_requested = false;
                            self.automation_cycle(&cached, local_hour()).await;
                        }
                        _ => {
                            debug!(device = %self.id, "Automation skipped; no fresh state");
                        }
                    }
                }
            }
        }

        self.publish_status();
    }

    /// Poll the read-only command set, with bounded immediate retries
    /// when every command fails.
    async fn poll(&self) -> Option<DeviceSnapshot> {
        for attempt in 0..=self.automation.max_poll_retries {
            let mut results = PollResults::default();
            for command in PollResults::COMMANDS {
                let request = CommandRequest::new(command);
                match self.io.send(&request).await {
                    Ok(response) => {
                        if let Some(slot) = results.slot_mut(command) {
                            *slot = Some(response);
                        }
                    }
                    Err(err) => {
                        debug!(
                            device = %self.id,
                            command = %command,
                            error = %err,
                            "Poll command failed"
                        );
                    }
                }
            }

            let snapshot = results.build(OffsetDateTime::now_utc());
            if !snapshot.is_empty() {
                if !snapshot.missing.is_empty() {
                    debug!(device = %self.id, missing = ?snapshot.missing, "Partial poll");
                }
                return Some(snapshot);
            }
            debug!(device = %self.id, attempt, "Poll attempt returned nothing");
        }
        None
    }

    /// Compute the target, debounce standby, clamp for safety, then
    /// apply the minimal plan. Per-command failures are logged and
    /// retried naturally on the next cycle.
    async fn automation_cycle(&mut self, snapshot: &DeviceSnapshot, hour: u8) {
        if self.emergency_stopped || !self.automation.enabled {
            debug!(device = %self.id, "Automation inactive");
            return;
        }

        let computed = compute_target(
            self.mode,
            self.night_mode,
            self.solar_watts,
            hour,
            &self.automation,
            &self.policy,
        );

        let observed_enabled: Option<Vec<bool>> = if snapshot.boards.is_empty() {
            None
        } else {
            Some(
                (0..self.policy.board_count)
                    .map(|index| snapshot.board(index).is_some_and(|board| board.enabled))
                    .collect(),
            )
        };
        let observed_profile = snapshot.profile.or(self.last_applied_profile);

        let requested_standby = computed.target.standby;
        let debounced = self.hysteresis.update(requested_standby, Instant::now());

        let target = if debounced == requested_standby {
            computed.target.clone()
        } else if debounced {
            // Watts recovered but the exit is still pending: stay down.
            OperatingTarget::standby(self.policy.board_count)
        } else {
            // Standby requested but not yet held long enough: hold the
            // last running state rather than shedding early.
            self.last_target.clone().unwrap_or_else(|| OperatingTarget {
                profile: observed_profile.unwrap_or(computed.target.profile),
                boards_enabled: observed_enabled
                    .clone()
                    .unwrap_or_else(|| vec![true; self.policy.board_count]),
                standby: false,
                power_limit_watts: None,
            })
        };

        if !target.standby {
            self.last_target = Some(target.clone());
        }

        let (target, safety_override) = apply_interlock(
            target,
            snapshot.max_temperature_c,
            observed_enabled.as_deref(),
            &self.automation,
        );

        if let Some(reason) = safety_override {
            warn!(device = %self.id, reason = ?reason, "Safety interlock active");
        } else {
            self.atm_applied = false;
        }

        let ensure_atm = (safety_override.is_some() && !self.atm_applied)
            .then_some(self.automation.atm_target_celsius);

        let actions = reconcile::plan(
            &target,
            snapshot,
            observed_profile,
            self.last_applied_power_limit,
            ensure_atm,
        );

        if !actions.is_empty() {
            info!(
                device = %self.id,
                actions = actions.len(),
                standby = target.standby,
                profile = %target.profile,
                effective_watts = %computed.effective_watts,
                "Applying reconciliation plan"
            );
        }

        for action in actions {
            if let Err(err) = self.apply(&action).await {
                warn!(
                    device = %self.id,
                    action = ?action,
                    error = %err,
                    "Plan command failed; retrying next cycle"
                );
            }
        }

        self.publish_target(&target, safety_override, computed.input_watts, computed.effective_watts);
    }

    async fn apply(&mut self, action: &PlannedAction) -> Result<()> {
        match *action {
            PlannedAction::DisableBoard(index) => {
                self.io.set_board_enabled(index, false).await
            }
            PlannedAction::EnableBoard(index) => self.io.set_board_enabled(index, true).await,
            PlannedAction::SetProfile(profile) => {
                self.io
                    .send(&CommandRequest::with_parameter(
                        Command::Profileset,
                        profile.firmware_parameter(),
                    ))
                    .await?;
                self.last_applied_profile = Some(profile);
                Ok(())
            }
            PlannedAction::SetPowerLimit { watts } => {
                self.io.set_power_limit(watts).await?;
                self.last_applied_power_limit = Some(watts);
                Ok(())
            }
            PlannedAction::SetAtm { target_celsius } => {
                self.io
                    .send(&CommandRequest::with_parameter(
                        Command::Atmset,
                        format!("auto,{target_celsius:.0}"),
                    ))
                    .await?;
                self.atm_applied = true;
                Ok(())
            }
        }
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SetSolarPower { watts, reply } => {
                self.solar_watts = watts.clamp(0.0, MAX_SOLAR_WATTS);
                self.automation_requested = true;
                debug!(device = %self.id, watts = %self.solar_watts, "Solar power updated");
                reply_to(reply, Ok(()));
            }
            EngineCommand::SetMode { mode, reply } => {
                info!(device = %self.id, mode = %mode, "Solar mode set");
                self.mode = mode;
                self.night_mode = None;
                self.automation_requested = true;
                reply_to(reply, Ok(()));
            }
            EngineCommand::SetNightMode { mode, reply } => {
                info!(device = %self.id, night_mode = ?mode, "Night mode set");
                self.night_mode = mode;
                self.automation_requested = true;
                reply_to(reply, Ok(()));
            }
            EngineCommand::SetAutomationEnabled { enabled, reply } => {
                info!(device = %self.id, enabled, "Automation toggled");
                self.automation.enabled = enabled;
                if enabled {
                    // Re-enabling is the explicit recovery from an
                    // emergency stop.
                    self.emergency_stopped = false;
                }
                self.automation_requested = enabled;
                self.publish_status();
                reply_to(reply, Ok(()));
            }
            EngineCommand::SetBoardEnabled { index, enabled, reply } => {
                let result = self.io.set_board_enabled(index, enabled).await;
                if result.is_ok() {
                    info!(device = %self.id, board = index, enabled, "Board toggled");
                }
                reply_to(reply, result);
            }
            EngineCommand::SetProfile { profile, reply } => {
                let result = self
                    .io
                    .send(&CommandRequest::with_parameter(
                        Command::Profileset,
                        profile.firmware_parameter(),
                    ))
                    .await
                    .map(|_| ());
                if result.is_ok() {
                    info!(device = %self.id, profile = %profile, "Profile applied");
                    self.last_applied_profile = Some(profile);
                }
                reply_to(reply, result);
            }
            EngineCommand::EmergencyStop { reply } => {
                let result = self.emergency_stop().await;
                reply_to(reply, result);
            }
            EngineCommand::Reboot { reply } => {
                info!(device = %self.id, "Reboot requested");
                let result = self
                    .io
                    .send(&CommandRequest::new(Command::Reboot))
                    .await
                    .map(|_| ());
                reply_to(reply, result);
            }
        }
    }

    /// Direct shutdown path: no hysteresis, no gating. Every board is
    /// attempted even after a failure; the first error is returned.
    async fn emergency_stop(&mut self) -> Result<()> {
        warn!(device = %self.id, "EMERGENCY STOP");
        self.emergency_stopped = true;
        self.automation.enabled = false;
        self.hysteresis.force(true);

        let mut first_error = None;
        for index in 0..self.policy.board_count {
            if let Err(err) = self.io.set_board_enabled(index, false).await {
                error!(
                    device = %self.id,
                    board = index,
                    error = %err,
                    "Emergency stop: board disable failed"
                );
                first_error.get_or_insert(err);
            }
        }

        let target = OperatingTarget::standby(self.policy.board_count);
        self.publish_target(&target, Some(OverrideReason::EmergencyStop), 0.0, 0.0);
        self.publish_status();

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn publish_target(
        &self,
        target: &OperatingTarget,
        safety_override: Option<OverrideReason>,
        input_watts: f64,
        effective_watts: f64,
    ) {
        self.target_tx.send_replace(Some(TargetReadout {
            target: target.clone(),
            mode: self.mode,
            night_mode: self.night_mode,
            solar_watts: self.solar_watts,
            input_watts,
            effective_watts,
            safety_override,
            automation_enabled: self.automation.enabled,
            emergency_stopped: self.emergency_stopped,
            computed_at: OffsetDateTime::now_utc(),
        }));
    }

    fn publish_status(&self) {
        self.status_tx.send_modify(|status| {
            status.reachable = self.consecutive_failures < self.automation.max_consecutive_failures;
            status.consecutive_failures = self.consecutive_failures;
            status.automation_enabled = self.automation.enabled;
            status.emergency_stopped = self.emergency_stopped;
        });
    }
}

/// Local hour-of-day for the sun curve; falls back to UTC when the
/// local offset cannot be determined (sandboxed environments).
fn local_hour() -> u8 {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .hour()
}

fn reply_to(reply: tokio::sync::oneshot::Sender<Result<()>>, result: Result<()>) {
    if reply.send(result).is_err() {
        debug!("Command reply channel closed");
    }
}
