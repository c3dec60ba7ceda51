//! API v0 endpoints.
//!
//! Version 0 signals an unstable API -- breaking changes are expected
//! until the daemon reaches 1.0.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::time::Duration;

use tokio::sync::oneshot;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::api_client::types::{BoardPutRequest, DevicePatchRequest};
use crate::engine::{DeviceStatus, EngineCommand, TargetReadout};
use crate::error::{Error, Result};
use crate::power::MAX_SOLAR_WATTS;
use crate::snapshot::DeviceSnapshot;

use super::server::SharedState;

/// Upper bound on one forwarded command: the engine may walk several
/// boards, each with its own transport timeouts.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Build the v0 API routes with OpenAPI metadata.
pub fn routes() -> OpenApiRouter<SharedState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(list_devices))
        .routes(routes!(patch_device))
        .routes(routes!(get_snapshot))
        .routes(routes!(get_target))
        .routes(routes!(put_board))
        .routes(routes!(emergency_stop))
        .routes(routes!(reboot))
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = OK, description = "Server is running", body = String),
    ),
)]
async fn health() -> &'static str {
    "OK"
}

/// List managed devices with reachability.
#[utoipa::path(
    get,
    path = "/devices",
    tag = "devices",
    responses(
        (status = OK, description = "Managed devices", body = Vec<DeviceStatus>),
    ),
)]
async fn list_devices(State(state): State<SharedState>) -> Json<Vec<DeviceStatus>> {
    Json(state.iter().map(|handle| handle.status.borrow().clone()).collect())
}

/// Latest observed device state, or 503 before the first poll lands.
#[utoipa::path(
    get,
    path = "/devices/{id}/snapshot",
    tag = "devices",
    params(
        ("id" = String, Path, description = "Device id"),
    ),
    responses(
        (status = OK, description = "Latest snapshot", body = DeviceSnapshot),
        (status = NOT_FOUND, description = "Unknown device"),
        (status = SERVICE_UNAVAILABLE, description = "No successful poll yet"),
    ),
)]
async fn get_snapshot(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<DeviceSnapshot>, StatusCode> {
    let handle = state.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    handle
        .snapshot
        .borrow()
        .clone()
        .map(Json)
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

/// Latest operating target and its justification.
#[utoipa::path(
    get,
    path = "/devices/{id}/target",
    tag = "devices",
    params(
        ("id" = String, Path, description = "Device id"),
    ),
    responses(
        (status = OK, description = "Latest target", body = TargetReadout),
        (status = NOT_FOUND, description = "Unknown device"),
        (status = SERVICE_UNAVAILABLE, description = "No automation cycle yet"),
    ),
)]
async fn get_target(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<TargetReadout>, StatusCode> {
    let handle = state.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    handle
        .target
        .borrow()
        .clone()
        .map(Json)
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

/// Apply partial updates to a device's control inputs.
#[utoipa::path(
    patch,
    path = "/devices/{id}",
    tag = "devices",
    params(
        ("id" = String, Path, description = "Device id"),
    ),
    request_body = DevicePatchRequest,
    responses(
        (status = OK, description = "Updated device status", body = DeviceStatus),
        (status = NOT_FOUND, description = "Unknown device"),
        (status = UNPROCESSABLE_ENTITY, description = "Value out of range"),
        (status = CONFLICT, description = "Device rejected a command"),
        (status = BAD_GATEWAY, description = "Device unreachable"),
        (status = GATEWAY_TIMEOUT, description = "Engine did not reply in time"),
    ),
)]
async fn patch_device(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<DevicePatchRequest>,
) -> std::result::Result<Json<DeviceStatus>, StatusCode> {
    if let Some(watts) = req.solar_watts {
        if !watts.is_finite() || !(0.0..=MAX_SOLAR_WATTS).contains(&watts) {
            return Err(StatusCode::UNPROCESSABLE_ENTITY);
        }
    }

    if let Some(enabled) = req.automation_enabled {
        forward(&state, &id, |reply| EngineCommand::SetAutomationEnabled {
            enabled,
            reply,
        })
        .await?;
    }
    if let Some(mode) = req.mode {
        forward(&state, &id, |reply| EngineCommand::SetMode { mode, reply }).await?;
    }
    if let Some(mode) = req.night_mode {
        forward(&state, &id, |reply| EngineCommand::SetNightMode {
            mode: Some(mode),
            reply,
        })
        .await?;
    }
    if let Some(watts) = req.solar_watts {
        forward(&state, &id, |reply| EngineCommand::SetSolarPower { watts, reply }).await?;
    }
    if let Some(profile) = req.profile {
        forward(&state, &id, |reply| EngineCommand::SetProfile { profile, reply }).await?;
    }

    let handle = state.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(handle.status.borrow().clone()))
}

/// Enable or disable one hashboard.
#[utoipa::path(
    put,
    path = "/devices/{id}/boards/{index}",
    tag = "devices",
    params(
        ("id" = String, Path, description = "Device id"),
        ("index" = usize, Path, description = "Board index"),
    ),
    request_body = BoardPutRequest,
    responses(
        (status = OK, description = "Board state applied"),
        (status = NOT_FOUND, description = "Unknown device"),
        (status = CONFLICT, description = "Device rejected the toggle"),
        (status = BAD_GATEWAY, description = "Device unreachable"),
        (status = GATEWAY_TIMEOUT, description = "Engine did not reply in time"),
    ),
)]
async fn put_board(
    State(state): State<SharedState>,
    Path((id, index)): Path<(String, usize)>,
    Json(req): Json<BoardPutRequest>,
) -> std::result::Result<StatusCode, StatusCode> {
    forward(&state, &id, |reply| EngineCommand::SetBoardEnabled {
        index,
        enabled: req.enabled,
        reply,
    })
    .await?;
    Ok(StatusCode::OK)
}

/// Cut power immediately and disable automation.
#[utoipa::path(
    post,
    path = "/devices/{id}/emergency-stop",
    tag = "devices",
    responses(
        (status = OK, description = "All boards disabled"),
        (status = NOT_FOUND, description = "Unknown device"),
        (status = BAD_GATEWAY, description = "One or more boards unreachable"),
        (status = GATEWAY_TIMEOUT, description = "Engine did not reply in time"),
    ),
    params(
        ("id" = String, Path, description = "Device id"),
    ),
)]
async fn emergency_stop(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> std::result::Result<StatusCode, StatusCode> {
    forward(&state, &id, |reply| EngineCommand::EmergencyStop { reply }).await?;
    Ok(StatusCode::OK)
}

/// Reboot the device firmware.
#[utoipa::path(
    post,
    path = "/devices/{id}/reboot",
    tag = "devices",
    responses(
        (status = OK, description = "Reboot accepted"),
        (status = NOT_FOUND, description = "Unknown device"),
        (status = BAD_GATEWAY, description = "Device unreachable"),
        (status = GATEWAY_TIMEOUT, description = "Engine did not reply in time"),
    ),
    params(
        ("id" = String, Path, description = "Device id"),
    ),
)]
async fn reboot(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> std::result::Result<StatusCode, StatusCode> {
    forward(&state, &id, |reply| EngineCommand::Reboot { reply }).await?;
    Ok(StatusCode::OK)
}

/// Send one engine command and await its reply, translating failures
/// into status codes. The timeout bounds the whole exchange, queueing
/// included, and surfaces as 504 so a busy engine is distinguishable
/// from a broken one.
async fn forward(
    state: &SharedState,
    id: &str,
    build: impl FnOnce(oneshot::Sender<Result<()>>) -> EngineCommand,
) -> std::result::Result<(), StatusCode> {
    let handle = state.get(id).ok_or(StatusCode::NOT_FOUND)?;

    let (tx, rx) = oneshot::channel();
    let exchange = async {
        handle
            .commands
            .send(build(tx))
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(status_for(&err)),
            Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
        }
    };

    match tokio::time::timeout(COMMAND_TIMEOUT, exchange).await {
        Ok(result) => result,
        Err(_) => Err(StatusCode::GATEWAY_TIMEOUT),
    }
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::DeviceRejected { .. } => StatusCode::CONFLICT,
        Error::Transport { .. } | Error::Protocol { .. } => StatusCode::BAD_GATEWAY,
        Error::ChannelClosed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::server::{Registry, router};
    use crate::engine::DeviceHandle;
    use axum::body::Body;
    use http::{Method, Request};
    use http_body_util::BodyExt;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use time::OffsetDateTime;
    use tokio::sync::{mpsc, watch};
    use tower::ServiceExt;

    /// Registry with one fake device whose engine replies Ok to every
    /// command and records what it saw.
    fn test_state() -> (
        SharedState,
        Arc<Mutex<Vec<String>>>,
        watch::Sender<Option<DeviceSnapshot>>,
    ) {
        let (commands_tx, mut commands_rx) = mpsc::channel::<EngineCommand>(8);
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (_target_tx, target_rx) = watch::channel(None);
        let (_status_tx, status_rx) = watch::channel(DeviceStatus {
            id: "miner-1".into(),
            host: "192.0.2.1".into(),
            reachable: true,
            consecutive_failures: 0,
            automation_enabled: true,
            emergency_stopped: false,
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        tokio::spawn(async move {
            while let Some(command) = commands_rx.recv().await {
                let (name, reply) = match command {
                    EngineCommand::SetSolarPower { watts, reply } => {
                        (format!("solar_power {watts}"), reply)
                    }
                    EngineCommand::SetMode { mode, reply } => (format!("mode {mode}"), reply),
                    EngineCommand::SetNightMode { mode, reply } => {
                        (format!("night_mode {mode:?}"), reply)
                    }
                    EngineCommand::SetAutomationEnabled { enabled, reply } => {
                        (format!("automation {enabled}"), reply)
                    }
                    EngineCommand::SetBoardEnabled { index, enabled, reply } => {
                        (format!("board {index} {enabled}"), reply)
                    }
                    EngineCommand::SetProfile { profile, reply } => {
                        (format!("profile {profile}"), reply)
                    }
                    EngineCommand::EmergencyStop { reply } => ("emergency_stop".into(), reply),
                    EngineCommand::Reboot { reply } => ("reboot".into(), reply),
                };
                record.lock().push(name);
                let _ = reply.send(Ok(()));
            }
        });

        let mut registry = Registry::new();
        registry.insert(DeviceHandle {
            id: "miner-1".into(),
            commands: commands_tx,
            snapshot: snapshot_rx,
            target: target_rx,
            status: status_rx,
        });

        (Arc::new(registry), seen, snapshot_tx)
    }

    fn request(method: Method, uri: &str, body: Option<&str>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(uri);
        match body {
            Some(body) => builder
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (state, _, _) = test_state();
        let response = router(state)
            .oneshot(request(Method::GET, "/v0/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn devices_lists_the_registry() {
        let (state, _, _) = test_state();
        let response = router(state)
            .oneshot(request(Method::GET, "/v0/devices", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let devices: Vec<DeviceStatus> = serde_json::from_slice(&body).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "miner-1");
        assert!(devices[0].reachable);
    }

    #[tokio::test]
    async fn snapshot_is_unavailable_before_the_first_poll() {
        let (state, _, snapshot_tx) = test_state();

        let response = router(state.clone())
            .oneshot(request(Method::GET, "/v0/devices/miner-1/snapshot", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        snapshot_tx.send_replace(Some(DeviceSnapshot {
            hashrate_ths: Some(95.0),
            power_watts: None,
            boards: Vec::new(),
            max_temperature_c: None,
            fan_rpm: None,
            uptime_secs: None,
            active_pool: None,
            firmware_version: None,
            api_version: None,
            profile: None,
            missing: Vec::new(),
            captured_at: OffsetDateTime::UNIX_EPOCH,
        }));

        let response = router(state)
            .oneshot(request(Method::GET, "/v0/devices/miner-1/snapshot", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let snapshot: DeviceSnapshot = serde_json::from_slice(&body).unwrap();
        assert_eq!(snapshot.hashrate_ths, Some(95.0));
        // Absent is null, not zero.
        assert_eq!(snapshot.power_watts, None);
    }

    #[tokio::test]
    async fn unknown_device_is_not_found() {
        let (state, _, _) = test_state();
        let response = router(state)
            .oneshot(request(Method::GET, "/v0/devices/nope/snapshot", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn patch_rejects_out_of_range_watts() {
        let (state, seen, _) = test_state();
        let response = router(state)
            .oneshot(request(
                Method::PATCH,
                "/v0/devices/miner-1",
                Some(r#"{"solar_watts": 60000.0}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn patch_forwards_each_provided_field() {
        let (state, seen, _) = test_state();
        let response = router(state)
            .oneshot(request(
                Method::PATCH,
                "/v0/devices/miner-1",
                Some(r#"{"solar_watts": 2500.0, "mode": "manual"}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*seen.lock(), vec!["mode manual", "solar_power 2500"]);
    }

    #[tokio::test]
    async fn board_toggle_and_actions_forward() {
        let (state, seen, _) = test_state();

        let response = router(state.clone())
            .oneshot(request(
                Method::PUT,
                "/v0/devices/miner-1/boards/2",
                Some(r#"{"enabled": false}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router(state.clone())
            .oneshot(request(Method::POST, "/v0/devices/miner-1/emergency-stop", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router(state)
            .oneshot(request(Method::POST, "/v0/devices/miner-1/reboot", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert_eq!(
            *seen.lock(),
            vec!["board 2 false", "emergency_stop", "reboot"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_engine_maps_to_gateway_timeout() {
        let (commands_tx, mut commands_rx) = mpsc::channel::<EngineCommand>(8);
        let (_snapshot_tx, snapshot_rx) = watch::channel(None);
        let (_target_tx, target_rx) = watch::channel(None);
        let (_status_tx, status_rx) = watch::channel(DeviceStatus {
            id: "miner-1".into(),
            host: "192.0.2.1".into(),
            reachable: true,
            consecutive_failures: 0,
            automation_enabled: true,
            emergency_stopped: false,
        });

        // Engine that accepts commands but never answers them.
        tokio::spawn(async move {
            let mut parked = Vec::new();
            while let Some(command) = commands_rx.recv().await {
                if let EngineCommand::Reboot { reply } = command {
                    parked.push(reply);
                }
            }
        });

        let mut registry = Registry::new();
        registry.insert(DeviceHandle {
            id: "miner-1".into(),
            commands: commands_tx,
            snapshot: snapshot_rx,
            target: target_rx,
            status: status_rx,
        });

        let response = router(Arc::new(registry))
            .oneshot(request(Method::POST, "/v0/devices/miner-1/reboot", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let (state, _, _) = test_state();
        let response = router(state)
            .oneshot(request(Method::GET, "/api-docs/openapi.json", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
