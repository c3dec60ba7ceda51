//! TCP-primary / HTTP-fallback command delivery.
//!
//! One connection per command: the polling cadence is seconds, so
//! connection reuse buys nothing and a fresh socket keeps failure
//! handling simple. All outcomes are returned as typed results; the
//! client never panics past its own boundary.

use std::time::Duration;

use serde_json::{Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::DeviceEndpoint;
use crate::error::{Error, Result};
use crate::power::PowerProfile;
use crate::tracing::prelude::*;

use super::{Command, CommandRequest, CommandResponse, Transport};

/// Pause before the single TCP re-attempt.
const TCP_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Responses are bounded; `stats` is the largest at a few tens of KiB.
const MAX_RESPONSE_BYTES: usize = 512 * 1024;

/// Firmware web endpoint for per-board control. Board toggles are not
/// part of the TCP command set, so this path is HTTP-only.
const BOARD_CONTROL_PATH: &str = "/cgi-bin/luci/admin/miner/api/boardcontrol";

/// Firmware web endpoint for the overall watt cap; HTTP-only like
/// board control.
const POWER_LIMIT_PATH: &str = "/cgi-bin/luci/admin/miner/api/powerlimit";

pub struct ProtocolClient {
    endpoint: DeviceEndpoint,
    timeout: Duration,
    http: reqwest::Client,
}

impl ProtocolClient {
    pub fn new(endpoint: DeviceEndpoint) -> Self {
        let timeout = Duration::from_secs(endpoint.timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { endpoint, timeout, http }
    }

    pub fn host(&self) -> &str {
        &self.endpoint.host
    }

    /// Deliver one command: TCP, one TCP retry after a short backoff,
    /// then the identical body over HTTP. `reboot` skips the TCP
    /// retry so a slow-but-delivered reboot is not sent twice.
    pub async fn send(&self, request: &CommandRequest) -> Result<CommandResponse> {
        let tcp_attempts = if request.command == Command::Reboot { 1 } else { 2 };

        let mut last_tcp_error = String::new();
        for attempt in 0..tcp_attempts {
            if attempt > 0 {
                tokio::time::sleep(TCP_RETRY_BACKOFF).await;
            }
            match self.send_tcp(request).await {
                Ok(response) => return Ok(response),
                // A parsed rejection is the device's answer; neither
                // retry nor fallback will change it.
                Err(err @ Error::DeviceRejected { .. }) => return Err(err),
                Err(err) => {
                    debug!(
                        host = %self.endpoint.host,
                        command = %request.command,
                        attempt,
                        error = %err,
                        "TCP attempt failed"
                    );
                    last_tcp_error = err.to_string();
                }
            }
        }

        match self.send_http(request).await {
            Ok(response) => {
                debug!(
                    host = %self.endpoint.host,
                    command = %request.command,
                    "Delivered over HTTP fallback"
                );
                Ok(response)
            }
            Err(err @ Error::DeviceRejected { .. }) => Err(err),
            Err(err @ Error::Protocol { .. }) => Err(err),
            Err(err) => Err(Error::Transport {
                tcp: last_tcp_error,
                http: err.to_string(),
            }),
        }
    }

    /// Single TCP exchange: write the null-terminated JSON request,
    /// read until the null terminator (or EOF), parse.
    async fn send_tcp(&self, request: &CommandRequest) -> Result<CommandResponse> {
        let address = (self.endpoint.host.as_str(), self.endpoint.tcp_port);

        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect(address))
            .await
            .map_err(|_| transport_detail("connect timed out"))?
            .map_err(|err| transport_detail(&format!("connect: {err}")))?;

        let mut body = request.to_wire().into_bytes();
        body.push(0);
        tokio::time::timeout(self.timeout, stream.write_all(&body))
            .await
            .map_err(|_| transport_detail("write timed out"))?
            .map_err(|err| transport_detail(&format!("write: {err}")))?;

        let raw = tokio::time::timeout(self.timeout, read_until_null(&mut stream))
            .await
            .map_err(|_| transport_detail("read timed out"))??;

        parse_response(Transport::Tcp, &raw)
    }

    /// The identical JSON body POSTed to `/api` on the HTTP port.
    async fn send_http(&self, request: &CommandRequest) -> Result<CommandResponse> {
        let url = format!(
            "http://{}:{}/api",
            self.endpoint.host, self.endpoint.http_port
        );

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(request.to_wire())
            .send()
            .await
            .map_err(|err| transport_detail(&format!("http: {err}")))?;

        if !response.status().is_success() {
            return Err(transport_detail(&format!(
                "http status {}",
                response.status()
            )));
        }

        let raw = response
            .bytes()
            .await
            .map_err(|err| transport_detail(&format!("http body: {err}")))?;

        parse_response(Transport::Http, &raw)
    }

    /// Enable or disable one hashboard via the firmware web endpoint.
    pub async fn set_board_enabled(&self, board: usize, enabled: bool) -> Result<()> {
        let action = if enabled { "enable" } else { "disable" };
        self.post_control(
            BOARD_CONTROL_PATH,
            serde_json::json!({ "board": board, "action": action }),
            &format!("board {board} {action}"),
        )
        .await
    }

    /// Cap overall draw at `watts` via the firmware web endpoint.
    pub async fn set_power_limit(&self, watts: u32) -> Result<()> {
        self.post_control(
            POWER_LIMIT_PATH,
            serde_json::json!({ "power_limit": watts }),
            &format!("power limit {watts} W"),
        )
        .await
    }

    /// Web control endpoints answer `{"success": bool}` instead of a
    /// STATUS array.
    async fn post_control(&self, path: &str, body: Value, describe: &str) -> Result<()> {
        let url = format!(
            "http://{}:{}{}",
            self.endpoint.host, self.endpoint.http_port, path
        );

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| Error::Transport {
                tcp: "web control is http-only".to_string(),
                http: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Error::Transport {
                tcp: "web control is http-only".to_string(),
                http: format!("http status {}", response.status()),
            });
        }

        let reply: Value = response.json().await.map_err(|err| Error::Protocol {
            transport: Transport::Http,
            detail: format!("control response: {err}"),
        })?;

        if reply.get("success").and_then(Value::as_bool).unwrap_or(false) {
            Ok(())
        } else {
            Err(Error::DeviceRejected {
                code: None,
                message: format!("{describe} refused"),
            })
        }
    }

    /// `profileset` with the clock-delta parameter, e.g. `delta,-2`.
    pub async fn set_profile(&self, profile: PowerProfile) -> Result<CommandResponse> {
        self.send(&CommandRequest::with_parameter(
            Command::Profileset,
            profile.firmware_parameter(),
        ))
        .await
    }

    /// `atmset` with automatic mode and a target temperature.
    pub async fn set_atm(&self, target_celsius: f64) -> Result<CommandResponse> {
        self.send(&CommandRequest::with_parameter(
            Command::Atmset,
            format!("auto,{target_celsius:.0}"),
        ))
        .await
    }

    pub async fn reboot(&self) -> Result<CommandResponse> {
        self.send(&CommandRequest::new(Command::Reboot)).await
    }
}

fn transport_detail(detail: &str) -> Error {
    Error::Transport {
        tcp: detail.to_string(),
        http: "not attempted".to_string(),
    }
}

async fn read_until_null(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|err| transport_detail(&format!("read: {err}")))?;
        if n == 0 {
            // EOF without a terminator still counts when we got data;
            // some firmware versions close instead of terminating.
            if raw.is_empty() {
                return Err(transport_detail("connection closed before response"));
            }
            return Ok(raw);
        }
        if let Some(null_at) = chunk[..n].iter().position(|&b| b == 0) {
            raw.extend_from_slice(&chunk[..null_at]);
            return Ok(raw);
        }
        raw.extend_from_slice(&chunk[..n]);
        if raw.len() > MAX_RESPONSE_BYTES {
            return Err(transport_detail("response exceeds size bound"));
        }
    }
}

fn parse_response(transport: Transport, raw: &[u8]) -> Result<CommandResponse> {
    let text = std::str::from_utf8(raw)
        .map_err(|err| Error::Protocol {
            transport,
            detail: format!("invalid utf-8: {err}"),
        })?
        .trim_matches(|c: char| c == '\0' || c.is_whitespace());

    let payload: Map<String, Value> =
        serde_json::from_str(text).map_err(|err| Error::Protocol {
            transport,
            detail: format!("invalid json: {err}"),
        })?;

    CommandResponse::from_payload(transport, payload)
}
