//! HTTP client for the daemon API.
//!
//! Used by the CLI and handy for integration scripts. Errors are
//! `anyhow` because callers are binaries, not the library core.

pub mod types;

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;

use crate::engine::{DeviceStatus, TargetReadout};
use crate::snapshot::DeviceSnapshot;

use types::{BoardPutRequest, DevicePatchRequest};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:7786";

pub struct Client {
    base_url: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/v0/health", self.base_url);
        check(self.http.get(&url).send().await?).await.map(|_| ())
    }

    pub async fn devices(&self) -> Result<Vec<DeviceStatus>> {
        self.get_json("/v0/devices").await
    }

    pub async fn snapshot(&self, id: &str) -> Result<DeviceSnapshot> {
        self.get_json(&format!("/v0/devices/{id}/snapshot")).await
    }

    pub async fn target(&self, id: &str) -> Result<TargetReadout> {
        self.get_json(&format!("/v0/devices/{id}/target")).await
    }

    pub async fn patch_device(
        &self,
        id: &str,
        patch: &DevicePatchRequest,
    ) -> Result<DeviceStatus> {
        let url = format!("{}/v0/devices/{id}", self.base_url);
        let response = check(self.http.patch(&url).json(patch).send().await?).await?;
        response.json().await.context("decoding device status")
    }

    pub async fn set_board(&self, id: &str, index: usize, enabled: bool) -> Result<()> {
        let url = format!("{}/v0/devices/{id}/boards/{index}", self.base_url);
        let body = BoardPutRequest { enabled };
        check(self.http.put(&url).json(&body).send().await?)
            .await
            .map(|_| ())
    }

    pub async fn emergency_stop(&self, id: &str) -> Result<()> {
        self.post_action(id, "emergency-stop").await
    }

    pub async fn reboot(&self, id: &str) -> Result<()> {
        self.post_action(id, "reboot").await
    }

    async fn post_action(&self, id: &str, action: &str) -> Result<()> {
        let url = format!("{}/v0/devices/{id}/{action}", self.base_url);
        check(self.http.post(&url).send().await?).await.map(|_| ())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let response = check(self.http.get(&url).send().await?).await?;
        response.json().await.with_context(|| format!("decoding {path}"))
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("API returned {status}: {body}");
}
