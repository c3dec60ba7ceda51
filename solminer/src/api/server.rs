//! Router assembly and the device registry handlers read from.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{Json, Router, routing::get};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::engine::DeviceHandle;
use crate::tracing::prelude::*;

use super::v0;

#[derive(OpenApi)]
#[openapi(info(
    title = "solminer",
    description = "Solar-aware ASIC miner control daemon"
))]
struct ApiDoc;

/// Handles for every managed device, keyed by id. Registered once at
/// startup; the set never changes while the daemon runs, so handlers
/// read it without locking.
#[derive(Default)]
pub struct Registry {
    devices: HashMap<String, DeviceHandle>,
    order: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: DeviceHandle) {
        self.order.push(handle.id.clone());
        self.devices.insert(handle.id.clone(), handle);
    }

    pub fn get(&self, id: &str) -> Option<&DeviceHandle> {
        self.devices.get(id)
    }

    /// Devices in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceHandle> {
        self.order.iter().filter_map(|id| self.devices.get(id))
    }
}

pub type SharedState = Arc<Registry>;

/// Build the full router with OpenAPI metadata and request tracing.
pub fn router(state: SharedState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .nest("/v0", v0::routes())
        .split_for_parts();

    router
        .route("/api-docs/openapi.json", get(move || async move { Json(api) }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the token is cancelled; in-flight requests drain.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: SharedState,
    cancellation: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(address) = listener.local_addr() {
        info!(%address, "API server listening");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancellation.cancelled_owned())
        .await
}
