//! Solar-aware control daemon for LuxOS-family ASIC miners.
//!
//! One control loop per device polls over the firmware's TCP line
//! protocol (HTTP fallback), computes a power target from the
//! available solar watts, and reconciles the device toward it with
//! standby hysteresis and a thermal interlock. An HTTP API exposes the
//! observed state and the operator entry points.

pub mod api;
pub mod api_client;
pub mod config;
pub mod engine;
pub mod error;
pub mod power;
pub mod protocol;
pub mod safety;
pub mod snapshot;
pub mod tracing;

pub use error::{Error, Result};
