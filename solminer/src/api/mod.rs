//! HTTP control surface for the daemon.

mod server;
mod v0;

pub use server::{Registry, SharedState, router, serve};
