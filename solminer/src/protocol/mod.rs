//! LuxOS API protocol: command set, wire types, and the
//! TCP-primary / HTTP-fallback client.

mod client;
mod command;

pub use client::ProtocolClient;
pub use command::{Command, CommandRequest, CommandResponse, Transport};
