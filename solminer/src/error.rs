//! Crate-wide error taxonomy.
//!
//! Partial poll results and active safety overrides are represented as
//! data (`DeviceSnapshot::missing`, `OverrideReason`), not errors;
//! only genuine failures live here.

use thiserror::Error;

use crate::protocol::Transport;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Both transports failed to deliver the command.
    #[error("transport failure (tcp: {tcp}, http: {http})")]
    Transport { tcp: String, http: String },

    /// The device answered, but the response could not be parsed.
    #[error("protocol error over {transport}: {detail}")]
    Protocol { transport: Transport, detail: String },

    /// Well-formed response with a non-success STATUS (e.g. invalid
    /// parameter). Not retried automatically.
    #[error("device rejected command: {message} (code {code:?})")]
    DeviceRejected { code: Option<i64>, message: String },

    /// The control loop for this device is gone.
    #[error("engine command channel closed")]
    ChannelClosed,
}

impl Error {
    /// True when retrying the same command later could plausibly
    /// succeed (transport-level trouble, not a firmware rejection).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Protocol { .. })
    }
}
