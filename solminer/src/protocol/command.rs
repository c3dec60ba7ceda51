//! Wire types for the LuxOS command API.
//!
//! A request is a single JSON object `{"command": <name>, "parameter":
//! <opt string>}`; the response carries a `STATUS` array plus one
//! command-specific payload array (e.g. `SUMMARY`, `DEVS`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};
use utoipa::ToSchema;

use crate::error::{Error, Result};

/// The closed set of commands this firmware family accepts.
#[derive(
    Clone, Copy, Debug, Display, EnumString, PartialEq, Eq, Serialize, Deserialize, ToSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Summary,
    Pools,
    Devs,
    Stats,
    Config,
    Version,
    Devdetails,
    Profileset,
    Atmset,
    Reboot,
}

impl Command {
    /// Read-only commands are safe to retry aggressively; `reboot`
    /// notably is not.
    pub fn is_read_only(self) -> bool {
        !matches!(self, Command::Profileset | Command::Atmset | Command::Reboot)
    }
}

/// One command invocation. Constructed fresh per call.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CommandRequest {
    pub command: Command,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

impl CommandRequest {
    pub fn new(command: Command) -> Self {
        Self { command, parameter: None }
    }

    /// Parameters are comma-joined primitive values, e.g. `delta,-2`.
    pub fn with_parameter(command: Command, parameter: impl Into<String>) -> Self {
        Self { command, parameter: Some(parameter.into()) }
    }

    pub fn to_wire(&self) -> String {
        // CommandRequest is a flat struct of primitives; serialization
        // cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Which transport delivered a response.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Http,
}

/// A successful (well-formed, non-rejected) device response.
#[derive(Clone, Debug)]
pub struct CommandResponse {
    pub transport: Transport,
    pub payload: Map<String, Value>,
}

impl CommandResponse {
    /// Validate a decoded payload: a `STATUS` array with `S` (success)
    /// or `I` (informational) passes; `E` becomes `DeviceRejected`.
    /// Responses without a STATUS array are malformed.
    pub fn from_payload(transport: Transport, payload: Map<String, Value>) -> Result<Self> {
        let status = payload
            .get("STATUS")
            .and_then(Value::as_array)
            .and_then(|entries| entries.first())
            .ok_or_else(|| Error::Protocol {
                transport,
                detail: "response has no STATUS array".to_string(),
            })?;

        let flag = status.get("STATUS").and_then(Value::as_str).unwrap_or("");
        match flag {
            "S" | "I" => Ok(Self { transport, payload }),
            _ => Err(Error::DeviceRejected {
                code: status.get("Code").and_then(Value::as_i64),
                message: status
                    .get("Msg")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown rejection")
                    .to_string(),
            }),
        }
    }

    /// The command-specific payload array, e.g. `section("DEVS")`.
    pub fn section(&self, name: &str) -> Option<&Vec<Value>> {
        self.payload.get(name).and_then(Value::as_array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn request_wire_format_without_parameter() {
        let request = CommandRequest::new(Command::Summary);
        assert_eq!(request.to_wire(), r#"{"command":"summary"}"#);
    }

    #[test]
    fn request_wire_format_with_parameter() {
        let request = CommandRequest::with_parameter(Command::Profileset, "delta,-2");
        assert_eq!(
            request.to_wire(),
            r#"{"command":"profileset","parameter":"delta,-2"}"#
        );
    }

    #[test]
    fn command_names_match_the_wire() {
        assert_eq!(Command::Devdetails.to_string(), "devdetails");
        assert_eq!(Command::Atmset.to_string(), "atmset");
    }

    #[test]
    fn write_commands_are_not_read_only() {
        assert!(Command::Summary.is_read_only());
        assert!(Command::Devs.is_read_only());
        assert!(!Command::Profileset.is_read_only());
        assert!(!Command::Reboot.is_read_only());
    }

    #[test]
    fn success_status_passes() {
        let payload = map(json!({
            "STATUS": [{"STATUS": "S", "Code": 11, "Msg": "Summary"}],
            "SUMMARY": [{"GHS av": 95000.0}],
        }));
        let response = CommandResponse::from_payload(Transport::Tcp, payload).unwrap();
        assert_eq!(response.transport, Transport::Tcp);
        assert!(response.section("SUMMARY").is_some());
    }

    #[test]
    fn error_status_becomes_device_rejected() {
        let payload = map(json!({
            "STATUS": [{"STATUS": "E", "Code": 14, "Msg": "Invalid parameter"}],
        }));
        let err = CommandResponse::from_payload(Transport::Http, payload).unwrap_err();
        match err {
            Error::DeviceRejected { code, message } => {
                assert_eq!(code, Some(14));
                assert_eq!(message, "Invalid parameter");
            }
            other => panic!("expected DeviceRejected, got {other:?}"),
        }
    }

    #[test]
    fn missing_status_is_a_protocol_error() {
        let payload = map(json!({"SUMMARY": []}));
        let err = CommandResponse::from_payload(Transport::Tcp, payload).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }
}
