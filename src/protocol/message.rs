//! The `{pid, channel, ...payload}` envelope every message travels in.

use serde_json::{Map, Value};
use thiserror::Error;

use super::channel::Channel;

/// A shape-checked inbound message. `payload` holds every field except
/// `pid` and `channel`.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub pid: u32,
    pub channel: Channel,
    pub payload: Map<String, Value>,
}

/// Why a JSON value is not a valid envelope
#[derive(Debug, Error, PartialEq)]
pub enum EnvelopeError {
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("missing or non-integer 'pid'")]
    BadPid,
    #[error("missing or non-integer 'channel'")]
    BadChannel,
    #[error("unknown channel {0}")]
    UnknownChannel(u64),
}

impl Envelope {
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let Value::Object(mut payload) = value else {
            return Err(EnvelopeError::NotAnObject);
        };

        let pid = payload
            .remove("pid")
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
            .ok_or(EnvelopeError::BadPid)?;

        let code = payload
            .remove("channel")
            .and_then(|v| v.as_u64())
            .ok_or(EnvelopeError::BadChannel)?;
        let channel = Channel::from_code(code).ok_or(EnvelopeError::UnknownChannel(code))?;

        Ok(Envelope {
            pid,
            channel,
            payload,
        })
    }
}

/// Build a host → script message. `pid` and `channel` always win over
/// same-named keys in `data`.
pub fn outbound(pid: u32, channel: Channel, data: Map<String, Value>) -> Value {
    let mut message = data;
    message.insert("pid".to_string(), Value::from(pid));
    message.insert("channel".to_string(), Value::from(channel.code()));
    Value::Object(message)
}
