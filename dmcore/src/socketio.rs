//! Engine.IO v4 / Socket.IO v5 text codec.
//!
//! Every WebSocket text frame carries one Engine.IO packet: a single type digit
//! followed by its payload. Socket.IO packets ride inside Engine.IO `message`
//! packets with their own type digit. Only the default namespace and text
//! payloads are used by the messaging service, so binary packets are rejected.

use log::trace;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("empty packet")]
    Empty,
    #[error("unknown engine.io packet type '{0}'")]
    UnknownEngineType(char),
    #[error("unknown socket.io packet type '{0}'")]
    UnknownSocketType(char),
    #[error("unsupported socket.io packet: {0}")]
    Unsupported(&'static str),
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parameters sent by the server in the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(rename = "pingInterval")]
    pub ping_interval_ms: u64,
    #[serde(rename = "pingTimeout")]
    pub ping_timeout_ms: u64,
    #[serde(rename = "maxPayload", default)]
    pub max_payload: Option<u64>,
}

impl OpenHandshake {
    /// How long the server may stay silent before the connection counts as dead.
    pub fn liveness_window(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.ping_interval_ms + self.ping_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, args: Vec<Value> },
    ConnectError(Value),
}

impl SocketPacket {
    pub fn event(name: impl Into<String>, payload: Option<Value>) -> Self {
        SocketPacket::Event {
            name: name.into(),
            args: payload.into_iter().collect(),
        }
    }

    fn encode_into(&self, out: &mut String) -> Result<(), CodecError> {
        match self {
            SocketPacket::Connect(data) => {
                out.push('0');
                if let Some(data) = data {
                    out.push_str(&serde_json::to_string(data)?);
                }
            }
            SocketPacket::Disconnect => out.push('1'),
            SocketPacket::Event { name, args } => {
                out.push('2');
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                out.push_str(&serde_json::to_string(&array)?);
            }
            SocketPacket::ConnectError(data) => {
                out.push('4');
                out.push_str(&serde_json::to_string(data)?);
            }
        }
        Ok(())
    }

    fn decode(raw: &str) -> Result<Self, CodecError> {
        let mut chars = raw.chars();
        let kind = chars.next().ok_or(CodecError::Empty)?;
        let rest = strip_ack_id(strip_namespace(chars.as_str()));

        match kind {
            '0' => {
                let data = if rest.is_empty() {
                    None
                } else {
                    Some(serde_json::from_str(rest)?)
                };
                Ok(SocketPacket::Connect(data))
            }
            '1' => Ok(SocketPacket::Disconnect),
            '2' => {
                let array: Vec<Value> = serde_json::from_str(rest)?;
                let mut items = array.into_iter();
                let name = match items.next() {
                    Some(Value::String(name)) => name,
                    other => {
                        return Err(CodecError::MalformedEvent(format!(
                            "expected event name, got {other:?}"
                        )));
                    }
                };
                Ok(SocketPacket::Event {
                    name,
                    args: items.collect(),
                })
            }
            '3' => Err(CodecError::Unsupported("ack")),
            '4' => {
                let data = if rest.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(rest)?
                };
                Ok(SocketPacket::ConnectError(data))
            }
            '5' | '6' => Err(CodecError::Unsupported("binary")),
            other => Err(CodecError::UnknownSocketType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Noop,
}

impl EnginePacket {
    pub fn encode(&self) -> Result<String, CodecError> {
        let mut out = String::new();
        match self {
            EnginePacket::Open(_) => return Err(CodecError::Unsupported("client-side open")),
            EnginePacket::Close => out.push('1'),
            EnginePacket::Ping => out.push('2'),
            EnginePacket::Pong => out.push('3'),
            EnginePacket::Message(packet) => {
                out.push('4');
                packet.encode_into(&mut out)?;
            }
            EnginePacket::Noop => out.push('6'),
        }
        Ok(out)
    }

    pub fn decode(raw: &str) -> Result<Self, CodecError> {
        let mut chars = raw.chars();
        let kind = chars.next().ok_or(CodecError::Empty)?;
        let rest = chars.as_str();
        trace!(target: "SocketIo", "<-- engine packet '{kind}' ({} bytes)", rest.len());

        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(rest)?)),
            '1' => Ok(EnginePacket::Close),
            // Ping/pong may carry a "probe" payload during transport upgrades, which we never do.
            '2' => Ok(EnginePacket::Ping),
            '3' => Ok(EnginePacket::Pong),
            '4' => Ok(EnginePacket::Message(SocketPacket::decode(rest)?)),
            '5' => Err(CodecError::Unsupported("upgrade")),
            '6' => Ok(EnginePacket::Noop),
            'b' => Err(CodecError::Unsupported("binary")),
            other => Err(CodecError::UnknownEngineType(other)),
        }
    }
}

fn strip_namespace(rest: &str) -> &str {
    if rest.starts_with('/') {
        match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        }
    } else {
        rest
    }
}

fn strip_ack_id(rest: &str) -> &str {
    rest.trim_start_matches(|c: char| c.is_ascii_digit())
}
