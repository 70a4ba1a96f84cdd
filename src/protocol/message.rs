//! Protocol message definitions
//!
//! Typed views over the codec's [`Value`] universe. Parsing is permissive:
//! a missing field keeps its default rather than failing, so peers can add
//! fields without breaking older points.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::codec::{self, DecodeResult, Value};

/// What a point is on the network: a `host` advertises presence and
/// channels, a `controller` searches for hosts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    #[default]
    Host,
    Controller,
}

impl PointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointKind::Host => "host",
            PointKind::Controller => "controller",
        }
    }

    pub fn parse(s: &str) -> Option<PointKind> {
        match s {
            "host" => Some(PointKind::Host),
            "controller" => Some(PointKind::Controller),
            _ => None,
        }
    }
}

/// Kind filter carried by a `search` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SearchTarget {
    /// `*` - match every point kind.
    #[default]
    Any,
    Kind(PointKind),
    /// Unrecognized filter string; matches nothing.
    Other(String),
}

impl SearchTarget {
    pub fn matches(&self, kind: PointKind) -> bool {
        match self {
            SearchTarget::Any => true,
            SearchTarget::Kind(k) => *k == kind,
            SearchTarget::Other(_) => false,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SearchTarget::Any => "*",
            SearchTarget::Kind(k) => k.as_str(),
            SearchTarget::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> SearchTarget {
        match s {
            "*" => SearchTarget::Any,
            other => PointKind::parse(other)
                .map(SearchTarget::Kind)
                .unwrap_or_else(|| SearchTarget::Other(other.to_string())),
        }
    }
}

/// Who a message is from. `host` is filled in by the receiver from the
/// observed sender address, never trusted from the sender itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub uuid: String,
    pub kind: PointKind,
    pub host: String,
    pub port: u16,
    pub name: String,
}

impl Identity {
    /// Socket address for unicast replies, from the claimed host/port.
    pub fn address(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.host.parse().ok()?;
        Some(SocketAddr::new(ip, self.port))
    }

    pub fn to_value(&self) -> Value {
        Value::Map(vec![
            ("host".to_string(), Value::Text(self.host.clone())),
            ("uuid".to_string(), Value::Text(self.uuid.clone())),
            ("type".to_string(), Value::Text(self.kind.as_str().to_string())),
            ("port".to_string(), Value::Int(self.port as i64)),
            ("name".to_string(), Value::Text(self.name.clone())),
        ])
    }

    pub fn from_value(value: &Value) -> Identity {
        Identity {
            uuid: value
                .get("uuid")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            kind: value
                .get("type")
                .and_then(Value::as_str)
                .and_then(PointKind::parse)
                .unwrap_or_default(),
            host: value
                .get("host")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            port: value
                .get("port")
                .and_then(Value::as_i64)
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or_default(),
            name: value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// An application sub-endpoint a host advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Channel {
    pub id: u32,
    pub name: String,
}

impl Channel {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }

    pub fn to_value(&self) -> Value {
        Value::Map(vec![
            ("id".to_string(), Value::Int(self.id as i64)),
            ("name".to_string(), Value::Text(self.name.clone())),
        ])
    }

    pub fn from_value(value: &Value) -> Channel {
        Channel {
            id: value
                .get("id")
                .and_then(Value::as_i64)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or_default(),
            name: value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// Message commands. Unknown command strings decode to `None` at the
/// envelope level and are routed to the log-only branch, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Search,
    Alive,
    Bye,
    Data,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Search => "search",
            MessageKind::Alive => "alive",
            MessageKind::Bye => "bye",
            MessageKind::Data => "data",
        }
    }

    pub fn parse(s: &str) -> Option<MessageKind> {
        match s {
            "search" => Some(MessageKind::Search),
            "alive" => Some(MessageKind::Alive),
            "bye" => Some(MessageKind::Bye),
            "data" => Some(MessageKind::Data),
            _ => None,
        }
    }
}

/// Monotonic message-id source, one per engine instance.
///
/// Seeded randomly so ids are unlikely to collide across process restarts.
pub struct MessageIds {
    next: AtomicU64,
}

impl MessageIds {
    pub fn new() -> Self {
        let seed = rand::thread_rng().gen_range(1..=100_000u64);
        Self { next: AtomicU64::new(seed) }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MessageIds {
    fn default() -> Self {
        Self::new()
    }
}

/// The serialized unit on the wire: command kind, message id, response
/// flag, and the command-specific fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: u64,
    /// `None` when decoded from a buffer with a missing or unknown `type`.
    pub kind: Option<MessageKind>,
    pub is_response: bool,
    pub fields: Value,
}

impl Envelope {
    pub fn request(kind: MessageKind, fields: Value, id: u64) -> Self {
        Self { id, kind: Some(kind), is_response: false, fields }
    }

    pub fn response(kind: MessageKind, fields: Value, id: u64) -> Self {
        Self { id, kind: Some(kind), is_response: true, fields }
    }

    /// Serialize for the wire. `id`, `type` and `fields` are always
    /// present; `isr` is written only when this is a response.
    pub fn to_bytes(&self) -> Vec<u8> {
        let kind = self.kind.map(|k| k.as_str()).unwrap_or_default();
        // Ids above i64::MAX have no wire representation; write 0 rather
        // than a wrapped negative.
        let mut entries = vec![
            (
                "id".to_string(),
                Value::Int(i64::try_from(self.id).unwrap_or_default()),
            ),
            ("type".to_string(), Value::Text(kind.to_string())),
            ("fields".to_string(), self.fields.clone()),
        ];
        if self.is_response {
            entries.push(("isr".to_string(), Value::Bool(true)));
        }
        codec::encode(&Value::Map(entries))
    }

    /// Parse a received buffer. Field presence is not validated: whatever
    /// is missing keeps its default.
    pub fn from_bytes(buf: &[u8]) -> DecodeResult<Envelope> {
        let value = codec::decode(buf)?;
        Ok(Envelope {
            id: value.get("id").and_then(Value::as_u64).unwrap_or_default(),
            kind: value
                .get("type")
                .and_then(Value::as_str)
                .and_then(MessageKind::parse),
            is_response: value.get("isr").and_then(Value::as_bool).unwrap_or_default(),
            fields: value.get("fields").cloned().unwrap_or_else(Value::empty_map),
        })
    }
}

/// `search` request fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    pub from: Identity,
    pub target: SearchTarget,
}

impl SearchRequest {
    pub fn to_value(&self) -> Value {
        Value::Map(vec![
            ("from".to_string(), self.from.to_value()),
            ("type".to_string(), Value::Text(self.target.as_str().to_string())),
        ])
    }

    pub fn from_value(value: &Value) -> SearchRequest {
        SearchRequest {
            from: value.get("from").map(Identity::from_value).unwrap_or_default(),
            target: value
                .get("type")
                .and_then(Value::as_str)
                .map(SearchTarget::parse)
                .unwrap_or_default(),
        }
    }
}

/// `search` response fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    pub from: Identity,
    pub code: i64,
    pub error: Option<String>,
}

impl SearchResponse {
    pub fn to_value(&self) -> Value {
        let mut entries = vec![
            ("from".to_string(), self.from.to_value()),
            ("code".to_string(), Value::Int(self.code)),
        ];
        if let Some(err) = &self.error {
            entries.push(("err".to_string(), Value::Text(err.clone())));
        }
        Value::Map(entries)
    }

    pub fn from_value(value: &Value) -> SearchResponse {
        SearchResponse {
            from: value.get("from").map(Identity::from_value).unwrap_or_default(),
            code: value.get("code").and_then(Value::as_i64).unwrap_or_default(),
            error: value
                .get("err")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
        }
    }
}

/// `alive` advertisement fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlivePayload {
    pub from: Identity,
    pub channels: Vec<Channel>,
}

impl AlivePayload {
    pub fn to_value(&self) -> Value {
        Value::Map(vec![
            ("from".to_string(), self.from.to_value()),
            (
                "channels".to_string(),
                Value::List(self.channels.iter().map(Channel::to_value).collect()),
            ),
        ])
    }

    pub fn from_value(value: &Value) -> AlivePayload {
        AlivePayload {
            from: value.get("from").map(Identity::from_value).unwrap_or_default(),
            channels: value
                .get("channels")
                .and_then(Value::as_list)
                .map(|items| items.iter().map(Channel::from_value).collect())
                .unwrap_or_default(),
        }
    }
}

/// `bye` departure fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ByePayload {
    pub from: Identity,
}

impl ByePayload {
    pub fn to_value(&self) -> Value {
        Value::Map(vec![("from".to_string(), self.from.to_value())])
    }

    pub fn from_value(value: &Value) -> ByePayload {
        ByePayload {
            from: value.get("from").map(Identity::from_value).unwrap_or_default(),
        }
    }
}

/// Body of a `data` message: either text or raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataBody {
    Text(String),
    Bytes(Vec<u8>),
}

impl DataBody {
    /// Payload size in bytes (text measured as UTF-8).
    pub fn len(&self) -> usize {
        match self {
            DataBody::Text(s) => s.len(),
            DataBody::Bytes(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DataBody {
    fn default() -> Self {
        DataBody::Bytes(Vec::new())
    }
}

impl From<&str> for DataBody {
    fn from(s: &str) -> Self {
        DataBody::Text(s.to_string())
    }
}

impl From<String> for DataBody {
    fn from(s: String) -> Self {
        DataBody::Text(s)
    }
}

impl From<Vec<u8>> for DataBody {
    fn from(b: Vec<u8>) -> Self {
        DataBody::Bytes(b)
    }
}

/// `data` message fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataPayload {
    pub from: Identity,
    pub channel: u32,
    pub body: DataBody,
}

impl DataPayload {
    pub fn to_value(&self) -> Value {
        let body = match &self.body {
            DataBody::Text(s) => Value::Text(s.clone()),
            DataBody::Bytes(b) => Value::Bytes(b.clone()),
        };
        Value::Map(vec![
            ("from".to_string(), self.from.to_value()),
            ("data".to_string(), body),
            ("chnn".to_string(), Value::Int(self.channel as i64)),
        ])
    }

    pub fn from_value(value: &Value) -> DataPayload {
        let body = match value.get("data") {
            Some(Value::Text(s)) => DataBody::Text(s.clone()),
            Some(Value::Bytes(b)) => DataBody::Bytes(b.clone()),
            _ => DataBody::default(),
        };
        DataPayload {
            from: value.get("from").map(Identity::from_value).unwrap_or_default(),
            channel: value
                .get("chnn")
                .and_then(Value::as_i64)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or_default(),
            body,
        }
    }
}
