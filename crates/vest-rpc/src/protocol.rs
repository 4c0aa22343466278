//! Wire types for the line-delimited JSON protocol.
//!
//! Clients send commands shaped `{"cmd": <verb>, ..., "req_id"?: <id>}`. The
//! daemon answers the sender with `{"response": <verb>, "req_id"?, "success",
//! ...payload}` and broadcasts `{"event": <name>, ..., "ts": <unix seconds>}`
//! to every connected client.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use vest_types::{CellId, DeviceDescriptor, EffectPattern, EffectStep, Intensity};

/// Response name used for frames that could not be attributed to a verb.
pub const ERROR_RESPONSE: &str = "error";

/// Client-chosen correlation token, echoed verbatim on the matching response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl RequestId {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(RequestId::String(s.clone())),
            Value::Number(n) => n.as_u64().map(RequestId::Number),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// Stable machine-readable failure codes carried on failed responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ProtocolError,
    UnknownCommand,
    InvalidParams,
    NoDeviceSelected,
    NotFound,
    NotConnected,
    ConnectError,
    HardwareWriteError,
    UnknownEffect,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProtocolError => "protocol_error",
            Self::UnknownCommand => "unknown_command",
            Self::InvalidParams => "invalid_params",
            Self::NoDeviceSelected => "no_device_selected",
            Self::NotFound => "not_found",
            Self::NotConnected => "not_connected",
            Self::ConnectError => "connect_error",
            Self::HardwareWriteError => "hardware_write_error",
            Self::UnknownEffect => "unknown_effect",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Ping,
    List,
    SelectDevice {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bus: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        serial: Option<String>,
    },
    GetSelectedDevice,
    ClearDevice,
    Connect,
    Disconnect,
    Trigger {
        cell: CellId,
        speed: Intensity,
    },
    Stop,
    Status,
    PlayEffect(PlayEffectParams),
    StopEffect,
    ListEffects,
    Identify {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    ListClients,
    Shutdown,
}

impl Command {
    /// Every verb the daemon understands, in wire spelling.
    pub const VERBS: [&'static str; 16] = [
        "ping",
        "list",
        "select_device",
        "get_selected_device",
        "clear_device",
        "connect",
        "disconnect",
        "trigger",
        "stop",
        "status",
        "play_effect",
        "stop_effect",
        "list_effects",
        "identify",
        "list_clients",
        "shutdown",
    ];

    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::List => "list",
            Self::SelectDevice { .. } => "select_device",
            Self::GetSelectedDevice => "get_selected_device",
            Self::ClearDevice => "clear_device",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Trigger { .. } => "trigger",
            Self::Stop => "stop",
            Self::Status => "status",
            Self::PlayEffect(_) => "play_effect",
            Self::StopEffect => "stop_effect",
            Self::ListEffects => "list_effects",
            Self::Identify { .. } => "identify",
            Self::ListClients => "list_clients",
            Self::Shutdown => "shutdown",
        }
    }

    #[must_use]
    pub fn is_known_verb(verb: &str) -> bool {
        Self::VERBS.contains(&verb)
    }

    /// Shorthand for a named library effect.
    #[must_use]
    pub fn play_named(name: impl Into<String>) -> Self {
        Self::PlayEffect(PlayEffectParams {
            effect_name: Some(name.into()),
            ..PlayEffectParams::default()
        })
    }

    /// Shorthand for an ad-hoc pattern.
    #[must_use]
    pub fn play_steps(steps: Vec<EffectStep>) -> Self {
        Self::PlayEffect(PlayEffectParams {
            steps: Some(steps),
            ..PlayEffectParams::default()
        })
    }
}

/// Parameters of `play_effect`. Exactly one source must be given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayEffectParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<EffectStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cells: Option<BTreeSet<CellId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<Intensity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Where the pattern for a `play_effect` comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectSource {
    Named(String),
    AdHoc(EffectPattern),
    Single {
        cells: BTreeSet<CellId>,
        intensity: Intensity,
        hold_ms: u64,
    },
}

impl PlayEffectParams {
    /// Resolves the parameters to a single pattern source.
    ///
    /// # Errors
    ///
    /// Returns a message when no source or more than one source is present,
    /// or when the single-step form is incomplete.
    pub fn into_source(self) -> Result<EffectSource, String> {
        let single = self.cells.is_some() || self.speed.is_some() || self.duration_ms.is_some();
        let given = usize::from(self.effect_name.is_some())
            + usize::from(self.steps.is_some())
            + usize::from(single);
        if given != 1 {
            return Err(
                "play_effect needs exactly one of effect_name, steps, or cells+speed+duration_ms"
                    .to_string(),
            );
        }

        if let Some(name) = self.effect_name {
            return Ok(EffectSource::Named(name));
        }

        if let Some(steps) = self.steps {
            let pattern = EffectPattern::ad_hoc(steps);
            pattern.validate()?;
            return Ok(EffectSource::AdHoc(pattern));
        }

        match (self.cells, self.speed, self.duration_ms) {
            (Some(cells), Some(intensity), Some(hold_ms)) if !cells.is_empty() => {
                Ok(EffectSource::Single {
                    cells,
                    intensity,
                    hold_ms,
                })
            }
            (Some(_), Some(_), Some(_)) => Err("cells must not be empty".to_string()),
            _ => Err("single-step play_effect needs cells, speed and duration_ms".to_string()),
        }
    }
}

/// A command together with its optional correlation token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    #[serde(flatten)]
    pub command: Command,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req_id: Option<RequestId>,
}

impl Request {
    #[must_use]
    pub fn new(command: Command, req_id: Option<RequestId>) -> Self {
        Self { command, req_id }
    }

    /// Parse one inbound line.
    ///
    /// The verb is checked before the parameters so an unknown verb and a
    /// malformed known verb report different codes.
    ///
    /// # Errors
    ///
    /// Returns a [`RequestError`] describing the failure; it already carries
    /// whatever `req_id` could be recovered from the frame.
    pub fn parse(line: &str) -> Result<Self, RequestError> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| RequestError::protocol(None, format!("invalid JSON: {e}")))?;
        let Value::Object(map) = value else {
            return Err(RequestError::protocol(
                None,
                "frame must be a JSON object".to_string(),
            ));
        };

        let req_id = match map.get("req_id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(RequestId::from_value(raw).ok_or_else(|| {
                RequestError::protocol(
                    None,
                    "req_id must be a string or a non-negative integer".to_string(),
                )
            })?),
        };

        let verb = match map.get("cmd") {
            Some(Value::String(verb)) => verb.clone(),
            Some(_) => {
                return Err(RequestError::protocol(
                    req_id,
                    "\"cmd\" must be a string".to_string(),
                ));
            }
            None => {
                return Err(RequestError::protocol(
                    req_id,
                    "missing \"cmd\" field".to_string(),
                ));
            }
        };

        if !Command::is_known_verb(&verb) {
            return Err(RequestError {
                verb: None,
                req_id,
                code: ErrorCode::UnknownCommand,
                message: format!("unknown command: {verb}"),
            });
        }

        let command = serde_json::from_value::<Command>(Value::Object(map)).map_err(|e| {
            RequestError {
                verb: Some(verb.clone()),
                req_id: req_id.clone(),
                code: ErrorCode::InvalidParams,
                message: format!("invalid parameters for {verb}: {e}"),
            }
        })?;

        Ok(Self { command, req_id })
    }
}

/// A frame that could not be turned into a [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub struct RequestError {
    /// Verb of the frame when it was recognized.
    pub verb: Option<String>,
    pub req_id: Option<RequestId>,
    pub code: ErrorCode,
    pub message: String,
}

impl RequestError {
    #[must_use]
    pub fn protocol(req_id: Option<RequestId>, message: String) -> Self {
        Self {
            verb: None,
            req_id,
            code: ErrorCode::ProtocolError,
            message,
        }
    }

    #[must_use]
    pub fn into_response(self) -> Response {
        let verb = self.verb.unwrap_or_else(|| ERROR_RESPONSE.to_string());
        Response::failure(verb, self.code, self.message).with_req_id(self.req_id)
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RequestError {}

/// Reply addressed to the client that sent a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req_id: Option<RequestId>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Response {
    #[must_use]
    pub fn ok(verb: impl Into<String>) -> Self {
        Self {
            response: verb.into(),
            req_id: None,
            success: true,
            message: None,
            code: None,
            data: Map::new(),
        }
    }

    #[must_use]
    pub fn failure(verb: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            response: verb.into(),
            req_id: None,
            success: false,
            message: Some(message.into()),
            code: Some(code),
            data: Map::new(),
        }
    }

    #[must_use]
    pub fn with_req_id(mut self, req_id: Option<RequestId>) -> Self {
        self.req_id = req_id;
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Add a payload field. Reserved envelope keys are never overwritten.
    #[must_use]
    pub fn with(mut self, key: &str, value: Value) -> Self {
        if !matches!(key, "response" | "req_id" | "success" | "message" | "code") {
            self.data.insert(key.to_string(), value);
        }
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// A broadcast notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub kind: EventKind,
    pub ts: f64,
}

impl Event {
    /// Stamp `kind` with the current wall-clock time.
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            ts: unix_timestamp(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    DeviceSelected {
        device: DeviceDescriptor,
    },
    DeviceCleared,
    DevicesChanged {
        devices: Vec<DeviceDescriptor>,
    },
    Connected {
        device: DeviceDescriptor,
    },
    Disconnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device: Option<DeviceDescriptor>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    EffectTriggered {
        cell: CellId,
        speed: Intensity,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        effect_name: Option<String>,
    },
    AllStopped,
    EffectStarted {
        effect_name: String,
        total_steps: usize,
    },
    EffectCompleted {
        effect_name: String,
    },
    ClientConnected {
        client_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_name: Option<String>,
    },
    ClientDisconnected {
        client_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_name: Option<String>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
}

impl EventKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeviceSelected { .. } => "device_selected",
            Self::DeviceCleared => "device_cleared",
            Self::DevicesChanged { .. } => "devices_changed",
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::EffectTriggered { .. } => "effect_triggered",
            Self::AllStopped => "all_stopped",
            Self::EffectStarted { .. } => "effect_started",
            Self::EffectCompleted { .. } => "effect_completed",
            Self::ClientConnected { .. } => "client_connected",
            Self::ClientDisconnected { .. } => "client_disconnected",
            Self::Error { .. } => "error",
        }
    }
}

/// Anything the daemon writes to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Response(Response),
    Event(Event),
}

impl Frame {
    /// Parse one outbound line as seen by a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is not JSON or matches neither shape.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(line)?;
        if value.get("event").is_some() {
            Ok(Frame::Event(serde_json::from_value(value)?))
        } else {
            Ok(Frame::Response(serde_json::from_value(value)?))
        }
    }
}

/// Seconds since the Unix epoch as a float.
#[must_use]
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
