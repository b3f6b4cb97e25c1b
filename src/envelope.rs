//! Telemetry envelopes exchanged between pipeline processes and the dashboard.
//!
//! The wire shape is a JSON object with a `type` discriminant, four
//! identifying strings, and a `payload` whose variant follows the
//! discriminant. [`EnvelopeSubmission`] holds exactly what arrived;
//! [`Envelope`] only exists once the discriminant/payload pairing has been
//! checked, so downstream code never sees a mismatched pair.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field {field:?} must be a string, got {got}")]
    NonStringField { field: &'static str, got: &'static str },

    #[error("Unrecognized envelope type: {0:?}")]
    UnknownKind(String),

    #[error("Unexpected field: {0:?}")]
    UnexpectedField(String),

    #[error("Payload does not fit a {kind} envelope: {reason}")]
    PayloadMismatch { kind: EnvelopeKind, reason: String },

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Discriminant of a telemetry envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Describes the sender's processing graph; registers the sender with
    /// the relay.
    Pipeline,
    /// Reports a failure inside the sender.
    Error,
    /// Tells the receiver to discard accumulated state for this sender.
    Reset,
    /// Reports progress or liveness.
    Status,
}

impl EnvelopeKind {
    pub const ALL: [EnvelopeKind; 4] = [
        EnvelopeKind::Pipeline,
        EnvelopeKind::Error,
        EnvelopeKind::Reset,
        EnvelopeKind::Status,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Pipeline => "pipeline",
            EnvelopeKind::Error => "error",
            EnvelopeKind::Reset => "reset",
            EnvelopeKind::Status => "status",
        }
    }

    /// Whether envelopes of this kind must carry a payload object.
    pub fn carries_payload(&self) -> bool {
        !matches!(self, EnvelopeKind::Reset)
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvelopeKind {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pipeline" => Ok(EnvelopeKind::Pipeline),
            "error" => Ok(EnvelopeKind::Error),
            "reset" => Ok(EnvelopeKind::Reset),
            "status" => Ok(EnvelopeKind::Status),
            other => Err(EnvelopeError::UnknownKind(other.to_string())),
        }
    }
}

/// Envelope content, one variant per payload-carrying discriminant.
///
/// Payload internals are producer-defined, so each variant wraps an
/// arbitrary JSON object rather than a fixed struct.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Graph(Value),
    Status(Value),
    Error(Value),
}

impl Payload {
    /// The discriminant this payload variant pairs with.
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Payload::Graph(_) => EnvelopeKind::Pipeline,
            Payload::Status(_) => EnvelopeKind::Status,
            Payload::Error(_) => EnvelopeKind::Error,
        }
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Payload::Graph(_) => "graph",
            Payload::Status(_) => "status",
            Payload::Error(_) => "error",
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Payload::Graph(value) | Payload::Status(value) | Payload::Error(value) => value,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Payload::Graph(value) | Payload::Status(value) | Payload::Error(value) => value,
        }
    }
}

/// A validated telemetry envelope.
///
/// Instances only exist with a payload variant matching the discriminant.
/// Construct one through the per-kind constructors, [`Envelope::new`], or
/// [`EnvelopeSubmission::validate`]; deserialization runs the same checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    kind: EnvelopeKind,
    name: String,
    id: String,
    uuid: String,
    source_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Payload>,
}

impl Envelope {
    /// Checked general constructor. The payload variant must pair with
    /// `kind` and its value must be a JSON object; `reset` takes `None`.
    pub fn new(
        kind: EnvelopeKind,
        name: impl Into<String>,
        id: impl Into<String>,
        uuid: impl Into<String>,
        source_type: impl Into<String>,
        payload: Option<Payload>,
    ) -> Result<Self, EnvelopeError> {
        match (&payload, kind.carries_payload()) {
            (None, false) => {}
            (None, true) => {
                return Err(EnvelopeError::PayloadMismatch {
                    kind,
                    reason: format!("a {kind} envelope requires a payload object"),
                })
            }
            (Some(_), false) => {
                return Err(EnvelopeError::PayloadMismatch {
                    kind,
                    reason: "reset envelopes carry no payload".to_string(),
                })
            }
            (Some(p), true) if p.kind() != kind => {
                return Err(EnvelopeError::PayloadMismatch {
                    kind,
                    reason: format!("a {kind} envelope cannot carry a {} payload", p.variant_name()),
                })
            }
            (Some(p), true) if !p.value().is_object() => {
                return Err(EnvelopeError::PayloadMismatch {
                    kind,
                    reason: format!(
                        "payload must be a JSON object, got {}",
                        json_type_name(p.value())
                    ),
                })
            }
            (Some(_), true) => {}
        }

        Ok(Self {
            kind,
            name: name.into(),
            id: id.into(),
            uuid: uuid.into(),
            source_type: source_type.into(),
            payload,
        })
    }

    /// Build a `pipeline` envelope around a graph object.
    pub fn pipeline(
        name: impl Into<String>,
        id: impl Into<String>,
        uuid: impl Into<String>,
        source_type: impl Into<String>,
        graph: Value,
    ) -> Result<Self, EnvelopeError> {
        Self::new(
            EnvelopeKind::Pipeline,
            name,
            id,
            uuid,
            source_type,
            Some(Payload::Graph(graph)),
        )
    }

    /// Build a `status` envelope around a status object.
    pub fn status(
        name: impl Into<String>,
        id: impl Into<String>,
        uuid: impl Into<String>,
        source_type: impl Into<String>,
        status: Value,
    ) -> Result<Self, EnvelopeError> {
        Self::new(
            EnvelopeKind::Status,
            name,
            id,
            uuid,
            source_type,
            Some(Payload::Status(status)),
        )
    }

    /// Build an `error` envelope around an error object.
    pub fn error(
        name: impl Into<String>,
        id: impl Into<String>,
        uuid: impl Into<String>,
        source_type: impl Into<String>,
        error: Value,
    ) -> Result<Self, EnvelopeError> {
        Self::new(
            EnvelopeKind::Error,
            name,
            id,
            uuid,
            source_type,
            Some(Payload::Error(error)),
        )
    }

    /// Build a `reset` envelope. Reset carries no payload, so this cannot
    /// fail.
    pub fn reset(
        name: impl Into<String>,
        id: impl Into<String>,
        uuid: impl Into<String>,
        source_type: impl Into<String>,
    ) -> Self {
        Self {
            kind: EnvelopeKind::Reset,
            name: name.into(),
            id: id.into(),
            uuid: uuid.into(),
            source_type: source_type.into(),
            payload: None,
        }
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn payload_value(&self) -> Option<&Value> {
        self.payload.as_ref().map(Payload::value)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let submission = EnvelopeSubmission::deserialize(deserializer)?;
        submission.validate().map_err(serde::de::Error::custom)
    }
}

/// The envelope exactly as submitted on the wire, before validation.
///
/// Every field is optional and nothing is defaulted in: absent keys (and
/// JSON `null`) stay unset, recognized keys hold whatever JSON value
/// arrived (an ill-typed `"name": 42` is captured, not refused), and keys
/// outside the recognized set are kept verbatim in `extra`. Turning a
/// submission into an [`Envelope`] goes through
/// [`EnvelopeSubmission::validate`], which is where narrowing happens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeSubmission {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EnvelopeSubmission {
    /// Read a submission out of loose JSON.
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Parse a submission from raw bytes as received off the wire.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Check the submission and narrow it into an [`Envelope`].
    ///
    /// The five scalar fields must be present as JSON strings, the
    /// discriminant must be one of the four known names, no unknown fields
    /// may remain, and the payload must pair with the discriminant. The
    /// first violation found is returned; nothing is repaired or defaulted.
    pub fn validate(self) -> Result<Envelope, EnvelopeError> {
        if let Some(key) = self.extra.keys().next() {
            return Err(EnvelopeError::UnexpectedField(key.clone()));
        }

        let kind: EnvelopeKind = require_string("type", self.kind)?.parse()?;
        let name = require_string("name", self.name)?;
        let id = require_string("id", self.id)?;
        let uuid = require_string("uuid", self.uuid)?;
        let source_type = require_string("source_type", self.source_type)?;

        let payload = match kind {
            EnvelopeKind::Reset => match self.payload {
                None | Some(Value::Null) => None,
                Some(_) => {
                    return Err(EnvelopeError::PayloadMismatch {
                        kind,
                        reason: "reset envelopes carry no payload".to_string(),
                    })
                }
            },
            EnvelopeKind::Pipeline => Some(Payload::Graph(require_object(kind, self.payload)?)),
            EnvelopeKind::Status => Some(Payload::Status(require_object(kind, self.payload)?)),
            EnvelopeKind::Error => Some(Payload::Error(require_object(kind, self.payload)?)),
        };

        Ok(Envelope {
            kind,
            name,
            id,
            uuid,
            source_type,
            payload,
        })
    }
}

fn require_string(field: &'static str, value: Option<Value>) -> Result<String, EnvelopeError> {
    match value {
        None | Some(Value::Null) => Err(EnvelopeError::MissingField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(EnvelopeError::NonStringField {
            field,
            got: json_type_name(&other),
        }),
    }
}

fn require_object(kind: EnvelopeKind, payload: Option<Value>) -> Result<Value, EnvelopeError> {
    let value = match payload {
        None | Some(Value::Null) => {
            return Err(EnvelopeError::PayloadMismatch {
                kind,
                reason: format!("a {kind} envelope requires a payload object"),
            })
        }
        Some(value) => value,
    };
    if !value.is_object() {
        return Err(EnvelopeError::PayloadMismatch {
            kind,
            reason: format!("payload must be a JSON object, got {}", json_type_name(&value)),
        });
    }
    Ok(value)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
