//! Wire types exchanged between the RPC client and the execution host.
//!
//! Frames travel as JSON values: `{id, action, payload}` towards the host and
//! `{id, success, result?, error?, code?}` back. Decoding a frame into a
//! [`Message`] goes through [`Message::from_frame`], which reports malformed
//! frames as [`FrameError`] while keeping whatever id it could recover so the
//! host can still answer the right caller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::errors::{CODE_PROTOCOL_INVALID, CODE_RUNTIME_FAULT};
use crate::phase::CapabilityState;

/// Path → file content, as produced by an overlay provider.
pub type Overlay = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPayload {
    pub wasm_path: String,
    pub version: String,
    #[serde(default)]
    pub is_reader: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_path: Option<String>,
}

/// Result of a successful `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitOutcome {
    pub capability: CapabilityState,
    pub is_full_engine: bool,
}

impl From<CapabilityState> for InitOutcome {
    fn from(capability: CapabilityState) -> Self {
        Self {
            capability,
            is_full_engine: capability == CapabilityState::Full,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifyPayload {
    pub overlay: Overlay,
    #[serde(default)]
    pub entry_points: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatePayload {
    pub schema: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodePayload {
    pub code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Yaml,
    Cue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportPayload {
    pub code: String,
    pub format: ExportFormat,
}

/// The closed set of actions a host understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Init(InitPayload),
    Unify(UnifyPayload),
    Validate(ValidatePayload),
    Format(CodePayload),
    Parse(CodePayload),
    GetSymbols(CodePayload),
    Export(ExportPayload),
}

impl Action {
    /// Wire name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Init(_) => "init",
            Action::Unify(_) => "unify",
            Action::Validate(_) => "validate",
            Action::Format(_) => "format",
            Action::Parse(_) => "parse",
            Action::GetSymbols(_) => "getSymbols",
            Action::Export(_) => "export",
        }
    }

    fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Action::Init(p) => serde_json::to_value(p),
            Action::Unify(p) => serde_json::to_value(p),
            Action::Validate(p) => serde_json::to_value(p),
            Action::Format(p) | Action::Parse(p) | Action::GetSymbols(p) => {
                serde_json::to_value(p)
            }
            Action::Export(p) => serde_json::to_value(p),
        }
    }

    fn decode(name: &str, payload: Value) -> Result<Self, String> {
        fn typed<T: serde::de::DeserializeOwned>(name: &str, payload: Value) -> Result<T, String> {
            serde_json::from_value(payload).map_err(|e| format!("invalid {name} payload: {e}"))
        }
        match name {
            "init" => typed(name, payload).map(Action::Init),
            "unify" => typed(name, payload).map(Action::Unify),
            "validate" => typed(name, payload).map(Action::Validate),
            "format" => typed(name, payload).map(Action::Format),
            "parse" => typed(name, payload).map(Action::Parse),
            "getSymbols" => typed(name, payload).map(Action::GetSymbols),
            "export" => typed(name, payload).map(Action::Export),
            other => Err(format!("Unknown action: {other}")),
        }
    }
}

/// A request frame. Immutable once sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: u64,
    pub action: Action,
}

/// A frame the host could not turn into a [`Message`].
#[derive(Debug, Clone, PartialEq)]
pub struct FrameError {
    /// Request id, when the frame carried a usable one.
    pub id: Option<u64>,
    pub message: String,
}

impl Message {
    pub fn to_frame(&self) -> Result<Value, serde_json::Error> {
        Ok(json!({
            "id": self.id,
            "action": self.action.name(),
            "payload": self.action.payload()?,
        }))
    }

    pub fn from_frame(frame: Value) -> Result<Self, FrameError> {
        let Value::Object(mut obj) = frame else {
            return Err(FrameError {
                id: None,
                message: "frame must be a JSON object".into(),
            });
        };
        let id = obj.get("id").and_then(Value::as_u64);
        let fail = |message: String| FrameError { id, message };

        let Some(id) = id else {
            return Err(fail("frame is missing a numeric id".into()));
        };
        let name = match obj.remove("action") {
            Some(Value::String(s)) => s,
            _ => return Err(fail("frame is missing an action name".into())),
        };
        let payload = obj.remove("payload").unwrap_or_else(|| json!({}));
        let action = Action::decode(&name, payload).map_err(fail)?;
        Ok(Message { id, action })
    }
}

/// Exactly one per message id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Reply {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
            code: None,
        }
    }

    pub fn err(id: u64, code: &str, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(message.into()),
            code: Some(code.to_string()),
        }
    }

    pub fn protocol(id: u64, message: impl Into<String>) -> Self {
        Self::err(id, CODE_PROTOCOL_INVALID, message)
    }

    pub fn fault(id: u64, message: impl Into<String>) -> Self {
        Self::err(id, CODE_RUNTIME_FAULT, message)
    }
}

/// Structured diagnostic some engine errors carry as a JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl StructuredError {
    /// Parse an engine error string, falling back to the raw text as the message.
    pub fn parse(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|_| Self {
            message: raw.to_string(),
            line: None,
            column: None,
            file: None,
        })
    }
}

/// One entry of a `getSymbols` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub line: u32,
    pub column: u32,
}
