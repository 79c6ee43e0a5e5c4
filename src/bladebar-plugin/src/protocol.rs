//! Wire protocol between the panel and its plugin wrappers.
//!
//! Every frame is a single JSON document holding one [`Message`]. The set of
//! message kinds is closed: anything that does not decode into one of the four
//! variants is rejected, as is a property whose value type does not match its
//! kind.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// API version appended to the wrapper's `argv[0]`.
pub const API_VERSION: &str = "2.0";

/// Errors from encoding or decoding protocol frames.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CodecError {
    #[error("cannot encode {kind}: expected a {expected} value, got {found}")]
    TypeMismatch {
        kind: PropertyKind,
        expected: ValueType,
        found: ValueType,
    },
    #[error("cannot encode {kind}: value is not a finite number")]
    NotFinite { kind: PropertyKind },
    #[error("failed to encode message: {0}")]
    Encoding(String),
    #[error("failed to decode message: {0}")]
    Decoding(String),
}

/// A typed value carried by a property or a remote event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Uchar(u8),
    Int(i32),
    Uint(u32),
    Bool(bool),
    Double(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Uchar,
    Int,
    Uint,
    Bool,
    Double,
    String,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Uchar => "uchar",
            ValueType::Int => "int",
            ValueType::Uint => "uint",
            ValueType::Bool => "bool",
            ValueType::Double => "double",
            ValueType::String => "string",
        };
        f.write_str(name)
    }
}

impl Value {
    /// Stand-in sent when there is nothing to send; the transport always needs a value.
    pub const PLACEHOLDER: Value = Value::Uchar(0);

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Uchar(_) => ValueType::Uchar,
            Value::Int(_) => ValueType::Int,
            Value::Uint(_) => ValueType::Uint,
            Value::Bool(_) => ValueType::Bool,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Value::Uchar(0))
    }

    /// Wire value for an optional payload.
    pub fn from_payload(payload: Option<Value>) -> Value {
        payload.unwrap_or(Value::PLACEHOLDER)
    }

    /// Strip the placeholder back to "no payload".
    pub fn into_payload(self) -> Option<Value> {
        if self.is_placeholder() {
            None
        } else {
            Some(self)
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }
}

/// Property and action kinds understood by a wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyKind {
    SetSize,
    SetMode,
    SetScreenPosition,
    SetNrows,
    SetLocked,
    SetSensitive,
    SetBackgroundAlpha,
    SetBackgroundColor,
    SetBackgroundImage,
    ActionBackgroundUnset,
    ActionRemoved,
    ActionSave,
    ActionQuit,
    ActionQuitForRestart,
    ActionShowConfigure,
    ActionShowAbout,
    ActionAskRemove,
}

impl PropertyKind {
    /// Value type a property of this kind must carry. Actions carry the placeholder.
    pub fn expected_type(&self) -> ValueType {
        match self {
            PropertyKind::SetSize
            | PropertyKind::SetMode
            | PropertyKind::SetScreenPosition
            | PropertyKind::SetNrows => ValueType::Int,
            PropertyKind::SetLocked | PropertyKind::SetSensitive => ValueType::Bool,
            PropertyKind::SetBackgroundAlpha => ValueType::Double,
            PropertyKind::SetBackgroundColor | PropertyKind::SetBackgroundImage => {
                ValueType::String
            }
            PropertyKind::ActionBackgroundUnset
            | PropertyKind::ActionRemoved
            | PropertyKind::ActionSave
            | PropertyKind::ActionQuit
            | PropertyKind::ActionQuitForRestart
            | PropertyKind::ActionShowConfigure
            | PropertyKind::ActionShowAbout
            | PropertyKind::ActionAskRemove => ValueType::Uchar,
        }
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // kebab-case name, same as on the wire
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{self:?}"));
        f.write_str(&name)
    }
}

/// One entry of a property push, already checked against its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SetEntry", into = "SetEntry")]
pub enum Property {
    Size(i32),
    Mode(i32),
    ScreenPosition(i32),
    Nrows(i32),
    Locked(bool),
    Sensitive(bool),
    BackgroundAlpha(f64),
    BackgroundColor(String),
    BackgroundImage(String),
    BackgroundUnset,
    Removed,
    Save,
    Quit,
    QuitForRestart,
    ShowConfigure,
    ShowAbout,
    AskRemove,
}

/// Untyped `(kind, value)` pair as it travels on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SetEntry {
    kind: PropertyKind,
    value: Value,
}

impl Property {
    /// Build a property from a kind and a runtime-typed value.
    pub fn new(kind: PropertyKind, value: Value) -> Result<Self, CodecError> {
        let expected = kind.expected_type();
        let found = value.value_type();
        if expected != found {
            return Err(CodecError::TypeMismatch {
                kind,
                expected,
                found,
            });
        }

        let property = match (kind, value) {
            (PropertyKind::SetSize, Value::Int(v)) => Property::Size(v),
            (PropertyKind::SetMode, Value::Int(v)) => Property::Mode(v),
            (PropertyKind::SetScreenPosition, Value::Int(v)) => Property::ScreenPosition(v),
            (PropertyKind::SetNrows, Value::Int(v)) => Property::Nrows(v),
            (PropertyKind::SetLocked, Value::Bool(v)) => Property::Locked(v),
            (PropertyKind::SetSensitive, Value::Bool(v)) => Property::Sensitive(v),
            (PropertyKind::SetBackgroundAlpha, Value::Double(v)) => {
                if !v.is_finite() {
                    return Err(CodecError::NotFinite { kind });
                }
                Property::BackgroundAlpha(v)
            }
            (PropertyKind::SetBackgroundColor, Value::String(v)) => Property::BackgroundColor(v),
            (PropertyKind::SetBackgroundImage, Value::String(v)) => Property::BackgroundImage(v),
            (PropertyKind::ActionBackgroundUnset, _) => Property::BackgroundUnset,
            (PropertyKind::ActionRemoved, _) => Property::Removed,
            (PropertyKind::ActionSave, _) => Property::Save,
            (PropertyKind::ActionQuit, _) => Property::Quit,
            (PropertyKind::ActionQuitForRestart, _) => Property::QuitForRestart,
            (PropertyKind::ActionShowConfigure, _) => Property::ShowConfigure,
            (PropertyKind::ActionShowAbout, _) => Property::ShowAbout,
            (PropertyKind::ActionAskRemove, _) => Property::AskRemove,
            (kind, value) => {
                return Err(CodecError::TypeMismatch {
                    kind,
                    expected,
                    found: value.value_type(),
                })
            }
        };
        Ok(property)
    }

    pub fn kind(&self) -> PropertyKind {
        match self {
            Property::Size(_) => PropertyKind::SetSize,
            Property::Mode(_) => PropertyKind::SetMode,
            Property::ScreenPosition(_) => PropertyKind::SetScreenPosition,
            Property::Nrows(_) => PropertyKind::SetNrows,
            Property::Locked(_) => PropertyKind::SetLocked,
            Property::Sensitive(_) => PropertyKind::SetSensitive,
            Property::BackgroundAlpha(_) => PropertyKind::SetBackgroundAlpha,
            Property::BackgroundColor(_) => PropertyKind::SetBackgroundColor,
            Property::BackgroundImage(_) => PropertyKind::SetBackgroundImage,
            Property::BackgroundUnset => PropertyKind::ActionBackgroundUnset,
            Property::Removed => PropertyKind::ActionRemoved,
            Property::Save => PropertyKind::ActionSave,
            Property::Quit => PropertyKind::ActionQuit,
            Property::QuitForRestart => PropertyKind::ActionQuitForRestart,
            Property::ShowConfigure => PropertyKind::ActionShowConfigure,
            Property::ShowAbout => PropertyKind::ActionShowAbout,
            Property::AskRemove => PropertyKind::ActionAskRemove,
        }
    }

    pub fn value(&self) -> Value {
        match self {
            Property::Size(v)
            | Property::Mode(v)
            | Property::ScreenPosition(v)
            | Property::Nrows(v) => Value::Int(*v),
            Property::Locked(v) | Property::Sensitive(v) => Value::Bool(*v),
            Property::BackgroundAlpha(v) => Value::Double(*v),
            Property::BackgroundColor(v) | Property::BackgroundImage(v) => {
                Value::String(v.clone())
            }
            _ => Value::PLACEHOLDER,
        }
    }
}

impl TryFrom<SetEntry> for Property {
    type Error = CodecError;

    fn try_from(entry: SetEntry) -> Result<Self, Self::Error> {
        Property::new(entry.kind, entry.value)
    }
}

impl From<Property> for SetEntry {
    fn from(property: Property) -> Self {
        SetEntry {
            kind: property.kind(),
            value: property.value(),
        }
    }
}

/// Signals a plugin raises toward the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderSignal {
    MovePlugin,
    ExpandPlugin,
    CollapsePlugin,
    SmallPlugin,
    UnsmallPlugin,
    LockPanel,
    UnlockPanel,
    RemovePlugin,
    AddNewItems,
    PanelPreferences,
    PanelLogout,
    PanelAbout,
    PanelHelp,
    ShowConfigure,
    ShowAbout,
    FocusPlugin,
    ShrinkPlugin,
    UnshrinkPlugin,
}

/// A frame exchanged between the panel and a wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum Message {
    /// Ordered property batch, panel to wrapper.
    Set(Vec<Property>),
    /// Named event with a value (placeholder when empty) and a correlation handle.
    RemoteEvent {
        name: String,
        value: Value,
        handle: u32,
    },
    /// Outcome of the remote event carrying the same handle.
    RemoteEventResult { handle: u32, result: bool },
    /// Provider signal, wrapper to panel.
    ProviderSignal { signal: ProviderSignal },
}

impl Message {
    pub fn remote_event(name: impl Into<String>, payload: Option<Value>, handle: u32) -> Self {
        Message::RemoteEvent {
            name: name.into(),
            value: Value::from_payload(payload),
            handle,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|err| CodecError::Encoding(err.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes)
            .map_err(|err| CodecError::Decoding(err.to_string()))
    }
}

/// Encode a single property as a one-entry `Set` frame.
pub fn encode(kind: PropertyKind, value: Value) -> Result<Vec<u8>, CodecError> {
    Message::Set(vec![Property::new(kind, value)?]).encode()
}

/// Decode one frame.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    Message::decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_batch_serializes_as_kind_value_pairs() {
        let msg = Message::Set(vec![Property::Size(30), Property::Quit]);
        let json = String::from_utf8(msg.encode().unwrap()).unwrap();
        assert!(json.contains("\"type\":\"Set\""));
        assert!(json.contains(r#"{"kind":"set-size","value":{"type":"int","value":30}}"#));
        assert!(json.contains(r#"{"kind":"action-quit","value":{"type":"uchar","value":0}}"#));
    }

    #[test]
    fn batch_order_survives_decoding() {
        let batch = vec![
            Property::Size(30),
            Property::Mode(0),
            Property::BackgroundColor("#336699".into()),
            Property::Save,
        ];
        let bytes = Message::Set(batch.clone()).encode().unwrap();
        assert_eq!(decode(&bytes).unwrap(), Message::Set(batch));
    }

    #[test]
    fn encode_rejects_mismatched_value() {
        let err = encode(PropertyKind::SetSize, Value::String("30".into())).unwrap_err();
        assert_eq!(
            err,
            CodecError::TypeMismatch {
                kind: PropertyKind::SetSize,
                expected: ValueType::Int,
                found: ValueType::String,
            }
        );
        assert!(err.to_string().contains("set-size"));
    }

    #[test]
    fn encode_rejects_non_finite_alpha() {
        let err = encode(PropertyKind::SetBackgroundAlpha, Value::Double(f64::NAN)).unwrap_err();
        assert!(matches!(err, CodecError::NotFinite { .. }));
    }

    #[test]
    fn decode_rejects_mismatched_value() {
        let json = r#"{"type":"Set","params":[{"kind":"set-locked","value":{"type":"int","value":1}}]}"#;
        assert!(matches!(
            decode(json.as_bytes()),
            Err(CodecError::Decoding(_))
        ));
    }

    #[test]
    fn decode_rejects_unknown_message_kind() {
        let json = r#"{"type":"Handshake","params":{"version":2}}"#;
        assert!(matches!(
            decode(json.as_bytes()),
            Err(CodecError::Decoding(_))
        ));
    }

    #[test]
    fn decode_rejects_unknown_property_kind() {
        let json = r#"{"type":"Set","params":[{"kind":"set-opacity","value":{"type":"double","value":0.5}}]}"#;
        assert!(matches!(
            decode(json.as_bytes()),
            Err(CodecError::Decoding(_))
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode(b"{not json"), Err(CodecError::Decoding(_))));
    }

    #[test]
    fn empty_payload_round_trips_as_absent() {
        let bytes = Message::remote_event("refresh", None, 4).encode().unwrap();
        match decode(&bytes).unwrap() {
            Message::RemoteEvent {
                name,
                value,
                handle,
            } => {
                assert_eq!(name, "refresh");
                assert_eq!(handle, 4);
                assert_eq!(value, Value::PLACEHOLDER);
                assert_eq!(value.into_payload(), None);
            }
            other => panic!("expected RemoteEvent, got {other:?}"),
        }
    }

    #[test]
    fn present_payload_is_kept() {
        let payload = Some(Value::String("%H:%M".into()));
        let bytes = Message::remote_event("set-format", payload.clone(), 9)
            .encode()
            .unwrap();
        match decode(&bytes).unwrap() {
            Message::RemoteEvent { value, .. } => assert_eq!(value.into_payload(), payload),
            other => panic!("expected RemoteEvent, got {other:?}"),
        }
    }

    #[test]
    fn provider_signal_uses_kebab_case() {
        let msg = Message::ProviderSignal {
            signal: ProviderSignal::ShowConfigure,
        };
        let json = String::from_utf8(msg.encode().unwrap()).unwrap();
        assert!(json.contains("\"show-configure\""));
    }

    #[test]
    fn actions_expect_placeholder() {
        assert_eq!(PropertyKind::ActionQuit.expected_type(), ValueType::Uchar);
        assert_eq!(
            Property::new(PropertyKind::ActionQuitForRestart, Value::PLACEHOLDER).unwrap(),
            Property::QuitForRestart
        );
        assert!(Property::new(PropertyKind::ActionSave, Value::Bool(true)).is_err());
    }
}
