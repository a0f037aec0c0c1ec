//! # JSON-RPC-style envelope.
//!
//! Outgoing commands:
//! ```text
//! {"jsonrpc":"2.0","method":"set","params":{"param":"ZoneGain_0","val":-20.0},"id":7}\n
//! ```
//! Incoming messages are either responses (carry `id` plus `result` or `error`)
//! or push notifications (`"method":"update"`, no id) whose `params` is a single
//! `{param, val}` object or an array of them. Values may be keyed by `val`,
//! `pct` or `str` depending on the requested [`Format`].

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Protocol version carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Notification method used by the device for pushed values.
const UPDATE_METHOD: &str = "update";

/// Command verbs understood by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Read a parameter.
    Get,
    /// Write a parameter.
    Set,
    /// Subscribe to pushed updates of a parameter.
    Sub,
    /// Cancel a subscription.
    Unsub,
}

impl Method {
    /// Wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Set => "set",
            Method::Sub => "sub",
            Method::Unsub => "unsub",
        }
    }
}

/// Value representation requested from (or sent to) the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Native value (dB for gains and meters).
    #[default]
    Val,
    /// Percentage of the parameter range.
    Pct,
    /// Display string.
    Str,
}

impl Format {
    fn key(&self) -> &'static str {
        match self {
            Format::Val => "val",
            Format::Pct => "pct",
            Format::Str => "str",
        }
    }
}

/// Error object returned by the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("code {code}: {message}")]
pub struct RpcError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional vendor detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A pushed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamUpdate {
    /// Parameter key, e.g. `ZoneGain_0`.
    pub param: Arc<str>,
    /// New value.
    pub value: Value,
    /// Representation the value was delivered in.
    pub fmt: Format,
}

/// One outgoing command.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id.
    pub id: u64,
    /// Command verb.
    pub method: Method,
    /// Parameter key.
    pub param: Arc<str>,
    /// Value for `set`.
    pub value: Option<Value>,
    /// Requested representation.
    pub fmt: Option<Format>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    jsonrpc: &'static str,
    method: Method,
    params: Params<'a>,
    id: u64,
}

#[derive(Serialize)]
struct Params<'a> {
    param: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    val: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fmt: Option<Format>,
}

impl Request {
    /// Creates a request without value or format.
    pub fn new(id: u64, method: Method, param: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            method,
            param: param.into(),
            value: None,
            fmt: None,
        }
    }

    /// Attaches the value to write.
    #[inline]
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Attaches the requested representation.
    #[inline]
    pub fn with_format(mut self, fmt: Format) -> Self {
        self.fmt = Some(fmt);
        self
    }

    /// Serializes the request into one newline-terminated frame.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let envelope = Envelope {
            jsonrpc: JSONRPC_VERSION,
            method: self.method,
            params: Params {
                param: &self.param,
                val: self.value.as_ref(),
                fmt: self.fmt,
            },
            id: self.id,
        };
        let mut out = serde_json::to_vec(&envelope).map_err(|e| ProtocolError::Encode {
            reason: e.to_string(),
        })?;
        out.push(b'\n');
        Ok(Bytes::from(out))
    }
}

/// A decoded incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Reply to the request with the given id.
    Response {
        /// Correlation id.
        id: u64,
        /// `result` on success, `error` otherwise.
        outcome: Result<Value, RpcError>,
    },
    /// Pushed values for subscribed parameters.
    Updates(Vec<ParamUpdate>),
}

/// Decodes one frame (without its line terminator).
pub fn decode(frame: &[u8]) -> Result<Incoming, ProtocolError> {
    let text = std::str::from_utf8(frame).map_err(|_| ProtocolError::InvalidUtf8)?;
    let value: Value = serde_json::from_str(text).map_err(malformed)?;
    let Value::Object(mut obj) = value else {
        return Err(malformed("expected a JSON object"));
    };

    if let Some(method) = obj.get("method").and_then(Value::as_str) {
        if method != UPDATE_METHOD {
            return Err(malformed(format!("unsupported method `{method}`")));
        }
        let params = obj
            .remove("params")
            .ok_or_else(|| malformed("update without params"))?;
        return decode_updates(params).map(Incoming::Updates);
    }

    let id = obj.get("id").and_then(parse_id).ok_or(ProtocolError::MissingId)?;

    if let Some(err) = obj.remove("error").filter(|e| !e.is_null()) {
        let rpc: RpcError = serde_json::from_value(err).map_err(malformed)?;
        return Ok(Incoming::Response {
            id,
            outcome: Err(rpc),
        });
    }
    match obj.remove("result") {
        Some(result) => Ok(Incoming::Response {
            id,
            outcome: Ok(result),
        }),
        None => Err(malformed("response carries neither result nor error")),
    }
}

/// Decodes the `params` of an `update` notification.
pub fn decode_updates(params: Value) -> Result<Vec<ParamUpdate>, ProtocolError> {
    match params {
        Value::Object(map) => Ok(vec![update_entry(map)?]),
        Value::Array(items) if !items.is_empty() => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => update_entry(map),
                _ => Err(malformed("update entry is not an object")),
            })
            .collect(),
        _ => Err(malformed("update params must be an object or non-empty array")),
    }
}

/// Unwraps a response `result` into the parameter value.
///
/// Devices answer `get`/`set` with either a bare value, a `{param, val}` object,
/// or a one-element array of such objects. Anything else is returned unchanged.
pub fn result_value(result: Value) -> Value {
    match result {
        Value::Object(mut map) => match take_value(&mut map) {
            Some((value, _)) => value,
            None => Value::Object(map),
        },
        Value::Array(mut items) if items.len() == 1 && items[0].is_object() => {
            result_value(items.remove(0))
        }
        other => other,
    }
}

fn update_entry(mut map: Map<String, Value>) -> Result<ParamUpdate, ProtocolError> {
    let param: Arc<str> = match map.get("param").and_then(Value::as_str) {
        Some(p) if !p.is_empty() => Arc::from(p),
        _ => return Err(malformed("update entry without param")),
    };
    let (value, fmt) =
        take_value(&mut map).ok_or_else(|| malformed(format!("update for {param} has no value")))?;
    Ok(ParamUpdate { param, value, fmt })
}

fn take_value(map: &mut Map<String, Value>) -> Option<(Value, Format)> {
    [Format::Val, Format::Pct, Format::Str]
        .into_iter()
        .find_map(|fmt| map.remove(fmt.key()).map(|v| (v, fmt)))
}

fn parse_id(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn malformed(reason: impl ToString) -> ProtocolError {
    ProtocolError::Malformed {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_get_and_set() {
        let get = Request::new(1, Method::Get, "ZoneGain_0").with_format(Format::Val);
        assert_eq!(
            get.encode().unwrap(),
            Bytes::from_static(
                b"{\"jsonrpc\":\"2.0\",\"method\":\"get\",\"params\":{\"param\":\"ZoneGain_0\",\"fmt\":\"val\"},\"id\":1}\n"
            )
        );

        let set = Request::new(2, Method::Set, "ZoneMute_1").with_value(json!(1));
        let frame = set.encode().unwrap();
        assert!(frame.ends_with(b"\n"));
        let parsed: Value = serde_json::from_slice(&frame[..frame.len() - 1]).unwrap();
        assert_eq!(
            parsed,
            json!({"jsonrpc":"2.0","method":"set","params":{"param":"ZoneMute_1","val":1},"id":2})
        );
    }

    #[test]
    fn test_decode_result_and_error() {
        let ok = decode(br#"{"jsonrpc":"2.0","id":4,"result":{"param":"ZoneGain_0","val":-12.5}}"#)
            .unwrap();
        assert_eq!(
            ok,
            Incoming::Response {
                id: 4,
                outcome: Ok(json!({"param":"ZoneGain_0","val":-12.5}))
            }
        );

        let err =
            decode(br#"{"jsonrpc":"2.0","id":"5","error":{"code":-32602,"message":"bad param"}}"#)
                .unwrap();
        match err {
            Incoming::Response { id, outcome: Err(e) } => {
                assert_eq!(id, 5);
                assert_eq!(e.code, -32602);
                assert_eq!(e.message, "bad param");
            }
            other => panic!("unexpected {other:?}"),
        }

        let null_result = decode(br#"{"jsonrpc":"2.0","id":6,"result":null}"#).unwrap();
        assert_eq!(
            null_result,
            Incoming::Response {
                id: 6,
                outcome: Ok(Value::Null)
            }
        );
    }

    #[test]
    fn test_decode_updates() {
        let single =
            decode(br#"{"jsonrpc":"2.0","method":"update","params":{"param":"ZoneGain_0","val":-3}}"#)
                .unwrap();
        assert_eq!(
            single,
            Incoming::Updates(vec![ParamUpdate {
                param: Arc::from("ZoneGain_0"),
                value: json!(-3),
                fmt: Format::Val,
            }])
        );

        let many = decode(
            br#"{"jsonrpc":"2.0","method":"update","params":[{"param":"A","pct":50},{"param":"B","str":"-3.0dB"}]}"#,
        )
        .unwrap();
        let Incoming::Updates(items) = many else {
            panic!("expected updates");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].fmt, Format::Pct);
        assert_eq!(items[1].fmt, Format::Str);
        assert_eq!(items[1].value, json!("-3.0dB"));
    }

    #[test]
    fn test_decode_rejects_malformed_frames() {
        assert_eq!(decode(b"\xff\xfe"), Err(ProtocolError::InvalidUtf8));
        assert!(matches!(
            decode(b"}{garbage"),
            Err(ProtocolError::Malformed { .. })
        ));
        assert!(matches!(decode(b"[1,2]"), Err(ProtocolError::Malformed { .. })));
        assert_eq!(
            decode(br#"{"jsonrpc":"2.0","result":1}"#),
            Err(ProtocolError::MissingId)
        );
        assert!(matches!(
            decode(br#"{"jsonrpc":"2.0","id":1}"#),
            Err(ProtocolError::Malformed { .. })
        ));
        assert!(matches!(
            decode(br#"{"jsonrpc":"2.0","method":"reboot","params":{}}"#),
            Err(ProtocolError::Malformed { .. })
        ));
        assert!(matches!(
            decode(br#"{"jsonrpc":"2.0","method":"update","params":{"param":"X"}}"#),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_result_value_unwrapping() {
        assert_eq!(result_value(json!(-20.0)), json!(-20.0));
        assert_eq!(result_value(json!({"param":"Z","val":-6})), json!(-6));
        assert_eq!(result_value(json!([{"param":"Z","pct":40}])), json!(40));
        assert_eq!(result_value(json!({"ok":true})), json!({"ok":true}));
        assert_eq!(result_value(json!([1, 2])), json!([1, 2]));
    }
}
