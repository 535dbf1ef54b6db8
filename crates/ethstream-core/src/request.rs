//! JSON-RPC 2.0 wire types, including `eth_subscription` notifications.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// The `"jsonrpc": "2.0"` marker. Rejects any other version on input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version;

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = String::deserialize(deserializer)?;
        if v == "2.0" {
            Ok(Version)
        } else {
            Err(de::Error::custom(format!("unsupported JSON-RPC version {v:?}")))
        }
    }
}

/// Request ID. Requests sent from here are always numbered; nodes may
/// answer malformed requests with a string or null ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl RpcId {
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => n.fmt(f),
            Self::String(s) => f.write_str(s),
            Self::Null => f.write_str("null"),
        }
    }
}

/// An outgoing call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Version,
    pub id: RpcId,
    pub method: String,
    pub params: Vec<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: Version,
            id: RpcId::Number(id),
            method: method.into(),
            params,
        }
    }
}

/// Error object returned by the node.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("code {code}: {message}")]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Reply to a [`JsonRpcRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Version,
    pub id: RpcId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RpcId, result: Value) -> Self {
        Self {
            jsonrpc: Version,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: Version,
            id,
            result: None,
            error: Some(error),
        }
    }

    /// The result value. A missing or `null` result comes back as `Value::Null`.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// `params` of an `eth_subscription` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionParams {
    pub subscription: String,
    pub result: Value,
}

/// Anything a node may push down a persistent connection.
#[derive(Debug, Clone)]
pub enum Incoming {
    Response(JsonRpcResponse),
    Notification(SubscriptionParams),
}

#[derive(Deserialize)]
struct RawNotification {
    method: String,
    params: SubscriptionParams,
}

impl Incoming {
    /// Classify one text frame. `None` for anything that is neither a
    /// response nor an `eth_subscription` notification.
    pub fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        if value.get("method").is_some() {
            let note: RawNotification = serde_json::from_value(value).ok()?;
            return (note.method == "eth_subscription").then_some(Self::Notification(note.params));
        }
        serde_json::from_value(value).ok().map(Self::Response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_carry_the_version_marker() {
        let req = JsonRpcRequest::new(7, "eth_getBlockByHash", vec![json!("0xab"), json!(true)]);
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v, json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "eth_getBlockByHash",
            "params": ["0xab", true]
        }));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let raw = r#"{"jsonrpc":"1.0","id":1,"result":"0x1"}"#;
        assert!(serde_json::from_str::<JsonRpcResponse>(raw).is_err());
    }

    #[test]
    fn null_result_reads_as_null() {
        let resp: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert_eq!(resp.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn error_objects_surface() {
        let resp = JsonRpcResponse::failure(
            RpcId::Number(1),
            JsonRpcError {
                code: -32601,
                message: "the method eth_subscribe does not exist".into(),
                data: None,
            },
        );
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, -32601);
        assert_eq!(err.to_string(), "code -32601: the method eth_subscribe does not exist");
    }

    #[test]
    fn incoming_frames_are_classified() {
        let note = r#"{"jsonrpc":"2.0","method":"eth_subscription","params":{"subscription":"0xfeed","result":{"number":"0x1"}}}"#;
        match Incoming::parse(note) {
            Some(Incoming::Notification(p)) => {
                assert_eq!(p.subscription, "0xfeed");
                assert_eq!(p.result["number"], "0x1");
            }
            other => panic!("unexpected {other:?}"),
        }

        let resp = r#"{"jsonrpc":"2.0","id":4,"result":"0xfeed"}"#;
        assert!(matches!(Incoming::parse(resp), Some(Incoming::Response(r)) if r.id == RpcId::Number(4)));

        assert!(Incoming::parse(r#"{"jsonrpc":"2.0","method":"parity_other","params":{"subscription":"0x1","result":null}}"#).is_none());
        assert!(Incoming::parse("not json").is_none());
    }

    #[test]
    fn string_ids_have_no_number() {
        assert_eq!(RpcId::String("abc".into()).as_number(), None);
        assert_eq!(RpcId::Number(3).as_number(), Some(3));
    }
}
