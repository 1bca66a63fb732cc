//! JSON-RPC 2.0 Envelope Types
//!
//! Incoming messages are decoded into a generic [`Envelope`] whose `params`
//! stay raw until a handler claims them. Outgoing messages are the usual
//! response and notification shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;

use crate::error::DecodeError;

// ============================================================================
// Incoming
// ============================================================================

/// Decoded shape of one incoming message.
///
/// `params` is kept as the exact JSON text the peer sent.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(default)]
    pub params: Option<Box<RawValue>>,
    #[serde(default)]
    pub result: Option<Box<RawValue>>,
    #[serde(default)]
    pub error: Option<ResponseError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Notification,
    Response,
}

impl Envelope {
    /// Decode a frame body.
    ///
    /// Only JSON objects are accepted; an object with neither `method` nor
    /// `id` is rejected.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        if body.trim_ascii_start().first() != Some(&b'{') {
            return Err(DecodeError::NotAnObject);
        }

        let envelope: Self = serde_json::from_slice(body)?;
        if envelope.method.is_none() && envelope.id.is_none() {
            return Err(DecodeError::MissingMethod);
        }
        Ok(envelope)
    }

    pub fn kind(&self) -> MessageKind {
        match (&self.method, &self.id) {
            (Some(_), Some(_)) => MessageKind::Request,
            (Some(_), None) => MessageKind::Notification,
            (None, _) => MessageKind::Response,
        }
    }

    /// Raw parameter text, `None` when absent or `null`.
    pub fn raw_params(&self) -> Option<&RawValue> {
        self.params.as_deref()
    }
}

/// Request ID - can be number or string
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{:?}", s),
        }
    }
}

// ============================================================================
// Outgoing
// ============================================================================

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, error: ResponseError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// JSON-RPC 2.0 Notification (no id, no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Anything the server writes back to the peer.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outgoing {
    Response(Response),
    Notification(Notification),
}

impl From<Response> for Outgoing {
    fn from(response: Response) -> Self {
        Outgoing::Response(response)
    }
}

impl From<Notification> for Outgoing {
    fn from(notification: Notification) -> Self {
        Outgoing::Notification(notification)
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        )
    }

    pub fn invalid_params(msg: &str) -> Self {
        Self::new(
            error_codes::INVALID_PARAMS,
            format!("Invalid params: {}", msg),
        )
    }

    pub fn internal_error(msg: &str) -> Self {
        Self::new(
            error_codes::INTERNAL_ERROR,
            format!("Internal error: {}", msg),
        )
    }

    pub fn request_cancelled() -> Self {
        Self::new(error_codes::REQUEST_CANCELLED, "Request cancelled")
    }
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ResponseError {}

/// Standard JSON-RPC error codes
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    // LSP-specific error codes
    pub const SERVER_NOT_INITIALIZED: i32 = -32002;
    pub const REQUEST_CANCELLED: i32 = -32800;
    pub const CONTENT_MODIFIED: i32 = -32801;
}

/// Methods the transport core itself understands.
pub mod methods {
    pub const CANCEL_REQUEST: &str = "$/cancelRequest";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_notification() {
        let env = Envelope::decode(br#"{"method":"ping"}"#).unwrap();
        assert_eq!(env.method.as_deref(), Some("ping"));
        assert!(env.id.is_none());
        assert!(env.raw_params().is_none());
        assert_eq!(env.kind(), MessageKind::Notification);
    }

    #[test]
    fn test_decode_request_with_string_id() {
        let env =
            Envelope::decode(br#"{"jsonrpc":"2.0","id":"abc","method":"initialize"}"#).unwrap();
        assert_eq!(env.id, Some(RequestId::String("abc".to_string())));
        assert_eq!(env.kind(), MessageKind::Request);
    }

    #[test]
    fn test_params_are_kept_verbatim() {
        let body = br#"{"id":1,"method":"m","params":{ "b" : [1, 2.50, "x"],"a":null }}"#;
        let env = Envelope::decode(body).unwrap();
        assert_eq!(
            env.raw_params().map(RawValue::get),
            Some(r#"{ "b" : [1, 2.50, "x"],"a":null }"#)
        );
    }

    #[test]
    fn test_null_id_is_a_notification() {
        let env = Envelope::decode(br#"{"id":null,"method":"m"}"#).unwrap();
        assert_eq!(env.kind(), MessageKind::Notification);
    }

    #[test]
    fn test_response_from_peer() {
        let env = Envelope::decode(br#"{"jsonrpc":"2.0","id":7,"result":null}"#).unwrap();
        assert_eq!(env.kind(), MessageKind::Response);
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        assert!(matches!(
            Envelope::decode(br#"["2.0","ping"]"#),
            Err(DecodeError::NotAnObject)
        ));
        assert!(matches!(
            Envelope::decode(b""),
            Err(DecodeError::NotAnObject)
        ));
    }

    #[test]
    fn test_decode_rejects_missing_method() {
        assert!(matches!(
            Envelope::decode(br#"{"params":{}}"#),
            Err(DecodeError::MissingMethod)
        ));
    }

    #[test]
    fn test_decode_rejects_bad_json() {
        assert!(matches!(
            Envelope::decode(br#"{"method":"ping""#),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            Envelope::decode(br#"{"method":42}"#),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn test_success_response_serializes_null_result() {
        let resp = Response::success(RequestId::Number(1), Value::Null);
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"jsonrpc":"2.0","id":1,"result":null}"#);
    }

    #[test]
    fn test_error_response() {
        let resp = Response::error(
            RequestId::Number(1),
            ResponseError::method_not_found("unknown"),
        );
        assert!(!resp.is_success());
        let json = serde_json::to_string(&Outgoing::from(resp)).unwrap();
        assert!(json.contains("\"code\":-32601"));
        assert!(!json.contains("\"result\""));
    }

    #[test]
    fn test_notification_serialization() {
        let n = Notification::new("window/logMessage", Some(serde_json::json!({"type": 3})));
        let json = serde_json::to_string(&Outgoing::from(n)).unwrap();
        assert!(json.contains("\"method\":\"window/logMessage\""));
        assert!(!json.contains("\"id\""));
    }
}
