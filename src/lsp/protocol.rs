//! JSON-RPC 2.0 message types
//!
//! The three message shapes exchanged with a language server, plus the
//! `Message` union the codec produces. Shapes are told apart by which of
//! `id` and `method` are present.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// JSON-RPC 2.0 Constants
// ============================================================================

/// JSON-RPC 2.0 version identifier
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 error codes
/// https://www.jsonrpc.org/specification#error_object
#[allow(dead_code)]
pub mod error_codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i32 = -32700;

    /// The JSON sent is not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;

    /// The method does not exist / is not available
    pub const METHOD_NOT_FOUND: i32 = -32601;

    /// Invalid method parameter(s)
    pub const INVALID_PARAMS: i32 = -32602;

    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ============================================================================
// Message Types
// ============================================================================

/// Request identifier; peers may use numbers or strings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

/// JSON-RPC 2.0 request message (a call expecting a response)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier
    pub id: RequestId,

    /// Method name
    pub method: String,

    /// Optional parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Identifier of the request being answered; null only for errors that
    /// could not be tied to a request
    #[serde(default)]
    pub id: Option<RequestId>,

    /// Result (present if successful)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error (present if failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    /// Create a successful response
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: RequestId, code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: None,
            error: Some(JsonRpcErrorObject {
                code,
                message: message.into(),
                data,
            }),
        }
    }

    /// Create a "method not found" error response
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::error(
            id,
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
            None,
        )
    }
}

/// JSON-RPC 2.0 notification message (no response expected)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Method name
    pub method: String,

    /// Optional parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    /// Error code
    pub code: i32,

    /// Error message
    pub message: String,

    /// Optional additional data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ============================================================================
// Message Union
// ============================================================================

/// Any message on the wire
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// Has both `id` and `method`
    Call(JsonRpcRequest),
    /// Has `id` but no `method`
    Response(JsonRpcResponse),
    /// Has `method` but no `id`
    Notification(JsonRpcNotification),
}

/// Why a JSON value could not be turned into a `Message`
#[derive(Debug, thiserror::Error)]
pub enum MessageShapeError {
    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("message has neither 'id' nor 'method'")]
    Unrecognized,

    #[error("malformed {kind}: {source}")]
    Malformed {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl Message {
    /// Classify a decoded JSON body by the presence of `id` and `method`
    pub fn from_value(value: Value) -> Result<Self, MessageShapeError> {
        let object: &Map<String, Value> = value.as_object().ok_or(MessageShapeError::NotAnObject)?;
        let has_id = object.contains_key("id");
        let has_method = object.contains_key("method");

        let malformed = |kind| move |source| MessageShapeError::Malformed { kind, source };

        match (has_id, has_method) {
            (true, true) => serde_json::from_value(value)
                .map(Message::Call)
                .map_err(malformed("call")),
            (true, false) => serde_json::from_value(value)
                .map(Message::Response)
                .map_err(malformed("response")),
            (false, true) => serde_json::from_value(value)
                .map(Message::Notification)
                .map_err(malformed("notification")),
            (false, false) => Err(MessageShapeError::Unrecognized),
        }
    }

    /// Method name, if the message carries one
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Call(request) => Some(&request.method),
            Message::Notification(notification) => Some(&notification.method),
            Message::Response(_) => None,
        }
    }

    /// Identifier, if the message carries one
    #[allow(dead_code)]
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Message::Call(request) => Some(&request.id),
            Message::Response(response) => response.id.as_ref(),
            Message::Notification(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classifies_by_field_presence() {
        let call = Message::from_value(json!({
            "jsonrpc": "2.0", "id": 7, "method": "workspace/configuration", "params": {"items": []}
        }))
        .unwrap();
        assert!(matches!(call, Message::Call(ref r) if r.id == RequestId::Number(7)));

        let response =
            Message::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": null})).unwrap();
        assert!(matches!(response, Message::Response(ref r) if r.id == Some(RequestId::Number(1))));

        let notification = Message::from_value(json!({
            "jsonrpc": "2.0", "method": "window/showMessage", "params": {"type": 3, "message": "hi"}
        }))
        .unwrap();
        assert_eq!(notification.method(), Some("window/showMessage"));
        assert!(notification.id().is_none());
    }

    #[test]
    fn test_string_ids_are_accepted() {
        let call = Message::from_value(json!({
            "jsonrpc": "2.0", "id": "abc", "method": "client/registerCapability"
        }))
        .unwrap();
        assert_eq!(call.id(), Some(&RequestId::String("abc".to_string())));
    }

    #[test]
    fn test_rejects_unrecognized_shapes() {
        assert!(matches!(
            Message::from_value(json!([1, 2, 3])),
            Err(MessageShapeError::NotAnObject)
        ));
        assert!(matches!(
            Message::from_value(json!({"jsonrpc": "2.0", "params": {}})),
            Err(MessageShapeError::Unrecognized)
        ));
        assert!(matches!(
            Message::from_value(json!({"jsonrpc": "2.0", "method": 42})),
            Err(MessageShapeError::Malformed { kind: "notification", .. })
        ));
    }

    #[test]
    fn test_error_response_builders() {
        let response = JsonRpcResponse::method_not_found(RequestId::Number(3), "foo/bar");
        let error = response.error.unwrap();
        assert_eq!(error.code, error_codes::METHOD_NOT_FOUND);
        assert_eq!(error.message, "Method not found: foo/bar");
        assert!(response.result.is_none());
    }

    #[test]
    fn test_notification_without_params_omits_field() {
        let text = serde_json::to_string(&Message::Notification(JsonRpcNotification::new(
            "exit", None,
        )))
        .unwrap();
        assert_eq!(text, r#"{"jsonrpc":"2.0","method":"exit"}"#);
    }
}
