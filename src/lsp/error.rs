use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::lsp::client::HandshakeState;
use crate::lsp::codec::CodecError;

/// Failure of a single call or notification on an RPC connection
#[derive(Error, Debug)]
pub enum RpcError {
    /// The peer answered with a JSON-RPC error object
    #[error("Remote error {code}: {message}")]
    Remote {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    #[error("Call to {method} was cancelled")]
    Cancelled { method: String },

    #[error("Call to {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Failed to write message: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode message: {0}")]
    Serialization(#[from] CodecError),

    #[error("Failed to decode result of {method}: {source}")]
    Deserialization {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RpcError {
    /// True when the local caller abandoned the call
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RpcError::Cancelled { .. } | RpcError::Timeout { .. })
    }
}

/// Failure of a protocol-level operation
#[derive(Error, Debug)]
pub enum LspError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("Cannot {operation}: server is {state}")]
    NotReady {
        operation: &'static str,
        state: HandshakeState,
    },

    #[error("Cannot {operation} while {state}")]
    InvalidTransition {
        operation: &'static str,
        state: HandshakeState,
    },

    #[error("Cannot build a file URI for {0}")]
    InvalidUri(String),
}
