//! Handling of server-initiated messages
//!
//! The dispatch loop hands every inbound call and notification to a
//! `NotificationHandler`. For calls the returned value becomes the `result`
//! of the reply; for notifications it is discarded.

use std::fmt;

use async_trait::async_trait;
use lsp_types::{ConfigurationParams, LogMessageParams, MessageType, ShowMessageParams};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::lsp::protocol::{RequestId, error_codes};

/// Errors produced while handling an inbound message
///
/// These never escape the dispatch loop: notification errors are logged,
/// call errors become JSON-RPC error replies.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Unhandled method: {0}")]
    Unhandled(String),

    #[error("Missing params for {0}")]
    MissingParams(String),

    #[error("Invalid params for {method}: {source}")]
    InvalidParams {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown message severity: {0}")]
    UnknownSeverity(String),
}

impl HandlerError {
    /// JSON-RPC error code used when this error answers a call
    pub fn error_code(&self) -> i32 {
        match self {
            HandlerError::Unhandled(_) => error_codes::METHOD_NOT_FOUND,
            HandlerError::MissingParams(_) | HandlerError::InvalidParams { .. } => {
                error_codes::INVALID_PARAMS
            }
            HandlerError::UnknownSeverity(_) => error_codes::INTERNAL_ERROR,
        }
    }
}

/// Receives server-initiated calls and notifications
///
/// `id` is present for calls and absent for notifications.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(
        &self,
        method: &str,
        id: Option<&RequestId>,
        params: Option<&Value>,
    ) -> Result<Value, HandlerError>;
}

// ============================================================================
// Severity
// ============================================================================

/// Severity of a `window/showMessage` or `window/logMessage` notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
    Log,
}

impl TryFrom<MessageType> for Severity {
    type Error = HandlerError;

    fn try_from(typ: MessageType) -> Result<Self, HandlerError> {
        match typ {
            MessageType::ERROR => Ok(Severity::Error),
            MessageType::WARNING => Ok(Severity::Warning),
            MessageType::INFO => Ok(Severity::Info),
            MessageType::LOG => Ok(Severity::Log),
            other => Err(HandlerError::UnknownSeverity(format!("{other:?}"))),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Error => "Error",
            Severity::Warning => "Warning",
            Severity::Info => "Info",
            Severity::Log => "Log",
        };
        f.write_str(label)
    }
}

// ============================================================================
// Default Handler
// ============================================================================

/// Logs server messages and answers the handful of calls gopls makes
/// during startup
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerMessageLogger;

#[async_trait]
impl NotificationHandler for ServerMessageLogger {
    async fn handle(
        &self,
        method: &str,
        id: Option<&RequestId>,
        params: Option<&Value>,
    ) -> Result<Value, HandlerError> {
        match method {
            "window/showMessage" => {
                let params: ShowMessageParams = parse_params(method, params)?;
                log_server_message(method, id, params.typ, &params.message)?;
                Ok(Value::Null)
            }
            "window/logMessage" => {
                let params: LogMessageParams = parse_params(method, params)?;
                log_server_message(method, id, params.typ, &params.message)?;
                Ok(Value::Null)
            }
            "window/showMessageRequest" => {
                let params: ShowMessageParams = parse_params(method, params)?;
                log_server_message(method, id, params.typ, &params.message)?;
                // No action selected
                Ok(Value::Null)
            }
            "window/workDoneProgress/create"
            | "client/registerCapability"
            | "client/unregisterCapability" => {
                debug!("Accepting {} from server", method);
                Ok(Value::Null)
            }
            "workspace/configuration" => {
                let params: ConfigurationParams = parse_params(method, params)?;
                debug!(
                    "Answering workspace/configuration with {} default sections",
                    params.items.len()
                );
                Ok(Value::Array(vec![Value::Null; params.items.len()]))
            }
            "$/progress" | "textDocument/publishDiagnostics" => {
                debug!(method, params = ?params, "Server notification");
                Ok(Value::Null)
            }
            other => Err(HandlerError::Unhandled(other.to_string())),
        }
    }
}

fn parse_params<T: DeserializeOwned>(method: &str, params: Option<&Value>) -> Result<T, HandlerError> {
    let params = params.ok_or_else(|| HandlerError::MissingParams(method.to_string()))?;
    T::deserialize(params).map_err(|source| HandlerError::InvalidParams {
        method: method.to_string(),
        source,
    })
}

fn log_server_message(
    method: &str,
    id: Option<&RequestId>,
    typ: MessageType,
    message: &str,
) -> Result<(), HandlerError> {
    let severity = Severity::try_from(typ)?;
    let id = id.map(ToString::to_string).unwrap_or_default();

    match severity {
        Severity::Error => error!("Server notification {} {} {}: {}", method, id, severity, message),
        Severity::Warning => warn!("Server notification {} {} {}: {}", method, id, severity, message),
        Severity::Info => info!("Server notification {} {} {}: {}", method, id, severity, message),
        Severity::Log => debug!("Server notification {} {} {}: {}", method, id, severity, message),
    }

    Ok(())
}
