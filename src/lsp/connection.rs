//! Bidirectional JSON-RPC connection
//!
//! One `RpcConnection` owns a duplex stream. Outbound calls are correlated
//! with their responses by integer id; a single dispatch task drains the
//! inbound half, fulfilling pending calls and handing server-initiated
//! messages to a `NotificationHandler`.
//!
//! Once the inbound stream ends or yields a message that cannot be decoded,
//! the connection is closed for good: every waiting caller gets
//! `RpcError::ConnectionClosed` and later calls fail without writing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, warn};

use crate::io::DuplexStream;
use crate::lsp::codec::{self, CodecError, MessageReader};
use crate::lsp::error::RpcError;
use crate::lsp::handler::{HandlerError, NotificationHandler};
use crate::lsp::protocol::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message, RequestId,
};
use crate::{log_lsp_message, log_timing};

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Pending calls and the closed flag, always mutated together
#[derive(Default)]
struct PendingState {
    requests: HashMap<i64, oneshot::Sender<JsonRpcResponse>>,
    closed: bool,
}

/// State shared between callers and the dispatch task
struct Shared {
    next_id: AtomicI64,
    state: Mutex<PendingState>,
    /// Held for a whole frame so frames never interleave
    writer: Mutex<Option<BoxWriter>>,
}

/// How a caller stops waiting for a response
enum Deadline<'a> {
    After(Duration),
    Token(&'a CancellationToken),
}

/// Handle to a JSON-RPC connection; cheap to clone
#[derive(Clone)]
pub struct RpcConnection {
    shared: Arc<Shared>,
    dispatch_task: Arc<JoinHandle<()>>,
    default_timeout: Duration,
}

impl RpcConnection {
    /// Take ownership of `stream` and start the dispatch task
    pub fn new<S, H>(stream: S, handler: H, default_timeout: Duration) -> Self
    where
        S: DuplexStream,
        H: NotificationHandler + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let shared = Arc::new(Shared {
            next_id: AtomicI64::new(1),
            state: Mutex::new(PendingState::default()),
            writer: Mutex::new(Some(Box::new(writer))),
        });

        let handler: Arc<dyn NotificationHandler> = Arc::new(handler);
        let dispatch_task = tokio::spawn(dispatch_loop(
            Arc::clone(&shared),
            MessageReader::new(reader),
            handler,
        ));

        Self {
            shared,
            dispatch_task: Arc::new(dispatch_task),
            default_timeout,
        }
    }

    /// Send a call and wait for its result using the default timeout
    pub async fn call<P, R>(&self, method: &str, params: Option<P>) -> Result<R, RpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.call_with_timeout(method, params, self.default_timeout)
            .await
    }

    /// Send a call and wait at most `timeout` for its result
    pub async fn call_with_timeout<P, R>(
        &self,
        method: &str,
        params: Option<P>,
        timeout: Duration,
    ) -> Result<R, RpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.call_until(method, params, Deadline::After(timeout))
            .await
    }

    /// Send a call and wait for its result until `token` is cancelled or
    /// the default timeout expires
    pub async fn call_with_cancel<P, R>(
        &self,
        method: &str,
        params: Option<P>,
        token: &CancellationToken,
    ) -> Result<R, RpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.call_until(method, params, Deadline::Token(token)).await
    }

    /// Send a notification
    pub async fn notify<P: Serialize>(
        &self,
        method: &str,
        params: Option<P>,
    ) -> Result<(), RpcError> {
        let params = to_params(params)?;
        let notification = JsonRpcNotification::new(method, params);

        log_lsp_message!(Level::DEBUG, "outgoing", method, &notification);

        self.shared
            .write_message(&Message::Notification(notification))
            .await
    }

    /// Tear the connection down and stop the dispatch task
    ///
    /// Waiting callers fail with `ConnectionClosed`. Dropping the writer
    /// closes the outbound pipe.
    pub async fn close(&self) {
        self.shared.teardown("closed locally").await;
        self.dispatch_task.abort();
        self.shared.writer.lock().await.take();
    }

    pub async fn is_closed(&self) -> bool {
        self.shared.state.lock().await.closed
    }

    /// Number of calls still waiting for a response
    pub async fn pending_requests(&self) -> usize {
        self.shared.state.lock().await.requests.len()
    }

    async fn call_until<P, R>(
        &self,
        method: &str,
        params: Option<P>,
        deadline: Deadline<'_>,
    ) -> Result<R, RpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let start = Instant::now();
        let params = to_params(params)?;
        let (id, rx) = self.send_request(method, params).await?;

        let outcome = match deadline {
            Deadline::After(timeout) => tokio::time::timeout(timeout, rx)
                .await
                .map_err(|_| RpcError::Timeout {
                    method: method.to_string(),
                    timeout,
                }),
            Deadline::Token(token) => tokio::select! {
                response = tokio::time::timeout(self.default_timeout, rx) => {
                    response.map_err(|_| RpcError::Timeout {
                        method: method.to_string(),
                        timeout: self.default_timeout,
                    })
                }
                _ = token.cancelled() => Err(RpcError::Cancelled {
                    method: method.to_string(),
                }),
            },
        };

        let response = match outcome {
            Ok(Ok(response)) => response,
            // Sender dropped by teardown
            Ok(Err(_)) => return Err(RpcError::ConnectionClosed),
            Err(abandoned) => {
                self.shared.forget(id).await;
                debug!("Abandoned request {} ({}): {}", id, method, abandoned);
                return Err(abandoned);
            }
        };

        log_timing!(
            Level::DEBUG,
            &format!("lsp_request_{method}"),
            start.elapsed()
        );

        if let Some(error) = response.error {
            return Err(RpcError::Remote {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }

        let result = response.result.unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|source| RpcError::Deserialization {
            method: method.to_string(),
            source,
        })
    }

    /// Register a pending entry and write the call
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(i64, oneshot::Receiver<JsonRpcResponse>), RpcError> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = self.shared.state.lock().await;
            if state.closed {
                return Err(RpcError::ConnectionClosed);
            }
            let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
            state.requests.insert(id, tx);
            id
        };

        let request = JsonRpcRequest::new(id, method, params);
        log_lsp_message!(Level::DEBUG, "outgoing", method, &request);

        if let Err(e) = self.shared.write_message(&Message::Call(request)).await {
            self.shared.forget(id).await;
            return Err(e);
        }

        Ok((id, rx))
    }
}

fn to_params<P: Serialize>(params: Option<P>) -> Result<Option<Value>, RpcError> {
    params
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| RpcError::Serialization(CodecError::Serialization(e)))
}

impl Shared {
    /// Encode and write one frame; a failed write closes the connection
    async fn write_message(&self, message: &Message) -> Result<(), RpcError> {
        if self.state.lock().await.closed {
            return Err(RpcError::ConnectionClosed);
        }

        let frame = codec::encode(message)?;

        let result = {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(RpcError::ConnectionClosed)?;
            match writer.write_all(&frame).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };

        if let Err(e) = result {
            warn!("Failed to write to server: {}", e);
            self.teardown("write failure").await;
            return Err(RpcError::Io(e));
        }

        Ok(())
    }

    /// Remove an entry whose caller stopped waiting
    async fn forget(&self, id: i64) {
        self.state.lock().await.requests.remove(&id);
    }

    /// Hand a response to the caller waiting for it
    async fn fulfil(&self, response: JsonRpcResponse) {
        let id = match &response.id {
            Some(RequestId::Number(id)) => *id,
            other => {
                warn!("Dropping response with unusable id: {:?}", other);
                return;
            }
        };

        let sender = self.state.lock().await.requests.remove(&id);
        match sender {
            Some(sender) => {
                if sender.send(response).is_err() {
                    debug!("Caller for request {} stopped waiting", id);
                }
            }
            None => debug!("Discarding response for unknown or abandoned request {}", id),
        }
    }

    /// Mark the connection closed and fail every waiting caller
    async fn teardown(&self, reason: &str) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;

        let count = state.requests.len();
        // Dropping the senders wakes each waiter with a receive error
        state.requests.clear();

        if count > 0 {
            warn!(
                "Connection closed ({}); failing {} pending requests",
                reason, count
            );
        } else {
            info!("Connection closed ({})", reason);
        }
    }
}

// ============================================================================
// Dispatch Loop
// ============================================================================

async fn dispatch_loop<R>(
    shared: Arc<Shared>,
    mut reader: MessageReader<R>,
    handler: Arc<dyn NotificationHandler>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let message = match reader.read_message().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                info!("Server closed its output stream");
                shared.teardown("end of stream").await;
                break;
            }
            Err(e) => {
                error!("Failed to decode message from server: {}", e);
                shared.teardown("decode error").await;
                break;
            }
        };

        log_lsp_message!(
            Level::DEBUG,
            "incoming",
            message.method().unwrap_or("response"),
            &message
        );

        match message {
            Message::Response(response) => shared.fulfil(response).await,
            Message::Call(request) => {
                tokio::spawn(answer_call(
                    Arc::clone(&shared),
                    Arc::clone(&handler),
                    request,
                ));
            }
            Message::Notification(notification) => {
                // Handled in arrival order; only calls run on their own task
                if let Err(e) = handler
                    .handle(&notification.method, None, notification.params.as_ref())
                    .await
                {
                    warn!("Notification {} not handled: {}", notification.method, e);
                }
            }
        }
    }

    debug!("Dispatch loop terminated");
}

/// Run the handler for a server-initiated call and write the reply
async fn answer_call(
    shared: Arc<Shared>,
    handler: Arc<dyn NotificationHandler>,
    request: JsonRpcRequest,
) {
    let JsonRpcRequest {
        id, method, params, ..
    } = request;

    let reply = match handler.handle(&method, Some(&id), params.as_ref()).await {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(HandlerError::Unhandled(_)) => {
            debug!("No handler for server call {}", method);
            JsonRpcResponse::method_not_found(id, &method)
        }
        Err(e) => {
            warn!("Server call {} failed: {}", method, e);
            JsonRpcResponse::error(id, e.error_code(), e.to_string(), None)
        }
    };

    log_lsp_message!(Level::DEBUG, "outgoing", &method, &reply);

    if let Err(e) = shared.write_message(&Message::Response(reply)).await {
        warn!("Failed to answer server call {}: {}", method, e);
    }
}
