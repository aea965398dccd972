//! Test doubles for the RPC layer
//!
//! `connected_pair` wires a `PipeDuplex` (what the connection sees) to a
//! `FakePeer` (what the test drives) through two in-memory pipes, one per
//! direction, the same shape as a child's stdin/stdout.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncWriteExt, DuplexStream as MemoryPipe};
use tokio::sync::mpsc;

use crate::io::duplex::PipeDuplex;
use crate::lsp::codec::{MessageReader, encode};
use crate::lsp::handler::{HandlerError, NotificationHandler};
use crate::lsp::protocol::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message, RequestId,
};

const PIPE_CAPACITY: usize = 64 * 1024;
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a client-side stream and the fake server driving its other end
pub fn connected_pair() -> (PipeDuplex<MemoryPipe, MemoryPipe>, FakePeer) {
    let (client_read, peer_write) = tokio::io::duplex(PIPE_CAPACITY);
    let (peer_read, client_write) = tokio::io::duplex(PIPE_CAPACITY);

    (
        PipeDuplex::new(client_read, client_write),
        FakePeer {
            reader: MessageReader::new(peer_read),
            writer: peer_write,
        },
    )
}

// ============================================================================
// Fake Peer
// ============================================================================

/// Scripted server end of a connection
pub struct FakePeer {
    reader: MessageReader<MemoryPipe>,
    writer: MemoryPipe,
}

impl FakePeer {
    /// Next message written by the client
    pub async fn recv(&mut self) -> Message {
        tokio::time::timeout(RECV_TIMEOUT, self.reader.read_message())
            .await
            .expect("timed out waiting for a client message")
            .expect("client wrote an undecodable message")
            .expect("client closed its output")
    }

    pub async fn recv_call(&mut self) -> JsonRpcRequest {
        match self.recv().await {
            Message::Call(request) => request,
            other => panic!("expected a call, got {other:?}"),
        }
    }

    pub async fn recv_notification(&mut self) -> JsonRpcNotification {
        match self.recv().await {
            Message::Notification(notification) => notification,
            other => panic!("expected a notification, got {other:?}"),
        }
    }

    pub async fn recv_response(&mut self) -> JsonRpcResponse {
        match self.recv().await {
            Message::Response(response) => response,
            other => panic!("expected a response, got {other:?}"),
        }
    }

    /// Assert the client writes nothing more for a short while
    pub async fn assert_silent(&mut self) {
        match tokio::time::timeout(Duration::from_millis(50), self.reader.read_message()).await {
            Err(_) | Ok(Ok(None)) => {}
            Ok(other) => panic!("expected no traffic, got {other:?}"),
        }
    }

    pub async fn send(&mut self, message: Message) {
        let frame = encode(&message).expect("encode");
        self.send_raw(&frame).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("write to client");
        self.writer.flush().await.expect("flush to client");
    }

    pub async fn respond(&mut self, id: &RequestId, result: Value) {
        self.send(Message::Response(JsonRpcResponse::success(id.clone(), result)))
            .await;
    }

    pub async fn respond_error(&mut self, id: &RequestId, code: i32, message: &str) {
        self.send(Message::Response(JsonRpcResponse::error(
            id.clone(),
            code,
            message,
            None,
        )))
        .await;
    }

    pub async fn call(&mut self, id: RequestId, method: &str, params: Value) {
        self.send(Message::Call(JsonRpcRequest::new(id, method, Some(params))))
            .await;
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        self.send(Message::Notification(JsonRpcNotification::new(
            method,
            Some(params),
        )))
        .await;
    }

    /// Close the server's output; the client sees end of stream
    pub async fn hang_up(&mut self) {
        self.writer.shutdown().await.expect("shutdown");
    }

    /// Stop reading the client's output so its writes fail, keeping the
    /// server's output open
    pub fn stop_reading(self) -> MemoryPipe {
        self.writer
    }
}

// ============================================================================
// Recording Handler
// ============================================================================

/// What a handler was given: method, id (calls only) and params
pub type Received = (String, Option<RequestId>, Option<Value>);

/// Handler that reports every message it sees
///
/// Answers calls with `"ack"`, except methods under `unknown/` which are
/// reported as unhandled.
#[derive(Clone)]
pub struct RecordingHandler {
    seen: mpsc::UnboundedSender<Received>,
}

impl RecordingHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Received>) {
        let (seen, rx) = mpsc::unbounded_channel();
        (Self { seen }, rx)
    }
}

#[async_trait]
impl NotificationHandler for RecordingHandler {
    async fn handle(
        &self,
        method: &str,
        id: Option<&RequestId>,
        params: Option<&Value>,
    ) -> Result<Value, HandlerError> {
        let _ = self
            .seen
            .send((method.to_string(), id.cloned(), params.cloned()));

        if method.starts_with("unknown/") {
            return Err(HandlerError::Unhandled(method.to_string()));
        }
        Ok(json!("ack"))
    }
}
