//! LSP handshake sequencer
//!
//! Drives a connection through the LSP lifecycle:
//!
//! ```text
//! Uninitialized --initialize--> Initializing --initialized--> Ready --shutdown--> Closed
//!       ^                            |
//!       +------ initialize failed ---+
//! ```
//!
//! Document requests are refused with `LspError::NotReady` until the
//! handshake has completed.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use lsp_types::{
    ClientCapabilities, ClientInfo, DidOpenTextDocumentParams, DocumentSymbolClientCapabilities,
    DocumentSymbolParams, DocumentSymbolResponse, InitializeParams, InitializeResult,
    InitializedParams, ServerCapabilities, TextDocumentClientCapabilities,
    TextDocumentIdentifier, TextDocumentItem, Uri, WindowClientCapabilities,
    WorkspaceClientCapabilities, WorkspaceFolder,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_INITIALIZATION_TIMEOUT_SECS;
use crate::lsp::connection::RpcConnection;
use crate::lsp::error::LspError;
use crate::symbol::file_uri;

/// Position in the LSP lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HandshakeState::Uninitialized => "uninitialized",
            HandshakeState::Initializing => "initializing",
            HandshakeState::Ready => "ready",
            HandshakeState::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// LSP client over an `RpcConnection`
pub struct LspClient {
    connection: RpcConnection,
    state: HandshakeState,
    server_capabilities: Option<ServerCapabilities>,
    client_info: ClientInfo,
    initialize_timeout: Duration,
    /// Cancels in-flight document requests
    cancel: CancellationToken,
}

impl LspClient {
    pub fn new(connection: RpcConnection) -> Self {
        Self {
            connection,
            state: HandshakeState::Uninitialized,
            server_capabilities: None,
            client_info: ClientInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            },
            initialize_timeout: Duration::from_secs(DEFAULT_INITIALIZATION_TIMEOUT_SECS),
            cancel: CancellationToken::new(),
        }
    }

    /// Set the name and version reported to the server
    pub fn with_client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_info = ClientInfo {
            name: name.into(),
            version: Some(version.into()),
        };
        self
    }

    /// Set how long `initialize` may take
    pub fn with_initialize_timeout(mut self, timeout: Duration) -> Self {
        self.initialize_timeout = timeout;
        self
    }

    #[allow(dead_code)]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    #[allow(dead_code)]
    pub fn is_ready(&self) -> bool {
        self.state == HandshakeState::Ready
    }

    /// Capabilities announced by the server in its `initialize` result
    pub fn server_capabilities(&self) -> Option<&ServerCapabilities> {
        self.server_capabilities.as_ref()
    }

    pub fn connection(&self) -> &RpcConnection {
        &self.connection
    }

    /// Token that abandons the document request in flight when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    /// Send `initialize` for the workspace rooted at `root`
    ///
    /// On failure the client returns to `Uninitialized`.
    pub async fn initialize(&mut self, root: &Path) -> Result<InitializeResult, LspError> {
        if self.state != HandshakeState::Uninitialized {
            return Err(LspError::InvalidTransition {
                operation: "initialize",
                state: self.state,
            });
        }

        let root_uri =
            file_uri(root).ok_or_else(|| LspError::InvalidUri(root.display().to_string()))?;
        let params = self.initialize_params(root, root_uri);

        info!("Initializing language server for {}", root.display());
        self.state = HandshakeState::Initializing;

        let result = self
            .connection
            .call_with_timeout::<_, InitializeResult>(
                "initialize",
                Some(params),
                self.initialize_timeout,
            )
            .await;

        match result {
            Ok(result) => {
                if let Some(server) = &result.server_info {
                    info!(
                        "Server {} {} initialized",
                        server.name,
                        server.version.as_deref().unwrap_or("(unknown version)")
                    );
                }
                self.server_capabilities = Some(result.capabilities.clone());
                Ok(result)
            }
            Err(e) => {
                if e.is_cancellation() {
                    warn!("Initialize abandoned: {}", e);
                } else {
                    warn!("Initialize failed: {}", e);
                }
                self.state = HandshakeState::Uninitialized;
                Err(e.into())
            }
        }
    }

    /// Send `initialized`, completing the handshake
    pub async fn initialized(&mut self) -> Result<(), LspError> {
        if self.state != HandshakeState::Initializing {
            return Err(LspError::InvalidTransition {
                operation: "send initialized",
                state: self.state,
            });
        }

        self.connection
            .notify("initialized", Some(InitializedParams {}))
            .await?;

        self.state = HandshakeState::Ready;
        info!("Language server ready");
        Ok(())
    }

    #[allow(deprecated)]
    fn initialize_params(&self, root: &Path, root_uri: Uri) -> InitializeParams {
        let folder_name = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());

        InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: Some(root_uri.clone()),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: folder_name,
            }]),
            client_info: Some(self.client_info.clone()),
            capabilities: ClientCapabilities {
                text_document: Some(TextDocumentClientCapabilities {
                    document_symbol: Some(DocumentSymbolClientCapabilities {
                        hierarchical_document_symbol_support: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                window: Some(WindowClientCapabilities {
                    work_done_progress: Some(true),
                    ..Default::default()
                }),
                workspace: Some(WorkspaceClientCapabilities {
                    configuration: Some(true),
                    workspace_folders: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    // ========================================================================
    // Document Operations
    // ========================================================================

    /// Send `textDocument/didOpen`
    pub async fn did_open(
        &self,
        uri: Uri,
        language_id: &str,
        version: i32,
        text: String,
    ) -> Result<(), LspError> {
        self.require_ready("open a document")?;

        debug!("Opening {} as {}", uri.as_str(), language_id);
        let params = DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri,
                language_id: language_id.to_string(),
                version,
                text,
            },
        };

        self.connection
            .notify("textDocument/didOpen", Some(params))
            .await?;
        Ok(())
    }

    /// Request `textDocument/documentSymbol`; a `null` result is an empty list
    pub async fn document_symbols(&self, uri: Uri) -> Result<DocumentSymbolResponse, LspError> {
        self.require_ready("request document symbols")?;

        let params = DocumentSymbolParams {
            text_document: TextDocumentIdentifier { uri },
            work_done_progress_params: Default::default(),
            partial_result_params: Default::default(),
        };

        let response: Option<DocumentSymbolResponse> = self
            .connection
            .call_with_cancel("textDocument/documentSymbol", Some(params), &self.cancel)
            .await?;

        Ok(response.unwrap_or(DocumentSymbolResponse::Flat(Vec::new())))
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Send `shutdown` then `exit`; does nothing unless the client is ready
    pub async fn shutdown(&mut self) -> Result<(), LspError> {
        if self.state != HandshakeState::Ready {
            debug!("Skipping shutdown while {}", self.state);
            return Ok(());
        }

        info!("Shutting down language server");
        self.state = HandshakeState::Closed;

        self.connection
            .call::<_, ()>("shutdown", None::<Value>)
            .await?;
        self.connection.notify("exit", None::<Value>).await?;
        Ok(())
    }

    fn require_ready(&self, operation: &'static str) -> Result<(), LspError> {
        if self.state == HandshakeState::Ready {
            Ok(())
        } else {
            Err(LspError::NotReady {
                operation,
                state: self.state,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::error::RpcError;
    use crate::lsp::protocol::{Message, error_codes};
    use crate::lsp::testing::{FakePeer, RecordingHandler, connected_pair};
    use crate::symbol::flatten_document_symbols;
    use serde_json::json;
    use std::path::PathBuf;

    #[cfg(feature = "test-logging")]
    #[ctor::ctor]
    fn init_test_logging() {
        crate::test_utils::logging::init();
    }

    const SOURCE: &str = "package main\n\nfunc F() {}\n\nfunc g() {}\n";

    fn client() -> (LspClient, FakePeer) {
        let (stream, peer) = connected_pair();
        let (handler, _) = RecordingHandler::new();
        let connection = RpcConnection::new(stream, handler, Duration::from_secs(5));
        (LspClient::new(connection), peer)
    }

    fn root() -> PathBuf {
        PathBuf::from("/tmp/project")
    }

    fn symbol(name: &str, line: u32) -> Value {
        let range = json!({
            "start": {"line": line, "character": 0},
            "end": {"line": line, "character": 11}
        });
        json!({"name": name, "kind": 12, "range": range, "selectionRange": range})
    }

    /// Answer `initialize` and swallow `initialized`
    async fn complete_handshake(peer: &mut FakePeer) {
        let request = peer.recv_call().await;
        assert_eq!(request.method, "initialize");
        peer.respond(&request.id, json!({"capabilities": {}})).await;
    }

    async fn ready_client() -> (LspClient, FakePeer) {
        let (mut client, mut peer) = client();
        let root = root();
        let (result, ()) = tokio::join!(client.initialize(&root), complete_handshake(&mut peer));
        result.unwrap();
        client.initialized().await.unwrap();
        assert_eq!(peer.recv_notification().await.method, "initialized");
        (client, peer)
    }

    #[tokio::test]
    async fn test_handshake_then_document_symbols() {
        let (mut client, mut peer) = client();
        assert_eq!(client.state(), HandshakeState::Uninitialized);

        let server = async {
            let request = peer.recv_call().await;
            assert_eq!(request.method, "initialize");
            let params = request.params.clone().unwrap();
            assert_eq!(params["processId"], json!(std::process::id()));
            assert_eq!(params["rootUri"], json!("file:///tmp/project"));
            assert_eq!(
                params["workspaceFolders"],
                json!([{"uri": "file:///tmp/project", "name": "project"}])
            );
            assert_eq!(
                params["capabilities"]["textDocument"]["documentSymbol"]
                    ["hierarchicalDocumentSymbolSupport"],
                json!(true)
            );
            peer.respond(
                &request.id,
                json!({"capabilities": {"documentSymbolProvider": true}, "serverInfo": {"name": "gopls"}}),
            )
            .await;
        };
        let root = root();
        let (result, ()) = tokio::join!(client.initialize(&root), server);
        result.unwrap();
        assert_eq!(client.state(), HandshakeState::Initializing);
        assert!(client.server_capabilities().is_some());

        client.initialized().await.unwrap();
        assert!(client.is_ready());
        let notification = peer.recv_notification().await;
        assert_eq!(notification.method, "initialized");
        assert_eq!(notification.params, Some(json!({})));

        let uri = file_uri(Path::new("/tmp/project/main.go")).unwrap();
        client
            .did_open(uri.clone(), "go", 1, SOURCE.to_string())
            .await
            .unwrap();
        let notification = peer.recv_notification().await;
        assert_eq!(notification.method, "textDocument/didOpen");
        assert_eq!(
            notification.params,
            Some(json!({"textDocument": {
                "uri": "file:///tmp/project/main.go",
                "languageId": "go",
                "version": 1,
                "text": SOURCE
            }}))
        );

        let server = async {
            let request = peer.recv_call().await;
            assert_eq!(request.method, "textDocument/documentSymbol");
            assert_eq!(
                request.params,
                Some(json!({"textDocument": {"uri": "file:///tmp/project/main.go"}}))
            );
            peer.respond(&request.id, json!([symbol("F", 2), symbol("g", 4)]))
                .await;
        };
        let (response, ()) = tokio::join!(client.document_symbols(uri), server);

        let names: Vec<_> = flatten_document_symbols(response.unwrap())
            .into_iter()
            .filter(|s| s.is_function())
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["F", "g"]);
    }

    #[tokio::test]
    async fn test_initialize_error_aborts_before_did_open() {
        let (mut client, mut peer) = client();

        let server = async {
            let request = peer.recv_call().await;
            peer.respond_error(&request.id, error_codes::INTERNAL_ERROR, "no module found")
                .await;
        };
        let root = root();
        let (result, ()) = tokio::join!(client.initialize(&root), server);

        match result.unwrap_err() {
            LspError::Rpc(RpcError::Remote { message, .. }) => {
                assert_eq!(message, "no module found")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.state(), HandshakeState::Uninitialized);

        let uri = file_uri(Path::new("/tmp/project/main.go")).unwrap();
        let err = client
            .did_open(uri, "go", 1, SOURCE.to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LspError::NotReady {
                state: HandshakeState::Uninitialized,
                ..
            }
        ));
        peer.assert_silent().await;
    }

    #[tokio::test]
    async fn test_document_requests_require_ready() {
        let (mut client, mut peer) = client();
        let uri = file_uri(Path::new("/tmp/project/main.go")).unwrap();

        let err = client.document_symbols(uri.clone()).await.unwrap_err();
        assert!(matches!(err, LspError::NotReady { .. }));

        let err = client.initialized().await.unwrap_err();
        assert!(matches!(err, LspError::InvalidTransition { .. }));

        let root = root();
        let (result, ()) = tokio::join!(client.initialize(&root), complete_handshake(&mut peer));
        result.unwrap();

        // Still initializing: `initialized` has not been sent
        let err = client
            .did_open(uri, "go", 1, String::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LspError::NotReady {
                state: HandshakeState::Initializing,
                ..
            }
        ));

        let err = client.initialize(&root).await.unwrap_err();
        assert!(matches!(err, LspError::InvalidTransition { .. }));
        peer.assert_silent().await;
    }

    #[tokio::test]
    async fn test_cancel_token_abandons_document_symbols() {
        let (client, mut peer) = ready_client().await;
        let uri = file_uri(Path::new("/tmp/project/main.go")).unwrap();
        let cancel = client.cancel_token();

        let server = async {
            let request = peer.recv_call().await;
            assert_eq!(request.method, "textDocument/documentSymbol");
            cancel.cancel();
            request
        };
        let (result, request) = tokio::join!(client.document_symbols(uri), server);

        assert!(matches!(
            result.unwrap_err(),
            LspError::Rpc(RpcError::Cancelled { ref method }) if method == "textDocument/documentSymbol"
        ));
        assert_eq!(client.connection().pending_requests().await, 0);

        // A late answer is dropped and the connection stays usable
        peer.respond(&request.id, json!([])).await;
        assert!(!client.connection().is_closed().await);
    }

    #[tokio::test]
    async fn test_relative_root_is_rejected() {
        let (mut client, mut peer) = client();

        let err = client.initialize(Path::new("project")).await.unwrap_err();
        assert!(matches!(err, LspError::InvalidUri(_)));
        assert_eq!(client.state(), HandshakeState::Uninitialized);
        peer.assert_silent().await;
    }

    #[tokio::test]
    async fn test_null_symbol_result_is_empty() {
        let (client, mut peer) = ready_client().await;
        let uri = file_uri(Path::new("/tmp/project/empty.go")).unwrap();

        let server = async {
            let request = peer.recv_call().await;
            peer.respond(&request.id, Value::Null).await;
        };
        let (response, ()) = tokio::join!(client.document_symbols(uri), server);

        assert!(flatten_document_symbols(response.unwrap()).is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_sends_shutdown_then_exit() {
        let (mut client, mut peer) = ready_client().await;

        let server = async {
            let request = peer.recv_call().await;
            assert_eq!(request.method, "shutdown");
            assert_eq!(request.params, None);
            peer.respond(&request.id, Value::Null).await;

            match peer.recv().await {
                Message::Notification(n) => assert_eq!(n.method, "exit"),
                other => panic!("expected exit, got {other:?}"),
            }
        };
        let (result, ()) = tokio::join!(client.shutdown(), server);
        result.unwrap();
        assert_eq!(client.state(), HandshakeState::Closed);

        // Second shutdown is a no-op
        client.shutdown().await.unwrap();
        peer.assert_silent().await;
    }
}
