//! Language server session
//!
//! Wires the pieces together: launch the server, wrap its stdio in a duplex
//! stream, run an RPC connection over it and complete the LSP handshake.
//! A started session is ready for document requests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use lsp_types::OneOf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::io::{ChildProcessManager, DuplexStream, ProcessError, StopMode};
use crate::lsp::{LspClient, LspError, RpcConnection, ServerMessageLogger};
use crate::symbol::{Symbol, file_uri, flatten_document_symbols};

/// How long the server gets to exit on its own after `exit`
const EXIT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Version sent with `didOpen`; documents are opened once and never edited
const INITIAL_DOCUMENT_VERSION: i32 = 1;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to launch language server: {0}")]
    Launch(#[from] ProcessError),

    #[error(transparent)]
    Lsp(#[from] LspError),

    #[error("Not an absolute file path: {}", .0.display())]
    InvalidPath(PathBuf),
}

/// A running, initialized language server
pub struct SymbolSession {
    client: LspClient,
    process: Option<ChildProcessManager>,
    request_timeout: Duration,
}

impl SymbolSession {
    /// Launch the configured server and complete the handshake for `root`
    pub async fn start(config: &ServerConfig, root: &Path) -> Result<Self, SessionError> {
        info!("Starting language server session");
        debug!("Server command: {} {:?}", config.command, config.args);
        debug!("Workspace root: {}", root.display());

        let mut process = ChildProcessManager::new(
            config.command.clone(),
            config.args.clone(),
            config.working_directory.clone(),
        )
        .with_io_tracing(config.trace_io);

        process.start().await?;
        let duplex = process.take_duplex()?;

        // On failure `process` is dropped here, which kills the server
        let mut session = Self::over_stream(duplex, config, root).await?;
        session.process = Some(process);

        info!("Language server session started");
        Ok(session)
    }

    /// Complete the handshake over an already-connected stream
    pub async fn over_stream<S: DuplexStream>(
        stream: S,
        config: &ServerConfig,
        root: &Path,
    ) -> Result<Self, SessionError> {
        let connection = RpcConnection::new(stream, ServerMessageLogger, config.request_timeout);
        let mut client = LspClient::new(connection)
            .with_client_info(&config.client_name, &config.client_version)
            .with_initialize_timeout(config.initialization_timeout);

        if let Err(e) = Self::handshake(&mut client, root).await {
            client.connection().close().await;
            return Err(e.into());
        }

        Ok(Self {
            client,
            process: None,
            request_timeout: config.request_timeout,
        })
    }

    async fn handshake(client: &mut LspClient, root: &Path) -> Result<(), LspError> {
        let result = client.initialize(root).await?;
        debug!("Server capabilities: {:?}", result.capabilities);
        client.initialized().await
    }

    #[cfg(test)]
    pub fn client(&self) -> &LspClient {
        &self.client
    }

    /// Token that abandons the symbol request in flight when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.client.cancel_token()
    }

    /// Open `path` with the given contents and list its symbols
    ///
    /// Symbols are returned in declaration order; nested symbols follow
    /// their parent.
    pub async fn document_symbols(
        &self,
        path: &Path,
        text: String,
    ) -> Result<Vec<Symbol>, SessionError> {
        let uri = file_uri(path).ok_or_else(|| SessionError::InvalidPath(path.to_path_buf()))?;
        let language_id = language_id_for(path);

        let advertised = self
            .client
            .server_capabilities()
            .and_then(|caps| caps.document_symbol_provider.as_ref())
            .is_some_and(|provider| !matches!(provider, OneOf::Left(false)));
        if !advertised {
            warn!("Server did not advertise documentSymbol support; asking anyway");
        }

        self.client
            .did_open(uri.clone(), language_id, INITIAL_DOCUMENT_VERSION, text)
            .await?;
        let response = self.client.document_symbols(uri).await?;

        let symbols = flatten_document_symbols(response);
        info!("Found {} symbols in {}", symbols.len(), path.display());
        Ok(symbols)
    }

    /// Graceful shutdown: LSP shutdown/exit, connection close, process stop
    pub async fn close(mut self) -> Result<(), SessionError> {
        info!("Closing language server session");

        match tokio::time::timeout(self.request_timeout, self.client.shutdown()).await {
            Ok(Ok(())) => debug!("LSP shutdown completed"),
            Ok(Err(e)) => warn!("LSP shutdown error: {}", e),
            Err(_) => warn!("LSP shutdown timed out"),
        }

        self.client.connection().close().await;

        if let Some(mut process) = self.process.take() {
            match tokio::time::timeout(EXIT_GRACE_PERIOD, process.wait_for_exit()).await {
                Ok(exit) => debug!("Language server exited: {:?}", exit),
                Err(_) => debug!("Language server still running after exit"),
            }
            if process.is_running() {
                process.stop(StopMode::Graceful).await?;
            }
        }

        info!("Language server session closed");
        Ok(())
    }
}

impl Drop for SymbolSession {
    fn drop(&mut self) {
        if let Some(process) = self.process.as_mut()
            && process.is_running()
        {
            warn!("SymbolSession dropped without close(); killing language server");
            process.kill_sync();
        }
    }
}

/// LSP language identifier for a file, chosen by name and extension
pub fn language_id_for(path: &Path) -> &'static str {
    match path.file_name().and_then(|name| name.to_str()) {
        Some("go.mod") => return "go.mod",
        Some("go.sum") => return "go.sum",
        Some("go.work") => return "go.work",
        _ => {}
    }

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("go") => "go",
        Some("tmpl" | "gotmpl") => "gotmpl",
        Some("rs") => "rust",
        Some("c" | "h") => "c",
        Some("cc" | "cpp" | "cxx" | "hh" | "hpp" | "hxx") => "cpp",
        Some("py") => "python",
        Some("js") => "javascript",
        Some("ts") => "typescript",
        _ => "plaintext",
    }
}
