//! JSON-RPC and LSP layer
//!
//! - **Protocol / Codec**: message types and Content-Length framing
//! - **Connection**: request correlation and the inbound dispatch loop
//! - **Handler**: server-initiated calls and notifications
//! - **Client**: the LSP handshake and the document requests built on it

pub mod client;
pub mod codec;
pub mod connection;
pub mod error;
pub mod handler;
pub mod protocol;

#[cfg(test)]
pub mod testing;

pub use client::LspClient;
pub use connection::RpcConnection;
pub use error::LspError;
pub use handler::ServerMessageLogger;
