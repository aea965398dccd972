//! Symbol abstraction module
//!
//! A flat `Symbol` descriptor built from either shape of a
//! `textDocument/documentSymbol` response, plus the position types and
//! path/URI helpers it relies on.

pub mod location;
#[allow(clippy::module_inception)]
mod symbol;

pub use location::file_uri;
pub use symbol::{Symbol, flatten_document_symbols};
