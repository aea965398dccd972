//! Core Symbol representation
//!
//! A server may answer `textDocument/documentSymbol` with either a flat list
//! of `SymbolInformation` or a tree of `DocumentSymbol`. Both are reduced to
//! one flat list of `Symbol` in declaration order.

use lsp_types::{DocumentSymbol, DocumentSymbolResponse, SymbolInformation, SymbolKind};
use serde::{Deserialize, Serialize};

use crate::symbol::location::Range;

/// A symbol declared in a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    /// Symbol name
    pub name: String,

    /// Symbol kind (function, struct, variable, etc.)
    pub kind: SymbolKind,

    /// Enclosing symbol (type for a method, package, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    /// Range of the symbol's name
    pub range: Range,
}

impl Symbol {
    pub fn is_function(&self) -> bool {
        self.kind == SymbolKind::FUNCTION
    }
}

impl From<SymbolInformation> for Symbol {
    fn from(info: SymbolInformation) -> Self {
        Self {
            name: info.name,
            kind: info.kind,
            container_name: info.container_name,
            range: info.location.range.into(),
        }
    }
}

/// Flatten a document symbol response
///
/// Hierarchical responses are walked pre-order: a parent comes before its
/// children, and children carry the parent's name as their container.
pub fn flatten_document_symbols(response: DocumentSymbolResponse) -> Vec<Symbol> {
    match response {
        DocumentSymbolResponse::Flat(symbols) => symbols.into_iter().map(Symbol::from).collect(),
        DocumentSymbolResponse::Nested(symbols) => {
            let mut flattened = Vec::new();
            for symbol in symbols {
                push_nested(symbol, None, &mut flattened);
            }
            flattened
        }
    }
}

fn push_nested(symbol: DocumentSymbol, container: Option<&str>, out: &mut Vec<Symbol>) {
    let DocumentSymbol {
        name,
        kind,
        selection_range,
        children,
        ..
    } = symbol;

    let parent = name.clone();
    out.push(Symbol {
        name,
        kind,
        container_name: container.map(str::to_string),
        range: selection_range.into(),
    });

    for child in children.into_iter().flatten() {
        push_nested(child, Some(&parent), out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::location::Position;
    use serde_json::json;

    fn range(line: u32, start: u32, end: u32) -> serde_json::Value {
        json!({
            "start": {"line": line, "character": start},
            "end": {"line": line, "character": end}
        })
    }

    fn parse_response(value: serde_json::Value) -> DocumentSymbolResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_nested_symbols_flatten_pre_order() {
        let response = parse_response(json!([
            {
                "name": "Server", "kind": 23,
                "range": range(2, 0, 40), "selectionRange": range(2, 5, 11),
                "children": [
                    {"name": "addr", "kind": 8, "range": range(3, 1, 12), "selectionRange": range(3, 1, 5)}
                ]
            },
            {"name": "F", "kind": 12, "range": range(6, 0, 20), "selectionRange": range(6, 5, 6)},
            {"name": "g", "kind": 12, "range": range(8, 0, 20), "selectionRange": range(8, 5, 6)}
        ]));
        assert!(matches!(response, DocumentSymbolResponse::Nested(_)));

        let symbols = flatten_document_symbols(response);
        let names: Vec<_> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Server", "addr", "F", "g"]);

        assert_eq!(symbols[0].kind, SymbolKind::STRUCT);
        assert_eq!(symbols[0].container_name, None);
        assert_eq!(symbols[1].container_name.as_deref(), Some("Server"));
        assert_eq!(symbols[2].range.start, Position { line: 6, column: 5 });

        let functions: Vec<_> = symbols.iter().filter(|s| s.is_function()).collect();
        assert_eq!(functions.len(), 2);
    }

    #[test]
    fn test_flat_symbols_keep_container() {
        let response = parse_response(json!([
            {
                "name": "Handle", "kind": 6, "containerName": "Server",
                "location": {"uri": "file:///ws/main.go", "range": range(10, 0, 30)}
            }
        ]));
        assert!(matches!(response, DocumentSymbolResponse::Flat(_)));

        let symbols = flatten_document_symbols(response);
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "Handle");
        assert_eq!(symbols[0].kind, SymbolKind::METHOD);
        assert_eq!(symbols[0].container_name.as_deref(), Some("Server"));
        assert!(!symbols[0].is_function());
    }

    #[test]
    fn test_empty_response() {
        assert!(flatten_document_symbols(parse_response(json!([]))).is_empty());
    }
}
