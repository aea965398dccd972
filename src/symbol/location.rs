use std::path::Path;
use std::str::FromStr;

use lsp_types::{Position as LspPosition, Range as LspRange, Uri};
use serde::{Deserialize, Serialize};

/// Zero-based line and UTF-16 column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl From<LspPosition> for Position {
    fn from(pos: LspPosition) -> Self {
        Position {
            line: pos.line,
            column: pos.character,
        }
    }
}

impl From<LspRange> for Range {
    fn from(range: LspRange) -> Self {
        Range {
            start: range.start.into(),
            end: range.end.into(),
        }
    }
}

/// `file://` URI for an absolute path
///
/// Returns `None` for relative paths. Characters that are not allowed in a
/// URI path (spaces, `#`, non-ASCII) are percent-encoded.
pub fn file_uri(path: &Path) -> Option<Uri> {
    let url = url::Url::from_file_path(path).ok()?;
    Uri::from_str(url.as_str()).ok()
}
