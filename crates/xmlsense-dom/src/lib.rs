//! xmlsense DOM
//!
//! Builds a best-effort tree from any text, well-formed or not. Unclosed
//! elements stay open to the end of input, stray end tags become their own
//! nodes, and every node keeps exact byte offsets into the source, so the
//! editor services can map a cursor back onto the structure.
//!
//! # Example
//!
//! ```
//! use xmlsense_dom::parse;
//!
//! let doc = parse("<root><child>", "file:///a.xml");
//! let root = doc.document_element().unwrap();
//! assert_eq!(doc.node(root).tag_name(), Some("root"));
//! assert_eq!(doc.node(root).end, 13); // Unclosed, runs to the end
//! ```

pub mod document;
pub mod line_index;
pub mod node;
pub mod parser;

pub use document::Document;
pub use line_index::LineIndex;
pub use node::{
    Attr, Delimited, DocumentType, DtdDecl, DtdParam, Element, ExternalKind, Node, NodeId,
    NodeKind, ProcessingInstruction,
};
pub use parser::{is_dtd_uri, parse};

/// A position or offset that does not address the document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    #[error("offset {offset} is past the end of the document ({len} bytes)")]
    OffsetOutOfRange { offset: usize, len: usize },

    #[error("offset {offset} splits a character")]
    NotCharBoundary { offset: usize },

    #[error("line {line} is past the end of the document ({line_count} lines)")]
    LineOutOfRange { line: usize, line_count: usize },
}
