//! xmlsense scanner
//!
//! Error-tolerant, restartable tokenizer for XML documents and DTDs.
//! Every malformed construct becomes a token, so callers can tokenize
//! half-typed editor buffers without ever handling an error.
//!
//! Two grammars are available: document content ([`Scanner::new`] /
//! [`Scanner::with_state`]) and external DTD files ([`Scanner::dtd`]).
//! A doctype's internal subset switches to the DTD grammar on its own.
//!
//! # Example
//!
//! ```
//! use xmlsense_scanner::{Scanner, TokenKind};
//!
//! let tokens = Scanner::tokenize("");
//! assert_eq!(tokens.len(), 1); // Just Eos
//! assert_eq!(tokens[0].kind, TokenKind::Eos);
//! ```

pub mod scanner;
pub mod token;

pub use scanner::{ExternalIdOwner, Scanner, ScannerState};
pub use token::{is_void_element, Span, Token, TokenKind};
