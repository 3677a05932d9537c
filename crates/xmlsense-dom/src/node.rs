//! Node types of the document tree.
//!
//! Nodes live in an arena owned by [`crate::Document`] and refer to each other
//! by [`NodeId`]. All offsets are byte offsets into the document text; a
//! node covers `[start, end)`.

use indexmap::IndexMap;
use xmlsense_scanner::{Span, TokenKind};

/// Index of a node in its document's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One syntactic construct with exact offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub start: usize,
    pub end: usize,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// True once the construct's terminator was seen (`>` of an end tag,
    /// `/>`, `-->`, `?>`, ...). Unterminated nodes still carry best-effort
    /// offsets.
    pub closed: bool,
}

impl Node {
    pub(crate) fn new(kind: NodeKind, start: usize, end: usize, parent: Option<NodeId>) -> Self {
        Self {
            kind,
            start,
            end,
            parent,
            children: Vec::new(),
            closed: false,
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    pub fn as_element(&self) -> Option<&Element> {
        match &self.kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self.kind, NodeKind::Element(_))
    }

    /// Tag name of an element node.
    pub fn tag_name(&self) -> Option<&str> {
        self.as_element().and_then(|e| e.tag_name.as_deref())
    }

    pub fn as_doctype(&self) -> Option<&DocumentType> {
        match &self.kind {
            NodeKind::DocumentType(doctype) => Some(doctype),
            _ => None,
        }
    }

    pub fn as_declaration(&self) -> Option<&DtdDecl> {
        match &self.kind {
            NodeKind::ElementDecl(decl)
            | NodeKind::AttlistDecl(decl)
            | NodeKind::EntityDecl(decl)
            | NodeKind::NotationDecl(decl) => Some(decl),
            _ => None,
        }
    }

    /// Prolog or processing instruction payload.
    pub fn as_instruction(&self) -> Option<&ProcessingInstruction> {
        match &self.kind {
            NodeKind::Prolog(pi) | NodeKind::ProcessingInstruction(pi) => Some(pi),
            _ => None,
        }
    }

    pub fn is_prolog(&self) -> bool {
        matches!(self.kind, NodeKind::Prolog(_))
    }

    /// Attributes of an element or prolog.
    pub fn attributes(&self) -> Option<&IndexMap<String, Attr>> {
        match &self.kind {
            NodeKind::Element(element) => Some(&element.attributes),
            NodeKind::Prolog(pi) => Some(&pi.attributes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Element(Element),
    Text,
    Comment(Delimited),
    CData(Delimited),
    ProcessingInstruction(ProcessingInstruction),
    /// The `<?xml ...?>` declaration.
    Prolog(ProcessingInstruction),
    DocumentType(DocumentType),
    ElementDecl(DtdDecl),
    AttlistDecl(DtdDecl),
    EntityDecl(DtdDecl),
    NotationDecl(DtdDecl),
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Element(_) => "element",
            NodeKind::Text => "text",
            NodeKind::Comment(_) => "comment",
            NodeKind::CData(_) => "cdata",
            NodeKind::ProcessingInstruction(_) => "processing-instruction",
            NodeKind::Prolog(_) => "prolog",
            NodeKind::DocumentType(_) => "doctype",
            NodeKind::ElementDecl(_) => "element-decl",
            NodeKind::AttlistDecl(_) => "attlist-decl",
            NodeKind::EntityDecl(_) => "entity-decl",
            NodeKind::NotationDecl(_) => "notation-decl",
        }
    }
}

/// An element, possibly unterminated or missing its end tag.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub tag_name: Option<String>,
    pub tag_name_span: Option<Span>,
    /// Offset of `<`. `None` for a dangling end tag that matched no open
    /// element.
    pub start_tag_open_offset: Option<usize>,
    /// Offset of the `>` (or of `/` in `/>`) ending the start tag.
    pub start_tag_close_offset: Option<usize>,
    /// Offset of `</`.
    pub end_tag_open_offset: Option<usize>,
    /// Offset of the `>` ending the end tag.
    pub end_tag_close_offset: Option<usize>,
    pub self_closed: bool,
    pub attributes: IndexMap<String, Attr>,
}

impl Element {
    pub fn has_tag_name(&self) -> bool {
        self.tag_name.is_some()
    }

    pub fn is_same_tag(&self, name: &str) -> bool {
        self.tag_name.as_deref() == Some(name)
    }

    pub fn has_end_tag(&self) -> bool {
        self.end_tag_open_offset.is_some()
    }

    /// Self-closed or terminated by its own end tag.
    pub fn is_closed(&self) -> bool {
        self.self_closed || self.has_end_tag()
    }

    pub fn is_start_tag_closed(&self) -> bool {
        self.start_tag_close_offset.is_some()
    }

    /// An end tag with no start tag.
    pub fn is_orphan_end_tag(&self) -> bool {
        self.start_tag_open_offset.is_none()
    }

    pub fn attribute(&self, name: &str) -> Option<&Attr> {
        self.attributes.get(name)
    }
}

/// An attribute as written in a start tag (or in the prolog).
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub name: String,
    pub name_span: Span,
    /// Value without its quotes.
    pub value: Option<String>,
    /// Span of the value as written, quotes included.
    pub value_span: Option<Span>,
    pub has_delimiter: bool,
    pub quote: Option<char>,
}

impl Attr {
    pub(crate) fn new(name: &str, name_span: Span) -> Self {
        Self {
            name: name.to_string(),
            name_span,
            value: None,
            value_span: None,
            has_delimiter: false,
            quote: None,
        }
    }

    /// Span of the value between its quotes. An unterminated value runs to
    /// the end of what was scanned.
    pub fn value_content_span(&self) -> Option<Span> {
        let span = self.value_span?;
        let Some(quote) = self.quote else {
            return Some(span);
        };
        let closed = span.len() >= 2 && self.value_is_closed(quote, span);
        let end = if closed { span.end - 1 } else { span.end };
        Some(Span::new(span.start + 1, end))
    }

    fn value_is_closed(&self, quote: char, span: Span) -> bool {
        // value holds the unquoted text, so a closed value is two bytes
        // longer than it.
        let inner = self.value.as_deref().map_or(0, str::len);
        span.len() == inner + 2 * quote.len_utf8()
    }

    /// True when the value starts and ends with the same quote.
    pub fn is_quoted(&self) -> bool {
        match (self.quote, self.value_span) {
            (Some(quote), Some(span)) => span.len() >= 2 && self.value_is_closed(quote, span),
            _ => false,
        }
    }
}

/// Comment or CDATA section: the span between its delimiters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Delimited {
    pub content: Option<Span>,
}

/// `<?target content?>`; the prolog additionally records pseudo-attributes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessingInstruction {
    pub target: Option<String>,
    pub target_span: Option<Span>,
    pub content: Option<Span>,
    pub attributes: IndexMap<String, Attr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalKind {
    Public,
    System,
}

/// `<!DOCTYPE name PUBLIC "pub" "sys" [ internal subset ]>`. The
/// declarations of the internal subset are the node's children. An external
/// DTD file is represented by a nameless doctype spanning the whole text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocumentType {
    pub name: Option<String>,
    pub name_span: Option<Span>,
    pub kind: Option<ExternalKind>,
    pub public_id: Option<Span>,
    pub system_id: Option<Span>,
    /// Offset of `[`.
    pub internal_subset_start: Option<usize>,
    /// Offset of `]`.
    pub internal_subset_end: Option<usize>,
}

/// One parameter of a markup declaration, as scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtdParam {
    pub kind: TokenKind,
    pub span: Span,
    pub in_internal_subset: bool,
}

/// `<!ELEMENT`, `<!ATTLIST`, `<!ENTITY` or `<!NOTATION` declaration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DtdDecl {
    pub name: Option<String>,
    pub name_span: Option<Span>,
    pub parameter_entity: bool,
    pub params: Vec<DtdParam>,
    pub in_internal_subset: bool,
}
