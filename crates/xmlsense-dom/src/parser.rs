//! Document tree builder.
//!
//! Drives the scanner once over the whole text and builds the node arena.
//! The innermost open element is a single `curr` pointer; its parent chain
//! is the open-element stack, so recovery from a mismatched end tag is a
//! walk up that chain:
//!
//! - an end tag naming `curr` closes it;
//! - an end tag naming an ancestor closes every element in between as
//!   missing its end tag (their `end` is the `</` offset), then closes the
//!   ancestor;
//! - an end tag naming nothing open becomes a dangling element with no start
//!   tag, and `curr` does not move.
//!
//! Elements still open at end of input keep `end_tag_open_offset == None`
//! and extend to the end of the text.

use xmlsense_scanner::{Scanner, Span, Token, TokenKind};

use crate::document::Document;
use crate::node::{
    Attr, Delimited, DocumentType, DtdDecl, DtdParam, Element, ExternalKind, Node, NodeId,
    NodeKind, ProcessingInstruction,
};

/// Parse `text` into a document. `uri` selects the DTD grammar for `.dtd`,
/// `.ent` and `.mod` files. Never fails.
pub fn parse(text: &str, uri: &str) -> Document {
    let is_dtd = is_dtd_uri(uri);
    let mut builder = DocumentBuilder::new(text, is_dtd);
    let scanner = if is_dtd {
        builder.begin_dtd_file();
        Scanner::dtd(text, 0)
    } else {
        Scanner::new(text)
    };
    for token in scanner {
        builder.handle(token);
    }
    let node_count = builder.nodes.len();
    tracing::debug!(uri, nodes = node_count, is_dtd, "parsed document");
    Document::new(text.to_string(), uri.to_string(), builder.nodes, builder.roots, is_dtd)
}

/// True for URIs of external DTD files.
pub fn is_dtd_uri(uri: &str) -> bool {
    let lower = uri.to_ascii_lowercase();
    [".dtd", ".ent", ".mod"].iter().any(|ext| lower.ends_with(ext))
}

/// Where the builder is inside an end tag.
#[derive(Debug, Clone, Copy)]
enum EndTag {
    /// `</` seen, no name yet.
    Pending { start: usize },
    /// Name seen; the node it closed (or the dangling node it created).
    Resolved { node: NodeId },
}

struct DocumentBuilder<'a> {
    text: &'a str,
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
    /// Innermost open element.
    curr: Option<NodeId>,
    /// Element or prolog whose start tag is being scanned.
    tag_owner: Option<NodeId>,
    pending_attr: Option<String>,
    /// Comment, CDATA, PI, prolog or declaration awaiting its terminator.
    leaf: Option<NodeId>,
    doctype: Option<NodeId>,
    in_internal_subset: bool,
    end_tag: Option<EndTag>,
    is_dtd: bool,
}

impl<'a> DocumentBuilder<'a> {
    fn new(text: &'a str, is_dtd: bool) -> Self {
        Self {
            text,
            nodes: Vec::new(),
            roots: Vec::new(),
            curr: None,
            tag_owner: None,
            pending_attr: None,
            leaf: None,
            doctype: None,
            in_internal_subset: false,
            end_tag: None,
            is_dtd,
        }
    }

    /// An external DTD is modeled as one nameless doctype spanning the file.
    fn begin_dtd_file(&mut self) {
        let id = self.push_child(NodeKind::DocumentType(DocumentType::default()), 0, self.text.len());
        self.node_mut(id).closed = true;
        self.doctype = Some(id);
    }

    fn handle(&mut self, token: Token<'_>) {
        let (start, end) = (token.start(), token.end());
        match token.kind {
            // --- Tags ---
            TokenKind::StartTagOpen => {
                self.begin_content();
                let element = Element {
                    start_tag_open_offset: Some(start),
                    ..Default::default()
                };
                let id = self.push_child(NodeKind::Element(element), start, end);
                self.curr = Some(id);
                self.tag_owner = Some(id);
            }
            TokenKind::StartTag => {
                if let Some(owner) = self.tag_owner {
                    if let Some(element) = self.element_mut(owner) {
                        element.tag_name = Some(token.text.to_string());
                        element.tag_name_span = Some(token.span);
                    }
                    self.extend(owner, end);
                }
            }
            TokenKind::AttributeName => {
                if let Some(attributes) = self.owner_attributes() {
                    attributes.insert(token.text.to_string(), Attr::new(token.text, token.span));
                    self.pending_attr = Some(token.text.to_string());
                }
                self.extend_tag_owner(end);
            }
            TokenKind::DelimiterAssign => {
                if let Some(attr) = self.pending_attr_mut() {
                    attr.has_delimiter = true;
                }
                self.extend_tag_owner(end);
            }
            TokenKind::AttributeValue => {
                if let Some(attr) = self.pending_attr_mut() {
                    let (value, quote) = unquote(token.text);
                    attr.value = Some(value);
                    attr.quote = quote;
                    attr.value_span = Some(token.span);
                }
                self.pending_attr = None;
                self.extend_tag_owner(end);
            }
            TokenKind::StartTagClose => {
                if let Some(owner) = self.tag_owner.take() {
                    if let Some(element) = self.element_mut(owner) {
                        element.start_tag_close_offset = Some(start);
                    } else if self.leaf == Some(owner) {
                        // `<?xml ... >`: a prolog ended without `?`.
                        self.leaf = None;
                    }
                    self.extend(owner, end);
                }
                self.pending_attr = None;
            }
            TokenKind::StartTagSelfClose => {
                if let Some(owner) = self.tag_owner.take() {
                    if let Some(element) = self.element_mut(owner) {
                        element.start_tag_close_offset = Some(start);
                        element.self_closed = true;
                        let node = self.node_mut(owner);
                        node.end = end;
                        node.closed = true;
                        self.curr = node.parent;
                    } else {
                        self.extend(owner, end);
                    }
                }
                self.pending_attr = None;
            }
            TokenKind::EndTagOpen => {
                self.begin_content();
                self.end_tag = Some(EndTag::Pending { start });
            }
            TokenKind::EndTag => {
                if let Some(EndTag::Pending { start: open }) = self.end_tag {
                    let node = self.close_element(open, token);
                    self.end_tag = Some(EndTag::Resolved { node });
                }
            }
            TokenKind::EndTagClose => match self.end_tag.take() {
                Some(EndTag::Pending { start: open }) => {
                    let id = self.push_orphan_end_tag(open, None, end);
                    if let Some(element) = self.element_mut(id) {
                        element.end_tag_close_offset = Some(start);
                    }
                    self.node_mut(id).closed = true;
                }
                Some(EndTag::Resolved { node }) => {
                    if let Some(element) = self.element_mut(node) {
                        element.end_tag_close_offset = Some(start);
                    }
                    let node = self.node_mut(node);
                    node.end = end;
                    node.closed = true;
                }
                None => {}
            },

            // --- Character data ---
            TokenKind::Content => {
                if self.in_dtd_content() {
                    self.close_leaf();
                } else {
                    self.begin_content();
                    if !token.text.trim().is_empty() {
                        let id = self.push_child(NodeKind::Text, start, end);
                        self.node_mut(id).closed = true;
                    }
                }
            }
            TokenKind::Whitespace | TokenKind::Unknown => self.extend_active(end),

            // --- Comments and CDATA ---
            TokenKind::StartCommentTag => {
                self.begin_content();
                let id = self.push_child(NodeKind::Comment(Delimited::default()), start, end);
                self.leaf = Some(id);
            }
            TokenKind::CDataTagOpen => {
                self.begin_content();
                let id = self.push_child(NodeKind::CData(Delimited::default()), start, end);
                self.leaf = Some(id);
            }
            TokenKind::Comment | TokenKind::CDataContent => {
                if let Some(id) = self.leaf {
                    if let NodeKind::Comment(delimited) | NodeKind::CData(delimited) =
                        &mut self.node_mut(id).kind
                    {
                        delimited.content = Some(token.span);
                    }
                    self.extend(id, end);
                }
            }
            TokenKind::EndCommentTag
            | TokenKind::CDataTagClose
            | TokenKind::PIEnd
            | TokenKind::PrologEnd
            | TokenKind::DtdEndTag => self.finish_leaf(end),

            // --- Prolog and processing instructions ---
            TokenKind::StartPrologOrPI => {
                self.begin_content();
                let pi = ProcessingInstruction::default();
                let id = self.push_child(NodeKind::ProcessingInstruction(pi), start, end);
                self.leaf = Some(id);
            }
            TokenKind::PrologName | TokenKind::PIName => {
                if let Some(id) = self.leaf {
                    let is_prolog = token.kind == TokenKind::PrologName;
                    let node = self.node_mut(id);
                    if let NodeKind::ProcessingInstruction(pi) = &mut node.kind {
                        pi.target = Some(token.text.to_string());
                        pi.target_span = Some(token.span);
                        if is_prolog {
                            let pi = std::mem::take(pi);
                            node.kind = NodeKind::Prolog(pi);
                        }
                    }
                    if is_prolog {
                        self.tag_owner = Some(id);
                    }
                    self.extend(id, end);
                }
            }
            TokenKind::PIContent => {
                if let Some(id) = self.leaf {
                    if let NodeKind::ProcessingInstruction(pi) = &mut self.node_mut(id).kind {
                        let content_start = pi.content.map_or(start, |c| c.start);
                        pi.content = Some(Span::new(content_start, end));
                    }
                    self.extend(id, end);
                }
            }

            // --- Doctype ---
            TokenKind::DtdStartDoctypeTag => {
                self.begin_content();
                let id = self.push_child(NodeKind::DocumentType(DocumentType::default()), start, end);
                self.doctype = Some(id);
            }
            TokenKind::DtdDoctypeName => {
                if let Some(doctype) = self.doctype_mut() {
                    doctype.name = Some(token.text.to_string());
                    doctype.name_span = Some(token.span);
                }
                self.extend_active(end);
            }
            TokenKind::DtdExternalKindPublic
            | TokenKind::DtdExternalKindSystem
            | TokenKind::DtdExternalPublicId
            | TokenKind::DtdExternalSystemId
                if !self.in_declaration() =>
            {
                if let Some(doctype) = self.doctype_mut() {
                    match token.kind {
                        TokenKind::DtdExternalKindPublic => doctype.kind = Some(ExternalKind::Public),
                        TokenKind::DtdExternalKindSystem => doctype.kind = Some(ExternalKind::System),
                        TokenKind::DtdExternalPublicId => doctype.public_id = Some(token.span),
                        _ => doctype.system_id = Some(token.span),
                    }
                }
                self.extend_active(end);
            }
            TokenKind::DtdStartInternalSubset => {
                if let Some(doctype) = self.doctype_mut() {
                    doctype.internal_subset_start = Some(start);
                }
                self.in_internal_subset = true;
                self.extend_active(end);
            }
            TokenKind::DtdEndInternalSubset => {
                self.close_leaf();
                if let Some(doctype) = self.doctype_mut() {
                    doctype.internal_subset_end = Some(start);
                }
                self.in_internal_subset = false;
                self.extend_active(end);
            }
            TokenKind::DtdEndDoctypeTag => {
                self.close_leaf();
                if let Some(id) = self.doctype.take() {
                    let node = self.node_mut(id);
                    node.end = end;
                    node.closed = true;
                }
                self.in_internal_subset = false;
            }

            // --- Declarations ---
            TokenKind::DtdStartElement
            | TokenKind::DtdStartAttlist
            | TokenKind::DtdStartEntity
            | TokenKind::DtdStartNotation => {
                self.close_leaf();
                let decl = DtdDecl {
                    in_internal_subset: self.in_internal_subset,
                    ..Default::default()
                };
                let kind = match token.kind {
                    TokenKind::DtdStartElement => NodeKind::ElementDecl(decl),
                    TokenKind::DtdStartAttlist => NodeKind::AttlistDecl(decl),
                    TokenKind::DtdStartEntity => NodeKind::EntityDecl(decl),
                    _ => NodeKind::NotationDecl(decl),
                };
                let id = self.push_child(kind, start, end);
                self.leaf = Some(id);
            }
            TokenKind::DtdUnrecognizedTag => self.close_leaf(),
            TokenKind::Eos => self.finish(),
            _ => self.add_declaration_param(token),
        }
    }

    // --- Declarations ---

    fn in_declaration(&self) -> bool {
        self.leaf
            .is_some_and(|id| self.nodes[id.index()].as_declaration().is_some())
    }

    fn add_declaration_param(&mut self, token: Token<'_>) {
        let in_internal_subset = self.in_internal_subset;
        let Some(id) = self.leaf else {
            self.extend_active(token.end());
            return;
        };
        let node = self.node_mut(id);
        node.end = node.end.max(token.end());
        let (NodeKind::ElementDecl(decl)
        | NodeKind::AttlistDecl(decl)
        | NodeKind::EntityDecl(decl)
        | NodeKind::NotationDecl(decl)) = &mut node.kind
        else {
            return;
        };
        match token.kind {
            TokenKind::DtdElementDeclName
            | TokenKind::DtdAttlistElementName
            | TokenKind::DtdEntityName
            | TokenKind::DtdNotationName
                if decl.name.is_none() =>
            {
                decl.name = Some(token.text.to_string());
                decl.name_span = Some(token.span);
            }
            kind => {
                if kind == TokenKind::DtdEntityPercent {
                    decl.parameter_entity = true;
                }
                decl.params.push(DtdParam {
                    kind,
                    span: token.span,
                    in_internal_subset,
                });
            }
        }
    }

    // --- End tags ---

    /// Resolve an end tag name against the open-element chain.
    fn close_element(&mut self, open: usize, name: Token<'_>) -> NodeId {
        let mut matched = None;
        let mut cursor = self.curr;
        while let Some(id) = cursor {
            if self.nodes[id.index()].tag_name() == Some(name.text) {
                matched = Some(id);
                break;
            }
            cursor = self.nodes[id.index()].parent;
        }

        let Some(matched) = matched else {
            tracing::trace!(name = name.text, offset = open, "end tag matches no open element");
            return self.push_orphan_end_tag(open, Some(name), name.end());
        };

        let mut cursor = self.curr;
        while let Some(id) = cursor {
            if id == matched {
                break;
            }
            let node = self.node_mut(id);
            tracing::trace!(offset = node.start, "element implicitly closed");
            node.end = open;
            cursor = node.parent;
        }

        if let Some(element) = self.element_mut(matched) {
            element.end_tag_open_offset = Some(open);
        }
        let node = self.node_mut(matched);
        node.end = name.end();
        node.closed = true;
        self.curr = node.parent;
        matched
    }

    fn push_orphan_end_tag(&mut self, open: usize, name: Option<Token<'_>>, end: usize) -> NodeId {
        let element = Element {
            tag_name: name.map(|t| t.text.to_string()),
            tag_name_span: name.map(|t| t.span),
            end_tag_open_offset: Some(open),
            ..Default::default()
        };
        self.push_child(NodeKind::Element(element), open, end)
    }

    /// A `</` never followed by a name becomes a nameless dangling end tag.
    fn flush_end_tag(&mut self) {
        if let Some(EndTag::Pending { start }) = self.end_tag.take() {
            let end = (start + 2).min(self.text.len());
            self.push_orphan_end_tag(start, None, end);
        }
    }

    // --- Node bookkeeping ---

    /// Called before anything that starts new content: ends the current
    /// start tag, end tag, leaf and doctype header.
    fn begin_content(&mut self) {
        self.close_leaf();
        self.flush_end_tag();
        self.tag_owner = None;
        self.pending_attr = None;
        if !self.in_dtd_content() {
            self.doctype = None;
        }
    }

    fn close_leaf(&mut self) {
        if let Some(id) = self.leaf.take() {
            if self.tag_owner == Some(id) {
                self.tag_owner = None;
            }
        }
    }

    fn finish_leaf(&mut self, end: usize) {
        if let Some(id) = self.leaf.take() {
            let node = self.node_mut(id);
            node.end = end;
            node.closed = true;
            if self.tag_owner == Some(id) {
                self.tag_owner = None;
            }
        }
    }

    fn finish(&mut self) {
        self.close_leaf();
        self.flush_end_tag();
        let len = self.text.len();
        let mut cursor = self.curr.take();
        while let Some(id) = cursor {
            let node = self.node_mut(id);
            node.end = len;
            cursor = node.parent;
        }
        // Constructs cut off inside an unterminated doctype can run past it.
        // Children always follow their parent in the arena, so one reverse
        // pass grows every parent over its children.
        for index in (0..self.nodes.len()).rev() {
            let (parent, end) = (self.nodes[index].parent, self.nodes[index].end);
            if let Some(parent) = parent {
                self.extend(parent, end);
            }
        }
    }

    fn in_dtd_content(&self) -> bool {
        self.is_dtd || self.in_internal_subset
    }

    fn push_child(&mut self, kind: NodeKind, start: usize, end: usize) -> NodeId {
        let parent = match self.doctype {
            Some(doctype) if self.in_dtd_content() => Some(doctype),
            _ => self.curr,
        };
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(kind, start, end, parent));
        match parent {
            Some(parent) => self.node_mut(parent).children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    /// Extend the construct the scanner is currently inside.
    fn extend_active(&mut self, end: usize) {
        let active = match self.end_tag {
            Some(EndTag::Resolved { node }) => Some(node),
            Some(EndTag::Pending { .. }) => None,
            None => self.tag_owner.or(self.leaf).or(self.doctype),
        };
        if let Some(id) = active {
            self.extend(id, end);
        }
    }

    fn extend_tag_owner(&mut self, end: usize) {
        if let Some(id) = self.tag_owner {
            self.extend(id, end);
        }
    }

    fn extend(&mut self, id: NodeId, end: usize) {
        let node = self.node_mut(id);
        node.end = node.end.max(end);
    }

    fn owner_attributes(&mut self) -> Option<&mut indexmap::IndexMap<String, Attr>> {
        let id = self.tag_owner?;
        match &mut self.node_mut(id).kind {
            NodeKind::Element(element) => Some(&mut element.attributes),
            NodeKind::Prolog(pi) => Some(&mut pi.attributes),
            _ => None,
        }
    }

    fn pending_attr_mut(&mut self) -> Option<&mut Attr> {
        let name = self.pending_attr.clone()?;
        self.owner_attributes()?.get_mut(&name)
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.node_mut(id).kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    fn doctype_mut(&mut self) -> Option<&mut DocumentType> {
        let id = self.doctype?;
        match &mut self.node_mut(id).kind {
            NodeKind::DocumentType(doctype) => Some(doctype),
            _ => None,
        }
    }
}

/// Strip a leading quote and its matching trailing quote, if present.
fn unquote(text: &str) -> (String, Option<char>) {
    match text.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let inner = &text[1..];
            let inner = inner.strip_suffix(quote).unwrap_or(inner);
            (inner.to_string(), Some(quote))
        }
        _ => (text.to_string(), None),
    }
}
