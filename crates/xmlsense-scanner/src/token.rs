/// A half-open byte range `[start, end)` into the scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "span start {start} is after end {end}");
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True when `offset` lies inside the span or on either boundary.
    pub fn touches(&self, offset: usize) -> bool {
        self.start <= offset && offset <= self.end
    }
}

/// Token classification for XML and DTD text.
///
/// The set is closed: malformed input is modeled with `Unknown`,
/// `DtdUnrecognizedParameters` and `DtdUnrecognizedTag` rather than errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Tags
    StartTagOpen,      // <
    StartTag,          // element name after <
    StartTagClose,     // >
    StartTagSelfClose, // />
    EndTagOpen,        // </
    EndTag,            // element name after </
    EndTagClose,       // >

    // Attributes
    AttributeName,
    DelimiterAssign, // =
    AttributeValue,

    // Character data
    Content,
    Whitespace,

    // Comments and CDATA
    StartCommentTag, // <!--
    Comment,
    EndCommentTag,  // -->
    CDataTagOpen,   // <![CDATA[
    CDataContent,
    CDataTagClose, // ]]>

    // Prolog and processing instructions
    StartPrologOrPI, // <?
    PrologName,      // xml
    PrologEnd,       // ?> closing a prolog
    PIName,
    PIContent,
    PIEnd, // ?> closing a processing instruction

    // Doctype
    DtdStartDoctypeTag, // <!DOCTYPE
    DtdDoctypeName,
    DtdStartInternalSubset, // [
    DtdEndInternalSubset,   // ]
    DtdEndDoctypeTag,       // >

    // External identifiers, shared by doctype, entity and notation declarations
    DtdExternalKindPublic, // PUBLIC
    DtdExternalKindSystem, // SYSTEM
    DtdExternalPublicId,
    DtdExternalSystemId,

    // <!ELEMENT
    DtdStartElement,
    DtdElementDeclName,
    DtdElementCategory, // EMPTY | ANY
    DtdStartElementContent,
    DtdElementContent,
    DtdEndElementContent,

    // <!ATTLIST
    DtdStartAttlist,
    DtdAttlistElementName,
    DtdAttlistAttributeName,
    DtdAttlistAttributeType,
    DtdAttlistAttributeValue,

    // <!ENTITY
    DtdStartEntity,
    DtdEntityPercent,
    DtdEntityName,
    DtdEntityValue,

    // <!NOTATION
    DtdStartNotation,
    DtdNotationName,

    // Declaration recovery
    DtdEndTag, // > closing any declaration
    DtdUnrecognizedParameters,
    DtdUnrecognizedTag,

    Unknown,

    // End of input
    Eos,
}

impl TokenKind {
    /// Tokens that open a markup declaration inside a DTD.
    pub fn is_dtd_declaration_start(self) -> bool {
        matches!(
            self,
            TokenKind::DtdStartElement
                | TokenKind::DtdStartAttlist
                | TokenKind::DtdStartEntity
                | TokenKind::DtdStartNotation
        )
    }
}

/// A token produced by the scanner, borrowing its text from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub span: Span,
    pub text: &'a str,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind, span: Span, text: &'a str) -> Self {
        Self { kind, span, text }
    }

    pub fn start(&self) -> usize {
        self.span.start
    }

    pub fn end(&self) -> usize {
        self.span.end
    }
}

/// Void elements (never carry content or an end tag).
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Check if a tag name is a void element.
pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

/// XML whitespace: space, tab, line feed and carriage return.
pub fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

pub fn is_name_start_char(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':' || (!c.is_ascii() && !c.is_whitespace())
}

pub fn is_name_char(c: char) -> bool {
    is_name_start_char(c) || c.is_ascii_digit() || c == '.' || c == '-'
}
