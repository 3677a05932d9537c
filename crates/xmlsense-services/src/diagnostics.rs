//! Well-formedness checks.
//!
//! The validator re-scans the text on its own and keeps a stack of open tag
//! names; it never looks at the built tree. Recovery from a mismatched end
//! tag follows the tree builder's policy: an end tag naming an element
//! deeper in the stack closes everything above it, and each of those is
//! reported as missing its end tag.
//!
//! Once the root element is closed, the first markup or non-blank text
//! after it is reported and validation stops there.

use lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString};
use tokio_util::sync::CancellationToken;
use xmlsense_dom::Document;
use xmlsense_scanner::{Scanner, Span, Token, TokenKind};

use crate::settings::ValidationSettings;
use crate::ServiceError;

/// `source` of every diagnostic.
pub const SOURCE: &str = "xml";

/// Kind of well-formedness defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    TagMissingName,
    TagNotClosed,
    SpaceBeforeTagName,
    AttributeMissingDelimiter,
    AttributeMissingValue,
    MissingClosingQuote,
    MissingQuotes,
    DuplicateAttribute,
    EndTagWithAttributes,
    MissingEndTag,
    MissingStartTag,
    ContentOutsideRoot,
    NamespaceInPiTarget,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::TagMissingName => "tag-missing-name",
            ErrorCode::TagNotClosed => "tag-not-closed",
            ErrorCode::SpaceBeforeTagName => "space-before-tag-name",
            ErrorCode::AttributeMissingDelimiter => "attribute-missing-delimiter",
            ErrorCode::AttributeMissingValue => "attribute-missing-value",
            ErrorCode::MissingClosingQuote => "missing-closing-quote",
            ErrorCode::MissingQuotes => "missing-quotes",
            ErrorCode::DuplicateAttribute => "duplicate-attribute",
            ErrorCode::EndTagWithAttributes => "end-tag-with-attributes",
            ErrorCode::MissingEndTag => "missing-end-tag",
            ErrorCode::MissingStartTag => "missing-start-tag",
            ErrorCode::ContentOutsideRoot => "content-outside-root",
            ErrorCode::NamespaceInPiTarget => "namespace-in-pi-target",
        }
    }
}

/// One finding, in byte offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub code: ErrorCode,
    pub span: Span,
    pub message: String,
}

/// Validate document content.
pub fn validate(
    text: &str,
    settings: &ValidationSettings,
    cancel: &CancellationToken,
) -> Result<Vec<Problem>, ServiceError> {
    Validator::new(settings).run(Scanner::new(text), cancel)
}

/// Validate a parsed document and convert the findings to LSP diagnostics.
/// External DTD files are scanned with the DTD grammar.
pub fn do_diagnostics(
    document: &Document,
    settings: &ValidationSettings,
    cancel: &CancellationToken,
) -> Result<Vec<Diagnostic>, ServiceError> {
    let text = document.text();
    let scanner = if document.is_dtd() {
        Scanner::dtd(text, 0)
    } else {
        Scanner::new(text)
    };
    let problems = Validator::new(settings).run(scanner, cancel)?;
    problems
        .into_iter()
        .map(|problem| {
            Ok(Diagnostic {
                range: document.range(problem.span.start, problem.span.end)?,
                severity: Some(DiagnosticSeverity::ERROR),
                code: Some(NumberOrString::String(problem.code.as_str().to_string())),
                source: Some(SOURCE.to_string()),
                message: problem.message,
                ..Default::default()
            })
        })
        .collect()
}

/// Where an attribute stands inside the current start tag.
#[derive(Debug, Clone, Copy)]
enum AttrState<'a> {
    Idle,
    Named(Token<'a>),
    Assigned(Token<'a>),
}

/// A start or end tag being scanned.
struct TagRegion<'a> {
    open: Token<'a>,
    is_end: bool,
    name: Option<Token<'a>>,
    /// Whitespace seen between the opening bracket and the name.
    leading_space: Option<Span>,
    /// End of the last name or attribute text consumed.
    last_end: usize,
    attr: AttrState<'a>,
    seen: Vec<&'a str>,
    /// Extent of attribute-like text inside an end tag.
    stray: Option<Span>,
}

impl<'a> TagRegion<'a> {
    fn new(open: Token<'a>, is_end: bool) -> Self {
        Self {
            open,
            is_end,
            name: None,
            leading_space: None,
            last_end: open.end(),
            attr: AttrState::Idle,
            seen: Vec::new(),
            stray: None,
        }
    }

    fn add_stray(&mut self, span: Span) {
        self.stray = Some(match self.stray {
            Some(stray) => Span::new(stray.start, span.end),
            None => span,
        });
    }
}

/// Outcome of feeding one token.
enum Flow {
    Continue,
    Stop,
}

struct Validator<'a> {
    max_problems: usize,
    problems: Vec<Problem>,
    stack: Vec<Token<'a>>,
    tag: Option<TagRegion<'a>>,
    root_closed: bool,
}

impl<'a> Validator<'a> {
    fn new(settings: &ValidationSettings) -> Self {
        Self {
            max_problems: settings.max_problems,
            problems: Vec::new(),
            stack: Vec::new(),
            tag: None,
            root_closed: false,
        }
    }

    fn run(
        mut self,
        mut scanner: Scanner<'a>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Problem>, ServiceError> {
        loop {
            if cancel.is_cancelled() {
                tracing::debug!(found = self.problems.len(), "validation cancelled");
                return Err(ServiceError::Cancelled);
            }
            let token = scanner.next_token();
            if token.kind == TokenKind::Eos {
                self.finish();
                break;
            }
            if let Flow::Stop = self.handle(token) {
                break;
            }
        }
        self.problems.truncate(self.max_problems);
        tracing::debug!(
            found = self.problems.len(),
            capped = self.is_full(),
            "validated document"
        );
        Ok(self.problems)
    }

    fn handle(&mut self, token: Token<'a>) -> Flow {
        if self.is_full() {
            return Flow::Stop;
        }

        // Tokens that belong to the tag being scanned.
        if self.tag.is_some() {
            match token.kind {
                TokenKind::StartTag | TokenKind::EndTag => {
                    self.tag_name(token);
                    return Flow::Continue;
                }
                TokenKind::Whitespace => {
                    if let Some(tag) = self.tag.as_mut() {
                        if tag.name.is_none() && tag.seen.is_empty() {
                            tag.leading_space = Some(token.span);
                        }
                    }
                    return Flow::Continue;
                }
                TokenKind::AttributeName => {
                    self.attribute_name(token);
                    return Flow::Continue;
                }
                TokenKind::DelimiterAssign => {
                    if let Some(tag) = self.tag.as_mut() {
                        if let AttrState::Named(name) = tag.attr {
                            tag.attr = AttrState::Assigned(name);
                        }
                        tag.last_end = token.end();
                    }
                    return Flow::Continue;
                }
                TokenKind::AttributeValue => {
                    self.attribute_value(token);
                    return Flow::Continue;
                }
                TokenKind::Unknown => {
                    if let Some(tag) = self.tag.as_mut() {
                        if tag.is_end && tag.name.is_some() {
                            tag.add_stray(token.span);
                        }
                    }
                    return Flow::Continue;
                }
                TokenKind::StartTagClose | TokenKind::StartTagSelfClose | TokenKind::EndTagClose => {
                    self.close_tag(token);
                    return Flow::Continue;
                }
                _ => self.unclosed_tag(false),
            }
        }

        if self.root_closed && self.is_outside_root(token) {
            self.report(
                ErrorCode::ContentOutsideRoot,
                token.span,
                "Content is not allowed outside the root element".to_string(),
            );
            return Flow::Stop;
        }

        match token.kind {
            TokenKind::StartTagOpen => self.tag = Some(TagRegion::new(token, false)),
            TokenKind::EndTagOpen => self.tag = Some(TagRegion::new(token, true)),
            TokenKind::PIName => self.check_pi_target(token),
            _ => {}
        }
        Flow::Continue
    }

    fn finish(&mut self) {
        if self.tag.is_some() {
            self.unclosed_tag(true);
        }
        while let Some(name) = self.stack.pop() {
            self.missing_end_tag(name);
        }
    }

    // --- Tags ---

    fn tag_name(&mut self, token: Token<'a>) {
        let Some(tag) = self.tag.as_mut() else {
            return;
        };
        tag.name = Some(token);
        tag.last_end = token.end();
        if let Some(space) = tag.leading_space.take() {
            self.report(
                ErrorCode::SpaceBeforeTagName,
                space,
                "Invalid white space before tag name".to_string(),
            );
        }
    }

    fn close_tag(&mut self, close: Token<'a>) {
        let Some(mut tag) = self.tag.take() else {
            return;
        };
        let Some(name) = tag.name else {
            self.report(
                ErrorCode::TagMissingName,
                Span::new(tag.open.start(), close.end()),
                "Tag is missing a name".to_string(),
            );
            return;
        };

        if tag.is_end {
            if let Some(stray) = tag.stray {
                self.report(
                    ErrorCode::EndTagWithAttributes,
                    stray,
                    format!("End tag \"{}\" must not have attributes", name.text),
                );
            }
            self.pop_end_tag(name);
            return;
        }

        self.flush_attribute(&mut tag);
        match close.kind {
            TokenKind::StartTagClose => self.stack.push(name),
            _ if self.stack.is_empty() => self.root_closed = true,
            _ => {}
        }
    }

    /// A tag interrupted by other markup or the end of input. An interrupted
    /// start tag still opens its element, so the markup after it nests
    /// inside, the same way the tree builder recovers.
    fn unclosed_tag(&mut self, at_end: bool) {
        let Some(mut tag) = self.tag.take() else {
            return;
        };
        if !tag.is_end {
            self.flush_attribute(&mut tag);
        }
        let what = match (tag.is_end, tag.name) {
            (false, Some(name)) => format!("Start tag \"{}\" is not closed", name.text),
            (true, Some(name)) => format!("End tag \"{}\" is not closed", name.text),
            (_, None) => "Tag is not closed".to_string(),
        };
        self.report(
            ErrorCode::TagNotClosed,
            Span::new(tag.open.start(), tag.last_end),
            what,
        );
        match (tag.is_end, tag.name) {
            // An unterminated end tag still closes the element it names.
            (true, Some(name)) => self.pop_end_tag(name),
            // At the end of input the open element has nothing left to
            // contain, and TagNotClosed already covers it.
            (false, Some(name)) if !at_end => self.stack.push(name),
            _ => {}
        }
    }

    fn pop_end_tag(&mut self, name: Token<'a>) {
        let Some(depth) = self.stack.iter().rposition(|open| open.text == name.text) else {
            self.report(
                ErrorCode::MissingStartTag,
                name.span,
                format!("Missing start tag \"{}\"", name.text),
            );
            return;
        };
        while self.stack.len() > depth + 1 {
            if let Some(open) = self.stack.pop() {
                self.missing_end_tag(open);
            }
        }
        self.stack.pop();
        if self.stack.is_empty() {
            self.root_closed = true;
        }
    }

    fn missing_end_tag(&mut self, name: Token<'a>) {
        self.report(
            ErrorCode::MissingEndTag,
            name.span,
            format!("Missing end tag \"{}\"", name.text),
        );
    }

    // --- Attributes ---

    fn attribute_name(&mut self, token: Token<'a>) {
        let Some(mut tag) = self.tag.take() else {
            return;
        };
        if tag.is_end {
            tag.add_stray(token.span);
        } else {
            self.flush_attribute(&mut tag);
            if tag.seen.contains(&token.text) {
                let element = tag.name.map_or("", |name| name.text);
                self.report(
                    ErrorCode::DuplicateAttribute,
                    token.span,
                    format!(
                        "Attribute \"{}\" was already specified for element \"{element}\"",
                        token.text
                    ),
                );
            } else {
                tag.seen.push(token.text);
            }
            tag.attr = AttrState::Named(token);
        }
        tag.last_end = token.end();
        self.tag = Some(tag);
    }

    fn attribute_value(&mut self, token: Token<'a>) {
        let Some(mut tag) = self.tag.take() else {
            return;
        };
        tag.last_end = token.end();
        if tag.is_end {
            tag.add_stray(token.span);
            self.tag = Some(tag);
            return;
        }
        tag.attr = AttrState::Idle;
        self.tag = Some(tag);

        let value = token.text.trim();
        let mut chars = value.chars();
        let (Some(first), last) = (chars.next(), chars.next_back()) else {
            return;
        };
        if matches!(first, '"' | '\'') {
            if last != Some(first) {
                self.report(
                    ErrorCode::MissingClosingQuote,
                    token.span,
                    "Attribute value is missing its closing quote".to_string(),
                );
            }
        } else {
            self.report(
                ErrorCode::MissingQuotes,
                token.span,
                "Attribute value must be quoted".to_string(),
            );
        }
    }

    /// Report an attribute left without `=` or without a value.
    fn flush_attribute(&mut self, tag: &mut TagRegion<'a>) {
        match std::mem::replace(&mut tag.attr, AttrState::Idle) {
            AttrState::Idle => {}
            AttrState::Named(name) => self.report(
                ErrorCode::AttributeMissingDelimiter,
                name.span,
                format!("Attribute \"{}\" has no value", name.text),
            ),
            AttrState::Assigned(name) => self.report(
                ErrorCode::AttributeMissingValue,
                name.span,
                format!("Attribute \"{}\" is missing a value", name.text),
            ),
        }
    }

    // --- Other markup ---

    fn check_pi_target(&mut self, token: Token<'a>) {
        if let Some(colon) = token.text.find(':') {
            self.report(
                ErrorCode::NamespaceInPiTarget,
                Span::new(token.start() + colon, token.end()),
                "Namespaces are not allowed in processing instruction targets".to_string(),
            );
        }
    }

    fn is_outside_root(&self, token: Token<'a>) -> bool {
        match token.kind {
            TokenKind::StartTagOpen
            | TokenKind::EndTagOpen
            | TokenKind::CDataTagOpen
            | TokenKind::DtdStartDoctypeTag => true,
            TokenKind::Content => !token.text.trim().is_empty(),
            _ => false,
        }
    }

    // --- Helpers ---

    fn report(&mut self, code: ErrorCode, span: Span, message: String) {
        if self.is_full() {
            return;
        }
        self.problems.push(Problem {
            code,
            span,
            message,
        });
    }

    fn is_full(&self) -> bool {
        self.problems.len() >= self.max_problems
    }
}
