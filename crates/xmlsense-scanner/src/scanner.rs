use crate::token::{is_name_char, is_name_start_char, is_whitespace, Span, Token, TokenKind};

/// Which construct an external identifier (`PUBLIC "…" "…"` / `SYSTEM "…"`)
/// belongs to, so the scanner knows where to resume once it is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalIdOwner {
    Doctype,
    Declaration,
}

/// Scanner mode. Every token is produced from exactly one state, and the
/// state after a token is all that is needed to resume scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScannerState {
    WithinContent,
    AfterOpeningStartTag,
    WithinTag,
    AfterAttributeName,
    BeforeAttributeValue,
    AfterOpeningEndTag,
    WithinEndTag,
    WithinComment,
    WithinCData,
    PrologOrPI,
    WithinPI,

    WithinDoctype,
    AfterDoctypeName,
    AfterExternalPublic(ExternalIdOwner),
    AfterExternalPublicId(ExternalIdOwner),
    AfterExternalSystem(ExternalIdOwner),

    WithinDtdContent,
    WithinElementDecl,
    AfterElementDeclName,
    WithinElementContent,
    WithinAttlistDecl,
    AfterAttlistElementName,
    AfterAttlistAttributeName,
    AfterAttlistAttributeType,
    WithinEntityDecl,
    AfterEntityName,
    WithinNotationDecl,
    AfterNotationName,
    DtdTrailingParameters,
}

impl ScannerState {
    /// True for states that belong to the DTD grammar (internal subset or
    /// external DTD file), as opposed to document content and the doctype
    /// header itself.
    pub fn is_dtd(self) -> bool {
        matches!(
            self,
            ScannerState::WithinDtdContent
                | ScannerState::WithinElementDecl
                | ScannerState::AfterElementDeclName
                | ScannerState::WithinElementContent
                | ScannerState::WithinAttlistDecl
                | ScannerState::AfterAttlistElementName
                | ScannerState::AfterAttlistAttributeName
                | ScannerState::AfterAttlistAttributeType
                | ScannerState::WithinEntityDecl
                | ScannerState::AfterEntityName
                | ScannerState::WithinNotationDecl
                | ScannerState::AfterNotationName
                | ScannerState::DtdTrailingParameters
                | ScannerState::AfterExternalPublic(ExternalIdOwner::Declaration)
                | ScannerState::AfterExternalPublicId(ExternalIdOwner::Declaration)
                | ScannerState::AfterExternalSystem(ExternalIdOwner::Declaration)
        )
    }
}

/// Restartable, error-tolerant XML scanner.
///
/// A scanner is a cursor over borrowed text: `(offset, state)` fully
/// describes where it is, so it can be started anywhere a previous scan
/// stopped without re-reading earlier text. It never fails; malformed
/// markup turns into `Unknown`/unrecognized tokens and scanning continues.
///
/// Tokens are contiguous: the end of one token is the start of the next,
/// and a full scan covers the input exactly once before yielding `Eos`.
pub struct Scanner<'a> {
    source: &'a str,
    pos: usize,
    state: ScannerState,
    in_dtd: bool,
    dtd_file: bool,
    finished: bool,
}

impl<'a> Scanner<'a> {
    /// Create a scanner over document content, starting at offset 0.
    pub fn new(source: &'a str) -> Self {
        Self::with_state(source, 0, ScannerState::WithinContent)
    }

    /// Resume scanning at `offset` in the given state.
    pub fn with_state(source: &'a str, offset: usize, state: ScannerState) -> Self {
        let pos = offset.min(source.len());
        debug_assert!(source.is_char_boundary(pos), "offset {pos} splits a character");
        Self {
            source,
            pos,
            state,
            in_dtd: state.is_dtd(),
            dtd_file: false,
            finished: false,
        }
    }

    /// Create a scanner for an external DTD file (`.dtd`, `.ent`, `.mod`),
    /// which is all declarations and has no surrounding doctype.
    pub fn dtd(source: &'a str, offset: usize) -> Self {
        let mut scanner = Self::with_state(source, offset, ScannerState::WithinDtdContent);
        scanner.dtd_file = true;
        scanner
    }

    /// Tokenize the entire source, including the trailing `Eos` token.
    pub fn tokenize(source: &'a str) -> Vec<Token<'a>> {
        Scanner::new(source).collect()
    }

    /// State the next call to [`Scanner::next_token`] will start from.
    pub fn state(&self) -> ScannerState {
        self.state
    }

    /// Current byte offset.
    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Produce the next token. Once the input is exhausted every call
    /// returns an empty `Eos` token at the end of the text.
    pub fn next_token(&mut self) -> Token<'a> {
        let start = self.pos;
        let token = self.scan_token();
        if token.kind != TokenKind::Eos && self.pos == start {
            // A state declined the input without consuming it; force progress.
            tracing::trace!(offset = start, state = ?self.state, "scanner stalled");
            self.advance();
            return self.finish(start, TokenKind::Unknown);
        }
        token
    }

    fn scan_token(&mut self) -> Token<'a> {
        let start = self.pos;
        loop {
            if self.is_at_end() {
                return self.finish(start, TokenKind::Eos);
            }

            match self.state {
                ScannerState::WithinContent => {
                    if self.advance_if("<") {
                        if self.peek() == '!' {
                            if self.advance_if("!--") {
                                return self.emit(start, TokenKind::StartCommentTag, ScannerState::WithinComment);
                            }
                            if self.advance_if("![CDATA[") {
                                return self.emit(start, TokenKind::CDataTagOpen, ScannerState::WithinCData);
                            }
                            if self.advance_if("!DOCTYPE") {
                                return self.emit(start, TokenKind::DtdStartDoctypeTag, ScannerState::WithinDoctype);
                            }
                        }
                        if self.advance_if("?") {
                            return self.emit(start, TokenKind::StartPrologOrPI, ScannerState::PrologOrPI);
                        }
                        if self.advance_if("/") {
                            return self.emit(start, TokenKind::EndTagOpen, ScannerState::AfterOpeningEndTag);
                        }
                        return self.emit(start, TokenKind::StartTagOpen, ScannerState::AfterOpeningStartTag);
                    }
                    self.advance_while(|c| c != '<');
                    return self.finish(start, TokenKind::Content);
                }

                ScannerState::AfterOpeningStartTag => {
                    if self.scan_name() {
                        return self.emit(start, TokenKind::StartTag, ScannerState::WithinTag);
                    }
                    if self.skip_whitespace() {
                        return self.finish(start, TokenKind::Whitespace);
                    }
                    if self.peek() == '<' {
                        self.state = ScannerState::WithinContent;
                    } else {
                        self.state = ScannerState::WithinTag;
                    }
                }

                ScannerState::WithinTag => {
                    if self.skip_whitespace() {
                        return self.finish(start, TokenKind::Whitespace);
                    }
                    if self.advance_if("?>") {
                        let next = self.content_state();
                        return self.emit(start, TokenKind::PrologEnd, next);
                    }
                    if self.advance_if("/>") {
                        return self.emit(start, TokenKind::StartTagSelfClose, ScannerState::WithinContent);
                    }
                    if self.advance_if(">") {
                        return self.emit(start, TokenKind::StartTagClose, ScannerState::WithinContent);
                    }
                    if self.peek() == '<' {
                        self.state = self.content_state();
                        continue;
                    }
                    if self.scan_name() {
                        return self.emit(start, TokenKind::AttributeName, ScannerState::AfterAttributeName);
                    }
                    match self.peek() {
                        '"' | '\'' => self.scan_quoted(),
                        '/' => self.advance(),
                        _ => self.advance_while(|c| {
                            !is_whitespace(c) && c != '>' && c != '<' && c != '/'
                        }),
                    }
                    return self.finish(start, TokenKind::Unknown);
                }

                ScannerState::AfterAttributeName => {
                    if self.skip_whitespace() {
                        return self.finish(start, TokenKind::Whitespace);
                    }
                    if self.advance_if("=") {
                        return self.emit(start, TokenKind::DelimiterAssign, ScannerState::BeforeAttributeValue);
                    }
                    self.state = ScannerState::WithinTag;
                }

                ScannerState::BeforeAttributeValue => {
                    if self.skip_whitespace() {
                        return self.finish(start, TokenKind::Whitespace);
                    }
                    match self.peek() {
                        '"' | '\'' => {
                            self.scan_quoted();
                            return self.emit(start, TokenKind::AttributeValue, ScannerState::WithinTag);
                        }
                        '>' | '<' => self.state = ScannerState::WithinTag,
                        _ if self.starts_with("/>") => self.state = ScannerState::WithinTag,
                        _ => {
                            while !self.is_at_end() {
                                let c = self.peek();
                                if is_whitespace(c) || c == '>' || c == '<' || self.starts_with("/>") {
                                    break;
                                }
                                self.advance();
                            }
                            return self.emit(start, TokenKind::AttributeValue, ScannerState::WithinTag);
                        }
                    }
                }

                ScannerState::AfterOpeningEndTag => {
                    if self.scan_name() {
                        return self.emit(start, TokenKind::EndTag, ScannerState::WithinEndTag);
                    }
                    if self.skip_whitespace() {
                        return self.finish(start, TokenKind::Whitespace);
                    }
                    if self.peek() == '<' {
                        self.state = ScannerState::WithinContent;
                    } else {
                        self.state = ScannerState::WithinEndTag;
                    }
                }

                ScannerState::WithinEndTag => {
                    if self.skip_whitespace() {
                        return self.finish(start, TokenKind::Whitespace);
                    }
                    if self.advance_if(">") {
                        return self.emit(start, TokenKind::EndTagClose, ScannerState::WithinContent);
                    }
                    match self.peek() {
                        '<' => {
                            self.state = ScannerState::WithinContent;
                            continue;
                        }
                        '"' | '\'' => self.scan_quoted(),
                        _ => self.advance_while(|c| !is_whitespace(c) && c != '>' && c != '<'),
                    }
                    return self.finish(start, TokenKind::Unknown);
                }

                ScannerState::WithinComment => {
                    if self.advance_if("-->") {
                        let next = self.content_state();
                        return self.emit(start, TokenKind::EndCommentTag, next);
                    }
                    self.advance_until_str("-->");
                    return self.finish(start, TokenKind::Comment);
                }

                ScannerState::WithinCData => {
                    if self.advance_if("]]>") {
                        return self.emit(start, TokenKind::CDataTagClose, ScannerState::WithinContent);
                    }
                    self.advance_until_str("]]>");
                    return self.finish(start, TokenKind::CDataContent);
                }

                ScannerState::PrologOrPI => {
                    if self.advance_if("?>") {
                        let next = self.content_state();
                        return self.emit(start, TokenKind::PIEnd, next);
                    }
                    if self.scan_name() {
                        if &self.source[start..self.pos] == "xml" {
                            return self.emit(start, TokenKind::PrologName, ScannerState::WithinTag);
                        }
                        return self.emit(start, TokenKind::PIName, ScannerState::WithinPI);
                    }
                    self.state = ScannerState::WithinPI;
                }

                ScannerState::WithinPI => {
                    if self.skip_whitespace() {
                        return self.finish(start, TokenKind::Whitespace);
                    }
                    if self.advance_if("?>") {
                        let next = self.content_state();
                        return self.emit(start, TokenKind::PIEnd, next);
                    }
                    if self.peek() == '<' {
                        self.state = self.content_state();
                        continue;
                    }
                    while !self.is_at_end() && !self.starts_with("?>") && self.peek() != '<' {
                        self.advance();
                    }
                    return self.finish(start, TokenKind::PIContent);
                }

                // --- Doctype ---
                ScannerState::WithinDoctype => {
                    if self.skip_whitespace() {
                        return self.finish(start, TokenKind::Whitespace);
                    }
                    if self.scan_name() {
                        return self.emit(start, TokenKind::DtdDoctypeName, ScannerState::AfterDoctypeName);
                    }
                    self.state = ScannerState::AfterDoctypeName;
                }

                ScannerState::AfterDoctypeName => {
                    if self.skip_whitespace() {
                        return self.finish(start, TokenKind::Whitespace);
                    }
                    if self.advance_if("[") {
                        self.in_dtd = true;
                        return self.emit(start, TokenKind::DtdStartInternalSubset, ScannerState::WithinDtdContent);
                    }
                    if self.advance_if(">") {
                        self.in_dtd = false;
                        return self.emit(start, TokenKind::DtdEndDoctypeTag, ScannerState::WithinContent);
                    }
                    if self.peek() == '<' {
                        self.in_dtd = false;
                        self.state = ScannerState::WithinContent;
                        continue;
                    }
                    if self.advance_if_word("PUBLIC") {
                        let next = ScannerState::AfterExternalPublic(ExternalIdOwner::Doctype);
                        return self.emit(start, TokenKind::DtdExternalKindPublic, next);
                    }
                    if self.advance_if_word("SYSTEM") {
                        let next = ScannerState::AfterExternalSystem(ExternalIdOwner::Doctype);
                        return self.emit(start, TokenKind::DtdExternalKindSystem, next);
                    }
                    self.advance_while(|c| !is_whitespace(c) && !matches!(c, '>' | '<' | '['));
                    return self.finish(start, TokenKind::DtdUnrecognizedParameters);
                }

                ScannerState::AfterExternalPublic(owner) => {
                    if self.skip_whitespace() {
                        return self.finish(start, TokenKind::Whitespace);
                    }
                    if matches!(self.peek(), '"' | '\'') {
                        self.scan_quoted();
                        let next = ScannerState::AfterExternalPublicId(owner);
                        return self.emit(start, TokenKind::DtdExternalPublicId, next);
                    }
                    self.state = Self::resume_after_external_id(owner);
                }

                ScannerState::AfterExternalPublicId(owner) | ScannerState::AfterExternalSystem(owner) => {
                    if self.skip_whitespace() {
                        return self.finish(start, TokenKind::Whitespace);
                    }
                    let next = Self::resume_after_external_id(owner);
                    if matches!(self.peek(), '"' | '\'') {
                        self.scan_quoted();
                        return self.emit(start, TokenKind::DtdExternalSystemId, next);
                    }
                    self.state = next;
                }

                // --- DTD content ---
                ScannerState::WithinDtdContent => {
                    if self.skip_whitespace() {
                        return self.finish(start, TokenKind::Whitespace);
                    }
                    if self.peek() == ']' {
                        self.advance();
                        if self.dtd_file {
                            return self.finish(start, TokenKind::Unknown);
                        }
                        return self.emit(start, TokenKind::DtdEndInternalSubset, ScannerState::AfterDoctypeName);
                    }
                    if self.peek() == '<' {
                        if self.advance_if("<!--") {
                            return self.emit(start, TokenKind::StartCommentTag, ScannerState::WithinComment);
                        }
                        if self.advance_if("<?") {
                            return self.emit(start, TokenKind::StartPrologOrPI, ScannerState::PrologOrPI);
                        }
                        if self.advance_if("<!ELEMENT") {
                            return self.emit(start, TokenKind::DtdStartElement, ScannerState::WithinElementDecl);
                        }
                        if self.advance_if("<!ATTLIST") {
                            return self.emit(start, TokenKind::DtdStartAttlist, ScannerState::WithinAttlistDecl);
                        }
                        if self.advance_if("<!ENTITY") {
                            return self.emit(start, TokenKind::DtdStartEntity, ScannerState::WithinEntityDecl);
                        }
                        if self.advance_if("<!NOTATION") {
                            return self.emit(start, TokenKind::DtdStartNotation, ScannerState::WithinNotationDecl);
                        }
                        self.advance();
                        let dtd_file = self.dtd_file;
                        self.advance_while(|c| {
                            !is_whitespace(c) && c != '>' && c != '<' && (dtd_file || c != ']')
                        });
                        self.advance_if(">");
                        return self.finish(start, TokenKind::DtdUnrecognizedTag);
                    }
                    let dtd_file = self.dtd_file;
                    self.advance_while(|c| !is_whitespace(c) && c != '<' && (dtd_file || c != ']'));
                    return self.finish(start, TokenKind::Content);
                }

                ScannerState::WithinElementDecl => {
                    if let Some(token) = self.scan_declaration_boundary(start) {
                        return token;
                    }
                    if self.scan_name() {
                        return self.emit(start, TokenKind::DtdElementDeclName, ScannerState::AfterElementDeclName);
                    }
                    self.state = ScannerState::AfterElementDeclName;
                }

                ScannerState::AfterElementDeclName => {
                    if let Some(token) = self.scan_declaration_boundary(start) {
                        return token;
                    }
                    if self.advance_if_word("EMPTY") || self.advance_if_word("ANY") {
                        return self.emit(start, TokenKind::DtdElementCategory, ScannerState::DtdTrailingParameters);
                    }
                    if self.advance_if("(") {
                        return self.emit(start, TokenKind::DtdStartElementContent, ScannerState::WithinElementContent);
                    }
                    self.state = ScannerState::DtdTrailingParameters;
                }

                ScannerState::WithinElementContent => {
                    if self.advance_if(")") {
                        if matches!(self.peek(), '*' | '?' | '+') {
                            self.advance();
                        }
                        return self.emit(start, TokenKind::DtdEndElementContent, ScannerState::DtdTrailingParameters);
                    }
                    if matches!(self.peek(), '>' | '<') {
                        self.state = ScannerState::DtdTrailingParameters;
                        continue;
                    }
                    let mut depth = 0usize;
                    while !self.is_at_end() {
                        match self.peek() {
                            '(' => depth += 1,
                            ')' if depth == 0 => break,
                            ')' => depth -= 1,
                            '>' | '<' => break,
                            _ => {}
                        }
                        self.advance();
                    }
                    return self.finish(start, TokenKind::DtdElementContent);
                }

                ScannerState::WithinAttlistDecl => {
                    if let Some(token) = self.scan_declaration_boundary(start) {
                        return token;
                    }
                    if self.scan_name() {
                        return self.emit(start, TokenKind::DtdAttlistElementName, ScannerState::AfterAttlistElementName);
                    }
                    self.state = ScannerState::DtdTrailingParameters;
                }

                ScannerState::AfterAttlistElementName => {
                    if let Some(token) = self.scan_declaration_boundary(start) {
                        return token;
                    }
                    if self.scan_name() {
                        let next = ScannerState::AfterAttlistAttributeName;
                        return self.emit(start, TokenKind::DtdAttlistAttributeName, next);
                    }
                    self.state = ScannerState::DtdTrailingParameters;
                }

                ScannerState::AfterAttlistAttributeName => {
                    if let Some(token) = self.scan_declaration_boundary(start) {
                        return token;
                    }
                    if self.peek() == '(' {
                        while !self.is_at_end() && !matches!(self.peek(), ')' | '>' | '<') {
                            self.advance();
                        }
                        self.advance_if(")");
                        let next = ScannerState::AfterAttlistAttributeType;
                        return self.emit(start, TokenKind::DtdAttlistAttributeType, next);
                    }
                    if self.scan_name() {
                        // NOTATION is followed by its own enumeration.
                        let next = if &self.source[start..self.pos] == "NOTATION" {
                            ScannerState::AfterAttlistAttributeName
                        } else {
                            ScannerState::AfterAttlistAttributeType
                        };
                        return self.emit(start, TokenKind::DtdAttlistAttributeType, next);
                    }
                    self.state = ScannerState::DtdTrailingParameters;
                }

                ScannerState::AfterAttlistAttributeType => {
                    if let Some(token) = self.scan_declaration_boundary(start) {
                        return token;
                    }
                    if self.advance_if("#") {
                        self.advance_while(is_name_char);
                        // #FIXED is followed by the fixed value itself.
                        let next = if &self.source[start..self.pos] == "#FIXED" {
                            ScannerState::AfterAttlistAttributeType
                        } else {
                            ScannerState::AfterAttlistElementName
                        };
                        return self.emit(start, TokenKind::DtdAttlistAttributeValue, next);
                    }
                    if matches!(self.peek(), '"' | '\'') {
                        self.scan_quoted();
                        let next = ScannerState::AfterAttlistElementName;
                        return self.emit(start, TokenKind::DtdAttlistAttributeValue, next);
                    }
                    self.state = ScannerState::DtdTrailingParameters;
                }

                ScannerState::WithinEntityDecl => {
                    if let Some(token) = self.scan_declaration_boundary(start) {
                        return token;
                    }
                    if self.advance_if("%") {
                        return self.finish(start, TokenKind::DtdEntityPercent);
                    }
                    if self.scan_name() {
                        return self.emit(start, TokenKind::DtdEntityName, ScannerState::AfterEntityName);
                    }
                    self.state = ScannerState::DtdTrailingParameters;
                }

                ScannerState::AfterEntityName | ScannerState::AfterNotationName => {
                    if let Some(token) = self.scan_declaration_boundary(start) {
                        return token;
                    }
                    if self.state == ScannerState::AfterEntityName && matches!(self.peek(), '"' | '\'') {
                        self.scan_quoted();
                        return self.emit(start, TokenKind::DtdEntityValue, ScannerState::DtdTrailingParameters);
                    }
                    if self.advance_if_word("PUBLIC") {
                        let next = ScannerState::AfterExternalPublic(ExternalIdOwner::Declaration);
                        return self.emit(start, TokenKind::DtdExternalKindPublic, next);
                    }
                    if self.advance_if_word("SYSTEM") {
                        let next = ScannerState::AfterExternalSystem(ExternalIdOwner::Declaration);
                        return self.emit(start, TokenKind::DtdExternalKindSystem, next);
                    }
                    self.state = ScannerState::DtdTrailingParameters;
                }

                ScannerState::WithinNotationDecl => {
                    if let Some(token) = self.scan_declaration_boundary(start) {
                        return token;
                    }
                    if self.scan_name() {
                        return self.emit(start, TokenKind::DtdNotationName, ScannerState::AfterNotationName);
                    }
                    self.state = ScannerState::DtdTrailingParameters;
                }

                ScannerState::DtdTrailingParameters => {
                    if let Some(token) = self.scan_declaration_boundary(start) {
                        return token;
                    }
                    let dtd_file = self.dtd_file;
                    self.advance_while(|c| {
                        !is_whitespace(c) && c != '>' && c != '<' && (dtd_file || c != ']')
                    });
                    return self.finish(start, TokenKind::DtdUnrecognizedParameters);
                }
            }
        }
    }

    // --- State helpers ---

    /// State to return to after a comment or processing instruction.
    fn content_state(&self) -> ScannerState {
        if self.in_dtd {
            ScannerState::WithinDtdContent
        } else {
            ScannerState::WithinContent
        }
    }

    fn resume_after_external_id(owner: ExternalIdOwner) -> ScannerState {
        match owner {
            ExternalIdOwner::Doctype => ScannerState::AfterDoctypeName,
            ExternalIdOwner::Declaration => ScannerState::DtdTrailingParameters,
        }
    }

    /// Handles what every declaration state shares: whitespace, the closing
    /// `>`, and a `<` or `]` that abandons an unterminated declaration.
    fn scan_declaration_boundary(&mut self, start: usize) -> Option<Token<'a>> {
        if self.skip_whitespace() {
            return Some(self.finish(start, TokenKind::Whitespace));
        }
        if self.advance_if(">") {
            return Some(self.emit(start, TokenKind::DtdEndTag, ScannerState::WithinDtdContent));
        }
        let c = self.peek();
        if c == '<' || (c == ']' && !self.dtd_file) {
            self.state = ScannerState::WithinDtdContent;
            return Some(self.scan_token());
        }
        None
    }

    // --- Scanners ---

    /// Consume an XML name. Returns false (consuming nothing) if the next
    /// character cannot start a name.
    fn scan_name(&mut self) -> bool {
        if self.is_at_end() || !is_name_start_char(self.peek()) {
            return false;
        }
        self.advance();
        self.advance_while(is_name_char);
        true
    }

    /// Consume a quoted string starting at the current quote character.
    /// An unterminated string stops before the next `<` or at end of input.
    fn scan_quoted(&mut self) {
        let quote = self.peek();
        self.advance();
        self.advance_while(|c| c != quote && c != '<');
        if self.peek() == quote {
            self.advance();
        }
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        self.advance_while(is_whitespace);
        self.pos > start
    }

    // --- Helpers ---

    fn emit(&mut self, start: usize, kind: TokenKind, next: ScannerState) -> Token<'a> {
        self.state = next;
        self.finish(start, kind)
    }

    fn finish(&self, start: usize, kind: TokenKind) -> Token<'a> {
        Token::new(kind, Span::new(start, self.pos), &self.source[start..self.pos])
    }

    fn peek(&self) -> char {
        self.source[self.pos..].chars().next().unwrap_or('\0')
    }

    fn starts_with(&self, s: &str) -> bool {
        self.source[self.pos..].starts_with(s)
    }

    fn advance(&mut self) {
        if let Some(c) = self.source[self.pos..].chars().next() {
            self.pos += c.len_utf8();
        }
    }

    fn advance_if(&mut self, s: &str) -> bool {
        if self.starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    /// Like `advance_if`, but only matches a whole word.
    fn advance_if_word(&mut self, word: &str) -> bool {
        if !self.starts_with(word) {
            return false;
        }
        let after = self.source[self.pos + word.len()..].chars().next();
        if after.is_some_and(is_name_char) {
            return false;
        }
        self.pos += word.len();
        true
    }

    fn advance_while(&mut self, pred: impl Fn(char) -> bool) {
        let rest = &self.source[self.pos..];
        let len = rest.find(|c: char| !pred(c)).unwrap_or(rest.len());
        self.pos += len;
    }

    /// Advance up to (not over) the next occurrence of `s`, or to the end.
    fn advance_until_str(&mut self, s: &str) {
        let rest = &self.source[self.pos..];
        self.pos += rest.find(s).unwrap_or(rest.len());
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.source.len()
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Token<'a>;

    /// Yields every token up to and including `Eos`, then stops.
    fn next(&mut self) -> Option<Token<'a>> {
        if self.finished {
            return None;
        }
        let token = self.next_token();
        if token.kind == TokenKind::Eos {
            self.finished = true;
        }
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use TokenKind::*;

    /// Helper: tokenize and return token kinds (ignoring spans).
    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    /// Helper: tokenize and return (kind, text) pairs.
    fn texts(source: &str) -> Vec<(TokenKind, &str)> {
        Scanner::tokenize(source)
            .into_iter()
            .map(|t| (t.kind, t.text))
            .collect()
    }

    fn dtd_kinds(source: &str) -> Vec<TokenKind> {
        Scanner::dtd(source, 0).map(|t| t.kind).collect()
    }

    /// Asserts tokens are contiguous, non-empty (except Eos) and cover the input.
    fn assert_covers(source: &str, tokens: &[Token<'_>]) {
        let mut offset = 0;
        for token in tokens {
            assert_eq!(token.start(), offset, "gap or overlap before {token:?}");
            if token.kind != Eos {
                assert!(token.end() > token.start(), "empty token {token:?}");
            }
            assert_eq!(token.text, &source[token.start()..token.end()]);
            offset = token.end();
        }
        assert_eq!(offset, source.len());
        assert_eq!(tokens.last().map(|t| t.kind), Some(Eos));
    }

    // =========================================================================
    // Structure: empty input, content
    // =========================================================================

    #[test]
    fn test_empty_source() {
        let toks = Scanner::tokenize("");
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].kind, Eos);
        assert_eq!(toks[0].span, Span::new(0, 0));
    }

    #[test]
    fn test_plain_content() {
        assert_eq!(texts("hello"), vec![(Content, "hello"), (Eos, "")]);
    }

    #[test]
    fn test_eos_repeats() {
        let mut scanner = Scanner::new("a");
        assert_eq!(scanner.next_token().kind, Content);
        assert_eq!(scanner.next_token().kind, Eos);
        assert_eq!(scanner.next_token().kind, Eos);
    }

    // =========================================================================
    // Start and end tags
    // =========================================================================

    #[test]
    fn test_simple_element() {
        assert_eq!(
            texts("<a>text</a>"),
            vec![
                (StartTagOpen, "<"),
                (StartTag, "a"),
                (StartTagClose, ">"),
                (Content, "text"),
                (EndTagOpen, "</"),
                (EndTag, "a"),
                (EndTagClose, ">"),
                (Eos, ""),
            ]
        );
    }

    #[test]
    fn test_self_closing_element() {
        assert_eq!(
            kinds("<br/>"),
            vec![StartTagOpen, StartTag, StartTagSelfClose, Eos]
        );
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(
            texts("<xs:element-1.x>"),
            vec![
                (StartTagOpen, "<"),
                (StartTag, "xs:element-1.x"),
                (StartTagClose, ">"),
                (Eos, ""),
            ]
        );
    }

    #[test]
    fn test_tag_without_name() {
        assert_eq!(kinds("<>"), vec![StartTagOpen, StartTagClose, Eos]);
        assert_eq!(kinds("</>"), vec![EndTagOpen, EndTagClose, Eos]);
    }

    #[test]
    fn test_space_before_tag_name() {
        assert_eq!(
            kinds("< a>"),
            vec![StartTagOpen, Whitespace, StartTag, StartTagClose, Eos]
        );
        assert_eq!(
            kinds("</ a>"),
            vec![EndTagOpen, Whitespace, EndTag, EndTagClose, Eos]
        );
    }

    #[test]
    fn test_unclosed_start_tag_followed_by_tag() {
        assert_eq!(
            kinds("<a<b>"),
            vec![StartTagOpen, StartTag, StartTagOpen, StartTag, StartTagClose, Eos]
        );
    }

    #[test]
    fn test_unterminated_start_tag() {
        assert_eq!(texts("<a"), vec![(StartTagOpen, "<"), (StartTag, "a"), (Eos, "")]);
    }

    #[test]
    fn test_end_tag_with_attribute() {
        assert_eq!(
            texts("</a b>"),
            vec![
                (EndTagOpen, "</"),
                (EndTag, "a"),
                (Whitespace, " "),
                (Unknown, "b"),
                (EndTagClose, ">"),
                (Eos, ""),
            ]
        );
    }

    #[test]
    fn test_end_tag_quoted_unknown() {
        assert_eq!(
            texts("</a \"x>y\">"),
            vec![
                (EndTagOpen, "</"),
                (EndTag, "a"),
                (Whitespace, " "),
                (Unknown, "\"x>y\""),
                (EndTagClose, ">"),
                (Eos, ""),
            ]
        );
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    #[test]
    fn test_attributes() {
        assert_eq!(
            texts("<a x=\"1\" y='2'>"),
            vec![
                (StartTagOpen, "<"),
                (StartTag, "a"),
                (Whitespace, " "),
                (AttributeName, "x"),
                (DelimiterAssign, "="),
                (AttributeValue, "\"1\""),
                (Whitespace, " "),
                (AttributeName, "y"),
                (DelimiterAssign, "="),
                (AttributeValue, "'2'"),
                (StartTagClose, ">"),
                (Eos, ""),
            ]
        );
    }

    #[test]
    fn test_attribute_spaces_around_delimiter() {
        assert_eq!(
            kinds("<a x = \"1\"/>"),
            vec![
                StartTagOpen,
                StartTag,
                Whitespace,
                AttributeName,
                Whitespace,
                DelimiterAssign,
                Whitespace,
                AttributeValue,
                StartTagSelfClose,
                Eos,
            ]
        );
    }

    #[test]
    fn test_attribute_without_value() {
        assert_eq!(
            kinds("<a x y>"),
            vec![
                StartTagOpen,
                StartTag,
                Whitespace,
                AttributeName,
                Whitespace,
                AttributeName,
                StartTagClose,
                Eos,
            ]
        );
    }

    #[test]
    fn test_attribute_missing_value() {
        assert_eq!(
            kinds("<a x=>"),
            vec![StartTagOpen, StartTag, Whitespace, AttributeName, DelimiterAssign, StartTagClose, Eos]
        );
    }

    #[test]
    fn test_unquoted_attribute_value() {
        assert_eq!(
            texts("<a x=1/>"),
            vec![
                (StartTagOpen, "<"),
                (StartTag, "a"),
                (Whitespace, " "),
                (AttributeName, "x"),
                (DelimiterAssign, "="),
                (AttributeValue, "1"),
                (StartTagSelfClose, "/>"),
                (Eos, ""),
            ]
        );
    }

    #[test]
    fn test_unterminated_attribute_value_stops_at_tag() {
        assert_eq!(
            texts("<a x=\"1><b>"),
            vec![
                (StartTagOpen, "<"),
                (StartTag, "a"),
                (Whitespace, " "),
                (AttributeName, "x"),
                (DelimiterAssign, "="),
                (AttributeValue, "\"1>"),
                (StartTagOpen, "<"),
                (StartTag, "b"),
                (StartTagClose, ">"),
                (Eos, ""),
            ]
        );
    }

    #[test]
    fn test_attributes_without_separating_space() {
        assert_eq!(
            kinds("<a x=\"1\"y=\"2\">"),
            vec![
                StartTagOpen,
                StartTag,
                Whitespace,
                AttributeName,
                DelimiterAssign,
                AttributeValue,
                AttributeName,
                DelimiterAssign,
                AttributeValue,
                StartTagClose,
                Eos,
            ]
        );
    }

    #[test]
    fn test_stray_slash_in_tag() {
        assert_eq!(
            texts("<a / >"),
            vec![
                (StartTagOpen, "<"),
                (StartTag, "a"),
                (Whitespace, " "),
                (Unknown, "/"),
                (Whitespace, " "),
                (StartTagClose, ">"),
                (Eos, ""),
            ]
        );
    }

    // =========================================================================
    // Comments, CDATA, prolog and processing instructions
    // =========================================================================

    #[test]
    fn test_comment() {
        assert_eq!(
            texts("<!-- hi -->"),
            vec![
                (StartCommentTag, "<!--"),
                (Comment, " hi "),
                (EndCommentTag, "-->"),
                (Eos, ""),
            ]
        );
    }

    #[test]
    fn test_unterminated_comment() {
        assert_eq!(kinds("<!-- <a>"), vec![StartCommentTag, Comment, Eos]);
    }

    #[test]
    fn test_cdata() {
        assert_eq!(
            texts("<![CDATA[<a>]]>"),
            vec![
                (CDataTagOpen, "<![CDATA["),
                (CDataContent, "<a>"),
                (CDataTagClose, "]]>"),
                (Eos, ""),
            ]
        );
    }

    #[test]
    fn test_prolog() {
        assert_eq!(
            texts("<?xml version=\"1.0\"?>"),
            vec![
                (StartPrologOrPI, "<?"),
                (PrologName, "xml"),
                (Whitespace, " "),
                (AttributeName, "version"),
                (DelimiterAssign, "="),
                (AttributeValue, "\"1.0\""),
                (PrologEnd, "?>"),
                (Eos, ""),
            ]
        );
    }

    #[test]
    fn test_processing_instruction() {
        assert_eq!(
            texts("<?xml-stylesheet href=\"a.xsl\"?>"),
            vec![
                (StartPrologOrPI, "<?"),
                (PIName, "xml-stylesheet"),
                (Whitespace, " "),
                (PIContent, "href=\"a.xsl\""),
                (PIEnd, "?>"),
                (Eos, ""),
            ]
        );
    }

    #[test]
    fn test_unterminated_pi_stops_at_tag() {
        assert_eq!(
            kinds("<?foo bar<a>"),
            vec![StartPrologOrPI, PIName, Whitespace, PIContent, StartTagOpen, StartTag, StartTagClose, Eos]
        );
    }

    // =========================================================================
    // Doctype and internal subset
    // =========================================================================

    #[test]
    fn test_doctype_external_id() {
        assert_eq!(
            texts("<!DOCTYPE html PUBLIC \"-//W3C\" \"x.dtd\">"),
            vec![
                (DtdStartDoctypeTag, "<!DOCTYPE"),
                (Whitespace, " "),
                (DtdDoctypeName, "html"),
                (Whitespace, " "),
                (DtdExternalKindPublic, "PUBLIC"),
                (Whitespace, " "),
                (DtdExternalPublicId, "\"-//W3C\""),
                (Whitespace, " "),
                (DtdExternalSystemId, "\"x.dtd\""),
                (DtdEndDoctypeTag, ">"),
                (Eos, ""),
            ]
        );
    }

    #[test]
    fn test_doctype_internal_subset() {
        assert_eq!(
            kinds("<!DOCTYPE a [<!ELEMENT a (#PCDATA)>]><a/>"),
            vec![
                DtdStartDoctypeTag,
                Whitespace,
                DtdDoctypeName,
                Whitespace,
                DtdStartInternalSubset,
                DtdStartElement,
                Whitespace,
                DtdElementDeclName,
                Whitespace,
                DtdStartElementContent,
                DtdElementContent,
                DtdEndElementContent,
                DtdEndTag,
                DtdEndInternalSubset,
                DtdEndDoctypeTag,
                StartTagOpen,
                StartTag,
                StartTagSelfClose,
                Eos,
            ]
        );
    }

    #[test]
    fn test_comment_inside_internal_subset_returns_to_dtd() {
        assert_eq!(
            kinds("<!DOCTYPE a [<!-- c --><!ENTITY e \"v\">]>"),
            vec![
                DtdStartDoctypeTag,
                Whitespace,
                DtdDoctypeName,
                Whitespace,
                DtdStartInternalSubset,
                StartCommentTag,
                Comment,
                EndCommentTag,
                DtdStartEntity,
                Whitespace,
                DtdEntityName,
                Whitespace,
                DtdEntityValue,
                DtdEndTag,
                DtdEndInternalSubset,
                DtdEndDoctypeTag,
                Eos,
            ]
        );
    }

    #[test]
    fn test_nested_element_content() {
        assert_eq!(
            dtd_texts("<!ELEMENT a ((b|c),d)*>"),
            vec![
                (DtdStartElement, "<!ELEMENT"),
                (Whitespace, " "),
                (DtdElementDeclName, "a"),
                (Whitespace, " "),
                (DtdStartElementContent, "("),
                (DtdElementContent, "(b|c),d"),
                (DtdEndElementContent, ")*"),
                (DtdEndTag, ">"),
                (Eos, ""),
            ]
        );
    }

    fn dtd_texts(source: &str) -> Vec<(TokenKind, &str)> {
        Scanner::dtd(source, 0).map(|t| (t.kind, t.text)).collect()
    }

    #[test]
    fn test_element_category() {
        assert_eq!(
            dtd_kinds("<!ELEMENT br EMPTY>"),
            vec![DtdStartElement, Whitespace, DtdElementDeclName, Whitespace, DtdElementCategory, DtdEndTag, Eos]
        );
    }

    #[test]
    fn test_attlist() {
        assert_eq!(
            dtd_texts("<!ATTLIST a id ID #REQUIRED v (x|y) \"x\" f CDATA #FIXED \"z\">")
                .into_iter()
                .filter(|(k, _)| *k != Whitespace)
                .collect::<Vec<_>>(),
            vec![
                (DtdStartAttlist, "<!ATTLIST"),
                (DtdAttlistElementName, "a"),
                (DtdAttlistAttributeName, "id"),
                (DtdAttlistAttributeType, "ID"),
                (DtdAttlistAttributeValue, "#REQUIRED"),
                (DtdAttlistAttributeName, "v"),
                (DtdAttlistAttributeType, "(x|y)"),
                (DtdAttlistAttributeValue, "\"x\""),
                (DtdAttlistAttributeName, "f"),
                (DtdAttlistAttributeType, "CDATA"),
                (DtdAttlistAttributeValue, "#FIXED"),
                (DtdAttlistAttributeValue, "\"z\""),
                (DtdEndTag, ">"),
                (Eos, ""),
            ]
        );
    }

    #[test]
    fn test_parameter_entity_with_system_id() {
        assert_eq!(
            dtd_texts("<!ENTITY % p SYSTEM \"p.ent\">")
                .into_iter()
                .filter(|(k, _)| *k != Whitespace)
                .collect::<Vec<_>>(),
            vec![
                (DtdStartEntity, "<!ENTITY"),
                (DtdEntityPercent, "%"),
                (DtdEntityName, "p"),
                (DtdExternalKindSystem, "SYSTEM"),
                (DtdExternalSystemId, "\"p.ent\""),
                (DtdEndTag, ">"),
                (Eos, ""),
            ]
        );
    }

    #[test]
    fn test_notation() {
        assert_eq!(
            dtd_kinds("<!NOTATION gif PUBLIC \"image/gif\">")
                .into_iter()
                .filter(|k| *k != Whitespace)
                .collect::<Vec<_>>(),
            vec![
                DtdStartNotation,
                DtdNotationName,
                DtdExternalKindPublic,
                DtdExternalPublicId,
                DtdEndTag,
                Eos,
            ]
        );
    }

    #[test]
    fn test_unrecognized_parameters_and_tags() {
        assert_eq!(
            dtd_texts("<!ELEMENT a EMPTY junk><!FOO bar>"),
            vec![
                (DtdStartElement, "<!ELEMENT"),
                (Whitespace, " "),
                (DtdElementDeclName, "a"),
                (Whitespace, " "),
                (DtdElementCategory, "EMPTY"),
                (Whitespace, " "),
                (DtdUnrecognizedParameters, "junk"),
                (DtdEndTag, ">"),
                (DtdUnrecognizedTag, "<!FOO"),
                (Whitespace, " "),
                (Content, "bar>"),
                (Eos, ""),
            ]
        );
    }

    #[test]
    fn test_unterminated_declaration_inside_subset() {
        assert_eq!(
            kinds("<!DOCTYPE a [<!ELEMENT ]>"),
            vec![
                DtdStartDoctypeTag,
                Whitespace,
                DtdDoctypeName,
                Whitespace,
                DtdStartInternalSubset,
                DtdStartElement,
                Whitespace,
                DtdEndInternalSubset,
                DtdEndDoctypeTag,
                Eos,
            ]
        );
    }

    #[test]
    fn test_dtd_file_bracket_is_unknown() {
        assert_eq!(dtd_kinds("]"), vec![Unknown, Eos]);
    }

    // =========================================================================
    // Restarting
    // =========================================================================

    #[test]
    fn test_restart_mid_document() {
        let source = "<a><b x=\"1\"/></a>";
        let full = Scanner::tokenize(source);
        let mut scanner = Scanner::new(source);
        // Scan past `<a>` and remember where we are.
        for _ in 0..3 {
            scanner.next_token();
        }
        let (offset, state) = (scanner.offset(), scanner.state());
        assert_eq!(offset, 3);
        let resumed: Vec<_> = Scanner::with_state(source, offset, state).collect();
        assert_eq!(resumed, full[3..].to_vec());
    }

    #[test]
    fn test_restart_inside_tag() {
        let resumed: Vec<_> = Scanner::with_state("<a x=\"1\">", 2, ScannerState::WithinTag)
            .map(|t| t.kind)
            .collect();
        assert_eq!(resumed, vec![Whitespace, AttributeName, DelimiterAssign, AttributeValue, StartTagClose, Eos]);
    }

    #[test]
    fn test_multibyte_content() {
        let source = "<é>ü€</é>";
        let toks = Scanner::tokenize(source);
        assert_covers(source, &toks);
        assert_eq!(toks[1].text, "é");
        assert_eq!(toks[3].text, "ü€");
    }

    #[test]
    fn test_state_is_dtd() {
        assert!(ScannerState::WithinDtdContent.is_dtd());
        assert!(ScannerState::AfterExternalSystem(ExternalIdOwner::Declaration).is_dtd());
        assert!(!ScannerState::AfterExternalSystem(ExternalIdOwner::Doctype).is_dtd());
        assert!(!ScannerState::WithinContent.is_dtd());
    }

    // =========================================================================
    // Properties
    // =========================================================================

    proptest! {
        #[test]
        fn prop_tokens_cover_arbitrary_text(source in "\\PC{0,64}") {
            let toks = Scanner::tokenize(&source);
            assert_covers(&source, &toks);
        }

        #[test]
        fn prop_tokens_cover_markup_soup(
            parts in prop::collection::vec(
                prop::sample::select(vec![
                    "<", ">", "</", "/>", "<?", "?>", "<!--", "-->", "<![CDATA[", "]]>",
                    "<!DOCTYPE", "[", "]", "<!ELEMENT", "<!ATTLIST", "<!ENTITY", "%",
                    "PUBLIC", "SYSTEM", "(", ")", "a", "xml", " ", "\n", "=", "\"", "'",
                    "é", "#", "x:y",
                ]),
                0..40,
            )
        ) {
            let source = parts.concat();
            assert_covers(&source, &Scanner::tokenize(&source));
            assert_covers(&source, &Scanner::dtd(&source, 0).collect::<Vec<_>>());
        }
    }
}
