//! Completion proposals at a cursor offset.
//!
//! The engine re-scans from the start of the node just before the cursor
//! and walks tokens until it reaches the one holding the cursor. That token,
//! together with the scanner state it was produced in, decides the context:
//! tag name, attribute name, attribute value, end tag, character content,
//! DTD declaration or XML declaration. Each context then asks the registered
//! participants and falls back to suggestions inferred from the document
//! itself.

use indexmap::{IndexMap, IndexSet};
use lsp_types::{
    CompletionItem, CompletionItemKind, CompletionList, CompletionTextEdit, InsertTextFormat,
    Range, TextEdit,
};
use once_cell::sync::Lazy;
use regex::Regex;
use xmlsense_dom::{Document, NodeId};
use xmlsense_scanner::{is_void_element, Scanner, ScannerState, Token, TokenKind};

use crate::participant::{consult, CompletionParticipant};
use crate::prolog;
use crate::settings::CompletionSettings;
use crate::ServiceError;

/// A line holding nothing but the start of a region comment.
static REGION_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(<(!(-(-\s*(#\w*)?)?)?)?)?$").expect("region pattern is valid")
});

/// Declaration skeletons offered inside a DTD: label, snippet, plain text.
const DTD_SKELETONS: [(&str, &str, &str); 4] = [
    (
        "Insert DTD Element declaration",
        "<!ELEMENT ${1:element-name} (${2:#PCDATA})>",
        "<!ELEMENT element-name (#PCDATA)>",
    ),
    (
        "Insert DTD Attributes list declaration",
        "<!ATTLIST ${1:element-name} ${2:attribute-name} ${3:ID} ${4:#REQUIRED}>",
        "<!ATTLIST element-name attribute-name ID #REQUIRED>",
    ),
    (
        "Insert Internal DTD Entity declaration",
        "<!ENTITY ${1:entity-name} \"${2:entity-value}\">",
        "<!ENTITY entity-name \"entity-value\">",
    ),
    (
        "Insert External DTD Entity declaration",
        "<!ENTITY ${1:entity-name} SYSTEM \"${2:entity-value}\">",
        "<!ENTITY entity-name SYSTEM \"entity-value\">",
    ),
];

/// Compute completion proposals at `offset`.
///
/// Only an offset outside the text (or inside a character) is an error; a
/// cursor where nothing applies yields an empty list.
pub fn do_complete(
    document: &Document,
    offset: usize,
    settings: &CompletionSettings,
    participants: &[Box<dyn CompletionParticipant>],
) -> Result<CompletionList, ServiceError> {
    document.check_offset(offset)?;
    let mut completion = Completion {
        document,
        text: document.text(),
        offset,
        settings,
        participants,
        markup_in_content: false,
    };
    let (context, mut items) = completion.classify()?;
    if completion.allows_regions(context) {
        items.extend(completion.region_items()?);
    }
    tracing::trace!(offset, ?context, items = items.len(), "completion");
    Ok(CompletionList {
        is_incomplete: false,
        items,
    })
}

/// What the cursor was found to be on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    TagName,
    AttributeName,
    AttributeValue,
    EndTag,
    AutoClose,
    Content,
    Dtd,
    Declaration,
    Other,
}

struct Completion<'a> {
    document: &'a Document,
    text: &'a str,
    offset: usize,
    settings: &'a CompletionSettings,
    participants: &'a [Box<dyn CompletionParticipant>],
    /// Markup starting the cursor's line was scanned as document content.
    markup_in_content: bool,
}

type Items = Result<Vec<CompletionItem>, ServiceError>;

impl<'a> Completion<'a> {
    // =========================================================================
    // Context classification
    // =========================================================================

    fn classify(&mut self) -> Result<(Context, Vec<CompletionItem>), ServiceError> {
        let offset = self.offset;
        let line_markup = self.line_markup_start();
        let mut scanner = self.rescan_start();
        let mut current_tag: Option<&'a str> = None;
        let mut current_attribute: Option<&'a str> = None;
        let mut in_prolog = false;

        loop {
            let state_before = scanner.state();
            let token = scanner.next_token();
            if token.kind == TokenKind::Eos {
                return match state_before {
                    _ if self.document.is_dtd() || state_before.is_dtd() => {
                        Ok((Context::Dtd, self.dtd_items(offset, offset)?))
                    }
                    ScannerState::WithinContent => Ok((Context::Content, self.inside_content()?)),
                    _ => Ok((Context::Other, Vec::new())),
                };
            }
            if token.start() > offset {
                return Ok((Context::Other, Vec::new()));
            }
            if Some(token.start()) == line_markup {
                self.markup_in_content = state_before == ScannerState::WithinContent;
            }
            let holds_cursor = offset <= token.end();

            match token.kind {
                TokenKind::StartTagOpen => {
                    if token.end() == offset {
                        let name_end = scan_next_for_end(&mut scanner, offset, TokenKind::StartTag);
                        return Ok((Context::TagName, self.tag_items(offset, name_end)?));
                    }
                }
                TokenKind::StartTag => {
                    if holds_cursor {
                        let items = self.open_tag_items(token.start(), token.end())?;
                        return Ok((Context::TagName, items));
                    }
                    current_tag = Some(token.text);
                }
                TokenKind::AttributeName => {
                    if holds_cursor {
                        let items = self.attribute_name_items(token.start(), token.end(), in_prolog)?;
                        return Ok((Context::AttributeName, items));
                    }
                    current_attribute = Some(token.text);
                }
                TokenKind::DelimiterAssign => {
                    if token.end() == offset {
                        let value_end =
                            scan_next_for_end(&mut scanner, offset, TokenKind::AttributeValue);
                        let items =
                            self.attribute_value_items(offset, value_end, current_attribute, in_prolog)?;
                        return Ok((Context::AttributeValue, items));
                    }
                }
                TokenKind::AttributeValue => {
                    if holds_cursor {
                        let items = self.attribute_value_items(
                            token.start(),
                            token.end(),
                            current_attribute,
                            in_prolog,
                        )?;
                        return Ok((Context::AttributeValue, items));
                    }
                }
                TokenKind::Whitespace => {
                    if holds_cursor {
                        return self.after_whitespace(
                            &mut scanner,
                            token,
                            current_attribute,
                            in_prolog,
                        );
                    }
                }
                TokenKind::EndTagOpen => {
                    if holds_cursor {
                        let name_end = scan_next_for_end(&mut scanner, offset, TokenKind::EndTag);
                        let items = self.close_tag_items(Some(token.start() + 1), name_end)?;
                        return Ok((Context::EndTag, items));
                    }
                }
                TokenKind::EndTag => {
                    if holds_cursor {
                        let before = self.text[..token.start()].trim_end_matches(is_space);
                        if before.ends_with('/') {
                            let items = self.close_tag_items(Some(before.len() - 1), token.end())?;
                            return Ok((Context::EndTag, items));
                        }
                        return Ok((Context::Other, Vec::new()));
                    }
                }
                TokenKind::StartTagClose => {
                    if holds_cursor {
                        if let Some(name) = current_tag {
                            if let Some(item) = self.auto_close_item(token, name)? {
                                return Ok((Context::AutoClose, vec![item]));
                            }
                        }
                        return Ok((Context::Content, self.inside_content()?));
                    }
                }
                TokenKind::StartTagSelfClose | TokenKind::EndTagClose => {
                    if holds_cursor {
                        if token.end() == offset {
                            return Ok((Context::Content, self.inside_content()?));
                        }
                        return Ok((Context::Other, Vec::new()));
                    }
                }
                TokenKind::Content => {
                    if holds_cursor {
                        if self.document.is_dtd() || state_before.is_dtd() {
                            return Ok((Context::Dtd, self.dtd_items(token.start(), token.end())?));
                        }
                        return Ok((Context::Content, self.inside_content()?));
                    }
                }
                TokenKind::DtdStartElement
                | TokenKind::DtdStartAttlist
                | TokenKind::DtdStartEntity
                | TokenKind::DtdStartNotation
                | TokenKind::DtdUnrecognizedTag => {
                    if holds_cursor {
                        return Ok((Context::Dtd, self.dtd_items(token.start(), token.end())?));
                    }
                }
                TokenKind::DtdStartInternalSubset => {
                    if holds_cursor {
                        return Ok((Context::Dtd, self.dtd_items(offset, offset)?));
                    }
                }
                TokenKind::StartPrologOrPI => {
                    if token.end() == offset {
                        return Ok((Context::Declaration, self.declaration_items(offset, offset)?));
                    }
                }
                TokenKind::PrologName | TokenKind::PIName => {
                    in_prolog = token.kind == TokenKind::PrologName;
                    if holds_cursor {
                        let items = if prolog::XML.starts_with(token.text) {
                            self.declaration_items(token.start(), token.end())?
                        } else {
                            Vec::new()
                        };
                        return Ok((Context::Declaration, items));
                    }
                }
                _ => {
                    if holds_cursor {
                        return Ok((Context::Other, Vec::new()));
                    }
                }
            }
        }
    }

    fn after_whitespace(
        &self,
        scanner: &mut Scanner<'a>,
        token: Token<'a>,
        current_attribute: Option<&'a str>,
        in_prolog: bool,
    ) -> Result<(Context, Vec<CompletionItem>), ServiceError> {
        let offset = self.offset;
        match scanner.state() {
            ScannerState::AfterOpeningStartTag => {
                let name_end = scan_next_for_end(scanner, offset, TokenKind::StartTag);
                Ok((Context::TagName, self.tag_items(token.start(), name_end)?))
            }
            ScannerState::WithinTag | ScannerState::AfterAttributeName => {
                let items = self.attribute_name_items(token.end(), offset, in_prolog)?;
                Ok((Context::AttributeName, items))
            }
            ScannerState::BeforeAttributeValue => {
                let items =
                    self.attribute_value_items(token.end(), offset, current_attribute, in_prolog)?;
                Ok((Context::AttributeValue, items))
            }
            ScannerState::AfterOpeningEndTag => {
                let items = self.close_tag_items(Some(token.start() - 1), offset)?;
                Ok((Context::EndTag, items))
            }
            ScannerState::WithinContent => Ok((Context::Content, self.inside_content()?)),
            ScannerState::WithinDtdContent => Ok((Context::Dtd, self.dtd_items(offset, offset)?)),
            _ => Ok((Context::Other, Vec::new())),
        }
    }

    /// Scanner positioned at the start of the node before the cursor.
    fn rescan_start(&self) -> Scanner<'a> {
        let node = self.document.find_node_before(self.offset);
        let start = node.map_or(0, |id| self.document.node(id).start);
        if self.document.is_dtd() {
            return Scanner::dtd(self.text, start);
        }
        let in_subset = node
            .and_then(|id| self.document.node(id).parent)
            .is_some_and(|parent| self.document.node(parent).as_doctype().is_some());
        let state = if in_subset {
            ScannerState::WithinDtdContent
        } else {
            ScannerState::WithinContent
        };
        Scanner::with_state(self.text, start, state)
    }

    // =========================================================================
    // Tags
    // =========================================================================

    /// After `<`: element names, and end tags for the open ancestors.
    fn tag_items(&self, name_start: usize, name_end: usize) -> Items {
        let mut items = self.open_tag_items(name_start, name_end)?;
        let after_bracket = self.bracket_before(name_start) + 1;
        items.extend(self.close_tag_items(Some(after_bracket), name_end)?);
        Ok(items)
    }

    /// Element names for a tag whose name spans `[name_start, name_end)`.
    fn open_tag_items(&self, name_start: usize, name_end: usize) -> Items {
        let range = self.replace_range(name_start, name_end)?;
        self.element_items(range, self.bracket_before(name_start), false)
    }

    /// Offset of the `<` opening a tag whose name starts at `name_start`.
    fn bracket_before(&self, name_start: usize) -> usize {
        self.text[..name_start]
            .trim_end_matches(is_space)
            .len()
            .saturating_sub(1)
    }

    /// Element proposals. `bracket` is the offset of the typed `<`, or the
    /// cursor when the `<` is part of the inserted text.
    fn element_items(&self, range: Range, bracket: usize, add_bracket: bool) -> Items {
        let document = self.document;
        let parent = document.enclosing_element(bracket);
        let typed = if add_bracket {
            None
        } else {
            document
                .find_start_tag_at(bracket + 1)
                .filter(|&id| document.node(id).start == bracket)
        };
        let typed_closed = typed
            .and_then(|id| document.element(id))
            .is_some_and(|e| e.is_start_tag_closed());

        let suggested = consult(self.participants, "children", |p| {
            p.suggest_children(document, parent)
        });
        let candidates: Vec<(String, Option<String>, bool)> = if suggested.is_empty() {
            self.known_children(parent, typed)
                .into_iter()
                .map(|(name, self_closed_only)| (name.to_string(), None, self_closed_only))
                .collect()
        } else {
            suggested
                .into_iter()
                .map(|child| (child.name, child.snippet_body, false))
                .collect()
        };

        let prefix = if add_bracket { "<" } else { "" };
        let indent = self.line_leading_whitespace(bracket);
        let snippets = self.settings.snippets_supported;
        let items = candidates
            .into_iter()
            .map(|(name, body, self_closed_only)| {
                let new_text = if typed_closed {
                    name.clone()
                } else if self_closed_only {
                    format!("{prefix}{name} />")
                } else {
                    let closing = if self.settings.auto_close_tags && !is_void_element(&name) {
                        format!("</{name}>")
                    } else {
                        String::new()
                    };
                    let body = match body {
                        Some(body) if snippets => {
                            body.replace('\t', &self.settings.indent_unit())
                                .replace('\n', &format!("\n{indent}"))
                        }
                        _ if snippets => "$0".to_string(),
                        _ => String::new(),
                    };
                    format!("{prefix}{name}>{body}{closing}")
                };
                let mut item = item(&name, CompletionItemKind::PROPERTY, range, new_text, snippets);
                if add_bracket {
                    item.filter_text = Some(format!("<{name}"));
                }
                item
            })
            .collect();
        Ok(items)
    }

    /// Names used as children of elements named like `parent` (or as roots),
    /// mapped to whether every occurrence is self-closed.
    fn known_children(&self, parent: Option<NodeId>, typed: Option<NodeId>) -> IndexMap<&'a str, bool> {
        let document = self.document;
        let parent_name = parent.and_then(|id| document.node(id).tag_name());
        let containers: Vec<Option<NodeId>> = match parent_name {
            Some(name) => document
                .nodes()
                .filter(|(_, node)| node.as_element().is_some_and(|e| e.is_same_tag(name)))
                .map(|(id, _)| Some(id))
                .collect(),
            None if parent.is_some() => Vec::new(),
            None => vec![None],
        };

        let mut names: IndexMap<&'a str, bool> = IndexMap::new();
        for container in containers {
            for &child in document.children_of(container) {
                if Some(child) == typed {
                    continue;
                }
                let node = document.node(child);
                let Some(element) = node.as_element() else {
                    continue;
                };
                if element.is_orphan_end_tag() {
                    continue;
                }
                let Some(name) = element.tag_name.as_deref() else {
                    continue;
                };
                let self_closed_only = names.entry(name).or_insert(true);
                *self_closed_only &= element.self_closed;
            }
        }
        names
    }

    /// End tags for the elements left open around the cursor.
    ///
    /// `after_bracket` is the offset right after a typed `<`; `None` means
    /// the cursor is in content and the whole `</name>` is inserted.
    fn close_tag_items(&self, after_bracket: Option<usize>, name_end: usize) -> Items {
        let document = self.document;
        let bracket = after_bracket.map_or(self.offset, |after| after - 1);
        let close = match after_bracket {
            Some(_) if is_followed_by(self.text, name_end, ScannerState::WithinEndTag, TokenKind::EndTagClose) => "",
            _ => ">",
        };
        let Some(start) = document.enclosing_element(bracket) else {
            return Ok(Vec::new());
        };

        let mut items = Vec::new();
        for id in document.ancestors_inclusive(start) {
            let node = document.node(id);
            let Some(element) = node.as_element() else {
                continue;
            };
            let Some(name) = element.tag_name.as_deref() else {
                continue;
            };
            if element.is_orphan_end_tag() {
                continue;
            }
            // An end tag at or after the typed `</` is the one being edited.
            let edited = after_bracket.is_some()
                && element.end_tag_open_offset.is_some_and(|end| end >= bracket);
            if element.has_end_tag() && !edited {
                break;
            }

            let end = after_bracket.map_or(self.offset, |_| name_end);
            let start_indent = self.line_indent(node.start);
            let end_indent = self.line_indent(bracket);
            let mut item = match (start_indent, end_indent) {
                (Some(start_indent), Some(end_indent)) if start_indent != end_indent => {
                    let range = self.replace_range(bracket - end_indent.len(), end)?;
                    let new_text = format!("{start_indent}</{name}{close}");
                    let mut item = item(format!("</{name}>"), CompletionItemKind::PROPERTY, range, new_text, false);
                    item.filter_text = Some(format!("{end_indent}</{name}"));
                    item
                }
                _ => match after_bracket {
                    Some(after) => {
                        let range = self.replace_range(after, end)?;
                        let mut item = item(
                            format!("</{name}>"),
                            CompletionItemKind::PROPERTY,
                            range,
                            format!("/{name}{close}"),
                            false,
                        );
                        item.filter_text = Some(format!("/{name}"));
                        item
                    }
                    None => {
                        let range = self.replace_range(self.offset, self.offset)?;
                        item(format!("</{name}>"), CompletionItemKind::PROPERTY, range, format!("</{name}>"), false)
                    }
                },
            };
            item.detail = Some(format!("End tag of <{name}>"));
            items.push(item);
            if edited {
                break;
            }
        }
        Ok(items)
    }

    /// `</name>` after the `>` of a start tag that has no end tag yet.
    fn auto_close_item(&self, close: Token<'a>, name: &str) -> Result<Option<CompletionItem>, ServiceError> {
        let open = self
            .document
            .find_start_tag_at(close.start())
            .and_then(|id| self.document.element(id));
        let Some(element) = open else {
            return Ok(None);
        };
        if element.has_end_tag() || is_void_element(name) {
            return Ok(None);
        }
        let snippets = self.settings.snippets_supported;
        let new_text = if snippets {
            format!("$0</{name}>")
        } else {
            format!("</{name}>")
        };
        let range = self.replace_range(close.end(), close.end())?;
        let mut item = item(format!("</{name}>"), CompletionItemKind::PROPERTY, range, new_text, snippets);
        item.filter_text = Some(format!("</{name}>"));
        Ok(Some(item))
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    fn attribute_name_items(&self, name_start: usize, name_end: usize, in_prolog: bool) -> Items {
        let text = self.text;
        let mut replace_end = self.offset;
        // `<` ends the name even though it scans as part of it.
        while replace_end < name_end && text.as_bytes()[replace_end] != b'<' {
            replace_end += 1;
        }
        let range = self.replace_range(name_start, replace_end)?;
        let has_value = is_followed_by(text, name_end, ScannerState::AfterAttributeName, TokenKind::DelimiterAssign);
        let snippets = self.settings.snippets_supported;
        let quote = self.settings.quote();

        let value_part = |default: Option<&str>, choices: &[String]| -> String {
            if has_value {
                return String::new();
            }
            if !snippets {
                return format!("={quote}{}{quote}", default.unwrap_or(""));
            }
            if !choices.is_empty() {
                let choices: Vec<_> = choices.iter().map(|c| escape_choice(c)).collect();
                format!("={quote}${{1|{}|}}{quote}", choices.join(","))
            } else if let Some(default) = default {
                format!("={quote}${{1:{}}}{quote}", escape_placeholder(default))
            } else {
                format!("={quote}$1{quote}")
            }
        };

        let existing = self.existing_attributes();
        let mut items = Vec::new();
        if in_prolog {
            for name in prolog::ATTRIBUTES {
                if !existing.contains(name) {
                    let new_text = format!("{name}{}", value_part(None, &[]));
                    items.push(item(name, CompletionItemKind::VALUE, range, new_text, snippets));
                }
            }
            return Ok(items);
        }

        let Some(element) = self.document.find_start_tag_at(self.offset) else {
            return Ok(items);
        };
        let declared = consult(self.participants, "attributes", |p| {
            p.suggest_attributes(self.document, element)
        });
        if !declared.is_empty() {
            for attribute in declared.iter().filter(|a| !existing.contains(a.name.as_str())) {
                let value = value_part(attribute.default_value.as_deref(), &attribute.enum_values);
                let new_text = format!("{}{value}", attribute.name);
                items.push(item(&attribute.name, CompletionItemKind::VALUE, range, new_text, snippets));
            }
            return Ok(items);
        }

        for name in self.known_attributes(element) {
            if !existing.contains(name) {
                let new_text = format!("{name}{}", value_part(None, &[]));
                items.push(item(name, CompletionItemKind::VALUE, range, new_text, snippets));
            }
        }
        Ok(items)
    }

    fn attribute_value_items(
        &self,
        value_start: usize,
        value_end: usize,
        attribute: Option<&str>,
        in_prolog: bool,
    ) -> Items {
        let text = self.text;
        let offset = self.offset;
        let bytes = text.as_bytes();
        let quoted = bytes
            .get(value_start)
            .copied()
            .filter(|&b| b == b'"' || b == b'\'');

        let mut inside_quotes = None;
        if let Some(quote) = quoted {
            let content_start = value_start + 1;
            let mut content_end = value_end;
            if value_end > content_start && bytes[value_end - 1] == quote {
                content_end -= 1;
            }
            if offset >= content_start && offset <= content_end {
                inside_quotes = Some((content_start, content_end));
            }
        }
        let (range, add_quotes) = match inside_quotes {
            Some((content_start, content_end)) => {
                let word_start = content_start + text[content_start..offset].rfind(is_space).map_or(0, |i| i + 1);
                let word_end = offset + text[offset..content_end].find(is_space).unwrap_or(content_end - offset);
                (self.replace_range(word_start, word_end)?, false)
            }
            None => (self.replace_range(value_start, value_end)?, true),
        };

        let Some(attribute) = attribute else {
            return Ok(Vec::new());
        };
        let values: Vec<String> = if in_prolog {
            prolog::values(attribute).iter().map(|v| v.to_string()).collect()
        } else {
            let Some(element) = self.document.find_start_tag_at(offset) else {
                return Ok(Vec::new());
            };
            let declared = consult(self.participants, "attribute values", |p| {
                p.suggest_attribute_values(self.document, element, attribute)
            });
            if declared.is_empty() {
                self.known_values(element, attribute)
            } else {
                declared
            }
        };

        let quote = self.settings.quote();
        let items = values
            .into_iter()
            .map(|value| {
                let new_text = if add_quotes {
                    format!("{quote}{value}{quote}")
                } else {
                    value.clone()
                };
                item(value, CompletionItemKind::UNIT, range, new_text, false)
            })
            .collect();
        Ok(items)
    }

    /// Attribute names already written in the tag under the cursor, except
    /// the one being typed.
    fn existing_attributes(&self) -> IndexSet<&'a str> {
        let document = self.document;
        let node = document
            .find_start_tag_at(self.offset)
            .or_else(|| document.find_node_at(self.offset).filter(|&id| document.node(id).is_prolog()));
        let Some(attributes) = node.and_then(|id| document.node(id).attributes()) else {
            return IndexSet::new();
        };
        attributes
            .values()
            .filter(|attr| !attr.name_span.touches(self.offset))
            .map(|attr| attr.name.as_str())
            .collect()
    }

    /// Attribute names used on other elements with the same tag name.
    fn known_attributes(&self, element: NodeId) -> IndexSet<&'a str> {
        self.same_tag_elements(element)
            .flat_map(|e| e.attributes.keys().map(String::as_str))
            .collect()
    }

    /// Values given to `attribute` on other elements with the same tag name.
    fn known_values(&self, element: NodeId, attribute: &str) -> Vec<String> {
        let values: IndexSet<&str> = self
            .same_tag_elements(element)
            .filter_map(|e| e.attribute(attribute)?.value.as_deref())
            .collect();
        values.into_iter().map(str::to_string).collect()
    }

    fn same_tag_elements(&self, element: NodeId) -> impl Iterator<Item = &'a xmlsense_dom::Element> + 'a {
        let document = self.document;
        let name = document.node(element).tag_name();
        document
            .nodes()
            .filter(move |&(id, _)| id != element)
            .filter_map(|(_, node)| node.as_element())
            .filter(move |e| name.is_some_and(|name| e.is_same_tag(name)))
    }

    // =========================================================================
    // Content, DTD and declarations
    // =========================================================================

    fn inside_content(&self) -> Items {
        let document = self.document;
        let offset = self.offset;
        let mut items = self.close_tag_items(None, offset)?;
        let range = self.replace_range(offset, offset)?;
        items.extend(self.element_items(range, offset, true)?);
        items.extend(consult(self.participants, "content", |p| {
            p.suggest_content(document, offset)
        }));
        Ok(items)
    }

    fn dtd_items(&self, start: usize, end: usize) -> Items {
        let range = self.replace_range(start, end)?;
        let snippets = self.settings.snippets_supported;
        let items = DTD_SKELETONS
            .iter()
            .map(|&(label, snippet, plain)| {
                let new_text = if snippets { snippet } else { plain };
                let mut item = item(label, CompletionItemKind::ENUM_MEMBER, range, new_text.to_string(), snippets);
                item.filter_text = Some(plain.to_string());
                item
            })
            .collect();
        Ok(items)
    }

    /// The `<?xml ...?>` declaration, on the first line of an unterminated
    /// instruction.
    fn declaration_items(&self, start: usize, end: usize) -> Items {
        let document = self.document;
        if document.line_index().line_of(self.offset) != 0 {
            return Ok(Vec::new());
        }
        let closed = document
            .find_node_at(self.offset)
            .is_some_and(|id| document.node(id).closed);
        if closed {
            return Ok(Vec::new());
        }
        let snippets = self.settings.snippets_supported;
        let range = self.replace_range(start, end)?;
        let mut item = item(
            "<?xml ... ?>",
            CompletionItemKind::SNIPPET,
            range,
            prolog::declaration(snippets),
            snippets,
        );
        item.filter_text = Some(prolog::XML.to_string());
        Ok(vec![item])
    }

    // =========================================================================
    // Regions
    // =========================================================================

    /// Offset of the first non-blank character of the cursor's line, when
    /// that line holds nothing else than a region comment start.
    fn line_markup_start(&self) -> Option<usize> {
        let line_start = self.line_start(self.offset);
        let prefix = &self.text[line_start..self.offset];
        let trimmed = prefix.trim_start_matches(is_space);
        (!trimmed.is_empty()).then(|| self.offset - trimmed.len())
    }

    fn allows_regions(&self, context: Context) -> bool {
        if self.document.is_dtd() {
            return false;
        }
        let line_start = self.line_start(self.offset);
        if !REGION_PREFIX.is_match(&self.text[line_start..self.offset]) {
            return false;
        }
        match self.line_markup_start() {
            Some(_) => self.markup_in_content,
            None => context == Context::Content,
        }
    }

    fn region_items(&self) -> Items {
        let start = self.line_markup_start().unwrap_or(self.offset);
        let range = self.replace_range(start, self.offset)?;
        let snippets = self.settings.snippets_supported;
        let (region, end_region) = if snippets {
            ("<!-- #region $1-->", "<!-- #endregion-->")
        } else {
            ("<!-- #region -->", "<!-- #endregion-->")
        };
        let mut items = Vec::with_capacity(2);
        for (label, new_text, filter) in [
            ("#region", region, "<!-- #region"),
            ("#endregion", end_region, "<!-- #endregion"),
        ] {
            let mut item = item(label, CompletionItemKind::SNIPPET, range, new_text.to_string(), snippets);
            item.filter_text = Some(filter.to_string());
            items.push(item);
        }
        Ok(items)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Range from `start` (never past the cursor) to `end`.
    fn replace_range(&self, start: usize, end: usize) -> Result<Range, ServiceError> {
        Ok(self.document.range(start.min(self.offset), end)?)
    }

    fn line_start(&self, offset: usize) -> usize {
        let index = self.document.line_index();
        index.line_start(index.line_of(offset)).unwrap_or(0)
    }

    /// Text between the line start and `offset` when it is all whitespace.
    fn line_indent(&self, offset: usize) -> Option<&'a str> {
        let prefix = &self.text[self.line_start(offset)..offset];
        prefix.chars().all(is_space).then_some(prefix)
    }

    fn line_leading_whitespace(&self, offset: usize) -> &'a str {
        let line = &self.text[self.line_start(offset)..];
        let len = line.len() - line.trim_start_matches([' ', '\t']).len();
        &line[..len]
    }
}

fn item(
    label: impl Into<String>,
    kind: CompletionItemKind,
    range: Range,
    new_text: String,
    snippet: bool,
) -> CompletionItem {
    let format = if snippet {
        InsertTextFormat::SNIPPET
    } else {
        InsertTextFormat::PLAIN_TEXT
    };
    CompletionItem {
        label: label.into(),
        kind: Some(kind),
        text_edit: Some(CompletionTextEdit::Edit(TextEdit::new(range, new_text))),
        insert_text_format: Some(format),
        ..Default::default()
    }
}

/// End of the token right after the current one when it has the expected
/// kind and starts at the cursor, else the cursor itself.
fn scan_next_for_end(scanner: &mut Scanner<'_>, offset: usize, expected: TokenKind) -> usize {
    if scanner.offset() != offset {
        return offset;
    }
    let token = scanner.next_token();
    if token.kind == expected && token.start() == offset {
        token.end()
    } else {
        offset
    }
}

/// True when the first non-whitespace token at `offset`, scanned in
/// `state`, is `expected`.
fn is_followed_by(text: &str, offset: usize, state: ScannerState, expected: TokenKind) -> bool {
    Scanner::with_state(text, offset, state)
        .find(|token| token.kind != TokenKind::Whitespace)
        .is_some_and(|token| token.kind == expected)
}

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

fn escape_choice(choice: &str) -> String {
    choice
        .replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace('|', "\\|")
        .replace('$', "\\$")
}

fn escape_placeholder(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('}', "\\}")
        .replace('$', "\\$")
}
