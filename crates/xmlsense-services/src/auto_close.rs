//! Tag auto-close after a typed `>` or `/`.

use lsp_types::Range;
use serde::Serialize;
use xmlsense_dom::{Document, Element, NodeId};
use xmlsense_scanner::is_void_element;

use crate::settings::CompletionSettings;
use crate::ServiceError;

/// A snippet edit to apply right after the user typed a character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoCloseEdit {
    pub range: Range,
    pub snippet_text: String,
}

/// Compute the auto-close edit for the character just before `offset`.
///
/// - `>` ending a start tag inserts the matching end tag.
/// - `/` right after `<` completes the end tag of the innermost open
///   element.
/// - `/` at the end of a start tag closes it as `/>` and removes an end tag
///   left redundant by that.
pub fn do_auto_close(
    document: &Document,
    offset: usize,
    settings: &CompletionSettings,
) -> Result<Option<AutoCloseEdit>, ServiceError> {
    document.check_offset(offset)?;
    if !settings.auto_close_tags || offset < 2 {
        return Ok(None);
    }
    let text = document.text();
    let typed = &text[..offset];
    let edit = if typed.ends_with('>') {
        close_start_tag(document, offset, settings.snippets_supported)
    } else if typed.ends_with("</") {
        finish_end_tag(document, offset, settings.snippets_supported)
    } else if typed.ends_with('/') {
        self_close(document, offset)
    } else {
        None
    };
    let Some((end, snippet_text)) = edit else {
        return Ok(None);
    };
    tracing::trace!(offset, end, snippet = %snippet_text, "auto-close");
    Ok(Some(AutoCloseEdit {
        range: document.range(offset, end)?,
        snippet_text,
    }))
}

/// `<name ...>|` inserts `</name>` after the cursor.
fn close_start_tag(document: &Document, offset: usize, snippets: bool) -> Option<(usize, String)> {
    let id = document.find_node_before(offset)?;
    let element = document.element(id)?;
    let name = element.tag_name.as_deref()?;
    if element.is_orphan_end_tag()
        || element.self_closed
        || is_void_element(name)
        || element.start_tag_close_offset != Some(offset - 1)
    {
        return None;
    }
    if element.has_end_tag() && !has_open_namesake(document, id, name) {
        return None;
    }
    let snippet = if snippets {
        format!("$0</{name}>")
    } else {
        format!("</{name}>")
    };
    Some((offset, snippet))
}

/// An ancestor with the same name that has no end tag: the end tag matched
/// to `id` may really belong to it.
fn has_open_namesake(document: &Document, id: NodeId, name: &str) -> bool {
    document
        .ancestors_inclusive(id)
        .skip(1)
        .filter_map(|ancestor| document.element(ancestor))
        .any(|ancestor| ancestor.is_same_tag(name) && !ancestor.has_end_tag())
}

/// `</|` inserts the name of the innermost element still missing its end
/// tag.
fn finish_end_tag(document: &Document, offset: usize, snippets: bool) -> Option<(usize, String)> {
    let start = document.enclosing_element(offset - 2)?;
    let name = document
        .ancestors_inclusive(start)
        .filter_map(|id| document.element(id))
        .find(|e| e.has_tag_name() && !e.is_orphan_end_tag() && !e.has_end_tag())?
        .tag_name
        .as_deref()?;
    let close = if document.text()[offset..].starts_with('>') {
        ""
    } else {
        ">"
    };
    let snippet = if snippets {
        format!("{name}{close}$0")
    } else {
        format!("{name}{close}")
    };
    Some((offset, snippet))
}

/// `<name .../|` becomes `<name .../>`, swallowing an end tag that would be
/// left without a start tag.
fn self_close(document: &Document, offset: usize) -> Option<(usize, String)> {
    let slash = offset - 1;
    let id = document.find_start_tag_at(slash)?;
    let element = document.element(id)?;
    element.tag_name.as_ref()?;
    if !is_after_tag_content(element, slash) {
        return None;
    }

    let text = document.text();
    let next = text[offset..].trim_start_matches('/').chars().next();
    let boundary = if next == Some('>') {
        offset + text[offset..].find('>')? + 1
    } else if element.is_start_tag_closed() {
        return None;
    } else {
        offset
    };

    match redundant_end_tag(document, id, boundary) {
        Some(end) => Some((end, ">$0".to_string())),
        None if next == Some('>') => None,
        None => Some((offset, ">$0".to_string())),
    }
}

/// The `/` must follow the tag name and every attribute.
fn is_after_tag_content(element: &Element, slash: usize) -> bool {
    let Some(name) = element.tag_name_span else {
        return false;
    };
    name.end <= slash
        && element.attributes.values().all(|attr| {
            attr.name_span.end <= slash && attr.value_span.map_or(true, |value| value.end <= slash)
        })
}

/// End offset of an end tag starting at `boundary` that closes the element
/// being self-closed: its own end tag, a same-named dangling end tag right
/// after it, or the end tag of a same-named parent it is the last child of.
fn redundant_end_tag(document: &Document, id: NodeId, boundary: usize) -> Option<usize> {
    let node = document.node(id);
    let element = node.as_element()?;
    let name = element.tag_name.as_deref()?;

    if element.end_tag_open_offset == Some(boundary) {
        return Some(end_tag_end(node.end, element));
    }

    let siblings = document.children_of(node.parent);
    let position = siblings.iter().position(|&sibling| sibling == id)?;
    if let Some(&next) = siblings.get(position + 1) {
        let next_node = document.node(next);
        let is_namesake_orphan = next_node
            .as_element()
            .is_some_and(|e| e.is_orphan_end_tag() && e.is_same_tag(name));
        if is_namesake_orphan && next_node.start == boundary {
            return Some(next_node.end);
        }
        return None;
    }

    let parent = node.parent?;
    let parent_node = document.node(parent);
    let parent_element = parent_node.as_element()?;
    if parent_element.is_same_tag(name) && parent_element.end_tag_open_offset == Some(boundary) {
        return Some(end_tag_end(parent_node.end, parent_element));
    }
    None
}

fn end_tag_end(node_end: usize, element: &Element) -> usize {
    element
        .end_tag_close_offset
        .map_or(node_end, |close| close + 1)
}
