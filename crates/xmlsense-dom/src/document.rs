use lsp_types::{Position, Range};

use crate::line_index::LineIndex;
use crate::node::{Attr, Element, Node, NodeId};
use crate::DomError;

/// A parsed document: the full text, the node arena and its root forest.
///
/// Immutable once built. A text change produces a new `Document`.
#[derive(Debug, Clone)]
pub struct Document {
    text: String,
    uri: String,
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
    line_index: LineIndex,
    is_dtd: bool,
}

impl Document {
    pub(crate) fn new(
        text: String,
        uri: String,
        nodes: Vec<Node>,
        roots: Vec<NodeId>,
        is_dtd: bool,
    ) -> Self {
        let line_index = LineIndex::new(&text);
        Self {
            text,
            uri,
            nodes,
            roots,
            line_index,
            is_dtd,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// True for external DTD files.
    pub fn is_dtd(&self) -> bool {
        self.is_dtd
    }

    /// Top-level nodes in document order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        self.node(id).as_element()
    }

    /// Every node in document (start offset) order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId(i as u32), node))
    }

    /// Children of `parent`, or the roots for `None`.
    pub fn children_of(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            Some(id) => &self.node(id).children,
            None => &self.roots,
        }
    }

    /// `id` followed by each of its ancestors, innermost first.
    pub fn ancestors_inclusive(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), |&id| self.node(id).parent)
    }

    pub fn line_index(&self) -> &LineIndex {
        &self.line_index
    }

    // --- Positions ---

    /// Validate a caller-supplied offset.
    pub fn check_offset(&self, offset: usize) -> Result<(), DomError> {
        if offset > self.text.len() {
            return Err(DomError::OffsetOutOfRange {
                offset,
                len: self.text.len(),
            });
        }
        if !self.text.is_char_boundary(offset) {
            return Err(DomError::NotCharBoundary { offset });
        }
        Ok(())
    }

    pub fn position_at(&self, offset: usize) -> Result<Position, DomError> {
        self.line_index.position_at(&self.text, offset)
    }

    pub fn offset_at(&self, position: Position) -> Result<usize, DomError> {
        self.line_index.offset_at(&self.text, position)
    }

    pub fn range(&self, start: usize, end: usize) -> Result<Range, DomError> {
        Ok(Range::new(self.position_at(start)?, self.position_at(end)?))
    }

    // --- Lookup ---

    /// Deepest node with `start < offset <= end`.
    pub fn find_node_at(&self, offset: usize) -> Option<NodeId> {
        let mut found = None;
        let mut children = self.roots.as_slice();
        while let Some(candidate) = self.last_starting_before(children, offset) {
            let node = self.node(candidate);
            if offset > node.end {
                break;
            }
            found = Some(candidate);
            children = &node.children;
        }
        found
    }

    /// Deepest node that contains `offset` or ends right before it. Used
    /// to pick where a completion re-scan starts.
    pub fn find_node_before(&self, offset: usize) -> Option<NodeId> {
        let mut found = None;
        let mut children = self.roots.as_slice();
        while let Some(candidate) = self.last_starting_before(children, offset) {
            let node = self.node(candidate);
            found = Some(candidate);
            let reaches_end = node
                .children
                .last()
                .is_some_and(|&last| self.node(last).end == node.end);
            if offset < node.end || reaches_end {
                children = &node.children;
            } else {
                break;
            }
        }
        found
    }

    /// Deepest element whose content (the text between its start tag and its
    /// end tag, or to the end of input when it has none) holds `offset`.
    pub fn enclosing_element(&self, offset: usize) -> Option<NodeId> {
        let mut found = None;
        let mut children = self.roots.as_slice();
        while let Some(candidate) = self.last_starting_before(children, offset) {
            let node = self.node(candidate);
            if !self.element_holds(node, offset) {
                break;
            }
            found = Some(candidate);
            children = &node.children;
        }
        found
    }

    /// Element whose start tag (from `<` to its `>` or `/`) holds `offset`.
    pub fn find_start_tag_at(&self, offset: usize) -> Option<NodeId> {
        let mut children = self.roots.as_slice();
        while let Some(candidate) = self.last_starting_before(children, offset) {
            let node = self.node(candidate);
            let element = node.as_element()?;
            if !element.is_orphan_end_tag() && offset <= self.start_tag_end(candidate) {
                return Some(candidate);
            }
            if !self.element_holds(node, offset) {
                return None;
            }
            children = &node.children;
        }
        None
    }

    /// Attribute under `offset`, on its name or inside its value.
    pub fn find_attr_at(&self, offset: usize) -> Option<(NodeId, &Attr)> {
        let id = self.find_start_tag_at(offset)?;
        let attr = self.element(id)?.attributes.values().find(|attr| {
            attr.name_span.touches(offset)
                || attr
                    .value_span
                    .is_some_and(|span| span.start < offset && offset <= span.end)
        })?;
        Some((id, attr))
    }

    /// End of an element's start tag: the offset of its closing `>` (or of
    /// the `/` of `/>`), or where its content begins when unterminated.
    pub fn start_tag_end(&self, id: NodeId) -> usize {
        let node = self.node(id);
        match node.as_element().and_then(|e| e.start_tag_close_offset) {
            Some(close) => close,
            None => node
                .children
                .first()
                .map_or(node.end, |&first| self.node(first).start),
        }
    }

    fn element_holds(&self, node: &Node, offset: usize) -> bool {
        let Some(element) = node.as_element() else {
            return false;
        };
        if element.is_orphan_end_tag() || element.self_closed || offset <= node.start {
            return false;
        }
        offset <= element.end_tag_open_offset.unwrap_or(node.end)
    }

    /// Last of `children` starting strictly before `offset`.
    fn last_starting_before(&self, children: &[NodeId], offset: usize) -> Option<NodeId> {
        let idx = children.partition_point(|&c| self.node(c).start < offset);
        idx.checked_sub(1).map(|i| children[i])
    }

    // --- Doctype ---

    /// The `<!DOCTYPE>` node (the whole file for an external DTD).
    pub fn doctype(&self) -> Option<NodeId> {
        self.roots
            .iter()
            .copied()
            .find(|&id| self.node(id).as_doctype().is_some())
    }

    /// First top-level element with a start tag.
    pub fn document_element(&self) -> Option<NodeId> {
        self.roots
            .iter()
            .copied()
            .find(|&id| self.element(id).is_some_and(|e| !e.is_orphan_end_tag()))
    }

    /// True when `offset` lies between the `[` and `]` of the doctype's
    /// internal subset (or after `[` if the subset is unterminated).
    pub fn is_in_internal_subset(&self, offset: usize) -> bool {
        let Some(id) = self.doctype() else {
            return false;
        };
        let node = self.node(id);
        let Some(doctype) = node.as_doctype() else {
            return false;
        };
        let Some(start) = doctype.internal_subset_start else {
            return false;
        };
        offset > start && offset <= doctype.internal_subset_end.unwrap_or(node.end)
    }

    // --- Serialization ---

    /// Write the tree back to text, node by node. For any parse this
    /// reproduces the source exactly; reparsing the result yields the same
    /// node boundaries.
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(self.text.len());
        let mut cursor = 0;
        for &root in &self.roots {
            self.write_node(root, &mut cursor, &mut out);
        }
        out.push_str(&self.text[cursor..]);
        out
    }

    fn write_node(&self, id: NodeId, cursor: &mut usize, out: &mut String) {
        let node = self.node(id);
        debug_assert!(*cursor <= node.start, "node {id:?} overlaps its predecessor");
        out.push_str(&self.text[*cursor..node.start]);
        *cursor = node.start;
        for &child in &node.children {
            self.write_node(child, cursor, out);
        }
        out.push_str(&self.text[*cursor..node.end]);
        *cursor = node.end;
    }
}

#[cfg(test)]
mod tests {
    use crate::parse;
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse_xml(text: &str) -> Document {
        parse(text, "file:///test.xml")
    }

    fn tag_at(doc: &Document, id: Option<NodeId>) -> Option<&str> {
        id.and_then(|id| doc.node(id).tag_name())
    }

    #[test]
    fn test_find_node_at() {
        let doc = parse_xml("<a><b>x</b></a>");
        assert_eq!(doc.find_node_at(0), None);
        assert_eq!(tag_at(&doc, doc.find_node_at(1)), Some("a"));
        assert_eq!(tag_at(&doc, doc.find_node_at(4)), Some("b"));
        assert_eq!(tag_at(&doc, doc.find_node_at(11)), Some("b"));
        assert_eq!(tag_at(&doc, doc.find_node_at(12)), Some("a"));
    }

    #[test]
    fn test_find_node_before() {
        let doc = parse_xml("<a><b>x</b>  </a>");
        // Right after </b>: b is the node before.
        assert_eq!(tag_at(&doc, doc.find_node_before(11)), Some("b"));
        assert_eq!(tag_at(&doc, doc.find_node_before(12)), Some("b"));
        assert_eq!(tag_at(&doc, doc.find_node_before(3)), Some("a"));
        assert_eq!(doc.find_node_before(0), None);
    }

    #[test]
    fn test_find_node_before_descends_into_unclosed() {
        let doc = parse_xml("<a><b>text");
        let found = doc.find_node_before(10).unwrap();
        assert_eq!(doc.node(found).kind.name(), "text");
    }

    #[test]
    fn test_enclosing_element() {
        let doc = parse_xml("<a><b>text");
        assert_eq!(tag_at(&doc, doc.enclosing_element(10)), Some("b"));
        assert_eq!(tag_at(&doc, doc.enclosing_element(6)), Some("b"));
        assert_eq!(tag_at(&doc, doc.enclosing_element(3)), Some("a"));

        let doc = parse_xml("<a></a>");
        assert_eq!(tag_at(&doc, doc.enclosing_element(3)), Some("a"));
        assert_eq!(doc.enclosing_element(7), None);

        let doc = parse_xml("<div><br /></");
        assert_eq!(tag_at(&doc, doc.enclosing_element(11)), Some("div"));
    }

    #[test]
    fn test_find_start_tag_at() {
        let doc = parse_xml("<a x=\"1\"><b/></a>");
        assert_eq!(tag_at(&doc, doc.find_start_tag_at(3)), Some("a"));
        assert_eq!(tag_at(&doc, doc.find_start_tag_at(8)), Some("a"));
        assert_eq!(tag_at(&doc, doc.find_start_tag_at(11)), Some("b"));
        assert_eq!(doc.find_start_tag_at(13), None);
        assert_eq!(doc.find_start_tag_at(15), None);
    }

    #[test]
    fn test_find_start_tag_at_unterminated() {
        let doc = parse_xml("<a x <b/>");
        assert_eq!(tag_at(&doc, doc.find_start_tag_at(4)), Some("a"));
        assert_eq!(tag_at(&doc, doc.find_start_tag_at(6)), Some("b"));
    }

    #[test]
    fn test_find_attr_at() {
        let doc = parse_xml("<a xy=\"12\" z='3'/>");
        let (_, attr) = doc.find_attr_at(4).unwrap();
        assert_eq!(attr.name, "xy");
        let (_, attr) = doc.find_attr_at(8).unwrap();
        assert_eq!(attr.name, "xy");
        let (_, attr) = doc.find_attr_at(14).unwrap();
        assert_eq!(attr.name, "z");
        assert!(doc.find_attr_at(1).is_none());
    }

    #[test]
    fn test_is_in_internal_subset() {
        let text = "<!DOCTYPE a [\n  \n]>\n<a/>";
        let doc = parse_xml(text);
        assert!(!doc.is_in_internal_subset(12));
        assert!(doc.is_in_internal_subset(14));
        assert!(doc.is_in_internal_subset(17));
        assert!(!doc.is_in_internal_subset(19));
    }

    #[test]
    fn test_is_in_unterminated_internal_subset() {
        let doc = parse_xml("<!DOCTYPE a [\n");
        assert!(doc.is_in_internal_subset(14));
    }

    #[test]
    fn test_document_element_skips_prolog_and_doctype() {
        let doc = parse_xml("<?xml version=\"1.0\"?><!DOCTYPE r><r/>");
        assert_eq!(tag_at(&doc, doc.document_element()), Some("r"));
        assert!(doc.doctype().is_some());
    }

    #[test]
    fn test_check_offset() {
        let doc = parse_xml("é");
        assert_eq!(doc.check_offset(2), Ok(()));
        assert_eq!(doc.check_offset(1), Err(DomError::NotCharBoundary { offset: 1 }));
        assert_eq!(
            doc.check_offset(3),
            Err(DomError::OffsetOutOfRange { offset: 3, len: 2 })
        );
    }

    #[test]
    fn test_range() {
        let doc = parse_xml("<a>\n</a>");
        let range = doc.range(3, 6).unwrap();
        assert_eq!(range, Range::new(Position::new(0, 3), Position::new(1, 2)));
    }

    #[test]
    fn test_serialize_malformed_input_is_lossless() {
        let text = "  <a x='1' <b></c>\n<!-- x <?p ";
        assert_eq!(parse_xml(text).serialize(), text);
    }

    #[test]
    fn test_ancestors_inclusive() {
        let doc = parse_xml("<a><b><c/></b></a>");
        let c = doc.find_start_tag_at(7).unwrap();
        let names: Vec<_> = doc
            .ancestors_inclusive(c)
            .filter_map(|id| doc.node(id).tag_name())
            .collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }
}
