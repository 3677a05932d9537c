//! Extension point for grammar-aware completion.
//!
//! A participant knows the content model of some vocabulary (from a schema,
//! a DTD, a catalog...) and answers questions about one element at a time.
//! The completion engine consults every registered participant in order; a
//! participant that fails or panics is logged and skipped, and the built-in
//! heuristics only run when no participant had anything to say.

use std::panic::{self, AssertUnwindSafe};

use lsp_types::CompletionItem;
use xmlsense_dom::{Document, NodeId};

/// An element the grammar allows at the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSuggestion {
    pub name: String,
    /// Snippet for the element's content, placed between its tags. `\t`
    /// stands for one indentation unit and new lines follow the cursor's
    /// indentation.
    pub snippet_body: Option<String>,
}

impl ChildSuggestion {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            snippet_body: None,
        }
    }
}

/// An attribute the grammar declares for an element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttributeSuggestion {
    pub name: String,
    pub default_value: Option<String>,
    pub enum_values: Vec<String>,
}

impl AttributeSuggestion {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Grammar-aware completion source. Every method has an empty default so an
/// implementation only overrides what its grammar knows.
pub trait CompletionParticipant: Send + Sync {
    /// Used in log records.
    fn name(&self) -> &str;

    /// Elements allowed as children of `parent` (`None` for the document
    /// root).
    fn suggest_children(
        &self,
        _document: &Document,
        _parent: Option<NodeId>,
    ) -> anyhow::Result<Vec<ChildSuggestion>> {
        Ok(Vec::new())
    }

    /// Attributes allowed on `element`.
    fn suggest_attributes(
        &self,
        _document: &Document,
        _element: NodeId,
    ) -> anyhow::Result<Vec<AttributeSuggestion>> {
        Ok(Vec::new())
    }

    /// Values allowed for `attribute` on `element`.
    fn suggest_attribute_values(
        &self,
        _document: &Document,
        _element: NodeId,
        _attribute: &str,
    ) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Extra proposals for a cursor in character content (entities, text
    /// snippets...). These are added as-is.
    fn suggest_content(
        &self,
        _document: &Document,
        _offset: usize,
    ) -> anyhow::Result<Vec<CompletionItem>> {
        Ok(Vec::new())
    }
}

/// Ask every participant, in registration order, and concatenate the
/// answers. Errors and panics are logged and the participant is skipped.
pub(crate) fn consult<T>(
    participants: &[Box<dyn CompletionParticipant>],
    hook: &'static str,
    mut ask: impl FnMut(&dyn CompletionParticipant) -> anyhow::Result<Vec<T>>,
) -> Vec<T> {
    let mut answers = Vec::new();
    for participant in participants {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| ask(participant.as_ref())));
        match outcome {
            Ok(Ok(mut found)) => answers.append(&mut found),
            Ok(Err(err)) => {
                tracing::warn!(
                    participant = participant.name(),
                    hook,
                    error = %err,
                    "completion participant failed"
                );
            }
            Err(_) => {
                tracing::warn!(
                    participant = participant.name(),
                    hook,
                    "completion participant panicked"
                );
            }
        }
    }
    answers
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use pretty_assertions::assert_eq;

    struct Fixed(&'static str);

    impl CompletionParticipant for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn suggest_children(
            &self,
            _document: &Document,
            _parent: Option<NodeId>,
        ) -> anyhow::Result<Vec<ChildSuggestion>> {
            Ok(vec![ChildSuggestion::new(self.0)])
        }
    }

    struct Broken;

    impl CompletionParticipant for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn suggest_children(
            &self,
            _document: &Document,
            _parent: Option<NodeId>,
        ) -> anyhow::Result<Vec<ChildSuggestion>> {
            bail!("grammar not loaded")
        }
    }

    #[test]
    fn test_consult_keeps_order_and_skips_failures() {
        let document = xmlsense_dom::parse("<a/>", "file:///a.xml");
        let participants: Vec<Box<dyn CompletionParticipant>> =
            vec![Box::new(Fixed("x")), Box::new(Broken), Box::new(Fixed("y"))];
        let names: Vec<_> = consult(&participants, "children", |p| {
            p.suggest_children(&document, None)
        })
        .into_iter()
        .map(|c| c.name)
        .collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    struct Panicking;

    impl CompletionParticipant for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn suggest_children(
            &self,
            _document: &Document,
            _parent: Option<NodeId>,
        ) -> anyhow::Result<Vec<ChildSuggestion>> {
            panic!("index out of bounds in grammar")
        }
    }

    #[test]
    fn test_consult_survives_panicking_participant() {
        let document = xmlsense_dom::parse("<a/>", "file:///a.xml");
        let participants: Vec<Box<dyn CompletionParticipant>> =
            vec![Box::new(Panicking), Box::new(Fixed("y"))];
        let names: Vec<_> = consult(&participants, "children", |p| {
            p.suggest_children(&document, None)
        })
        .into_iter()
        .map(|c| c.name)
        .collect();
        assert_eq!(names, vec!["y"]);
    }

    #[test]
    fn test_default_methods_are_empty() {
        let document = xmlsense_dom::parse("<a/>", "file:///a.xml");
        let root = document.document_element().unwrap();
        let participant = Fixed("x");
        assert!(participant.suggest_attributes(&document, root).unwrap().is_empty());
        assert!(participant
            .suggest_attribute_values(&document, root, "id")
            .unwrap()
            .is_empty());
        assert!(participant.suggest_content(&document, 0).unwrap().is_empty());
    }
}
