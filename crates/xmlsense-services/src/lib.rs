//! xmlsense services
//!
//! Editor features on top of the tree: well-formedness diagnostics,
//! context-aware completion and tag auto-close. Requests take LSP positions
//! and return LSP types; malformed documents never make a request fail, only
//! a position outside the document does.
//!
//! # Example
//!
//! ```
//! use lsp_types::Position;
//! use tokio_util::sync::CancellationToken;
//! use xmlsense_services::XmlLanguageService;
//!
//! let service = XmlLanguageService::new();
//! let doc = service.parse_document("<a><b>", "file:///a.xml");
//!
//! let diagnostics = service.do_diagnostics(&doc, &CancellationToken::new()).unwrap();
//! assert_eq!(diagnostics.len(), 2); // Neither element has an end tag
//!
//! let list = service.do_complete(&doc, Position::new(0, 6)).unwrap();
//! assert_eq!(list.items[0].label, "</b>");
//! ```

pub mod auto_close;
pub mod completion;
pub mod diagnostics;
pub mod participant;
pub mod prolog;
pub mod settings;

use lsp_types::{CompletionList, Diagnostic, Position};
use tokio_util::sync::CancellationToken;
use xmlsense_dom::{Document, DomError};

pub use auto_close::{do_auto_close, AutoCloseEdit};
pub use completion::do_complete;
pub use diagnostics::{do_diagnostics, validate, ErrorCode, Problem};
pub use participant::{AttributeSuggestion, ChildSuggestion, CompletionParticipant};
pub use settings::{CompletionSettings, QuoteStyle, ValidationSettings};

/// A request that could not be served.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Position(#[from] DomError),

    #[error("request cancelled")]
    Cancelled,
}

/// Entry point holding settings and registered participants.
#[derive(Default)]
pub struct XmlLanguageService {
    completion_settings: CompletionSettings,
    validation_settings: ValidationSettings,
    participants: Vec<Box<dyn CompletionParticipant>>,
}

impl XmlLanguageService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(completion: CompletionSettings, validation: ValidationSettings) -> Self {
        Self {
            completion_settings: completion,
            validation_settings: validation,
            participants: Vec::new(),
        }
    }

    /// Participants are consulted in registration order.
    pub fn register_participant(&mut self, participant: Box<dyn CompletionParticipant>) {
        tracing::debug!(participant = participant.name(), "registered completion participant");
        self.participants.push(participant);
    }

    pub fn completion_settings(&self) -> &CompletionSettings {
        &self.completion_settings
    }

    pub fn set_completion_settings(&mut self, settings: CompletionSettings) {
        self.completion_settings = settings;
    }

    pub fn validation_settings(&self) -> &ValidationSettings {
        &self.validation_settings
    }

    pub fn set_validation_settings(&mut self, settings: ValidationSettings) {
        self.validation_settings = settings;
    }

    pub fn parse_document(&self, text: &str, uri: &str) -> Document {
        xmlsense_dom::parse(text, uri)
    }

    pub fn do_diagnostics(
        &self,
        document: &Document,
        cancel: &CancellationToken,
    ) -> Result<Vec<Diagnostic>, ServiceError> {
        diagnostics::do_diagnostics(document, &self.validation_settings, cancel)
    }

    pub fn do_complete(
        &self,
        document: &Document,
        position: Position,
    ) -> Result<CompletionList, ServiceError> {
        let offset = document.offset_at(position)?;
        completion::do_complete(document, offset, &self.completion_settings, &self.participants)
    }

    /// Auto-close edit for the character typed just before `position`.
    pub fn do_auto_close(
        &self,
        document: &Document,
        position: Position,
    ) -> Result<Option<AutoCloseEdit>, ServiceError> {
        let offset = document.offset_at(position)?;
        auto_close::do_auto_close(document, offset, &self.completion_settings)
    }

    pub fn position_at(&self, document: &Document, offset: usize) -> Result<Position, ServiceError> {
        Ok(document.position_at(offset)?)
    }

    pub fn offset_at(&self, document: &Document, position: Position) -> Result<usize, ServiceError> {
        Ok(document.offset_at(position)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Named;

    impl CompletionParticipant for Named {
        fn name(&self) -> &str {
            "named"
        }

        fn suggest_children(
            &self,
            _document: &Document,
            _parent: Option<xmlsense_dom::NodeId>,
        ) -> anyhow::Result<Vec<ChildSuggestion>> {
            Ok(vec![ChildSuggestion::new("item")])
        }
    }

    #[test]
    fn test_complete_uses_registered_participants() {
        let mut service = XmlLanguageService::new();
        service.register_participant(Box::new(Named));
        let doc = service.parse_document("<list><", "file:///a.xml");
        let list = service.do_complete(&doc, Position::new(0, 7)).unwrap();
        assert!(list.items.iter().any(|item| item.label == "item"));
    }

    #[test]
    fn test_settings_flow_into_requests() {
        let mut service = XmlLanguageService::new();
        service.set_completion_settings(CompletionSettings {
            auto_close_tags: false,
            ..Default::default()
        });
        let doc = service.parse_document("<a>", "file:///a.xml");
        assert_eq!(service.do_auto_close(&doc, Position::new(0, 3)).unwrap(), None);
        assert!(!service.completion_settings().auto_close_tags);
    }

    #[test]
    fn test_validation_cap_from_settings() {
        let service = XmlLanguageService::with_settings(
            CompletionSettings::default(),
            ValidationSettings { max_problems: 1 },
        );
        let doc = service.parse_document("<a><b><c>", "file:///a.xml");
        let diagnostics = service.do_diagnostics(&doc, &CancellationToken::new()).unwrap();
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_position_round_trip() {
        let service = XmlLanguageService::new();
        let doc = service.parse_document("<a>\n  é<b/>", "file:///a.xml");
        let position = service.position_at(&doc, 8).unwrap();
        assert_eq!(position, Position::new(1, 3));
        assert_eq!(service.offset_at(&doc, position).unwrap(), 8);
    }

    #[test]
    fn test_position_past_end_is_an_error() {
        let service = XmlLanguageService::new();
        let doc = service.parse_document("<a/>", "file:///a.xml");
        let result = service.do_complete(&doc, Position::new(3, 0));
        assert!(matches!(result, Err(ServiceError::Position(_))));
    }
}
