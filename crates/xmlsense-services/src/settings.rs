//! Client-tunable options.
//!
//! Both structs deserialize from the camelCase JSON an editor sends in its
//! initialization options; any missing field takes its default.

use serde::{Deserialize, Serialize};

/// Quote character used when completion inserts an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStyle {
    #[default]
    Double,
    Single,
}

impl QuoteStyle {
    pub fn quote(self) -> char {
        match self {
            QuoteStyle::Double => '"',
            QuoteStyle::Single => '\'',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionSettings {
    pub insert_spaces: bool,
    pub tab_size: u32,
    /// Offer `$0</name>` with open-tag proposals and close tags as `>`/`/`
    /// are typed.
    pub auto_close_tags: bool,
    /// The client understands snippet syntax (`$0`, `${1:default}`).
    pub snippets_supported: bool,
    pub quote_style: QuoteStyle,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            insert_spaces: true,
            tab_size: 2,
            auto_close_tags: true,
            snippets_supported: true,
            quote_style: QuoteStyle::Double,
        }
    }
}

impl CompletionSettings {
    /// One level of indentation.
    pub fn indent_unit(&self) -> String {
        if self.insert_spaces {
            " ".repeat(self.tab_size as usize)
        } else {
            "\t".to_string()
        }
    }

    pub fn quote(&self) -> char {
        self.quote_style.quote()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationSettings {
    /// Findings past this count are dropped and validation stops.
    pub max_problems: usize,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self { max_problems: 100 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let settings = CompletionSettings::default();
        assert!(settings.auto_close_tags);
        assert!(settings.snippets_supported);
        assert_eq!(settings.quote(), '"');
        assert_eq!(settings.indent_unit(), "  ");
        assert_eq!(ValidationSettings::default().max_problems, 100);
    }

    #[test]
    fn test_deserialize_partial_json() {
        let settings: CompletionSettings =
            serde_json::from_str(r#"{"quoteStyle":"single","autoCloseTags":false}"#).unwrap();
        assert_eq!(settings.quote_style, QuoteStyle::Single);
        assert!(!settings.auto_close_tags);
        assert_eq!(settings.tab_size, 2);
    }

    #[test]
    fn test_indent_unit_with_tabs() {
        let settings = CompletionSettings {
            insert_spaces: false,
            ..Default::default()
        };
        assert_eq!(settings.indent_unit(), "\t");
    }

    #[test]
    fn test_validation_settings_roundtrip() {
        let json = serde_json::to_string(&ValidationSettings { max_problems: 7 }).unwrap();
        assert_eq!(json, r#"{"maxProblems":7}"#);
    }
}
