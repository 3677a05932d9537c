//! The `<?xml ...?>` declaration's pseudo-attributes and their values.

/// Target of the XML declaration.
pub const XML: &str = "xml";

pub const VERSION: &str = "version";
pub const ENCODING: &str = "encoding";
pub const STANDALONE: &str = "standalone";

/// Pseudo-attributes in the order they must appear.
pub const ATTRIBUTES: [&str; 3] = [VERSION, ENCODING, STANDALONE];

const VERSIONS: &[&str] = &["1.0", "1.1"];

const ENCODINGS: &[&str] = &[
    "UTF-8",
    "UTF-16",
    "ISO-8859-1",
    "ISO-8859-2",
    "ISO-8859-15",
    "US-ASCII",
    "Shift_JIS",
    "EUC-JP",
    "GB2312",
    "windows-1252",
];

const STANDALONE_VALUES: &[&str] = &["yes", "no"];

/// Known values of a pseudo-attribute, or an empty slice.
pub fn values(attribute: &str) -> &'static [&'static str] {
    match attribute {
        VERSION => VERSIONS,
        ENCODING => ENCODINGS,
        STANDALONE => STANDALONE_VALUES,
        _ => &[],
    }
}

/// Body of a complete declaration after `<?`.
pub fn declaration(snippet: bool) -> String {
    if snippet {
        "xml version=\"${1:1.0}\" encoding=\"${2:UTF-8}\"?>$0".to_string()
    } else {
        "xml version=\"1.0\" encoding=\"UTF-8\"?>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values() {
        assert_eq!(values("version"), &["1.0", "1.1"]);
        assert!(values("encoding").contains(&"UTF-8"));
        assert_eq!(values("standalone"), &["yes", "no"]);
        assert!(values("other").is_empty());
    }

    #[test]
    fn test_declaration() {
        assert_eq!(declaration(false), "xml version=\"1.0\" encoding=\"UTF-8\"?>");
        assert!(declaration(true).ends_with("?>$0"));
    }
}
