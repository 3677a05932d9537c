use clap::{Args, Parser, Subcommand};
use lsp_types::{Diagnostic, NumberOrString, Position};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use xmlsense_dom::{is_dtd_uri, Document, NodeId, NodeKind};
use xmlsense_scanner::Scanner;
use xmlsense_services::{CompletionSettings, QuoteStyle, XmlLanguageService};

#[derive(Parser)]
#[command(name = "xmlsense")]
#[command(about = "xmlsense: XML scanning, diagnostics and completion from the command line")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dump the token stream of a file
    Tokens {
        /// Input .xml or .dtd file
        path: String,
    },

    /// Print the node outline of a file
    Tree {
        /// Input .xml or .dtd file
        path: String,
    },

    /// Report well-formedness problems (exit status 1 if any)
    Check {
        /// Input .xml or .dtd file
        path: String,
    },

    /// Print completion proposals at a position as JSON
    Complete {
        #[command(flatten)]
        at: At,
        #[command(flatten)]
        settings: SettingsArgs,
    },

    /// Print the auto-close edit for the character before a position as JSON
    Autoclose {
        #[command(flatten)]
        at: At,
        #[command(flatten)]
        settings: SettingsArgs,
    },
}

/// A file and a zero-based LSP position in it.
#[derive(Args)]
struct At {
    /// Input .xml or .dtd file
    path: String,
    /// Zero-based line
    line: u32,
    /// Zero-based UTF-16 column
    character: u32,
}

#[derive(Args)]
struct SettingsArgs {
    /// Insert plain text instead of snippets
    #[arg(long)]
    no_snippets: bool,
    /// Do not propose or insert end tags
    #[arg(long)]
    no_auto_close: bool,
    /// Quote inserted attribute values with `'`
    #[arg(long)]
    single_quotes: bool,
    /// Width of one indentation level
    #[arg(long, default_value_t = 2)]
    tab_size: u32,
    /// Indent with spaces instead of tabs
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    insert_spaces: bool,
}

impl SettingsArgs {
    fn to_settings(&self) -> CompletionSettings {
        CompletionSettings {
            insert_spaces: self.insert_spaces,
            tab_size: self.tab_size,
            auto_close_tags: !self.no_auto_close,
            snippets_supported: !self.no_snippets,
            quote_style: if self.single_quotes {
                QuoteStyle::Single
            } else {
                QuoteStyle::Double
            },
        }
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Tokens { path } => cmd_tokens(&path),
        Command::Tree { path } => cmd_tree(&path),
        Command::Check { path } => cmd_check(&path),
        Command::Complete { at, settings } => cmd_complete(&at, &settings),
        Command::Autoclose { at, settings } => cmd_autoclose(&at, &settings),
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("XMLSENSE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_source(path: &str) -> String {
    let p = Path::new(path);
    if !p.exists() {
        eprintln!("Error: file not found: {path}");
        std::process::exit(1);
    }
    match std::fs::read_to_string(p) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading {path}: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_tokens(path: &str) {
    let source = read_source(path);
    let scanner = if is_dtd_uri(path) {
        Scanner::dtd(&source, 0)
    } else {
        Scanner::new(&source)
    };
    for token in scanner {
        println!(
            "{:>6}..{:<6} {:<24} {:?}",
            token.start(),
            token.end(),
            format!("{:?}", token.kind),
            token.text
        );
    }
}

fn cmd_tree(path: &str) {
    let source = read_source(path);
    let doc = xmlsense_dom::parse(&source, path);
    print!("{}", outline(&doc));
}

fn cmd_check(path: &str) {
    let source = read_source(path);
    let service = XmlLanguageService::new();
    let doc = service.parse_document(&source, path);

    let diagnostics = match service.do_diagnostics(&doc, &CancellationToken::new()) {
        Ok(diagnostics) => diagnostics,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    tracing::debug!(path, count = diagnostics.len(), "checked document");

    if diagnostics.is_empty() {
        eprintln!("OK: {path}");
        return;
    }
    for diagnostic in &diagnostics {
        println!("{}", format_diagnostic(path, diagnostic));
    }
    std::process::exit(1);
}

fn cmd_complete(at: &At, settings: &SettingsArgs) {
    let source = read_source(&at.path);
    let mut service = XmlLanguageService::new();
    service.set_completion_settings(settings.to_settings());
    let doc = service.parse_document(&source, &at.path);

    match service.do_complete(&doc, Position::new(at.line, at.character)) {
        Ok(list) => print_json(&list),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_autoclose(at: &At, settings: &SettingsArgs) {
    let source = read_source(&at.path);
    let mut service = XmlLanguageService::new();
    service.set_completion_settings(settings.to_settings());
    let doc = service.parse_document(&source, &at.path);

    match service.do_auto_close(&doc, Position::new(at.line, at.character)) {
        Ok(edit) => print_json(&edit),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error encoding JSON: {e}");
            std::process::exit(1);
        }
    }
}

/// `path:line:column: error[code]: message`, one-based like compilers print.
fn format_diagnostic(path: &str, diagnostic: &Diagnostic) -> String {
    let code = match &diagnostic.code {
        Some(NumberOrString::String(code)) => code.clone(),
        Some(NumberOrString::Number(code)) => code.to_string(),
        None => String::new(),
    };
    let start = diagnostic.range.start;
    format!(
        "{path}:{}:{}: error[{code}]: {}",
        start.line + 1,
        start.character + 1,
        diagnostic.message
    )
}

/// One line per node, children indented under their parent.
fn outline(doc: &Document) -> String {
    let mut out = String::new();
    for &root in doc.roots() {
        write_outline(doc, root, 0, &mut out);
    }
    out
}

fn write_outline(doc: &Document, id: NodeId, depth: usize, out: &mut String) {
    let node = doc.node(id);
    let label = match &node.kind {
        NodeKind::Element(element) => {
            let name = element.tag_name.as_deref().unwrap_or("");
            let mut label = format!("<{name}>");
            if element.is_orphan_end_tag() {
                label.push_str(" orphan end tag");
            } else if element.self_closed {
                label.push_str(" self-closed");
            } else if !element.has_end_tag() {
                label.push_str(" no end tag");
            }
            label
        }
        kind => kind.name().to_string(),
    };
    let unterminated = if node.closed { "" } else { " (unterminated)" };
    out.push_str(&format!(
        "{}{label} [{}, {}){unterminated}\n",
        "  ".repeat(depth),
        node.start,
        node.end
    ));
    for &child in &node.children {
        write_outline(doc, child, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_settings_flags() {
        let cli = Cli::try_parse_from([
            "xmlsense",
            "complete",
            "a.xml",
            "3",
            "7",
            "--no-snippets",
            "--single-quotes",
            "--tab-size",
            "4",
            "--insert-spaces",
            "false",
        ])
        .unwrap();
        let Command::Complete { at, settings } = cli.command else {
            panic!("expected complete");
        };
        assert_eq!((at.path.as_str(), at.line, at.character), ("a.xml", 3, 7));
        let settings = settings.to_settings();
        assert!(!settings.snippets_supported);
        assert!(settings.auto_close_tags);
        assert_eq!(settings.quote_style, QuoteStyle::Single);
        assert_eq!(settings.indent_unit(), "\t");
    }

    #[test]
    fn test_default_settings_match_library() {
        let cli = Cli::try_parse_from(["xmlsense", "autoclose", "a.xml", "0", "3"]).unwrap();
        let Command::Autoclose { settings, .. } = cli.command else {
            panic!("expected autoclose");
        };
        assert_eq!(settings.to_settings(), CompletionSettings::default());
    }

    #[test]
    fn test_outline() {
        let doc = xmlsense_dom::parse("<a><b/>text</c>", "file:///a.xml");
        assert_eq!(
            outline(&doc),
            "<a> no end tag [0, 15) (unterminated)\n  \
             <b> self-closed [3, 7)\n  \
             text [7, 11)\n  \
             <c> orphan end tag [11, 15)\n"
        );
    }

    #[test]
    fn test_format_diagnostic() {
        let service = XmlLanguageService::new();
        let doc = service.parse_document("<r>\n  <a x=\"1\" x=\"2\"/>\n</r>", "file:///a.xml");
        let diagnostics = service
            .do_diagnostics(&doc, &CancellationToken::new())
            .unwrap();
        assert_eq!(
            format_diagnostic("a.xml", &diagnostics[0]),
            "a.xml:2:12: error[duplicate-attribute]: Attribute \"x\" was already specified for element \"a\""
        );
    }
}
