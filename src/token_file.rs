//! Analyzer for token source documents (JSON/JSONC/YAML).
//!
//! A document qualifies when its path is a loaded token source or its
//! `$schema` names a design-tokens schema; `package.json` and generic JSON
//! Schema files never qualify. For qualifying documents the analyzer
//! extracts `{a.b.c}` reference strings and answers hover, definition,
//! references, and semantic tokens over them.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use tower_lsp_server::ls_types::{
    Location, Position, SemanticToken, SemanticTokenType, SemanticTokensLegend, Uri,
};

use crate::css;
use crate::documents::Document;
use crate::tokens::Token;
use crate::workspace::{file_uri, parse_uri};

/// Language IDs token files may open under.
pub fn is_token_file_language(language_id: &str) -> bool {
    matches!(language_id, "json" | "jsonc" | "yaml")
}

/// Whether a document is a design-token file the analyzer should touch.
pub fn is_token_file(path: Option<&Path>, text: &str, loaded_paths: &[PathBuf]) -> bool {
    if let Some(path) = path {
        if path.file_name().is_some_and(|n| n == "package.json") {
            return false;
        }
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if loaded_paths.iter().any(|p| *p == canonical || p == path) {
            return true;
        }
    }
    schema_field(text).is_some_and(|url| url.contains("design-tokens"))
}

/// Pull a top-level `$schema` string without a full parse.
fn schema_field(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r##""\$schema"\s*:\s*"([^"]+)"|\$schema\s*:\s*([^\s"']+)"##).unwrap()
    });
    let caps = re.captures(text)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

/// One `{a.b.c}` reference string occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenReference {
    /// Byte range of the `{…}` text, braces included.
    pub range: Range<usize>,
    /// Normalized dotted key.
    pub key: String,
}

/// Extract every `{a.b.c}` reference with its byte range.
pub fn token_references(text: &str) -> Vec<TokenReference> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\{([A-Za-z0-9_@][A-Za-z0-9_.@\-]*)\}").unwrap()
    });
    re.captures_iter(text)
        .map(|caps| {
            let whole = caps.get(0).unwrap();
            TokenReference {
                range: whole.start()..whole.end(),
                key: caps.get(1).unwrap().as_str().trim().to_string(),
            }
        })
        .collect()
}

/// The reference containing a byte offset, if any.
pub fn reference_at(refs: &[TokenReference], offset: usize) -> Option<&TokenReference> {
    refs.iter()
        .find(|r| r.range.start <= offset && offset < r.range.end)
}

/// Fixed semantic-tokens legend: one token type, no modifiers.
pub fn semantic_tokens_legend() -> SemanticTokensLegend {
    SemanticTokensLegend {
        token_types: vec![SemanticTokenType::VARIABLE],
        token_modifiers: vec![],
    }
}

/// Delta-encode references into the five-value-per-token wire form.
pub fn encode_semantic_tokens(doc: &Document, refs: &[TokenReference]) -> Vec<SemanticToken> {
    let mut positions: Vec<(u32, u32, u32)> = refs
        .iter()
        .map(|r| {
            let start = doc.position_at(r.range.start);
            let end = doc.position_at(r.range.end);
            let length = if end.line == start.line {
                end.character - start.character
            } else {
                r.range.len() as u32
            };
            (start.line, start.character, length)
        })
        .collect();
    positions.sort_unstable();

    let mut out = Vec::with_capacity(positions.len());
    let (mut prev_line, mut prev_start) = (0u32, 0u32);
    for (line, start, length) in positions {
        let delta_line = line - prev_line;
        let delta_start = if delta_line == 0 { start - prev_start } else { start };
        out.push(SemanticToken {
            delta_line,
            delta_start,
            length,
            token_type: 0,
            token_modifiers_bitset: 0,
        });
        prev_line = line;
        prev_start = start;
    }
    out
}

/// Locations of every occurrence of `token` across the open documents and
/// the loaded (possibly unopened) token files.
pub fn find_references(
    token: &Token,
    open_docs: &[Arc<Document>],
    loaded_paths: &[PathBuf],
    include_declaration: bool,
) -> Vec<Location> {
    let mut out: Vec<Location> = Vec::new();
    let dotted = token.dotted().to_ascii_lowercase();
    let css_name = token.css_var();

    let mut seen_files: Vec<PathBuf> = Vec::new();
    for doc in open_docs {
        if let Some(path) = uri_path(&doc.uri) {
            seen_files.push(std::fs::canonicalize(&path).unwrap_or(path));
        }
        if css::is_css_capable(&doc.language_id) {
            for call in css::scan_document(&doc.text, &doc.language_id).var_calls {
                if call.name == css_name {
                    out.push(Location::new(doc.uri.clone(), doc.range_of(call.name_range)));
                }
            }
        } else if is_token_file_language(&doc.language_id) {
            for reference in token_references(&doc.text) {
                if reference.key.to_ascii_lowercase() == dotted {
                    out.push(Location::new(doc.uri.clone(), doc.range_of(reference.range)));
                }
            }
        }
    }

    // Loaded token files that aren't open: scan from disk.
    for path in loaded_paths {
        if seen_files.iter().any(|p| p == path) {
            continue;
        }
        let Ok(text) = std::fs::read_to_string(path) else {
            continue;
        };
        let Some(uri) = parse_uri(&file_uri(path)) else {
            continue;
        };
        let scratch = Document::new(uri.clone(), "json".into(), 0, text);
        for reference in token_references(&scratch.text) {
            if reference.key.to_ascii_lowercase() == dotted {
                out.push(Location::new(uri.clone(), scratch.range_of(reference.range)));
            }
        }
    }

    if include_declaration
        && !token.definition_uri.is_empty()
        && let Some(uri) = parse_uri(&token.definition_uri)
    {
        let span = token.def_span.unwrap_or_default();
        let range = tower_lsp_server::ls_types::Range::new(
            Position::new(span.start_line, span.start_char),
            Position::new(span.end_line, span.end_char),
        );
        out.push(Location::new(uri, range));
    }

    out
}

fn uri_path(uri: &Uri) -> Option<PathBuf> {
    let s = uri.as_str();
    let rest = s.strip_prefix("file://")?;
    let decoded = rest.replace("%20", " ");
    Some(PathBuf::from(decoded))
}
