//! Diagnostics over CSS-capable documents.
//!
//! Two kinds: an Error when a `var()` fallback disagrees with the token's
//! value, and an Information (tagged Deprecated) when the token is
//! deprecated. Unknown tokens intentionally produce no diagnostic; they
//! surface through hover only.

use tower_lsp_server::ls_types::{
    Diagnostic, DiagnosticRelatedInformation, DiagnosticSeverity, DiagnosticTag, Location,
    NumberOrString, Position, Range,
};

use crate::capabilities::ClientCaps;
use crate::color;
use crate::css;
use crate::documents::Document;
use crate::tokens::{Token, TokenIndex, TokenKind};
use crate::workspace::parse_uri;

pub const SOURCE: &str = "design-tokens";
pub const CODE_INCORRECT_FALLBACK: &str = "incorrect-fallback";
pub const CODE_DEPRECATED: &str = "deprecated-token";

/// Semantic comparison of a token value and a fallback literal: colors by
/// channel, dimensions numerically, everything else by collapsed text.
pub fn values_match(expected: &str, actual: &str) -> bool {
    if let Some(result) = color::literals_match(expected, actual) {
        return result;
    }
    if let (Some((an, au)), Some((bn, bu))) = (parse_dimension(expected), parse_dimension(actual)) {
        return an == bn && au.eq_ignore_ascii_case(&bu);
    }
    collapse_ws(expected).eq_ignore_ascii_case(&collapse_ws(actual))
}

/// Split `12.5rem` into `(12.5, "rem")`. Plain numbers get an empty unit.
fn parse_dimension(s: &str) -> Option<(f64, String)> {
    let s = s.trim();
    let split = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.' && *c != '-' && *c != '+')
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let value: f64 = num.parse().ok()?;
    let unit = unit.trim();
    if !unit.is_empty() && !unit.chars().all(|c| c.is_ascii_alphabetic() || c == '%') {
        return None;
    }
    Some((value, unit.to_string()))
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn related_definition(token: &Token, caps: &ClientCaps) -> Option<Vec<DiagnosticRelatedInformation>> {
    if !caps.related_info || token.definition_uri.is_empty() {
        return None;
    }
    let uri = parse_uri(&token.definition_uri)?;
    let span = token.def_span.unwrap_or_default();
    Some(vec![DiagnosticRelatedInformation {
        location: Location::new(
            uri,
            Range::new(
                Position::new(span.start_line, span.start_char),
                Position::new(span.end_line, span.end_char),
            ),
        ),
        message: format!("'{}' is defined here", token.css_var()),
    }])
}

/// Compute every diagnostic for one CSS-capable document.
pub fn compute(doc: &Document, index: &TokenIndex, caps: &ClientCaps) -> Vec<Diagnostic> {
    let scan = css::scan_document(&doc.text, &doc.language_id);
    let mut out = Vec::new();

    for call in &scan.var_calls {
        let Some(token) = index.get(&call.name) else {
            continue; // unknown tokens are hover-only
        };
        let expected = index.resolve_value(&token);

        if let Some(fallback) = &call.fallback
            && !fallback.text.trim_start().starts_with("var(")
            && !values_match(&expected, &fallback.text)
        {
            out.push(Diagnostic {
                range: doc.range_of(call.range.clone()),
                severity: Some(DiagnosticSeverity::ERROR),
                code: Some(NumberOrString::String(CODE_INCORRECT_FALLBACK.into())),
                source: Some(SOURCE.into()),
                message: format!(
                    "var() fallback does not match the token value (expected '{expected}')"
                ),
                related_information: related_definition(&token, caps),
                ..Default::default()
            });
        }

        if token.deprecated {
            let message = match &token.deprecation_message {
                Some(msg) => format!("{} is deprecated: {msg}", token.css_var()),
                None => format!("{} is deprecated", token.css_var()),
            };
            out.push(Diagnostic {
                range: doc.range_of(call.range.clone()),
                severity: Some(DiagnosticSeverity::INFORMATION),
                code: Some(NumberOrString::String(CODE_DEPRECATED.into())),
                source: Some(SOURCE.into()),
                message,
                tags: Some(vec![DiagnosticTag::DEPRECATED]),
                related_information: related_definition(&token, caps),
                ..Default::default()
            });
        }
    }

    out
}

/// A fallback literal for a token value, quoting font families that
/// contain whitespace.
pub fn fallback_literal(token: &Token, value: &str) -> String {
    if token.kind == TokenKind::FontFamily
        && value.contains(char::is_whitespace)
        && !value.starts_with('"')
        && !value.starts_with('\'')
    {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use tower_lsp_server::ls_types::Uri;

    fn doc(text: &str) -> Document {
        Document::new(
            Uri::from_str("file:///a.css").unwrap(),
            "css".into(),
            1,
            text.into(),
        )
    }

    fn index_with_blue() -> TokenIndex {
        let index = TokenIndex::new();
        index.add(Token {
            key: "color-primary".into(),
            path: vec!["color".into(), "primary".into()],
            value: "#0000ff".into(),
            kind: TokenKind::Color,
            description: None,
            deprecated: false,
            deprecation_message: None,
            prefix: String::new(),
            group_markers: vec![],
            file_path: "/ws/tokens.json".into(),
            definition_uri: "file:///ws/tokens.json".into(),
            def_span: None,
            unresolved_alias: None,
        });
        index
    }

    #[test]
    fn matching_fallback_produces_no_diagnostic() {
        let index = index_with_blue();
        let d = doc(".b { color: var(--color-primary, #0000ff); }");
        assert!(compute(&d, &index, &ClientCaps::default()).is_empty());
    }

    #[test]
    fn semantically_equal_fallback_is_accepted() {
        let index = index_with_blue();
        for fallback in ["#0000FF", "rgb(0, 0, 255)", "blue"] {
            let d = doc(&format!(".b {{ color: var(--color-primary, {fallback}); }}"));
            assert!(
                compute(&d, &index, &ClientCaps::default()).is_empty(),
                "expected no diagnostic for fallback {fallback}"
            );
        }
    }

    #[test]
    fn mismatched_fallback_produces_exactly_one_error() {
        let index = index_with_blue();
        let d = doc(".b { color: var(--color-primary, #ff0000); }");
        let diags = compute(&d, &index, &ClientCaps::default());
        assert_eq!(diags.len(), 1);
        let diag = &diags[0];
        assert_eq!(diag.severity, Some(DiagnosticSeverity::ERROR));
        assert!(diag.message.contains("fallback does not match"));
        assert!(diag.message.contains("#0000ff"));
    }

    #[test]
    fn unknown_token_produces_no_diagnostic() {
        let index = index_with_blue();
        let d = doc(".b { color: var(--nope, #123456); }");
        assert!(compute(&d, &index, &ClientCaps::default()).is_empty());
    }

    #[test]
    fn deprecated_token_is_information_with_tag() {
        let index = index_with_blue();
        index.add(Token {
            key: "color-old".into(),
            path: vec!["color".into(), "old".into()],
            value: "#ff0000".into(),
            kind: TokenKind::Color,
            description: None,
            deprecated: true,
            deprecation_message: Some("Use color.primary instead".into()),
            prefix: String::new(),
            group_markers: vec![],
            file_path: "/ws/tokens.json".into(),
            definition_uri: "file:///ws/tokens.json".into(),
            def_span: None,
            unresolved_alias: None,
        });
        let d = doc(".b { color: var(--color-old, #ff0000); }");
        let diags = compute(&d, &index, &ClientCaps::default());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Some(DiagnosticSeverity::INFORMATION));
        assert_eq!(diags[0].tags, Some(vec![DiagnosticTag::DEPRECATED]));
        assert!(diags[0].message.contains("Use color.primary instead"));
    }

    #[test]
    fn related_info_attaches_when_supported() {
        let index = index_with_blue();
        let d = doc(".b { color: var(--color-primary, #ff0000); }");
        let caps = ClientCaps {
            related_info: true,
            ..Default::default()
        };
        let diags = compute(&d, &index, &caps);
        assert!(diags[0].related_information.is_some());
        let diags = compute(&d, &index, &ClientCaps::default());
        assert!(diags[0].related_information.is_none());
    }

    #[test]
    fn dimension_comparison_is_numeric() {
        assert!(values_match("1rem", "1.0rem"));
        assert!(!values_match("1rem", "2rem"));
        assert!(!values_match("1rem", "1em"));
        assert!(values_match("16", "16"));
    }

    #[test]
    fn text_comparison_collapses_whitespace() {
        assert!(values_match("ease  in", "ease in"));
        assert!(values_match("Inter", "inter"));
        assert!(!values_match("Inter", "Roboto"));
    }

    #[test]
    fn nested_var_fallback_is_not_flagged() {
        let index = index_with_blue();
        let d = doc(".b { color: var(--color-primary, var(--other)); }");
        assert!(compute(&d, &index, &ClientCaps::default()).is_empty());
    }

    #[test]
    fn font_family_fallback_is_quoted_when_spaced() {
        let token = Token {
            key: "font-body".into(),
            path: vec!["font".into(), "body".into()],
            value: "Inter Display".into(),
            kind: TokenKind::FontFamily,
            description: None,
            deprecated: false,
            deprecation_message: None,
            prefix: String::new(),
            group_markers: vec![],
            file_path: String::new(),
            definition_uri: String::new(),
            def_span: None,
            unresolved_alias: None,
        };
        assert_eq!(fallback_literal(&token, "Inter Display"), "\"Inter Display\"");
        assert_eq!(fallback_literal(&token, "Inter"), "Inter");
    }
}
