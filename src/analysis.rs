//! CSS-var analyzer: hover, completion, definition, colors, and code
//! actions over `var(--…)` calls and `--name:` declarations.
//!
//! Every query re-scans the document snapshot it was handed; scans are
//! bounded by document size and the analyzer holds no state of its own, so
//! handlers can run it concurrently against the shared index.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;
use tower_lsp_server::ls_types::{
    CodeAction, CodeActionKind, CodeActionOrCommand, Color, ColorInformation, ColorPresentation,
    CompletionItem, CompletionItemKind, CompletionResponse, CompletionTextEdit, Documentation,
    GotoDefinitionResponse, Hover, HoverContents, InsertTextFormat, Location, LocationLink,
    MarkupContent, MarkupKind, Position, TextEdit, WorkspaceEdit,
};

use crate::capabilities::{ClientCaps, Markup};
use crate::color::{self, Rgba};
use crate::css::{self, CssScan, VarCall};
use crate::diagnostics;
use crate::documents::Document;
use crate::hover::{render_token, render_unknown};
use crate::tokens::{Span, Token, TokenIndex, TokenKind};
use crate::workspace::parse_uri;

fn markup_kind(markup: Markup) -> MarkupKind {
    match markup {
        Markup::Markdown => MarkupKind::Markdown,
        Markup::PlainText => MarkupKind::PlainText,
    }
}

/// The innermost hoverable item at a byte offset: a `var()` call or a
/// custom-property declaration, smallest span first.
enum HoverTarget<'a> {
    Call(&'a VarCall),
    Decl(&'a css::VarDecl),
}

impl HoverTarget<'_> {
    fn name(&self) -> &str {
        match self {
            Self::Call(c) => &c.name,
            Self::Decl(d) => &d.name,
        }
    }

    fn range(&self) -> Range<usize> {
        match self {
            Self::Call(c) => c.range.clone(),
            Self::Decl(d) => d.range.clone(),
        }
    }
}

/// Tie-break metric for nested candidates: line span dominates, then
/// character span.
fn span_metric(doc: &Document, range: &Range<usize>) -> u64 {
    let start = doc.position_at(range.start);
    let end = doc.position_at(range.end);
    let line_diff = (end.line - start.line) as u64;
    let char_diff = (end.character as i64 - start.character as i64).unsigned_abs();
    line_diff * 10_000 + char_diff
}

fn target_at<'a>(doc: &Document, scan: &'a CssScan, offset: usize) -> Option<HoverTarget<'a>> {
    let mut best: Option<(u64, HoverTarget<'a>)> = None;
    let mut consider = |metric: u64, target: HoverTarget<'a>| {
        if best.as_ref().is_none_or(|(m, _)| metric < *m) {
            best = Some((metric, target));
        }
    };
    for call in &scan.var_calls {
        if call.range.start <= offset && offset < call.range.end {
            consider(span_metric(doc, &call.range), HoverTarget::Call(call));
        }
    }
    for decl in &scan.decls {
        if decl.range.start <= offset && offset < decl.range.end {
            consider(span_metric(doc, &decl.range), HoverTarget::Decl(decl));
        }
    }
    best.map(|(_, t)| t)
}

/// Hover over a `var()` call or custom-property declaration.
pub fn hover(
    doc: &Document,
    index: &TokenIndex,
    caps: &ClientCaps,
    position: Position,
) -> Option<Hover> {
    let offset = doc.offset_at(position);
    let scan = css::scan_document(&doc.text, &doc.language_id);
    let target = target_at(doc, &scan, offset)?;

    let value = match index.get(target.name()) {
        Some(token) => {
            let resolved = index.resolve_value(&token);
            render_token(&token, &resolved, caps.markup)
        }
        None => render_unknown(target.name(), caps.markup),
    };

    Some(Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: markup_kind(caps.markup),
            value,
        }),
        range: Some(doc.range_of(target.range())),
    })
}

fn normalize_for_match(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

/// The `--word` being typed around `offset`.
fn word_at(text: &str, offset: usize) -> Range<usize> {
    let bytes = text.as_bytes();
    let mut start = offset.min(bytes.len());
    while start > 0 && is_word_byte(bytes[start - 1]) {
        start -= 1;
    }
    let mut end = offset.min(bytes.len());
    while end < bytes.len() && is_word_byte(bytes[end]) {
        end += 1;
    }
    start..end
}

/// Whether `at` sits inside a CSS property value (after `:` in the current
/// declaration).
fn in_value_context(text: &str, at: usize) -> bool {
    for b in text[..at.min(text.len())].bytes().rev() {
        match b {
            b':' => return true,
            b';' | b'{' | b'}' => return false,
            _ => {}
        }
    }
    false
}

/// Whether `at` is inside the parens of an (unclosed) `var(` call.
fn inside_var_paren(text: &str, at: usize) -> bool {
    let head = &text[..at.min(text.len())];
    match head.rfind("var(") {
        Some(open) => !head[open..].contains(')'),
        None => false,
    }
}

/// Completion items for tokens matching the partial word at `position`.
pub fn completions(
    doc: &Document,
    index: &TokenIndex,
    caps: &ClientCaps,
    position: Position,
) -> Option<CompletionResponse> {
    let offset = doc.offset_at(position);
    let word = word_at(&doc.text, offset);
    if !in_value_context(&doc.text, word.start) {
        return None;
    }
    let partial = &doc.text[word.clone()];
    let needle = normalize_for_match(partial);
    let plain_insert = inside_var_paren(&doc.text, word.start) || partial.starts_with("--");
    let edit_range = doc.range_of(word);

    let mut tokens = index.snapshot();
    tokens.sort_by(|a, b| a.key.cmp(&b.key));

    let items: Vec<CompletionItem> = tokens
        .iter()
        .filter(|t| needle.is_empty() || normalize_for_match(&t.key).contains(&needle))
        .map(|token| {
            let label = token.css_var();
            let (new_text, format) = if plain_insert {
                (label.clone(), InsertTextFormat::PLAIN_TEXT)
            } else if caps.snippets && !token.kind.is_composite() {
                let fallback = diagnostics::fallback_literal(token, &index.resolve_value(token));
                (
                    format!("var({label}${{1:, {fallback}}})"),
                    InsertTextFormat::SNIPPET,
                )
            } else {
                (format!("var({label})"), InsertTextFormat::PLAIN_TEXT)
            };
            CompletionItem {
                label: label.clone(),
                kind: Some(match token.kind {
                    TokenKind::Color => CompletionItemKind::COLOR,
                    _ => CompletionItemKind::VARIABLE,
                }),
                filter_text: Some(label.clone()),
                sort_text: Some(token.key.clone()),
                insert_text_format: Some(format),
                text_edit: Some(CompletionTextEdit::Edit(TextEdit {
                    range: edit_range,
                    new_text,
                })),
                data: Some(json!(token.key)),
                ..Default::default()
            }
        })
        .collect();

    Some(CompletionResponse::Array(items))
}

/// Populate detail and documentation for a completion item. Idempotent and
/// a no-op for unknown tokens.
pub fn resolve_completion(
    mut item: CompletionItem,
    index: &TokenIndex,
    caps: &ClientCaps,
) -> CompletionItem {
    let Some(key) = item.data.as_ref().and_then(|d| d.as_str()) else {
        return item;
    };
    let Some(token) = index.get(key) else {
        return item;
    };
    let resolved = index.resolve_value(&token);
    item.detail = Some(format!("{} ({})", resolved, token.kind));
    item.documentation = Some(Documentation::MarkupContent(MarkupContent {
        kind: markup_kind(caps.markup),
        value: render_token(&token, &resolved, caps.markup),
    }));
    item
}

fn span_range(span: Option<Span>) -> tower_lsp_server::ls_types::Range {
    let span = span.unwrap_or_default();
    tower_lsp_server::ls_types::Range::new(
        Position::new(span.start_line, span.start_char),
        Position::new(span.end_line, span.end_char),
    )
}

/// Build a definition response for a token, honoring link support.
pub fn token_definition(
    token: &Token,
    caps: &ClientCaps,
    origin: Option<tower_lsp_server::ls_types::Range>,
) -> Option<GotoDefinitionResponse> {
    if token.definition_uri.is_empty() {
        return None;
    }
    let uri = parse_uri(&token.definition_uri)?;
    let range = span_range(token.def_span);
    if caps.definition_links {
        Some(GotoDefinitionResponse::Link(vec![LocationLink {
            origin_selection_range: origin,
            target_uri: uri,
            target_range: range,
            target_selection_range: range,
        }]))
    } else {
        Some(GotoDefinitionResponse::Scalar(Location::new(uri, range)))
    }
}

/// Go-to-definition from inside a `var()` identifier.
pub fn definition(
    doc: &Document,
    index: &TokenIndex,
    caps: &ClientCaps,
    position: Position,
) -> Option<GotoDefinitionResponse> {
    let offset = doc.offset_at(position);
    let scan = css::scan_document(&doc.text, &doc.language_id);
    let call = scan
        .var_calls
        .iter()
        .find(|c| c.name_range.start <= offset && offset < c.name_range.end)?;
    let token = index.get(&call.name)?;
    token_definition(&token, caps, Some(doc.range_of(call.name_range.clone())))
}

fn lsp_color(rgba: &Rgba) -> Color {
    Color {
        red: rgba.r as f32,
        green: rgba.g as f32,
        blue: rgba.b as f32,
        alpha: rgba.a as f32,
    }
}

/// `ColorInformation` for every `var()` call whose token is a color.
pub fn document_colors(doc: &Document, index: &TokenIndex) -> Vec<ColorInformation> {
    let scan = css::scan_document(&doc.text, &doc.language_id);
    scan.var_calls
        .iter()
        .filter_map(|call| {
            let token = index.get(&call.name)?;
            if token.kind != TokenKind::Color {
                return None;
            }
            let rgba = color::parse(&index.resolve_value(&token))?;
            Some(ColorInformation {
                range: doc.range_of(call.range.clone()),
                color: lsp_color(&rgba),
            })
        })
        .collect()
}

/// Token names whose color equals the target within 1/255 per channel.
pub fn color_presentations(index: &TokenIndex, target: &Color) -> Vec<ColorPresentation> {
    let wanted = Rgba::new(
        target.red as f64,
        target.green as f64,
        target.blue as f64,
        target.alpha as f64,
    );
    let mut tokens = index.snapshot();
    tokens.sort_by(|a, b| a.key.cmp(&b.key));
    tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Color)
        .filter_map(|t| {
            let rgba = color::parse(&index.resolve_value(t))?;
            rgba.approx_eq(&wanted).then(|| ColorPresentation {
                label: t.css_var(),
                text_edit: None,
                additional_text_edits: None,
            })
        })
        .collect()
}

/// Mine a replacement path out of a deprecation message:
/// `Use <path> instead` or `Replaced by <path>`.
pub fn mine_replacement(message: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:\buse\s+([A-Za-z0-9_.@{}\-]+)\s+instead|\breplaced\s+by:?\s+([A-Za-z0-9_.@{}\-]+))",
        )
        .unwrap()
    });
    let caps = re.captures(message)?;
    let raw = caps.get(1).or_else(|| caps.get(2))?.as_str();
    let cleaned = raw
        .trim_matches(|c| matches!(c, '{' | '}' | '\'' | '"' | '.' | ','))
        .to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

fn quickfix(
    title: String,
    uri: &tower_lsp_server::ls_types::Uri,
    edit: TextEdit,
    diagnostics: Vec<tower_lsp_server::ls_types::Diagnostic>,
    preferred: bool,
) -> CodeActionOrCommand {
    CodeActionOrCommand::CodeAction(CodeAction {
        title,
        kind: Some(CodeActionKind::QUICKFIX),
        diagnostics: (!diagnostics.is_empty()).then_some(diagnostics),
        is_preferred: preferred.then_some(true),
        edit: Some(WorkspaceEdit {
            changes: Some([(uri.clone(), vec![edit])].into_iter().collect()),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn ranges_overlap(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start <= b.end && b.start <= a.end
}

/// Quick-fixes for `var()` calls overlapping the requested range.
pub fn code_actions(
    doc: &Document,
    index: &TokenIndex,
    caps: &ClientCaps,
    range: tower_lsp_server::ls_types::Range,
) -> Vec<CodeActionOrCommand> {
    if !caps.code_action_literals {
        return Vec::new();
    }
    let requested = doc.offset_at(range.start)..doc.offset_at(range.end);
    let scan = css::scan_document(&doc.text, &doc.language_id);
    let diags = diagnostics::compute(doc, index, caps);
    let mut out = Vec::new();

    for call in &scan.var_calls {
        if !ranges_overlap(&call.range, &requested) {
            continue;
        }
        let Some(token) = index.get(&call.name) else {
            continue;
        };
        let expected = index.resolve_value(&token);
        let literal = diagnostics::fallback_literal(&token, &expected);
        let call_lsp_range = doc.range_of(call.range.clone());
        let diags_for = |code: &str| -> Vec<_> {
            diags
                .iter()
                .filter(|d| {
                    d.range == call_lsp_range
                        && d.code
                            == Some(tower_lsp_server::ls_types::NumberOrString::String(
                                code.into(),
                            ))
                })
                .cloned()
                .collect()
        };

        match &call.fallback {
            Some(fallback) => {
                if !fallback.text.trim_start().starts_with("var(")
                    && !diagnostics::values_match(&expected, &fallback.text)
                {
                    out.push(quickfix(
                        format!("Fix fallback value to '{expected}'"),
                        &doc.uri,
                        TextEdit {
                            range: doc.range_of(fallback.range.clone()),
                            new_text: literal.clone(),
                        },
                        diags_for(diagnostics::CODE_INCORRECT_FALLBACK),
                        true,
                    ));
                }
            }
            None => {
                if !token.kind.is_composite() {
                    let insert_at = doc.position_at(call.range.end - 1);
                    out.push(quickfix(
                        format!("Add fallback value '{literal}'"),
                        &doc.uri,
                        TextEdit {
                            range: tower_lsp_server::ls_types::Range::new(insert_at, insert_at),
                            new_text: format!(", {literal}"),
                        },
                        Vec::new(),
                        false,
                    ));
                }
            }
        }

        if token.deprecated {
            let deprecated_diags = diags_for(diagnostics::CODE_DEPRECATED);
            let replacement = token
                .deprecation_message
                .as_deref()
                .and_then(mine_replacement)
                .and_then(|path| index.get(&path));
            if let Some(replacement) = replacement {
                out.push(quickfix(
                    format!("Replace with '{}'", replacement.css_var()),
                    &doc.uri,
                    TextEdit {
                        // Only the identifier changes; any fallback stays.
                        range: doc.range_of(call.name_range.clone()),
                        new_text: replacement.css_var(),
                    },
                    deprecated_diags.clone(),
                    true,
                ));
            }
            out.push(quickfix(
                format!("Replace with literal value '{expected}'"),
                &doc.uri,
                TextEdit {
                    range: call_lsp_range,
                    new_text: literal.clone(),
                },
                deprecated_diags,
                false,
            ));
        }
    }

    out
}
