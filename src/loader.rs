//! DTCG token-file loader.
//!
//! Takes one source buffer (JSON/JSONC/YAML) plus its provenance and
//! per-file options, and flattens the token tree into [`Token`] records. A
//! node is a token iff it carries `$value`; everything else is a group.
//! `$`-prefixed meta keys never contribute path segments, `$type` inherits
//! down groups, and a leaf segment equal to a configured group marker emits
//! both the marker token and its enclosing group name.

use std::collections::{HashMap, HashSet};

use jsonc_parser::ast::Value as AstValue;
use jsonc_parser::common::Ranged;
use thiserror::Error;

use crate::documents::compute_line_starts;
use crate::tokens::{Span, Token, TokenKind, canonical_key};

/// Standard parse options: comments + trailing commas allowed.
pub fn parse_options() -> jsonc_parser::ParseOptions {
    jsonc_parser::ParseOptions {
        allow_comments: true,
        allow_trailing_commas: true,
        allow_loose_object_property_names: false,
        allow_single_quoted_strings: false,
        allow_hexadecimal_numbers: false,
        allow_missing_commas: false,
        allow_unary_plus_numbers: false,
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to parse '{origin}': {message}")]
    Parse { origin: String, message: String },
    #[error("'{origin}' contains no token data")]
    NoContent { origin: String },
}

/// Source format, decided by file extension (CDN URLs included).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Json,
    Yaml,
}

impl SourceFormat {
    pub fn from_path(path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".yaml") || lower.ends_with(".yml") {
            Self::Yaml
        } else {
            Self::Json
        }
    }
}

/// Provenance of one load.
#[derive(Debug, Clone)]
pub struct SourceOrigin {
    /// Absolute path on disk; empty for CDN fetches.
    pub file_path: String,
    /// `file://` URI, or the fetched URL for CDN sources.
    pub definition_uri: String,
    pub format: SourceFormat,
}

/// Per-file load options (config defaults merged with source overrides).
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    pub prefix: String,
    pub group_markers: Vec<String>,
}

/// Tokens plus non-fatal load warnings.
#[derive(Debug)]
pub struct LoadOutcome {
    pub tokens: Vec<Token>,
    pub warnings: Vec<String>,
}

struct RawToken {
    path: Vec<String>,
    value: String,
    kind: TokenKind,
    description: Option<String>,
    deprecated: bool,
    deprecation_message: Option<String>,
    span: Option<Span>,
}

/// Load one token source.
pub fn load_tokens(
    source: &str,
    origin: &SourceOrigin,
    opts: &LoadOptions,
) -> Result<LoadOutcome, LoadError> {
    let mut warnings = Vec::new();
    let raw = match origin.format {
        SourceFormat::Json => parse_json_tokens(source, origin, &mut warnings)?,
        SourceFormat::Yaml => parse_yaml_tokens(source, origin, &mut warnings)?,
    };

    let raw = expand_group_markers(raw, &opts.group_markers);
    let (raw, alias_warnings) = resolve_aliases(raw);
    warnings.extend(alias_warnings);

    let tokens = raw
        .into_iter()
        .map(|t| {
            let key = canonical_key(&opts.prefix, &t.path, &opts.group_markers);
            let (value, unresolved_alias) = match alias_target(&t.value) {
                Some(target) => (t.value.clone(), Some(target.to_string())),
                None => (t.value, None),
            };
            Token {
                key,
                path: t.path,
                value,
                kind: t.kind,
                description: t.description,
                deprecated: t.deprecated,
                deprecation_message: t.deprecation_message,
                prefix: opts.prefix.trim_start_matches('-').to_string(),
                group_markers: opts.group_markers.clone(),
                file_path: origin.file_path.clone(),
                definition_uri: origin.definition_uri.clone(),
                def_span: t.span,
                unresolved_alias,
            }
        })
        .collect();

    Ok(LoadOutcome { tokens, warnings })
}

/// The dotted target of a whole-string alias value `{a.b.c}`.
fn alias_target(value: &str) -> Option<&str> {
    let inner = value.strip_prefix('{')?.strip_suffix('}')?;
    let ok = !inner.is_empty()
        && inner
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | '@'));
    ok.then_some(inner)
}

// ---------------------------------------------------------------------------
// JSON / JSONC

fn parse_json_tokens(
    source: &str,
    origin: &SourceOrigin,
    warnings: &mut Vec<String>,
) -> Result<Vec<RawToken>, LoadError> {
    let parsed = jsonc_parser::parse_to_ast(source, &Default::default(), &parse_options())
        .map_err(|e| LoadError::Parse {
            origin: origin.definition_uri.clone(),
            message: e.to_string(),
        })?;
    let Some(AstValue::Object(root)) = parsed.value else {
        return Err(LoadError::NoContent {
            origin: origin.definition_uri.clone(),
        });
    };

    let line_starts = compute_line_starts(source);
    let mut out = Vec::new();
    let mut path = Vec::new();
    walk_json_object(
        source,
        &line_starts,
        &root,
        &mut path,
        None,
        None,
        &mut out,
        warnings,
        origin,
    );
    Ok(out)
}

fn byte_span(source: &str, line_starts: &[usize], range: std::ops::Range<usize>) -> Span {
    let pos = |offset: usize| -> (u32, u32) {
        let line = match line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        let col = source[line_starts[line]..offset].encode_utf16().count() as u32;
        (line as u32, col)
    };
    let (start_line, start_char) = pos(range.start);
    let (end_line, end_char) = pos(range.end);
    Span {
        start_line,
        start_char,
        end_line,
        end_char,
    }
}

#[allow(clippy::too_many_arguments)]
fn walk_json_object(
    source: &str,
    line_starts: &[usize],
    obj: &jsonc_parser::ast::Object,
    path: &mut Vec<String>,
    key_span: Option<Span>,
    inherited_type: Option<TokenKind>,
    out: &mut Vec<RawToken>,
    warnings: &mut Vec<String>,
    origin: &SourceOrigin,
) {
    let prop = |name: &str| obj.properties.iter().find(|p| p.name.as_str() == name);

    let own_type = prop("$type")
        .and_then(|p| match &p.value {
            AstValue::StringLit(s) => Some(TokenKind::parse(s.value.as_ref())),
            _ => None,
        })
        .or(inherited_type);

    if let Some(value_prop) = prop("$value") {
        let value = stringify_ast(&value_prop.value);
        let (deprecated, deprecation_message) = match prop("$deprecated").map(|p| &p.value) {
            Some(AstValue::BooleanLit(b)) => (b.value, None),
            Some(AstValue::StringLit(s)) => (true, Some(s.value.to_string())),
            _ => (false, None),
        };
        out.push(RawToken {
            path: path.clone(),
            value,
            kind: own_type.unwrap_or_default(),
            description: prop("$description").and_then(|p| match &p.value {
                AstValue::StringLit(s) => Some(s.value.to_string()),
                _ => None,
            }),
            deprecated,
            deprecation_message,
            span: key_span,
        });
        return;
    }

    let mut has_children = false;
    for p in &obj.properties {
        let name = p.name.as_str();
        if name.starts_with('$') {
            continue;
        }
        if let AstValue::Object(child) = &p.value {
            has_children = true;
            let span = byte_span(source, line_starts, {
                let r = p.name.range();
                r.start..r.end
            });
            path.push(name.to_string());
            walk_json_object(
                source,
                line_starts,
                child,
                path,
                Some(span),
                own_type,
                out,
                warnings,
                origin,
            );
            path.pop();
        }
    }

    if !has_children && own_type.is_some() && !path.is_empty() {
        warnings.push(format!(
            "{}: '{}' has $type but no $value; skipping",
            origin.definition_uri,
            path.join(".")
        ));
    }
}

fn stringify_ast(value: &AstValue) -> String {
    match value {
        AstValue::StringLit(s) => s.value.to_string(),
        AstValue::NumberLit(n) => n.value.to_string(),
        AstValue::BooleanLit(b) => b.value.to_string(),
        other => {
            let json: serde_json::Value = other.clone().into();
            serde_json::to_string(&json).unwrap_or_default()
        }
    }
}

// ---------------------------------------------------------------------------
// YAML

fn parse_yaml_tokens(
    source: &str,
    origin: &SourceOrigin,
    warnings: &mut Vec<String>,
) -> Result<Vec<RawToken>, LoadError> {
    let root: serde_yaml::Value =
        serde_yaml::from_str(source).map_err(|e| LoadError::Parse {
            origin: origin.definition_uri.clone(),
            message: e.to_string(),
        })?;
    let serde_yaml::Value::Mapping(mapping) = root else {
        return Err(LoadError::NoContent {
            origin: origin.definition_uri.clone(),
        });
    };

    let spans = yaml_key_spans(source);
    let mut out = Vec::new();
    let mut path = Vec::new();
    walk_yaml_mapping(&mapping, &mut path, None, &spans, &mut out, warnings, origin);
    Ok(out)
}

fn walk_yaml_mapping(
    mapping: &serde_yaml::Mapping,
    path: &mut Vec<String>,
    inherited_type: Option<TokenKind>,
    spans: &HashMap<String, Span>,
    out: &mut Vec<RawToken>,
    warnings: &mut Vec<String>,
    origin: &SourceOrigin,
) {
    let get = |name: &str| mapping.get(serde_yaml::Value::String(name.to_string()));

    let own_type = get("$type")
        .and_then(|v| v.as_str())
        .map(TokenKind::parse)
        .or(inherited_type);

    if let Some(value) = get("$value") {
        let (deprecated, deprecation_message) = match get("$deprecated") {
            Some(serde_yaml::Value::Bool(b)) => (*b, None),
            Some(serde_yaml::Value::String(s)) => (true, Some(s.clone())),
            _ => (false, None),
        };
        out.push(RawToken {
            path: path.clone(),
            value: stringify_yaml(value),
            kind: own_type.unwrap_or_default(),
            description: get("$description").and_then(|v| v.as_str()).map(String::from),
            deprecated,
            deprecation_message,
            span: spans.get(&path.join(".")).copied(),
        });
        return;
    }

    let mut has_children = false;
    for (key, value) in mapping {
        let Some(name) = key.as_str() else { continue };
        if name.starts_with('$') {
            continue;
        }
        if let serde_yaml::Value::Mapping(child) = value {
            has_children = true;
            path.push(name.to_string());
            walk_yaml_mapping(child, path, own_type, spans, out, warnings, origin);
            path.pop();
        }
    }

    if !has_children && own_type.is_some() && !path.is_empty() {
        warnings.push(format!(
            "{}: '{}' has $type but no $value; skipping",
            origin.definition_uri,
            path.join(".")
        ));
    }
}

fn stringify_yaml(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        other => serde_json::to_value(other)
            .ok()
            .and_then(|v| serde_json::to_string(&v).ok())
            .unwrap_or_default(),
    }
}

/// Recover key spans from block-style YAML by indentation. Flow style and
/// sequences are ignored; tokens defined there simply lack a precise span.
fn yaml_key_spans(source: &str) -> HashMap<String, Span> {
    let mut spans = HashMap::new();
    let mut stack: Vec<(usize, String)> = Vec::new();

    for (line_idx, line) in source.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('-') {
            continue;
        }
        let indent = line.len() - trimmed.len();
        let Some(colon) = trimmed.find(':') else {
            continue;
        };
        let key = trimmed[..colon].trim().trim_matches(|c| c == '"' || c == '\'');
        if key.is_empty() {
            continue;
        }

        while stack.last().is_some_and(|(i, _)| *i >= indent) {
            stack.pop();
        }
        let dotted = if stack.is_empty() {
            key.to_string()
        } else {
            let mut parts: Vec<&str> = stack.iter().map(|(_, k)| k.as_str()).collect();
            parts.push(key);
            parts.join(".")
        };

        let start_char = line[..indent].encode_utf16().count() as u32;
        let end_char = line[..indent + colon].encode_utf16().count() as u32;
        spans.insert(
            dotted,
            Span {
                start_line: line_idx as u32,
                start_char,
                end_line: line_idx as u32,
                end_char,
            },
        );
        stack.push((indent, key.to_string()));
    }
    spans
}

// ---------------------------------------------------------------------------
// Group markers & aliases

/// A leaf whose last segment is a group marker surfaces the enclosing group
/// name too: `color.primary.DEFAULT` yields both `color-primary-DEFAULT`
/// and `color-primary`.
fn expand_group_markers(raw: Vec<RawToken>, markers: &[String]) -> Vec<RawToken> {
    let mut out = Vec::with_capacity(raw.len());
    for token in raw {
        let is_marker_leaf = token
            .path
            .last()
            .is_some_and(|last| markers.iter().any(|m| m == last));
        if is_marker_leaf && token.path.len() > 1 {
            out.push(RawToken {
                path: token.path[..token.path.len() - 1].to_vec(),
                value: token.value.clone(),
                kind: token.kind,
                description: token.description.clone(),
                deprecated: token.deprecated,
                deprecation_message: token.deprecation_message.clone(),
                span: token.span,
            });
        }
        out.push(token);
    }
    out
}

/// Resolve whole-string `{a.b.c}` aliases within one file. Unknown targets
/// stay literal (followed through the index at query time); cycles warn and
/// stay literal.
fn resolve_aliases(raw: Vec<RawToken>) -> (Vec<RawToken>, Vec<String>) {
    let by_path: HashMap<String, String> = raw
        .iter()
        .map(|t| (t.path.join(".").to_ascii_lowercase(), t.value.clone()))
        .collect();
    let mut warnings = Vec::new();

    let resolved = raw
        .into_iter()
        .map(|mut token| {
            let mut seen = HashSet::new();
            let mut current = token.value.clone();
            while let Some(target) = alias_target(&current) {
                let target_key = target.to_ascii_lowercase();
                if !seen.insert(target_key.clone()) {
                    warnings.push(format!(
                        "alias cycle at '{}' via '{{{target}}}'; leaving unresolved",
                        token.path.join(".")
                    ));
                    current = token.value.clone();
                    break;
                }
                match by_path.get(&target_key) {
                    Some(next) => current = next.clone(),
                    None => break, // external reference; resolved at query time
                }
            }
            token.value = current;
            token
        })
        .collect();
    (resolved, warnings)
}
