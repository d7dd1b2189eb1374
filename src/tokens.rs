//! The token data model and the concurrent token index.
//!
//! The index is one of the server's three shared mutable structures. All
//! maps live behind a single `RwLock`; reloads build replacement maps
//! privately and swap them in under one write acquisition, so concurrent
//! readers see either the old set or the new set, never a half-rebuilt one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// DTCG `$type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TokenKind {
    Color,
    Dimension,
    Number,
    FontFamily,
    FontWeight,
    Duration,
    CubicBezier,
    StrokeStyle,
    Border,
    Shadow,
    Gradient,
    Typography,
    Transition,
    #[default]
    Unknown,
}

impl TokenKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "color" => Self::Color,
            "dimension" => Self::Dimension,
            "number" => Self::Number,
            "fontFamily" => Self::FontFamily,
            "fontWeight" => Self::FontWeight,
            "duration" => Self::Duration,
            "cubicBezier" => Self::CubicBezier,
            "strokeStyle" => Self::StrokeStyle,
            "border" => Self::Border,
            "shadow" => Self::Shadow,
            "gradient" => Self::Gradient,
            "typography" => Self::Typography,
            "transition" => Self::Transition,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Color => "color",
            Self::Dimension => "dimension",
            Self::Number => "number",
            Self::FontFamily => "fontFamily",
            Self::FontWeight => "fontWeight",
            Self::Duration => "duration",
            Self::CubicBezier => "cubicBezier",
            Self::StrokeStyle => "strokeStyle",
            Self::Border => "border",
            Self::Shadow => "shadow",
            Self::Gradient => "gradient",
            Self::Typography => "typography",
            Self::Transition => "transition",
            Self::Unknown => "unknown",
        }
    }

    /// Composite types are excluded from fallback synthesis: their values
    /// are objects, not single CSS literals.
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            Self::Border | Self::Shadow | Self::Gradient | Self::Transition | Self::Typography
        )
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A zero-based (line, UTF-16 column) span of a defining key in its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start_line: u32,
    pub start_char: u32,
    pub end_line: u32,
    pub end_char: u32,
}

/// One design token, flattened out of a DTCG tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Canonical hyphenated key: optional prefix, then the dotted path with
    /// `.` → `-`, ordinary segments lowercased, group-marker segments kept
    /// verbatim.
    pub key: String,
    /// Original dotted path segments.
    pub path: Vec<String>,
    /// String form of `$value`, post same-file alias resolution.
    pub value: String,
    pub kind: TokenKind,
    pub description: Option<String>,
    pub deprecated: bool,
    pub deprecation_message: Option<String>,
    /// CSS variable prefix this token was loaded with (may be empty).
    pub prefix: String,
    /// Group markers in effect when the file was loaded.
    pub group_markers: Vec<String>,
    /// Absolute path of the defining file; empty when fetched from a CDN.
    pub file_path: String,
    /// `file://` URI of the defining file, or the fetched URL; may be empty.
    pub definition_uri: String,
    /// Span of the defining key, when the source format preserves one.
    pub def_span: Option<Span>,
    /// An alias (`a.b.c`) that could not be resolved within its own file.
    /// Followed through the index at query time.
    pub unresolved_alias: Option<String>,
}

impl Token {
    pub fn dotted(&self) -> String {
        self.path.join(".")
    }

    pub fn css_var(&self) -> String {
        format!("--{}", self.key)
    }
}

/// Build the canonical hyphenated key for a token path.
pub fn canonical_key(prefix: &str, path: &[String], markers: &[String]) -> String {
    let prefix = prefix.trim_start_matches('-');
    let mut out = String::new();
    if !prefix.is_empty() {
        out.push_str(&prefix.to_ascii_lowercase());
    }
    for seg in path {
        if !out.is_empty() {
            out.push('-');
        }
        if markers.iter().any(|m| m == seg) {
            out.push_str(seg);
        } else {
            out.push_str(&seg.to_ascii_lowercase());
        }
    }
    out
}

#[derive(Default)]
struct IndexInner {
    /// Canonical key → token.
    by_key: HashMap<String, Arc<Token>>,
    /// Lowercased dotted path → canonical key.
    by_path: HashMap<String, String>,
    /// Unprefixed hyphenated form → canonical key (when a prefix is set).
    by_alias: HashMap<String, String>,
    /// Source file → canonical keys it contributed.
    by_file: HashMap<PathBuf, Vec<String>>,
}

impl IndexInner {
    fn insert(&mut self, token: Token) -> Option<Arc<Token>> {
        let key = token.key.clone();
        let dotted = token.dotted().to_ascii_lowercase();
        self.by_path.insert(dotted, key.clone());
        if !token.prefix.is_empty() {
            let unprefixed = canonical_key("", &token.path, &token.group_markers);
            self.by_alias.insert(unprefixed, key.clone());
        }
        if !token.file_path.is_empty() {
            self.by_file
                .entry(PathBuf::from(&token.file_path))
                .or_default()
                .push(key.clone());
        }
        self.by_key.insert(key, Arc::new(token))
    }

    fn remove_keys(&mut self, keys: &[String]) -> usize {
        let mut removed = 0;
        for key in keys {
            if let Some(token) = self.by_key.remove(key) {
                removed += 1;
                let dotted = token.dotted().to_ascii_lowercase();
                if self.by_path.get(&dotted) == Some(key) {
                    self.by_path.remove(&dotted);
                }
                if !token.prefix.is_empty() {
                    let unprefixed = canonical_key("", &token.path, &token.group_markers);
                    if self.by_alias.get(&unprefixed) == Some(key) {
                        self.by_alias.remove(&unprefixed);
                    }
                }
            }
        }
        removed
    }

    fn lookup(&self, query: &str) -> Option<&Arc<Token>> {
        let q = query.strip_prefix("--").unwrap_or(query);
        if q.contains('.') {
            let key = self.by_path.get(&q.to_ascii_lowercase())?;
            return self.by_key.get(key);
        }
        if let Some(t) = self.by_key.get(q) {
            return Some(t);
        }
        if let Some(key) = self.by_alias.get(q) {
            return self.by_key.get(key);
        }
        // Case-insensitive fallback for hand-typed queries.
        let lower = q.to_ascii_lowercase();
        if lower != q {
            if let Some(t) = self.by_key.get(&lower) {
                return Some(t);
            }
            if let Some(key) = self.by_alias.get(&lower) {
                return self.by_key.get(key);
            }
        }
        None
    }
}

/// Thread-safe map from canonical token key to [`Token`].
#[derive(Default)]
pub struct TokenIndex {
    inner: RwLock<IndexInner>,
}

impl TokenIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a token by canonical key, `--`-prefixed CSS variable name,
    /// unprefixed hyphenated form, or dotted path.
    pub fn get(&self, query: &str) -> Option<Arc<Token>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.lookup(query).cloned()
    }

    /// Upsert a token. Returns the record it replaced, if any, so the
    /// caller can log the last-writer-wins overwrite.
    pub fn add(&self, token: Token) -> Option<Arc<Token>> {
        debug_assert!(!token.key.is_empty());
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.insert(token)
    }

    /// Drop all tokens contributed by one source file. Returns how many
    /// were removed.
    pub fn remove_file(&self, path: &Path) -> usize {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(keys) = inner.by_file.remove(path) else {
            return 0;
        };
        inner.remove_keys(&keys)
    }

    /// Replace the tokens contributed by one file in a single write, so
    /// readers never observe the file half-reloaded.
    pub fn replace_file(&self, path: &Path, tokens: Vec<Token>) -> Vec<String> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let mut overwrites = Vec::new();
        if let Some(keys) = inner.by_file.remove(path) {
            inner.remove_keys(&keys);
        }
        for token in tokens {
            let key = token.key.clone();
            if inner.insert(token).is_some() {
                overwrites.push(key);
            }
        }
        overwrites
    }

    /// Atomically replace the entire index contents. The new maps are built
    /// before the write lock is taken.
    pub fn replace_all(&self, tokens: Vec<Token>) -> Vec<String> {
        let mut fresh = IndexInner::default();
        let mut overwrites = Vec::new();
        for token in tokens {
            let key = token.key.clone();
            if fresh.insert(token).is_some() {
                overwrites.push(key);
            }
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *inner = fresh;
        overwrites
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *inner = IndexInner::default();
    }

    pub fn count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_key.len()
    }

    /// Snapshot of all live tokens. Safe to iterate while writers mutate
    /// the index; the snapshot simply won't reflect later writes.
    pub fn snapshot(&self) -> Vec<Arc<Token>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_key.values().cloned().collect()
    }

    /// The token's effective value: follows one level of cross-file alias
    /// through the index, leaving cycles and unknowns as the literal text.
    pub fn resolve_value(&self, token: &Token) -> String {
        match &token.unresolved_alias {
            Some(target) => match self.get(target) {
                Some(t) if t.unresolved_alias.is_none() => t.value.clone(),
                _ => token.value.clone(),
            },
            None => token.value.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(key: &str, path: &[&str], value: &str, prefix: &str) -> Token {
        Token {
            key: key.into(),
            path: path.iter().map(|s| s.to_string()).collect(),
            value: value.into(),
            kind: TokenKind::Color,
            description: None,
            deprecated: false,
            deprecation_message: None,
            prefix: prefix.into(),
            group_markers: vec![],
            file_path: "/ws/tokens.json".into(),
            definition_uri: "file:///ws/tokens.json".into(),
            def_span: None,
            unresolved_alias: None,
        }
    }

    #[test]
    fn dotted_and_hyphenated_lookups_agree() {
        let index = TokenIndex::new();
        index.add(token("color-brand-primary", &["color", "brand", "primary"], "#f00", ""));
        let by_path = index.get("color.brand.primary").unwrap();
        let by_key = index.get("color-brand-primary").unwrap();
        assert_eq!(by_path.key, by_key.key);
        assert_eq!(index.get("--color-brand-primary").unwrap().key, by_key.key);
    }

    #[test]
    fn prefixed_token_resolves_with_and_without_prefix() {
        let index = TokenIndex::new();
        index.add(token("ds-color-primary", &["color", "primary"], "#00f", "ds"));
        assert!(index.get("--ds-color-primary").is_some());
        assert!(index.get("color-primary").is_some());
        assert!(index.get("color.primary").is_some());
    }

    #[test]
    fn upsert_reports_overwrite() {
        let index = TokenIndex::new();
        assert!(index.add(token("a-b", &["a", "b"], "1", "")).is_none());
        let replaced = index.add(token("a-b", &["a", "b"], "2", ""));
        assert_eq!(replaced.unwrap().value, "1");
        assert_eq!(index.count(), 1);
        assert_eq!(index.get("a-b").unwrap().value, "2");
    }

    #[test]
    fn remove_file_drops_only_that_files_tokens() {
        let index = TokenIndex::new();
        let mut other = token("x-y", &["x", "y"], "1", "");
        other.file_path = "/ws/other.json".into();
        index.add(token("a-b", &["a", "b"], "1", ""));
        index.add(other);
        assert_eq!(index.remove_file(Path::new("/ws/tokens.json")), 1);
        assert!(index.get("a-b").is_none());
        assert!(index.get("x-y").is_some());
    }

    #[test]
    fn replace_all_is_atomic_for_readers() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let index = Arc::new(TokenIndex::new());
        index.add(token("keep-me", &["keep", "me"], "1", ""));

        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let index = Arc::clone(&index);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    // "keep-me" exists in both the pre- and post-reload
                    // state, so it must never read back as absent.
                    assert!(index.get("keep-me").is_some());
                }
            })
        };

        for i in 0..200 {
            let mut fresh = vec![token("keep-me", &["keep", "me"], "1", "")];
            fresh.push(token(
                &format!("gen-{i}"),
                &["gen", &i.to_string()],
                "x",
                "",
            ));
            index.replace_all(fresh);
        }
        stop.store(true, Ordering::Relaxed);
        reader.join().unwrap();
    }

    #[test]
    fn canonical_key_lowercases_except_markers() {
        let markers = vec!["DEFAULT".to_string()];
        let path: Vec<String> = vec!["Color".into(), "Primary".into(), "DEFAULT".into()];
        assert_eq!(canonical_key("", &path, &markers), "color-primary-DEFAULT");
        assert_eq!(canonical_key("ds", &path[..2], &markers), "ds-color-primary");
    }

    #[test]
    fn resolve_value_follows_cross_file_alias() {
        let index = TokenIndex::new();
        index.add(token("color-primary", &["color", "primary"], "#0000ff", ""));
        let mut aliased = token("color-link", &["color", "link"], "{color.primary}", "");
        aliased.unresolved_alias = Some("color.primary".into());
        index.add(aliased);
        let t = index.get("color-link").unwrap();
        assert_eq!(index.resolve_value(&t), "#0000ff");
    }
}
