//! Token-source discovery and the file-watch glue.
//!
//! Owns the loaded-files registry: which absolute paths are currently
//! contributing tokens, and with which per-file options, so watch events
//! can be answered without re-deriving configuration. Loads never hold a
//! lock across I/O: each source is read and parsed into a finished token
//! list first, and only the final index swap takes the write lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use globset::GlobMatcher;
use tower_lsp_server::ls_types::Uri;

use crate::config::{ConfigState, ServerConfig, TokenFileEntry};
use crate::loader::{self, LoadOptions, SourceFormat, SourceOrigin};
use crate::paths::{self, SpecError};
use crate::tokens::{Token, TokenIndex};

/// Outcome of a discovery pass: watcher patterns to register plus joined
/// warnings and per-source errors. Load errors never abort the batch.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Forward-slash glob patterns / paths for watcher registration.
    pub watch_patterns: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub loaded_files: usize,
}

/// One configured glob kept compiled for `Created` event matching.
struct WatchedPattern {
    matcher: GlobMatcher,
    options: LoadOptions,
}

/// Build a `file://` URI string for an absolute path.
pub fn file_uri(path: &Path) -> String {
    let forward = path.to_string_lossy().replace('\\', "/");
    let escaped = forward.replace(' ', "%20");
    if escaped.starts_with('/') {
        format!("file://{escaped}")
    } else {
        format!("file:///{escaped}")
    }
}

/// Parse a `file://` URI string into a `Uri`.
pub fn parse_uri(uri: &str) -> Option<Uri> {
    Uri::from_str(uri).ok()
}

pub struct Workspace {
    index: Arc<TokenIndex>,
    config: Arc<ConfigState>,
    /// Cleaned absolute path → options it was last loaded with.
    registry: RwLock<HashMap<PathBuf, LoadOptions>>,
    patterns: RwLock<Vec<WatchedPattern>>,
}

impl Workspace {
    pub fn new(index: Arc<TokenIndex>, config: Arc<ConfigState>) -> Self {
        Self {
            index,
            config,
            registry: RwLock::new(HashMap::new()),
            patterns: RwLock::new(Vec::new()),
        }
    }

    pub fn index(&self) -> &TokenIndex {
        &self.index
    }

    /// Whether `path` is currently contributing tokens.
    pub fn is_loaded(&self, path: &Path) -> bool {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        registry.contains_key(&clean_path(path))
    }

    /// The registry options a path was loaded with.
    pub fn loaded_options(&self, path: &Path) -> Option<LoadOptions> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        registry.get(&clean_path(path)).cloned()
    }

    /// Paths in the loaded-files registry (token-file recognition).
    pub fn loaded_paths(&self) -> Vec<PathBuf> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        registry.keys().cloned().collect()
    }

    /// Run the full discovery sequence against the current effective
    /// configuration and atomically replace the index contents.
    pub fn reload_all(&self) -> LoadReport {
        let config = self.config.get();
        let root = self
            .config
            .root()
            .map(|r| r.path)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut report = LoadReport::default();
        let mut tokens: Vec<Token> = Vec::new();
        let mut registry: HashMap<PathBuf, LoadOptions> = HashMap::new();
        let mut patterns: Vec<WatchedPattern> = Vec::new();

        for entry in &config.tokens_files {
            self.load_entry(
                entry,
                &config,
                &root,
                &mut tokens,
                &mut registry,
                &mut patterns,
                &mut report,
            );
        }

        report.loaded_files = registry.len();
        for key in self.index.replace_all(tokens) {
            report
                .warnings
                .push(format!("duplicate token '{key}' overwritten by a later source"));
        }
        *self.registry.write().unwrap_or_else(|e| e.into_inner()) = registry;
        *self.patterns.write().unwrap_or_else(|e| e.into_inner()) = patterns;
        report
    }

    #[allow(clippy::too_many_arguments)]
    fn load_entry(
        &self,
        entry: &TokenFileEntry,
        config: &ServerConfig,
        root: &Path,
        tokens: &mut Vec<Token>,
        registry: &mut HashMap<PathBuf, LoadOptions>,
        patterns: &mut Vec<WatchedPattern>,
        report: &mut LoadReport,
    ) {
        let options = LoadOptions {
            prefix: entry
                .prefix()
                .or(config.prefix.as_deref())
                .unwrap_or_default()
                .to_string(),
            group_markers: entry
                .group_markers()
                .map(|m| m.to_vec())
                .unwrap_or_else(|| config.group_markers.clone()),
        };
        let spec = entry.path();

        if paths::has_glob_meta(spec) {
            let (files, glob_warnings) = paths::expand_glob(spec, root);
            report.warnings.extend(glob_warnings);
            if files.is_empty() {
                report
                    .warnings
                    .push(format!("glob '{spec}' matched no files"));
            }
            report
                .watch_patterns
                .push(format!("{}/{}", root.to_string_lossy().replace('\\', "/"), spec));
            if let Ok(glob) = globset::Glob::new(spec) {
                patterns.push(WatchedPattern {
                    matcher: glob.compile_matcher(),
                    options: options.clone(),
                });
            }
            for file in files {
                self.load_one_file(&file, &options, tokens, registry, report);
            }
            return;
        }

        match paths::resolve_spec(spec, root) {
            Ok(path) => {
                report
                    .watch_patterns
                    .push(path.to_string_lossy().replace('\\', "/"));
                self.load_one_file(&path, &options, tokens, registry, report);
            }
            Err(SpecError::PackageNotFound { package_path, .. })
                if config.network_fallback && spec.starts_with("npm:") =>
            {
                let url = config.cdn.url(&package_path);
                match fetch_cdn(&url, config.network_timeout_secs) {
                    Ok(body) => {
                        let origin = SourceOrigin {
                            file_path: String::new(),
                            definition_uri: url.clone(),
                            format: SourceFormat::from_path(&url),
                        };
                        match loader::load_tokens(&body, &origin, &options) {
                            Ok(outcome) => {
                                report.warnings.extend(outcome.warnings);
                                tokens.extend(outcome.tokens);
                            }
                            Err(e) => report.errors.push(e.to_string()),
                        }
                    }
                    Err(e) => report.errors.push(e),
                }
            }
            Err(e) => report.errors.push(format!("{spec}: {e}")),
        }
    }

    fn load_one_file(
        &self,
        path: &Path,
        options: &LoadOptions,
        tokens: &mut Vec<Token>,
        registry: &mut HashMap<PathBuf, LoadOptions>,
        report: &mut LoadReport,
    ) {
        match read_and_parse(path, options) {
            Ok(outcome) => {
                report.warnings.extend(outcome.warnings);
                tokens.extend(outcome.tokens);
                registry.insert(clean_path(path), options.clone());
            }
            Err(e) => report.errors.push(e),
        }
    }

    /// `Created` watch event: load the file iff it matches a configured
    /// glob and isn't already loaded.
    pub fn handle_created(&self, path: &Path) -> Option<LoadReport> {
        if self.is_loaded(path) {
            return None;
        }
        let root = self.config.root().map(|r| r.path)?;
        let relative = path.strip_prefix(&root).ok()?;
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        let options = {
            let patterns = self.patterns.read().unwrap_or_else(|e| e.into_inner());
            patterns
                .iter()
                .find(|p| p.matcher.is_match(&rel_str))
                .map(|p| p.options.clone())
        }?;

        Some(self.reload_one(path, &options))
    }

    /// `Changed` watch event: re-load iff the path is in the registry.
    /// Unregistered paths cause no I/O and leave the index untouched.
    pub fn handle_changed(&self, path: &Path) -> Option<LoadReport> {
        let options = self.loaded_options(path)?;
        Some(self.reload_one(path, &options))
    }

    /// `Deleted` watch event: drop the registry entry and the file's tokens.
    pub fn handle_deleted(&self, path: &Path) -> bool {
        let cleaned = clean_path(path);
        let had = {
            let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
            registry.remove(&cleaned).is_some()
        };
        if had {
            self.index.remove_file(&cleaned);
        }
        had
    }

    /// Re-load a single file, replacing only its previously contributed
    /// tokens. A parse failure keeps the prior tokens in place.
    fn reload_one(&self, path: &Path, options: &LoadOptions) -> LoadReport {
        let mut report = LoadReport::default();
        match read_and_parse(path, options) {
            Ok(outcome) => {
                report.warnings.extend(outcome.warnings);
                let cleaned = clean_path(path);
                for key in self.index.replace_file(&cleaned, outcome.tokens) {
                    report
                        .warnings
                        .push(format!("duplicate token '{key}' overwritten on reload"));
                }
                let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
                registry.insert(cleaned, options.clone());
                report.loaded_files = 1;
            }
            Err(e) => report.errors.push(e),
        }
        report
    }
}

fn clean_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn read_and_parse(path: &Path, options: &LoadOptions) -> Result<loader::LoadOutcome, String> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read {}: {e}", path.display()))?;
    let cleaned = clean_path(path);
    let origin = SourceOrigin {
        file_path: cleaned.to_string_lossy().to_string(),
        definition_uri: file_uri(&cleaned),
        format: SourceFormat::from_path(&path.to_string_lossy()),
    };
    loader::load_tokens(&source, &origin, options).map_err(|e| e.to_string())
}

/// Fetch a token file from the CDN, timeout-bounded.
fn fetch_cdn(url: &str, timeout_secs: u64) -> Result<String, String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| format!("failed to build HTTP client: {e}"))?;
    let resp = client
        .get(url)
        .send()
        .map_err(|e| format!("failed to fetch {url}: {e}"))?;
    if !resp.status().is_success() {
        return Err(format!("failed to fetch {url}: HTTP {}", resp.status()));
    }
    resp.text().map_err(|e| format!("failed to read {url}: {e}"))
}
