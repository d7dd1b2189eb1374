//! Token-file specifier resolution.
//!
//! Specs arrive from configuration as absolute paths, `~/` paths,
//! `npm:<pkg>[/sub]` package references, workspace-relative paths, or glob
//! patterns. Everything normalizes to absolute paths; `..` segments in
//! package references are rejected outright.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use globset::Glob;
use ignore::WalkBuilder;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("path traversal not allowed in '{spec}'")]
    Traversal { spec: String },
    #[error("cannot resolve '~': no home directory")]
    HomeUnavailable,
    #[error("invalid npm specifier '{spec}'")]
    InvalidSpec { spec: String },
    #[error("package '{package}' not found under node_modules")]
    PackageNotFound {
        package: String,
        /// `pkg/sub/path` form, ready for CDN URL synthesis.
        package_path: String,
    },
    #[error("failed to read manifest for '{package}': {message}")]
    ManifestError { package: String, message: String },
    #[error("no entry point for '{spec}' in package exports")]
    NoEntry { spec: String },
}

/// Whether a spec needs glob expansion before resolution.
pub fn has_glob_meta(spec: &str) -> bool {
    spec.contains(['*', '?', '[', '{'])
}

/// Resolve a non-glob specifier to an absolute path.
pub fn resolve_spec(spec: &str, workspace_root: &Path) -> Result<PathBuf, SpecError> {
    if let Some(npm_spec) = spec.strip_prefix("npm:") {
        return resolve_npm(npm_spec, workspace_root);
    }
    if let Some(rest) = spec.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or(SpecError::HomeUnavailable)?;
        return Ok(home.join(rest));
    }
    let path = Path::new(spec);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let rel = spec.strip_prefix("./").unwrap_or(spec);
    Ok(workspace_root.join(rel))
}

/// Expand a glob pattern against the workspace root.
///
/// Hidden directories and `node_modules`/`dist`/`build` are skipped. A
/// pattern matching nothing is an empty set, not an error; a pattern that
/// fails to compile falls back to the literal path with a warning.
pub fn expand_glob(pattern: &str, workspace_root: &Path) -> (Vec<PathBuf>, Vec<String>) {
    let mut warnings = Vec::new();
    let matcher = match Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher(),
        Err(e) => {
            warnings.push(format!(
                "invalid glob pattern '{pattern}' ({e}); treating as a literal path"
            ));
            return (vec![workspace_root.join(pattern)], warnings);
        }
    };

    let walker = WalkBuilder::new(workspace_root)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_some_and(|ft| ft.is_dir())
                && matches!(name.as_ref(), "node_modules" | "dist" | "build"))
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warnings.push(format!("error walking workspace: {e}"));
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(workspace_root) else {
            continue;
        };
        // Match against forward-slash relative paths regardless of host OS.
        let rel_str = relative.to_string_lossy().replace('\\', "/");
        if matcher.is_match(&rel_str) {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    (files, warnings)
}

/// Split `npm:@scope/pkg/sub/path` into package name and subpath.
fn split_npm_spec(spec: &str) -> Result<(String, Option<String>), SpecError> {
    let segments: Vec<&str> = spec.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(SpecError::InvalidSpec { spec: spec.into() });
    }
    for seg in &segments {
        if *seg == ".." {
            return Err(SpecError::Traversal { spec: spec.into() });
        }
    }
    let (package, rest) = if segments[0].starts_with('@') {
        if segments.len() < 2 {
            return Err(SpecError::InvalidSpec { spec: spec.into() });
        }
        (format!("{}/{}", segments[0], segments[1]), &segments[2..])
    } else {
        (segments[0].to_string(), &segments[1..])
    };
    let subpath = if rest.is_empty() {
        None
    } else {
        Some(rest.join("/"))
    };
    Ok((package, subpath))
}

/// Resolve `npm:` specs through `<root>/node_modules/<pkg>`, honoring the
/// package's `exports` field.
fn resolve_npm(spec: &str, workspace_root: &Path) -> Result<PathBuf, SpecError> {
    let (package, subpath) = split_npm_spec(spec)?;
    let package_dir = workspace_root.join("node_modules").join(&package);
    let package_path = match &subpath {
        Some(sub) => format!("{package}/{sub}"),
        None => package.clone(),
    };
    if !package_dir.is_dir() {
        return Err(SpecError::PackageNotFound {
            package,
            package_path,
        });
    }

    let manifest_path = package_dir.join("package.json");
    let manifest: serde_json::Value = match std::fs::read_to_string(&manifest_path) {
        Ok(text) => serde_json::from_str(&text).map_err(|e| SpecError::ManifestError {
            package: package.clone(),
            message: e.to_string(),
        })?,
        Err(e) => {
            return Err(SpecError::ManifestError {
                package,
                message: e.to_string(),
            });
        }
    };

    let export_key = match &subpath {
        Some(sub) => format!("./{sub}"),
        None => ".".to_string(),
    };

    if let Some(exports) = manifest.get("exports") {
        let field = ExportsField::from_value(exports);
        if let Some(target) = field.resolve(&export_key) {
            let target = target.strip_prefix("./").unwrap_or(&target).to_string();
            return Ok(package_dir.join(target));
        }
    }

    // No exports match: subpath as a direct file, then `main`, then index.js.
    if let Some(sub) = &subpath {
        let direct = package_dir.join(sub);
        if direct.is_file() {
            return Ok(direct);
        }
        return Err(SpecError::NoEntry {
            spec: format!("npm:{spec}"),
        });
    }
    if let Some(main) = manifest.get("main").and_then(|v| v.as_str()) {
        return Ok(package_dir.join(main.strip_prefix("./").unwrap_or(main)));
    }
    Ok(package_dir.join("index.js"))
}

/// The npm `exports` field, pattern-matched into its variants so downstream
/// code never walks raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportsField {
    /// `"exports": "./tokens.json"`
    Target(String),
    /// `"exports": {"./a": …, "./b/*": …}`
    Subpaths(BTreeMap<String, ExportsField>),
    /// `"exports": {"default": …, "require": …, "import": …}`
    Conditional {
        default: Option<Box<ExportsField>>,
        require: Option<Box<ExportsField>>,
        import: Option<Box<ExportsField>>,
    },
    Unsupported,
}

impl ExportsField {
    pub fn from_value(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Self::Target(s.clone()),
            serde_json::Value::Object(map) => {
                let is_subpaths = map.keys().any(|k| k.starts_with('.'));
                if is_subpaths {
                    Self::Subpaths(
                        map.iter()
                            .map(|(k, v)| (k.clone(), Self::from_value(v)))
                            .collect(),
                    )
                } else {
                    Self::Conditional {
                        default: map.get("default").map(|v| Box::new(Self::from_value(v))),
                        require: map.get("require").map(|v| Box::new(Self::from_value(v))),
                        import: map.get("import").map(|v| Box::new(Self::from_value(v))),
                    }
                }
            }
            _ => Self::Unsupported,
        }
    }

    /// Resolve a subpath key (`.` or `./sub/path`) to a concrete target.
    pub fn resolve(&self, subpath: &str) -> Option<String> {
        match self {
            Self::Target(t) => (subpath == ".").then(|| t.clone()),
            Self::Conditional {
                default,
                require,
                import,
            } => [default, require, import]
                .into_iter()
                .flatten()
                .find_map(|field| field.resolve(subpath)),
            Self::Subpaths(map) => {
                if let Some(entry) = map.get(subpath) {
                    return entry.resolve_conditional_target();
                }
                // Single-`*` wildcard keys: `./dist/*.json`.
                for (pattern, entry) in map {
                    let Some((prefix, suffix)) = pattern.split_once('*') else {
                        continue;
                    };
                    if subpath.len() >= prefix.len() + suffix.len()
                        && subpath.starts_with(prefix)
                        && subpath.ends_with(suffix)
                    {
                        let filler = &subpath[prefix.len()..subpath.len() - suffix.len()];
                        let target = entry.resolve_conditional_target()?;
                        return Some(target.replacen('*', filler, 1));
                    }
                }
                None
            }
            Self::Unsupported => None,
        }
    }

    /// Resolve through conditional wrappers to a target string.
    fn resolve_conditional_target(&self) -> Option<String> {
        match self {
            Self::Target(t) => Some(t.clone()),
            Self::Conditional {
                default,
                require,
                import,
            } => [default, require, import]
                .into_iter()
                .flatten()
                .find_map(|field| field.resolve_conditional_target()),
            _ => None,
        }
    }
}
