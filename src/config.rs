//! Server configuration: recognized options, workspace manifest parsing,
//! and the precedence merge (client settings → workspace manifest →
//! built-in defaults, field-wise).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_lsp_server::ls_types::Uri;

use crate::capabilities::ClientCaps;

/// Group markers applied when neither config nor file overrides them.
pub const DEFAULT_GROUP_MARKERS: &[&str] = &["_", "@", "DEFAULT"];

/// CDN fetch timeout when `networkTimeout` is unset or ≤ 0.
pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    JsoncParseError { path: String, message: String },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
}

/// CDN provider for `npm:` sources that miss local resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CdnProvider {
    #[default]
    Unpkg,
    Jsdelivr,
}

impl CdnProvider {
    /// Synthesize the fetch URL for `pkg/sub/path.json`.
    pub fn url(&self, package_path: &str) -> String {
        match self {
            Self::Unpkg => format!("https://unpkg.com/{package_path}"),
            Self::Jsdelivr => format!("https://cdn.jsdelivr.net/npm/{package_path}"),
        }
    }
}

/// One configured token source: a bare path/spec string, or an object with
/// per-file overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum TokenFileEntry {
    Path(String),
    Spec(TokenFileSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenFileSpec {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_markers: Option<Vec<String>>,
}

impl TokenFileEntry {
    pub fn path(&self) -> &str {
        match self {
            Self::Path(p) => p,
            Self::Spec(s) => &s.path,
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        match self {
            Self::Path(_) => None,
            Self::Spec(s) => s.prefix.as_deref(),
        }
    }

    pub fn group_markers(&self) -> Option<&[String]> {
        match self {
            Self::Path(_) => None,
            Self::Spec(s) => s.group_markers.as_deref(),
        }
    }
}

/// `tokensFiles` accepts a bare entry or an array of entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(v) => vec![v],
            Self::Many(v) => v,
        }
    }
}

/// A partial configuration layer. Every field optional: an absent field on
/// a higher-precedence layer never blanks a lower one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigLayer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_markers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_files: Option<OneOrMany<TokenFileEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_fallback: Option<bool>,
    /// Seconds; values ≤ 0 mean the implementation default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_timeout: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn: Option<CdnProvider>,
}

impl ConfigLayer {
    /// Overlay `higher` on top of `self`, field-wise.
    pub fn overlaid(&self, higher: &ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            prefix: higher.prefix.clone().or_else(|| self.prefix.clone()),
            group_markers: higher
                .group_markers
                .clone()
                .or_else(|| self.group_markers.clone()),
            tokens_files: higher
                .tokens_files
                .clone()
                .or_else(|| self.tokens_files.clone()),
            network_fallback: higher.network_fallback.or(self.network_fallback),
            network_timeout: higher.network_timeout.or(self.network_timeout),
            cdn: higher.cdn.or(self.cdn),
        }
    }
}

/// The effective configuration all components read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub prefix: Option<String>,
    pub group_markers: Vec<String>,
    pub tokens_files: Vec<TokenFileEntry>,
    pub network_fallback: bool,
    pub network_timeout_secs: u64,
    pub cdn: CdnProvider,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            group_markers: DEFAULT_GROUP_MARKERS.iter().map(|s| s.to_string()).collect(),
            tokens_files: vec![],
            network_fallback: false,
            network_timeout_secs: DEFAULT_NETWORK_TIMEOUT_SECS,
            cdn: CdnProvider::default(),
        }
    }
}

impl ServerConfig {
    fn from_layer(layer: &ConfigLayer) -> Self {
        let defaults = ServerConfig::default();
        ServerConfig {
            prefix: layer.prefix.clone().filter(|p| !p.is_empty()),
            group_markers: layer.group_markers.clone().unwrap_or(defaults.group_markers),
            tokens_files: layer
                .tokens_files
                .clone()
                .map(OneOrMany::into_vec)
                .unwrap_or_default(),
            network_fallback: layer.network_fallback.unwrap_or(false),
            network_timeout_secs: match layer.network_timeout {
                Some(secs) if secs > 0.0 => secs.round() as u64,
                _ => DEFAULT_NETWORK_TIMEOUT_SECS,
            },
            cdn: layer.cdn.unwrap_or_default(),
        }
    }
}

/// Parse JSONC source into a `serde_json::Value`.
fn parse_jsonc_value(source: &str, path: &str) -> Result<serde_json::Value, ConfigError> {
    let ast = jsonc_parser::parse_to_ast(source, &Default::default(), &crate::loader::parse_options())
        .map_err(|e| ConfigError::JsoncParseError {
            path: path.to_string(),
            message: e.to_string(),
        })?;
    let value = ast.value.ok_or_else(|| ConfigError::JsoncParseError {
        path: path.to_string(),
        message: "Empty config file".to_string(),
    })?;
    Ok(value.into())
}

const KNOWN_FIELDS: &[&str] = &[
    "prefix",
    "groupMarkers",
    "tokensFiles",
    "networkFallback",
    "networkTimeout",
    "cdn",
];

/// Parse a configuration object, warning (not erroring) on unknown fields.
pub fn layer_from_value(
    value: &serde_json::Value,
    origin: &str,
) -> Result<(ConfigLayer, Vec<String>), ConfigError> {
    let mut warnings = Vec::new();
    if let Some(obj) = value.as_object() {
        let known: BTreeSet<&str> = KNOWN_FIELDS.iter().copied().collect();
        for key in obj.keys() {
            if !known.contains(key.as_str()) {
                warnings.push(format!("{origin}: ignoring unknown option '{key}'"));
            }
        }
    }
    let layer: ConfigLayer =
        serde_json::from_value(value.clone()).map_err(|e| ConfigError::ParseError {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
    Ok((layer, warnings))
}

/// Read the `designTokensLanguageServer` object from a workspace
/// `package.json` (JSONC-tolerant). Returns `None` when the file or the
/// field is absent.
pub fn load_package_manifest(
    workspace_root: &Path,
) -> Result<Option<(ConfigLayer, Vec<String>)>, ConfigError> {
    let path = workspace_root.join("package.json");
    let source = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        }
    };
    let value = parse_jsonc_value(&source, &path.display().to_string())?;
    let Some(section) = value.get("designTokensLanguageServer") else {
        return Ok(None);
    };
    layer_from_value(section, &path.display().to_string()).map(Some)
}

/// Alternative config file schema: flat `prefix`/`groupMarkers`/`files`/`cdn`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AltConfig {
    prefix: Option<String>,
    group_markers: Option<Vec<String>>,
    files: Option<OneOrMany<TokenFileEntry>>,
    network_fallback: Option<bool>,
    network_timeout: Option<f64>,
    cdn: Option<CdnProvider>,
}

/// Read `.config/design-tokens.{yaml,json}` at the workspace root.
pub fn load_alt_config(workspace_root: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
    for name in ["design-tokens.yaml", "design-tokens.json"] {
        let path = workspace_root.join(".config").join(name);
        let source = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(ConfigError::ReadError {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };
        let display = path.display().to_string();
        let alt: AltConfig = if name.ends_with(".yaml") {
            serde_yaml::from_str(&source).map_err(|e| ConfigError::ParseError {
                path: display,
                message: e.to_string(),
            })?
        } else {
            let value = parse_jsonc_value(&source, &display)?;
            serde_json::from_value(value).map_err(|e| ConfigError::ParseError {
                path: display,
                message: e.to_string(),
            })?
        };
        return Ok(Some(ConfigLayer {
            prefix: alt.prefix,
            group_markers: alt.group_markers,
            tokens_files: alt.files,
            network_fallback: alt.network_fallback,
            network_timeout: alt.network_timeout,
            cdn: alt.cdn,
        }));
    }
    Ok(None)
}

/// Workspace root captured at initialize.
#[derive(Debug, Clone)]
pub struct WorkspaceRoot {
    pub path: PathBuf,
    pub uri: Uri,
}

#[derive(Default)]
struct Layers {
    manifest: ConfigLayer,
    client: ConfigLayer,
}

/// Shared configuration + runtime state: the effective config, the
/// workspace root, and the client capability snapshot.
#[derive(Default)]
pub struct ConfigState {
    layers: RwLock<Layers>,
    root: RwLock<Option<WorkspaceRoot>>,
    caps: OnceLock<ClientCaps>,
}

impl ConfigState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The merged configuration: client over manifest over defaults.
    pub fn get(&self) -> ServerConfig {
        let layers = self.layers.read().unwrap_or_else(|e| e.into_inner());
        let merged = layers.manifest.overlaid(&layers.client);
        ServerConfig::from_layer(&merged)
    }

    /// Merge client-pushed settings field-wise into the client layer.
    pub fn set_client(&self, partial: ConfigLayer) {
        let mut layers = self.layers.write().unwrap_or_else(|e| e.into_inner());
        layers.client = layers.client.overlaid(&partial);
    }

    /// Replace the workspace-manifest layer wholesale (manifest reload).
    pub fn set_manifest(&self, layer: ConfigLayer) {
        let mut layers = self.layers.write().unwrap_or_else(|e| e.into_inner());
        layers.manifest = layer;
    }

    pub fn set_root(&self, root: WorkspaceRoot) {
        let mut slot = self.root.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(root);
    }

    pub fn root(&self) -> Option<WorkspaceRoot> {
        self.root.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_caps(&self, caps: ClientCaps) {
        let _ = self.caps.set(caps);
    }

    pub fn caps(&self) -> ClientCaps {
        self.caps.get().cloned().unwrap_or_default()
    }
}
