pub mod lsp_client;

use std::path::{Path, PathBuf};

/// Create a workspace directory with the given `(relative_path, content)`
/// files. The caller keeps the `TempDir` alive for the test's duration.
#[allow(dead_code)]
pub fn workspace(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("failed to create temp workspace");
    for (rel, content) in files {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
    dir
}

/// Build a `file://` URI for a path inside a workspace.
#[allow(dead_code)]
pub fn ws_uri(root: &Path, rel: &str) -> String {
    file_uri(&root.join(rel))
}

#[allow(dead_code)]
pub fn file_uri(path: &Path) -> String {
    let forward = path.to_string_lossy().replace('\\', "/");
    let escaped = forward.replace(' ', "%20");
    if escaped.starts_with('/') {
        format!("file://{escaped}")
    } else {
        format!("file:///{escaped}")
    }
}

/// A canonicalized workspace path (tempdirs may be symlinked).
#[allow(dead_code)]
pub fn canonical(root: &Path) -> PathBuf {
    std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf())
}

/// Tokens fixture used by most scenarios: one blue color token.
#[allow(dead_code)]
pub const PRIMARY_TOKENS: &str = r##"{
  "color": {
    "primary": {
      "$value": "#0000ff",
      "$type": "color",
      "$description": "Primary brand color"
    }
  }
}
"##;

/// `package.json` manifest configuring `tokens.json` as the only source.
#[allow(dead_code)]
pub const PRIMARY_MANIFEST: &str = r##"{
  "name": "fixture",
  "designTokensLanguageServer": {
    "tokensFiles": ["./tokens.json"]
  }
}
"##;
