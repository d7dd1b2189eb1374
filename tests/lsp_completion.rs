mod common;

use common::lsp_client::TestClient;
use common::{PRIMARY_MANIFEST, workspace, ws_uri};
use serde_json::json;

const TOKENS: &str = r##"{
  "color": {
    "primary": {"$value": "#0000ff", "$type": "color"},
    "alert": {"$value": "#ff0000", "$type": "color"}
  },
  "space": {
    "small": {"$value": "4px", "$type": "dimension"}
  }
}
"##;

/// Completions in a property value match the partial word, case-folded and
/// dash-stripped.
#[tokio::test]
async fn completion_filters_by_partial_word() {
    let ws = workspace(&[("tokens.json", TOKENS), ("package.json", PRIMARY_MANIFEST)]);
    let mut client = TestClient::spawn();
    client.initialize_and_load(ws.path(), json!({}), None).await;

    let uri = ws_uri(ws.path(), "a.css");
    let css = ".b { color: --color- }";
    client.did_open(&uri, "css", 1, css).await;

    let result = client
        .completion(&uri, 0, css.find(" }").unwrap() as u32)
        .await;
    let items = result.as_array().unwrap();
    let labels: Vec<&str> = items.iter().map(|i| i["label"].as_str().unwrap()).collect();
    assert!(labels.contains(&"--color-primary"), "got: {labels:?}");
    assert!(labels.contains(&"--color-alert"), "got: {labels:?}");
    assert!(!labels.contains(&"--space-small"), "got: {labels:?}");
}

/// All tokens complete when no partial word has been typed yet.
#[tokio::test]
async fn empty_word_offers_everything() {
    let ws = workspace(&[("tokens.json", TOKENS), ("package.json", PRIMARY_MANIFEST)]);
    let mut client = TestClient::spawn();
    client.initialize_and_load(ws.path(), json!({}), None).await;

    let uri = ws_uri(ws.path(), "a.css");
    let css = ".b { color:  }";
    client.did_open(&uri, "css", 1, css).await;

    let result = client.completion(&uri, 0, 12).await;
    assert_eq!(result.as_array().unwrap().len(), 3);
}

/// A snippet-capable client gets a `var()` snippet with a fallback tabstop.
#[tokio::test]
async fn snippet_insertion_when_supported() {
    let ws = workspace(&[("tokens.json", TOKENS), ("package.json", PRIMARY_MANIFEST)]);
    let mut client = TestClient::spawn();
    client
        .initialize_and_load(
            ws.path(),
            json!({"textDocument": {"completion": {"completionItem": {"snippetSupport": true}}}}),
            None,
        )
        .await;

    let uri = ws_uri(ws.path(), "a.css");
    let css = ".b { color: prim }";
    client.did_open(&uri, "css", 1, css).await;

    let result = client
        .completion(&uri, 0, css.find(" }").unwrap() as u32)
        .await;
    let items = result.as_array().unwrap();
    let item = items
        .iter()
        .find(|i| i["label"] == "--color-primary")
        .expect("missing --color-primary item");
    assert_eq!(item["insertTextFormat"], 2); // Snippet
    assert_eq!(
        item["textEdit"]["newText"],
        "var(--color-primary${1:, #0000ff})"
    );
}

/// `completionItem/resolve` fills in detail and documentation, and is safe
/// on unknown data.
#[tokio::test]
async fn resolve_populates_documentation() {
    let ws = workspace(&[("tokens.json", TOKENS), ("package.json", PRIMARY_MANIFEST)]);
    let mut client = TestClient::spawn();
    client.initialize_and_load(ws.path(), json!({}), None).await;

    let resolved = client
        .request(
            "completionItem/resolve",
            json!({"label": "--color-primary", "data": "color-primary"}),
        )
        .await;
    assert!(resolved["detail"].as_str().unwrap().contains("#0000ff"));
    assert!(
        resolved["documentation"]["value"]
            .as_str()
            .unwrap()
            .contains("--color-primary")
    );

    let unknown = client
        .request(
            "completionItem/resolve",
            json!({"label": "--mystery", "data": "mystery"}),
        )
        .await;
    assert_eq!(unknown["label"], "--mystery");
    assert!(unknown["detail"].is_null());
}

/// Completions never fire outside a property value.
#[tokio::test]
async fn no_completion_in_selector() {
    let ws = workspace(&[("tokens.json", TOKENS), ("package.json", PRIMARY_MANIFEST)]);
    let mut client = TestClient::spawn();
    client.initialize_and_load(ws.path(), json!({}), None).await;

    let uri = ws_uri(ws.path(), "a.css");
    client.did_open(&uri, "css", 1, ".colo { }").await;
    let result = client.completion(&uri, 0, 5).await;
    assert!(result.is_null());
}
