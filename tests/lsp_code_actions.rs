mod common;

use common::lsp_client::TestClient;
use common::{PRIMARY_MANIFEST, PRIMARY_TOKENS, workspace, ws_uri};
use serde_json::json;

fn literal_caps() -> serde_json::Value {
    json!({
        "textDocument": {
            "codeAction": {
                "codeActionLiteralSupport": {
                    "codeActionKind": {"valueSet": ["quickfix"]}
                }
            }
        }
    })
}

async fn request_actions(
    client: &mut TestClient,
    uri: &str,
    end_character: u32,
) -> serde_json::Value {
    client
        .request(
            "textDocument/codeAction",
            json!({
                "textDocument": {"uri": uri},
                "range": {
                    "start": {"line": 0, "character": 0},
                    "end": {"line": 0, "character": end_character}
                },
                "context": {"diagnostics": []}
            }),
        )
        .await
}

fn titles(actions: &serde_json::Value) -> Vec<String> {
    actions
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["title"].as_str().unwrap().to_string())
        .collect()
}

/// A wrong fallback yields a preferred quickfix that rewrites it.
#[tokio::test]
async fn fix_fallback_quickfix() {
    let ws = workspace(&[("tokens.json", PRIMARY_TOKENS), ("package.json", PRIMARY_MANIFEST)]);
    let mut client = TestClient::spawn();
    client
        .initialize_and_load(ws.path(), literal_caps(), None)
        .await;

    let uri = ws_uri(ws.path(), "a.css");
    let css = ".b { color: var(--color-primary, #ff0000); }";
    client.did_open(&uri, "css", 1, css).await;

    let actions = request_actions(&mut client, &uri, css.len() as u32).await;
    assert_eq!(
        titles(&actions),
        vec!["Fix fallback value to '#0000ff'".to_string()]
    );
    let action = &actions[0];
    assert_eq!(action["kind"], "quickfix");
    assert_eq!(action["isPreferred"], true);

    let edits = &action["edit"]["changes"][&uri];
    assert_eq!(edits[0]["newText"], "#0000ff");
    // The edit replaces exactly the fallback text `#ff0000`.
    let start = edits[0]["range"]["start"]["character"].as_u64().unwrap() as usize;
    let end = edits[0]["range"]["end"]["character"].as_u64().unwrap() as usize;
    assert_eq!(&css[start..end], "#ff0000");
}

/// Deprecated tokens offer the mined replacement (preferred, fallback
/// preserved) and a literal-value rewrite.
#[tokio::test]
async fn deprecated_replacement_quickfixes() {
    let tokens = r##"{
  "color": {
    "primary": {"$value": "#0000ff", "$type": "color"},
    "old": {
      "$value": "#ff0000",
      "$type": "color",
      "$deprecated": "Use color.primary instead"
    }
  }
}
"##;
    let ws = workspace(&[("tokens.json", tokens), ("package.json", PRIMARY_MANIFEST)]);
    let mut client = TestClient::spawn();
    client
        .initialize_and_load(ws.path(), literal_caps(), None)
        .await;

    let uri = ws_uri(ws.path(), "a.css");
    let css = ".b { color: var(--color-old, #ff0000); }";
    client.did_open(&uri, "css", 1, css).await;

    let actions = request_actions(&mut client, &uri, css.len() as u32).await;
    let all_titles = titles(&actions);
    assert!(
        all_titles.contains(&"Replace with '--color-primary'".to_string()),
        "got: {all_titles:?}"
    );
    assert!(
        all_titles.contains(&"Replace with literal value '#ff0000'".to_string()),
        "got: {all_titles:?}"
    );

    let replace = actions
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["title"] == "Replace with '--color-primary'")
        .unwrap();
    assert_eq!(replace["isPreferred"], true);
    let edit = &replace["edit"]["changes"][&uri][0];
    assert_eq!(edit["newText"], "--color-primary");
    // Only the identifier is replaced; `, #ff0000` survives.
    let start = edit["range"]["start"]["character"].as_u64().unwrap() as usize;
    let end = edit["range"]["end"]["character"].as_u64().unwrap() as usize;
    assert_eq!(&css[start..end], "--color-old");
    // The deprecated diagnostic is attached to the action.
    assert!(replace["diagnostics"].as_array().is_some_and(|d| !d.is_empty()));
}

/// A call with no fallback gets an "add fallback" action for simple types.
#[tokio::test]
async fn add_fallback_quickfix() {
    let ws = workspace(&[("tokens.json", PRIMARY_TOKENS), ("package.json", PRIMARY_MANIFEST)]);
    let mut client = TestClient::spawn();
    client
        .initialize_and_load(ws.path(), literal_caps(), None)
        .await;

    let uri = ws_uri(ws.path(), "a.css");
    let css = ".b { color: var(--color-primary); }";
    client.did_open(&uri, "css", 1, css).await;

    let actions = request_actions(&mut client, &uri, css.len() as u32).await;
    assert_eq!(
        titles(&actions),
        vec!["Add fallback value '#0000ff'".to_string()]
    );
    let edit = &actions[0]["edit"]["changes"][&uri][0];
    assert_eq!(edit["newText"], ", #0000ff");
    // Inserted just before the closing paren.
    let at = edit["range"]["start"]["character"].as_u64().unwrap() as usize;
    assert_eq!(&css[at..at + 1], ")");
}

/// Without code-action literal support the server offers nothing.
#[tokio::test]
async fn no_literal_support_no_actions() {
    let ws = workspace(&[("tokens.json", PRIMARY_TOKENS), ("package.json", PRIMARY_MANIFEST)]);
    let mut client = TestClient::spawn();
    client.initialize_and_load(ws.path(), json!({}), None).await;

    let uri = ws_uri(ws.path(), "a.css");
    let css = ".b { color: var(--color-primary, #ff0000); }";
    client.did_open(&uri, "css", 1, css).await;

    let actions = request_actions(&mut client, &uri, css.len() as u32).await;
    assert!(actions.as_array().unwrap().is_empty());
}
