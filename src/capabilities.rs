//! Client capability snapshot.
//!
//! Captured once at `initialize` from the re-serialized capability JSON
//! rather than the typed structs, so fields the protocol library doesn't
//! model (or models loosely) are still detected. A present field counts as
//! support even when its object is empty; anything unreadable falls back to
//! the conservative default.

use serde_json::Value;

/// Hover/documentation markup the client prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Markup {
    #[default]
    Markdown,
    PlainText,
}

/// Immutable snapshot of the client capabilities the analyzers consult.
#[derive(Debug, Clone)]
pub struct ClientCaps {
    /// LSP 3.17 pull diagnostics (`textDocument.diagnostic` present).
    pub pull_diagnostics: bool,
    pub snippets: bool,
    pub markup: Markup,
    pub definition_links: bool,
    pub related_info: bool,
    pub code_action_literals: bool,
}

impl Default for ClientCaps {
    fn default() -> Self {
        Self {
            pull_diagnostics: false,
            snippets: false,
            markup: Markup::Markdown,
            definition_links: false,
            related_info: false,
            code_action_literals: false,
        }
    }
}

impl ClientCaps {
    /// Detect capabilities from the raw `initialize` capability object.
    pub fn detect(raw: &Value) -> Self {
        let td = raw.get("textDocument");
        let get = |path: &[&str]| -> Option<&Value> {
            let mut cur = td?;
            for seg in path {
                cur = cur.get(seg)?;
            }
            Some(cur)
        };

        let markup = get(&["hover", "contentFormat"])
            .and_then(|v| v.as_array())
            .and_then(|formats| formats.first())
            .and_then(|v| v.as_str())
            .map(|s| match s {
                "plaintext" => Markup::PlainText,
                _ => Markup::Markdown,
            })
            .unwrap_or_default();

        Self {
            pull_diagnostics: get(&["diagnostic"]).is_some(),
            snippets: get(&["completion", "completionItem", "snippetSupport"])
                .and_then(Value::as_bool)
                .unwrap_or(false),
            markup,
            definition_links: get(&["definition", "linkSupport"])
                .and_then(Value::as_bool)
                .unwrap_or(false),
            related_info: get(&["publishDiagnostics", "relatedInformation"])
                .and_then(Value::as_bool)
                .unwrap_or(false),
            code_action_literals: get(&["codeAction", "codeActionLiteralSupport"]).is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_capabilities_are_conservative() {
        let caps = ClientCaps::detect(&json!({}));
        assert!(!caps.pull_diagnostics);
        assert!(!caps.snippets);
        assert_eq!(caps.markup, Markup::Markdown);
        assert!(!caps.definition_links);
    }

    #[test]
    fn empty_diagnostic_object_means_pull() {
        let caps = ClientCaps::detect(&json!({"textDocument": {"diagnostic": {}}}));
        assert!(caps.pull_diagnostics);
    }

    #[test]
    fn content_format_first_entry_wins() {
        let caps = ClientCaps::detect(&json!({
            "textDocument": {"hover": {"contentFormat": ["plaintext", "markdown"]}}
        }));
        assert_eq!(caps.markup, Markup::PlainText);
    }

    #[test]
    fn snippet_and_link_support() {
        let caps = ClientCaps::detect(&json!({
            "textDocument": {
                "completion": {"completionItem": {"snippetSupport": true}},
                "definition": {"linkSupport": true},
                "publishDiagnostics": {"relatedInformation": true},
                "codeAction": {"codeActionLiteralSupport": {"codeActionKind": {"valueSet": []}}}
            }
        }));
        assert!(caps.snippets);
        assert!(caps.definition_links);
        assert!(caps.related_info);
        assert!(caps.code_action_literals);
    }

    #[test]
    fn malformed_fields_fall_back() {
        let caps = ClientCaps::detect(&json!({
            "textDocument": {
                "hover": {"contentFormat": "markdown"},
                "completion": {"completionItem": {"snippetSupport": "yes"}}
            }
        }));
        assert_eq!(caps.markup, Markup::Markdown);
        assert!(!caps.snippets);
    }
}
