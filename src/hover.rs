//! Hover content rendering.
//!
//! One fixed template for known tokens and one for unknown names, rendered
//! as markdown or plaintext per the client's declared preference. Optional
//! sections are omitted entirely when empty.

use crate::capabilities::Markup;
use crate::tokens::Token;

/// Render hover content for a known token. `value` is the resolved display
/// value (aliases already followed through the index).
pub fn render_token(token: &Token, value: &str, markup: Markup) -> String {
    match markup {
        Markup::Markdown => {
            let mut out = format!("# --{}\n", token.key);
            if let Some(description) = &token.description {
                out.push_str(&format!("\n{description}\n"));
            }
            out.push_str(&format!("\n**Value**: `{value}`\n"));
            out.push_str(&format!("\n**Type**: `{}`\n", token.kind));
            if token.deprecated {
                match &token.deprecation_message {
                    Some(msg) => out.push_str(&format!("\n⚠️ **DEPRECATED**: {msg}\n")),
                    None => out.push_str("\n⚠️ **DEPRECATED**\n"),
                }
            }
            if !token.file_path.is_empty() {
                out.push_str(&format!("\n*Defined in: {}*\n", token.file_path));
            } else if !token.definition_uri.is_empty() {
                out.push_str(&format!("\n*Defined in: {}*\n", token.definition_uri));
            }
            out
        }
        Markup::PlainText => {
            let mut out = format!("--{}\n", token.key);
            if let Some(description) = &token.description {
                out.push_str(&format!("{description}\n"));
            }
            out.push_str(&format!("Value: {value}\n"));
            out.push_str(&format!("Type: {}\n", token.kind));
            if token.deprecated {
                match &token.deprecation_message {
                    Some(msg) => out.push_str(&format!("DEPRECATED: {msg}\n")),
                    None => out.push_str("DEPRECATED\n"),
                }
            }
            if !token.file_path.is_empty() {
                out.push_str(&format!("Defined in: {}\n", token.file_path));
            } else if !token.definition_uri.is_empty() {
                out.push_str(&format!("Defined in: {}\n", token.definition_uri));
            }
            out
        }
    }
}

/// Render hover content for a name no loaded token defines.
pub fn render_unknown(name: &str, markup: Markup) -> String {
    let name = name.strip_prefix("--").unwrap_or(name);
    match markup {
        Markup::Markdown => format!(
            "❌ **Unknown token**: `--{name}`\n\nThis token is not defined in any loaded token files."
        ),
        Markup::PlainText => format!(
            "Unknown token: --{name}\n\nThis token is not defined in any loaded token files."
        ),
    }
}
