//! Scanner for CSS custom-property usage.
//!
//! Produces the two tables the CSS-var analyzer reads: `var(--name[, fallback])`
//! occurrences and `--name: value;` declarations, each with byte ranges. For
//! host languages the scanner first narrows to embedded CSS regions
//! (`<style>` elements in HTML, `css`-tagged template literals in JS/TS) and
//! reports ranges in whole-document offsets.

use std::ops::Range;

/// One `var(--name[, fallback])` occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct VarCall {
    /// The whole call, `var` through the closing paren.
    pub range: Range<usize>,
    /// The `--name` identifier.
    pub name_range: Range<usize>,
    pub name: String,
    pub fallback: Option<FallbackSpan>,
}

/// The fallback argument of a `var()` call, comma excluded.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackSpan {
    pub range: Range<usize>,
    pub text: String,
}

/// One `--name: value` declaration at any scope.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub range: Range<usize>,
    pub name_range: Range<usize>,
    pub name: String,
    pub value_range: Range<usize>,
    pub value: String,
}

/// Scan tables for one document.
#[derive(Debug, Default, Clone)]
pub struct CssScan {
    pub var_calls: Vec<VarCall>,
    pub decls: Vec<VarDecl>,
}

/// Language IDs the CSS-var analyzer applies to.
pub fn is_css_capable(language_id: &str) -> bool {
    matches!(
        language_id,
        "css" | "scss" | "less" | "html" | "vue" | "javascript" | "javascriptreact"
            | "typescript" | "typescriptreact"
    )
}

/// Scan a document, narrowing to embedded CSS for host languages.
pub fn scan_document(text: &str, language_id: &str) -> CssScan {
    let mut scan = CssScan::default();
    for region in css_regions(text, language_id) {
        scan_region(text, region, &mut scan);
    }
    scan
}

/// The byte ranges of CSS content in a document.
fn css_regions(text: &str, language_id: &str) -> Vec<Range<usize>> {
    match language_id {
        "css" | "scss" | "less" => vec![0..text.len()],
        "html" | "vue" => style_element_regions(text),
        "javascript" | "javascriptreact" | "typescript" | "typescriptreact" => {
            let mut regions = css_template_regions(text);
            // JSX/Vue single-file components can also carry <style> blocks.
            regions.extend(style_element_regions(text));
            regions.sort_by_key(|r| r.start);
            regions
        }
        _ => vec![],
    }
}

/// Find `<style …>…</style>` content ranges, case-insensitively.
fn style_element_regions(text: &str) -> Vec<Range<usize>> {
    let lower = text.to_ascii_lowercase();
    let mut regions = Vec::new();
    let mut at = 0;
    while let Some(open) = lower[at..].find("<style") {
        let open = at + open;
        let Some(gt) = lower[open..].find('>') else {
            break;
        };
        let content_start = open + gt + 1;
        let Some(close) = lower[content_start..].find("</style") else {
            break;
        };
        regions.push(content_start..content_start + close);
        at = content_start + close + "</style".len();
    }
    regions
}

/// Find the content ranges of `css`-tagged template literals.
fn css_template_regions(text: &str) -> Vec<Range<usize>> {
    let bytes = text.as_bytes();
    let mut regions = Vec::new();
    let mut at = 0;
    while let Some(hit) = text[at..].find("css`") {
        let tag_start = at + hit;
        // Require a non-identifier char before the tag so `myCss` doesn't match.
        let ok = tag_start == 0 || !is_ident_byte(bytes[tag_start - 1]);
        let content_start = tag_start + 4;
        if !ok {
            at = content_start;
            continue;
        }
        let mut i = content_start;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b'`' => break,
                _ => i += 1,
            }
        }
        regions.push(content_start..i.min(bytes.len()));
        at = i.min(bytes.len()).saturating_add(1).min(text.len());
        if at >= text.len() {
            break;
        }
    }
    regions
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Linear scan of one region. Comments and strings are skipped; `var(` calls
/// resume scanning after the identifier so nested calls in fallbacks are
/// found too.
fn scan_region(text: &str, region: Range<usize>, out: &mut CssScan) {
    let bytes = text.as_bytes();
    let end = region.end.min(bytes.len());
    let mut i = region.start;

    while i < end {
        match bytes[i] {
            b'/' if i + 1 < end && bytes[i + 1] == b'*' => {
                i = skip_comment(bytes, i, end);
            }
            b'"' | b'\'' => {
                i = skip_string(bytes, i, end);
            }
            b'v' if bytes[i..end].starts_with(b"var")
                && (i == 0 || !is_ident_byte(bytes[i - 1])) =>
            {
                let mut j = i + 3;
                while j < end && bytes[j].is_ascii_whitespace() {
                    j += 1;
                }
                if j < end && bytes[j] == b'(' {
                    if let Some(call) = parse_var_call(text, i, j + 1, end) {
                        let resume = call.name_range.end;
                        out.var_calls.push(call);
                        i = resume;
                        continue;
                    }
                }
                i += 3;
            }
            b'-' if i + 1 < end
                && bytes[i + 1] == b'-'
                && (i == 0 || !is_ident_byte(bytes[i - 1])) =>
            {
                if let Some((decl, next)) = parse_decl(text, i, end) {
                    out.decls.push(decl);
                    i = next;
                } else {
                    i += 2;
                }
            }
            _ => i += 1,
        }
    }
}

fn skip_comment(bytes: &[u8], start: usize, end: usize) -> usize {
    let mut i = start + 2;
    while i + 1 < end {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    end
}

fn skip_string(bytes: &[u8], start: usize, end: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < end {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            b'\n' => return i + 1, // unterminated string; don't eat the file
            _ => i += 1,
        }
    }
    end
}

/// Parse a `var(` call. `call_start` is the `v`, `after_paren` the byte
/// after `(`. Returns `None` when no `--` identifier follows.
fn parse_var_call(text: &str, call_start: usize, after_paren: usize, end: usize) -> Option<VarCall> {
    let bytes = text.as_bytes();
    let mut i = after_paren;
    while i < end && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if i + 1 >= end || bytes[i] != b'-' || bytes[i + 1] != b'-' {
        return None;
    }
    let name_start = i;
    i += 2;
    while i < end && is_ident_byte(bytes[i]) {
        i += 1;
    }
    let name_range = name_start..i;
    let name = text[name_range.clone()].to_string();

    while i < end && bytes[i].is_ascii_whitespace() {
        i += 1;
    }

    let mut fallback = None;
    if i < end && bytes[i] == b',' {
        i += 1;
        while i < end && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let fb_start = i;
        let mut depth = 0usize;
        while i < end {
            match bytes[i] {
                b'(' => depth += 1,
                b')' => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                b'"' | b'\'' => {
                    i = skip_string(bytes, i, end) - 1;
                }
                _ => {}
            }
            i += 1;
        }
        let mut fb_end = i;
        while fb_end > fb_start && bytes[fb_end - 1].is_ascii_whitespace() {
            fb_end -= 1;
        }
        if fb_end > fb_start {
            fallback = Some(FallbackSpan {
                range: fb_start..fb_end,
                text: text[fb_start..fb_end].to_string(),
            });
        }
    } else {
        // No fallback: seek the closing paren.
        while i < end && bytes[i] != b')' {
            i += 1;
        }
    }

    if i >= end || bytes[i] != b')' {
        return None; // unterminated call
    }
    Some(VarCall {
        range: call_start..i + 1,
        name_range,
        name,
        fallback,
    })
}

/// Parse a `--name: value` declaration starting at the `--`.
fn parse_decl(text: &str, start: usize, end: usize) -> Option<(VarDecl, usize)> {
    let bytes = text.as_bytes();
    let mut i = start + 2;
    while i < end && is_ident_byte(bytes[i]) {
        i += 1;
    }
    let name_range = start..i;
    if name_range.len() <= 2 {
        return None;
    }
    let mut j = i;
    while j < end && bytes[j].is_ascii_whitespace() {
        j += 1;
    }
    if j >= end || bytes[j] != b':' {
        return None;
    }
    j += 1;
    while j < end && bytes[j].is_ascii_whitespace() {
        j += 1;
    }
    let value_start = j;
    let mut depth = 0usize;
    while j < end {
        match bytes[j] {
            b'(' => depth += 1,
            b')' if depth > 0 => depth -= 1,
            b';' | b'}' if depth == 0 => break,
            b'"' | b'\'' => {
                j = skip_string(bytes, j, end) - 1;
            }
            _ => {}
        }
        j += 1;
    }
    let mut value_end = j;
    while value_end > value_start && bytes[value_end - 1].is_ascii_whitespace() {
        value_end -= 1;
    }
    let decl = VarDecl {
        range: start..value_end,
        name_range: name_range.clone(),
        name: text[name_range].to_string(),
        value_range: value_start..value_end,
        value: text[value_start..value_end].to_string(),
    };
    Some((decl, j))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_simple_var_call() {
        let css = ".b { color: var(--color-primary); }";
        let scan = scan_document(css, "css");
        assert_eq!(scan.var_calls.len(), 1);
        let call = &scan.var_calls[0];
        assert_eq!(call.name, "--color-primary");
        assert_eq!(&css[call.range.clone()], "var(--color-primary)");
        assert!(call.fallback.is_none());
    }

    #[test]
    fn captures_fallback_span() {
        let css = ".b { color: var(--c, #ff0000); }";
        let scan = scan_document(css, "css");
        let fb = scan.var_calls[0].fallback.as_ref().unwrap();
        assert_eq!(fb.text, "#ff0000");
        assert_eq!(&css[fb.range.clone()], "#ff0000");
    }

    #[test]
    fn nested_var_calls_are_both_found() {
        let css = "a { color: var(--outer, var(--inner, #fff)); }";
        let scan = scan_document(css, "css");
        assert_eq!(scan.var_calls.len(), 2);
        assert_eq!(scan.var_calls[0].name, "--outer");
        assert_eq!(scan.var_calls[1].name, "--inner");
        let outer = &scan.var_calls[0];
        let inner = &scan.var_calls[1];
        assert!(outer.range.start < inner.range.start && inner.range.end < outer.range.end);
    }

    #[test]
    fn fallback_with_nested_parens_and_comma() {
        let css = "a { color: var(--c, rgb(1, 2, 3)); }";
        let scan = scan_document(css, "css");
        let fb = scan.var_calls[0].fallback.as_ref().unwrap();
        assert_eq!(fb.text, "rgb(1, 2, 3)");
    }

    #[test]
    fn finds_declarations() {
        let css = ":root { --brand: #f00; --space-1: 4px }";
        let scan = scan_document(css, "css");
        assert_eq!(scan.decls.len(), 2);
        assert_eq!(scan.decls[0].name, "--brand");
        assert_eq!(scan.decls[0].value, "#f00");
        assert_eq!(scan.decls[1].value, "4px");
    }

    #[test]
    fn var_identifier_is_not_a_declaration() {
        let css = "a { color: var(--x); }";
        let scan = scan_document(css, "css");
        assert!(scan.decls.is_empty());
    }

    #[test]
    fn comments_and_strings_are_skipped() {
        let css = "/* var(--no) */ a { content: \"var(--nope)\"; color: var(--yes); }";
        let scan = scan_document(css, "css");
        assert_eq!(scan.var_calls.len(), 1);
        assert_eq!(scan.var_calls[0].name, "--yes");
    }

    #[test]
    fn html_style_element_offsets_are_global() {
        let html = "<html><style>a { color: var(--x); }</style><body>var(--not-css)</body></html>";
        let scan = scan_document(html, "html");
        assert_eq!(scan.var_calls.len(), 1);
        let call = &scan.var_calls[0];
        assert_eq!(&html[call.name_range.clone()], "--x");
    }

    #[test]
    fn js_css_template_is_scanned() {
        let js = "const s = css`a { color: var(--x); }`; other(`var(--not)`);";
        let scan = scan_document(js, "javascript");
        assert_eq!(scan.var_calls.len(), 1);
        assert_eq!(scan.var_calls[0].name, "--x");
    }

    #[test]
    fn plain_text_language_yields_nothing() {
        assert!(scan_document("var(--x)", "plaintext").var_calls.is_empty());
    }

    #[test]
    fn unterminated_call_is_ignored() {
        let css = "a { color: var(--broken";
        let scan = scan_document(css, "css");
        assert!(scan.var_calls.is_empty());
    }
}
