//! Open-document store and LSP position machinery.
//!
//! Documents are stored behind `Arc` so queries snapshot a consistent
//! `(text, version)` pair without holding the store lock. All LSP positions
//! use UTF-16 column units unless UTF-8 was negotiated at initialize.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tower_lsp_server::ls_types::{Position, Range, TextDocumentContentChangeEvent, Uri};

/// An open editor buffer.
#[derive(Debug, Clone)]
pub struct Document {
    pub uri: Uri,
    pub language_id: String,
    pub version: i32,
    pub text: String,
    line_starts: Vec<usize>,
}

/// Precompute byte offsets where each line starts.
pub fn compute_line_starts(source: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in source.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

impl Document {
    pub fn new(uri: Uri, language_id: String, version: i32, text: String) -> Self {
        let line_starts = compute_line_starts(&text);
        Self {
            uri,
            language_id,
            version,
            text,
            line_starts,
        }
    }

    fn line_span(&self, line: usize) -> Option<(usize, usize)> {
        let start = *self.line_starts.get(line)?;
        let end = self
            .line_starts
            .get(line + 1)
            .map(|next| next - 1)
            .unwrap_or(self.text.len());
        Some((start, end))
    }

    /// Convert an LSP position (UTF-16 column) to a byte offset. Columns
    /// past the end of the line clamp to the line end; lines past EOF
    /// clamp to the document end.
    pub fn offset_at(&self, pos: Position) -> usize {
        let Some((start, end)) = self.line_span(pos.line as usize) else {
            return self.text.len();
        };
        let line = &self.text[start..end];
        let mut units = 0u32;
        for (byte_idx, ch) in line.char_indices() {
            if units >= pos.character {
                return start + byte_idx;
            }
            units += ch.len_utf16() as u32;
        }
        end
    }

    /// Convert a byte offset to an LSP position (UTF-16 column). Offsets
    /// inside a multi-byte character snap to its start.
    pub fn position_at(&self, offset: usize) -> Position {
        let offset = offset.min(self.text.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        let start = self.line_starts[line];
        let col = self.text[start..offset].encode_utf16().count() as u32;
        Position::new(line as u32, col)
    }

    pub fn range_of(&self, byte_range: std::ops::Range<usize>) -> Range {
        Range::new(self.position_at(byte_range.start), self.position_at(byte_range.end))
    }

    /// Apply one `didChange` content change. Full-document changes replace
    /// the text; incremental changes splice the UTF-16 range.
    fn apply_change(&mut self, change: TextDocumentContentChangeEvent) {
        match change.range {
            Some(range) => {
                let start = self.offset_at(range.start);
                let end = self.offset_at(range.end).max(start);
                self.text.replace_range(start..end, &change.text);
            }
            None => self.text = change.text,
        }
        self.line_starts = compute_line_starts(&self.text);
    }
}

/// A byte-column source point, as produced by syntax-tree parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub row: u64,
    pub column: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PointError {
    #[error("point row {0} overflows u32")]
    RowOverflow(u64),
    #[error("point column {0} overflows u32")]
    ColumnOverflow(u64),
}

/// Convert a byte-column point to UTF-16 units against `source`.
///
/// Rows or columns beyond `u32::MAX` are rejected. A column past the end of
/// its line clamps to the line length. A row past the end of the source is
/// returned unchanged (the caller has stale coordinates; don't invent a
/// conversion for a line that doesn't exist).
pub fn point_to_utf16(source: &str, point: Point) -> Result<Point, PointError> {
    if point.row > u32::MAX as u64 {
        return Err(PointError::RowOverflow(point.row));
    }
    if point.column > u32::MAX as u64 {
        return Err(PointError::ColumnOverflow(point.column));
    }
    let Some(line) = source.split('\n').nth(point.row as usize) else {
        return Ok(point);
    };
    let line = line.strip_suffix('\r').unwrap_or(line);
    let byte_col = (point.column as usize).min(line.len());
    // Snap into a char boundary before slicing.
    let byte_col = (0..=byte_col)
        .rev()
        .find(|i| line.is_char_boundary(*i))
        .unwrap_or(0);
    let units = line[..byte_col].encode_utf16().count() as u64;
    Ok(Point {
        row: point.row,
        column: units,
    })
}

/// Thread-safe map of open documents.
#[derive(Default)]
pub struct DocumentStore {
    docs: RwLock<HashMap<Uri, Arc<Document>>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, uri: Uri, language_id: String, version: i32, text: String) {
        let doc = Arc::new(Document::new(uri.clone(), language_id, version, text));
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        docs.insert(uri, doc);
    }

    /// Apply a `didChange` batch in delivery order. The resulting document
    /// carries the notification's version. Unknown URIs are ignored.
    pub fn change(&self, uri: &Uri, version: i32, changes: Vec<TextDocumentContentChangeEvent>) {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        let Some(existing) = docs.get(uri) else {
            return;
        };
        let mut doc = (**existing).clone();
        for change in changes {
            doc.apply_change(change);
        }
        doc.version = version;
        docs.insert(uri.clone(), Arc::new(doc));
    }

    pub fn close(&self, uri: &Uri) {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        docs.remove(uri);
    }

    pub fn get(&self, uri: &Uri) -> Option<Arc<Document>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        docs.get(uri).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Document>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        docs.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn doc(text: &str) -> Document {
        Document::new(
            Uri::from_str("file:///test.css").unwrap(),
            "css".into(),
            1,
            text.into(),
        )
    }

    #[test]
    fn ascii_positions_round_trip() {
        let d = doc("abc\ndef\n");
        assert_eq!(d.offset_at(Position::new(1, 1)), 5);
        assert_eq!(d.position_at(5), Position::new(1, 1));
    }

    #[test]
    fn emoji_counts_two_utf16_units() {
        // 😀 is U+1F600: 4 UTF-8 bytes, 2 UTF-16 units.
        let d = doc("a😀b");
        assert_eq!(d.position_at(5), Position::new(0, 3));
        assert_eq!(d.offset_at(Position::new(0, 3)), 5);
    }

    #[test]
    fn cjk_counts_one_utf16_unit() {
        // 世 is U+4E16: 3 UTF-8 bytes, 1 UTF-16 unit.
        let d = doc("世界x");
        assert_eq!(d.position_at(6), Position::new(0, 2));
        assert_eq!(d.offset_at(Position::new(0, 2)), 6);
    }

    #[test]
    fn point_to_utf16_emoji_and_cjk() {
        let p = point_to_utf16("a😀b", Point { row: 0, column: 5 }).unwrap();
        assert_eq!(p.column, 3);
        let p = point_to_utf16("世x", Point { row: 0, column: 3 }).unwrap();
        assert_eq!(p.column, 1);
    }

    #[test]
    fn point_to_utf16_rejects_overflow() {
        let big = u32::MAX as u64 + 1;
        assert_eq!(
            point_to_utf16("x", Point { row: big, column: 0 }),
            Err(PointError::RowOverflow(big))
        );
        assert_eq!(
            point_to_utf16("x", Point { row: 0, column: big }),
            Err(PointError::ColumnOverflow(big))
        );
    }

    #[test]
    fn point_to_utf16_clamps_long_column() {
        let p = point_to_utf16("ab", Point { row: 0, column: 99 }).unwrap();
        assert_eq!(p.column, 2);
    }

    #[test]
    fn point_to_utf16_passes_through_missing_row() {
        let p = point_to_utf16("ab", Point { row: 7, column: 4 }).unwrap();
        assert_eq!(p, Point { row: 7, column: 4 });
    }

    #[test]
    fn incremental_changes_apply_in_order() {
        let store = DocumentStore::new();
        let uri = Uri::from_str("file:///a.css").unwrap();
        store.open(uri.clone(), "css".into(), 1, "abc".into());

        let edit = |range, text: &str| TextDocumentContentChangeEvent {
            range: Some(range),
            range_length: None,
            text: text.into(),
        };
        store.change(
            &uri,
            2,
            vec![
                edit(Range::new(Position::new(0, 1), Position::new(0, 2)), "X"),
                edit(Range::new(Position::new(0, 2), Position::new(0, 3)), "Y"),
            ],
        );
        let d = store.get(&uri).unwrap();
        assert_eq!(d.text, "aXY");
        assert_eq!(d.version, 2);
    }

    #[test]
    fn full_change_replaces_text() {
        let store = DocumentStore::new();
        let uri = Uri::from_str("file:///a.css").unwrap();
        store.open(uri.clone(), "css".into(), 1, "old".into());
        store.change(
            &uri,
            2,
            vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: "new".into(),
            }],
        );
        assert_eq!(store.get(&uri).unwrap().text, "new");
    }

    #[test]
    fn close_removes_document() {
        let store = DocumentStore::new();
        let uri = Uri::from_str("file:///a.css").unwrap();
        store.open(uri.clone(), "css".into(), 1, "x".into());
        store.close(&uri);
        assert!(store.get(&uri).is_none());
    }
}
