//! Offset to position conversion.
//!
//! Offsets are UTF-8 byte offsets; positions are zero-based lines and
//! UTF-16 columns, as LSP clients expect. `\n`, `\r\n` and a lone `\r` all
//! end a line.

use lsp_types::Position;

use crate::DomError;

/// Start offset of every line, built once per document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    line_starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let bytes = text.as_bytes();
        let mut line_starts = vec![0];
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\r' if bytes.get(i + 1) == Some(&b'\n') => {
                    line_starts.push(i + 2);
                    i += 2;
                    continue;
                }
                b'\r' | b'\n' => line_starts.push(i + 1),
                _ => {}
            }
            i += 1;
        }
        Self {
            line_starts,
            len: text.len(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Start offset of a line.
    pub fn line_start(&self, line: usize) -> Option<usize> {
        self.line_starts.get(line).copied()
    }

    /// Zero-based line containing `offset`.
    pub fn line_of(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= offset) - 1
    }

    pub fn position_at(&self, text: &str, offset: usize) -> Result<Position, DomError> {
        if offset > self.len {
            return Err(DomError::OffsetOutOfRange {
                offset,
                len: self.len,
            });
        }
        let mut offset = offset;
        while !text.is_char_boundary(offset) {
            offset -= 1;
        }
        let line = self.line_of(offset);
        let line_start = self.line_starts[line];
        let character = text[line_start..offset].encode_utf16().count();
        Ok(Position::new(line as u32, character as u32))
    }

    /// Offset of a position. A column past the end of its line is clamped to
    /// the line end, per LSP.
    pub fn offset_at(&self, text: &str, position: Position) -> Result<usize, DomError> {
        let line = position.line as usize;
        let Some(&line_start) = self.line_starts.get(line) else {
            return Err(DomError::LineOutOfRange {
                line,
                line_count: self.line_count(),
            });
        };
        let line_end = self.content_end(text, line);
        let mut remaining = position.character as usize;
        let mut offset = line_start;
        for c in text[line_start..line_end].chars() {
            if remaining == 0 {
                break;
            }
            remaining = remaining.saturating_sub(c.len_utf16());
            offset += c.len_utf8();
        }
        Ok(offset)
    }

    /// End of a line's content, before its terminator.
    fn content_end(&self, text: &str, line: usize) -> usize {
        let Some(&next) = self.line_starts.get(line + 1) else {
            return self.len;
        };
        let bytes = text.as_bytes();
        let mut end = next;
        if end > 0 && bytes[end - 1] == b'\n' {
            end -= 1;
        }
        if end > 0 && bytes[end - 1] == b'\r' {
            end -= 1;
        }
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pos(line: u32, character: u32) -> Position {
        Position::new(line, character)
    }

    #[test]
    fn test_single_line() {
        let text = "<a/>";
        let index = LineIndex::new(text);
        assert_eq!(index.line_count(), 1);
        assert_eq!(index.position_at(text, 0).unwrap(), pos(0, 0));
        assert_eq!(index.position_at(text, 4).unwrap(), pos(0, 4));
    }

    #[test]
    fn test_line_endings() {
        let text = "a\nb\r\nc\rd";
        let index = LineIndex::new(text);
        assert_eq!(index.line_count(), 4);
        assert_eq!(index.position_at(text, 2).unwrap(), pos(1, 0));
        assert_eq!(index.position_at(text, 5).unwrap(), pos(2, 0));
        assert_eq!(index.position_at(text, 7).unwrap(), pos(3, 0));
        assert_eq!(index.offset_at(text, pos(2, 0)).unwrap(), 5);
        assert_eq!(index.offset_at(text, pos(3, 1)).unwrap(), 8);
    }

    #[test]
    fn test_trailing_newline_starts_empty_line() {
        let text = "a\n";
        let index = LineIndex::new(text);
        assert_eq!(index.line_count(), 2);
        assert_eq!(index.position_at(text, 2).unwrap(), pos(1, 0));
    }

    #[test]
    fn test_utf16_columns() {
        let text = "é𝄞x";
        let index = LineIndex::new(text);
        // é is one UTF-16 unit, 𝄞 is two.
        assert_eq!(index.position_at(text, 2).unwrap(), pos(0, 1));
        assert_eq!(index.position_at(text, 6).unwrap(), pos(0, 3));
        assert_eq!(index.offset_at(text, pos(0, 3)).unwrap(), 6);
    }

    #[test]
    fn test_offset_out_of_range() {
        let text = "abc";
        let index = LineIndex::new(text);
        assert_eq!(
            index.position_at(text, 4),
            Err(DomError::OffsetOutOfRange { offset: 4, len: 3 })
        );
    }

    #[test]
    fn test_column_clamped_to_line_end() {
        let text = "ab\r\ncd";
        let index = LineIndex::new(text);
        assert_eq!(index.offset_at(text, pos(0, 99)).unwrap(), 2);
        assert_eq!(index.offset_at(text, pos(1, 99)).unwrap(), 6);
    }

    #[test]
    fn test_line_out_of_range() {
        let text = "ab";
        let index = LineIndex::new(text);
        assert_eq!(
            index.offset_at(text, pos(1, 0)),
            Err(DomError::LineOutOfRange {
                line: 1,
                line_count: 1
            })
        );
    }

    #[test]
    fn test_roundtrip_every_offset() {
        let text = "<a>\r\n  <b>é</b>\n</a>\r";
        let index = LineIndex::new(text);
        for (offset, c) in text.char_indices() {
            // The middle of a \r\n pair has no position of its own.
            if c == '\n' && text[..offset].ends_with('\r') {
                continue;
            }
            let position = index.position_at(text, offset).unwrap();
            assert_eq!(index.offset_at(text, position).unwrap(), offset);
        }
    }
}
