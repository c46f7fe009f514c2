//! The input cursor: position tracking over a shared text or binary buffer.
//!
//! The cursor is a cheap value; the underlying buffer is shared by reference
//! between all cursors spawned during one parse and is never mutated.

use std::borrow::Cow;
use std::rc::Rc;

use memchr::{memchr, memchr_iter, memrchr};

#[derive(Clone)]
enum Buffer {
    Text(Rc<str>),
    Binary(Rc<[u8]>),
}

/// Position in a complete in-memory input.
///
/// `line_start` is the byte offset of the first byte of the line containing
/// the last committed position and `line` is its 1-based line number; both
/// are only maintained for text input. Invariants: `pos <= n` and
/// `line_start <= pos`.
#[derive(Clone)]
pub(crate) struct Input {
    buffer: Buffer,
    pub(crate) pos: usize,
    pub(crate) n: usize,
    line_start: usize,
    line: usize,
}

impl Input {
    pub(crate) fn from_str(text: &str) -> Self {
        Input {
            n: text.len(),
            buffer: Buffer::Text(Rc::from(text)),
            pos: 0,
            line_start: 0,
            line: 1,
        }
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        Input {
            n: bytes.len(),
            buffer: Buffer::Binary(Rc::from(bytes)),
            pos: 0,
            line_start: 0,
            line: 1,
        }
    }

    pub(crate) fn is_binary(&self) -> bool {
        matches!(self.buffer, Buffer::Binary(_))
    }

    /// The whole underlying buffer as bytes.
    pub(crate) fn bytes(&self) -> &[u8] {
        match &self.buffer {
            Buffer::Text(s) => s.as_bytes(),
            Buffer::Binary(b) => b,
        }
    }

    /// The whole underlying buffer as text, materialized on demand for
    /// binary input.
    pub(crate) fn text(&self) -> Cow<'_, str> {
        match &self.buffer {
            Buffer::Text(s) => Cow::Borrowed(s),
            Buffer::Binary(b) => String::from_utf8_lossy(b),
        }
    }

    pub(crate) fn rest_str(&self) -> Cow<'_, str> {
        match &self.buffer {
            Buffer::Text(s) => Cow::Borrowed(&s[self.pos..]),
            Buffer::Binary(b) => String::from_utf8_lossy(&b[self.pos..]),
        }
    }

    pub(crate) fn rest_bytes(&self) -> &[u8] {
        &self.bytes()[self.pos..]
    }

    /// Moves the cursor forward by `count` bytes, clamped to the end of the
    /// input, keeping the line bookkeeping in sync for text input.
    pub(crate) fn move_by(&mut self, count: usize) {
        let start = self.pos;
        self.pos = self.n.min(start + count);
        if !self.is_binary() {
            let (last_nl, newlines) = {
                let moved = &self.bytes()[start..self.pos];
                (memrchr(b'\n', moved), memchr_iter(b'\n', moved).count())
            };
            if let Some(last_nl) = last_nl {
                self.line += newlines;
                self.line_start = start + last_nl + 1;
            }
        }
    }

    /// Jumps to an absolute position. Backward jumps recompute the line
    /// bookkeeping from the start of the buffer.
    pub(crate) fn move_to(&mut self, pos: usize) {
        let pos = pos.min(self.n);
        if pos >= self.pos {
            self.move_by(pos - self.pos);
            return;
        }
        self.pos = 0;
        self.line_start = 0;
        self.line = 1;
        self.move_by(pos);
    }

    /// Resolves `pos` to `(line, column, source line)` for text input.
    /// `column` is a 0-based byte offset within the returned line. Scans
    /// forward or backward from the tracked line start, whichever is
    /// shorter.
    pub(crate) fn text_around(&self, pos: usize) -> (usize, usize, String) {
        let pos = pos.min(self.n);
        let text = self.text();
        if text.is_empty() {
            return (1, 0, String::new());
        }
        if pos >= self.line_start {
            self.scan_forward(&text, pos, self.line, self.line_start)
        } else if 2 * pos < self.line_start {
            self.scan_forward(&text, pos, 1, 0)
        } else {
            self.scan_backward(&text, pos, self.line, self.line_start)
        }
    }

    fn scan_forward(
        &self,
        text: &str,
        pos: usize,
        mut line: usize,
        mut line_start: usize,
    ) -> (usize, usize, String) {
        let bytes = text.as_bytes();
        loop {
            let next_nl = memchr(b'\n', &bytes[line_start..])
                .map(|i| line_start + i)
                .unwrap_or(text.len());
            if pos <= next_nl {
                return (line, pos - line_start, text[line_start..next_nl].to_string());
            }
            line_start = next_nl + 1;
            line += 1;
        }
    }

    fn scan_backward(
        &self,
        text: &str,
        pos: usize,
        mut line: usize,
        line_start: usize,
    ) -> (usize, usize, String) {
        let bytes = text.as_bytes();
        // the newline terminating the line before the tracked one
        let mut next_nl = line_start - 1;
        loop {
            let start = memrchr(b'\n', &bytes[..next_nl]).map(|i| i + 1).unwrap_or(0);
            line -= 1;
            if start <= pos && pos <= next_nl {
                return (line, pos - start, text[start..next_nl].to_string());
            }
            if start == 0 {
                return (1, 0, String::new());
            }
            next_nl = start - 1;
        }
    }

    /// A 16-byte window around `pos` for binary input, rendered with the
    /// position marker already inserted. Returns
    /// `(window start, offset within window, marked window)`.
    pub(crate) fn bytes_around(&self, pos: usize) -> (usize, usize, String) {
        let pos = pos.min(self.n);
        let mut start = pos.saturating_sub(8);
        let end = self.n.min(start + 16);
        if end - start < 16 {
            start = end.saturating_sub(16);
        }
        let window = &self.bytes()[start..end];
        let at = pos - start;
        let mut marked = String::new();
        for (i, b) in window.iter().enumerate() {
            if i == at {
                marked.push('\u{25B6}');
            }
            marked.extend(b.escape_ascii().map(char::from));
        }
        if at == window.len() {
            marked.push('\u{25B6}');
        }
        (start, at, marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_by_tracks_lines() {
        let mut input = Input::from_str("one\ntwo\nthree");
        input.move_by(4);
        assert_eq!(input.pos, 4);
        assert_eq!(input.line, 2);
        assert_eq!(input.line_start, 4);
        input.move_by(100);
        assert_eq!(input.pos, 13);
        assert_eq!(input.line, 3);
        assert_eq!(input.line_start, 8);
    }

    #[test]
    fn text_around_scans_forward() {
        let input = Input::from_str("one\ntwo\nthree");
        assert_eq!(input.text_around(5), (2, 1, "two".to_string()));
        assert_eq!(input.text_around(12), (3, 4, "three".to_string()));
    }

    #[test]
    fn text_around_scans_backward() {
        let mut input = Input::from_str("one\ntwo\nthree");
        input.move_by(9);
        assert_eq!(input.line, 3);
        assert_eq!(input.text_around(5), (2, 1, "two".to_string()));
        assert_eq!(input.text_around(0), (1, 0, "one".to_string()));
    }

    #[test]
    fn text_around_on_newline_belongs_to_its_line() {
        let input = Input::from_str("ab\ncd");
        assert_eq!(input.text_around(2), (1, 2, "ab".to_string()));
    }

    #[test]
    fn bytes_around_clamps_window() {
        let input = Input::from_bytes(b"0123456789abcdefghij");
        let (start, at, marked) = input.bytes_around(2);
        assert_eq!((start, at), (0, 2));
        assert!(marked.starts_with("01\u{25B6}23"));
        let (start, at, _) = input.bytes_around(19);
        assert_eq!((start, at), (4, 15));
    }
}
