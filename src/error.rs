//! Structured parser errors and their rendering.
//!
//! A [`ParserError`] records the message together with enough of the input
//! context (position, line, column, source line) to render a diagnostic
//! without going back to the input. Accumulated diagnostics of one run are
//! returned as a single [`ParseErrors`] value.

use std::error::Error as StdError;
use std::fmt;

/// A single parser diagnostic.
///
/// `col` is the 0-based byte offset within `src_line`; it is converted to a
/// 1-based rune index only when rendering. For binary input `line` and `col`
/// hold the window start and the offset within the window instead, and
/// `src_line` is the pre-marked 16-byte window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParserError {
    pub(crate) text: String,
    pub(crate) pos: usize,
    pub(crate) line: usize,
    pub(crate) col: usize,
    pub(crate) src_line: String,
    pub(crate) binary: bool,
}

impl ParserError {
    /// The plain message, without position or source-line context.
    pub fn message(&self) -> &str {
        &self.text
    }

    /// Byte position in the input at which the error occurred.
    pub fn pos(&self) -> usize {
        self.pos
    }
}

impl fmt::Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)?;
        if self.binary {
            write!(f, " [{}:{}] {:?}", self.line, self.col, self.src_line)
        } else {
            let marked = format!(
                "{}\u{25B6}{}",
                &self.src_line[..self.col],
                &self.src_line[self.col..]
            );
            // columns for the user start at 1 and count runes, not bytes
            let col = self.src_line[..self.col].chars().count() + 1;
            write!(f, " [{}:{}] {:?}", self.line, col, marked)
        }
    }
}

impl StdError for ParserError {}

/// All diagnostics accumulated by one parse, in input order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseErrors(pub(crate) Vec<ParserError>);

impl ParseErrors {
    pub fn iter(&self) -> impl Iterator<Item = &ParserError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ParseErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl StdError for ParseErrors {}

/// The coordinates with which a branch parser claimed a failure for retry.
/// Acts as a one-shot lock: once set, ancestors leave the error alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct WitnessClaim {
    /// construction-time ID of the claiming branch parser
    pub(crate) id: u64,
    /// input position at which the culprit sub-parser was invoked
    pub(crate) pos: usize,
    /// which child of the claiming parser caused the error
    pub(crate) culprit_idx: usize,
    /// position of the claimed error, used to tell a re-failure of the
    /// handled region from a genuinely new error
    pub(crate) err_pos: usize,
}

/// Everything needed for handling one error. At most one error is live at a
/// time; handled ones move to the state's accumulated list.
#[derive(Clone, Debug, Default)]
pub(crate) struct ErrHand {
    pub(crate) err: Option<ParserError>,
    pub(crate) claim: Option<WitnessClaim>,
    /// how many delete steps the current retry uses
    pub(crate) cur_del: usize,
    /// true once the witness has given up re-parsing the culprit and steps
    /// past it with a zero output instead
    pub(crate) ignore_err_parser: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(text: &str, col: usize, src_line: &str) -> ParserError {
        ParserError {
            text: text.to_string(),
            pos: col,
            line: 1,
            col,
            src_line: src_line.to_string(),
            binary: false,
        }
    }

    #[test]
    fn display_marks_the_column() {
        let e = err("expected digit", 2, "ab12");
        assert_eq!(e.to_string(), "expected digit [1:3] \"ab\u{25B6}12\"");
    }

    #[test]
    fn display_counts_runes_not_bytes() {
        let e = ParserError {
            text: "expected digit".to_string(),
            pos: 4,
            line: 1,
            col: 4,
            src_line: "äö12".to_string(),
            binary: false,
        };
        assert_eq!(e.to_string(), "expected digit [1:3] \"äö\u{25B6}12\"");
    }

    #[test]
    fn errors_join_with_newlines() {
        let all = ParseErrors(vec![err("expected a", 0, "xy"), err("expected b", 1, "xy")]);
        let rendered = all.to_string();
        assert_eq!(rendered.lines().count(), 2);
        assert!(rendered.contains("expected a"));
        assert!(rendered.contains("expected b"));
    }
}
