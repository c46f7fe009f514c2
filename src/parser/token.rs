//! Leaf parsers matching single runes and literal strings.

use crate::parser::Parser;

/// Parses a single rune satisfying `pred`, described by `expected` in error
/// messages.
///
/// ```
/// use mend::{satisfy, State};
///
/// let parser = satisfy("vowel", |ch| "aeiou".contains(ch));
/// let (state, out) = parser.parse(State::new_from_string("end"));
/// assert!(!state.failed());
/// assert_eq!(out, 'e');
/// ```
pub fn satisfy(expected: &'static str, pred: impl Fn(char) -> bool + 'static) -> Parser<char> {
    Parser::new_leaf(expected, move |state| {
        let next = state.current_string().chars().next();
        match next {
            Some(ch) if pred(ch) => (state.move_by(ch.len_utf8()), ch),
            _ => (state.new_error(expected), char::default()),
        }
    })
}

/// Parses the single rune `expected`.
///
/// ```
/// use mend::{token, State};
///
/// let (state, out) = token(',').parse(State::new_from_string(",x"));
/// assert!(!state.failed());
/// assert_eq!(out, ',');
/// assert!(token(',').parse(State::new_from_string("x")).0.failed());
/// ```
pub fn token(expected: char) -> Parser<char> {
    let description = format!("'{}'", expected);
    let message = description.clone();
    Parser::new_leaf(description, move |state| {
        if state.current_string().starts_with(expected) {
            (state.move_by(expected.len_utf8()), expected)
        } else {
            (state.new_error(&message), char::default())
        }
    })
}

/// Parses the literal string `expected`.
///
/// ```
/// use mend::{string, State};
///
/// let (state, out) = string("let").parse(State::new_from_string("let x"));
/// assert!(!state.failed());
/// assert_eq!(out, "let");
/// assert_eq!(state.current_string(), " x");
/// ```
pub fn string(expected: &'static str) -> Parser<String> {
    let message = format!("{:?}", expected);
    Parser::new_leaf(message.clone(), move |state| {
        if state.current_string().starts_with(expected) {
            (state.move_by(expected.len()), expected.to_string())
        } else {
            (state.new_error(&message), String::new())
        }
    })
}
