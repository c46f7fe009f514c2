//! Leaf parsers specialized on character classes.

use crate::parser::Parser;

fn take_while1(
    expected: &'static str,
    pred: fn(char) -> bool,
) -> Parser<String> {
    Parser::new_leaf(expected, move |state| {
        let len = {
            let rest = state.current_string();
            rest.chars()
                .take_while(|&ch| pred(ch))
                .map(char::len_utf8)
                .sum::<usize>()
        };
        if len == 0 {
            return (state.new_error(expected), String::new());
        }
        let output = state.current_string()[..len].to_string();
        (state.move_by(len), output)
    })
}

/// Parses one or more decimal digits.
///
/// ```
/// use mend::{digit1, State};
///
/// let (state, out) = digit1().parse(State::new_from_string("123abc"));
/// assert!(!state.failed());
/// assert_eq!(out, "123");
/// assert_eq!(state.current_string(), "abc");
/// ```
pub fn digit1() -> Parser<String> {
    take_while1("digit", |ch| ch.is_ascii_digit())
}

/// Parses one or more letters.
///
/// ```
/// use mend::{alpha1, State};
///
/// let (state, out) = alpha1().parse(State::new_from_string("abc123"));
/// assert!(!state.failed());
/// assert_eq!(out, "abc");
/// assert!(alpha1().parse(State::new_from_string("123")).0.failed());
/// ```
pub fn alpha1() -> Parser<String> {
    take_while1("letter", char::is_alphabetic)
}
