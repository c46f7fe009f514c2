//! Combinators which apply a parser repeatedly.

use std::rc::Rc;

use log::trace;

use crate::parser::choice::optional;
use crate::parser::sequence::{map2, preceded};
use crate::parser::Parser;
use crate::recover::{default_recoverer, handle_witness, i_witnessed};
use crate::state::{ParsingMode, State};
use crate::{new_branch_parser_id, Ternary, LOG_TARGET};

struct Many0<O> {
    id: u64,
    /// singleton list so the witness protocol can dispatch by index
    children: Vec<Parser<O>>,
}

impl<O: Clone + Default + 'static> Many0<O> {
    fn parse(&self, state: State) -> (State, Vec<O>) {
        match state.parsing_mode() {
            ParsingMode::Happy => {
                let remaining = state.clone();
                self.run_happy(state, remaining, Vec::new())
            }
            ParsingMode::Error => self.run_error(state),
            ParsingMode::Handle | ParsingMode::Rewind => self.run_handle(state),
            ParsingMode::Escape => self.run_escape(state),
        }
    }

    /// Repeats the child until it fails plainly. A committed failure (the
    /// child crossed a save spot before failing) is claimed and either
    /// handled here or propagated; the repetition never swallows it.
    fn run_happy(
        &self,
        state: State,
        mut remaining: State,
        mut outputs: Vec<O>,
    ) -> (State, Vec<O>) {
        let parser = &self.children[0];
        loop {
            if remaining.at_end() {
                return (remaining, outputs);
            }
            let before = remaining.clone();
            let (sub, out) = parser.parse(remaining);
            if sub.failed() {
                if sub.parsing_mode() == ParsingMode::Error && !before.save_spot_moved(&sub) {
                    // a plain failure just ends the repetition
                    return (before.succeed(&sub), outputs);
                }
                let committed = before.save_spot_moved(&sub);
                let ss_start = committed.then(|| state.byte_count(&before));
                state.cache_parser_result(
                    self.id,
                    0,
                    0,
                    ss_start,
                    &sub,
                    Some(Rc::new(outputs.clone())),
                );
                let culprit_start = before.current_pos();
                let claimed = i_witnessed(state, self.id, 0, culprit_start, &sub);
                if claimed.recovering() && committed {
                    trace!(
                        target: LOG_TARGET,
                        "repetition {} handles committed failure locally",
                        self.id,
                    );
                    return self.run_error(claimed);
                }
                return (claimed, Vec::new());
            }
            if !before.moved(&sub) {
                // no progress; stop instead of spinning forever
                return (sub, outputs);
            }
            outputs.push(out);
            remaining = sub;
        }
    }

    fn run_error(&self, state: State) -> (State, Vec<O>) {
        let result = match state.cached_parser_result(self.id) {
            Some(result) => result,
            None => {
                return (
                    state.new_semantic_error(
                        "grammar error: cache was empty in repeat parser (mode `error`)",
                    ),
                    Vec::new(),
                )
            }
        };
        let ss_start = match result.save_spot_start {
            Some(ss_start) => ss_start,
            None => return (state, Vec::new()),
        };
        let child = &self.children[0];
        let (sub, _) = child.parse(state.clone().move_by(ss_start));
        if sub.parsing_mode() != ParsingMode::Handle {
            return (
                state.new_semantic_error(format!(
                    "programming error: sub-parser (expected {:?}) didn't switch to parsing \
                     mode `handle` but `{}`",
                    child.expected(),
                    sub.parsing_mode()
                )),
                Vec::new(),
            );
        }
        if result.failed() {
            self.run_handle(state.preserve(&sub))
        } else {
            (state.preserve(&sub), Vec::new())
        }
    }

    fn run_handle(&self, state: State) -> (State, Vec<O>) {
        let result = match state.cached_parser_result(self.id) {
            Some(result) => result,
            None => {
                let mode = state.parsing_mode();
                return (
                    state.new_semantic_error(format!(
                        "grammar error: cache was empty in repeat parser (mode `{}`)",
                        mode
                    )),
                    Vec::new(),
                )
            }
        };
        if !result.failed() {
            return (state, Vec::new());
        }
        let mut outputs: Vec<O> = result
            .output
            .as_ref()
            .and_then(|rc| rc.downcast_ref::<Vec<O>>())
            .cloned()
            .unwrap_or_default();
        let culprit_state = state.clone().move_by(result.error_start);
        let (sub, out) = handle_witness(culprit_state, self.id, 0, &self.children);
        match sub.parsing_mode() {
            ParsingMode::Happy => {
                outputs.push(out);
                self.run_happy(state, sub, outputs)
            }
            _ => (state.preserve(&sub), Vec::new()),
        }
    }

    fn run_escape(&self, state: State) -> (State, Vec<O>) {
        let child = &self.children[0];
        if child.contains_save_spot() == Ternary::No {
            return (state, Vec::new());
        }
        let (sub, out) = child.parse(state.clone());
        if sub.parsing_mode() == ParsingMode::Happy {
            return self.run_happy(state, sub, vec![out]);
        }
        (state.preserve(&sub), Vec::new())
    }
}

/// Applies the parser zero or more times, collecting the outputs. A plain
/// failure ends the repetition; a failure after crossing a save spot
/// propagates.
///
/// ```
/// use mend::{many0, token, State};
///
/// let parser = many0(token('a'));
/// let (state, out) = parser.parse(State::new_from_string("aab"));
/// assert!(!state.failed());
/// assert_eq!(out, vec!['a', 'a']);
/// assert_eq!(state.current_string(), "b");
/// ```
pub fn many0<O: Clone + Default + 'static>(parser: Parser<O>) -> Parser<Vec<O>> {
    let expected = format!("{}*", parser.expected());
    let contains = match parser.contains_save_spot() {
        Ternary::No => Ternary::No,
        // zero repetitions may skip the save spot entirely
        _ => Ternary::Maybe,
    };
    let save_spot_recoverer = parser.save_spot_recoverer_fn();
    let possible_witness = true;
    let many = Rc::new(Many0 {
        id: new_branch_parser_id(),
        children: vec![parser],
    });
    let mut result = Parser::new(
        expected,
        move |state: State| many.parse(state),
        possible_witness,
        None,
        contains,
        save_spot_recoverer,
    );
    result.recoverer = Some(default_recoverer(result.clone()));
    result
}

/// Parses a possibly empty list of `parser` separated by `separator`,
/// optionally accepting a trailing separator. Built from the sequence,
/// repetition and optional combinators, so commit semantics carry over: a
/// save-spot failure inside an element is not swallowed.
///
/// ```
/// use mend::{digit1, separated0, token, State};
///
/// let parser = separated0(digit1(), token(','), false);
/// let (state, out) = parser.parse(State::new_from_string("1,2,3"));
/// assert!(!state.failed());
/// assert_eq!(out, vec!["1", "2", "3"]);
/// ```
pub fn separated0<O, S>(
    parser: Parser<O>,
    separator: Parser<S>,
    parse_separator_at_end: bool,
) -> Parser<Vec<O>>
where
    O: Clone + Default + 'static,
    S: Clone + Default + 'static,
{
    let tail = many0(preceded(separator.clone(), parser.clone()));
    let list = map2(parser, tail, |first, mut rest| {
        rest.insert(0, first);
        Ok(rest)
    });
    let list = if parse_separator_at_end {
        map2(list, optional(separator), |list, _| Ok(list))
    } else {
        list
    };
    optional(list)
}
