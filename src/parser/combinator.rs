//! Wrapper combinators: commitment marks and late-bound parsers.

use once_cell::unsync::OnceCell;
use std::rc::Rc;

use log::trace;

use crate::parser::Parser;
use crate::recover::{caching_recoverer, default_recoverer, handle_witness, i_witnessed};
use crate::state::{ParsingMode, State};
use crate::{new_branch_parser_id, new_call_id, Ternary, LOG_TARGET};

/// Moves the save-spot mark to the end of a successful run and empties the
/// caches: the input before the mark is never visited again.
fn mark_and_clear(mut sub: State) -> State {
    sub.save_spot = sub.save_spot.max(Some(sub.current_pos()));
    sub.clear_all_caches()
}

/// Marks a commitment point: once the wrapped parser has succeeded, no
/// parser may backtrack to before its end anymore — alternatives and
/// optional branches fail hard instead. During recovery the save spot is
/// also the synchronization anchor the error mode searches for.
///
/// ```
/// use mend::{alpha1, digit1, first_successful, save_spot, State};
///
/// // without the save spot the second alternative would match "abc"
/// let parser = first_successful(vec![save_spot(digit1()), alpha1()]);
/// let (state, out) = parser.parse(State::new_from_string("abc"));
/// assert!(!state.failed());
/// assert_eq!(out, "abc");
/// ```
pub fn save_spot<O: Clone + Default + 'static>(parser: Parser<O>) -> Parser<O> {
    let id = new_branch_parser_id();
    let recoverer = caching_recoverer(
        parser
            .recoverer_fn()
            .unwrap_or_else(|| default_recoverer(parser.clone())),
    );
    let children = vec![parser.clone()];
    let escape_recoverer = recoverer.clone();
    let mut result = Parser::new(
        parser.expected().to_string(),
        move |state: State| {
            let inner = &children[0];
            match state.parsing_mode() {
                ParsingMode::Happy => {
                    let start = state.clone();
                    let (sub, out) = inner.parse(state);
                    if sub.failed() {
                        let culprit_start = start.current_pos();
                        return (i_witnessed(start, id, 0, culprit_start, &sub), O::default());
                    }
                    (mark_and_clear(sub), out)
                }
                ParsingMode::Error => {
                    // we are the save spot the error mode was looking for
                    let mut state = state;
                    state.mode = ParsingMode::Handle;
                    (state, O::default())
                }
                ParsingMode::Handle | ParsingMode::Rewind => {
                    let (sub, out) = handle_witness(state, id, 0, &children);
                    if !sub.failed() && sub.parsing_mode() == ParsingMode::Happy {
                        return (mark_and_clear(sub).release_claim(id), out);
                    }
                    (sub, out)
                }
                ParsingMode::Escape => match escape_recoverer(&state) {
                    // unrecoverable here, let an ancestor try
                    None => (state, O::default()),
                    Some(waste) => {
                        trace!(
                            target: LOG_TARGET,
                            "save spot {} skips {} bytes to resynchronize at {}",
                            id,
                            waste,
                            state.current_pos() + waste,
                        );
                        let mut state = state.move_by(waste).accumulate_current_error();
                        state.mode = ParsingMode::Happy;
                        let (sub, out) = inner.parse(state);
                        if sub.failed() {
                            return (sub, O::default());
                        }
                        (mark_and_clear(sub).release_claim(id), out)
                    }
                },
            }
        },
        true,
        None,
        Ternary::Yes,
        Some(recoverer),
    );
    result.recoverer = Some(default_recoverer(result.clone()));
    result
}

/// A late-bound parser slot for closing grammar cycles: the builder runs
/// once, on first use. Re-entering the same slot at the same input position
/// means the grammar loops without consuming; that is reported as an error
/// instead of recursing forever.
///
/// ```
/// use mend::{digit1, first_successful, lazy, map2, token, Parser, State};
///
/// fn parens() -> Parser<String> {
///     first_successful(vec![
///         map2(token('('), lazy(parens), |_, inner| Ok(format!("({}", inner))),
///         digit1(),
///     ])
/// }
///
/// let (state, out) = parens().parse(State::new_from_string("((7"));
/// assert!(!state.failed());
/// assert_eq!(out, "((7");
/// ```
pub fn lazy<O, F>(builder: F) -> Parser<O>
where
    O: Clone + Default + 'static,
    F: Fn() -> Parser<O> + 'static,
{
    let call_id = new_call_id();
    let cell: Rc<OnceCell<Parser<O>>> = Rc::new(OnceCell::new());
    Parser::new(
        "recursive parser",
        move |state: State| {
            let parser = cell.get_or_init(&builder);
            if state.cached_output(call_id).is_some() {
                let state = state.new_semantic_error(
                    "grammar error: endless loop detected in recursive parser",
                );
                return (state, O::default());
            }
            state.cache_output(call_id, None);
            let entry = state.clone();
            let (sub, out) = parser.parse(state);
            entry.purge_output(call_id);
            (sub, out)
        },
        true,
        None,
        Ternary::Maybe,
        None,
    )
}
