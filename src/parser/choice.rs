//! Combinators which take one or more parsers and attempt to parse
//! successfully with at least one of them.

use std::rc::Rc;

use log::trace;

use crate::parser::{downcast, Parser};
use crate::recover::{default_recoverer, handle_witness, i_witnessed, CombiningRecoverer, Recoverer};
use crate::state::{ParsingMode, State};
use crate::{new_branch_parser_id, Ternary, LOG_TARGET};

struct Choice<O> {
    id: u64,
    parsers: Vec<Parser<O>>,
    save_spot_recoverer: CombiningRecoverer,
}

impl<O: Clone + Default + 'static> Choice<O> {
    fn parse(&self, state: State) -> (State, O) {
        match state.parsing_mode() {
            ParsingMode::Happy => self.run_happy(state),
            ParsingMode::Error => self.run_error(state),
            ParsingMode::Handle | ParsingMode::Rewind => self.run_handle(state),
            ParsingMode::Escape => self.run_escape(state),
        }
    }

    fn run_happy(&self, state: State) -> (State, O) {
        if let Some(result) = state.cached_parser_result(self.id) {
            if result.failed() {
                return match result.error.clone() {
                    Some(err) => (state.error_again(err), O::default()),
                    None => (
                        state.new_semantic_error(
                            "programming error: cached failure without an error",
                        ),
                        O::default(),
                    ),
                };
            }
            let output = downcast::<O>(&result.output);
            return (state.succeed_again(&result), output);
        }

        // remember the failure that got furthest; ties favor the first
        let mut best: Option<(usize, State)> = None;
        for (i, parser) in self.parsers.iter().enumerate() {
            let (sub, out) = parser.parse(state.clone());
            if !sub.failed() {
                let ss_start = state.save_spot_moved(&sub).then_some(0);
                state.cache_parser_result(
                    self.id,
                    i,
                    i,
                    ss_start,
                    &sub,
                    Some(Rc::new(out.clone())),
                );
                return (sub.release_claim(self.id), out);
            }
            if state.save_spot_moved(&sub) || sub.parsing_mode() != ParsingMode::Error {
                // the failed alternative committed: no fallback allowed
                let ss_start = state.save_spot_moved(&sub).then_some(0);
                state.cache_parser_result(self.id, i, i, ss_start, &sub, None);
                let culprit_start = state.current_pos();
                let claimed = i_witnessed(state, self.id, i, culprit_start, &sub);
                if claimed.recovering() && ss_start.is_some() {
                    trace!(
                        target: LOG_TARGET,
                        "choice {} handles committed failure of alternative {} locally",
                        self.id,
                        i,
                    );
                    return self.run_error(claimed);
                }
                return (claimed, O::default());
            }
            let sub_pos = sub.current_error().map_or(0, |err| err.pos());
            let best_pos = best
                .as_ref()
                .and_then(|(_, b)| b.current_error())
                .map_or(0, |err| err.pos());
            if best.is_none() || sub_pos > best_pos {
                best = Some((i, sub));
            }
        }

        let (best_idx, err_state) = match best {
            Some(best) => best,
            None => {
                return (
                    state.new_semantic_error("programming error: choice without alternatives"),
                    O::default(),
                )
            }
        };
        state.cache_parser_result(self.id, best_idx, 0, None, &err_state, None);
        let culprit_start = state.current_pos();
        (
            i_witnessed(state, self.id, best_idx, culprit_start, &err_state),
            O::default(),
        )
    }

    fn run_error(&self, state: State) -> (State, O) {
        let result = match state.cached_parser_result(self.id) {
            Some(result) => result,
            None => {
                return (
                    state.new_semantic_error(
                        "grammar error: cache was empty in choice parser (mode `error`)",
                    ),
                    O::default(),
                )
            }
        };
        let ss_start = match result.save_spot_start {
            Some(ss_start) => ss_start,
            None => return (state, O::default()),
        };
        let child = &self.parsers[result.save_spot_idx];
        let (sub, _) = child.parse(state.clone().move_by(ss_start));
        if sub.parsing_mode() != ParsingMode::Handle {
            return (
                state.new_semantic_error(format!(
                    "programming error: sub-parser (index {}, expected {:?}) didn't switch to \
                     parsing mode `handle` but `{}`",
                    result.save_spot_idx,
                    child.expected(),
                    sub.parsing_mode()
                )),
                O::default(),
            );
        }
        if result.failed() {
            self.run_handle(state.preserve(&sub))
        } else {
            (state.preserve(&sub), O::default())
        }
    }

    fn run_handle(&self, state: State) -> (State, O) {
        let result = match state.cached_parser_result(self.id) {
            Some(result) => result,
            None => {
                let mode = state.parsing_mode();
                return (
                    state.new_semantic_error(format!(
                        "grammar error: cache was empty in choice parser (mode `{}`)",
                        mode
                    )),
                    O::default(),
                )
            }
        };
        if !result.failed() {
            return (state, O::default());
        }
        let culprit_state = state.clone().move_by(result.error_start);
        let (sub, out) = handle_witness(culprit_state, self.id, result.idx, &self.parsers);
        match sub.parsing_mode() {
            ParsingMode::Happy => (sub.release_claim(self.id), out),
            ParsingMode::Escape => self.run_escape(state.preserve(&sub)),
            _ => (state.preserve(&sub), O::default()),
        }
    }

    fn run_escape(&self, state: State) -> (State, O) {
        let idx = match self.save_spot_recoverer.cached_index(&state) {
            Some(idx) => Some(idx),
            None => {
                self.save_spot_recoverer.recover(&state);
                self.save_spot_recoverer.last_index()
            }
        };
        let idx = match idx {
            Some(idx) => idx,
            None => {
                let sub = state.clone().new_semantic_error(
                    "grammar error: no recoverer found in choice parser (mode `escape`)",
                );
                return (state.preserve(&sub), O::default());
            }
        };
        let (sub, out) = self.parsers[idx].parse(state.clone());
        if sub.parsing_mode() == ParsingMode::Happy {
            return (sub.release_claim(self.id), out);
        }
        (state.preserve(&sub), O::default())
    }
}

/// Tries the alternatives in order and returns the output of the first one
/// that succeeds. An alternative that fails after crossing a save spot
/// commits the choice: no later alternative is tried.
///
/// ```
/// use mend::{alpha1, digit1, first_successful, State};
///
/// let parser = first_successful(vec![digit1(), alpha1()]);
/// let (state, out) = parser.parse(State::new_from_string("abc"));
/// assert!(!state.failed());
/// assert_eq!(out, "abc");
/// ```
pub fn first_successful<O: Clone + Default + 'static>(parsers: Vec<Parser<O>>) -> Parser<O> {
    let expected = parsers
        .iter()
        .map(|p| p.expected().to_string())
        .collect::<Vec<_>>()
        .join(" or ");
    let contains = parsers
        .iter()
        .map(|p| p.contains_save_spot())
        .max()
        .unwrap_or(Ternary::No);
    let sub_recoverers: Vec<Option<Recoverer>> = parsers
        .iter()
        .map(|p| {
            if p.contains_save_spot() > Ternary::No {
                p.save_spot_recoverer_fn()
            } else {
                None
            }
        })
        .collect();

    let choice = Rc::new(Choice {
        id: new_branch_parser_id(),
        parsers,
        save_spot_recoverer: CombiningRecoverer::new(sub_recoverers),
    });
    let escape_choice = Rc::clone(&choice);
    let mut parser = Parser::new(
        expected,
        move |state: State| choice.parse(state),
        true,
        None,
        contains,
        Some(Rc::new(move |state: &State| {
            escape_choice.save_spot_recoverer.recover(state)
        })),
    );
    parser.recoverer = Some(default_recoverer(parser.clone()));
    parser
}

/// Applies the parser and succeeds with the zero output if it fails without
/// having crossed a save spot. A committed failure propagates: optional
/// does not catch it.
///
/// ```
/// use mend::{digit1, optional, State};
///
/// let parser = optional(digit1());
/// let (state, out) = parser.parse(State::new_from_string("abc"));
/// assert!(!state.failed());
/// assert_eq!(out, "");
/// assert_eq!(state.current_string(), "abc");
/// ```
pub fn optional<O: Clone + Default + 'static>(parser: Parser<O>) -> Parser<O> {
    let inner = parser.clone();
    Parser::new(
        format!("optional {}", parser.expected()),
        move |state: State| {
            if state.parsing_mode() != ParsingMode::Happy {
                return inner.parse(state);
            }
            let (sub, out) = inner.parse(state.clone());
            if !sub.failed() {
                return (sub, out);
            }
            if state.save_spot_moved(&sub) || sub.parsing_mode() != ParsingMode::Error {
                return (state.preserve(&sub), O::default());
            }
            (state.succeed(&sub), O::default())
        },
        parser.possible_witness(),
        parser.recoverer_fn(),
        parser.contains_save_spot(),
        parser.save_spot_recoverer_fn(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::char::{alpha1, digit1};
    use crate::parser::sequence::map2;
    use crate::parser::token::token;

    #[test]
    fn first_alternative_wins() {
        let parser = first_successful(vec![digit1(), alpha1()]);
        let (state, out) = parser.parse(State::new_from_string("12ab"));
        assert!(!state.failed());
        assert_eq!(out, "12");
        assert_eq!(state.current_string(), "ab");
    }

    #[test]
    fn later_alternative_after_plain_failure() {
        let parser = first_successful(vec![digit1(), alpha1()]);
        let (state, out) = parser.parse(State::new_from_string("ab12"));
        assert!(!state.failed());
        assert_eq!(out, "ab");
    }

    #[test]
    fn all_alternatives_failing_keep_the_furthest_error() {
        let pair = map2(alpha1(), digit1(), |a, d| Ok(format!("{}{}", a, d)));
        let parser = first_successful(vec![pair, digit1()]);
        let (state, _) = parser.parse(State::new_from_string("ab!!"));
        assert!(state.failed());
        // the first alternative got past the letters before failing
        assert_eq!(state.current_error().unwrap().pos(), 2);
        assert_eq!(state.current_string(), "ab!!");
    }

    #[test]
    fn expected_joins_alternatives() {
        let parser = first_successful(vec![digit1(), alpha1()]);
        assert_eq!(parser.expected(), "digit or letter");
    }

    #[test]
    fn optional_swallows_plain_failures_only() {
        let parser = optional(token('x'));
        let (state, out) = parser.parse(State::new_from_string("yz"));
        assert!(!state.failed());
        assert_eq!(out, char::default());
        assert_eq!(state.current_string(), "yz");
    }
}
