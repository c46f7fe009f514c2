//! Combinators which apply several parsers one after another and map their
//! outputs into one result.
//!
//! The engine below is the heart of error recovery: it runs its children
//! through all five parsing modes, records per-position results so that the
//! recovery walk can find its way back to a failure, lets the witness
//! protocol retry the culprit, and falls back to recoverers when retrying is
//! hopeless.

use std::rc::Rc;

use log::trace;

use crate::parser::{downcast, Parser};
use crate::recover::{default_recoverer, handle_witness, i_witnessed, CombiningRecoverer, Recoverer};
use crate::state::{AnyOutput, ParsingMode, State};
use crate::{new_branch_parser_id, Ternary, LOG_TARGET};

type Mapper<O> = Rc<dyn Fn(&[AnyOutput]) -> Result<O, String>>;

struct Sequence<O> {
    id: u64,
    parsers: Vec<Parser<AnyOutput>>,
    mapper: Mapper<O>,
    /// save-spot recoverers of the children, index-aligned (`None` for
    /// children without a save spot)
    sub_recoverers: Vec<Option<Recoverer>>,
    /// pre-built combining recoverer over all children, used when escaping
    /// from the start of the sequence
    save_spot_recoverer: CombiningRecoverer,
}

impl<O: Clone + Default + 'static> Sequence<O> {
    fn parse(&self, state: State) -> (State, O) {
        match state.parsing_mode() {
            ParsingMode::Happy => {
                let remaining = state.clone();
                self.run_happy(state, remaining, 0, None, 0, Vec::new())
            }
            ParsingMode::Error => self.run_error(state),
            ParsingMode::Handle | ParsingMode::Rewind => self.run_handle(state),
            ParsingMode::Escape => {
                let scan = state.clone();
                self.run_escape(state, scan, 0, Vec::new())
            }
        }
    }

    /// Normal forward parsing from child `start_idx` on. `state` stays at
    /// the sequence's start for caching; `remaining` is the live cursor.
    fn run_happy(
        &self,
        state: State,
        mut remaining: State,
        start_idx: usize,
        mut ss_start: Option<usize>,
        mut ss_idx: usize,
        mut outputs: Vec<AnyOutput>,
    ) -> (State, O) {
        if start_idx == 0 {
            // caching only works when parsing from the start
            if let Some(result) = state.cached_parser_result(self.id) {
                if result.failed {
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
        }

        for i in start_idx..self.parsers.len() {
            let before = remaining.clone();
            let (sub, out) = self.parsers[i].parse(remaining);
            if sub.failed() {
                return self.child_failed(state, before, sub, i, ss_start, ss_idx, outputs);
            }
            if before.save_spot_moved(&sub) {
                ss_idx = i;
                ss_start = Some(state.byte_count(&before));
            }
            outputs.push(out);
            remaining = sub;
        }
        self.map_outputs(state, remaining, ss_start, ss_idx, outputs)
    }

    fn map_outputs(
        &self,
        state: State,
        remaining: State,
        ss_start: Option<usize>,
        ss_idx: usize,
        outputs: Vec<AnyOutput>,
    ) -> (State, O) {
        let last = self.parsers.len() - 1;
        match (self.mapper)(&outputs) {
            Ok(output) => {
                state.cache_parser_result(
                    self.id,
                    last,
                    ss_idx,
                    ss_start,
                    &remaining,
                    Some(Rc::new(output.clone())),
                );
                (remaining.release_claim(self.id), output)
            }
            Err(message) => {
                state.cache_parser_result(self.id, last, ss_idx, ss_start, &remaining, None);
                (remaining.new_semantic_error(message), O::default())
            }
        }
    }

    /// A child failed during happy parsing. Depending on the failure mode
    /// this claims the error and handles it locally, drives the witness
    /// again, escapes, or propagates upward.
    fn child_failed(
        &self,
        state: State,
        before: State,
        sub: State,
        idx: usize,
        ss_start: Option<usize>,
        ss_idx: usize,
        mut outputs: Vec<AnyOutput>,
    ) -> (State, O) {
        match sub.parsing_mode() {
            ParsingMode::Error => {
                state.cache_parser_result(
                    self.id,
                    idx,
                    ss_idx,
                    ss_start,
                    &sub,
                    Some(Rc::new(outputs.clone())),
                );
                let culprit_start = before.current_pos();
                let claimed = i_witnessed(state, self.id, idx, culprit_start, &sub);
                if !claimed.recovering() || ss_start.is_none() {
                    // nothing to anchor handling here
                    return (claimed, O::default());
                }
                trace!(
                    target: LOG_TARGET,
                    "sequence {} handles failure of child {} locally",
                    self.id,
                    idx,
                );
                let mut claimed = claimed;
                claimed.mode = ParsingMode::Error;
                self.run_error(claimed)
            }
            ParsingMode::Rewind => {
                // a previously handled region failed again
                match sub.err_hand.claim {
                    Some(claim) if claim.id == self.id => {
                        outputs.truncate(claim.culprit_idx);
                        let culprit_state = state.clone().preserve(&sub).move_to(claim.pos);
                        let (handled, out) =
                            handle_witness(culprit_state, self.id, claim.culprit_idx, &self.parsers);
                        outputs.push(out);
                        self.continue_after(
                            state,
                            handled,
                            claim.culprit_idx + 1,
                            ss_start,
                            ss_idx,
                            outputs,
                        )
                    }
                    _ => (state.preserve(&sub), O::default()),
                }
            }
            ParsingMode::Escape => {
                // recovery below gave up; try to sync at a later child
                let scan = before.preserve(&sub);
                self.run_escape(state.preserve(&sub), scan, idx + 1, outputs)
            }
            mode => (
                state.new_semantic_error(format!(
                    "programming error: sequence child failed in parsing mode `{}`",
                    mode
                )),
                O::default(),
            ),
        }
    }

    /// Error mode travels upward looking for the nearest save spot. If this
    /// sequence crossed one, re-enter the save-spot child so it switches the
    /// run to handle mode, then walk back down to the culprit.
    fn run_error(&self, state: State) -> (State, O) {
        let result = match state.cached_parser_result(self.id) {
            Some(result) => result,
            None => {
                return (
                    state.new_semantic_error(
                        "grammar error: cache was empty in sequence parser (mode `error`)",
                    ),
                    O::default(),
                )
            }
        };
        let ss_start = match result.save_spot_start {
            Some(ss_start) => ss_start,
            // no save spot crossed here: ancestors must handle
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
        if result.failed {
            self.run_handle(state.preserve(&sub))
        } else {
            (state.preserve(&sub), O::default())
        }
    }

    /// Handle (and rewind) mode walks from the sequence start down to the
    /// failed child and lets the witness protocol retry it, then continues
    /// with the remaining children in whatever mode the witness returned.
    fn run_handle(&self, state: State) -> (State, O) {
        let result = match state.cached_parser_result(self.id) {
            Some(result) => result,
            None => {
                let mode = state.parsing_mode();
                return (
                    state.new_semantic_error(format!(
                        "grammar error: cache was empty in sequence parser (mode `{}`)",
                        mode
                    )),
                    O::default(),
                )
            }
        };
        if !result.failed {
            return (state, O::default());
        }
        let mut outputs: Vec<AnyOutput> = result
            .output
            .as_ref()
            .and_then(|rc| rc.downcast_ref::<Vec<AnyOutput>>())
            .cloned()
            .unwrap_or_default();
        outputs.truncate(result.idx);
        let culprit_state = state.clone().move_by(result.error_start);
        let (sub, out) = handle_witness(culprit_state, self.id, result.idx, &self.parsers);
        outputs.push(out);
        self.continue_after(
            state,
            sub,
            result.idx + 1,
            result.save_spot_start,
            result.save_spot_idx,
            outputs,
        )
    }

    fn continue_after(
        &self,
        state: State,
        remaining: State,
        next_idx: usize,
        ss_start: Option<usize>,
        ss_idx: usize,
        outputs: Vec<AnyOutput>,
    ) -> (State, O) {
        match remaining.parsing_mode() {
            ParsingMode::Happy => {
                self.run_happy(state, remaining, next_idx, ss_start, ss_idx, outputs)
            }
            ParsingMode::Escape => {
                let scan = remaining.clone();
                self.run_escape(state, scan, next_idx, outputs)
            }
            // error and rewind travel upward
            _ => (state.preserve(&remaining), O::default()),
        }
    }

    /// Escape mode: pick the child whose save spot is cheapest to reach
    /// from `scan`, run it (it consumes the waste itself via its caching
    /// recoverer), and resume the sequence after it.
    fn run_escape(
        &self,
        state: State,
        scan: State,
        start_idx: usize,
        mut outputs: Vec<AnyOutput>,
    ) -> (State, O) {
        let idx = if start_idx == 0 {
            match self.save_spot_recoverer.cached_index(&scan) {
                Some(idx) => Some(idx),
                None => {
                    self.save_spot_recoverer.recover(&scan);
                    self.save_spot_recoverer.last_index()
                }
            }
        } else {
            let mut recoverers = self.sub_recoverers.clone();
            for slot in recoverers.iter_mut().take(start_idx) {
                *slot = None;
            }
            let combining = CombiningRecoverer::new(recoverers);
            combining.recover(&scan);
            combining.last_index()
        };
        let idx = match idx {
            Some(idx) => idx,
            None => {
                let sub = scan.new_semantic_error(format!(
                    "grammar error: no recoverer found in sequence parser (mode `escape`, \
                     start index {})",
                    start_idx
                ));
                return (state.preserve(&sub), O::default());
            }
        };
        trace!(
            target: LOG_TARGET,
            "sequence {} escapes to child {} at {}",
            self.id,
            idx,
            scan.current_pos(),
        );
        let (sub, out) = self.parsers[idx].parse(scan.clone());
        if sub.parsing_mode() == ParsingMode::Happy {
            let ss_start = Some(state.byte_count(&scan));
            outputs.resize(idx, None);
            outputs.push(out);
            return self.run_happy(state, sub, idx + 1, ss_start, idx, outputs);
        }
        (state.preserve(&sub), O::default())
    }
}

/// Builds the parser around a sequence engine; shared by `map`…`map5`.
fn sequence<O: Clone + Default + 'static>(
    parsers: Vec<Parser<AnyOutput>>,
    mapper: Mapper<O>,
) -> Parser<O> {
    let expected = parsers
        .iter()
        .map(|p| p.expected().to_string())
        .collect::<Vec<_>>()
        .join(" + ");
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
    let save_spot_recoverer = CombiningRecoverer::new(sub_recoverers.clone());

    let seq = Rc::new(Sequence {
        id: new_branch_parser_id(),
        parsers,
        mapper,
        sub_recoverers,
        save_spot_recoverer,
    });
    let escape_seq = Rc::clone(&seq);
    let mut parser = Parser::new(
        expected,
        move |state: State| seq.parse(state),
        true,
        None,
        contains,
        Some(Rc::new(move |state: &State| {
            escape_seq.save_spot_recoverer.recover(state)
        })),
    );
    parser.recoverer = Some(default_recoverer(parser.clone()));
    parser
}

macro_rules! seq_parser {
    ($(#[$attr:meta])* $name: ident; $($p: ident: $po: ident),+) => {
        $(#[$attr])*
        pub fn $name<$($po,)+ O>(
            $($p: Parser<$po>,)+
            map_fn: impl Fn($($po),+) -> Result<O, String> + 'static,
        ) -> Parser<O>
        where
            $($po: Clone + Default + 'static,)+
            O: Clone + Default + 'static,
        {
            let parsers = vec![$($p.erased(),)+];
            let mapper: Mapper<O> = Rc::new(move |outputs: &[AnyOutput]| {
                let mut slot = 0usize;
                $(
                    #[allow(unused_assignments)]
                    let $p: $po = {
                        let value = outputs.get(slot).map(downcast::<$po>).unwrap_or_default();
                        slot += 1;
                        value
                    };
                )+
                map_fn($($p),+)
            });
            sequence(parsers, mapper)
        }
    };
}

seq_parser! {
    /// Applies one parser and maps its output, turning a mapping error into
    /// a semantic error.
    ///
    /// ```
    /// use mend::{digit1, map, State};
    ///
    /// let parser = map(digit1(), |d| Ok(d.len()));
    /// let (state, count) = parser.parse(State::new_from_string("123"));
    /// assert!(!state.failed());
    /// assert_eq!(count, 3);
    /// ```
    map; p1: PO1
}

seq_parser! {
    /// Applies two parsers in order and maps their outputs into one result.
    ///
    /// ```
    /// use mend::{digit1, map2, token, State};
    ///
    /// let parser = map2(digit1(), token('!'), |d, _| Ok(d));
    /// let (state, out) = parser.parse(State::new_from_string("7!"));
    /// assert!(!state.failed());
    /// assert_eq!(out, "7");
    /// ```
    map2; p1: PO1, p2: PO2
}

seq_parser! {
    /// Applies three parsers in order and maps their outputs into one
    /// result.
    map3; p1: PO1, p2: PO2, p3: PO3
}

seq_parser! {
    /// Applies four parsers in order and maps their outputs into one
    /// result.
    map4; p1: PO1, p2: PO2, p3: PO3, p4: PO4
}

seq_parser! {
    /// Applies five parsers in order and maps their outputs into one
    /// result.
    map5; p1: PO1, p2: PO2, p3: PO3, p4: PO4, p5: PO5
}

/// Applies both parsers in order and keeps only the second output.
///
/// ```
/// use mend::{digit1, preceded, token, State};
///
/// let parser = preceded(token('#'), digit1());
/// let (state, out) = parser.parse(State::new_from_string("#42"));
/// assert!(!state.failed());
/// assert_eq!(out, "42");
/// ```
pub fn preceded<O1, O2>(first: Parser<O1>, second: Parser<O2>) -> Parser<O2>
where
    O1: Clone + Default + 'static,
    O2: Clone + Default + 'static,
{
    map2(first, second, |_, output| Ok(output))
}

/// Applies both parsers in order and keeps only the first output.
pub fn terminated<O1, O2>(first: Parser<O1>, second: Parser<O2>) -> Parser<O1>
where
    O1: Clone + Default + 'static,
    O2: Clone + Default + 'static,
{
    map2(first, second, |output, _| Ok(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::char::{alpha1, digit1};
    use crate::parser::token::token;
    use crate::state::State;

    #[test]
    fn map2_combines_outputs() {
        let parser = map2(alpha1(), digit1(), |a, d| Ok(format!("{}-{}", a, d)));
        let (state, out) = parser.parse(State::new_from_string("ab12"));
        assert!(!state.failed());
        assert_eq!(out, "ab-12");
        assert_eq!(state.current_string(), "");
    }

    #[test]
    fn sequence_fails_on_first_mismatch() {
        let parser = map2(alpha1(), digit1(), |a, d| Ok(format!("{}{}", a, d)));
        let (state, out) = parser.parse(State::new_from_string("123"));
        assert!(state.failed());
        assert_eq!(out, "");
        assert_eq!(state.current_string(), "123");
        assert_eq!(state.current_error().unwrap().message(), "expected letter");
    }

    #[test]
    fn sequence_rewinds_to_its_start_on_late_failure() {
        let parser = map2(alpha1(), digit1(), |a, d| Ok(format!("{}{}", a, d)));
        let (state, _) = parser.parse(State::new_from_string("abc!"));
        assert!(state.failed());
        assert_eq!(state.current_string(), "abc!");
        assert_eq!(state.current_error().unwrap().pos(), 3);
    }

    #[test]
    fn expected_joins_children() {
        let parser = map3(alpha1(), token(','), digit1(), |a, _, d| {
            Ok(format!("{}{}", a, d))
        });
        assert_eq!(parser.expected(), "letter + ',' + digit");
    }

    #[test]
    fn mapping_error_becomes_semantic() {
        let parser = map(digit1(), |d| {
            if d.len() > 2 {
                Err(format!("number {} too long", d))
            } else {
                Ok(d)
            }
        });
        let (state, out) = parser.parse(State::new_from_string("1234"));
        assert!(!state.failed());
        assert!(state.has_error());
        assert_eq!(out, "");
        let errors = state.errors().unwrap();
        assert!(errors.to_string().contains("number 1234 too long"));
    }

    #[test]
    fn cached_sequence_result_replays() {
        let parser = map2(alpha1(), digit1(), |a, d| Ok(format!("{}{}", a, d)));
        let state = State::new_from_string("ab12");
        let (first, _) = parser.parse(state.clone());
        let (second, out) = parser.parse(state);
        assert_eq!(first.current_pos(), second.current_pos());
        assert_eq!(out, "ab12");
    }
}
