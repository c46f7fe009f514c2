//! Error recovery: the witness protocol, recoverers and deleters.
//!
//! A failed sub-parser is "adopted" by its nearest branch parent via
//! [`i_witnessed`]; during handle mode the parent drives retries through
//! [`handle_witness`]. Recoverers compute how much input must be skipped for
//! a parser to succeed again; deleters decide what one skipped unit is.

use std::cell::Cell;
use std::rc::Rc;

use log::trace;

use crate::error::WitnessClaim;
use crate::parser::Parser;
use crate::state::{ParsingMode, State};
use crate::{new_caching_recoverer_id, new_combining_recoverer_id, LOG_TARGET};

/// Decides how much input one recovery step skips: `deleter(state, count)`
/// moves `count` units forward.
pub type Deleter = Rc<dyn Fn(State, usize) -> State>;

/// Computes the number of bytes of input ("waste") that must be skipped for
/// the associated parser to succeed, or `None` if no such position exists
/// before the end of the input.
pub type Recoverer = Rc<dyn Fn(&State) -> Option<usize>>;

/// Lets a branch parser report an error it witnessed in its sub-parser with
/// index `idx`, invoked at input position `culprit_start`. The first branch
/// parent claims the error for retry; any ancestor seeing the claimed error
/// afterwards leaves it alone. Returns `state` with the error handling of
/// `err_state` merged in, positioned at the branch parser's start.
pub fn i_witnessed(state: State, id: u64, idx: usize, culprit_start: usize, err_state: &State) -> State {
    if state.failed() {
        return state
            .new_semantic_error("programming error: witnessing while still handling an error");
    }
    let mut state = state.preserve(err_state);
    let err_pos = match &state.err_hand.err {
        Some(err) => err.pos(),
        None => {
            return state.new_semantic_error("programming error: witnessing without an error")
        }
    };
    let unclaimed = state
        .err_hand
        .claim
        .map_or(true, |claim| claim.err_pos != err_pos);
    if unclaimed && state.recover {
        trace!(
            target: LOG_TARGET,
            "parser {} claims error at {} (culprit {} at {})",
            id,
            err_pos,
            idx,
            culprit_start,
        );
        state.err_hand.claim = Some(WitnessClaim {
            id,
            pos: culprit_start,
            culprit_idx: idx,
            err_pos,
        });
    }
    state
}

/// Drives the retry loop if the branch parser with `id` is the claiming
/// witness at the current position; otherwise forwards to the sub-parser
/// with index `idx`, descending toward the culprit.
///
/// As the witness: restore the culprit's start, skip `cur_del` units via the
/// deleter and re-run the culprit. Success resumes happy parsing; failure
/// rewinds with one more deletion, up to `max_del`, after which the culprit
/// is skipped once with a zero output (`ignore_err_parser`) and finally
/// given up on via escape mode.
pub fn handle_witness<O: Clone + Default + 'static>(
    state: State,
    id: u64,
    idx: usize,
    parsers: &[Parser<O>],
) -> (State, O) {
    let claim = match state.err_hand.claim {
        Some(claim) => claim,
        None => {
            let state = state
                .new_semantic_error("programming error: handling a witness without a claim");
            return (state, O::default());
        }
    };
    if claim.id != id || claim.pos != state.current_pos() {
        let parser = &parsers[idx];
        if parser.possible_witness() {
            // the witness is this sub-parser or one of its descendants
            trace!(
                target: LOG_TARGET,
                "descending toward witness {} via {:?}",
                claim.id,
                parser.expected(),
            );
        }
        return parser.parse(state);
    }

    // we are the witness
    let mut state = state;
    let org_pos = state.current_pos();
    let culprit_idx = if claim.culprit_idx < parsers.len() {
        claim.culprit_idx
    } else {
        state = state.new_semantic_error(format!(
            "programming error: got only {} sub-parsers but culprit index is {}",
            parsers.len(),
            claim.culprit_idx,
        ));
        parsers.len() - 1
    };
    let parser = &parsers[culprit_idx];

    loop {
        match state.parsing_mode() {
            ParsingMode::Handle => {
                // first attempt: record the diagnostic, start with 1 deletion
                state = state.accumulate_current_error();
                state.err_hand.cur_del = 1;
                state.err_hand.ignore_err_parser = false;
            }
            ParsingMode::Rewind => {
                // a retry (or something after it) failed again
                state = state.discard_current_error();
                state.err_hand.cur_del += 1;
                if state.err_hand.cur_del > state.max_del {
                    if !state.err_hand.ignore_err_parser {
                        state.err_hand.cur_del = 0;
                        state.err_hand.ignore_err_parser = true;
                    } else {
                        trace!(target: LOG_TARGET, "witness {} gives up, escaping", id);
                        state.mode = ParsingMode::Escape;
                        return (state, O::default());
                    }
                }
            }
            _ => return (state, O::default()), // we are witness but there is nothing to do
        }
        state.mode = ParsingMode::Happy;
        state = state.move_to(org_pos);
        let cur_del = state.err_hand.cur_del;
        let deleter = Rc::clone(&state.deleter);
        state = deleter(state, cur_del);
        trace!(
            target: LOG_TARGET,
            "witness {} retries culprit {} at {} ({} deletions)",
            id,
            culprit_idx,
            state.current_pos(),
            cur_del,
        );
        if state.err_hand.ignore_err_parser {
            // step past the culprit with a zero output
            return (state, O::default());
        }
        let (new_state, output) = parser.parse(state);
        if !new_state.failed() {
            return (new_state.clear_all_caches(), output);
        }
        state = new_state;
        state.mode = ParsingMode::Rewind;
    }
}

// ----------------------------------------------------------------------
// recoverers

/// Recoverer that re-runs its parser after deleting one rune (or byte for
/// binary input) at a time until the parser succeeds or the input is
/// exhausted.
pub fn default_recoverer<O: Clone + Default + 'static>(parser: Parser<O>) -> Recoverer {
    Rc::new(move |state: &State| {
        let mut cur = probe_state(state);
        while cur.bytes_remaining() > 0 {
            let (probed, _) = parser.parse(cur.clone());
            if !probed.failed() {
                return Some(state.byte_count(&cur));
            }
            cur = cur.delete(1);
        }
        None
    })
}

/// A clean happy-mode clone for probing parsers without disturbing the
/// error handling in flight.
fn probe_state(state: &State) -> State {
    let mut probe = state.clone();
    probe.mode = ParsingMode::Happy;
    probe.err_hand = Default::default();
    probe
}

/// Memoizes another recoverer per input position. Worth it only where the
/// recoverer runs repeatedly at the exact same position, as happens at
/// save-spot boundaries.
pub fn caching_recoverer(recoverer: Recoverer) -> Recoverer {
    let id = new_caching_recoverer_id();
    Rc::new(move |state: &State| match state.cached_recoverer_waste(id) {
        Some(waste) => waste,
        None => {
            let waste = recoverer(state);
            state.cache_recoverer_waste(id, waste);
            waste
        }
    })
}

/// Recovers by calling all sub-recoverers and keeping the minimal waste,
/// remembering which sub-recoverer won so the caller knows where to
/// dispatch after recovery.
#[derive(Clone)]
pub struct CombiningRecoverer {
    recoverers: Vec<Option<Recoverer>>,
    id: u64,
    last_idx: Cell<Option<usize>>,
}

impl CombiningRecoverer {
    /// `recoverers` may contain `None` slots so that indices keep lining up
    /// with the children of the combinator that built it.
    pub fn new(recoverers: Vec<Option<Recoverer>>) -> CombiningRecoverer {
        CombiningRecoverer {
            recoverers,
            id: new_combining_recoverer_id(),
            last_idx: Cell::new(None),
        }
    }

    /// Minimal waste over all sub-recoverers, `None` if none can recover.
    /// Short-circuits on a waste of 0 and caches per input position.
    pub fn recover(&self, state: &State) -> Option<usize> {
        if let Some((waste, idx)) = state.cached_recoverer_waste_idx(self.id) {
            self.last_idx.set(idx);
            return waste;
        }
        let mut best: Option<(usize, usize)> = None; // (waste, index)
        for (i, recoverer) in self.recoverers.iter().enumerate() {
            let Some(recoverer) = recoverer else { continue };
            match recoverer(state) {
                None => {}
                Some(0) => {
                    // it won't get better than this
                    best = Some((0, i));
                    break;
                }
                Some(waste) => {
                    if best.map_or(true, |(b, _)| waste < b) {
                        best = Some((waste, i));
                    }
                }
            }
        }
        let waste = best.map(|(w, _)| w);
        let idx = best.map(|(_, i)| i);
        state.cache_recoverer_waste_idx(self.id, waste, idx);
        self.last_idx.set(idx);
        waste
    }

    /// Index of the sub-recoverer chosen by the most recent
    /// [`CombiningRecoverer::recover`] call.
    pub fn last_index(&self) -> Option<usize> {
        self.last_idx.get()
    }

    /// Index cached for the current input position, if any.
    pub fn cached_index(&self, state: &State) -> Option<usize> {
        state
            .cached_recoverer_waste_idx(self.id)
            .and_then(|(_, idx)| idx)
    }
}

// ----------------------------------------------------------------------
// deleters

/// One delete step is one byte. The default for binary input.
pub fn byte_deleter() -> Deleter {
    Rc::new(|state: State, count: usize| state.move_by(count))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum RuneClass {
    Word,
    Space,
    Bracket,
    Punct,
    Other,
}

impl RuneClass {
    fn of(ch: char) -> RuneClass {
        if ch.is_alphanumeric() || ch == '_' {
            RuneClass::Word
        } else if ch.is_whitespace() {
            RuneClass::Space
        } else if matches!(ch, '(' | ')' | '[' | ']' | '{' | '}') {
            RuneClass::Bracket
        } else if matches!(
            ch,
            '+' | '-'
                | '*'
                | '/'
                | '%'
                | '^'
                | '='
                | ':'
                | '<'
                | '>'
                | '~'
                | '|'
                | '\\'
                | ';'
                | '.'
                | ','
                | '"'
                | '`'
                | '\''
        ) {
            RuneClass::Punct
        } else {
            RuneClass::Other
        }
    }
}

/// One delete step is one rune-class transition: a change to a non-space
/// class counts, and two adjacent but different brackets count separately
/// (`})` is two steps). The default for text input. When fewer transitions
/// than requested exist, the cursor moves to the end of the input.
pub fn rune_type_change_deleter() -> Deleter {
    Rc::new(|state: State, count: usize| {
        if count == 0 {
            return state;
        }
        let stop = {
            let rest = state.current_string();
            let mut found = 0;
            let mut old_class: Option<RuneClass> = None;
            let mut prev_bracket = '\0';
            let mut stop = None;
            for (i, ch) in rest.char_indices() {
                let class = RuneClass::of(ch);
                let transition = match old_class {
                    None => false,
                    Some(old) if class != old => class != RuneClass::Space,
                    Some(_) => class == RuneClass::Bracket && ch != prev_bracket,
                };
                if transition {
                    found += 1;
                    if found == count {
                        stop = Some(i);
                        break;
                    }
                }
                if class == RuneClass::Bracket {
                    prev_bracket = ch;
                }
                old_class = Some(class);
            }
            stop
        };
        match stop {
            Some(byte_count) => state.move_by(byte_count),
            None => {
                let rest = state.bytes_remaining();
                state.move_by(rest)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::char::digit1;
    use crate::parser::token::string;

    fn deleted(input: &str, count: usize) -> String {
        let deleter = rune_type_change_deleter();
        let state = deleter(State::new_from_string(input), count);
        state.current_string().to_string()
    }

    #[test]
    fn text_deleter_counts_class_transitions() {
        assert_eq!(deleted("ab, 12", 1), ", 12");
        assert_eq!(deleted("ab, 12", 2), "12");
        assert_eq!(deleted("ab, 12", 3), "");
    }

    #[test]
    fn text_deleter_counts_differing_brackets_separately() {
        assert_eq!(deleted("})x", 1), ")x");
        assert_eq!(deleted("})x", 2), "x");
    }

    #[test]
    fn text_deleter_space_is_not_a_transition() {
        assert_eq!(deleted("a b", 1), "b");
    }

    #[test]
    fn byte_deleter_moves_bytes() {
        let deleter = byte_deleter();
        let state = deleter(State::new_from_bytes(b"abcdef"), 4);
        assert_eq!(state.current_bytes(), b"ef");
    }

    #[test]
    fn default_recoverer_finds_the_next_match() {
        let recoverer = default_recoverer(digit1());
        let state = State::new_from_string("ab12");
        assert_eq!(recoverer(&state), Some(2));
        let state = State::new_from_string("abcd");
        assert_eq!(recoverer(&state), None);
        let state = State::new_from_string("12ab");
        assert_eq!(recoverer(&state), Some(0));
    }

    #[test]
    fn caching_recoverer_memoizes_per_position() {
        let recoverer = caching_recoverer(default_recoverer(string("end")));
        let state = State::new_from_string("xx end");
        assert_eq!(recoverer(&state), Some(3));
        // second call hits the cache
        assert_eq!(recoverer(&state), Some(3));
        assert_eq!(recoverer(&state.clone().move_by(3)), Some(0));
    }

    #[test]
    fn combining_recoverer_takes_the_minimum() {
        let crc = CombiningRecoverer::new(vec![
            Some(default_recoverer(string("zz"))),
            Some(default_recoverer(digit1())),
            None,
        ]);
        let state = State::new_from_string("ab12zz");
        assert_eq!(crc.recover(&state), Some(2));
        assert_eq!(crc.last_index(), Some(1));
        assert_eq!(crc.cached_index(&state), Some(1));
    }

    #[test]
    fn combining_recoverer_with_no_way_out() {
        let crc = CombiningRecoverer::new(vec![Some(default_recoverer(digit1()))]);
        let state = State::new_from_string("abcd");
        assert_eq!(crc.recover(&state), None);
        assert_eq!(crc.last_index(), None);
    }
}
