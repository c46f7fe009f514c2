//! The parser state: a cheap value combining the input cursor, the parsing
//! mode, the error-handling slot and shared per-run caches.
//!
//! Every parser takes a `State` and returns a new one together with its
//! output. The caches belong to the run as a whole and are shared by
//! reference between all states spawned from one constructor call; nothing
//! is shared between runs.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

use log::trace;

use crate::error::{ErrHand, ParseErrors, ParserError};
use crate::input::Input;
use crate::recover::{byte_deleter, rune_type_change_deleter, Deleter};
use crate::LOG_TARGET;

/// Default bound for delete steps while retrying a failed sub-parser.
pub const DEFAULT_MAX_DEL: usize = 3;
/// Default capacity of the output cache used for recursion detection.
pub const DEFAULT_MAX_RECURSION: usize = 64;

/// Which phase of the recovery state machine the parser is in.
///
/// `Happy` is normal forward parsing. The other four modes only occur while
/// an error is being handled: `Error` travels upward looking for the nearest
/// save spot, `Handle` travels downward from it back to the culprit,
/// `Rewind` goes back to the witness for another retry, and `Escape` gives
/// up on retrying and resynchronizes via a recoverer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParsingMode {
    Happy,
    Error,
    Handle,
    Rewind,
    Escape,
}

impl fmt::Display for ParsingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParsingMode::Happy => "happy",
            ParsingMode::Error => "error",
            ParsingMode::Handle => "handle",
            ParsingMode::Rewind => "rewind",
            ParsingMode::Escape => "escape",
        };
        f.write_str(name)
    }
}

/// Type-erased output slot used by the caches; `None` is the zero output.
pub type AnyOutput = Option<Rc<dyn Any>>;

/// Cached outcome of one branch-parser run, keyed by `(parser ID, pos)`.
#[derive(Clone)]
pub struct ParserResult {
    pub(crate) pos: usize,
    /// index of the chosen branch or the failed sub-parser
    pub(crate) idx: usize,
    /// index of the last sub-parser that moved the save-spot mark
    pub(crate) save_spot_idx: usize,
    /// offset from the caching parser's start to that sub-parser's start;
    /// `None` if no save spot was crossed
    pub(crate) save_spot_start: Option<usize>,
    /// the save-spot mark after the run, if one was crossed
    pub(crate) save_spot: Option<usize>,
    pub(crate) failed: bool,
    /// offset from the caching parser's start to the failed sub-parser's
    /// start
    pub(crate) error_start: usize,
    /// bytes consumed on success
    pub(crate) consumed: usize,
    pub(crate) output: AnyOutput,
    pub(crate) error: Option<ParserError>,
}

impl ParserResult {
    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn has_save_spot(&self) -> bool {
        self.save_spot_start.is_some()
    }
}

#[derive(Clone, Copy)]
struct CachedWaste {
    pos: usize,
    waste: Option<usize>,
}

#[derive(Clone, Copy)]
struct CachedWasteIdx {
    pos: usize,
    waste: Option<usize>,
    idx: Option<usize>,
}

#[derive(Clone)]
struct CachedOutput {
    pos: usize,
    output: AnyOutput,
}

#[derive(Default)]
pub(crate) struct Caches {
    recoverer_waste: HashMap<u64, Vec<CachedWaste>>,
    recoverer_waste_idx: HashMap<u64, Vec<CachedWasteIdx>>,
    parser_results: HashMap<u64, Vec<ParserResult>>,
    outputs: HashMap<u64, Vec<CachedOutput>>,
}

/// Bounded insert shared by all caches: overwrite an entry with the same
/// position, append while below capacity, otherwise overwrite the entry
/// whose position is nearest to the new one.
fn cache_value<T>(
    cache: &mut HashMap<u64, Vec<T>>,
    id: u64,
    value: T,
    pos_of: fn(&T) -> usize,
    capacity: usize,
) {
    let pos = pos_of(&value);
    let entries = match cache.get_mut(&id) {
        Some(entries) => entries,
        None => {
            let mut entries = Vec::with_capacity(capacity);
            entries.push(value);
            cache.insert(id, entries);
            return;
        }
    };

    if let Some(slot) = entries.iter_mut().find(|e| pos_of(e) == pos) {
        *slot = value;
        return;
    }
    if entries.len() < capacity {
        entries.push(value);
        return;
    }
    let nearest = entries
        .iter()
        .enumerate()
        .min_by_key(|(_, e)| pos_of(e).abs_diff(pos))
        .map(|(i, _)| i)
        .unwrap_or(0);
    entries[nearest] = value;
}

fn cached_value<T: Clone>(
    cache: &HashMap<u64, Vec<T>>,
    id: u64,
    pos: usize,
    pos_of: fn(&T) -> usize,
) -> Option<T> {
    cache
        .get(&id)?
        .iter()
        .find(|e| pos_of(e) == pos)
        .cloned()
}

/// The current state of a parse.
#[derive(Clone)]
pub struct State {
    pub(crate) mode: ParsingMode,
    pub(crate) input: Input,
    pub(crate) save_spot: Option<usize>,
    pub(crate) recover: bool,
    pub(crate) max_del: usize,
    pub(crate) max_recursion: usize,
    pub(crate) err_hand: ErrHand,
    pub(crate) old_errors: Vec<ParserError>,
    pub(crate) caches: Rc<RefCell<Caches>>,
    pub(crate) deleter: Deleter,
}

impl State {
    /// A state over UTF-8 text with commit semantics only; call
    /// [`State::with_recovery`] to turn the error-recovery machine on.
    pub fn new_from_string(text: &str) -> State {
        State::new(Input::from_str(text), rune_type_change_deleter())
    }

    /// A state over raw bytes; positions are plain byte offsets and delete
    /// steps are single bytes.
    pub fn new_from_bytes(bytes: &[u8]) -> State {
        State::new(Input::from_bytes(bytes), byte_deleter())
    }

    fn new(input: Input, deleter: Deleter) -> State {
        State {
            mode: ParsingMode::Happy,
            input,
            save_spot: None,
            recover: false,
            max_del: DEFAULT_MAX_DEL,
            max_recursion: DEFAULT_MAX_RECURSION,
            err_hand: ErrHand::default(),
            old_errors: Vec::new(),
            caches: Rc::new(RefCell::new(Caches::default())),
            deleter,
        }
    }

    /// Enables error recovery: failed parsers below a save spot are retried
    /// with up to `max_del` delete steps before being skipped.
    pub fn with_recovery(mut self, max_del: usize) -> State {
        self.recover = true;
        self.max_del = max_del;
        self
    }

    /// Sets the output-cache capacity used for recursion detection.
    pub fn with_max_recursion(mut self, max_recursion: usize) -> State {
        self.max_recursion = max_recursion;
        self
    }

    /// Replaces the deleter deciding what one recovery step skips.
    pub fn with_deleter(mut self, deleter: Deleter) -> State {
        self.deleter = deleter;
        self
    }

    /// Whether error recovery is enabled for this run.
    pub fn recovering(&self) -> bool {
        self.recover
    }

    // ------------------------------------------------------------------
    // input handling

    pub fn at_end(&self) -> bool {
        self.input.pos >= self.input.n
    }

    pub fn bytes_remaining(&self) -> usize {
        self.input.n - self.input.pos
    }

    pub fn current_string(&self) -> Cow<'_, str> {
        self.input.rest_str()
    }

    pub fn current_bytes(&self) -> &[u8] {
        self.input.rest_bytes()
    }

    pub fn current_pos(&self) -> usize {
        self.input.pos
    }

    /// The input between this state's position and `remaining`'s.
    pub fn string_to(&self, remaining: &State) -> String {
        let end = remaining.input.pos.clamp(self.input.pos, self.input.n);
        self.input.text()[self.input.pos..end].to_string()
    }

    pub fn bytes_to<'a>(&'a self, remaining: &State) -> &'a [u8] {
        let end = remaining.input.pos.clamp(self.input.pos, self.input.n);
        &self.input.bytes()[self.input.pos..end]
    }

    /// Bytes consumed between this state and `remaining`; never negative
    /// because parsers never move backward.
    pub fn byte_count(&self, remaining: &State) -> usize {
        remaining.input.pos.clamp(self.input.pos, self.input.n) - self.input.pos
    }

    pub fn move_by(mut self, count_bytes: usize) -> State {
        self.input.move_by(count_bytes);
        self
    }

    pub fn moved(&self, other: &State) -> bool {
        self.input.pos != other.input.pos
    }

    /// Moves forward in the input, thus simulating deletion of input.
    /// Binary input moves by bytes, text input by runes.
    pub fn delete(self, count: usize) -> State {
        if count == 0 {
            return self;
        }
        if self.input.is_binary() {
            return self.move_by(count);
        }
        let offset = match self.current_string().char_indices().nth(count) {
            Some((offset, _)) => offset,
            None => self.bytes_remaining(),
        };
        self.move_by(offset)
    }

    /// Jumps to an absolute position, used by the witness to restore the
    /// culprit's start before a retry.
    pub(crate) fn move_to(mut self, pos: usize) -> State {
        self.input.move_to(pos);
        self
    }

    // ------------------------------------------------------------------
    // success and failure

    pub fn parsing_mode(&self) -> ParsingMode {
        self.mode
    }

    fn adopt_errors(&mut self, sub: &State) {
        if sub.old_errors.len() > self.old_errors.len() {
            self.old_errors = sub.old_errors.clone();
        }
    }

    /// Keeps the save-spot mark and mode from `sub` but drops its error,
    /// turning a failed result into a successful one. Only the `optional`
    /// parser should use this.
    pub fn succeed(mut self, sub: &State) -> State {
        self.save_spot = self.save_spot.max(sub.save_spot);
        self.adopt_errors(sub);
        if !(self.mode == ParsingMode::Happy && sub.mode == ParsingMode::Error) {
            self.mode = sub.mode;
        }
        self
    }

    /// Keeps the error handling, save-spot mark and mode from `sub` while
    /// retaining this state's cursor.
    pub fn preserve(mut self, sub: &State) -> State {
        self.save_spot = self.save_spot.max(sub.save_spot);
        self.adopt_errors(sub);
        self.mode = sub.mode;
        if sub.err_hand.err.is_some() || sub.err_hand.claim.is_some() {
            self.err_hand = sub.err_hand.clone();
        }
        self
    }

    /// Keeps the error from `sub` at this state's cursor. The save-spot
    /// mark is intentionally not kept; this is for branch parsers that are
    /// leaf parsers to the outside.
    pub fn fail(mut self, sub: &State) -> State {
        self.adopt_errors(sub);
        if self.mode == ParsingMode::Happy {
            self.mode = ParsingMode::Error;
            if sub.err_hand.err.is_some() {
                self.err_hand.err = sub.err_hand.err.clone();
            }
        } else {
            self.mode = sub.mode;
            self.err_hand = sub.err_hand.clone();
        }
        self
    }

    /// Replays a cached success: restores the save-spot mark and consumes
    /// the recorded number of bytes.
    pub fn succeed_again(mut self, result: &ParserResult) -> State {
        if result.save_spot.is_some() {
            self.save_spot = self.save_spot.max(result.save_spot);
        }
        self.move_by(result.consumed)
    }

    /// Registers `err` as the current error, switching to `error` mode for
    /// a fresh failure or `rewind` if a witness already claimed an error at
    /// this position. Exists separately from [`State::new_error`] for
    /// replaying cached errors.
    pub fn error_again(mut self, err: ParserError) -> State {
        match self.mode {
            ParsingMode::Happy => {
                let rewind = self
                    .err_hand
                    .claim
                    .map_or(false, |claim| claim.err_pos == err.pos);
                trace!(
                    target: LOG_TARGET,
                    "fail at {}: {} -> {}",
                    err.pos,
                    self.mode,
                    if rewind { ParsingMode::Rewind } else { ParsingMode::Error },
                );
                self.err_hand.err = Some(err);
                self.mode = if rewind {
                    ParsingMode::Rewind
                } else {
                    ParsingMode::Error
                };
                self
            }
            mode => self.new_semantic_error(format!(
                "programming error: error registered in parsing mode `{}`",
                mode
            )),
        }
    }

    /// Sets a syntax error at the current position; `expected ` is
    /// prepended to the message.
    pub fn new_error(self, message: &str) -> State {
        let err = self.make_parser_error(format!("expected {}", message));
        self.error_again(err)
    }

    /// Records a semantic error at the current position. The message is
    /// kept as is; semantic errors are accumulated immediately and never
    /// enter recovery.
    pub fn new_semantic_error(mut self, message: impl Into<String>) -> State {
        let err = self.make_parser_error(message.into());
        self.old_errors.push(err);
        self
    }

    pub(crate) fn make_parser_error(&self, text: String) -> ParserError {
        let pos = self.input.pos;
        let binary = self.input.is_binary();
        let (line, col, src_line) = if binary {
            self.input.bytes_around(pos)
        } else {
            self.input.text_around(pos)
        };
        ParserError {
            text,
            pos,
            line,
            col,
            src_line,
            binary,
        }
    }

    pub fn current_error(&self) -> Option<&ParserError> {
        self.err_hand.err.as_ref()
    }

    /// Appends an already handled error to the accumulated list.
    pub fn save_error(mut self, err: ParserError) -> State {
        self.old_errors.push(err);
        self
    }

    /// Moves the current error to the accumulated list, dropping exact
    /// duplicates. Used once a witness starts handling it.
    pub(crate) fn accumulate_current_error(mut self) -> State {
        if let Some(err) = self.err_hand.err.take() {
            if self.old_errors.last() != Some(&err) {
                self.old_errors.push(err);
            }
        }
        self
    }

    /// Drops the current error without recording it.
    pub(crate) fn discard_current_error(mut self) -> State {
        self.err_hand.err = None;
        self
    }

    /// Releases the witness claim if it belongs to parser `id` and no error
    /// is in flight, resetting the retry counters. Called when the claiming
    /// parser completes successfully, so that the next failure starts a
    /// fresh handling cycle.
    pub(crate) fn release_claim(mut self, id: u64) -> State {
        if self.err_hand.err.is_none() && self.err_hand.claim.map_or(false, |c| c.id == id) {
            self.err_hand = ErrHand::default();
        }
        self
    }

    /// Whether the last parser failed. Handled errors don't count; use
    /// [`State::has_error`] for those.
    pub fn failed(&self) -> bool {
        self.err_hand.err.is_some()
    }

    /// Whether any error was registered at all, handled or not.
    pub fn has_error(&self) -> bool {
        !self.old_errors.is_empty() || self.err_hand.err.is_some()
    }

    /// True if we are still handling an error as opposed to witnessing a
    /// new one.
    pub fn still_handling_error(&self) -> bool {
        self.err_hand.ignore_err_parser || self.err_hand.cur_del > 1
    }

    /// The source line at the current position including `[line:column]`
    /// and the position marker, for reporting errors detected later.
    pub fn current_source_line(&self) -> String {
        self.make_parser_error(String::new()).to_string()
    }

    /// All accumulated diagnostics of this run, or `None` if the parse was
    /// clean.
    pub fn errors(&self) -> Option<ParseErrors> {
        let mut all = self.old_errors.clone();
        if let Some(err) = &self.err_hand.err {
            if all.last().map_or(true, |last| last.pos != err.pos) {
                all.push(err.clone());
            }
        }
        if all.is_empty() {
            None
        } else {
            Some(ParseErrors(all))
        }
    }

    // ------------------------------------------------------------------
    // save spot

    /// True iff the cursor is inside the committed region.
    pub fn save_spot(&self) -> bool {
        self.save_spot.map_or(false, |mark| mark >= self.input.pos)
    }

    /// True iff the save-spot mark differs between the two states.
    pub fn save_spot_moved(&self, other: &State) -> bool {
        self.save_spot != other.save_spot
    }

    // ------------------------------------------------------------------
    // caching

    fn cache_capacity(&self) -> usize {
        (self.max_del + 1).max(8)
    }

    pub(crate) fn cache_recoverer_waste(&self, id: u64, waste: Option<usize>) {
        cache_value(
            &mut self.caches.borrow_mut().recoverer_waste,
            id,
            CachedWaste {
                pos: self.input.pos,
                waste,
            },
            |e| e.pos,
            self.cache_capacity(),
        );
    }

    pub(crate) fn cached_recoverer_waste(&self, id: u64) -> Option<Option<usize>> {
        cached_value(
            &self.caches.borrow().recoverer_waste,
            id,
            self.input.pos,
            |e| e.pos,
        )
        .map(|e| e.waste)
    }

    pub(crate) fn cache_recoverer_waste_idx(
        &self,
        id: u64,
        waste: Option<usize>,
        idx: Option<usize>,
    ) {
        cache_value(
            &mut self.caches.borrow_mut().recoverer_waste_idx,
            id,
            CachedWasteIdx {
                pos: self.input.pos,
                waste,
                idx,
            },
            |e| e.pos,
            self.cache_capacity(),
        );
    }

    pub(crate) fn cached_recoverer_waste_idx(
        &self,
        id: u64,
    ) -> Option<(Option<usize>, Option<usize>)> {
        cached_value(
            &self.caches.borrow().recoverer_waste_idx,
            id,
            self.input.pos,
            |e| e.pos,
        )
        .map(|e| (e.waste, e.idx))
    }

    /// Records the outcome of a branch parser starting at this state, so
    /// that later passes in other parsing modes can replay it.
    pub fn cache_parser_result(
        &self,
        id: u64,
        idx: usize,
        save_spot_idx: usize,
        save_spot_start: Option<usize>,
        new_state: &State,
        output: AnyOutput,
    ) {
        let failed = new_state.failed();
        let result = ParserResult {
            pos: self.input.pos,
            idx,
            save_spot_idx,
            save_spot_start,
            save_spot: if save_spot_start.is_some() {
                new_state.save_spot
            } else {
                None
            },
            failed,
            error_start: if failed { self.byte_count(new_state) } else { 0 },
            consumed: if failed { 0 } else { self.byte_count(new_state) },
            output,
            error: new_state.err_hand.err.clone(),
        };
        cache_value(
            &mut self.caches.borrow_mut().parser_results,
            id,
            result,
            |e| e.pos,
            self.cache_capacity(),
        );
    }

    pub fn cached_parser_result(&self, id: u64) -> Option<ParserResult> {
        cached_value(
            &self.caches.borrow().parser_results,
            id,
            self.input.pos,
            |e| e.pos,
        )
    }

    /// Remembers an output for a call site, used for endless-loop
    /// detection in cyclic grammars.
    pub fn cache_output(&self, call_id: u64, output: AnyOutput) {
        cache_value(
            &mut self.caches.borrow_mut().outputs,
            call_id,
            CachedOutput {
                pos: self.input.pos,
                output,
            },
            |e| e.pos,
            self.max_recursion.max(8),
        );
    }

    pub fn cached_output(&self, call_id: u64) -> Option<AnyOutput> {
        cached_value(&self.caches.borrow().outputs, call_id, self.input.pos, |e| {
            e.pos
        })
        .map(|e| e.output)
    }

    pub fn purge_output(&self, call_id: u64) {
        let mut caches = self.caches.borrow_mut();
        if let Some(entries) = caches.outputs.get_mut(&call_id) {
            entries.retain(|e| e.pos != self.input.pos);
        }
    }

    /// Empties the recoverer and parser-result caches. Called after a
    /// successfully handled error and after a completed save-spot parser:
    /// the input before the new position is never visited again, so the
    /// cached entries can't be used anymore.
    pub fn clear_all_caches(self) -> State {
        {
            let mut caches = self.caches.borrow_mut();
            caches.recoverer_waste.clear();
            caches.recoverer_waste_idx.clear();
            caches.parser_results.clear();
            // outputs survive: they aren't part of error handling
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_and_count() {
        let state = State::new_from_string("hello world");
        let moved = state.clone().move_by(6);
        assert_eq!(state.byte_count(&moved), 6);
        assert_eq!(moved.current_string(), "world");
        assert!(state.moved(&moved));
        assert_eq!(state.string_to(&moved), "hello ");
    }

    #[test]
    fn move_by_clamps_to_end() {
        let state = State::new_from_string("ab");
        let moved = state.move_by(10);
        assert!(moved.at_end());
        assert_eq!(moved.bytes_remaining(), 0);
    }

    #[test]
    fn delete_is_rune_oriented_for_text() {
        let state = State::new_from_string("äbc");
        assert_eq!(state.delete(1).current_string(), "bc");
        let state = State::new_from_bytes("äbc".as_bytes());
        assert_eq!(state.delete(1).bytes_remaining(), 3);
    }

    #[test]
    fn new_error_prepends_expected() {
        let state = State::new_from_string("abc").new_error("digit");
        assert!(state.failed());
        assert_eq!(state.parsing_mode(), ParsingMode::Error);
        assert_eq!(state.current_error().unwrap().message(), "expected digit");
    }

    #[test]
    fn semantic_errors_do_not_fail_the_state() {
        let state = State::new_from_string("abc").new_semantic_error("duplicate key");
        assert!(!state.failed());
        assert!(state.has_error());
        assert_eq!(state.errors().unwrap().len(), 1);
    }

    #[test]
    fn save_spot_mark_is_monotonic() {
        let state = State::new_from_string("abc");
        let mut inner = state.clone().move_by(2);
        inner.save_spot = Some(2);
        let merged = state.preserve(&inner);
        assert_eq!(merged.save_spot, Some(2));
        assert!(merged.save_spot_moved(&State::new_from_string("abc")));
    }

    #[test]
    fn parser_result_cache_replays() {
        let state = State::new_from_string("abcdef");
        let sub = state.clone().move_by(3);
        state.cache_parser_result(7, 0, 0, None, &sub, Some(Rc::new("abc".to_string())));
        let result = state.cached_parser_result(7).unwrap();
        assert!(!result.failed());
        assert_eq!(result.consumed, 3);
        let replayed = state.clone().succeed_again(&result);
        assert_eq!(replayed.current_pos(), 3);
        // a different position misses
        assert!(state.move_by(1).cached_parser_result(7).is_none());
    }

    #[test]
    fn cache_overwrites_nearest_when_full() {
        let state = State::new_from_string("aaaaaaaaaaaaaaaaaaaa");
        // capacity is max(max_del + 1, 8) == 8
        for pos in 0..8 {
            let at = state.clone().move_by(pos);
            at.cache_recoverer_waste(1, Some(pos));
        }
        let at = state.clone().move_by(19);
        at.cache_recoverer_waste(1, Some(99));
        // pos 7 was nearest to 19 and got overwritten
        assert!(state.clone().move_by(7).cached_recoverer_waste(1).is_none());
        assert_eq!(at.cached_recoverer_waste(1), Some(Some(99)));
        assert_eq!(
            state.clone().move_by(3).cached_recoverer_waste(1),
            Some(Some(3))
        );
    }

    #[test]
    fn output_cache_purges_only_current_position() {
        let state = State::new_from_string("abc");
        state.cache_output(5, None);
        state.clone().move_by(1).cache_output(5, Some(Rc::new(1u8)));
        state.purge_output(5);
        assert!(state.cached_output(5).is_none());
        assert!(state.clone().move_by(1).cached_output(5).is_some());
    }

    #[test]
    fn clear_all_caches_keeps_outputs() {
        let state = State::new_from_string("abc");
        state.cache_output(5, None);
        state.cache_recoverer_waste(1, Some(0));
        let state = state.clear_all_caches();
        assert!(state.cached_output(5).is_some());
        assert!(state.cached_recoverer_waste(1).is_none());
    }
}
