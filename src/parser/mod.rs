//! The parser object and the combinators built on it.
//!
//! A [`Parser`] bundles its parse function with the static metadata the
//! combinators need at construction time: the human-readable expectation,
//! whether it may act as a witness for failed children, whether it (or any
//! descendant) contains a save spot, and the recoverers used to synchronize
//! after errors. Parsers are cheap to clone and freely shareable within a
//! thread.

use std::any::Any;
use std::rc::Rc;

use crate::recover::{default_recoverer, Recoverer};
use crate::state::{AnyOutput, ParsingMode, State};
use crate::Ternary;

pub mod char;
pub mod choice;
pub mod combinator;
pub mod repeat;
pub mod sequence;
pub mod token;

type ParseFn<O> = Rc<dyn Fn(State) -> (State, O)>;

/// A parser from `State` to `(State, O)`.
///
/// The output type must be `Clone` (results are cached and replayed),
/// `Default` (the zero output stands in for a skipped culprit during error
/// recovery) and `'static` (outputs are type-erased in the caches).
pub struct Parser<O> {
    pub(crate) expected: Rc<str>,
    pub(crate) parse_fn: ParseFn<O>,
    pub(crate) possible_witness: bool,
    pub(crate) recoverer: Option<Recoverer>,
    pub(crate) contains_save_spot: Ternary,
    pub(crate) save_spot_recoverer: Option<Recoverer>,
}

impl<O> Clone for Parser<O> {
    fn clone(&self) -> Self {
        Parser {
            expected: Rc::clone(&self.expected),
            parse_fn: Rc::clone(&self.parse_fn),
            possible_witness: self.possible_witness,
            recoverer: self.recoverer.clone(),
            contains_save_spot: self.contains_save_spot,
            save_spot_recoverer: self.save_spot_recoverer.clone(),
        }
    }
}

impl<O: Clone + Default + 'static> Parser<O> {
    /// Assembles a parser from its parse function and static metadata.
    /// Combinators use this; grammars compose existing parsers instead.
    pub fn new(
        expected: impl Into<Rc<str>>,
        parse_fn: impl Fn(State) -> (State, O) + 'static,
        possible_witness: bool,
        recoverer: Option<Recoverer>,
        contains_save_spot: Ternary,
        save_spot_recoverer: Option<Recoverer>,
    ) -> Parser<O> {
        Parser {
            expected: expected.into(),
            parse_fn: Rc::new(parse_fn),
            possible_witness,
            recoverer,
            contains_save_spot,
            save_spot_recoverer,
        }
    }

    /// Wraps a plain parse function into a leaf parser: no witness role, no
    /// save spot, a default recoverer, and a guard against being invoked in
    /// any mode but happy (only branch parsers take part in the recovery
    /// walk).
    pub fn new_leaf(
        expected: impl Into<Rc<str>>,
        parse_fn: impl Fn(State) -> (State, O) + 'static,
    ) -> Parser<O> {
        let expected: Rc<str> = expected.into();
        let guard_expected = Rc::clone(&expected);
        let guarded = move |state: State| {
            if state.parsing_mode() != ParsingMode::Happy {
                let msg = format!(
                    "programming error: `{}` parser used in parsing mode `{}`",
                    guard_expected,
                    state.parsing_mode()
                );
                return (state.new_semantic_error(msg), O::default());
            }
            parse_fn(state)
        };
        let mut parser = Parser {
            expected,
            parse_fn: Rc::new(guarded),
            possible_witness: false,
            recoverer: None,
            contains_save_spot: Ternary::No,
            save_spot_recoverer: None,
        };
        parser.recoverer = Some(default_recoverer(parser.clone()));
        parser
    }

    /// Runs the parser on `state`. On failure the returned state carries
    /// the error; the output is the zero value then.
    pub fn parse(&self, state: State) -> (State, O) {
        (self.parse_fn)(state)
    }

    /// Human-readable expectation, used in `expected …` error messages.
    pub fn expected(&self) -> &str {
        &self.expected
    }

    /// May this parser (or a descendant) act as a witness parent?
    pub fn possible_witness(&self) -> bool {
        self.possible_witness
    }

    /// Does this parser (or any descendant) contain a save spot?
    pub fn contains_save_spot(&self) -> Ternary {
        self.contains_save_spot
    }

    /// Waste needed to synchronize at this parser's save spot, `None` if
    /// unreachable or if the parser has no save spot.
    pub fn save_spot_recoverer(&self, state: &State) -> Option<usize> {
        self.save_spot_recoverer.as_ref().and_then(|r| r(state))
    }

    pub(crate) fn save_spot_recoverer_fn(&self) -> Option<Recoverer> {
        self.save_spot_recoverer.clone()
    }

    pub(crate) fn recoverer_fn(&self) -> Option<Recoverer> {
        self.recoverer.clone()
    }

    /// A type-erased view of this parser for the heterogeneous sequence
    /// engine: outputs are boxed, failures map to the `None` slot.
    pub(crate) fn erased(&self) -> Parser<AnyOutput> {
        let inner = self.clone();
        Parser {
            expected: Rc::clone(&self.expected),
            parse_fn: Rc::new(move |state| {
                let (state, output) = inner.parse(state);
                let erased: AnyOutput = if state.failed() {
                    None
                } else {
                    Some(Rc::new(output) as Rc<dyn Any>)
                };
                (state, erased)
            }),
            possible_witness: self.possible_witness,
            recoverer: self.recoverer.clone(),
            contains_save_spot: self.contains_save_spot,
            save_spot_recoverer: self.save_spot_recoverer.clone(),
        }
    }
}

/// Recovers the typed output from an erased cache slot, falling back to the
/// zero value for skipped or failed slots.
pub(crate) fn downcast<O: Clone + Default + 'static>(output: &AnyOutput) -> O {
    output
        .as_ref()
        .and_then(|rc| rc.downcast_ref::<O>())
        .cloned()
        .unwrap_or_default()
}
