//! Parser combinators that keep going.
//!
//! `mend` composes small parsers into larger ones over a shared input
//! cursor. What sets it apart is structured error recovery: grammars mark
//! commitment points with [`save_spot`], and when a parser below such a mark
//! fails, the library backtracks to the mark, retries the failing parser
//! while deleting a bounded amount of input, and resumes — reporting several
//! diagnostics from a single run instead of giving up at the first one.
//!
//! ```
//! use mend::{digit1, map3, save_spot, string, State};
//!
//! let assignment = map3(save_spot(string("x=")), digit1(), string(";"), |_, value, _| {
//!     Ok(value)
//! });
//!
//! // clean input parses normally
//! let (state, value) = assignment.parse(State::new_from_string("x=42;"));
//! assert!(!state.failed());
//! assert_eq!(value, "42");
//!
//! // with recovery enabled, a bad value still yields a diagnostic AND a parse
//! let state = State::new_from_string("x=!;").with_recovery(3);
//! let (state, _) = assignment.parse(state);
//! let errors = state.errors().expect("one diagnostic");
//! assert!(errors.to_string().contains("expected digit"));
//! ```
//!
//! Parsing is driven by a [`State`] value threaded through the parsers; the
//! mode it carries steers the recovery state machine (see [`ParsingMode`]).
//! Branch parsers such as [`map2`] and [`first_successful`] take part in the
//! witness protocol: the nearest branch parent adopts a failure, retries the
//! culprit and accumulates the diagnostic.

use std::sync::atomic::{AtomicU64, Ordering};

pub mod error;
mod input;
pub mod parser;
pub mod recover;
pub mod state;

pub use crate::error::{ParseErrors, ParserError};
pub use crate::parser::char::{alpha1, digit1};
pub use crate::parser::choice::{first_successful, optional};
pub use crate::parser::combinator::{lazy, save_spot};
pub use crate::parser::repeat::{many0, separated0};
pub use crate::parser::sequence::{map, map2, map3, map4, map5, preceded, terminated};
pub use crate::parser::token::{satisfy, string, token};
pub use crate::parser::Parser;
pub use crate::recover::{
    byte_deleter, caching_recoverer, default_recoverer, handle_witness, i_witnessed,
    rune_type_change_deleter, CombiningRecoverer, Deleter, Recoverer,
};
pub use crate::state::{AnyOutput, ParserResult, ParsingMode, State};

pub(crate) const LOG_TARGET: &str = "mend";

/// Three-valued logic for conservative static properties of parsers, most
/// prominently "does this parser contain a save spot". Ordered so that
/// combining parsers can take the maximum over their children.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Ternary {
    No,
    Maybe,
    Yes,
}

static BRANCH_PARSER_IDS: AtomicU64 = AtomicU64::new(0);
static CACHING_RECOVERER_IDS: AtomicU64 = AtomicU64::new(0);
static COMBINING_RECOVERER_IDS: AtomicU64 = AtomicU64::new(0);
static CALL_IDS: AtomicU64 = AtomicU64::new(0);

/// Returns a fresh ID for a branch parser. IDs are issued at construction
/// time and key the per-run result caches; they are the only process-wide
/// state of the library.
pub fn new_branch_parser_id() -> u64 {
    BRANCH_PARSER_IDS.fetch_add(1, Ordering::Relaxed) + 1
}

pub(crate) fn new_caching_recoverer_id() -> u64 {
    CACHING_RECOVERER_IDS.fetch_add(1, Ordering::Relaxed) + 1
}

pub(crate) fn new_combining_recoverer_id() -> u64 {
    COMBINING_RECOVERER_IDS.fetch_add(1, Ordering::Relaxed) + 1
}

/// Returns a fresh ID for a call site that might run into an endless loop;
/// used with the output cache to detect cyclic grammars that stand still.
pub fn new_call_id() -> u64 {
    CALL_IDS.fetch_add(1, Ordering::Relaxed) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let a = new_branch_parser_id();
        let b = new_branch_parser_id();
        assert!(b > a);
        assert!(new_call_id() < new_call_id());
    }

    #[test]
    fn ternary_orders_for_max() {
        assert!(Ternary::No < Ternary::Maybe);
        assert!(Ternary::Maybe < Ternary::Yes);
        assert_eq!(Ternary::No.max(Ternary::Yes), Ternary::Yes);
    }
}
