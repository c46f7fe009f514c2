//! End-to-end error recovery: parses that keep going past failures and
//! report several diagnostics from a single run.

use mend::{digit1, many0, map2, map3, save_spot, string, State};
use mend::{Parser, ParsingMode};

/// `{` <digits> `}` with the opening brace as the commitment point.
fn braced() -> Parser<String> {
    map3(
        save_spot(string("{")),
        digit1(),
        string("}"),
        |_, value, _| Ok(value),
    )
}

/// `x=` <digits> `;` with the key as the commitment point.
fn assignment(key: &'static str) -> Parser<String> {
    map3(save_spot(string(key)), digit1(), string(";"), |_, value, _| {
        Ok(value)
    })
}

#[test]
fn recovery_skips_an_unparsable_value() {
    let state = State::new_from_string("{x1}").with_recovery(3);
    let (state, _) = braced().parse(state);

    assert!(!state.failed(), "recovered parses are not failures");
    assert!(state.at_end(), "remaining: {:?}", state.current_string());
    let errors = state.errors().expect("the diagnostic is kept");
    assert_eq!(errors.len(), 1);
    assert!(errors.to_string().contains("expected digit"), "got: {}", errors);
}

#[test]
fn recovery_resynchronizes_at_a_later_save_spot() {
    let parser = map2(assignment("x="), assignment("y="), |x, y| Ok((x, y)));
    let state = State::new_from_string("x=1;garbage y=2;").with_recovery(3);
    let (state, (x, y)) = parser.parse(state);

    assert!(!state.failed());
    assert!(state.at_end(), "remaining: {:?}", state.current_string());
    assert_eq!((x.as_str(), y.as_str()), ("1", "2"));
    let errors = state.errors().expect("the skipped garbage is reported");
    assert_eq!(errors.len(), 1);
    assert!(errors.to_string().contains("expected \"y=\""), "got: {}", errors);
}

#[test]
fn one_run_accumulates_several_diagnostics() {
    let parser = many0(braced());
    let state = State::new_from_string("{x1}{y2}").with_recovery(3);
    let (state, values) = parser.parse(state);

    assert!(!state.failed());
    assert!(state.at_end(), "remaining: {:?}", state.current_string());
    assert_eq!(values.len(), 2);
    let errors = state.errors().expect("both diagnostics are kept");
    assert_eq!(errors.len(), 2, "got: {}", errors);
    let rendered = errors.to_string();
    assert!(rendered.contains('x') && rendered.contains('y'), "got: {}", rendered);
}

#[test]
fn clean_input_stays_clean_under_recovery() {
    let parser = many0(braced());
    let state = State::new_from_string("{1}{2}{3}").with_recovery(3);
    let (state, values) = parser.parse(state);

    assert!(!state.failed());
    assert!(state.errors().is_none());
    assert_eq!(values, vec!["1", "2", "3"]);
    assert!(state.at_end());
}

#[test]
fn retries_are_bounded_by_max_del() {
    // nothing after the opening brace: every retry runs out of input, the
    // culprit is skipped, and the run still terminates
    let state = State::new_from_string("{").with_recovery(1);
    let (state, _) = braced().parse(state);

    assert!(state.has_error());
    let rendered = state.errors().unwrap().to_string();
    assert!(rendered.contains("expected digit"), "got: {}", rendered);
}

#[test]
fn recovery_leaves_commit_failures_outside_save_spots_alone() {
    // no save spot crossed: the failure is witnessed but nothing anchors
    // the handling, so the parse fails as without recovery
    let parser = map2(string("a"), digit1(), |a, d| Ok(format!("{}{}", a, d)));
    let state = State::new_from_string("ab").with_recovery(3);
    let (state, _) = parser.parse(state);

    assert!(state.failed());
    assert_eq!(state.parsing_mode(), ParsingMode::Error);
    assert_eq!(state.current_string(), "ab");
}

#[test]
fn still_handling_is_visible_mid_retry() {
    // after a successful recovery the retry counters are reset
    let state = State::new_from_string("{x1}").with_recovery(3);
    let (state, _) = braced().parse(state);
    assert!(!state.still_handling_error());
}

#[test]
fn recovered_state_reports_positions_of_all_errors() {
    let parser = many0(braced());
    let state = State::new_from_string("{x1}{y2}").with_recovery(3);
    let (state, _) = parser.parse(state);

    let errors = state.errors().unwrap();
    let positions: Vec<usize> = errors.iter().map(|e| e.pos()).collect();
    assert_eq!(positions, vec![1, 5]);
}
