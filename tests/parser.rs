//! End-to-end commit semantics of save spots, mirrored across the
//! combinators that must not swallow a committed failure.

use mend::{
    alpha1, digit1, first_successful, many0, map, optional, preceded, save_spot, separated0,
    string, token, Parser, State,
};

struct Scenario {
    name: &'static str,
    parser: Parser<String>,
    input: &'static str,
    want_err: bool,
    want_output: &'static str,
    want_remaining: &'static str,
}

fn join(tokens: Vec<String>) -> Result<String, String> {
    Ok(tokens.concat())
}

#[test]
fn save_spot_commit_semantics() {
    let scenarios = vec![
        Scenario {
            name: "head matching parser should succeed",
            parser: first_successful(vec![digit1(), save_spot(alpha1())]),
            input: "123",
            want_err: false,
            want_output: "123",
            want_remaining: "",
        },
        Scenario {
            name: "tail matching parser should succeed",
            parser: first_successful(vec![save_spot(digit1()), alpha1()]),
            input: "abc",
            want_err: false,
            want_output: "abc",
            want_remaining: "",
        },
        Scenario {
            name: "tail matching parser after failing save-spot head parser should fail",
            parser: first_successful(vec![
                preceded(save_spot(string("a")), digit1()),
                alpha1(),
            ]),
            input: "abc",
            want_err: true,
            want_output: "",
            want_remaining: "abc",
        },
        Scenario {
            name: "optional containing a failed save spot should fail",
            parser: optional(preceded(save_spot(string("a")), digit1())),
            input: "abc",
            want_err: true,
            want_output: "",
            want_remaining: "abc",
        },
        Scenario {
            name: "many0 containing a failed save spot should fail",
            parser: map(
                many0(preceded(save_spot(string("a")), digit1())),
                join,
            ),
            input: "abc",
            want_err: true,
            want_output: "",
            want_remaining: "abc",
        },
        Scenario {
            name: "separated0 containing a failed save spot should fail",
            parser: map(
                separated0(preceded(save_spot(string("a")), digit1()), token(','), false),
                join,
            ),
            input: "a,1",
            want_err: true,
            want_output: "",
            want_remaining: "a,1",
        },
        Scenario {
            name: "no matching parser should fail",
            parser: first_successful(vec![save_spot(digit1()), save_spot(alpha1())]),
            input: "$%^*",
            want_err: true,
            want_output: "",
            want_remaining: "$%^*",
        },
        Scenario {
            name: "empty input should fail",
            parser: first_successful(vec![save_spot(digit1()), save_spot(alpha1())]),
            input: "",
            want_err: true,
            want_output: "",
            want_remaining: "",
        },
    ];

    for scenario in scenarios {
        let state = State::new_from_string(scenario.input);
        let (new_state, output) = scenario.parser.parse(state);
        assert_eq!(
            new_state.failed(),
            scenario.want_err,
            "{}: got error {:?}, want error {}",
            scenario.name,
            new_state.errors(),
            scenario.want_err,
        );
        assert_eq!(
            output, scenario.want_output,
            "{}: wrong output",
            scenario.name,
        );
        assert_eq!(
            new_state.current_string(),
            scenario.want_remaining,
            "{}: wrong remaining input",
            scenario.name,
        );
    }
}

#[test]
fn committed_choice_reports_the_committed_branch() {
    let parser = first_successful(vec![
        preceded(save_spot(string("a")), digit1()),
        alpha1(),
    ]);
    let (state, _) = parser.parse(State::new_from_string("abc"));
    assert!(state.failed());
    let errors = state.errors().expect("an error is registered");
    assert!(
        errors.to_string().contains("expected digit"),
        "got: {}",
        errors,
    );
}

#[test]
fn error_rendering_points_at_the_failure() {
    let parser = preceded(string("x="), digit1());
    let (state, _) = parser.parse(State::new_from_string("x=!"));
    assert!(state.failed());
    let rendered = state.errors().unwrap().to_string();
    assert_eq!(rendered, "expected digit [1:3] \"x=\u{25B6}!\"");
}

#[test]
fn errors_on_later_lines_carry_the_line_number() {
    let parser = preceded(string("one\ntwo\nx="), digit1());
    let (state, _) = parser.parse(State::new_from_string("one\ntwo\nx=!"));
    assert!(state.failed());
    let rendered = state.errors().unwrap().to_string();
    assert_eq!(rendered, "expected digit [3:3] \"x=\u{25B6}!\"");
}

#[test]
fn binary_states_use_byte_windows_in_errors() {
    let parser = string("ok");
    let (state, _) = parser.parse(State::new_from_bytes(b"nope"));
    assert!(state.failed());
    let rendered = state.errors().unwrap().to_string();
    assert!(rendered.starts_with("expected \"ok\" [0:0]"), "got: {}", rendered);
}

#[test]
fn outputs_survive_across_a_save_spot() {
    let parser = preceded(save_spot(string("let ")), alpha1());
    let (state, out) = parser.parse(State::new_from_string("let name"));
    assert!(!state.failed());
    assert_eq!(out, "name");
    assert!(state.at_end());
}
