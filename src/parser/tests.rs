//! Unit tests for the statechart DSL parser

use serde_json::json;

use crate::parser::{parse_duration, parse_machines, ParseError};
use crate::statechart::{NodeKind, StatechartDefinition};

#[test]
fn test_parse_simple_machine() {
    let source = r#"
        machine toggle {
            initial inactive;
            state inactive { on TOGGLE -> active; }
            state active { on TOGGLE -> inactive; }
        }
    "#;

    let machines = parse_machines(source).expect("Should parse successfully");
    assert_eq!(machines.len(), 1);

    let def = StatechartDefinition::from_config(machines[0].clone()).unwrap();
    assert_eq!(def.id, "toggle");
    assert_eq!(def.root().children.len(), 2);
    assert_eq!(def.root().initial, def.index_of("toggle.inactive"));

    let inactive = def.get("toggle.inactive").unwrap();
    assert_eq!(inactive.transitions["TOGGLE"][0].targets, vec!["toggle.active".to_string()]);
    assert!(def.validate().is_ok());
}

#[test]
fn test_parse_multiple_machines() {
    let source = r#"
        machine a { state x; }
        // second one
        machine b { state y; state z; }
    "#;

    let machines = parse_machines(source).expect("Should parse successfully");
    assert_eq!(machines.len(), 2);
    assert_eq!(machines[1].id, "b");
    assert_eq!(machines[1].root.states.len(), 2);
}

#[test]
fn test_parse_guard_actions_and_multiple_targets() {
    let source = r#"
        machine form {
            initial editing;
            state editing {
                entry / focus, log("editing");
                exit / blur;
                on SUBMIT [isValid] -> submitting / assign(attempts = 1);
                on SUBMIT -> error;
            }
            state submitting;
            state error;
        }
    "#;

    let machines = parse_machines(source).unwrap();
    let def = StatechartDefinition::from_config(machines[0].clone()).unwrap();
    let editing = def.get("form.editing").unwrap();

    assert_eq!(editing.entry.len(), 2);
    assert_eq!(editing.entry[0].kind, "focus");
    assert_eq!(editing.entry[1].params, json!(["editing"]));
    assert_eq!(editing.exit[0].kind, "blur");

    let submit = &editing.transitions["SUBMIT"];
    assert_eq!(submit.len(), 2);
    assert_eq!(submit[0].guard.as_ref().unwrap().kind, "isValid");
    assert_eq!(submit[0].actions[0].kind, "assign");
    assert_eq!(submit[0].actions[0].params, json!({ "attempts": 1 }));
    assert_eq!(submit[1].targets, vec!["form.error".to_string()]);
}

#[test]
fn test_parse_state_kinds_and_custom_id() {
    let source = r#"
        machine m {
            parallel state regions {
                state left { state a; }
                state right { state b; }
            }
            history state hist;
            final state done #finished;
        }
    "#;

    let machines = parse_machines(source).unwrap();
    let def = StatechartDefinition::from_config(machines[0].clone()).unwrap();

    assert_eq!(def.get("m.regions").unwrap().kind, NodeKind::Parallel);
    assert_eq!(def.get("m.hist").unwrap().kind, NodeKind::History);
    assert_eq!(def.get("finished").unwrap().kind, NodeKind::Final);
}

#[test]
fn test_parse_after_always_and_delays() {
    let source = r#"
        machine light {
            delay slow = 2.5s;
            context { count = 0; label = "x"; on = true; }
            initial green;
            state green {
                after 1s -> yellow;
                after slow -> red;
            }
            state yellow { always [ready] -> red; }
            state red;
        }
    "#;

    let machines = parse_machines(source).unwrap();
    let machine = &machines[0];
    assert_eq!(machine.delays.get("slow"), Some(&2500));
    assert_eq!(machine.context, json!({ "count": 0, "label": "x", "on": true }));

    let def = StatechartDefinition::from_config(machine.clone()).unwrap();
    let green = def.get("light.green").unwrap();
    let keys: Vec<&str> = green.transitions.keys().map(|k| k.as_str()).collect();
    assert_eq!(
        keys,
        vec!["xstate.after(1000)#light.green", "xstate.after(slow)#light.green"]
    );

    let yellow = def.get("light.yellow").unwrap();
    assert_eq!(yellow.transitions[""][0].guard.as_ref().unwrap().kind, "ready");
}

#[test]
fn test_targetless_and_reenter_transitions() {
    let source = r#"
        machine m {
            state a {
                on PING / log;
                on RESTART -> a reenter;
            }
        }
    "#;

    let machines = parse_machines(source).unwrap();
    let def = StatechartDefinition::from_config(machines[0].clone()).unwrap();
    let a = def.get("m.a").unwrap();
    assert!(a.transitions["PING"][0].targets.is_empty());
    assert!(a.transitions["RESTART"][0].reenter);
}

#[test]
fn test_delay_inside_state_is_rejected() {
    let source = r#"
        machine m {
            state a { delay slow = 1s; }
        }
    "#;

    let result = parse_machines(source);
    assert!(matches!(result, Err(ParseError::SyntaxError { .. })));
}

#[test]
fn test_duplicate_state_is_rejected() {
    let source = "machine m { state a; state a; }";
    assert!(matches!(
        parse_machines(source),
        Err(ParseError::SyntaxError { .. })
    ));
}

#[test]
fn test_invalid_syntax() {
    assert!(matches!(
        parse_machines("machine m { state a "),
        Err(ParseError::PestError(_))
    ));
}

#[test]
fn test_parse_duration() {
    assert_eq!(parse_duration("300ms").unwrap(), 300);
    assert_eq!(parse_duration("2s").unwrap(), 2000);
    assert_eq!(parse_duration("1.5s").unwrap(), 1500);
    assert_eq!(parse_duration("1.25s").unwrap(), 1250);
    assert_eq!(parse_duration(".5s").unwrap(), 500);
    assert_eq!(parse_duration("750").unwrap(), 750);
    assert!(parse_duration("1.2345s").is_err());
    assert!(parse_duration("soon").is_err());
}
